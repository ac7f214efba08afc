use std::time::Duration;

use cinit::cli::{self, Cli};
use cinit::config::{self, Defaults};
use cinit::constants::DEFAULT_PROGRAM_NAME;
use cinit::{output, shutdown, signals, supervisor::Supervisor};

fn init_logging(cli: &Cli) {
    let filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = cli::parse_args();
    init_logging(&cli);

    let progname = cli
        .progname
        .clone()
        .unwrap_or_else(|| DEFAULT_PROGRAM_NAME.to_string());

    let defaults = Defaults::from_cli_overrides(
        cli.default_service_uid,
        cli.default_service_gid,
        cli.default_service_umask.as_deref(),
        cli.default_service_sgid_list.as_deref(),
    )?;

    let root = std::path::PathBuf::from(&cli.root_directory);
    let (table, order) = config::load_tree(&root, &defaults)?;
    tracing::info!(services = table.len(), "loaded service tree");

    signals::install()?;

    let supervisor = Supervisor::new(progname.clone(), table, order);
    let (mut table, order, mut exit_code) = supervisor.run();

    let prefix_width = output::prefix_width(table.iter().map(|e| e.def.name.len()));
    let gracetime = Duration::from_millis(cli.services_gracetime_ms);
    exit_code = shutdown::run(
        &root,
        &progname,
        prefix_width,
        &mut table,
        &order,
        gracetime,
        exit_code,
    );

    std::process::exit(exit_code);
}
