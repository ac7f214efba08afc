//! Command-line interface for cinit.
use clap::Parser;

use crate::constants::{SERVICES_DEFAULT_GRACETIME, SERVICES_DEFAULT_ROOT};

/// A minimal container init: supervises a declarative set of services.
#[derive(Parser, Debug)]
#[command(name = "cinit", version, author)]
#[command(about = "Minimal container init / service supervisor", long_about = None)]
pub struct Cli {
    /// Enable debug logging.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Override the log-prefix identity used for supervisor messages
    /// (defaults to the invoked program name).
    #[arg(short = 'p', long = "progname", value_name = "NAME")]
    pub progname: Option<String>,

    /// Services root directory (must be absolute).
    #[arg(short = 'r', long = "root-directory", value_name = "DIR", default_value = SERVICES_DEFAULT_ROOT)]
    pub root_directory: String,

    /// Milliseconds to wait after a broadcast SIGTERM before broadcasting
    /// SIGKILL during shutdown.
    #[arg(short = 'g', long = "services-gracetime", value_name = "MSEC", default_value_t = SERVICES_DEFAULT_GRACETIME.as_millis() as u64)]
    pub services_gracetime_ms: u64,

    /// Default uid applied to services that don't specify one.
    #[arg(short = 'u', long = "default-service-uid", value_name = "N")]
    pub default_service_uid: Option<u32>,

    /// Default gid applied to services that don't specify one.
    #[arg(short = 'i', long = "default-service-gid", value_name = "N")]
    pub default_service_gid: Option<u32>,

    /// Default supplementary group list (comma-separated) applied to
    /// services that don't specify one.
    #[arg(short = 's', long = "default-service-sgid-list", value_name = "CSV")]
    pub default_service_sgid_list: Option<String>,

    /// Default umask (octal) applied to services that don't specify one.
    #[arg(short = 'm', long = "default-service-umask", value_name = "OCT")]
    pub default_service_umask: Option<String>,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let cli = Cli::parse_from(["cinit"]);
        assert!(!cli.debug);
        assert_eq!(cli.root_directory, SERVICES_DEFAULT_ROOT);
        assert_eq!(
            cli.services_gracetime_ms,
            SERVICES_DEFAULT_GRACETIME.as_millis() as u64
        );
        assert!(cli.default_service_uid.is_none());
    }

    #[test]
    fn short_flags_parse() {
        let cli = Cli::parse_from([
            "cinit", "-d", "-p", "myinit", "-r", "/srv/services", "-g", "2000", "-u",
            "2000", "-i", "2000", "-s", "100,200", "-m", "027",
        ]);
        assert!(cli.debug);
        assert_eq!(cli.progname.as_deref(), Some("myinit"));
        assert_eq!(cli.root_directory, "/srv/services");
        assert_eq!(cli.services_gracetime_ms, 2000);
        assert_eq!(cli.default_service_uid, Some(2000));
        assert_eq!(cli.default_service_gid, Some(2000));
        assert_eq!(cli.default_service_sgid_list.as_deref(), Some("100,200"));
        assert_eq!(cli.default_service_umask.as_deref(), Some("027"));
    }
}
