//! Config Loader: turns a services-root directory tree into a
//! populated [`ServiceTable`] and [`StartOrder`].

use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::constants::{
    MAX_NUM_SERVICE_ENV_VARS, MAX_NUM_SERVICE_RUN_PARAMS, MAX_SERVICE_NAME_LEN,
    SERVICE_DEFAULT_GID, SERVICE_DEFAULT_MIN_RUNNING_TIME, SERVICE_DEFAULT_READY_TIMEOUT,
    SERVICE_DEFAULT_UID, SERVICE_DEFAULT_UMASK, SERVICE_SGID_LIST_SIZE,
};
use crate::error::ConfigError;
use crate::order::StartOrder;
use crate::service::{ServiceDefinition, ServiceKind, ServiceTable};

/// Default identities and umask applied to a service that doesn't override
/// them, resolved once from CLI flags at startup.
#[derive(Debug, Clone)]
pub struct Defaults {
    /// Default uid.
    pub uid: u32,
    /// Default gid.
    pub gid: u32,
    /// Default umask.
    pub umask: u32,
    /// Default supplementary group list.
    pub sgid_list: Vec<u32>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            uid: SERVICE_DEFAULT_UID,
            gid: SERVICE_DEFAULT_GID,
            umask: SERVICE_DEFAULT_UMASK,
            sgid_list: Vec::new(),
        }
    }
}

impl Defaults {
    /// Builds defaults from the optional CLI overrides, falling back to the
    /// compiled-in constants for anything left unset.
    pub fn from_cli_overrides(
        uid: Option<u32>,
        gid: Option<u32>,
        umask: Option<&str>,
        sgid_csv: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let mut defaults = Defaults::default();
        if let Some(uid) = uid {
            defaults.uid = uid;
        }
        if let Some(gid) = gid {
            defaults.gid = gid;
        }
        if let Some(umask) = umask {
            defaults.umask = parse_mode("defaults", "umask", Path::new("<cli>"), umask)?;
        }
        if let Some(csv) = sgid_csv {
            defaults.sgid_list = csv
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| parse_gid("defaults", Path::new("<cli>"), s))
                .collect::<Result<Vec<_>, _>>()?;
        }
        Ok(defaults)
    }
}

fn io_err(path: &Path, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_executable(path: &Path) -> std::io::Result<bool> {
    let meta = fs::metadata(path)?;
    Ok(meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

/// Resolves a value file's raw content per the value resolution rule: the
/// program's stdout if the file is executable, otherwise its contents.
fn raw_value(path: &Path, cwd: &Path) -> Result<Option<String>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    if is_executable(path).map_err(|e| io_err(path, e))? {
        let output = std::process::Command::new(path)
            .current_dir(cwd)
            .output()
            .map_err(|e| io_err(path, e))?;
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    } else {
        Ok(Some(fs::read_to_string(path).map_err(|e| io_err(path, e))?))
    }
}

/// First line of a value file's resolved content, CRLF-tolerant, or `None`
/// if the file doesn't exist.
fn scalar_value(path: &Path, cwd: &Path) -> Result<Option<String>, ConfigError> {
    Ok(raw_value(path, cwd)?
        .map(|raw| raw.lines().next().unwrap_or("").trim_end_matches('\r').to_string()))
}

/// Every non-empty line of a value file's resolved content, CRLF-tolerant.
fn list_value(path: &Path, cwd: &Path) -> Result<Vec<String>, ConfigError> {
    Ok(raw_value(path, cwd)?
        .map(|raw| {
            raw.lines()
                .map(|l| l.trim_end_matches('\r').trim().to_string())
                .filter(|l| !l.is_empty())
                .collect()
        })
        .unwrap_or_default())
}

/// Parses a boolean value file per R2; an existing-but-empty file is `true`.
fn bool_value(
    name: &str,
    field: &'static str,
    path: &Path,
    cwd: &Path,
) -> Result<bool, ConfigError> {
    match raw_value(path, cwd)? {
        None => Ok(false),
        Some(raw) if raw.trim().is_empty() => Ok(true),
        Some(raw) => string_to_bool(raw.trim()).ok_or_else(|| ConfigError::InvalidValue {
            name: name.to_string(),
            field,
            path: path.to_path_buf(),
            reason: format!("'{}' is not a recognized boolean", raw.trim()),
        }),
    }
}

/// Boolean string parser per R2.
fn string_to_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "true" | "TRUE" | "yes" | "on" | "enable" | "enabled" => Some(true),
        "0" | "false" | "FALSE" | "no" | "off" | "disable" | "disabled" => Some(false),
        _ => None,
    }
}

fn parse_uint(name: &str, field: &'static str, path: &Path, s: &str) -> Result<u64, ConfigError> {
    s.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        field,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Interval parser: unsigned seconds, or one of the named periods.
fn parse_interval(name: &str, path: &Path, s: &str) -> Result<u64, ConfigError> {
    match s.trim() {
        "yearly" => Ok(365 * 24 * 3600),
        "monthly" => Ok(30 * 24 * 3600),
        "weekly" => Ok(7 * 24 * 3600),
        "daily" => Ok(24 * 3600),
        "hourly" => Ok(3600),
        other => parse_uint(name, "interval", path, other),
    }
}

fn parse_mode(name: &str, field: &'static str, path: &Path, s: &str) -> Result<u32, ConfigError> {
    u32::from_str_radix(s.trim(), 8).map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        field,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn parse_uid(name: &str, path: &Path, s: &str) -> Result<u32, ConfigError> {
    let s = s.trim();
    if let Ok(n) = s.parse::<u32>() {
        return Ok(n);
    }
    match nix::unistd::User::from_name(s) {
        Ok(Some(user)) => Ok(user.uid.as_raw()),
        Ok(None) => Err(ConfigError::UnknownIdentity {
            name: name.to_string(),
            field: "uid",
            value: s.to_string(),
        }),
        Err(_) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            field: "uid",
            path: path.to_path_buf(),
            reason: "user lookup failed".to_string(),
        }),
    }
}

fn parse_gid(name: &str, path: &Path, s: &str) -> Result<u32, ConfigError> {
    let s = s.trim();
    if let Ok(n) = s.parse::<u32>() {
        return Ok(n);
    }
    match nix::unistd::Group::from_name(s) {
        Ok(Some(group)) => Ok(group.gid.as_raw()),
        Ok(None) => Err(ConfigError::UnknownIdentity {
            name: name.to_string(),
            field: "gid",
            value: s.to_string(),
        }),
        Err(_) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            field: "gid",
            path: path.to_path_buf(),
            reason: "group lookup failed".to_string(),
        }),
    }
}

fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Reads a services root into a [`ServiceTable`] and [`StartOrder`] by
/// scanning every immediate subdirectory.
pub fn load_tree(root: &Path, defaults: &Defaults) -> Result<(ServiceTable, StartOrder), ConfigError> {
    if !root.is_absolute() {
        return Err(ConfigError::RootNotAbsolute {
            path: root.to_path_buf(),
        });
    }
    if !root.is_dir() {
        return Err(ConfigError::InvalidRoot {
            path: root.to_path_buf(),
        });
    }
    let mut table = ServiceTable::new();
    let mut order = StartOrder::new();
    let mut names: Vec<String> = fs::read_dir(root)
        .map_err(|e| io_err(root, e))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    for name in names {
        let mut loader = Loader {
            root,
            table: &mut table,
            order: &mut order,
            defaults,
        };
        loader.load_service(&name, None)?;
    }
    Ok((table, order))
}

struct Loader<'a> {
    root: &'a Path,
    table: &'a mut ServiceTable,
    order: &'a mut StartOrder,
    defaults: &'a Defaults,
}

impl Loader<'_> {
    /// Loads `name` (recursing into its own `.dep` entries first) and places
    /// it in the start order relative to `dependent`, the service that
    /// required it. A service is only positioned *after* every one of its own
    /// dependencies has already been positioned, so a chain never needs to
    /// relocate an entry that a later, unrelated edge already placed.
    /// `dependent` is `None` for a top-level scan root, which has no edge to
    /// hang its position off of and is simply appended.
    fn load_service(&mut self, name: &str, dependent: Option<usize>) -> Result<usize, ConfigError> {
        if let Some(index) = self.table.find_by_name(name) {
            if let Some(dependent) = dependent {
                self.order.insert_dependency(index, dependent);
            }
            return Ok(index);
        }
        if name.len() > MAX_SERVICE_NAME_LEN {
            return Err(ConfigError::NameTooLong {
                name: name.to_string(),
                max: MAX_SERVICE_NAME_LEN,
            });
        }
        let service_dir = self.root.join(name);
        if !service_dir.is_dir() {
            return Err(ConfigError::Io {
                path: service_dir,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        let def = build_definition(name, &service_dir, self.defaults)?;
        let index = self.table.insert(def)?;

        for dep_name in scan_deps(name, &service_dir)? {
            self.load_service(&dep_name, Some(index))?;
        }

        match dependent {
            Some(dependent) => self.order.insert_dependency(index, dependent),
            None => self.order.append(index),
        }
        Ok(index)
    }
}

fn scan_deps(name: &str, service_dir: &Path) -> Result<Vec<String>, ConfigError> {
    let mut deps = Vec::new();
    let entries = fs::read_dir(service_dir).map_err(|e| io_err(service_dir, e))?;
    let mut dep_paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension() == Some(OsStr::new("dep")))
        .collect();
    dep_paths.sort();
    for path in dep_paths {
        let dep_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if bool_value(name, "dep", &path, service_dir)? {
            deps.push(dep_name);
        }
    }
    Ok(deps)
}

fn build_definition(
    name: &str,
    service_dir: &Path,
    defaults: &Defaults,
) -> Result<ServiceDefinition, ConfigError> {
    let disabled = bool_value(name, "disabled", &service_dir.join("disabled"), service_dir)?;
    let run_file = service_dir.join("run");
    let has_run = run_file.is_file();

    let kind = if disabled {
        ServiceKind::Disabled
    } else if has_run {
        ServiceKind::Runnable
    } else {
        ServiceKind::Group
    };

    let run_path = if has_run {
        if !is_executable(&run_file).map_err(|e| io_err(&run_file, e))? {
            return Err(ConfigError::RunNotExecutable {
                name: name.to_string(),
                path: run_file,
            });
        }
        Some(fs::canonicalize(&run_file).map_err(|e| io_err(&run_file, e))?)
    } else {
        None
    };

    let params = list_value(&service_dir.join("params"), service_dir)?;
    if params.len() > MAX_NUM_SERVICE_RUN_PARAMS {
        return Err(ConfigError::TooManyEntries {
            name: name.to_string(),
            field: "params",
            max: MAX_NUM_SERVICE_RUN_PARAMS,
        });
    }

    let env_lines = list_value(&service_dir.join("environment"), service_dir)?;
    if env_lines.len() > MAX_NUM_SERVICE_ENV_VARS {
        return Err(ConfigError::TooManyEntries {
            name: name.to_string(),
            field: "environment",
            max: MAX_NUM_SERVICE_ENV_VARS,
        });
    }
    let mut environment = Vec::with_capacity(env_lines.len());
    for line in env_lines {
        let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::InvalidEnvName {
            name: name.to_string(),
            key: line.clone(),
        })?;
        if !is_valid_env_key(key) {
            return Err(ConfigError::InvalidEnvName {
                name: name.to_string(),
                key: key.to_string(),
            });
        }
        environment.push((key.to_string(), value.to_string()));
    }

    let sgid_lines = list_value(&service_dir.join("sgid"), service_dir)?;
    if sgid_lines.len() > SERVICE_SGID_LIST_SIZE {
        return Err(ConfigError::TooManyEntries {
            name: name.to_string(),
            field: "sgid",
            max: SERVICE_SGID_LIST_SIZE,
        });
    }
    let sgid_list = if sgid_lines.is_empty() {
        defaults.sgid_list.clone()
    } else {
        sgid_lines
            .iter()
            .map(|s| parse_gid(name, &service_dir.join("sgid"), s))
            .collect::<Result<Vec<_>, _>>()?
    };

    let uid = match scalar_value(&service_dir.join("uid"), service_dir)? {
        Some(s) => parse_uid(name, &service_dir.join("uid"), &s)?,
        None => defaults.uid,
    };
    let gid = match scalar_value(&service_dir.join("gid"), service_dir)? {
        Some(s) => parse_gid(name, &service_dir.join("gid"), &s)?,
        None => defaults.gid,
    };
    let umask = match scalar_value(&service_dir.join("umask"), service_dir)? {
        Some(s) => parse_mode(name, "umask", &service_dir.join("umask"), &s)?,
        None => defaults.umask,
    };
    let priority = match scalar_value(&service_dir.join("priority"), service_dir)? {
        Some(s) => s.trim().parse::<i32>().map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            field: "priority",
            path: service_dir.join("priority"),
            reason: e.to_string(),
        })?,
        None => 0,
    };
    let working_directory = scalar_value(&service_dir.join("workdir"), service_dir)?
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    let respawn = bool_value(name, "respawn", &service_dir.join("respawn"), service_dir)?;
    let sync = bool_value(name, "sync", &service_dir.join("sync"), service_dir)?;
    let ignore_failure = bool_value(
        name,
        "ignore_failure",
        &service_dir.join("ignore_failure"),
        service_dir,
    )?;
    let shutdown_on_terminate = bool_value(
        name,
        "shutdown_on_terminate",
        &service_dir.join("shutdown_on_terminate"),
        service_dir,
    )?;

    let interval = match scalar_value(&service_dir.join("interval"), service_dir)? {
        Some(s) => parse_interval(name, &service_dir.join("interval"), &s)?,
        None => 0,
    };

    if respawn && sync {
        return Err(ConfigError::MutuallyExclusiveFlags {
            name: name.to_string(),
            reason: "'respawn' and 'sync' cannot both be set".to_string(),
        });
    }
    if respawn && interval > 0 {
        return Err(ConfigError::MutuallyExclusiveFlags {
            name: name.to_string(),
            reason: "'respawn' and 'interval' cannot both be set".to_string(),
        });
    }

    let min_running_time = match scalar_value(&service_dir.join("min_running_time"), service_dir)? {
        Some(s) => parse_uint(name, "min_running_time", &service_dir.join("min_running_time"), &s)?,
        None => SERVICE_DEFAULT_MIN_RUNNING_TIME,
    };
    let ready_timeout = match scalar_value(&service_dir.join("ready_timeout"), service_dir)? {
        Some(s) => parse_uint(name, "ready_timeout", &service_dir.join("ready_timeout"), &s)?,
        None => SERVICE_DEFAULT_READY_TIMEOUT,
    };

    let has_kill_hook = is_executable(&service_dir.join("kill")).unwrap_or(false);
    let has_is_ready_hook = is_executable(&service_dir.join("is_ready")).unwrap_or(false);
    let has_finish_hook = is_executable(&service_dir.join("finish")).unwrap_or(false);

    if matches!(kind, ServiceKind::Runnable) && run_path.is_none() {
        return Err(ConfigError::MissingRun {
            name: name.to_string(),
        });
    }

    Ok(ServiceDefinition {
        name: name.to_string(),
        kind,
        run_path,
        service_dir: service_dir.to_path_buf(),
        params,
        environment,
        uid,
        gid,
        sgid_list,
        umask,
        priority,
        working_directory,
        respawn,
        sync,
        ignore_failure,
        shutdown_on_terminate,
        min_running_time,
        ready_timeout,
        interval,
        has_kill_hook,
        has_is_ready_hook,
        has_finish_hook,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::OpenOptionsExt;

    fn write_file(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    fn write_exec(path: &Path, script: &str) {
        let mut opts = fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true).mode(0o755);
        use std::io::Write;
        let mut f = opts.open(path).unwrap();
        write!(f, "{script}").unwrap();
    }

    #[test]
    fn string_to_bool_accepts_known_words_only() {
        for truthy in ["1", "true", "TRUE", "yes", "on", "enable", "enabled"] {
            assert_eq!(string_to_bool(truthy), Some(true));
        }
        for falsy in ["0", "false", "FALSE", "no", "off", "disable", "disabled"] {
            assert_eq!(string_to_bool(falsy), Some(false));
        }
        assert_eq!(string_to_bool("nonsense"), None);
    }

    #[test]
    fn interval_keywords_resolve_to_seconds() {
        let path = Path::new("<test>");
        assert_eq!(parse_interval("x", path, "hourly").unwrap(), 3600);
        assert_eq!(parse_interval("x", path, "daily").unwrap(), 86400);
        assert_eq!(parse_interval("x", path, "42").unwrap(), 42);
    }

    #[test]
    fn env_key_validator_enforces_identifier_shape() {
        assert!(is_valid_env_key("FOO_BAR1"));
        assert!(is_valid_env_key("_x"));
        assert!(!is_valid_env_key("1FOO"));
        assert!(!is_valid_env_key("FOO-BAR"));
        assert!(!is_valid_env_key(""));
    }

    #[test]
    fn disabled_only_service_loads_as_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = tmp.path().join("quiet");
        fs::create_dir(&svc).unwrap();
        write_file(&svc.join("disabled"), "");
        let defaults = Defaults::default();
        let def = build_definition("quiet", &svc, &defaults).unwrap();
        assert_eq!(def.kind, ServiceKind::Disabled);
    }

    #[test]
    fn executable_value_file_is_resolved_from_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = tmp.path().join("svc");
        fs::create_dir(&svc).unwrap();
        write_exec(&svc.join("priority"), "#!/bin/sh\necho 7\n");
        let value = scalar_value(&svc.join("priority"), &svc).unwrap();
        assert_eq!(value.as_deref(), Some("7"));
    }

    #[test]
    fn scalar_value_strips_trailing_whitespace_and_crlf() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = tmp.path().join("svc");
        fs::create_dir(&svc).unwrap();
        write_file(&svc.join("uid"), "1000\r\nignored second line\r\n");
        let value = scalar_value(&svc.join("uid"), &svc).unwrap();
        assert_eq!(value.as_deref(), Some("1000"));
    }

    #[test]
    fn respawn_and_sync_are_mutually_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let svc = tmp.path().join("svc");
        fs::create_dir(&svc).unwrap();
        write_file(&svc.join("respawn"), "true");
        write_file(&svc.join("sync"), "true");
        let err = build_definition("svc", &svc, &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MutuallyExclusiveFlags { .. }));
    }

    #[test]
    fn load_tree_rejects_relative_root() {
        let err = load_tree(Path::new("relative/services"), &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::RootNotAbsolute { .. }));
    }

    #[test]
    fn load_tree_orders_dependency_before_dependent() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let a = root.join("a");
        let b = root.join("b");
        fs::create_dir(&a).unwrap();
        fs::create_dir(&b).unwrap();
        write_exec(&a.join("run"), "#!/bin/sh\necho hello\n");
        write_exec(&b.join("run"), "#!/bin/sh\nsleep 1\n");
        write_file(&b.join("a.dep"), "true");

        let (table, order) = load_tree(root, &Defaults::default()).unwrap();
        let a_idx = table.find_by_name("a").unwrap();
        let b_idx = table.find_by_name("b").unwrap();
        assert!(order.position(a_idx).unwrap() < order.position(b_idx).unwrap());
    }

    #[test]
    fn load_tree_orders_transitive_chain_across_three_services() {
        // a depends on b, b depends on c: start order must be c, b, a.
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let a = root.join("a");
        let b = root.join("b");
        let c = root.join("c");
        fs::create_dir(&a).unwrap();
        fs::create_dir(&b).unwrap();
        fs::create_dir(&c).unwrap();
        write_exec(&a.join("run"), "#!/bin/sh\necho hello\n");
        write_exec(&b.join("run"), "#!/bin/sh\nsleep 1\n");
        write_exec(&c.join("run"), "#!/bin/sh\nsleep 1\n");
        write_file(&a.join("b.dep"), "true");
        write_file(&b.join("c.dep"), "true");

        let (table, order) = load_tree(root, &Defaults::default()).unwrap();
        let a_idx = table.find_by_name("a").unwrap();
        let b_idx = table.find_by_name("b").unwrap();
        let c_idx = table.find_by_name("c").unwrap();
        assert!(order.position(c_idx).unwrap() < order.position(b_idx).unwrap());
        assert!(order.position(b_idx).unwrap() < order.position(a_idx).unwrap());
    }
}
