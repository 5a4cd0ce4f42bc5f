use std::path::{Path, PathBuf};

use super::types::ConductorConfig;
use crate::error::ConfigError;

/// Repository-local config file, relative to the repository root.
pub const REPO_CONFIG_PATH: &str = ".conductor/config.toml";

/// Fallback config file in the current directory.
pub const LOCAL_CONFIG_PATH: &str = "conductor.toml";

pub fn load_from_path(path: &Path) -> Result<ConductorConfig, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<ConductorConfig>(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Which file `load_default` would read, if any.
pub fn find_config_file(repo_root: &Path) -> Option<PathBuf> {
    // Priority 1: <repo>/.conductor/config.toml
    let repo_config = repo_root.join(REPO_CONFIG_PATH);
    if repo_config.is_file() {
        return Some(repo_config);
    }

    // Priority 2: ./conductor.toml
    let local_config = PathBuf::from(LOCAL_CONFIG_PATH);
    if local_config.is_file() {
        return Some(local_config);
    }

    None
}

pub fn load_default(repo_root: &Path) -> Result<ConductorConfig, ConfigError> {
    let mut cfg = match find_config_file(repo_root) {
        Some(path) => load_from_path(&path)?,
        None => ConductorConfig::default(),
    };

    // Environment variable overrides (Priority 0: highest)
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;

    cfg.validate()?;
    Ok(cfg)
}

/// Apply `CONDUCTOR_*` overrides. `lookup` returns the raw variable value.
pub fn apply_env_overrides<F>(cfg: &mut ConductorConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("CONDUCTOR_STATE_DIR") {
        cfg.state_dir = PathBuf::from(v);
    }
    if let Some(v) = get("CONDUCTOR_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = get("CONDUCTOR_MAX_PARALLEL") {
        cfg.executor.max_parallel = parse_number("CONDUCTOR_MAX_PARALLEL", &v)?;
    }
    if let Some(v) = get("CONDUCTOR_MAX_ATTEMPTS") {
        cfg.monitor.max_attempts = parse_number("CONDUCTOR_MAX_ATTEMPTS", &v)?;
    }
    if let Some(v) = get("CONDUCTOR_HEARTBEAT_TIMEOUT_MS") {
        cfg.monitor.heartbeat_timeout_ms = parse_number("CONDUCTOR_HEARTBEAT_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = get("CONDUCTOR_LOCK_TIMEOUT_MS") {
        cfg.lock.acquire_timeout_ms = parse_number("CONDUCTOR_LOCK_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = get("CONDUCTOR_LOCK_STALE_AFTER_MS") {
        cfg.lock.stale_after_ms = parse_number("CONDUCTOR_LOCK_STALE_AFTER_MS", &v)?;
    }
    if let Some(v) = get("CONDUCTOR_EVENTS_OUT") {
        cfg.events_out.enabled = true;
        cfg.events_out.path = v;
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{key}: '{value}' is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_repo_config_takes_priority() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".conductor")).unwrap();
        std::fs::write(
            dir.path().join(REPO_CONFIG_PATH),
            "[executor]\nmax_parallel = 7\n",
        )
        .unwrap();

        assert_eq!(
            find_config_file(dir.path()),
            Some(dir.path().join(REPO_CONFIG_PATH))
        );
        let cfg = load_from_path(&dir.path().join(REPO_CONFIG_PATH)).unwrap();
        assert_eq!(cfg.executor.max_parallel, 7);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[lock\nfile_name = 1").unwrap();
        match load_from_path(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CONDUCTOR_MAX_PARALLEL", "2"),
            ("CONDUCTOR_MAX_ATTEMPTS", "5"),
            ("CONDUCTOR_LOCK_STALE_AFTER_MS", "1000"),
            ("CONDUCTOR_LOG_LEVEL", "  "),
        ]
        .into_iter()
        .collect();

        let mut cfg = ConductorConfig::default();
        apply_env_overrides(&mut cfg, |k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.executor.max_parallel, 2);
        assert_eq!(cfg.monitor.max_attempts, 5);
        assert_eq!(cfg.lock.stale_after_ms, 1000);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut cfg = ConductorConfig::default();
        let err = apply_env_overrides(&mut cfg, |k| {
            (k == "CONDUCTOR_MAX_PARALLEL").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("CONDUCTOR_MAX_PARALLEL"));
    }
}
