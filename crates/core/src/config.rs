use std::{fs, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

/// Environment variable naming the config file to load.
pub const CONFIG_ENV: &str = "TRELLIS_CONFIG";

#[derive(Error, Debug)]
pub enum TrellisConfigError {
    #[error("File system error: {0}")]
    IO(#[from] std::io::Error),
    #[error("YAML parsing error: {0}")]
    YAMLError(#[from] serde_yaml::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Settings for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Bound on each pipe when its fixture declares none. `None` waits forever.
    pub default_timeout_ms: Option<u64>,
    /// How long to wait for a timed out or cancelled pipe to stop.
    pub cancel_grace_ms: u64,
    /// Refuse to run a suite set with a dependency cycle.
    pub fail_on_cycle: bool,
    /// Culture in effect while the run executes. `None` keeps the process one.
    pub culture: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: None,
            cancel_grace_ms: 250,
            fail_on_cycle: false,
            culture: None,
        }
    }
}

impl RunConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

/// The file as written; every key is optional.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    default_timeout_ms: Option<u64>,
    cancel_grace_ms: Option<u64>,
    fail_on_cycle: Option<bool>,
    culture: Option<String>,
}

impl RawConfig {
    #[instrument]
    fn to_config(&self) -> Result<RunConfig, TrellisConfigError> {
        let defaults = RunConfig::default();
        if self.default_timeout_ms == Some(0) {
            return Err(TrellisConfigError::Config(
                "default_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let Some(culture) = &self.culture
            && culture.trim().is_empty()
        {
            return Err(TrellisConfigError::Config(
                "culture must not be empty".to_string(),
            ));
        }
        Ok(RunConfig {
            default_timeout_ms: self.default_timeout_ms,
            cancel_grace_ms: self.cancel_grace_ms.unwrap_or(defaults.cancel_grace_ms),
            fail_on_cycle: self.fail_on_cycle.unwrap_or(defaults.fail_on_cycle),
            culture: self.culture.clone(),
        })
    }
}

/// `$XDG_CONFIG_HOME/trellis`, else `trellis` under the platform config
/// directory.
pub fn config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .unwrap_or_default()
        .join("trellis")
}

/// Where the config is read from when no path is given.
pub fn default_config_path() -> PathBuf {
    match std::env::var(CONFIG_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_dir().join("trellis.yml"),
    }
}

/// Loads the run configuration.
///
/// An explicit `config_path` must exist. Without one, `TRELLIS_CONFIG` or the
/// file in the config directory is read, and a missing file means defaults.
#[instrument(skip(config_path))]
pub fn load_config(config_path: Option<PathBuf>) -> Result<RunConfig, TrellisConfigError> {
    let explicit = config_path.is_some();
    let actual_path = config_path.unwrap_or_else(default_config_path);

    if !explicit && !actual_path.exists() {
        debug!(path = %actual_path.display(), "No config file, using defaults");
        return Ok(RunConfig::default());
    }

    let content = fs::read_to_string(&actual_path)?;
    let raw: RawConfig = if content.trim().is_empty() {
        RawConfig::default()
    } else {
        serde_yaml::from_str(&content)?
    };
    raw.to_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoped::EnvGuard;
    use crate::scoped::tests::GLOBAL_STATE;
    use crate::test_utils::create_temp_config;
    use tempfile::tempdir;

    const FULL_CONFIG_CONTENT: &str = r#"
default_timeout_ms: 5000
cancel_grace_ms: 100
fail_on_cycle: true
culture: de-DE
"#;

    #[test]
    fn test_run_config_default() {
        let config = RunConfig::default();
        assert_eq!(config.default_timeout(), None);
        assert_eq!(config.cancel_grace(), Duration::from_millis(250));
        assert!(!config.fail_on_cycle);
    }

    #[test]
    fn test_load_config_reads_every_key() {
        let config_file = create_temp_config(FULL_CONFIG_CONTENT);
        let config = load_config(Some(config_file)).unwrap();

        assert_eq!(config.default_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.cancel_grace_ms, 100);
        assert!(config.fail_on_cycle);
        assert_eq!(config.culture.as_deref(), Some("de-DE"));
    }

    #[test]
    fn test_load_config_fills_missing_keys_with_defaults() {
        let config_file = create_temp_config("default_timeout_ms: 20\n");
        let config = load_config(Some(config_file)).unwrap();
        assert_eq!(
            config,
            RunConfig {
                default_timeout_ms: Some(20),
                ..Default::default()
            }
        );

        let empty = create_temp_config("");
        assert_eq!(load_config(Some(empty)).unwrap(), RunConfig::default());
    }

    #[test]
    fn test_load_config_throws_for_invalid_yaml() {
        let config_file = create_temp_config("invalid yaml content: - [");
        let err = load_config(Some(config_file)).unwrap_err();
        assert!(matches!(err, TrellisConfigError::YAMLError(_)));
    }

    #[test]
    fn test_load_config_rejects_unknown_keys() {
        let config_file = create_temp_config("cancel_grace: 10\n");
        let err = load_config(Some(config_file)).unwrap_err();
        assert!(matches!(err, TrellisConfigError::YAMLError(_)));
    }

    #[test]
    fn test_load_config_rejects_zero_timeout() {
        let config_file = create_temp_config("default_timeout_ms: 0\n");
        let err = load_config(Some(config_file)).unwrap_err();
        assert!(matches!(err, TrellisConfigError::Config(msg) if msg.contains("default_timeout_ms")));
    }

    #[test]
    fn test_load_config_missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = load_config(Some(dir.path().join("missing.yml"))).unwrap_err();
        assert!(matches!(err, TrellisConfigError::IO(_)));
    }

    #[test]
    fn test_config_dir_follows_xdg() {
        let _lock = GLOBAL_STATE.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().unwrap();
        let _xdg = EnvGuard::enter("XDG_CONFIG_HOME", dir.path().to_str());
        assert_eq!(config_dir(), dir.path().join("trellis"));

        let _unset = EnvGuard::enter("XDG_CONFIG_HOME", None);
        let platform = dirs::config_dir().unwrap_or_default().join("trellis");
        assert_eq!(config_dir(), platform);
    }

    #[test]
    fn test_load_config_missing_default_file_uses_defaults() {
        let _lock = GLOBAL_STATE.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempdir().unwrap();
        let _config = EnvGuard::enter(CONFIG_ENV, None);
        let _xdg = EnvGuard::enter("XDG_CONFIG_HOME", dir.path().to_str());

        let config = load_config(None).unwrap();
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_load_config_from_env_var() {
        let _lock = GLOBAL_STATE.lock().unwrap_or_else(|e| e.into_inner());
        let config_file = create_temp_config("fail_on_cycle: true\n");
        let _config = EnvGuard::enter(CONFIG_ENV, config_file.to_str());

        let config = load_config(None).unwrap();
        assert!(config.fail_on_cycle);
    }
}
