//! Supervisor configuration.
//!
//! Loaded from an optional YAML file, then overridden by environment
//! variables. Every field has a default so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file names looked up in the working directory.
pub const CONFIG_FILE_CANDIDATES: &[&str] = &["sleuth.yml", "sleuth.yaml"];

const DEFAULT_NOTIFY_MESSAGE: &str = "🎉 *Deployment Successful!* 🎉\n\n\
    The deployment was successful and your memory usage has decreased back to normal levels.";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl From<ConfigError> for sleuth_proto::Error {
    fn from(err: ConfigError) -> Self {
        sleuth_proto::Error::Config(err.to_string())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub backend: BackendConfig,
    pub notify: NotifyConfig,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub engine: EngineConfig,
}

/// Generation backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Invoke the external CLI instead of the simulator.
    pub use_real_llm: bool,
    /// CLI executable. `q` is invoked as `q chat <prompt>`.
    pub cli: String,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            use_real_llm: false,
            cli: "q".to_string(),
            timeout_secs: 300,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Webhook notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Notifications are disabled when unset.
    pub webhook_url: Option<String>,
    pub message: String,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            message: DEFAULT_NOTIFY_MESSAGE.to_string(),
            timeout_secs: 10,
        }
    }
}

/// Durable store location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub region: String,
    pub table: String,
    /// JSON table file. An in-memory table is used when unset.
    pub path: Option<PathBuf>,
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            table: "appsignals-async-jobs".to_string(),
            path: None,
            page_size: 100,
        }
    }
}

/// Periodic task timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub master_interval_secs: u64,
    pub deploy_interval_secs: u64,
    pub startup_wait_ms: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            master_interval_secs: 60,
            deploy_interval_secs: 10,
            startup_wait_ms: 500,
            shutdown_timeout_secs: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn master_interval(&self) -> Duration {
        Duration::from_secs(self.master_interval_secs)
    }

    pub fn deploy_interval(&self) -> Duration {
        Duration::from_secs(self.deploy_interval_secs)
    }

    pub fn startup_wait(&self) -> Duration {
        Duration::from_millis(self.startup_wait_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Investigation engine limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// A job still open after this many iterations is closed.
    pub max_iterations: u32,
    /// Case-insensitive terms that mark a job log as deployment-related.
    pub deployment_terms: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            deployment_terms: vec!["deployment".into(), "deploy".into(), "alarm".into()],
        }
    }
}

impl SupervisorConfig {
    /// Parses a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Loads `explicit` if given, else the first config candidate in `root`,
    /// else defaults. Environment overrides and validation are applied last.
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => CONFIG_FILE_CANDIDATES
                .iter()
                .map(|name| root.join(name))
                .find(|path| path.exists())
                .map(|path| Self::from_file(&path))
                .transpose()?
                .unwrap_or_default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("USE_REAL_LLM") {
            self.backend.use_real_llm = v.trim().eq_ignore_ascii_case("true");
        }
        if let Some(v) = lookup("LLM_CLI").filter(|v| !v.trim().is_empty()) {
            self.backend.cli = v.trim().to_string();
        }
        if let Some(v) = lookup("LLM_TIMEOUT_SECS") {
            self.backend.timeout_secs = parse_number("LLM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("SLACK_WEBHOOK_URL") {
            self.notify.webhook_url = Some(v).filter(|v| !v.trim().is_empty());
        }
        if let Some(v) = lookup("AWS_REGION").filter(|v| !v.trim().is_empty()) {
            self.store.region = v;
        }
        if let Some(v) = lookup("SLEUTH_TABLE").filter(|v| !v.trim().is_empty()) {
            self.store.table = v;
        }
        if let Some(v) = lookup("SLEUTH_STORE_PATH").filter(|v| !v.trim().is_empty()) {
            self.store.path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SLEUTH_MASTER_INTERVAL_SECS") {
            self.scheduler.master_interval_secs = parse_number("SLEUTH_MASTER_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("SLEUTH_DEPLOY_INTERVAL_SECS") {
            self.scheduler.deploy_interval_secs = parse_number("SLEUTH_DEPLOY_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("SLEUTH_MAX_ITERATIONS") {
            self.engine.max_iterations = parse_number("SLEUTH_MAX_ITERATIONS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("scheduler.master_interval_secs", self.scheduler.master_interval_secs),
            ("scheduler.deploy_interval_secs", self.scheduler.deploy_interval_secs),
            ("engine.max_iterations", u64::from(self.engine.max_iterations)),
            ("store.page_size", self.store.page_size as u64),
            ("backend.timeout_secs", self.backend.timeout_secs),
            ("notify.timeout_secs", self.notify.timeout_secs),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.backend.use_real_llm && self.backend.cli.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "backend.cli".to_string(),
                reason: "required when use_real_llm is set".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("'{raw}' is not a number"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_baseline() {
        let config = SupervisorConfig::default();
        assert_eq!(config.scheduler.master_interval(), Duration::from_secs(60));
        assert_eq!(config.scheduler.deploy_interval(), Duration::from_secs(10));
        assert!(!config.backend.use_real_llm);
        assert_eq!(config.backend.cli, "q");
        assert_eq!(config.store.table, "appsignals-async-jobs");
        assert_eq!(config.engine.deployment_terms, vec!["deployment", "deploy", "alarm"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
backend:
  use_real_llm: true
  cli: claude
scheduler:
  deploy_interval_secs: 3
"#;
        let config = SupervisorConfig::parse_yaml(yaml).unwrap();
        assert!(config.backend.use_real_llm);
        assert_eq!(config.backend.cli, "claude");
        assert_eq!(config.scheduler.deploy_interval_secs, 3);
        assert_eq!(config.scheduler.master_interval_secs, 60);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(
            SupervisorConfig::parse_yaml("  \n").unwrap(),
            SupervisorConfig::default()
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("USE_REAL_LLM", "TRUE"),
            ("LLM_CLI", "gemini"),
            ("SLACK_WEBHOOK_URL", "https://hooks.example.com/x"),
            ("SLEUTH_MASTER_INTERVAL_SECS", "30"),
            ("SLEUTH_STORE_PATH", "/tmp/jobs.json"),
        ]
        .into_iter()
        .collect();

        let mut config = SupervisorConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();

        assert!(config.backend.use_real_llm);
        assert_eq!(config.backend.cli, "gemini");
        assert_eq!(config.notify.webhook_url.as_deref(), Some("https://hooks.example.com/x"));
        assert_eq!(config.scheduler.master_interval_secs, 30);
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/jobs.json")));
    }

    #[test]
    fn test_blank_webhook_disables_notifications() {
        let mut config = SupervisorConfig::default();
        config.notify.webhook_url = Some("https://x".into());
        config
            .apply_env(|k| (k == "SLACK_WEBHOOK_URL").then(|| "  ".to_string()))
            .unwrap();
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn test_env_rejects_non_numeric_interval() {
        let mut config = SupervisorConfig::default();
        let err = config
            .apply_env(|k| (k == "SLEUTH_DEPLOY_INTERVAL_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "SLEUTH_DEPLOY_INTERVAL_SECS"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = SupervisorConfig::default();
        config.scheduler.master_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_notify_timeout() {
        let mut config = SupervisorConfig::default();
        config.notify.timeout_secs = 0;
        match config.validate() {
            Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "notify.timeout_secs"),
            other => panic!("expected invalid notify timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_from_file_reads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sleuth.yml"), "engine:\n  max_iterations: 4\n").unwrap();

        let mut config = SupervisorConfig::from_file(&dir.path().join("sleuth.yml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.engine.max_iterations, 4);

        config.engine.max_iterations = 0;
        assert!(config.validate().is_err());
    }
}
