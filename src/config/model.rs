use crate::core::ent::{self, ServiceTarget};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const CONFIG_DIR_ENV: &str = "PROPERTY_HEALTH_CONFIG_DIR";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failure reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failure parsing {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Profiles {
    pub active: String,
}

// application.yml
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct EnvConfig {
    pub profiles: Profiles,
}

// application-{profile}.yml
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Bootstrap {
    pub server: Server,
    #[serde(default)]
    pub alarm: Option<AlarmConfig>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

impl Bootstrap {
    /// Targets named after their keys, in key order.
    pub fn service_targets(&self) -> Vec<ServiceTarget> {
        self.targets
            .iter()
            .map(|(name, cfg)| cfg.to_target(name))
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Server {
    pub addr: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlarmConfig {
    pub from: String,
    pub to: String,
    pub smtp_username: String,
    pub smtp_password: String,
    pub domain: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default = "default_report_interval")]
    pub report_interval_seconds: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_report_interval() -> u64 {
    3600
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TargetConfig {
    pub endpoint: String,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default)]
    pub building: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
}

fn default_interval_seconds() -> u64 {
    ent::DEFAULT_INTERVAL_SECONDS
}

fn default_timeout_seconds() -> u64 {
    ent::DEFAULT_TIMEOUT_SECONDS
}

fn default_failure_threshold() -> usize {
    ent::DEFAULT_FAILURE_THRESHOLD
}

fn default_history_window() -> usize {
    ent::DEFAULT_HISTORY_WINDOW
}

impl TargetConfig {
    pub fn to_target(&self, name: &str) -> ServiceTarget {
        ServiceTarget {
            name: name.to_string(),
            endpoint: self.endpoint.clone(),
            interval_seconds: self.interval_seconds,
            timeout_seconds: self.timeout_seconds,
            failure_threshold: self.failure_threshold,
            history_window: self.history_window,
            building: self.building.clone(),
            service: self.service.clone(),
        }
    }
}

// 加载指定配置文件
fn load_config<T>(path: &Path) -> Result<T, ConfigLoadError>
where
    T: DeserializeOwned,
{
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_yaml::from_str::<T>(&raw).map_err(|source| ConfigLoadError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    info!("loaded config {}", path.display());
    Ok(config)
}

fn load_env_config(dir: &Path) -> Result<EnvConfig, ConfigLoadError> {
    load_config::<EnvConfig>(&dir.join("application.yml"))
}

fn load_bootstrap_config_from_env(dir: &Path, active: &str) -> Result<Bootstrap, ConfigLoadError> {
    load_config::<Bootstrap>(&dir.join(format!("application-{}.yml", active)))
}

/// Loads `application-{profile}.yml` for the profile named in
/// `application.yml`, both read from `dir`.
pub fn load_bootstrap_config(dir: &Path) -> Result<Bootstrap, ConfigLoadError> {
    let env_config = load_env_config(dir)?;
    load_bootstrap_config_from_env(dir, &env_config.profiles.active)
}

/// `$PROPERTY_HEALTH_CONFIG_DIR`, or the working directory.
pub fn config_dir() -> PathBuf {
    std::env::var_os(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod test {
    use crate::config::model::*;
    use std::fs;

    const DEV: &str = r#"
server:
  addr: 127.0.0.1:3000
alarm:
  from: Monitor <monitor@domain.tld>
  to: Caretaker <caretaker@domain.tld>
  smtp_username: user
  smtp_password: secret
  domain: smtp.domain.tld
targets:
  nyland-lift:
    endpoint: http://lift.nyland.local/health
    interval_seconds: 10
    failure_threshold: 2
    building: Nyland
    service: Lift
  malmo-heating:
    endpoint: http://heating.malmo.local/health
"#;

    fn write_profile(dir: &Path, active: &str, body: &str) {
        fs::write(
            dir.join("application.yml"),
            format!("profiles:\n  active: {}\n", active),
        )
        .unwrap();
        fs::write(dir.join(format!("application-{}.yml", active)), body).unwrap();
    }

    #[test]
    pub fn load_config_test() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "dev", DEV);
        let config = load_bootstrap_config(dir.path()).unwrap();

        assert_eq!(config.server.addr, "127.0.0.1:3000");
        let alarm = config.alarm.as_ref().unwrap();
        assert_eq!(alarm.port, 587);
        assert_eq!(alarm.report_interval_seconds, 3600);

        let targets = config.service_targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "malmo-heating");
        assert_eq!(targets[0].interval_seconds, 30);
        assert_eq!(targets[0].history_window, 50);
        assert_eq!(targets[1].name, "nyland-lift");
        assert_eq!(targets[1].failure_threshold, 2);
        assert_eq!(targets[1].building.as_deref(), Some("Nyland"));
    }

    #[test]
    fn alarm_and_targets_are_optional() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "test", "server:\n  addr: 0.0.0.0:8080\n");
        let config = load_bootstrap_config(dir.path()).unwrap();
        assert!(config.alarm.is_none());
        assert!(config.targets.is_empty());
    }

    #[test]
    fn missing_profile_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("application.yml"), "profiles:\n  active: prod\n").unwrap();
        let err = load_bootstrap_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Io { .. }));
        assert!(err.to_string().contains("application-prod.yml"));
    }

    #[test]
    fn malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        write_profile(dir.path(), "dev", "server: [unclosed\n");
        assert!(matches!(
            load_bootstrap_config(dir.path()),
            Err(ConfigLoadError::Yaml { .. })
        ));
    }
}
