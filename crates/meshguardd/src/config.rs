//! Configuration for meshguardd.
//!
//! Loads settings from a TOML file (`MESHGUARD_CONFIG` env override, default
//! /etc/meshguard/config.toml) or falls back to built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Default config file path
pub const CONFIG_PATH: &str = "/etc/meshguard/config.toml";

/// Env var overriding the config file location
pub const CONFIG_ENV: &str = "MESHGUARD_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("duplicate service name '{0}'")]
    DuplicateService(String),
    #[error("service '{service}' declares unknown dependency '{dependency}'")]
    UnknownDependency { service: String, dependency: String },
}

/// One service collaborator in the mesh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Extra health-check attempts before the service is reported down.
    /// Zero means a single attempt, no retry.
    #[serde(default)]
    pub health_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_retry_backoff_ms() -> u64 {
    150
}

/// LLM collaborator configuration (OpenAI-style chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_api_key")]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_base_url() -> String {
    "http://127.0.0.1:1234/v1".to_string()
}

fn default_llm_api_key() -> String {
    "lm-studio".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5-7b-instruct".to_string()
}

fn default_llm_timeout() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: default_llm_api_key(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_commander_port")]
    pub commander_port: u16,
    #[serde(default = "default_injector_port")]
    pub injector_port: u16,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_detection_interval")]
    pub detection_interval_secs: u64,
    #[serde(default = "default_injection_interval")]
    pub failure_injection_interval_secs: u64,
    #[serde(default = "default_failure_probability")]
    pub failure_probability: f64,
    #[serde(default = "default_recovery_scan_interval")]
    pub recovery_scan_interval_secs: u64,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_commander_port() -> u16 {
    9080
}

fn default_injector_port() -> u16 {
    9081
}

fn default_health_check_interval() -> u64 {
    5
}

fn default_detection_interval() -> u64 {
    10
}

fn default_injection_interval() -> u64 {
    30
}

fn default_failure_probability() -> f64 {
    0.3
}

fn default_recovery_scan_interval() -> u64 {
    5
}

/// Default five-service topology. service_d is the leaf; service_e fans in
/// on two dependencies so dependency-failure incidents have something to
/// find. service_a gets retrying health checks like the original payment
/// path.
fn default_services() -> Vec<ServiceConfig> {
    let svc = |name: &str, port: u16, deps: &[&str], retries: u32| ServiceConfig {
        name: name.to_string(),
        base_url: format!("http://127.0.0.1:{port}"),
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        health_retries: retries,
        retry_backoff_ms: default_retry_backoff_ms(),
    };
    vec![
        svc("service_a", 8001, &["service_b"], 2),
        svc("service_b", 8002, &["service_c"], 0),
        svc("service_c", 8003, &["service_d"], 0),
        svc("service_d", 8004, &[], 0),
        svc("service_e", 8005, &["service_b", "service_c"], 0),
    ]
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            commander_port: default_commander_port(),
            injector_port: default_injector_port(),
            health_check_interval_secs: default_health_check_interval(),
            detection_interval_secs: default_detection_interval(),
            failure_injection_interval_secs: default_injection_interval(),
            failure_probability: default_failure_probability(),
            recovery_scan_interval_secs: default_recovery_scan_interval(),
            llm: LlmConfig::default(),
            services: default_services(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration, preferring the env-pointed file, then the system
    /// path, then built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(CONFIG_PATH));

        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!(
            "Loaded config from {} ({} services)",
            path.display(),
            config.services.len()
        );
        Ok(config)
    }

    /// Structural validation. Dependency cycles are caught separately when
    /// the graph is built; both are fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for svc in &self.services {
            if !seen.insert(svc.name.as_str()) {
                return Err(ConfigError::DuplicateService(svc.name.clone()));
            }
        }
        for svc in &self.services {
            for dep in &svc.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        service: svc.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Service names in configured (registry) order.
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.services.len(), 5);
        assert_eq!(config.commander_port, 9080);
        assert_eq!(config.failure_probability, 0.3);
        assert_eq!(config.service("service_a").unwrap().health_retries, 2);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut config = DaemonConfig::default();
        config.services[0].dependencies.push("ghost".to_string());
        match config.validate() {
            Err(ConfigError::UnknownDependency {
                service,
                dependency,
            }) => {
                assert_eq!(service, "service_a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected UnknownDependency, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_service_is_rejected() {
        let mut config = DaemonConfig::default();
        let dup = config.services[0].clone();
        config.services.push(dup);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateService(_))
        ));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let raw = r#"
            commander_port = 9999

            [[services]]
            name = "alpha"
            base_url = "http://127.0.0.1:7001"

            [[services]]
            name = "beta"
            base_url = "http://127.0.0.1:7002"
            dependencies = ["alpha"]
        "#;
        let config: DaemonConfig = toml::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.commander_port, 9999);
        assert_eq!(config.health_check_interval_secs, 5);
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[1].dependencies, vec!["alpha"]);
        assert_eq!(config.llm.timeout_secs, 30);
    }
}
