//! Deployer configuration
//!
//! Every timeout and quota the deployment flow uses lives here as a named
//! default. Values can be overridden from a TOML file and, for the handful of
//! settings that differ per environment, from environment variables:
//! - `S2I_DEPLOY_CONFIG`: path of a TOML file to load instead of the defaults
//! - `MAVEN_MIRROR_URL`: mirror injected into the source build
//! - `S2I_DEPLOY_OC_BINARY`: path of the `oc` binary

use crate::cluster::NEW_APP_POD_LABEL;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Shortest pause between two probe evaluations
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wait budgets, in seconds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub image_import_secs: u64,
    pub source_build_secs: u64,
    pub runtime_build_secs: u64,
    pub pods_running_secs: u64,
    pub route_ready_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            image_import_secs: 5 * 60,
            source_build_secs: 20 * 60,
            runtime_build_secs: 5 * 60,
            pods_running_secs: 60,
            route_ready_secs: 30,
            poll_interval_secs: 2,
        }
    }
}

impl TimeoutConfig {
    pub fn image_import(&self) -> Duration {
        Duration::from_secs(self.image_import_secs)
    }

    pub fn source_build(&self) -> Duration {
        Duration::from_secs(self.source_build_secs)
    }

    pub fn runtime_build(&self) -> Duration {
        Duration::from_secs(self.runtime_build_secs)
    }

    pub fn pods_running(&self) -> Duration {
        Duration::from_secs(self.pods_running_secs)
    }

    pub fn route_ready(&self) -> Duration {
        Duration::from_secs(self.route_ready_secs)
    }

    /// Never below [`MIN_POLL_INTERVAL`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs).max(MIN_POLL_INTERVAL)
    }
}

/// Build pipeline settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Memory request and limit of the source build
    pub memory: String,
    /// CPU request and limit of the source build
    pub cpu: String,
    /// Tag the external builder and runtime images are imported under
    pub base_image_tag: String,
    /// Path copied out of the source build output image
    pub artifact_source_path: String,
    /// Directory the artifacts land in inside the runtime image
    pub artifact_destination: String,
    /// Import external images from registries without valid TLS
    pub insecure_import: bool,
    /// Maven mirror passed to the source build as `MAVEN_MIRROR_URL`
    pub maven_mirror_url: Option<String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            memory: "6Gi".to_string(),
            cpu: "2".to_string(),
            base_image_tag: "1.0".to_string(),
            artifact_source_path: ".".to_string(),
            artifact_destination: "/home/kogito/bin".to_string(),
            insecure_import: true,
            maven_mirror_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeployerConfig {
    pub timeouts: TimeoutConfig,
    pub build: BuildSettings,
    /// Number of running pods the instantiation stage waits for
    pub replicas: usize,
    /// Label `new-app` puts on pods, matched against the workload name
    pub pod_selector_label: String,
    pub oc_binary: String,
    pub http_probe_timeout_secs: u64,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            build: BuildSettings::default(),
            replicas: 1,
            pod_selector_label: NEW_APP_POD_LABEL.to_string(),
            oc_binary: "oc".to_string(),
            http_probe_timeout_secs: 10,
        }
    }
}

impl DeployerConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would turn the gates into busy loops or never pass
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeouts.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.replicas == 0 {
            return Err(ConfigError::Invalid("replicas must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Defaults (or the file named by `S2I_DEPLOY_CONFIG`) plus env overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let mut config = match lookup("S2I_DEPLOY_CONFIG") {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env_overrides(lookup);
        Ok(config)
    }

    /// Apply `MAVEN_MIRROR_URL` and `S2I_DEPLOY_OC_BINARY` from `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mirror) = lookup("MAVEN_MIRROR_URL") {
            self.build.maven_mirror_url = Some(mirror);
        }
        if let Some(binary) = lookup("S2I_DEPLOY_OC_BINARY") {
            self.oc_binary = binary;
        }
    }

    pub fn http_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.http_probe_timeout_secs)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
