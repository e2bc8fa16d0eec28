//! `oc` command-line collaborator
//!
//! `new-app` and `expose` generate a whole set of objects (deployment,
//! service, route) from a single command, so they go through the CLI
//! instead of the API.

use super::{ClusterError, NewAppRequest};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs a command-line binary synchronously
///
/// Non-zero exit must be surfaced as [`ClusterError::CommandFailed`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run with the given arguments and return stdout
    async fn execute(&self, args: &[String]) -> Result<String, ClusterError>;
}

/// The `oc` binary, bound to one namespace per call through `--namespace`
pub struct OcBinary {
    binary: String,
}

impl OcBinary {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for OcBinary {
    fn default() -> Self {
        Self::new("oc")
    }
}

#[async_trait]
impl CommandRunner for OcBinary {
    async fn execute(&self, args: &[String]) -> Result<String, ClusterError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!(command = %command, "Running command");

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|source| ClusterError::CommandSpawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ClusterError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(command = %command, "Command succeeded");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Serialize parameters as `key1=value1,key2=value2`
///
/// Returns `None` for an empty map, so the caller can skip the flag entirely.
pub fn key_value_list(parameters: &BTreeMap<String, String>) -> Option<String> {
    if parameters.is_empty() {
        return None;
    }

    Some(
        parameters
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Label `oc new-app` puts on the pods of the `Deployment` it creates
///
/// Clusters predating 4.5 create a `DeploymentConfig` instead, labeled
/// `deploymentconfig=<name>`.
pub const NEW_APP_POD_LABEL: &str = "deployment";

/// Arguments for `oc new-app`
pub fn new_app_args(namespace: &str, request: &NewAppRequest) -> Vec<String> {
    let mut args = vec![
        "new-app".to_string(),
        request.image.clone(),
        format!("--namespace={}", namespace),
    ];

    if let Some(env) = key_value_list(&request.env) {
        args.push("-e".to_string());
        args.push(env);
    }
    if let Some(labels) = key_value_list(&request.labels) {
        args.push("-l".to_string());
        args.push(labels);
    }

    args
}

/// Arguments for `oc expose svc/<service>`
pub fn expose_args(namespace: &str, service: &str) -> Vec<String> {
    vec![
        "expose".to_string(),
        format!("svc/{}", service),
        format!("--namespace={}", namespace),
    ]
}
