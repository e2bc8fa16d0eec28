use crate::cluster::{BuildPhase, ClusterError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Deployment stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    BuilderImageStream,
    OutputImageStream,
    SourceBuild,
    RuntimeImageStream,
    RuntimeOutputImageStream,
    RuntimeBuild,
    Instantiation,
    Exposure,
    Readiness,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BuilderImageStream => "builder-image-stream",
            Stage::OutputImageStream => "output-image-stream",
            Stage::SourceBuild => "source-build",
            Stage::RuntimeImageStream => "runtime-image-stream",
            Stage::RuntimeOutputImageStream => "runtime-output-image-stream",
            Stage::RuntimeBuild => "runtime-build",
            Stage::Instantiation => "instantiation",
            Stage::Exposure => "exposure",
            Stage::Readiness => "readiness",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a deployment attempt stopped
///
/// Everything except `InvalidRequest` is labeled with the stage that failed.
/// Objects created by earlier stages are left in the cluster.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("[{stage}] timed out after {timeout:?} {reason}")]
    Timeout {
        stage: Stage,
        reason: String,
        timeout: Duration,
    },

    #[error("[{stage}] request rejected: {source}")]
    SubmissionFailure {
        stage: Stage,
        #[source]
        source: ClusterError,
    },

    #[error("[{stage}] build {build} of {build_config} ended in phase {phase}")]
    BuildFailed {
        stage: Stage,
        build_config: String,
        build: String,
        phase: BuildPhase,
    },

    #[error("[{stage}] cancelled while {reason}")]
    Cancelled { stage: Stage, reason: String },

    #[error("invalid deployment request: {0}")]
    InvalidRequest(String),
}

impl DeployError {
    /// Stage the deployment stopped in, if it got past validation
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DeployError::Timeout { stage, .. }
            | DeployError::SubmissionFailure { stage, .. }
            | DeployError::BuildFailed { stage, .. }
            | DeployError::Cancelled { stage, .. } => Some(*stage),
            DeployError::InvalidRequest(_) => None,
        }
    }
}
