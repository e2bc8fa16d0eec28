//! Collaborators the deployment flow talks to
//!
//! The orchestrator only depends on these traits:
//! - [`ClusterClient`] - image streams, builds, pods, routes, new-app/expose
//! - [`HttpProbe`] - "GET and return the status code" for route readiness
//! - [`CommandRunner`] - the `oc` binary, used by [`KubeCluster`] for new-app/expose
//!
//! Requests are flat records; turning them into cluster objects is the
//! implementation's business.

pub mod cli;
pub mod openshift;
pub mod probe;

#[cfg(test)]
pub mod mock;

pub use cli::{key_value_list, CommandRunner, OcBinary, NEW_APP_POD_LABEL};
pub use openshift::KubeCluster;
pub use probe::{HttpProbe, ReqwestProbe};

use async_trait::async_trait;
use reqwest::Url;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised by collaborators
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("failed to run `{command}`: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("malformed {kind} '{name}': {reason}")]
    Malformed {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    /// Whether retrying the same read later could succeed
    ///
    /// API statuses that signal "not there yet" or an overloaded server are
    /// transient, as are transport failures (connection refused, timeouts).
    /// Validation and authorization rejections, unparsable objects, client
    /// configuration problems and CLI failures are terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::KubeError(err) => is_transient_kube_error(err),
            ClusterError::NotFound { .. } => true,
            ClusterError::HttpError(err) => {
                err.is_connect() || err.is_timeout() || err.is_request()
            }
            ClusterError::CommandSpawn { .. }
            | ClusterError::CommandFailed { .. }
            | ClusterError::Malformed { .. }
            | ClusterError::Serialization(_) => false,
        }
    }
}

/// Transport-level kube errors are transient; decoding, auth and request
/// building errors will fail the same way on every retry
fn is_transient_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(status) => is_transient_status(status.code),
        kube::Error::HyperError(_) | kube::Error::Service(_) | kube::Error::ReadEvents(_) => true,
        _ => false,
    }
}

/// HTTP status codes from the API server that are worth polling through
pub fn is_transient_status(code: u16) -> bool {
    matches!(code, 404 | 409 | 429) || code >= 500
}

/// Import of an external image into an image stream tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageImport {
    /// Image stream name
    pub name: String,
    /// Tag inside the image stream
    pub tag: String,
    /// External image reference (registry/repo:tag)
    pub from_image: String,
    /// Allow importing from registries without valid TLS
    pub insecure: bool,
}

/// Reference to an image stream tag, optionally in another namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageStreamTagRef {
    pub namespace: Option<String>,
    pub name: String,
    pub tag: String,
}

impl ImageStreamTagRef {
    /// `name:tag` as used in build config references
    pub fn tagged_name(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

/// Where a build takes its input from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildSource {
    /// Clone a git repository, optionally building from a sub-directory
    Git {
        uri: String,
        context_dir: Option<String>,
    },
    /// Copy a path out of an existing image
    Image {
        from: ImageStreamTagRef,
        source_path: String,
        destination_dir: String,
    },
}

/// Memory and CPU quota applied as both request and limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuota {
    pub memory: String,
    pub cpu: String,
}

/// Source-strategy build config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfigSpec {
    pub name: String,
    pub source: BuildSource,
    /// Builder image the source strategy runs in
    pub builder: ImageStreamTagRef,
    /// Output image stream; the build pushes to its `latest` tag
    pub output_image_stream: String,
    pub env: BTreeMap<String, String>,
    pub resources: Option<ResourceQuota>,
}

/// Observed phase of a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPhase {
    New,
    Pending,
    Running,
    Complete,
    Failed,
    Error,
    Cancelled,
    Unknown(String),
}

impl BuildPhase {
    /// Parse the `status.phase` string of a build
    pub fn parse(phase: &str) -> Self {
        match phase {
            "New" => BuildPhase::New,
            "Pending" => BuildPhase::Pending,
            "Running" => BuildPhase::Running,
            "Complete" => BuildPhase::Complete,
            "Failed" => BuildPhase::Failed,
            "Error" => BuildPhase::Error,
            "Cancelled" => BuildPhase::Cancelled,
            other => BuildPhase::Unknown(other.to_string()),
        }
    }

    /// The build ended without producing an image
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BuildPhase::Failed | BuildPhase::Error | BuildPhase::Cancelled
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            BuildPhase::New => "New",
            BuildPhase::Pending => "Pending",
            BuildPhase::Running => "Running",
            BuildPhase::Complete => "Complete",
            BuildPhase::Failed => "Failed",
            BuildPhase::Error => "Error",
            BuildPhase::Cancelled => "Cancelled",
            BuildPhase::Unknown(phase) => phase,
        }
    }
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `new-app` instantiation from an image stream tag
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewAppRequest {
    /// `image-stream:tag` to instantiate
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// Label selector for pods: `key=value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSelector {
    pub label: String,
    pub value: String,
}

impl PodSelector {
    pub fn to_label_selector(&self) -> String {
        format!("{}={}", self.label, self.value)
    }
}

/// Cluster operations the deployment flow needs
///
/// Every method is scoped to a namespace. Implementations must report
/// "object does not exist yet" as an error for which
/// [`ClusterError::is_transient`] returns true, so waits can poll through it.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create an image stream with one tag importing an external image
    async fn import_image(&self, namespace: &str, import: &ImageImport)
        -> Result<(), ClusterError>;

    /// Create an empty image stream, used as a build output
    async fn create_image_stream(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Tags listed in the image stream status (i.e. imported and available)
    async fn image_stream_tags(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<String>, ClusterError>;

    async fn create_build_config(
        &self,
        namespace: &str,
        spec: &BuildConfigSpec,
    ) -> Result<(), ClusterError>;

    /// Start a build of the build config; returns the build name
    async fn start_build(&self, namespace: &str, build_config: &str)
        -> Result<String, ClusterError>;

    async fn build_phase(&self, namespace: &str, build: &str) -> Result<BuildPhase, ClusterError>;

    /// Instantiate an application (deployment, service) from an image
    async fn new_app(&self, namespace: &str, request: &NewAppRequest) -> Result<(), ClusterError>;

    /// Expose a service through a route named after it
    async fn expose_service(&self, namespace: &str, service: &str) -> Result<(), ClusterError>;

    /// Number of pods matching the selector that are in the Running phase
    async fn running_pods(
        &self,
        namespace: &str,
        selector: &PodSelector,
    ) -> Result<usize, ClusterError>;

    /// Externally reachable URL of a route
    async fn route_url(&self, namespace: &str, route: &str) -> Result<Url, ClusterError>;
}
