use super::error::DeployError;
use reqwest::Url;
use serde::Deserialize;
use std::collections::BTreeMap;

/// What to deploy and where
///
/// Can be written by hand or loaded from TOML:
///
/// ```toml
/// namespace = "my-test-project"
/// application = "orders"
/// source_url = "https://github.com/example/orders.git"
/// context_dir = "service"
/// builder_image = "quay.io/example/s2i-builder:latest"
/// runtime_image = "quay.io/example/runtime-jvm:latest"
///
/// [env]
/// JAVA_OPTIONS = "-Xmx512m"
///
/// [labels]
/// team = "qe"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeploymentRequest {
    /// Target namespace (OpenShift project); must already exist
    pub namespace: String,
    /// Application name, prefix of every object created
    pub application: String,
    /// Git repository with the application sources
    pub source_url: String,
    /// Sub-directory of the repository to build from
    #[serde(default)]
    pub context_dir: Option<String>,
    /// External image with the build toolchain
    pub builder_image: String,
    /// External base image the build artifacts are layered onto
    pub runtime_image: String,
    /// Environment of the running application
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Labels applied to the created service
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl DeploymentRequest {
    pub fn new(
        namespace: impl Into<String>,
        application: impl Into<String>,
        source_url: impl Into<String>,
        builder_image: impl Into<String>,
        runtime_image: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            application: application.into(),
            source_url: source_url.into(),
            builder_image: builder_image.into(),
            runtime_image: runtime_image.into(),
            ..Default::default()
        }
    }

    /// Presence checks only; names are validated by the cluster
    pub fn validate(&self) -> Result<(), DeployError> {
        let required = [
            ("namespace", &self.namespace),
            ("application", &self.application),
            ("source_url", &self.source_url),
            ("builder_image", &self.builder_image),
            ("runtime_image", &self.runtime_image),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(DeployError::InvalidRequest(format!("{} is empty", field)));
            }
        }
        Ok(())
    }

    pub fn names(&self) -> ResourceNames {
        ResourceNames::for_application(&self.application)
    }
}

/// Names of every object a deployment creates, derived from the application name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    /// Image stream importing the builder image
    pub builder_image_stream: String,
    /// Build config compiling the sources
    pub source_build_config: String,
    /// Image stream receiving the source build output
    pub source_output: String,
    /// Image stream importing the runtime base image
    pub runtime_image_stream: String,
    /// Build config layering the artifacts onto the runtime image
    pub runtime_build_config: String,
    /// Image stream receiving the runtime build output
    pub runtime_output: String,
}

impl ResourceNames {
    pub fn for_application(application: &str) -> Self {
        Self {
            builder_image_stream: format!("{}-builder-s2i-image", application),
            source_build_config: format!("{}-s2i-build", application),
            source_output: format!("{}-s2i", application),
            runtime_image_stream: format!("{}-builder-image", application),
            runtime_build_config: format!("{}-runtime-build", application),
            runtime_output: application.to_string(),
        }
    }

    /// Name of the deployment, service and route `new-app` creates
    pub fn workload(&self) -> String {
        workload_name(&self.runtime_output)
    }
}

/// Workload name `new-app` derives from the image stream it instantiates
///
/// `new-app <stream>:<tag>` names the deployment, service and (after
/// `expose`) route after the image stream, without the tag.
pub fn workload_name(image_stream: &str) -> String {
    image_stream.to_string()
}

/// A deployed application reachable over HTTP
#[derive(Debug, Clone, PartialEq)]
pub struct HttpDeployment {
    namespace: String,
    name: String,
    route_url: Url,
}

impl HttpDeployment {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, route_url: Url) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            route_url,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Workload (deployment/service/route) name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// External URL of the route
    pub fn route_url(&self) -> &Url {
        &self.route_url
    }
}
