//! Deployment orchestrator
//!
//! Runs the stages of a source-to-image deployment strictly in order:
//!
//! 1. import the builder image, wait until its tag is available
//! 2. create the empty output image stream
//! 3. build the sources, wait for the build to complete
//! 4. import the runtime base image, wait until its tag is available
//! 5. layer the build output onto it, wait for the build to complete
//! 6. `new-app` the result, wait for the expected number of running pods
//! 7. expose the service as a route
//! 8. wait until the route stops answering 503
//!
//! Stages 1-3 and 4-5 are the same "build from external base image" pipeline
//! with different inputs. Each gate goes through [`wait_until`]; submissions
//! are never retried.

pub mod error;
pub mod request;

pub use error::{DeployError, Stage};
pub use request::{workload_name, DeploymentRequest, HttpDeployment, ResourceNames};

use crate::cluster::{
    BuildConfigSpec, BuildPhase, BuildSource, ClusterClient, ClusterError, HttpProbe, ImageImport,
    ImageStreamTagRef, KubeCluster, NewAppRequest, OcBinary, PodSelector, ReqwestProbe,
    ResourceQuota,
};
use crate::config::DeployerConfig;
use crate::wait::{wait_until, ProbeError, WaitCondition, WaitError};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Status code a route answers with while the router has no ready endpoint
const ROUTE_UNAVAILABLE: u16 = 503;

/// Stage labels for one image pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStages {
    pub base_image: Stage,
    pub output_image: Stage,
    pub build: Stage,
}

impl PipelineStages {
    pub const SOURCE: PipelineStages = PipelineStages {
        base_image: Stage::BuilderImageStream,
        output_image: Stage::OutputImageStream,
        build: Stage::SourceBuild,
    };

    pub const RUNTIME: PipelineStages = PipelineStages {
        base_image: Stage::RuntimeImageStream,
        output_image: Stage::RuntimeOutputImageStream,
        build: Stage::RuntimeBuild,
    };
}

/// "Build from external base image": import the base, build on top of it
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePipeline {
    pub stages: PipelineStages,
    /// External image imported as the build's base
    pub base: ImageImport,
    /// Build config; its builder must reference `base`
    pub build: BuildConfigSpec,
    pub build_timeout: Duration,
}

/// Runs deployments against one cluster
///
/// Holds no per-deployment state: share it through `Arc` to run several
/// deployments (with distinct names or namespaces) concurrently.
pub struct Deployer {
    cluster: Arc<dyn ClusterClient>,
    http: Arc<dyn HttpProbe>,
    config: DeployerConfig,
}

impl Deployer {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        http: Arc<dyn HttpProbe>,
        config: DeployerConfig,
    ) -> Self {
        Self {
            cluster,
            http,
            config,
        }
    }

    /// Deployer for the cluster of the current kubeconfig context
    pub async fn connect(config: DeployerConfig) -> Result<Self, ClusterError> {
        let client = kube::Client::try_default().await?;
        let cli = Arc::new(OcBinary::new(config.oc_binary.clone()));
        let cluster = Arc::new(KubeCluster::new(client, cli));
        let http = Arc::new(ReqwestProbe::new(config.http_probe_timeout())?);
        Ok(Self::new(cluster, http, config))
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    /// Build, instantiate and expose the application, then wait for its route
    ///
    /// Returns the handle once the route answers with anything but 503.
    /// Cancelling `cancel` stops the in-flight wait with
    /// [`DeployError::Cancelled`].
    pub async fn deploy(
        &self,
        request: &DeploymentRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpDeployment, DeployError> {
        request.validate()?;

        info!(
            namespace = %request.namespace,
            application = %request.application,
            source = %request.source_url,
            "Starting deployment"
        );

        match self.run(request, cancel).await {
            Ok(deployment) => {
                info!(
                    namespace = %request.namespace,
                    application = %request.application,
                    url = %deployment.route_url(),
                    "Deployment ready"
                );
                Ok(deployment)
            }
            Err(e) => {
                warn!(
                    namespace = %request.namespace,
                    application = %request.application,
                    stage = ?e.stage(),
                    error = %e,
                    "Deployment failed"
                );
                Err(e)
            }
        }
    }

    /// [`Deployer::deploy`] without external cancellation
    pub async fn deploy_and_wait(
        &self,
        request: &DeploymentRequest,
    ) -> Result<HttpDeployment, DeployError> {
        self.deploy(request, &CancellationToken::new()).await
    }

    async fn run(
        &self,
        request: &DeploymentRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpDeployment, DeployError> {
        let namespace = request.namespace.as_str();
        let names = request.names();

        let source_output = self
            .build_from_base_image(namespace, &self.source_pipeline(request, &names), cancel)
            .await?;
        let runtime_output = self
            .build_from_base_image(
                namespace,
                &self.runtime_pipeline(request, &names, &source_output),
                cancel,
            )
            .await?;

        let workload = workload_name(&runtime_output);
        self.instantiate(namespace, request, &runtime_output, &workload, cancel)
            .await?;
        self.expose(namespace, &workload, cancel).await?;
        let route_url = self.wait_for_route(namespace, &workload, cancel).await?;

        Ok(HttpDeployment::new(namespace, workload, route_url))
    }

    /// Pipeline compiling the sources with the builder image
    pub fn source_pipeline(
        &self,
        request: &DeploymentRequest,
        names: &ResourceNames,
    ) -> ImagePipeline {
        let settings = &self.config.build;

        let mut env = BTreeMap::new();
        if let Some(mirror) = &settings.maven_mirror_url {
            env.insert("MAVEN_MIRROR_URL".to_string(), mirror.clone());
        }

        ImagePipeline {
            stages: PipelineStages::SOURCE,
            base: self.base_import(&names.builder_image_stream, &request.builder_image),
            build: BuildConfigSpec {
                name: names.source_build_config.clone(),
                source: BuildSource::Git {
                    uri: request.source_url.clone(),
                    context_dir: request.context_dir.clone().filter(|dir| !dir.is_empty()),
                },
                builder: self.base_ref(&request.namespace, &names.builder_image_stream),
                output_image_stream: names.source_output.clone(),
                env,
                resources: Some(ResourceQuota {
                    memory: settings.memory.clone(),
                    cpu: settings.cpu.clone(),
                }),
            },
            build_timeout: self.config.timeouts.source_build(),
        }
    }

    /// Pipeline copying the source build output onto the runtime base image
    pub fn runtime_pipeline(
        &self,
        request: &DeploymentRequest,
        names: &ResourceNames,
        source_output: &str,
    ) -> ImagePipeline {
        let settings = &self.config.build;

        ImagePipeline {
            stages: PipelineStages::RUNTIME,
            base: self.base_import(&names.runtime_image_stream, &request.runtime_image),
            build: BuildConfigSpec {
                name: names.runtime_build_config.clone(),
                source: BuildSource::Image {
                    from: ImageStreamTagRef {
                        namespace: Some(request.namespace.clone()),
                        name: source_output.to_string(),
                        tag: "latest".to_string(),
                    },
                    source_path: settings.artifact_source_path.clone(),
                    destination_dir: settings.artifact_destination.clone(),
                },
                builder: self.base_ref(&request.namespace, &names.runtime_image_stream),
                output_image_stream: names.runtime_output.clone(),
                env: BTreeMap::new(),
                resources: None,
            },
            build_timeout: self.config.timeouts.runtime_build(),
        }
    }

    fn base_import(&self, image_stream: &str, external_image: &str) -> ImageImport {
        ImageImport {
            name: image_stream.to_string(),
            tag: self.config.build.base_image_tag.clone(),
            from_image: external_image.to_string(),
            insecure: self.config.build.insecure_import,
        }
    }

    fn base_ref(&self, namespace: &str, image_stream: &str) -> ImageStreamTagRef {
        ImageStreamTagRef {
            namespace: Some(namespace.to_string()),
            name: image_stream.to_string(),
            tag: self.config.build.base_image_tag.clone(),
        }
    }

    fn condition(&self, reason: String, timeout: Duration) -> WaitCondition {
        WaitCondition::new(reason, timeout).every(self.config.timeouts.poll_interval())
    }

    /// Import the base image, then build into a fresh output image stream
    ///
    /// Returns the output image stream name.
    pub async fn build_from_base_image(
        &self,
        namespace: &str,
        pipeline: &ImagePipeline,
        cancel: &CancellationToken,
    ) -> Result<String, DeployError> {
        let stages = pipeline.stages;
        let base = &pipeline.base;
        let build_config = pipeline.build.name.as_str();
        let output = pipeline.build.output_image_stream.clone();

        info!(
            namespace = namespace,
            stage = %stages.base_image,
            image_stream = %base.name,
            from = %base.from_image,
            "Importing base image"
        );
        ensure_not_cancelled(stages.base_image, "importing the base image", cancel)?;
        self.cluster
            .import_image(namespace, base)
            .await
            .map_err(|source| submission(stages.base_image, source))?;

        let cluster = &self.cluster;
        gate(
            stages.base_image,
            &self.condition(
                format!("waiting for image {}:{} to be imported", base.name, base.tag),
                self.config.timeouts.image_import(),
            ),
            cancel,
            || async move {
                let tags = cluster
                    .image_stream_tags(namespace, &base.name)
                    .await
                    .map_err(|e| probe_error(stages.base_image, e))?;
                Ok::<_, ProbeError<DeployError>>(tags.iter().any(|tag| *tag == base.tag))
            },
        )
        .await?;

        ensure_not_cancelled(stages.output_image, "creating the output image stream", cancel)?;
        self.cluster
            .create_image_stream(namespace, &output)
            .await
            .map_err(|source| submission(stages.output_image, source))?;

        info!(
            namespace = namespace,
            stage = %stages.build,
            build_config = build_config,
            output = %output,
            "Submitting build"
        );
        ensure_not_cancelled(stages.build, "creating the build config", cancel)?;
        self.cluster
            .create_build_config(namespace, &pipeline.build)
            .await
            .map_err(|source| submission(stages.build, source))?;
        ensure_not_cancelled(stages.build, "starting the build", cancel)?;
        let build = self
            .cluster
            .start_build(namespace, build_config)
            .await
            .map_err(|source| submission(stages.build, source))?;

        let build_ref = build.as_str();
        gate(
            stages.build,
            &self.condition(
                format!("waiting for build {} to complete", build),
                pipeline.build_timeout,
            ),
            cancel,
            || async move {
                let phase = cluster
                    .build_phase(namespace, build_ref)
                    .await
                    .map_err(|e| probe_error(stages.build, e))?;
                if phase.is_failure() {
                    return Err(ProbeError::Terminal(DeployError::BuildFailed {
                        stage: stages.build,
                        build_config: build_config.to_string(),
                        build: build_ref.to_string(),
                        phase,
                    }));
                }
                Ok::<_, ProbeError<DeployError>>(phase == BuildPhase::Complete)
            },
        )
        .await?;

        info!(
            namespace = namespace,
            stage = %stages.build,
            build = %build,
            output = %output,
            "Build complete"
        );
        Ok(output)
    }

    async fn instantiate(
        &self,
        namespace: &str,
        request: &DeploymentRequest,
        image_stream: &str,
        workload: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let new_app = NewAppRequest {
            image: format!("{}:latest", image_stream),
            env: request.env.clone(),
            labels: request.labels.clone(),
        };

        info!(
            namespace = namespace,
            stage = %Stage::Instantiation,
            image = %new_app.image,
            "Instantiating application"
        );
        ensure_not_cancelled(Stage::Instantiation, "instantiating the application", cancel)?;
        self.cluster
            .new_app(namespace, &new_app)
            .await
            .map_err(|source| submission(Stage::Instantiation, source))?;

        let selector = PodSelector {
            label: self.config.pod_selector_label.clone(),
            value: workload.to_string(),
        };
        let expected = self.config.replicas;
        let cluster = &self.cluster;
        let selector_ref = &selector;
        gate(
            Stage::Instantiation,
            &self.condition(
                format!("waiting for exactly {} running pod(s) of {}", expected, workload),
                self.config.timeouts.pods_running(),
            ),
            cancel,
            || async move {
                let running = cluster
                    .running_pods(namespace, selector_ref)
                    .await
                    .map_err(|e| probe_error(Stage::Instantiation, e))?;
                Ok::<_, ProbeError<DeployError>>(running == expected)
            },
        )
        .await
    }

    async fn expose(
        &self,
        namespace: &str,
        service: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        ensure_not_cancelled(Stage::Exposure, "exposing the service", cancel)?;
        info!(
            namespace = namespace,
            stage = %Stage::Exposure,
            service = service,
            "Exposing service"
        );
        self.cluster
            .expose_service(namespace, service)
            .await
            .map_err(|source| submission(Stage::Exposure, source))
    }

    async fn wait_for_route(
        &self,
        namespace: &str,
        route: &str,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Url, DeployError> {
        ensure_not_cancelled(Stage::Readiness, "looking up the route", cancel)?;
        let url = self
            .cluster
            .route_url(namespace, route)
            .await
            .map_err(|source| submission(Stage::Readiness, source))?;

        let http = &self.http;
        let url_ref = &url;
        gate(
            Stage::Readiness,
            &self.condition(
                format!("waiting for route {} to connect to a pod", url),
                self.config.timeouts.route_ready(),
            ),
            cancel,
            || async move {
                let code = http
                    .status_code(url_ref)
                    .await
                    .map_err(|e| probe_error(Stage::Readiness, e))?;
                Ok::<_, ProbeError<DeployError>>(code != ROUTE_UNAVAILABLE)
            },
        )
        .await?;

        Ok(url)
    }
}

fn submission(stage: Stage, source: ClusterError) -> DeployError {
    DeployError::SubmissionFailure { stage, source }
}

/// Stop before the next submission once the caller has cancelled
fn ensure_not_cancelled(
    stage: Stage,
    action: &str,
    cancel: &CancellationToken,
) -> Result<(), DeployError> {
    if cancel.is_cancelled() {
        return Err(DeployError::Cancelled {
            stage,
            reason: action.to_string(),
        });
    }
    Ok(())
}

/// Transient collaborator errors mean "not ready yet"; the rest end the wait
fn probe_error(stage: Stage, error: ClusterError) -> ProbeError<DeployError> {
    if error.is_transient() {
        ProbeError::Transient(error.to_string())
    } else {
        ProbeError::Terminal(submission(stage, error))
    }
}

/// Wait on a stage gate, labeling timeouts and cancellation with the stage
async fn gate<F, Fut>(
    stage: Stage,
    condition: &WaitCondition,
    cancel: &CancellationToken,
    probe: F,
) -> Result<(), DeployError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, ProbeError<DeployError>>>,
{
    wait_until(condition, cancel, probe)
        .await
        .map_err(|e| match e {
            WaitError::Timeout { reason, timeout } => DeployError::Timeout {
                stage,
                reason,
                timeout,
            },
            WaitError::Cancelled { reason } => DeployError::Cancelled { stage, reason },
            WaitError::Failed { error, .. } => error,
        })
}

#[cfg(test)]
#[path = "deploy_test.rs"]
mod tests;
