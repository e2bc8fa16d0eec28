//! kube-rs backed [`ClusterClient`] for OpenShift
//!
//! OpenShift resources (image streams, builds, routes) have no typed
//! k8s-openapi bindings, so they go through `DynamicObject` with an explicit
//! `ApiResource`. Pods use the typed API. `new-app` and `expose` are
//! delegated to the [`CommandRunner`].

use super::cli::{expose_args, new_app_args, CommandRunner};
use super::{
    BuildConfigSpec, BuildPhase, BuildSource, ClusterClient, ClusterError, ImageImport,
    ImageStreamTagRef, NewAppRequest, PodSelector,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, PostParams};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube::Client;
use reqwest::Url;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

fn openshift_resource(group: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: group.to_string(),
        version: "v1".to_string(),
        api_version: format!("{}/v1", group),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

fn image_stream_resource() -> ApiResource {
    openshift_resource("image.openshift.io", "ImageStream", "imagestreams")
}

fn build_config_resource() -> ApiResource {
    openshift_resource("build.openshift.io", "BuildConfig", "buildconfigs")
}

fn build_resource() -> ApiResource {
    openshift_resource("build.openshift.io", "Build", "builds")
}

fn route_resource() -> ApiResource {
    openshift_resource("route.openshift.io", "Route", "routes")
}

/// ImageStream with a single tag importing an external image
pub fn image_import_manifest(import: &ImageImport) -> Value {
    json!({
        "apiVersion": "image.openshift.io/v1",
        "kind": "ImageStream",
        "metadata": { "name": import.name },
        "spec": {
            "tags": [{
                "name": import.tag,
                "from": { "kind": "DockerImage", "name": import.from_image },
                "importPolicy": { "insecure": import.insecure },
                "referencePolicy": { "type": "Source" }
            }]
        }
    })
}

/// ImageStream without tags, filled in by a build
pub fn empty_image_stream_manifest(name: &str) -> Value {
    json!({
        "apiVersion": "image.openshift.io/v1",
        "kind": "ImageStream",
        "metadata": { "name": name },
        "spec": {}
    })
}

fn image_stream_tag_ref(tag_ref: &ImageStreamTagRef) -> Value {
    let mut reference = json!({
        "kind": "ImageStreamTag",
        "name": tag_ref.tagged_name()
    });
    if let Some(namespace) = &tag_ref.namespace {
        reference["namespace"] = json!(namespace);
    }
    reference
}

fn build_source(source: &BuildSource) -> Value {
    match source {
        BuildSource::Git { uri, context_dir } => {
            let mut source = json!({
                "type": "Git",
                "git": { "uri": uri }
            });
            if let Some(dir) = context_dir.as_deref().filter(|dir| !dir.is_empty()) {
                source["contextDir"] = json!(dir);
            }
            source
        }
        BuildSource::Image {
            from,
            source_path,
            destination_dir,
        } => json!({
            "type": "Image",
            "images": [{
                "from": image_stream_tag_ref(from),
                "paths": [{
                    "sourcePath": source_path,
                    "destinationDir": destination_dir
                }]
            }]
        }),
    }
}

/// Source-strategy BuildConfig pushing to `<output>:latest`
pub fn build_config_manifest(spec: &BuildConfigSpec) -> Value {
    let env: Vec<Value> = spec
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let mut strategy = json!({
        "type": "Source",
        "sourceStrategy": { "from": image_stream_tag_ref(&spec.builder) }
    });
    if !env.is_empty() {
        strategy["sourceStrategy"]["env"] = Value::Array(env);
    }

    let mut manifest = json!({
        "apiVersion": "build.openshift.io/v1",
        "kind": "BuildConfig",
        "metadata": { "name": spec.name },
        "spec": {
            "source": build_source(&spec.source),
            "strategy": strategy,
            "output": {
                "to": {
                    "kind": "ImageStreamTag",
                    "name": format!("{}:latest", spec.output_image_stream)
                }
            }
        }
    });

    if let Some(quota) = &spec.resources {
        let amounts = json!({ "memory": quota.memory, "cpu": quota.cpu });
        manifest["spec"]["resources"] = json!({
            "requests": amounts.clone(),
            "limits": amounts
        });
    }

    manifest
}

/// BuildRequest body for the `instantiate` subresource
pub fn build_request_manifest(build_config: &str) -> Value {
    json!({
        "apiVersion": "build.openshift.io/v1",
        "kind": "BuildRequest",
        "metadata": { "name": build_config }
    })
}

/// Tags reported under `status.tags` of an ImageStream
pub fn status_tags(image_stream: &DynamicObject) -> Vec<String> {
    image_stream
        .data
        .pointer("/status/tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|tag| tag.get("tag").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// `status.phase` of a Build; a build without status has not been picked up yet
pub fn build_phase_of(build: &DynamicObject) -> BuildPhase {
    build
        .data
        .pointer("/status/phase")
        .and_then(Value::as_str)
        .map(BuildPhase::parse)
        .unwrap_or(BuildPhase::New)
}

/// External URL of a Route: `https` when TLS termination is configured
pub fn route_url_of(route: &DynamicObject, name: &str) -> Result<Url, ClusterError> {
    let host = route
        .data
        .pointer("/spec/host")
        .and_then(Value::as_str)
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ClusterError::Malformed {
            kind: "Route",
            name: name.to_string(),
            reason: "missing spec.host".to_string(),
        })?;

    let tls = route
        .data
        .pointer("/spec/tls")
        .is_some_and(|tls| !tls.is_null());
    let scheme = if tls { "https" } else { "http" };

    Url::parse(&format!("{}://{}", scheme, host)).map_err(|e| ClusterError::Malformed {
        kind: "Route",
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// Map a 404 from the API server to [`ClusterError::NotFound`]
fn not_found_as(kind: &'static str, name: &str) -> impl FnOnce(kube::Error) -> ClusterError {
    let name = name.to_string();
    move |error| match error {
        kube::Error::Api(ref err) if err.code == 404 => ClusterError::NotFound { kind, name },
        other => ClusterError::KubeError(other),
    }
}

/// Cluster client backed by kube-rs and the `oc` binary
pub struct KubeCluster {
    client: Client,
    cli: Arc<dyn CommandRunner>,
}

impl KubeCluster {
    pub fn new(client: Client, cli: Arc<dyn CommandRunner>) -> Self {
        Self { client, cli }
    }

    fn api(&self, namespace: &str, resource: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }

    async fn create(
        &self,
        namespace: &str,
        resource: &ApiResource,
        manifest: Value,
    ) -> Result<(), ClusterError> {
        let object: DynamicObject = serde_json::from_value(manifest)?;
        self.api(namespace, resource)
            .create(&PostParams::default(), &object)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn import_image(
        &self,
        namespace: &str,
        import: &ImageImport,
    ) -> Result<(), ClusterError> {
        info!(
            namespace = namespace,
            image_stream = %import.name,
            tag = %import.tag,
            from = %import.from_image,
            "Creating ImageStream importing external image"
        );
        self.create(
            namespace,
            &image_stream_resource(),
            image_import_manifest(import),
        )
        .await
    }

    async fn create_image_stream(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        info!(namespace = namespace, image_stream = name, "Creating empty ImageStream");
        self.create(
            namespace,
            &image_stream_resource(),
            empty_image_stream_manifest(name),
        )
        .await
    }

    async fn image_stream_tags(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let image_stream = self
            .api(namespace, &image_stream_resource())
            .get(name)
            .await
            .map_err(not_found_as("ImageStream", name))?;
        Ok(status_tags(&image_stream))
    }

    async fn create_build_config(
        &self,
        namespace: &str,
        spec: &BuildConfigSpec,
    ) -> Result<(), ClusterError> {
        info!(
            namespace = namespace,
            build_config = %spec.name,
            output = %spec.output_image_stream,
            "Creating BuildConfig"
        );
        self.create(
            namespace,
            &build_config_resource(),
            build_config_manifest(spec),
        )
        .await
    }

    async fn start_build(
        &self,
        namespace: &str,
        build_config: &str,
    ) -> Result<String, ClusterError> {
        let body = serde_json::to_vec(&build_request_manifest(build_config))?;
        let build: DynamicObject = self
            .api(namespace, &build_config_resource())
            .create_subresource("instantiate", build_config, &PostParams::default(), body)
            .await?;

        let name = build
            .metadata
            .name
            .ok_or_else(|| ClusterError::Malformed {
                kind: "Build",
                name: build_config.to_string(),
                reason: "instantiated build has no name".to_string(),
            })?;

        info!(namespace = namespace, build_config = build_config, build = %name, "Build started");
        Ok(name)
    }

    async fn build_phase(&self, namespace: &str, build: &str) -> Result<BuildPhase, ClusterError> {
        let object = self
            .api(namespace, &build_resource())
            .get(build)
            .await
            .map_err(not_found_as("Build", build))?;
        Ok(build_phase_of(&object))
    }

    async fn new_app(&self, namespace: &str, request: &NewAppRequest) -> Result<(), ClusterError> {
        self.cli.execute(&new_app_args(namespace, request)).await?;
        Ok(())
    }

    async fn expose_service(&self, namespace: &str, service: &str) -> Result<(), ClusterError> {
        self.cli.execute(&expose_args(namespace, service)).await?;
        Ok(())
    }

    async fn running_pods(
        &self,
        namespace: &str,
        selector: &PodSelector,
    ) -> Result<usize, ClusterError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(&selector.to_label_selector()))
            .await?;

        Ok(list
            .items
            .iter()
            .filter(|pod| {
                pod.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .is_some_and(|phase| phase == "Running")
            })
            .count())
    }

    async fn route_url(&self, namespace: &str, route: &str) -> Result<Url, ClusterError> {
        let object = self
            .api(namespace, &route_resource())
            .get(route)
            .await
            .map_err(not_found_as("Route", route))?;
        route_url_of(&object, route)
    }
}
