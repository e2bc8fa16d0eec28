//! Scripted collaborators for orchestrator tests
//!
//! `MockCluster` records every submission in call order and answers status
//! queries from a script. `MockHttpProbe` replays a list of status codes.

#![allow(clippy::unwrap_used)] // Test doubles can unwrap poisoned locks

use super::{
    BuildConfigSpec, BuildPhase, ClusterClient, ClusterError, HttpProbe, ImageImport,
    NewAppRequest, PodSelector,
};
use async_trait::async_trait;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A submission made against the mock cluster
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ImportImage(ImageImport),
    CreateImageStream(String),
    CreateBuildConfig(BuildConfigSpec),
    StartBuild(String),
    NewApp(NewAppRequest),
    ExposeService(String),
}

/// Cluster whose status answers are scripted per test
///
/// Defaults: imported tags show up on the first poll, builds go
/// `Running` -> `Complete`, one pod is running, routes live under
/// `apps.test.example.com`.
pub struct MockCluster {
    calls: Mutex<Vec<Call>>,
    polls: Mutex<HashMap<String, usize>>,
    started_builds: Mutex<HashMap<String, String>>,
    /// Polls answered with `NotFound` before an imported tag is listed
    pub missing_image_polls: usize,
    /// Phases reported per build config, one per poll; the last one sticks
    pub build_phases: HashMap<String, Vec<BuildPhase>>,
    /// Running pod counts, one per poll; the last one sticks
    pub running_pods: Vec<usize>,
    /// Domain route hosts are generated under
    pub route_domain: String,
    /// Fail `new_app` with a CLI error
    pub reject_new_app: bool,
    /// Cancel the token as soon as a matching submission is recorded
    pub cancel_on: Option<(fn(&Call) -> bool, CancellationToken)>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            polls: Mutex::new(HashMap::new()),
            started_builds: Mutex::new(HashMap::new()),
            missing_image_polls: 0,
            build_phases: HashMap::new(),
            running_pods: vec![1],
            route_domain: "apps.test.example.com".to_string(),
            reject_new_app: false,
            cancel_on: None,
        }
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of status queries made under `key`
    pub fn poll_count(&self, key: &str) -> usize {
        self.polls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    fn record(&self, call: Call) {
        if let Some((is_match, token)) = &self.cancel_on {
            if is_match(&call) {
                token.cancel();
            }
        }
        self.calls.lock().unwrap().push(call);
    }

    /// Register a poll under `key` and return its zero-based index
    fn next_poll(&self, key: &str) -> usize {
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(key.to_string()).or_insert(0);
        let index = *count;
        *count += 1;
        index
    }

    fn scripted<T: Clone>(script: &[T], index: usize) -> Option<T> {
        script.get(index).or_else(|| script.last()).cloned()
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn import_image(
        &self,
        _namespace: &str,
        import: &ImageImport,
    ) -> Result<(), ClusterError> {
        self.record(Call::ImportImage(import.clone()));
        Ok(())
    }

    async fn create_image_stream(&self, _namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.record(Call::CreateImageStream(name.to_string()));
        Ok(())
    }

    async fn image_stream_tags(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let poll = self.next_poll(&format!("tags/{}", name));
        if poll < self.missing_image_polls {
            return Err(ClusterError::NotFound {
                kind: "ImageStream",
                name: name.to_string(),
            });
        }

        Ok(self
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::ImportImage(import) if import.name == name => Some(import.tag),
                _ => None,
            })
            .collect())
    }

    async fn create_build_config(
        &self,
        _namespace: &str,
        spec: &BuildConfigSpec,
    ) -> Result<(), ClusterError> {
        self.record(Call::CreateBuildConfig(spec.clone()));
        Ok(())
    }

    async fn start_build(
        &self,
        _namespace: &str,
        build_config: &str,
    ) -> Result<String, ClusterError> {
        self.record(Call::StartBuild(build_config.to_string()));
        let build = format!("{}-1", build_config);
        self.started_builds
            .lock()
            .unwrap()
            .insert(build.clone(), build_config.to_string());
        Ok(build)
    }

    async fn build_phase(&self, _namespace: &str, build: &str) -> Result<BuildPhase, ClusterError> {
        let build_config = self
            .started_builds
            .lock()
            .unwrap()
            .get(build)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Build",
                name: build.to_string(),
            })?;

        let poll = self.next_poll(&format!("build/{}", build_config));
        let default_phases = [BuildPhase::Running, BuildPhase::Complete];
        let script = self
            .build_phases
            .get(&build_config)
            .map(Vec::as_slice)
            .unwrap_or(&default_phases);

        Ok(Self::scripted(script, poll).unwrap_or(BuildPhase::Complete))
    }

    async fn new_app(&self, _namespace: &str, request: &NewAppRequest) -> Result<(), ClusterError> {
        self.record(Call::NewApp(request.clone()));
        if self.reject_new_app {
            return Err(ClusterError::CommandFailed {
                command: format!("oc new-app {}", request.image),
                status: "exit status: 1".to_string(),
                stderr: "error: image not found".to_string(),
            });
        }
        Ok(())
    }

    async fn expose_service(&self, _namespace: &str, service: &str) -> Result<(), ClusterError> {
        self.record(Call::ExposeService(service.to_string()));
        Ok(())
    }

    async fn running_pods(
        &self,
        _namespace: &str,
        selector: &PodSelector,
    ) -> Result<usize, ClusterError> {
        let poll = self.next_poll(&format!("pods/{}", selector.to_label_selector()));
        Ok(Self::scripted(&self.running_pods, poll).unwrap_or(0))
    }

    async fn route_url(&self, namespace: &str, route: &str) -> Result<Url, ClusterError> {
        let exposed = self
            .calls()
            .iter()
            .any(|call| matches!(call, Call::ExposeService(service) if service == route));
        if !exposed {
            return Err(ClusterError::NotFound {
                kind: "Route",
                name: route.to_string(),
            });
        }

        Url::parse(&mock_route_url(route, namespace, &self.route_domain)).map_err(|e| {
            ClusterError::Malformed {
                kind: "Route",
                name: route.to_string(),
                reason: e.to_string(),
            }
        })
    }
}

/// Host the mock router generates: `<route>-<namespace>.<domain>`
pub fn mock_route_url(route: &str, namespace: &str, domain: &str) -> String {
    format!("http://{}-{}.{}/", route, namespace, domain)
}

/// HTTP probe replaying status codes; `None` simulates connection refused
pub struct MockHttpProbe {
    codes: Vec<Option<u16>>,
    requests: Mutex<Vec<Url>>,
}

impl MockHttpProbe {
    pub fn new(codes: Vec<Option<u16>>) -> Self {
        Self {
            codes,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers 200
    pub fn healthy() -> Self {
        Self::new(vec![Some(200)])
    }

    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpProbe for MockHttpProbe {
    async fn status_code(&self, url: &Url) -> Result<u16, ClusterError> {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(url.clone());
            requests.len() - 1
        };

        match MockCluster::scripted(&self.codes, index).flatten() {
            Some(code) => Ok(code),
            None => Err(ClusterError::NotFound {
                kind: "Endpoint",
                name: url.to_string(),
            }),
        }
    }
}
