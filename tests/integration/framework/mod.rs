//! Integration test framework for s2i-deploy
//!
//! Runs real deployments against the OpenShift cluster of the current
//! kubeconfig context:
//! - throwaway project per run
//! - cluster-side assertions on builds, pods and routes

#![allow(dead_code)] // Helpers are shared between scenarios

pub mod assertions;

use s2i_deploy::cluster::{ClusterClient, KubeCluster, OcBinary, ReqwestProbe};
use s2i_deploy::{Deployer, DeployerConfig, DeploymentRequest};
use serde::Deserialize;
use std::error::Error;
use std::sync::Arc;

pub type TestResult = Result<(), Box<dyn Error>>;

/// Test configuration loaded from config.toml
#[derive(Debug, Clone, Deserialize)]
pub struct TestConfig {
    pub cluster: ClusterConfig,
    pub scenarios: ScenarioConfig,
    pub application: ApplicationConfig,
    /// Deployer settings; omitted keys keep their defaults
    #[serde(default)]
    pub deployer: DeployerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Delete the test project when done
    pub cleanup: bool,
    pub namespace_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    pub s2i_deployment: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    pub source_url: String,
    pub context_dir: Option<String>,
    pub builder_image: String,
    pub runtime_image: String,
}

impl TestConfig {
    /// Load configuration from tests/integration/config.toml
    pub fn load() -> Result<Self, Box<dyn Error>> {
        let config_path = "tests/integration/config.toml";
        let contents = std::fs::read_to_string(config_path)?;
        let mut config: TestConfig = toml::from_str(&contents)?;
        config
            .deployer
            .apply_env_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
        config.deployer.validate()?;
        Ok(config)
    }
}

/// Test context holds shared state across scenarios
pub struct TestContext {
    pub client: kube::Client,
    pub namespace: String,
    pub config: TestConfig,
    pub cluster: Arc<KubeCluster>,
    pub deployer: Deployer,
}

impl TestContext {
    /// Create new test context
    pub async fn new(config: &TestConfig) -> Result<Self, Box<dyn Error>> {
        let client = kube::Client::try_default().await?;

        let namespace = format!(
            "{}-{}",
            config.cluster.namespace_prefix,
            chrono::Utc::now().timestamp()
        );
        project::create_project(&client, &namespace).await?;

        let cli = Arc::new(OcBinary::new(config.deployer.oc_binary.clone()));
        let cluster = Arc::new(KubeCluster::new(client.clone(), cli));
        let http = Arc::new(ReqwestProbe::new(config.deployer.http_probe_timeout())?);
        let deployer = Deployer::new(
            cluster.clone() as Arc<dyn ClusterClient>,
            http,
            config.deployer.clone(),
        );

        Ok(Self {
            client,
            namespace,
            config: config.clone(),
            cluster,
            deployer,
        })
    }

    /// Request for the configured application in this run's project
    pub fn request(&self) -> DeploymentRequest {
        let app = &self.config.application;
        let mut request = DeploymentRequest::new(
            self.namespace.clone(),
            app.name.clone(),
            app.source_url.clone(),
            app.builder_image.clone(),
            app.runtime_image.clone(),
        );
        request.context_dir = app.context_dir.clone();
        request
    }

    /// Cleanup test resources
    pub async fn cleanup(&self, config: &TestConfig) -> Result<(), Box<dyn Error>> {
        if config.cluster.cleanup {
            project::delete_project(&self.client, &self.namespace).await?;
        } else {
            println!("📌 Keeping project: {}", self.namespace);
        }
        Ok(())
    }
}

/// Trait for test scenarios
#[async_trait::async_trait]
pub trait TestScenario: Send + Sync {
    /// Name of the scenario
    fn name(&self) -> &str;

    /// Run the scenario
    async fn run(&self, ctx: &mut TestContext) -> TestResult;

    /// Check if scenario should be skipped
    fn should_skip(&self, config: &TestConfig) -> bool;
}
