
pub use s2i_deployment::S2iDeploymentScenario;
