pub mod cluster;
pub mod config;
pub mod deploy;
pub mod wait;

pub use crate::config::DeployerConfig;
pub use crate::deploy::{DeployError, Deployer, DeploymentRequest, HttpDeployment, Stage};
pub use crate::wait::{wait_until, ProbeError, WaitCondition, WaitError};
