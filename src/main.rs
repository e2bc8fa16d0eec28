use anyhow::Context;
use s2i_deploy::{Deployer, DeployerConfig, DeploymentRequest};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const USAGE: &str = "usage: s2i-deploy <request.toml>";

/// Path of the request file, the only positional argument
pub fn request_path<I>(mut args: I) -> anyhow::Result<PathBuf>
where
    I: Iterator<Item = String>,
{
    let path = args.next().context(USAGE)?;
    if args.next().is_some() {
        anyhow::bail!(USAGE);
    }
    Ok(PathBuf::from(path))
}

pub fn load_request(path: &Path) -> anyhow::Result<DeploymentRequest> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request {}", path.display()))?;
    let request: DeploymentRequest = toml::from_str(&contents)
        .with_context(|| format!("invalid request {}", path.display()))?;
    Ok(request)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let path = request_path(std::env::args().skip(1))?;
    let request = load_request(&path)?;
    let config = DeployerConfig::from_env()?;

    let deployer = match Deployer::connect(config).await {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "Failed to create cluster clients");
            return Err(e.into());
        }
    };
    info!("Connected to cluster");

    // Ctrl-C stops whichever wait is in flight
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling deployment");
            signal_token.cancel();
        }
    });

    let deployment = deployer.deploy(&request, &cancel).await?;
    println!("{}", deployment.route_url());

    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
