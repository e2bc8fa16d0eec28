//! Assertion helpers for deployed applications

use s2i_deploy::cluster::{BuildPhase, ClusterClient, HttpProbe, PodSelector, ReqwestProbe};
use std::error::Error;
use std::time::Duration;

/// Assert the first build of a build config completed
pub async fn assert_build_complete(
    cluster: &dyn ClusterClient,
    namespace: &str,
    build_config: &str,
) -> Result<(), Box<dyn Error>> {
    // Builds are numbered per build config, starting at 1
    let build = format!("{}-1", build_config);
    let phase = cluster.build_phase(namespace, &build).await?;

    if phase != BuildPhase::Complete {
        return Err(format!("build {}: expected Complete, got {}", build, phase).into());
    }

    println!("✅ Build {} complete", build);
    Ok(())
}

/// Assert exactly `expected` pods of the workload are running
pub async fn assert_running_pods(
    cluster: &dyn ClusterClient,
    namespace: &str,
    selector: &PodSelector,
    expected: usize,
) -> Result<(), Box<dyn Error>> {
    let running = cluster.running_pods(namespace, selector).await?;

    if running != expected {
        return Err(format!(
            "pods {}: expected {} running, got {}",
            selector.to_label_selector(),
            expected,
            running
        )
        .into());
    }

    println!("✅ {} running pod(s) for {}", running, selector.to_label_selector());
    Ok(())
}

/// Assert the route reaches the application
pub async fn assert_route_serves(url: &reqwest::Url) -> Result<(), Box<dyn Error>> {
    let probe = ReqwestProbe::new(Duration::from_secs(10))?;
    let code = probe.status_code(url).await?;

    if code == 503 {
        return Err(format!("route {} still answers 503", url).into());
    }

    println!("✅ Route {} answered {}", url, code);
    Ok(())
}
