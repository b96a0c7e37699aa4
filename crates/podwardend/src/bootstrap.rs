//! Process bootstrap shared by every agent: portal coordinate, bridge,
//! cluster resolution and actor start-up.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::{debug, error, info};

use podwarden_actor::tunables::duration;
use podwarden_actor::{ActorSet, Policy, TunableError, spawn};
use podwarden_core::config::PortalConfig;
use podwarden_portal::{PortalClient, RemoteBridge, RetryPolicy, discover};

/// How long actors get to finish their cycle on shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Portal coordinate: the configured address, else the first line of the
/// portal file.
pub fn resolve_portal(config: &PortalConfig) -> anyhow::Result<String> {
    match config.address.as_deref().map(str::trim) {
        Some(address) if !address.is_empty() => Ok(address.to_string()),
        _ => read_portal_file(&config.file),
    }
}

fn read_portal_file(path: &Path) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("{} not found (pod not yet configured?)", path.display()))?;
    match content.lines().next().map(str::trim) {
        Some(line) if !line.is_empty() => Ok(line.to_string()),
        _ => bail!("{} is empty", path.display()),
    }
}

/// HTTP bridge to the portal with the configured timeout and retry window.
pub fn connect(address: &str, config: &PortalConfig) -> Arc<dyn RemoteBridge> {
    let retry = RetryPolicy::new(
        duration(config.retry_window),
        duration(config.retry_pause),
    );
    let client = PortalClient::new(address)
        .with_timeout(duration(config.timeout))
        .with_retry(retry);
    info!(portal = client.address(), "using portal");
    Arc::new(client)
}

/// Concrete cluster globs for `globs`. Resolving nothing is fatal.
pub async fn resolve_clusters(
    bridge: &dyn RemoteBridge,
    globs: &[String],
    literal: bool,
) -> anyhow::Result<Vec<String>> {
    if globs.is_empty() {
        bail!("no cluster globs configured");
    }
    let clusters = discover(bridge, globs, literal).await;
    if clusters.is_empty() {
        bail!("no cluster matched {globs:?}");
    }
    info!(?clusters, "clusters resolved");
    Ok(clusters)
}

/// Start one actor per cluster, each with its own policy. If a policy
/// cannot be built, the actors already started are shut down.
pub async fn start<P, F>(
    clusters: &[String],
    bridge: Arc<dyn RemoteBridge>,
    mut make: F,
) -> anyhow::Result<ActorSet>
where
    P: Policy,
    F: FnMut() -> Result<P, TunableError>,
{
    let mut actors = ActorSet::new();
    for cluster in clusters {
        let policy = match make() {
            Ok(policy) => policy,
            Err(e) => {
                error!(%cluster, error = %e, "invalid policy settings");
                actors.shutdown(SHUTDOWN_GRACE).await;
                return Err(e).with_context(|| format!("starting actor for {cluster}"));
            }
        };
        debug!(%cluster, kind = policy.kind(), "starting actor");
        let (handle, task) = spawn(cluster.clone(), policy, bridge.clone());
        actors.insert(handle, task);
    }
    info!(actors = actors.len(), "actors started");
    Ok(actors)
}

/// Resolve on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
        return;
    }
    info!("shutdown signal received");
}
