//! podwardend — the podwarden daemon.
//!
//! One binary, one agent per process:
//! - `cleaner`: kill dead pods and reset stopped ones
//! - `scaler`: PID autoscaling plus the admin HTTP surface
//! - `watcher`: cluster stability alerts
//!
//! # Usage
//!
//! ```text
//! podwardend --config /etc/podwarden.toml scaler --clusters 'marathon.flask*'
//! podwardend --portal 10.0.0.5:9000 watcher
//! ```

mod bootstrap;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use podwarden_actor::ActorSet;
use podwarden_autoscale::{AutoscalePolicy, ScaleTunables};
use podwarden_cleaner::{CleanTunables, CleanerPolicy};
use podwarden_core::config::PodwardenConfig;
use podwarden_health::{AlertSink, RotatingAlertLog, TracingAlertSink, WatchTunables, WatcherPolicy};

use bootstrap::{SHUTDOWN_GRACE, shutdown_signal};

#[derive(Parser)]
#[command(name = "podwardend", about = "podwarden fleet agents")]
struct Cli {
    /// podwarden.toml; defaults apply when omitted.
    #[arg(long, global = true, env = "PODWARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Portal `host:port`, overriding the config and the portal file.
    #[arg(long, global = true, env = "PODWARDEN_PORTAL")]
    portal: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Kill dead pods and reset stopped ones.
    Cleaner(CleanerArgs),
    /// Scale clusters on a polled metric.
    Scaler(ScalerArgs),
    /// Report stagnant, fluctuating and lost clusters.
    Watcher(WatcherArgs),
}

#[derive(Args)]
struct CleanerArgs {
    /// Cluster globs, comma separated.
    #[arg(long, value_delimiter = ',')]
    clusters: Vec<String>,
    /// Use the globs as-is instead of resolving them through the portal.
    #[arg(long)]
    literal: bool,
    /// Seconds between cycles.
    #[arg(long)]
    period: Option<f64>,
    /// Seconds between the two samples of a cycle.
    #[arg(long)]
    wait: Option<f64>,
}

#[derive(Args)]
struct ScalerArgs {
    #[arg(long, value_delimiter = ',')]
    clusters: Vec<String>,
    #[arg(long)]
    literal: bool,
    /// Desired per-pod metric value.
    #[arg(long)]
    target: Option<f64>,
    /// Metric field read from poll records.
    #[arg(long)]
    metric: Option<String>,
    /// Upper bound on the instance count.
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    period: Option<f64>,
    /// Admin HTTP port.
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Args)]
struct WatcherArgs {
    #[arg(long, value_delimiter = ',')]
    clusters: Vec<String>,
    #[arg(long)]
    literal: bool,
    #[arg(long)]
    period: Option<f64>,
    #[arg(long)]
    wait: Option<f64>,
    /// Stagnant samples tolerated before a failure is reported.
    #[arg(long)]
    checks: Option<u32>,
    /// Alert log path.
    #[arg(long)]
    alert_log: Option<PathBuf>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,podwarden=debug,podwardend=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = match &cli.config {
        Some(path) => PodwardenConfig::from_file(path)?,
        None => PodwardenConfig::default(),
    };
    if let Some(portal) = cli.portal {
        config.portal.address = Some(portal);
    }

    match cli.command {
        Command::Cleaner(args) => run_cleaner(config, args).await,
        Command::Scaler(args) => run_scaler(config, args).await,
        Command::Watcher(args) => run_watcher(config, args).await,
    }
}

async fn run_cleaner(mut config: PodwardenConfig, args: CleanerArgs) -> anyhow::Result<()> {
    let cleaner = &mut config.cleaner;
    if !args.clusters.is_empty() {
        cleaner.clusters = args.clusters;
    }
    cleaner.literal |= args.literal;
    cleaner.period = args.period.unwrap_or(cleaner.period);
    cleaner.wait = args.wait.unwrap_or(cleaner.wait);

    info!("podwarden cleaner starting");
    let address = bootstrap::resolve_portal(&config.portal)?;
    let bridge = bootstrap::connect(&address, &config.portal);
    let clusters =
        bootstrap::resolve_clusters(bridge.as_ref(), &config.cleaner.clusters, config.cleaner.literal)
            .await?;

    let tunables = CleanTunables::from(&config.cleaner);
    let actors = bootstrap::start(&clusters, bridge, || CleanerPolicy::new(tunables)).await?;

    shutdown_signal().await;
    actors.shutdown(SHUTDOWN_GRACE).await;
    info!("podwarden cleaner stopped");
    Ok(())
}

async fn run_scaler(mut config: PodwardenConfig, args: ScalerArgs) -> anyhow::Result<()> {
    let scaler = &mut config.scaler;
    if !args.clusters.is_empty() {
        scaler.clusters = args.clusters;
    }
    scaler.literal |= args.literal;
    scaler.target = args.target.unwrap_or(scaler.target);
    scaler.limit = args.limit.unwrap_or(scaler.limit);
    scaler.period = args.period.unwrap_or(scaler.period);
    scaler.listen_port = args.port.unwrap_or(scaler.listen_port);
    if let Some(metric) = args.metric {
        scaler.metric = metric;
    }

    info!("podwarden scaler starting");
    let address = bootstrap::resolve_portal(&config.portal)?;
    let bridge = bootstrap::connect(&address, &config.portal);
    let clusters =
        bootstrap::resolve_clusters(bridge.as_ref(), &config.scaler.clusters, config.scaler.literal)
            .await?;

    let tunables = ScaleTunables::from(&config.scaler);
    let metric = config.scaler.metric.clone();
    let actors = Arc::new(
        bootstrap::start(&clusters, bridge, || AutoscalePolicy::new(tunables, metric.as_str())).await?,
    );

    // ── Admin surface ──────────────────────────────────────────

    let addr = SocketAddr::from(([0, 0, 0, 0], config.scaler.listen_port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            actors.shutdown(SHUTDOWN_GRACE).await;
            return Err(e).with_context(|| format!("binding admin surface to {addr}"));
        }
    };
    info!(%addr, "admin surface listening");

    let router = podwarden_api::build_router(actors.clone());
    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "admin surface failed");
    }

    actors.shutdown(SHUTDOWN_GRACE).await;
    info!("podwarden scaler stopped");
    Ok(())
}

async fn run_watcher(mut config: PodwardenConfig, args: WatcherArgs) -> anyhow::Result<()> {
    let watcher = &mut config.watcher;
    if !args.clusters.is_empty() {
        watcher.clusters = args.clusters;
    }
    watcher.literal |= args.literal;
    watcher.period = args.period.unwrap_or(watcher.period);
    watcher.wait = args.wait.unwrap_or(watcher.wait);
    watcher.checks = args.checks.unwrap_or(watcher.checks);
    if let Some(path) = args.alert_log {
        watcher.alert_log = path;
    }

    info!("podwarden watcher starting");
    let address = bootstrap::resolve_portal(&config.portal)?;
    let bridge = bootstrap::connect(&address, &config.portal);
    let clusters =
        bootstrap::resolve_clusters(bridge.as_ref(), &config.watcher.clusters, config.watcher.literal)
            .await?;

    let sink = open_alert_sink(&config);
    let tunables = WatchTunables::from(&config.watcher);
    let actors: ActorSet =
        bootstrap::start(&clusters, bridge, || WatcherPolicy::new(tunables, sink.clone())).await?;

    shutdown_signal().await;
    actors.shutdown(SHUTDOWN_GRACE).await;
    if let Err(e) = sink.flush() {
        warn!(error = %e, "failed to flush alerts");
    }
    info!("podwarden watcher stopped");
    Ok(())
}

/// The rotating alert log, or tracing output when the log cannot be opened.
fn open_alert_sink(config: &PodwardenConfig) -> Arc<dyn AlertSink> {
    let watcher = &config.watcher;
    match RotatingAlertLog::open(
        &watcher.alert_log,
        watcher.alert_log_max_bytes,
        watcher.alert_log_backups,
    ) {
        Ok(log) => {
            info!(path = %log.path().display(), "writing alerts");
            Arc::new(log)
        }
        Err(e) => {
            warn!(error = %e, "alert log unavailable, alerts go to the log stream");
            Arc::new(TracingAlertSink)
        }
    }
}
