//! Replica Governor - metrics-driven scaling and failover controller
//!
//! Runs as a single Deployment next to the workload it governs, resizing a
//! Deployment from Prometheus signals and promoting a Redis replica when the
//! primary degrades.

use anyhow::{Context, Result};
use clap::Parser;
use governor_lib::{
    actuator::{
        DryRunFailoverActuator, DryRunScaleActuator, FailoverActuator, KubeScaleActuator,
        RedisFailoverActuator, ScaleActuator,
    },
    api::{self, AppState},
    cluster::{
        ClusterHealthMonitor, HealthThresholds, KubeServiceDiscovery, NodeDiscovery,
        RedisNodeProbe, StaticDiscovery,
    },
    config::{ClusterConfig, DiscoveryMode, GovernorConfig},
    control::{ControlConfig, ControlLoopBuilder, FailoverLane, ScalingLane},
    health::{components, HealthRegistry},
    journal::DecisionJournal,
    observability::{AuditLogger, GovernorMetrics},
    source::{PrometheusSource, QueryTemplates, SampleCollector},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const GOVERNOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "replica-governor")]
#[command(version, about = "Metrics-driven replica scaling and failover controller")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "GOVERNOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log intended actions without mutating the cluster
    #[arg(long)]
    dry_run: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing with JSON output and env filter
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json())
        .init();

    info!("Starting replica-governor");

    // Load configuration
    let mut config = GovernorConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    config.dry_run |= args.dry_run;
    config.validate().context("Invalid configuration")?;
    info!(
        instance = %config.instance_name,
        scaling = config.scaling.enabled,
        cluster = config.cluster.enabled,
        dry_run = config.dry_run,
        "Governor configured"
    );

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    let metrics = GovernorMetrics::new();
    let journal = DecisionJournal::new(config.journal_capacity);
    let cluster_status = Arc::new(RwLock::new(None));

    let logger = AuditLogger::new(&config.instance_name);
    logger.log_startup(GOVERNOR_VERSION, config.dry_run);

    let mut builder = ControlLoopBuilder::new()
        .config(ControlConfig::from_config(&config))
        .health(health_registry.clone())
        .journal(journal.clone())
        .cluster_status(cluster_status.clone())
        .audit(logger.clone());

    if config.scaling.enabled {
        builder = builder.scaling(scaling_lane(&config).await?);
        health_registry.register(components::METRICS_SOURCE).await;
        health_registry.register(components::SCALING_ACTUATOR).await;
    }
    if config.cluster.enabled {
        builder = builder.failover(failover_lane(&config).await?);
        health_registry.register(components::CLUSTER_MONITOR).await;
        health_registry.register(components::FAILOVER_ACTUATOR).await;
    }

    let mut control_loop = builder.build().context("Failed to build control loop")?;

    if args.once {
        let report = control_loop.run_cycle().await;
        for record in report.scaling.iter().chain(report.failover.iter()) {
            println!("{}", serde_json::to_string_pretty(record)?);
        }
        logger.log_shutdown("single cycle complete");
        return Ok(());
    }

    // Start health and metrics server
    let mut app_state = AppState::new(
        health_registry.clone(),
        metrics.clone(),
        journal.clone(),
        cluster_status.clone(),
    );
    if let Some(trigger) = control_loop.failover_trigger() {
        app_state = app_state.with_failover(trigger);
    }
    let app_state = Arc::new(app_state);
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server stopped");
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_handle = tokio::spawn(control_loop.run(shutdown_rx));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    if let Err(e) = loop_handle.await {
        warn!(error = %e, "Control loop task ended abnormally");
    }
    info!("Shutting down");

    Ok(())
}

async fn scaling_lane(config: &GovernorConfig) -> Result<ScalingLane> {
    let source_config = &config.metrics_source;
    let source = PrometheusSource::new(
        &source_config.prometheus_url,
        Duration::from_secs(source_config.query_timeout_secs),
    )
    .context("Failed to create Prometheus source")?;
    let collector = SampleCollector::new(
        Arc::new(source),
        QueryTemplates::new(source_config, &config.scaling),
    );

    let kube_actuator =
        KubeScaleActuator::new(&config.scaling.namespace, &config.scaling.deployment)
            .await
            .context("Failed to create scale actuator")?;
    let actuator: Arc<dyn ScaleActuator> = if config.dry_run {
        Arc::new(DryRunScaleActuator::new(Arc::new(kube_actuator)))
    } else {
        Arc::new(kube_actuator)
    };

    info!(
        prometheus = %source_config.prometheus_url,
        target = %actuator.target(),
        "Scaling lane configured"
    );

    Ok(ScalingLane::new(collector, actuator, &config.scaling))
}

async fn failover_lane(config: &GovernorConfig) -> Result<FailoverLane> {
    let cluster = &config.cluster;
    let password = cluster
        .password()
        .context("Failed to read cluster password")?;

    let discovery = discovery(cluster).await?;
    let probe = RedisNodeProbe::new(password.clone(), cluster.node_timeout());
    let monitor = ClusterHealthMonitor::new(
        Arc::new(probe),
        HealthThresholds::from_config(cluster),
        cluster.node_timeout(),
    );

    let actuator: Arc<dyn FailoverActuator> = if config.dry_run {
        Arc::new(DryRunFailoverActuator)
    } else {
        Arc::new(RedisFailoverActuator::new(password, cluster.node_timeout()))
    };

    info!(
        discovery = %discovery.name(),
        auto_failover = cluster.auto_failover,
        "Failover lane configured"
    );

    Ok(FailoverLane::new(
        discovery,
        monitor,
        actuator,
        cluster.auto_failover,
    ))
}

async fn discovery(cluster: &ClusterConfig) -> Result<Arc<dyn NodeDiscovery>> {
    let discovery: Arc<dyn NodeDiscovery> = match cluster.discovery {
        DiscoveryMode::Static => Arc::new(
            StaticDiscovery::from_config(cluster).context("Invalid static cluster endpoints")?,
        ),
        DiscoveryMode::Kubernetes => Arc::new(KubeServiceDiscovery::new(cluster).await?),
    };
    Ok(discovery)
}
