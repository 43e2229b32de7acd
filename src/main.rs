//! Region Balancer
//!
//! Runs the balance-region scheduler against a cluster snapshot file on a
//! fixed interval. Admitted operators are logged; with `--simulate` they are
//! also applied to the in-memory metadata so successive ticks converge the
//! way a live cluster would. `--diagnose` prints the dry-run report of each
//! tick as JSON instead of submitting anything.

use anyhow::Context;
use clap::Parser;
use prometheus::{IntGauge, IntGaugeVec};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use region_balancer::{
    BalanceRegionScheduler, BalancerConfig, ClusterMetadata, ClusterSnapshot, Operator,
    OperatorController, Scheduler,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Region Balancer - moves region replicas from loaded to idle stores
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Cluster snapshot (YAML or JSON)
    #[arg(long, env = "SNAPSHOT_PATH")]
    snapshot: PathBuf,

    /// Balancer configuration (YAML or JSON); defaults apply when absent
    #[arg(long, env = "BALANCER_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between scheduling ticks
    #[arg(long, env = "TICK_INTERVAL", default_value = "10")]
    interval_secs: u64,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,

    /// Dry-run: print the diagnostic report instead of submitting operators
    #[arg(long, env = "DIAGNOSE")]
    diagnose: bool,

    /// Apply admitted operators to the in-memory snapshot
    #[arg(long, env = "SIMULATE")]
    simulate: bool,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting Region Balancer");
    info!("  Version: {}", region_balancer::VERSION);
    info!("  Snapshot: {}", args.snapshot.display());
    info!("  Interval: {}s", args.interval_secs);
    info!("  Diagnose: {}", args.diagnose);
    info!("  Simulate: {}", args.simulate);

    let config = match &args.config {
        Some(path) => BalancerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BalancerConfig::default(),
    };

    let snapshot = ClusterSnapshot::from_file(&args.snapshot)
        .with_context(|| format!("loading snapshot {}", args.snapshot.display()))?;
    let metadata = ClusterMetadata::from_snapshot(snapshot).context("seeding cluster metadata")?;
    let stats = metadata.stats();
    info!(
        stores = stats.stores,
        up_stores = stats.up_stores,
        regions = stats.regions,
        "cluster metadata loaded"
    );

    let controller = OperatorController::new(config.limits).context("creating controller")?;
    let scheduler = Arc::new(
        BalanceRegionScheduler::new(config.scheduler, Arc::clone(&controller))
            .context("creating scheduler")?,
    );

    let exporter = Exporter::register().context("registering metrics")?;
    if !args.once {
        let metrics_addr = args.metrics_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&metrics_addr).await {
                error!("Metrics server error: {:#}", e);
            }
        });
    }

    let mut tick = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                run_tick(&args, &metadata, &controller, scheduler.as_ref());
                exporter.update(&scheduler, &controller);
                if args.once {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!("Region balancer shutdown complete");
    Ok(())
}

// =============================================================================
// Tick
// =============================================================================

fn run_tick(
    args: &Args,
    metadata: &ClusterMetadata,
    controller: &OperatorController,
    scheduler: &BalanceRegionScheduler,
) {
    let view = match metadata.snapshot() {
        Ok(view) => view,
        Err(e) => {
            error!(error = %e, "failed to build cluster view");
            return;
        }
    };

    let outcome = match scheduler.schedule(&view, args.diagnose) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(scheduler = scheduler.name(), error = %e, "tick failed");
            return;
        }
    };

    if let Some(report) = &outcome.report {
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{}", json),
            Err(e) => error!(error = %e, "failed to encode diagnostic report"),
        }
    }

    for reason in &outcome.rejections {
        info!(%reason, "move not admitted");
    }

    for op in &outcome.operators {
        info!(
            operator_id = %op.id,
            region_id = %op.region_id,
            source = %op.source,
            target = %op.target,
            kind = %op.kind,
            steps = op.steps.len(),
            "operator submitted"
        );
        if args.simulate {
            simulate(metadata, controller, op);
        }
    }
}

/// Execute an operator against the in-memory metadata and retire it
fn simulate(metadata: &ClusterMetadata, controller: &OperatorController, op: &Operator) {
    let retired = match metadata.apply_move(op) {
        Ok(()) => controller.finish(op.id),
        Err(e) => {
            warn!(operator_id = %op.id, error = %e, "simulated operator failed");
            controller.cancel(op.id)
        }
    };
    if let Err(e) = retired {
        warn!(operator_id = %op.id, error = %e, "operator already retired");
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?);

    // Diagnostic reports go to stdout; keep logs off it.
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

// =============================================================================
// Metrics
// =============================================================================

/// Mirrors the library's atomic counters into the prometheus registry
struct Exporter {
    scheduler: IntGaugeVec,
    controller: IntGaugeVec,
    in_flight: IntGauge,
}

impl Exporter {
    fn register() -> anyhow::Result<Self> {
        Ok(Self {
            scheduler: prometheus::register_int_gauge_vec!(
                "region_balancer_scheduler_events",
                "Cumulative scheduler events by kind",
                &["scheduler", "event"]
            )?,
            controller: prometheus::register_int_gauge_vec!(
                "region_balancer_controller_events",
                "Cumulative operator controller events by kind",
                &["event"]
            )?,
            in_flight: prometheus::register_int_gauge!(
                "region_balancer_operators_in_flight",
                "Operators currently admitted and not retired"
            )?,
        })
    }

    fn update(&self, scheduler: &BalanceRegionScheduler, controller: &OperatorController) {
        let name = scheduler.name();
        for (event, value) in counters(&scheduler.metrics().snapshot()) {
            self.scheduler
                .with_label_values(&[name, event.as_str()])
                .set(value);
        }
        for (event, value) in counters(&controller.metrics().snapshot()) {
            self.controller
                .with_label_values(&[event.as_str()])
                .set(value);
        }
        self.in_flight.set(controller.total_in_flight() as i64);
    }
}

/// Flatten a counter snapshot into `(field, value)` pairs
fn counters<T: serde::Serialize>(snapshot: &T) -> Vec<(String, i64)> {
    match serde_json::to_value(snapshot) {
        Ok(serde_json::Value::Object(fields)) => fields
            .into_iter()
            .filter_map(|(k, v)| v.as_i64().map(|v| (k, v)))
            .collect(),
        _ => Vec::new(),
    }
}

async fn run_metrics_server(addr: &str) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let mut response = Response::new(Body::empty());
            match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => {
                            if let Ok(value) = encoder.format_type().parse::<hyper::header::HeaderValue>() {
                                response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
                            }
                            *response.body_mut() = Body::from(buffer);
                        }
                        Err(e) => {
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            *response.body_mut() = Body::from(e.to_string());
                        }
                    }
                }
                "/healthz" => *response.body_mut() = Body::from("ok"),
                _ => {
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    *response.body_mut() = Body::from("not found");
                }
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", addr))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("metrics server")?;

    Ok(())
}
