//! vSphere CSI Driver Operator
//!
//! Runs the environment-check engine against a vCenter server and gates the
//! vSphere CSI driver's lifecycle on the outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              main                                            │
//! │   CLI + YAML config ──► adapters ──► VSphereController ──► ControllerRunner  │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Health server  │  │ Metrics server  │  │      Event recorder         │  │
//! │  │ /healthz /readyz│  │    /metrics     │  │   (controller events log)   │  │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use futures::channel::mpsc;
use futures::StreamExt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vsphere_csi_driver_operator::domain::ports::InfrastructureInfo;
use vsphere_csi_driver_operator::platform::ChangeTriggers;
use vsphere_csi_driver_operator::{
    CheckMetrics, ControllerDeps, ControllerRunner, Error, EventBus, KubeStatusClient,
    OperandController, OperatorConfig, ReflectorApi, RestConnectionFactory, Result,
    StorageClassController, VSphereController,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// vSphere CSI Driver Operator - environment checks and lifecycle gating
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Operator configuration file (YAML)
    #[arg(long, env = "OPERATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Prefix of the published condition types
    #[arg(long, env = "CONTROLLER_NAME")]
    controller_name: Option<String>,

    /// vCenter server, overrides the configuration file
    #[arg(long, env = "VSPHERE_SERVER")]
    vcenter_server: Option<String>,

    /// vCenter user name
    #[arg(long, env = "VSPHERE_USERNAME")]
    vcenter_username: Option<String>,

    /// vCenter password
    #[arg(long, env = "VSPHERE_PASSWORD", hide_env_values = true)]
    vcenter_password: Option<String>,

    /// Skip TLS verification of the vCenter endpoint
    #[arg(long, env = "VSPHERE_INSECURE")]
    vcenter_insecure: bool,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

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
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = load_config(&args)?;
    let server = config
        .vcenter
        .server
        .clone()
        .ok_or_else(|| Error::Configuration("vCenter server is not configured".into()))?;

    info!("Starting vSphere CSI Driver Operator");
    info!("  Version: {}", vsphere_csi_driver_operator::VERSION);
    info!("  Controller: {}", config.controller_name);
    info!("  vCenter: {}", server);
    info!("  Check interval: {:?}", config.checks.interval());

    let cancel = CancellationToken::new();
    let ready = Arc::new(AtomicBool::new(false));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics = Arc::new(CheckMetrics::register(prometheus::default_registry())?);
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Kubernetes adapters
    let client = kube::Client::try_default().await?;
    let infrastructure = InfrastructureInfo {
        platform: "VSphere".to_string(),
        vcenter_servers: vec![server.clone()],
    };
    let (api, triggers) = ReflectorApi::start(client.clone(), &config.admin_ack, infrastructure);
    let api = Arc::new(api);
    let triggers = coalesce(triggers);

    let status = Arc::new(KubeStatusClient::new(client.clone()));
    let events = EventBus::new();
    spawn_event_recorder(&events, cancel.clone());

    let controller = VSphereController::new(
        &config,
        ControllerDeps {
            api: api.clone(),
            admin_acks: api.clone(),
            connections: Arc::new(RestConnectionFactory::new(server, &config.vcenter)?),
            operand: Arc::new(OperandController::new(client.clone())),
            storage_class: Arc::new(StorageClassController::new(client, config.storage_class.clone())),
            status: status.clone(),
        },
    )
    .with_events(events)
    .with_metrics(metrics);

    // Shutdown on SIGINT
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    // The gate must never act on partially listed caches
    tokio::select! {
        _ = cancel.cancelled() => {
            info!("Operator shutdown before caches synced");
            return Ok(());
        }
        synced = api.wait_until_ready() => synced?,
    }
    ready.store(true, Ordering::SeqCst);
    info!("Object caches synced, starting controller");

    let runner = ControllerRunner::new(Arc::new(controller), status, config.resync_interval());
    runner.run(triggers, cancel).await?;

    info!("Operator shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<OperatorConfig> {
    let mut config = match &args.config {
        Some(path) => OperatorConfig::load(path)?,
        None => OperatorConfig::default(),
    };

    if let Some(name) = &args.controller_name {
        config.controller_name = name.clone();
    }
    if let Some(server) = &args.vcenter_server {
        config.vcenter.server = Some(server.clone());
    }
    if let Some(username) = &args.vcenter_username {
        config.vcenter.username = username.clone();
    }
    if let Some(password) = &args.vcenter_password {
        config.vcenter.password = password.clone();
    }
    config.vcenter.insecure |= args.vcenter_insecure;

    config.validate()?;
    Ok(config)
}

/// Pump watcher changes into a single-slot channel.
///
/// Keeps the reflector caches moving while the controller is mid-tick and
/// folds a burst of changes into one pending tick.
fn coalesce(mut triggers: ChangeTriggers) -> mpsc::Receiver<()> {
    let (mut tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        while triggers.next().await.is_some() {
            if let Err(e) = tx.try_send(()) {
                if e.is_disconnected() {
                    break;
                }
            }
        }
    });
    rx
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Event Recorder
// =============================================================================

fn spawn_event_recorder(events: &EventBus, cancel: CancellationToken) {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = receiver.recv() => event,
            };
            match event {
                Ok(event) if event.is_warning() => warn!(reason = event.reason(), "{}", event),
                Ok(event) => info!(reason = event.reason(), "{}", event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event recorder lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let (status, body) = match req.uri().path() {
                        "/healthz" | "/livez" => (StatusCode::OK, "ok"),
                        "/readyz" if ready => (StatusCode::OK, "ok"),
                        "/readyz" => (StatusCode::SERVICE_UNAVAILABLE, "caches not synced"),
                        _ => (StatusCode::NOT_FOUND, "not found"),
                    };
                    let mut response = Response::new(Body::from(body));
                    *response.status_mut() = status;
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => {
                            let mut response = Response::new(Body::from(buffer));
                            if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
                                response.headers_mut().insert(CONTENT_TYPE, content_type);
                            }
                            response
                        }
                        Err(e) => {
                            let mut response = Response::new(Body::from(e.to_string()));
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            response
                        }
                    }
                }
                _ => {
                    let mut response = Response::new(Body::from("not found"));
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    response
                }
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
