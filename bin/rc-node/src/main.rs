//! Redundancy Node
//!
//! Runs the redundancy controller for one process instance and gates a work
//! loop on the controller's decision:
//! - Reads and renews the shared record in MongoDB
//! - Serves `/health` and `/status` for supervisors
//! - Exits with a non-zero code when the record disables or excludes this node
//!
//! ## Usage
//!
//! ```text
//! rc-node [INSTANCE] [LOG_LEVEL] [CONFIG_FILE]
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `REDUNDANCY_CONFIG` | - | Config file path |
//! | `RC_NODE_NAME` / `NODE_NAME` | - | Node identity |
//! | `RC_PROCESS_NAME` | `RC_NODE` | Process name of the record key |
//! | `RC_INSTANCE` | `1` | Instance number of the record key |
//! | `RC_MONGODB_URI` | `mongodb://localhost:27017` | MongoDB connection URL |
//! | `RC_MONGODB_DATABASE` | `json_scada` | MongoDB database name |
//! | `RC_HTTP_PORT` | `9090` | Health/status port |
//! | `RC_LOG_LEVEL` | `1` | Default log level (0-3) when `RUST_LOG` is unset |
//! | `LOG_FORMAT` | `text` | `json` for structured output |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use mongodb::options::ClientOptions;
use serde::Serialize;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use rc_config::{AppConfig, ConfigLoader, RedundancySection};
use rc_standby::{
    MongoInstanceStore, RedundancyConfig, RedundancyController, RedundancyStatus, StandbyGuard,
};

const SERVICE_NAME: &str = "rc-node";

/// Redundancy node: active/standby control for one process instance
#[derive(Parser, Debug)]
#[command(name = "rc-node", version, about)]
struct Args {
    /// Instance number, overrides the configuration
    instance: Option<i32>,

    /// Log level 0-3 used when RUST_LOG is unset
    #[arg(env = "RC_LOG_LEVEL")]
    log_level: Option<u8>,

    /// Configuration file
    config: Option<PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    print_config: bool,
}

/// Shared state for the HTTP handlers
#[derive(Clone)]
struct AppState {
    controller: Arc<RedundancyController>,
    work_cycles: Arc<AtomicU64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    node_name: String,
    process_name: String,
    instance_number: i32,
    status: String,
    is_active: bool,
    running: bool,
    work_cycles: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", AppConfig::example_toml());
        return Ok(());
    }

    rc_common::logging::init_logging_with_level(SERVICE_NAME, args.log_level.unwrap_or(1));
    info!("Starting Redundancy Node");

    let loader = match &args.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = loader.load().context("failed to load configuration")?;
    if let Some(instance) = args.instance {
        config.redundancy.instance_number = instance;
    }
    config.validate()?;

    let redundancy = redundancy_config(&config.redundancy);
    info!(
        node_name = %redundancy.node_name,
        process_name = %redundancy.process_name,
        instance = redundancy.instance_number,
        failover_window = ?redundancy.failover_window(),
        "Redundancy configuration loaded"
    );

    // Connect to MongoDB
    info!("Connecting to MongoDB: {}/{}", config.mongodb.uri, config.mongodb.database);
    let mut options = ClientOptions::parse(&config.mongodb.uri).await?;
    options.app_name = Some(app_name(&redundancy));
    let client = mongodb::Client::with_options(options)?;
    let db = client.database(&config.mongodb.database);

    let store = Arc::new(MongoInstanceStore::with_collection(&db, &config.mongodb.collection));
    if config.mongodb.ensure_indexes {
        if let Err(e) = store.ensure_indexes().await {
            warn!(error = %e, "Failed to ensure process instance index, continuing");
        }
    }

    let controller = Arc::new(RedundancyController::new(redundancy, store)?);
    let mut controller_handle = controller.clone().start()?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let work_cycles = Arc::new(AtomicU64::new(0));

    let work_handle = spawn_work_loop(
        StandbyGuard::new(controller.clone()),
        work_cycles.clone(),
        shutdown_tx.subscribe(),
    );

    let http_handle = if config.http.enabled {
        let state = AppState {
            controller: controller.clone(),
            work_cycles: work_cycles.clone(),
        };
        let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port)
            .parse()
            .context("invalid http host/port")?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Status server listening on http://{}/status", addr);

        let mut shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            axum::serve(listener, router(state))
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
                .ok();
        }))
    } else {
        None
    };

    info!("Redundancy Node started");

    // Either an operator stops us or the controller ends on its own
    let stopped = tokio::select! {
        _ = shutdown_signal() => None,
        result = &mut controller_handle => Some(result),
    };
    let outcome = match stopped {
        Some(result) => result,
        None => {
            info!("Shutdown signal received...");
            controller.shutdown();
            controller_handle.await
        }
    };

    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        let _ = work_handle.await;
        if let Some(handle) = http_handle {
            let _ = handle.await;
        }
    })
    .await;

    match outcome {
        Ok(Ok(())) => {
            info!("Redundancy Node shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Redundancy controller stopped, exiting");
            Err(e.into())
        }
        Err(e) => Err(anyhow::anyhow!("redundancy controller task failed: {}", e)),
    }
}

/// Convert the `[redundancy]` section into the controller's configuration.
fn redundancy_config(section: &RedundancySection) -> RedundancyConfig {
    let software_version = if section.software_version.trim().is_empty() {
        env!("CARGO_PKG_VERSION").to_string()
    } else {
        section.software_version.clone()
    };

    RedundancyConfig::new(&section.node_name, &section.process_name)
        .with_instance_number(section.instance_number)
        .with_poll_interval(Duration::from_secs(section.poll_interval_secs))
        .with_stale_poll_limit(section.stale_poll_limit)
        .with_software_version(software_version)
}

/// Application name reported to MongoDB, visible in server-side connection listings.
fn app_name(config: &RedundancyConfig) -> String {
    format!(
        "{} Version:{} Instance:{}",
        config.process_name, config.software_version, config.instance_number
    )
}

fn status_label(status: RedundancyStatus) -> String {
    match status {
        RedundancyStatus::Starting => "STARTING".to_string(),
        RedundancyStatus::Active => "ACTIVE".to_string(),
        RedundancyStatus::Standby => "STANDBY".to_string(),
        RedundancyStatus::Terminated(reason) => format!("TERMINATED: {}", reason),
    }
}

/// Host work, only done while this node is active.
fn spawn_work_loop(
    guard: StandbyGuard,
    work_cycles: Arc<AtomicU64>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut was_active = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ran = guard
                        .run_if_active(|| async {
                            work_cycles.fetch_add(1, Ordering::Relaxed);
                        })
                        .await
                        .is_some();

                    if ran != was_active {
                        if ran {
                            info!("Work loop resumed, node is active");
                        } else {
                            info!("Work loop paused, node is standby");
                        }
                        was_active = ran;
                    } else if !ran {
                        debug!("Standby, skipping work cycle");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Work loop shutting down");
                    return;
                }
            }
        }
    })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    if state.controller.is_running() {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "UP",
                "version": env!("CARGO_PKG_VERSION")
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "DOWN",
                "reason": status_label(state.controller.status())
            })),
        )
    }
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let config = state.controller.config();
    Json(StatusResponse {
        node_name: config.node_name.clone(),
        process_name: config.process_name.clone(),
        instance_number: config.instance_number,
        status: status_label(state.controller.status()),
        is_active: state.controller.is_active(),
        running: state.controller.is_running(),
        work_cycles: state.work_cycles.load(Ordering::Relaxed),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_standby::{FatalReason, InMemoryInstanceStore};

    fn test_state(node: &str) -> AppState {
        let store = Arc::new(InMemoryInstanceStore::new());
        let config = RedundancyConfig::new(node, "CS_CUSTOM_PROCESSOR").with_instance_number(2);
        AppState {
            controller: Arc::new(RedundancyController::new(config, store).unwrap()),
            work_cycles: Arc::new(AtomicU64::new(0)),
        }
    }

    #[test]
    fn test_positional_arguments() {
        let args = Args::try_parse_from(["rc-node", "2", "3", "/etc/rc/node.toml"]).unwrap();
        assert_eq!(args.instance, Some(2));
        assert_eq!(args.log_level, Some(3));
        assert_eq!(args.config, Some(PathBuf::from("/etc/rc/node.toml")));
        assert!(!args.print_config);
    }

    #[test]
    fn test_arguments_are_optional() {
        let args = Args::try_parse_from(["rc-node"]).unwrap();
        assert_eq!(args.instance, None);
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_redundancy_config_from_section() {
        let section = RedundancySection {
            node_name: "scada-a".to_string(),
            process_name: "CS_CUSTOM_PROCESSOR".to_string(),
            instance_number: 3,
            poll_interval_secs: 2,
            stale_poll_limit: 6,
            software_version: String::new(),
        };

        let config = redundancy_config(&section);
        assert_eq!(config.node_name, "scada-a");
        assert_eq!(config.instance_number, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.stale_poll_limit, 6);
        assert_eq!(config.software_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_large_stale_poll_limit_does_not_overflow_failover_window() {
        let section = RedundancySection {
            node_name: "scada-a".to_string(),
            stale_poll_limit: u32::MAX,
            ..RedundancySection::default()
        };

        let config = redundancy_config(&section);
        assert!(config.validate().is_ok());
        assert!(config.failover_window() >= Duration::from_secs(u64::from(u32::MAX)));
    }

    #[test]
    fn test_app_name() {
        let config = RedundancyConfig::new("scada-a", "CS_CUSTOM_PROCESSOR")
            .with_instance_number(2)
            .with_software_version("0.1.3");
        assert_eq!(app_name(&config), "CS_CUSTOM_PROCESSOR Version:0.1.3 Instance:2");
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label(RedundancyStatus::Active), "ACTIVE");
        assert_eq!(status_label(RedundancyStatus::Standby), "STANDBY");
        assert!(status_label(RedundancyStatus::Terminated(FatalReason::Disabled)).starts_with("TERMINATED"));
    }

    #[tokio::test]
    async fn test_status_handler_reports_controller() {
        let state = test_state("scada-a");
        state.controller.poll_once().await.unwrap();
        state.controller.poll_once().await.unwrap();

        let Json(status) = status_handler(State(state)).await;
        assert_eq!(status.node_name, "scada-a");
        assert_eq!(status.instance_number, 2);
        assert_eq!(status.status, "ACTIVE");
        assert!(status.is_active);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_health_is_down_until_started() {
        let state = test_state("scada-a");
        let (code, _) = health_handler(State(state.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        let handle = state.controller.clone().start().unwrap();
        let (code, _) = health_handler(State(state.clone())).await;
        assert_eq!(code, StatusCode::OK);

        state.controller.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_loop_runs_only_while_active() {
        let state = test_state("scada-a");
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let work = spawn_work_loop(
            StandbyGuard::new(state.controller.clone()),
            state.work_cycles.clone(),
            shutdown_tx.subscribe(),
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(state.work_cycles.load(Ordering::Relaxed), 0);

        state.controller.poll_once().await.unwrap();
        state.controller.poll_once().await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(state.work_cycles.load(Ordering::Relaxed) >= 2);

        shutdown_tx.send(()).unwrap();
        work.await.unwrap();
    }
}
