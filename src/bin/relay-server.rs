//! Process entry point and supervisor (C14, §4.14): parses the control CLI
//! (§6), loads the configuration surface (C11), wires the connection
//! registry, relay worker pool, retry controller, file transfer engine, TLS
//! manager, session server, and proxy manager together, and drives the
//! two-phase shutdown (§5) on `ctrl_c` or an internal fault.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use config::ServerConfig;
use pool::{DynamicWorkerPool, Handler, OutboundEnvelope, PoolMonitorConfig, PriorityTable, RetryController};
use registry::{run_heartbeat_sweep, ConnectionRegistry, HeartbeatConfig};
use session::{OutboundRouter, RelayHandler, SessionServer};
use tokio_util::sync::CancellationToken;
use transfer::TransferManager;

/// Top-level error composing every subsystem's own taxonomy (§4.13) at the
/// one place that has to report a failure back to the operator's shell.
#[derive(Debug, thiserror::Error)]
enum ServerError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Session(#[from] session::SessionError),
    #[error(transparent)]
    Proxy(#[from] proxy::ProxyError),
}

/// Control CLI (§6): `start` runs the combined session server and proxy in
/// the foreground, which is the only mode a Rust rewrite needs; `install`,
/// `uninstall`, `stop`, and `restart` are recognized for operator muscle
/// memory but delegate to the host's own service manager (systemd unit,
/// Windows `sc`), since OS service registration is the externally-owned
/// lifecycle wrapper named out of scope in §1.
#[derive(Parser, Debug)]
#[command(name = "relay-server", author, version, about = "Session server and port-forwarding proxy", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase log verbosity (`-v` debug, `-vv` trace); default is info.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the session server and proxy in the foreground until interrupted.
    Start {
        /// Path to the `key = value` configuration file (§4.11, §6).
        #[arg(long, env = "RELAY_SERVER_CONFIG")]
        config: std::path::PathBuf,

        /// Grace period given to in-flight work during shutdown.
        #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64))]
        shutdown_grace_secs: u64,
    },
    /// Print a one-line summary of whether a config file parses cleanly.
    Status {
        #[arg(long, env = "RELAY_SERVER_CONFIG")]
        config: std::path::PathBuf,
    },
    /// Register the service with the host's service manager (delegated).
    Install,
    /// Unregister the service from the host's service manager (delegated).
    Uninstall,
    /// Stop the running service via the host's service manager (delegated).
    Stop,
    /// Restart the service via the host's service manager (delegated).
    Restart,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to start tokio runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "relay-server exiting with an error");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("relay_server={default_level},session={default_level},proxy={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn dispatch(command: Command) -> Result<(), ServerError> {
    match command {
        Command::Start { config, shutdown_grace_secs } => {
            let server_config = ServerConfig::load(&config)?;
            run(server_config, Duration::from_secs(shutdown_grace_secs)).await
        }
        Command::Status { config } => {
            match ServerConfig::load(&config) {
                Ok(server_config) => {
                    println!(
                        "relay-server: config {:?} OK ({} endpoint(s), service {:?})",
                        config, server_config.endpoints.len(), server_config.service_name
                    );
                    Ok(())
                }
                Err(error) => {
                    println!("relay-server: config {config:?} INVALID: {error}");
                    Err(ServerError::Config(error))
                }
            }
        }
        Command::Install => Ok(delegate_to_service_manager("install")),
        Command::Uninstall => Ok(delegate_to_service_manager("uninstall")),
        Command::Stop => Ok(delegate_to_service_manager("stop")),
        Command::Restart => Ok(delegate_to_service_manager("restart")),
    }
}

fn delegate_to_service_manager(action: &str) {
    println!(
        "relay-server: {action} is managed by the host's own service manager \
         (systemd unit / Windows `sc`), not by this binary; see the deployment docs."
    );
}

/// Builds every collaborator, starts the session server and proxy manager,
/// waits for `ctrl_c`, then drives the two-phase shutdown described in §5.
async fn run(server_config: ServerConfig, shutdown_grace: Duration) -> Result<(), ServerError> {
    tracing::info!(
        service = %server_config.service_name,
        session_bind = %server_config.session_bind,
        endpoints = server_config.endpoints.len(),
        "starting relay-server"
    );

    let cancel = CancellationToken::new();

    let registry = Arc::new(ConnectionRegistry::new(server_config.file_root.clone()));
    let transfer = Arc::new(TransferManager::new(server_config.file_root.clone()));
    let priority_table = PriorityTable::from_host();

    let router = Arc::new(OutboundRouter::new());
    let retry = Arc::new(RetryController::new(priority_table));
    let relay_handler = RelayHandler::new(Arc::clone(&router), Arc::clone(&retry), cancel.clone());
    let relay_pool: Arc<DynamicWorkerPool<OutboundEnvelope>> = DynamicWorkerPool::spawn(
        priority_table,
        Arc::clone(&relay_handler) as Arc<dyn Handler<OutboundEnvelope>>,
        PoolMonitorConfig::default(),
        cancel.clone(),
    );
    relay_handler.bind_pool(Arc::clone(&relay_pool));

    let session_server = SessionServer::build(
        &server_config,
        Arc::clone(&registry),
        Arc::clone(&transfer),
        Arc::clone(&relay_pool),
        Arc::clone(&router),
    )?;
    let session_handle = session_server.start(cancel.clone()).await?;

    let heartbeat_config = HeartbeatConfig {
        timeout: server_config.heartbeat_timeout,
        sweep_interval: server_config.heartbeat_timeout / 3,
    };
    let heartbeat_handle = tokio::spawn(run_heartbeat_sweep(Arc::clone(&registry), heartbeat_config, cancel.clone()));

    let zone_map = match &server_config.zone_map_path {
        Some(path) => Some(Arc::new(config::ZoneMap::load(path)?)),
        None => None,
    };
    let proxy_manager = Arc::new(proxy::ProxyManager::build(&server_config, zone_map)?);
    proxy_manager.start().await?;

    tracing::info!("relay-server ready");

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to install ctrl_c handler, shutting down immediately");
    } else {
        tracing::info!("shutdown signal received");
    }

    shutdown(cancel, session_handle, heartbeat_handle, relay_pool, proxy_manager, shutdown_grace).await;
    Ok(())
}

/// Two-phase shutdown (§5): signal cancellation so no task starts new work,
/// then wait up to `grace` for everything in flight to drain before
/// returning (hard close is whatever each subsystem's own `shutdown`/`stop`
/// does once its grace period elapses).
async fn shutdown(
    cancel: CancellationToken,
    session_handle: tokio::task::JoinHandle<()>,
    heartbeat_handle: tokio::task::JoinHandle<()>,
    relay_pool: Arc<DynamicWorkerPool<OutboundEnvelope>>,
    proxy_manager: Arc<proxy::ProxyManager>,
    grace: Duration,
) {
    cancel.cancel();

    proxy_manager.stop(grace).await;
    relay_pool.shutdown(grace).await;

    if tokio::time::timeout(grace, session_handle).await.is_err() {
        tracing::warn!("session listener did not stop within the shutdown grace period");
    }
    if tokio::time::timeout(grace, heartbeat_handle).await.is_err() {
        tracing::warn!("heartbeat sweep did not stop within the shutdown grace period");
    }

    tracing::info!("relay-server shut down cleanly");
}
