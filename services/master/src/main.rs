use std::net::SocketAddr;
use std::time::Duration;

use master::state::MasterConfig;
use master::store::Store;
use master::{build_router, AppState, MasterError};
use tracing::info;

#[tokio::main]
async fn main() {
    let args = master::cli::parse_args();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    if let Err(err) = run(args).await {
        tracing::error!(error = %err, "master exited with an error");
        std::process::exit(1);
    }
}

async fn run(args: master::cli::CliArgs) -> Result<(), MasterError> {
    let store = match &args.db_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            info!(db_path = %path.display(), "opening store");
            Store::open(path)?
        }
        None => {
            info!("running with an in-memory store, readings will not survive a restart");
            Store::open_in_memory()?
        }
    };
    store.integrity_check()?;

    let config = MasterConfig {
        bind: args.bind.clone(),
        db_path: args.db_path.clone(),
        broadcast_period_ms: args.periodicity_ms,
        persist_period_ms: args.database_periodicity_ms,
    };
    let state = AppState::new(store, config);

    tokio::spawn(master::ticks::run_broadcast_tick(
        state.clone(),
        Duration::from_millis(args.periodicity_ms),
    ));
    tokio::spawn(master::ticks::run_persist_tick(
        state.clone(),
        Duration::from_millis(args.database_periodicity_ms),
    ));

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .map_err(|source| MasterError::Bind {
            addr: args.bind.clone(),
            source,
        })?;
    info!(addr = %args.bind, "master listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(MasterError::Serve)?;

    info!("master shut down gracefully");
    Ok(())
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
