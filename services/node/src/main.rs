use std::time::Duration;

use node::bridge::BridgeConfig;
use node::error::NodeError;
use serial_session::SerialSessionConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    let args = node::cli::parse_args().unwrap_or_else(|err| {
        eprintln!("FATAL: {err}");
        std::process::exit(1);
    });

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_cancel.cancel();
    });

    let bridge_config = BridgeConfig {
        websocket_url: args.websocket.clone(),
        label: args.reference.clone(),
    };
    let serial_config = SerialSessionConfig {
        port: args.arduport.clone(),
        poll_timeout: Duration::from_secs(1),
        emulate: args.emulate,
        ..SerialSessionConfig::default()
    };

    info!(label = %args.reference, websocket = %args.websocket, "node bridge starting");

    match node::bridge::run(bridge_config, serial_config, cancel).await {
        Ok(()) => {
            info!("node bridge shut down gracefully");
        }
        Err(NodeError::DeviceNotFound(msg)) => {
            eprintln!("FATAL: {msg}");
            std::process::exit(1);
        }
        Err(err) => {
            tracing::error!(error = %err, "node bridge exited with an error");
            std::process::exit(1);
        }
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger cancellation.
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
