pub mod cli;
pub mod error;
pub mod hub;
pub mod state;
pub mod status;
pub mod store;
pub mod ticks;
pub mod ws_clients;
pub mod ws_nodes;

pub use error::MasterError;
pub use state::{AppState, MasterConfig};

use axum::routing::get;
use axum::Router;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/nodes_ws", get(ws_nodes::ws_nodes_handler))
        .route("/client_ws", get(ws_clients::ws_clients_handler))
        .route("/status", get(status::status_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
