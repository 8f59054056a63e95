//! The `/client_ws` endpoint (C4): browser dashboards watch the snapshot
//! broadcast and can send pin-actuation commands that are forwarded
//! verbatim to every connected node.

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::state::AppState;

pub async fn ws_clients_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client_socket(socket, state, remote_addr))
}

async fn handle_client_socket(mut socket: WebSocket, state: AppState, remote_addr: SocketAddr) {
    let addr_key = remote_addr.to_string();
    let mut broadcast_rx = state.register_client(addr_key.clone()).await;
    info!(%remote_addr, "client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        state.forward_client_message(&text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%remote_addr, error = %err, "client socket error");
                        break;
                    }
                }
            }
            outgoing = broadcast_rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.unregister_client(&addr_key).await;
    info!(%remote_addr, "client disconnected");
}
