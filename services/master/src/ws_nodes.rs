//! The `/nodes_ws` endpoint (C4): one connection per instrument node.

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use std::net::SocketAddr;
use telemetry_protocol::{parse_node_uplink, NodeUplinkFrame};
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

pub async fn ws_nodes_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_node_socket(socket, state, remote_addr))
}

async fn handle_node_socket(mut socket: WebSocket, state: AppState, remote_addr: SocketAddr) {
    let id = Uuid::new_v4().simple().to_string();
    let mut downlink_rx = state.register_node(id.clone(), remote_addr.to_string()).await;
    info!(node_id = %id, %remote_addr, "node connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_uplink_text(&state, &id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(node_id = %id, error = %err, "node socket error");
                        break;
                    }
                }
            }
            downlink = downlink_rx.recv() => {
                match downlink {
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

    state.record_disconnect_metadata(&id).await;
    state.unregister_node(&id).await;
    info!(node_id = %id, "node disconnected");
}

async fn handle_uplink_text(state: &AppState, id: &str, text: &str) {
    match parse_node_uplink(text) {
        Ok(NodeUplinkFrame::Reading(frame)) => {
            state.record_reading(id, frame).await;
        }
        Ok(NodeUplinkFrame::Metadata(frame)) => {
            state.record_metadata(id, frame).await;
        }
        Err(err) => {
            warn!(node_id = %id, error = %err, raw = %text, "dropped malformed uplink frame");
        }
    }
}
