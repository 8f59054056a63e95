//! The node's uplink WebSocket session (half of C2): a thin client around
//! `tokio-tungstenite`, adapted from the sibling forwarder's `UplinkSession`
//! for this protocol's untagged text frames instead of a tagged envelope —
//! there is no hello/heartbeat handshake here, just connect-then-stream.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::debug;

use crate::error::NodeError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// An open WebSocket session to the master's `/nodes_ws` endpoint.
pub struct UplinkSession {
    ws: WsStream,
}

impl UplinkSession {
    pub async fn connect(url: &str) -> Result<Self, NodeError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| NodeError::HostConnectionError(e.to_string()))?;
        Ok(UplinkSession { ws })
    }

    pub async fn send_text(&mut self, text: String) -> Result<(), NodeError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| NodeError::HostConnectionError(e.to_string()))
    }

    /// Receives the next text message, silently replying to pings. Returns
    /// `Ok(None)` on a clean close, matching the read loop's `null`/EOF
    /// contract (§4.2).
    pub async fn recv_text(&mut self) -> Result<Option<String>, NodeError> {
        loop {
            match self.ws.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(NodeError::HostConnectionError(e.to_string())),
                Some(Ok(Message::Text(t))) => return Ok(Some(t.to_string())),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                    continue;
                }
                Some(Ok(_)) => continue,
            }
        }
    }

    pub async fn close(&mut self) {
        debug!("closing uplink session");
        let _ = self.ws.close(None).await;
    }
}
