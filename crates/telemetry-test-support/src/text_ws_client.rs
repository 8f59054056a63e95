//! A plain-text WebSocket client for driving the master's endpoints in
//! tests, standing in for a browser client or a node.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TextWsClient {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl TextWsClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Text(text.into().into())).await?;
        Ok(())
    }

    /// Read the next text frame, skipping ping/pong control frames.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Some(text.to_string()),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return None,
            }
        }
    }

    pub async fn close(&mut self) {
        let _ = self.write.send(Message::Close(None)).await;
    }
}
