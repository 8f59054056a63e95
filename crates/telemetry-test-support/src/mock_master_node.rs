//! A mock master `nodes_ws` endpoint for exercising a node bridge without a
//! real master process.
//!
//! Binds to a random port, accepts a single connection, and exposes the raw
//! uplinked text messages plus a way to push downlink command text back —
//! mirroring the wire format exactly (no envelope, unlike a tagged protocol).

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;

pub struct MockMasterNodeEndpoint {
    addr: SocketAddr,
    uplinks_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    downlink_tx: mpsc::UnboundedSender<String>,
    _task: JoinHandle<()>,
}

impl MockMasterNodeEndpoint {
    /// Start listening. The first inbound connection is treated as the node
    /// under test; later connections are ignored.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (uplink_tx, uplink_rx) = mpsc::unbounded_channel();
        let (downlink_tx, downlink_rx) = mpsc::unbounded_channel::<String>();

        let task = tokio::spawn(async move {
            if let Ok((stream, _peer)) = listener.accept().await {
                let _ = Self::handle_connection(stream, uplink_tx, downlink_rx).await;
            }
        });

        Ok(Self {
            addr,
            uplinks_rx: Mutex::new(uplink_rx),
            downlink_tx,
            _task: task,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the next uplinked text message (a `ReadingFrame` or
    /// `MetadataFrame`, or an error frame JSON text).
    pub async fn recv_uplink(&self) -> Option<String> {
        self.uplinks_rx.lock().await.recv().await
    }

    /// Push a CSV downlink command (`user,pin,value`) to the connected node.
    pub fn send_downlink(&self, text: impl Into<String>) {
        let _ = self.downlink_tx.send(text.into());
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        uplink_tx: mpsc::UnboundedSender<String>,
        mut downlink_rx: mpsc::UnboundedReceiver<String>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let _ = uplink_tx.send(text.to_string());
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => continue,
                        Some(Err(_)) => break,
                    }
                }
                cmd = downlink_rx.recv() => {
                    match cmd {
                        Some(text) => { write.send(Message::Text(text.into())).await?; }
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }
}
