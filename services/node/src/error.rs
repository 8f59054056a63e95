use thiserror::Error;

/// The node bridge's error taxonomy (§7). `DeviceNotFound` is fatal at
/// startup; every other variant is handled by a retry loop somewhere in
/// `bridge.rs` and never reaches `main`.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("serial device not found: {0}")]
    DeviceNotFound(String),

    #[error("serial connection lost")]
    ConnectionLost,

    #[error("could not reach master: {0}")]
    HostConnectionError(String),

    #[error("frame parse error: {0}")]
    FrameParseError(String),

    #[error("invalid node configuration: {0}")]
    ConfigError(String),

    #[error("interrupted")]
    Interrupted,
}

impl From<serial_session::SerialSessionError> for NodeError {
    fn from(err: serial_session::SerialSessionError) -> Self {
        match err {
            serial_session::SerialSessionError::DeviceNotFound => {
                NodeError::DeviceNotFound("no matching serial port found".to_owned())
            }
            serial_session::SerialSessionError::ConnectionLost => NodeError::ConnectionLost,
            other => NodeError::ConfigError(other.to_string()),
        }
    }
}
