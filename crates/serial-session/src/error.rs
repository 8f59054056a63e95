use thiserror::Error;

/// Errors raised by [`crate::SerialSession`].
#[derive(Debug, Error)]
pub enum SerialSessionError {
    /// No configured or discoverable serial port matched. Fatal at node
    /// startup — the operator needs to plug the device in.
    #[error("no serial device found; plug in the instrument and retry")]
    DeviceNotFound,

    /// A poll's write or read failed, or returned a line that didn't parse
    /// as numeric CSV. The session is closed; a new one must be constructed.
    #[error("serial connection lost")]
    ConnectionLost,

    /// The requested pin is outside the range the single-byte actuation
    /// encoding can represent.
    #[error("pin {0} exceeds the maximum addressable pin ({})", crate::encoding::MAX_PIN)]
    PinOutOfRange(u8),

    /// Underlying I/O failure opening or configuring the port.
    #[error("serial I/O error: {0}")]
    Io(String),
}
