//! The serial session state machine and its `poll` primitive.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};
use tracing::{debug, info, warn};

use crate::discovery::{discover_port, DEFAULT_DEVICE_SUBSTRINGS};
use crate::error::SerialSessionError;

const BAUD_RATE: u32 = 115_200;

/// `Uninitialized -> Opening -> Ready <-> Polling -> Closed`. Any I/O fault
/// while `Polling` transitions straight to `Closed`; recovery is by
/// constructing a new [`SerialSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Opening,
    Ready,
    Polling,
    Closed,
}

/// Construction-time configuration for a [`SerialSession`].
#[derive(Debug, Clone)]
pub struct SerialSessionConfig {
    /// Explicit device path. `None` triggers auto-discovery.
    pub port: Option<String>,
    /// Poll window; also used as the port's read/write timeout.
    pub poll_timeout: Duration,
    /// Overlay relaxed hardware flow control, matching the test emulator's
    /// expected line settings rather than the device's own.
    pub emulate: bool,
    /// Substrings used by auto-discovery when `port` is `None`.
    pub device_substrings: Vec<String>,
}

impl Default for SerialSessionConfig {
    fn default() -> Self {
        SerialSessionConfig {
            port: None,
            poll_timeout: Duration::from_secs(1),
            emulate: false,
            device_substrings: DEFAULT_DEVICE_SUBSTRINGS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }
}

/// The `poll` primitive, lifted out as a trait so the node bridge can be
/// exercised against a fake transport in tests without a real serial port.
pub trait PollSource: Send {
    fn poll(&mut self, command_byte: u8) -> Result<Option<(f64, Vec<f64>)>, SerialSessionError>;
    fn close(&mut self);
}

/// Owns one serial port and exposes the blocking `poll` primitive described
/// in the component design for the serial session.
pub struct SerialSession {
    config: SerialSessionConfig,
    state: SessionState,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialSession {
    pub fn new(config: SerialSessionConfig) -> Self {
        SerialSession {
            config,
            state: SessionState::Uninitialized,
            port: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Resolve the configured or auto-discovered port and open it with the
    /// instrument's line settings. Transitions `Uninitialized -> Opening ->
    /// Ready`, or `-> Closed` on failure.
    pub fn open(&mut self) -> Result<(), SerialSessionError> {
        self.state = SessionState::Opening;
        let path = match &self.config.port {
            Some(p) => p.clone(),
            None => {
                let substrings: Vec<&str> =
                    self.config.device_substrings.iter().map(String::as_str).collect();
                discover_port(&substrings)?
            }
        };
        debug!(port = %path, emulate = self.config.emulate, "opening serial port");

        let flow_control = if self.config.emulate {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        let port = serialport::new(&path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(flow_control)
            .timeout(self.config.poll_timeout)
            .open()
            .map_err(|e| SerialSessionError::Io(e.to_string()))?;

        self.port = Some(port);
        self.state = SessionState::Ready;
        info!(port = %path, "serial session ready");
        Ok(())
    }

    /// Write one actuation byte, read one reply line, and return the parsed
    /// `(timestamp, channels)` pair, `None` for a transient empty line, or
    /// [`SerialSessionError::ConnectionLost`] on any I/O or parse failure.
    ///
    /// On `ConnectionLost` the port is closed (state becomes `Closed`); the
    /// caller must construct a new session to recover.
    pub fn poll(&mut self, command_byte: u8) -> Result<Option<(f64, Vec<f64>)>, SerialSessionError> {
        if self.state != SessionState::Ready {
            return Err(SerialSessionError::ConnectionLost);
        }
        self.state = SessionState::Polling;

        let result = self.poll_inner(command_byte);

        match &result {
            Ok(_) => self.state = SessionState::Ready,
            Err(SerialSessionError::ConnectionLost) => self.close(),
            Err(_) => self.state = SessionState::Ready,
        }
        result
    }

    fn poll_inner(&mut self, command_byte: u8) -> Result<Option<(f64, Vec<f64>)>, SerialSessionError> {
        let port = self.port.as_mut().ok_or(SerialSessionError::ConnectionLost)?;

        port.write_all(&[command_byte]).map_err(|e| {
            warn!(error = %e, "serial write failed");
            SerialSessionError::ConnectionLost
        })?;

        let line = read_line(port.as_mut()).map_err(|e| {
            warn!(error = %e, "serial read failed");
            SerialSessionError::ConnectionLost
        })?;

        parse_line(&line)
    }

    /// Drain buffers and close the port. Idempotent.
    pub fn close(&mut self) {
        if let Some(port) = self.port.as_mut() {
            let _ = port.clear(ClearBuffer::All);
        }
        self.port = None;
        self.state = SessionState::Closed;
    }
}

impl PollSource for SerialSession {
    fn poll(&mut self, command_byte: u8) -> Result<Option<(f64, Vec<f64>)>, SerialSessionError> {
        SerialSession::poll(self, command_byte)
    }

    fn close(&mut self) {
        SerialSession::close(self);
    }
}

/// Read bytes one at a time until a line-feed or a read timeout. Returns
/// whatever was accumulated (possibly empty) rather than erroring on
/// timeout — the caller decides whether an empty/short line is transient.
fn read_line(port: &mut dyn serialport::SerialPort) -> std::io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match port.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => return Err(e),
        }
    }
    Ok(line)
}

/// Parse one reply line: comma-separated timestamp + channel samples,
/// trailing empty field trimmed. Pure and IO-free so it can be exercised
/// directly against the boundary cases in the component's testable
/// properties.
pub fn parse_line(line: &[u8]) -> Result<Option<(f64, Vec<f64>)>, SerialSessionError> {
    let text = std::str::from_utf8(line).map_err(|_| SerialSessionError::ConnectionLost)?;
    let trimmed = text.trim_end_matches(['\r', '\n']);
    let mut fields: Vec<&str> = trimmed.split(',').collect();
    if fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    if fields.len() < 2 {
        return Ok(None);
    }

    let mut values = Vec::with_capacity(fields.len());
    for field in &fields {
        let parsed: f64 = field.parse().map_err(|_| SerialSessionError::ConnectionLost)?;
        values.push(parsed);
    }
    let timestamp = values.remove(0);
    Ok(Some((timestamp, values)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_line_yields_none_not_error() {
        assert_eq!(parse_line(b"").unwrap(), None);
        assert_eq!(parse_line(b"\n").unwrap(), None);
    }

    #[test]
    fn single_field_yields_none() {
        assert_eq!(parse_line(b"1700000000.0,\n").unwrap(), None);
    }

    #[test]
    fn trims_trailing_empty_field_and_splits() {
        let (timestamp, channels) = parse_line(b"1700000000.0,512,1024,\n").unwrap().unwrap();
        assert_eq!(timestamp, 1_700_000_000.0);
        assert_eq!(channels, vec![512.0, 1024.0]);
    }

    #[test]
    fn non_numeric_field_is_connection_lost() {
        assert!(matches!(
            parse_line(b"garbage,not_a_number,\n"),
            Err(SerialSessionError::ConnectionLost)
        ));
    }

    #[test]
    fn fresh_session_starts_uninitialized() {
        let session = SerialSession::new(SerialSessionConfig::default());
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[test]
    fn polling_before_open_is_connection_lost() {
        let mut session = SerialSession::new(SerialSessionConfig::default());
        assert!(matches!(
            session.poll(crate::encoding::HEARTBEAT),
            Err(SerialSessionError::ConnectionLost)
        ));
    }
}
