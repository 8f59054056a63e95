//! The node bridge (C2): owns one serial session and one uplink WebSocket
//! session, translates between them, and survives both kinds of disconnect
//! independently (spec.md §4.2).
//!
//! Serial acquisition is abstracted behind [`SerialFactory`] rather than
//! calling `SerialSession::open` directly, so the read loop can be driven
//! against `telemetry-test-support`'s `FakePollSource` in tests instead of
//! a real port.

use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use serial_session::{encode, PollSource, SerialSession, SerialSessionConfig, SerialSessionError};
use telemetry_protocol::{parse_downlink_command, ReadingFrame};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::metadata;
use crate::retry::{sleep_or_cancelled, SERIAL_RETRY_DELAY, UPLINK_RETRY_DELAY};
use crate::units;
use crate::uplink::UplinkSession;

/// Constructs a fresh [`PollSource`]. The production implementation opens a
/// real serial port; tests supply one that hands back a scripted fake.
pub trait SerialFactory: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn PollSource>, SerialSessionError>;
}

/// Opens a real [`SerialSession`] per acquisition attempt.
pub struct RealSerialFactory(pub SerialSessionConfig);

impl SerialFactory for RealSerialFactory {
    fn acquire(&self) -> Result<Box<dyn PollSource>, SerialSessionError> {
        let mut session = SerialSession::new(self.0.clone());
        session.open()?;
        Ok(Box::new(session))
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub websocket_url: String,
    pub label: String,
}

/// Runs the bridge against a real serial port until `cancel` fires or
/// startup hits a fatal [`NodeError::DeviceNotFound`].
pub async fn run(
    config: BridgeConfig,
    serial_config: SerialSessionConfig,
    cancel: CancellationToken,
) -> Result<(), NodeError> {
    run_with_factory(config, Arc::new(RealSerialFactory(serial_config)), cancel).await
}

/// Whether the bridge currently has a usable serial connection.
enum SerialSlot {
    Open(Box<dyn PollSource>),
    Closed { last_attempt: Option<Instant> },
}

impl SerialSlot {
    fn closed() -> Self {
        SerialSlot::Closed { last_attempt: None }
    }
}

/// Same as [`run`], but takes an injectable [`SerialFactory`].
pub async fn run_with_factory(
    config: BridgeConfig,
    factory: Arc<dyn SerialFactory>,
    cancel: CancellationToken,
) -> Result<(), NodeError> {
    let mut serial = acquire_initial_serial(&factory, &cancel).await?;

    while !cancel.is_cancelled() {
        let Some(mut uplink) = connect_uplink_with_retry(&config.websocket_url, &cancel).await else {
            break;
        };

        let meta = metadata::build(&config.label);
        let meta_json = serde_json::to_string(&meta.as_wire()).unwrap_or_default();
        if let Err(err) = uplink.send_text(meta_json).await {
            warn!(error = %err, "failed to uplink metadata after connect, reconnecting");
            continue;
        }
        info!(label = %config.label, url = %config.websocket_url, "uplinked metadata, entering read loop");

        run_read_loop(&config, &mut uplink, &mut serial, &factory, &cancel).await;
        uplink.close().await;
    }

    if let SerialSlot::Open(mut source) = serial {
        source.close();
    }
    Ok(())
}

/// Acquire the serial session once at startup. A [`SerialSessionError::DeviceNotFound`]
/// is fatal (spec.md §7); any other open failure (e.g. the port existing but
/// busy) retries with a fixed delay instead.
async fn acquire_initial_serial(
    factory: &Arc<dyn SerialFactory>,
    cancel: &CancellationToken,
) -> Result<SerialSlot, NodeError> {
    loop {
        match factory.acquire() {
            Ok(source) => return Ok(SerialSlot::Open(source)),
            Err(SerialSessionError::DeviceNotFound) => {
                return Err(NodeError::DeviceNotFound(
                    "no matching serial port found; plug in the instrument and retry".to_owned(),
                ));
            }
            Err(err) => {
                warn!(error = %err, "serial port open failed, retrying");
                if sleep_or_cancelled(SERIAL_RETRY_DELAY, cancel).await {
                    return Err(NodeError::Interrupted);
                }
            }
        }
    }
}

async fn connect_uplink_with_retry(url: &str, cancel: &CancellationToken) -> Option<UplinkSession> {
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match UplinkSession::connect(url).await {
            Ok(session) => return Some(session),
            Err(err) => {
                warn!(error = %err, %url, "could not reach master, retrying");
                if sleep_or_cancelled(UPLINK_RETRY_DELAY, cancel).await {
                    return None;
                }
            }
        }
    }
}

/// Reads uplink messages until the master disconnects, the connection
/// errors, or `cancel` fires; a lost serial connection is handled
/// internally without returning from this loop, matching spec.md §4.2's
/// "enter a serial reconnect sub-loop without dropping the WebSocket".
async fn run_read_loop(
    config: &BridgeConfig,
    uplink: &mut UplinkSession,
    serial: &mut SerialSlot,
    factory: &Arc<dyn SerialFactory>,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            incoming = uplink.recv_text() => {
                match incoming {
                    Ok(None) => {
                        info!("master closed the uplink, reconnecting");
                        return;
                    }
                    Ok(Some(text)) => {
                        handle_downlink_text(config, &text, uplink, serial, factory).await;
                    }
                    Err(err) => {
                        warn!(error = %err, "uplink read failed, reconnecting");
                        return;
                    }
                }
            }
        }
    }
}

async fn handle_downlink_text(
    config: &BridgeConfig,
    text: &str,
    uplink: &mut UplinkSession,
    serial: &mut SerialSlot,
    factory: &Arc<dyn SerialFactory>,
) {
    let command = match parse_downlink_command(text) {
        Ok(command) => command,
        Err(err) => {
            warn!(error = %err, raw = %text, "dropped malformed downlink command");
            return;
        }
    };
    if !command.targets(&config.label) {
        return;
    }

    let command_byte = match encode(command.pin, command.value) {
        Ok(byte) => byte,
        Err(err) => {
            warn!(error = %err, pin = command.pin, "dropped downlink command with unaddressable pin");
            return;
        }
    };

    ensure_serial_open(serial, factory);

    let Some(result) = poll_slot(serial, command_byte).await else {
        send_error_frame(config, uplink).await;
        return;
    };

    match result {
        Ok(Some((timestamp, channels))) => {
            let frame = build_reading_frame(&config.label, timestamp, &channels);
            if let Err(err) = uplink
                .send_text(serde_json::to_string(&frame).unwrap_or_default())
                .await
            {
                warn!(error = %err, "failed to uplink reading frame");
            }
        }
        Ok(None) => {
            debug!("transient empty line from serial port, nothing to uplink");
        }
        Err(SerialSessionError::ConnectionLost) => {
            warn!("serial connection lost during poll");
            *serial = SerialSlot::Closed {
                last_attempt: Some(Instant::now()),
            };
            send_error_frame(config, uplink).await;
        }
        Err(err) => {
            warn!(error = %err, "unexpected serial error during poll");
        }
    }
}

/// If `serial` is closed and at least [`SERIAL_RETRY_DELAY`] has elapsed
/// since the last attempt, try to reacquire it. The master's broadcast tick
/// sends every node a wildcard command roughly every 100ms (spec.md §4.4),
/// so this on-demand check is invoked often enough to retry "every second"
/// (spec.md §8 scenario 5) without a dedicated background task.
fn ensure_serial_open(serial: &mut SerialSlot, factory: &Arc<dyn SerialFactory>) {
    if let SerialSlot::Closed { last_attempt } = serial {
        let due = last_attempt.is_none_or(|attempted_at| attempted_at.elapsed() >= SERIAL_RETRY_DELAY);
        if !due {
            return;
        }
        match factory.acquire() {
            Ok(source) => {
                info!("serial port reopened");
                *serial = SerialSlot::Open(source);
            }
            Err(err) => {
                debug!(error = %err, "serial port still unavailable");
                *serial = SerialSlot::Closed {
                    last_attempt: Some(Instant::now()),
                };
            }
        }
    }
}

/// Polls the open serial source off the async executor (its I/O blocks up
/// to the configured poll timeout), returning `None` if the slot is closed.
async fn poll_slot(
    serial: &mut SerialSlot,
    command_byte: u8,
) -> Option<Result<Option<(f64, Vec<f64>)>, SerialSessionError>> {
    let taken = std::mem::replace(serial, SerialSlot::closed());
    let SerialSlot::Open(source) = taken else {
        *serial = taken;
        return None;
    };
    let (returned, result) = tokio::task::spawn_blocking(move || {
        let mut source = source;
        let result = source.poll(command_byte);
        (source, result)
    })
    .await
    .expect("serial poll task panicked");
    *serial = SerialSlot::Open(returned);
    Some(result)
}

/// Convert raw ADC samples into a [`ReadingFrame`], applying this binary's
/// unit conversion (`units::convert`) per channel.
fn build_reading_frame(label: &str, timestamp: f64, raw_channels: &[f64]) -> ReadingFrame {
    let mut channels = IndexMap::new();
    for (index, raw) in raw_channels.iter().enumerate() {
        channels.insert(format!("ch{index}"), units::convert(index, *raw));
    }
    ReadingFrame {
        user: label.to_owned(),
        error: false,
        x: timestamp,
        channels,
    }
}

async fn send_error_frame(config: &BridgeConfig, uplink: &mut UplinkSession) {
    let frame = ReadingFrame::error(config.label.clone(), wall_clock_seconds());
    if let Err(err) = uplink
        .send_text(serde_json::to_string(&frame).unwrap_or_default())
        .await
    {
        warn!(error = %err, "failed to uplink error frame");
    }
}

fn wall_clock_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry_test_support::{FakePollSource, FakeResponse, MockMasterNodeEndpoint};

    struct FixedFactory(std::sync::Mutex<Option<FakePollSource>>);

    impl SerialFactory for FixedFactory {
        fn acquire(&self) -> Result<Box<dyn PollSource>, SerialSessionError> {
            self.0
                .lock()
                .unwrap()
                .take()
                .map(|source| Box::new(source) as Box<dyn PollSource>)
                .ok_or(SerialSessionError::ConnectionLost)
        }
    }

    #[tokio::test]
    async fn uploads_metadata_and_uplinks_a_reading_on_command() {
        let endpoint = MockMasterNodeEndpoint::start().await.unwrap();
        let factory = Arc::new(FixedFactory(std::sync::Mutex::new(Some(FakePollSource::new([
            FakeResponse::Reading(1_700_000_000.0, vec![1.0, 2.0]),
        ])))));
        let cancel = CancellationToken::new();
        let config = BridgeConfig {
            websocket_url: endpoint.url(),
            label: "lab7".to_owned(),
        };

        let bridge_cancel = cancel.clone();
        let handle = tokio::spawn(run_with_factory(config, factory, bridge_cancel));

        let first = endpoint.recv_uplink().await.unwrap();
        assert!(first.contains("\"meta\":true"));
        assert!(first.contains("lab7"));

        endpoint.send_downlink("lab7,1,1");
        let second = endpoint.recv_uplink().await.unwrap();
        assert!(second.contains("\"error\":false"));
        assert!(second.contains("ch0"));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn non_targeted_command_is_ignored() {
        let endpoint = MockMasterNodeEndpoint::start().await.unwrap();
        let factory = Arc::new(FixedFactory(std::sync::Mutex::new(Some(FakePollSource::new([
            FakeResponse::Empty,
        ])))));
        let cancel = CancellationToken::new();
        let config = BridgeConfig {
            websocket_url: endpoint.url(),
            label: "lab7".to_owned(),
        };

        let bridge_cancel = cancel.clone();
        let handle = tokio::spawn(run_with_factory(config, factory, bridge_cancel));
        endpoint.recv_uplink().await.unwrap();

        endpoint.send_downlink("lab9,1,1");
        // Give the read loop a chance to process and (wrongly) react.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn lost_serial_connection_uplinks_an_error_frame() {
        let endpoint = MockMasterNodeEndpoint::start().await.unwrap();
        let factory = Arc::new(FixedFactory(std::sync::Mutex::new(Some(FakePollSource::new([
            FakeResponse::Lost,
        ])))));
        let cancel = CancellationToken::new();
        let config = BridgeConfig {
            websocket_url: endpoint.url(),
            label: "lab7".to_owned(),
        };

        let bridge_cancel = cancel.clone();
        let handle = tokio::spawn(run_with_factory(config, factory, bridge_cancel));
        endpoint.recv_uplink().await.unwrap();

        endpoint.send_downlink("lab7,1,1");
        let error_frame = endpoint.recv_uplink().await.unwrap();
        assert!(error_frame.contains("\"error\":true"));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn device_not_found_at_startup_is_fatal() {
        struct AlwaysMissing;
        impl SerialFactory for AlwaysMissing {
            fn acquire(&self) -> Result<Box<dyn PollSource>, SerialSessionError> {
                Err(SerialSessionError::DeviceNotFound)
            }
        }

        let cancel = CancellationToken::new();
        let config = BridgeConfig {
            websocket_url: "ws://127.0.0.1:1".to_owned(),
            label: "lab7".to_owned(),
        };
        let result = run_with_factory(config, Arc::new(AlwaysMissing), cancel).await;
        assert!(matches!(result, Err(NodeError::DeviceNotFound(_))));
    }
}
