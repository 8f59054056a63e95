//! Ownership of one serial link to a laboratory micro-controller.
//!
//! Exposes a single blocking primitive, [`SerialSession::poll`], plus the
//! single-byte actuation encoding and port discovery it depends on. Callers
//! that run inside an async executor are expected to invoke `poll` from a
//! blocking context (e.g. `tokio::task::spawn_blocking`) rather than this
//! crate doing so itself — it has no opinion on the caller's runtime.

pub mod discovery;
pub mod encoding;
mod error;
mod session;

pub use discovery::{discover_port, select_port, DEFAULT_DEVICE_SUBSTRINGS};
pub use encoding::{decode, encode, HEARTBEAT, MAX_PIN};
pub use error::SerialSessionError;
pub use session::{parse_line, PollSource, SerialSession, SerialSessionConfig, SessionState};
