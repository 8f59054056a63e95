//! A scripted [`serial_session::PollSource`] for node bridge tests.

use std::collections::VecDeque;

use serial_session::{PollSource, SerialSessionError};

/// One scripted outcome for a single `poll` call.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeResponse {
    Reading(f64, Vec<f64>),
    /// A transient empty line — `poll` should return `Ok(None)`.
    Empty,
    /// Simulates an I/O fault; closes the fake source from then on.
    Lost,
}

/// Replays a fixed queue of [`FakeResponse`]s, falling back to `Empty` once
/// exhausted (mirroring a quiet serial line) unless already closed.
pub struct FakePollSource {
    responses: VecDeque<FakeResponse>,
    closed: bool,
}

impl FakePollSource {
    pub fn new(responses: impl IntoIterator<Item = FakeResponse>) -> Self {
        FakePollSource {
            responses: responses.into_iter().collect(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl PollSource for FakePollSource {
    fn poll(&mut self, _command_byte: u8) -> Result<Option<(f64, Vec<f64>)>, SerialSessionError> {
        if self.closed {
            return Err(SerialSessionError::ConnectionLost);
        }
        match self.responses.pop_front() {
            Some(FakeResponse::Reading(timestamp, channels)) => Ok(Some((timestamp, channels))),
            Some(FakeResponse::Empty) | None => Ok(None),
            Some(FakeResponse::Lost) => {
                self.closed = true;
                Err(SerialSessionError::ConnectionLost)
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
