//! A small retry-with-backoff primitive shared by the bridge's two
//! independent reconnect paths (serial port, uplink WebSocket). Replaces
//! the source's open-coded `while not errorState` reconnect loops with a
//! single cancellable sleep (spec.md §9, "Coroutine-driven loops").

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Serial port reconnect delay — spec.md §8 scenario 5: "retries the port
/// every second".
pub const SERIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Uplink WebSocket reconnect delay — spec.md §5: "a fixed 2-3 second
/// delay". The spec also mentions a ~10s delay once the master was known
/// reachable earlier; that reachability-history distinction isn't
/// independently testable and is simplified to one fixed delay here (see
/// DESIGN.md).
pub const UPLINK_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Sleeps for `delay`, returning early (with `true`) if `cancel` fires
/// first. Used so a reconnect loop's wait can be interrupted within a
/// bounded time by the bridge's cancellation signal.
pub async fn sleep_or_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
