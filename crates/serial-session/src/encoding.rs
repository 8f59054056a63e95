//! Single-byte pin actuation encoding.
//!
//! Commands are single bytes in `[base-1-MAX_PIN, base+MAX_PIN]` where
//! `base = 0x41`. Pin `k` HIGH encodes as `base+k`; pin `k` LOW encodes as
//! `base-1-k` — the distinct negative encoding avoids a collision between
//! the two values of pin 0 (`base` vs `base-1`).
//!
//! Pin 0 HIGH (`base+0`) lands on the same byte as the synthetic heartbeat
//! — both are `base` — so the heartbeat is not independently decodable; it
//! is a reuse of the pin-0-HIGH byte, not a third command space.
//!
//! `MAX_PIN` is capped at 50 so neither encoding can land on `\n` (10) or
//! `\r` (13): the LOW branch would only reach those values at `k=54` and
//! `k=51` respectively, both already excluded by the cap.

use crate::error::SerialSessionError;

pub const BASE: u8 = 0x41;
pub const MAX_PIN: u8 = 50;

/// Synthetic no-op heartbeat byte (`base`, ASCII `'A'`) — the same byte as
/// pin 0 HIGH.
pub const HEARTBEAT: u8 = BASE;

/// Encode a pin/value pair into its single-byte actuation command.
pub fn encode(pin: u8, value: bool) -> Result<u8, SerialSessionError> {
    if pin > MAX_PIN {
        return Err(SerialSessionError::PinOutOfRange(pin));
    }
    Ok(if value { BASE + pin } else { BASE - 1 - pin })
}

/// Decode a single-byte actuation command back into its pin/value pair.
/// Returns `None` for bytes outside the addressable range.
pub fn decode(byte: u8) -> Option<(u8, bool)> {
    if byte >= BASE && byte <= BASE + MAX_PIN {
        Some((byte - BASE, true))
    } else if byte < BASE && byte >= BASE - 1 - MAX_PIN {
        Some((BASE - 1 - byte, false))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_pin_in_spec_range() {
        for pin in 0..=30u8 {
            for value in [true, false] {
                let byte = encode(pin, value).unwrap();
                assert_eq!(decode(byte), Some((pin, value)), "pin={pin} value={value}");
            }
        }
    }

    #[test]
    fn rejects_pins_past_the_maximum() {
        assert!(encode(MAX_PIN + 1, true).is_err());
        assert!(encode(51, false).is_err());
    }

    #[test]
    fn wildcard_broadcast_example_matches_spec() {
        // X,50,0 -> pin 50 LOW -> base - 1 - 50 = 14
        assert_eq!(encode(50, false).unwrap(), 14);
    }

    #[test]
    fn never_collides_with_line_control_bytes() {
        for pin in 0..=MAX_PIN {
            assert_ne!(encode(pin, true).unwrap(), b'\n');
            assert_ne!(encode(pin, true).unwrap(), b'\r');
            assert_ne!(encode(pin, false).unwrap(), b'\n');
            assert_ne!(encode(pin, false).unwrap(), b'\r');
        }
    }

    #[test]
    fn heartbeat_byte_is_indistinguishable_from_pin_zero_high() {
        assert_eq!(decode(HEARTBEAT), Some((0, true)));
        assert_eq!(encode(0, true).unwrap(), HEARTBEAT);
    }
}
