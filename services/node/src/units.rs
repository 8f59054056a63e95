//! Build-time ADC calibration constants (§4.2). These describe the
//! micro-controller family this binary is built against — a 12-bit,
//! 3.3V front-end — and are not runtime configuration, since swapping them
//! means swapping hardware.

/// Reference voltage of the ADC.
pub const VREF: f64 = 3.3;
/// Full-scale ADC reading (12-bit).
pub const ADC_MAX: f64 = 4095.0;

/// Index of the one channel that carries a post-scaled sensor reading
/// (e.g. a 10 mV/°C sensor, scaled to read directly in degrees), or
/// `None` if every channel is plain voltage. `ch0` is channel index 0.
pub const POST_SCALED_CHANNEL: Option<usize> = Some(0);
/// Multiplier applied to `POST_SCALED_CHANNEL` after the voltage conversion.
pub const POST_SCALE_FACTOR: f64 = 100.0;

/// Converts one raw ADC sample to volts, rounded to 5 decimal digits, then
/// applies the post-scale factor if `index` is the configured channel.
pub fn convert(index: usize, raw: f64) -> f64 {
    let volts = round5(raw * VREF / ADC_MAX);
    if POST_SCALED_CHANNEL == Some(index) {
        round5(volts * POST_SCALE_FACTOR)
    } else {
        volts
    }
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}
