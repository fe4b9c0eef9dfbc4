// Range helpers - remapping raw detections into the configured window

use crate::config::FrequencyRange;

/// Bring a raw detection into `range` by whole-number scaling
///
/// Below the window the frequency is multiplied by the smallest integer that
/// lifts it to at least `min`; above the window it is divided by the smallest
/// integer that brings it to at most `max`. The result is then clamped, so a
/// window narrower than one octave still yields an in-range value.
///
/// # Returns
/// * `Some(hz)` - Remapped frequency inside `range`
/// * `None` - `raw_hz` is 0 (no detection to scale)
pub fn remap_into_range(raw_hz: u32, range: FrequencyRange) -> Option<u32> {
    if raw_hz == 0 {
        return None;
    }

    let scaled = if raw_hz < range.min_hz {
        let multiplier = range.min_hz.div_ceil(raw_hz);
        raw_hz.saturating_mul(multiplier)
    } else if raw_hz > range.max_hz {
        let divisor = raw_hz.div_ceil(range.max_hz.max(1));
        (raw_hz as f64 / divisor as f64).round() as u32
    } else {
        raw_hz
    };

    Some(scaled.clamp(range.min_hz, range.max_hz))
}

/// Position of `frequency_hz` inside `range` as a percentage
///
/// Zero or negative frequencies map to 0; the result is clamped to `[0, 100]`.
pub fn indicator_position(frequency_hz: f64, range: FrequencyRange) -> f64 {
    if frequency_hz <= 0.0 {
        return 0.0;
    }
    let span = range.span() as f64;
    if span == 0.0 {
        return 0.0;
    }
    let position = (frequency_hz - range.min_hz as f64) / span * 100.0;
    position.clamp(0.0, 100.0)
}
