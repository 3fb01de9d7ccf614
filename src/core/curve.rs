//! Multiplier Growth Curve
//!
//! Maps elapsed flight time to the public multiplier. The curve has no
//! state beyond the flight start timestamp held by the caller: the same
//! elapsed value always reproduces the same multiplier, which is what
//! makes crash detection (`multiplier >= crash_point`) deterministic.

/// Per-millisecond exponential growth base.
///
/// Tuned so the multiplier reaches 2.0x roughly three seconds into flight
/// (`ln 2 / ln GROWTH_BASE` ~ 3014 ms). Kept independent of the tick and
/// broadcast intervals.
pub const GROWTH_BASE: f64 = 1.00023;

/// Multiplier after `elapsed_ms` of flight: `max(1.0, base ^ elapsed_ms)`.
#[inline]
pub fn multiplier_at(elapsed_ms: u64, growth_base: f64) -> f64 {
    growth_base.powf(elapsed_ms as f64).max(1.0)
}

/// Inverse of [`multiplier_at`]: milliseconds of flight until the
/// multiplier first reaches `target`. Rounded up so that
/// `multiplier_at(ms_to_multiplier(t)) >= t`.
pub fn ms_to_multiplier(target: f64, growth_base: f64) -> u64 {
    if target <= 1.0 {
        return 0;
    }
    (target.ln() / growth_base.ln()).ceil() as u64
}
