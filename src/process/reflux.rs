//! Reflux-cycle valve timing.
//!
//! During a period of `P` seconds the valve is **open (drawing)** for
//! the first `P / (1 + R)` seconds and **closed (refluxing)** for the
//! rest, where `R` is the configured reflux ratio (refluxed : drawn).
//! Kept as pure functions so the duty arithmetic is unit-testable
//! without an engine.

/// Milliseconds of each period spent drawing.
pub fn draw_duration_ms(period_secs: u32, ratio: f32) -> u64 {
    let ratio = ratio.max(0.0);
    let period_ms = u64::from(period_secs) * 1000;
    (period_ms as f64 / (1.0 + f64::from(ratio))) as u64
}

/// Desired valve position at `now_ms` for a cycle anchored at
/// `cycle_start_ms`: `true` = open (drawing).
pub fn valve_target(now_ms: u64, cycle_start_ms: u64, period_secs: u32, ratio: f32) -> bool {
    if period_secs == 0 {
        return false;
    }
    let period_ms = u64::from(period_secs) * 1000;
    let position = now_ms.saturating_sub(cycle_start_ms) % period_ms;
    position < draw_duration_ms(period_secs, ratio)
}

/// Seconds into the current cycle, for observers.
pub fn secs_into_cycle(now_ms: u64, cycle_start_ms: u64, period_secs: u32) -> u64 {
    if period_secs == 0 {
        return 0;
    }
    let period_ms = u64::from(period_secs) * 1000;
    (now_ms.saturating_sub(cycle_start_ms) % period_ms) / 1000
}
