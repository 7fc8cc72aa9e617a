//! General utilities shared across the engine.

use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum plausible processing-time estimate. There's no definition of
/// what "normal" latency looks like for an arbitrary streaming recognizer,
/// so this just caps the reported value and is treated as informational
/// only.
pub const MAX_PROCESSING_TIME_MS: u64 = 30_000;

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Clamps a processing-time estimate to [`MAX_PROCESSING_TIME_MS`].
#[must_use]
pub fn clamp_processing_time_ms(value_ms: u64) -> u64 {
    value_ms.min(MAX_PROCESSING_TIME_MS)
}
