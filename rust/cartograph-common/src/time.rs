//! Cross-platform clocks.
//!
//! Profiling needs two clocks: a wall clock to stamp when an operation began,
//! and a monotonic clock to measure how long it ran. `web-time` provides both
//! on `wasm32-unknown-unknown` and re-exports `std` on native targets.

pub use std::time::{Duration, SystemTime, UNIX_EPOCH};
pub use web_time::Instant;

/// Returns the current system time.
#[cfg(not(target_arch = "wasm32"))]
pub fn now() -> SystemTime {
    SystemTime::now()
}

/// Returns the current system time.
#[cfg(target_arch = "wasm32")]
pub fn now() -> SystemTime {
    use web_time::web::SystemTimeExt;
    web_time::SystemTime::now().to_std()
}

/// Milliseconds since the unix epoch, saturating to zero for clocks that
/// report a time before it.
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
