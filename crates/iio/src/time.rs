use std::sync::OnceLock;
use std::time::Instant;

static BOOT: OnceLock<Instant> = OnceLock::new();

/// Pin the clock epoch. Called when the first device registers.
pub fn init() {
    BOOT.get_or_init(Instant::now);
}

/// Monotonic nanoseconds since the clock epoch.
pub fn get_time_ns() -> i64 {
    let boot = *BOOT.get_or_init(Instant::now);
    boot.elapsed().as_nanos() as i64
}
