use std::sync::atomic::{AtomicU32, AtomicBool};
use std::sync::atomic::Ordering::Relaxed;
use std::time::{Duration, Instant};

use crate::riverdb::config::COARSE_CLOCK_GRANULARITY_SECONDS;

/// A global, shared atomic clock that is advanced by coarse_clock_updater's background thread.
static COARSE_CLOCK: AtomicU32 = AtomicU32::new(0);
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Return the current value of the clock. Roughly accurate to COARSE_CLOCK_GRANULARITY_SECONDS.
/// It provides a less accurate but more efficient monotonic time value than repeated
/// Instant::now() calls on every BackendConnection/session touch.
pub fn coarse_monotonic_now() -> u32 {
    COARSE_CLOCK.load(Relaxed)
}

/// Spawns the background thread that advances the coarse clock.
/// This is one of the few places in the system allowed to sleep.
pub fn coarse_clock_updater() -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("coarse-clock".into())
        .spawn(|| {
            let start = Instant::now();
            let period = Duration::from_secs(COARSE_CLOCK_GRANULARITY_SECONDS);
            while !SHUTDOWN.load(Relaxed) {
                std::thread::sleep(period);
                COARSE_CLOCK.store(start.elapsed().as_secs() as u32, Relaxed);
            }
        })
        .expect("failed to spawn coarse-clock thread")
}

/// Signals the coarse clock thread to exit at its next wakeup.
pub fn coarse_clock_shutdown() {
    SHUTDOWN.store(true, Relaxed);
}
