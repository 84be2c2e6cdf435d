//! Monotonic nanosecond clock and the high-precision wait primitive.
//!
//! `std::time::Instant` is the highest-resolution monotonic source the
//! platform exposes; it never goes backwards and is immune to wall-clock
//! adjustments, which is what trial timing needs.
//!
//! The wait is a busy/sleep hybrid: while plenty of time remains it cedes
//! the processor for half the remaining duration, and inside the final
//! 200 microseconds it spins. The threshold was tuned empirically for
//! acceptable scheduler jitter on commodity OS clocks; keep it.

use std::time::Instant;

/// Spin instead of sleeping once this little time remains, in nanoseconds.
pub const SPIN_THRESHOLD_NS: u64 = 200_000;

/// Monotonic clock with its origin at construction.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Capture the origin instant; `t = 0` is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the origin. Never decreases.
    pub fn elapsed_ns(&self) -> u64 {
        // u64 nanoseconds covers ~584 years of run time
        self.origin.elapsed().as_nanos() as u64
    }

    /// Seconds elapsed since the origin.
    pub fn elapsed_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// High-precision sleep.
///
/// Returns immediately for zero, negative or non-finite durations.
/// Otherwise returns only once at least `duration_secs` have elapsed,
/// with bounded overshoot. Not cancellable: callers use it inside
/// deadline-critical segments where a stimulus is already scheduled.
pub fn sleep(duration_secs: f64) {
    if !(duration_secs > 0.0) {
        return;
    }
    let clock = Clock::new();
    let duration_ns = (duration_secs * 1e9) as u64;
    loop {
        let elapsed = clock.elapsed_ns();
        if elapsed >= duration_ns {
            break;
        }
        let remaining = duration_ns - elapsed;
        if remaining >= SPIN_THRESHOLD_NS {
            // Cede the processor for half the remaining time; the loop
            // re-measures, so sleep overshoot is absorbed by later passes.
            std::thread::sleep(std::time::Duration::from_nanos(remaining / 2));
        } else {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn clock_is_monotonic() {
        let clock = Clock::new();
        let a = clock.elapsed_ns();
        let b = clock.elapsed_ns();
        let c = clock.elapsed_ns();
        assert!(a <= b && b <= c);
    }

    #[test]
    fn clock_advances() {
        let clock = Clock::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.elapsed_ns() >= 5_000_000);
        assert!(clock.elapsed_secs() >= 0.005);
    }

    #[test]
    fn sleep_never_returns_early() {
        for &duration in &[0.001, 0.01, 0.05] {
            let clock = Clock::new();
            sleep(duration);
            let elapsed = clock.elapsed_secs();
            assert!(
                elapsed >= duration,
                "sleep({duration}) returned after only {elapsed}s"
            );
        }
    }

    #[test]
    fn sleep_overshoot_is_bounded() {
        let clock = Clock::new();
        sleep(0.05);
        let elapsed = clock.elapsed_secs();
        // generous bound, CI schedulers are noisy
        assert!(elapsed < 0.05 + 0.02, "sleep(0.05) took {elapsed}s");
    }

    #[test]
    fn sleep_zero_and_negative_return_immediately() {
        let clock = Clock::new();
        sleep(0.0);
        sleep(-1.0);
        sleep(f64::NAN);
        assert!(clock.elapsed_secs() < 0.01);
    }
}
