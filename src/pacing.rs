//! Sample pacing strategies
//!
//! The output and capture loops hit their sample rates with fixed
//! microsecond delays between words; with no flow control on the wire,
//! that pacing is the only backpressure in the system. The strategy is a
//! trait so tests can run the loops at full speed.

use std::time::{Duration, Instant};

/// A short, approximately-accurate wait between samples.
pub trait Pacer {
    /// Pause for roughly `us` microseconds. Mean spacing matters more
    /// than per-call jitter; nothing downstream compensates for drift.
    fn pause_micros(&self, us: u64);
}

/// Production pacer: spins on a monotonic clock.
///
/// `thread::sleep` granularity on a general-purpose OS is far coarser
/// than the 45–80 µs delays these loops need, so short waits spin.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinPacer;

impl Pacer for SpinPacer {
    fn pause_micros(&self, us: u64) {
        let deadline = Instant::now() + Duration::from_micros(us);
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

/// Zero-cost pacer for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPacer;

impl Pacer for NoopPacer {
    fn pause_micros(&self, _us: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spin_pacer_waits_at_least_the_requested_time() {
        let pacer = SpinPacer;
        let start = Instant::now();
        for _ in 0..10 {
            pacer.pause_micros(100);
        }
        assert!(start.elapsed() >= Duration::from_micros(1000));
    }

    #[test]
    fn noop_pacer_returns_immediately() {
        let start = Instant::now();
        NoopPacer.pause_micros(1_000_000);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
