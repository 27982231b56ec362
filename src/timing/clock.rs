//! Beat/second mapping and the session clock shared between threads.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

const MIN_BPM: f64 = 1.0;
const MIN_RATE: f64 = 0.001;

/// Tempo and playback rate of a session. Fixed for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeScale {
    pub bpm: f64,
    pub rate: f64,
}

impl TimeScale {
    pub fn new(bpm: f64, rate: f64) -> Self {
        Self {
            bpm: if bpm.is_finite() { bpm.max(MIN_BPM) } else { MIN_BPM },
            rate: if rate.is_finite() { rate.max(MIN_RATE) } else { 1.0 },
        }
    }

    /// `(60 / bpm) * (1 / rate)`
    pub fn seconds_per_beat(&self) -> f64 {
        (60.0 / self.bpm) * (1.0 / self.rate)
    }

    pub fn beats_to_seconds(&self, beats: f64) -> f64 {
        beats * self.seconds_per_beat()
    }

    pub fn seconds_to_beats(&self, seconds: f64) -> f64 {
        seconds / self.seconds_per_beat()
    }
}

impl Default for TimeScale {
    fn default() -> Self {
        Self::new(60.0, 1.0)
    }
}

/// Scheduling latency observed by the playback thread.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub dispatched: u64,
    pub late: u64,
    pub max_lateness: f64,
}

/// Seconds elapsed since playback start, as seen by dispatch.
///
/// The value only moves forward. It is stored as the bit pattern of a
/// non-negative `f64`, whose ordering matches the ordering of the `u64`
/// bits, so `fetch_max` on the raw bits is a valid monotonic update.
#[derive(Debug, Default)]
pub struct SessionClock {
    elapsed_bits: AtomicU64,
    latency: Mutex<LatencyStats>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed(&self) -> f64 {
        f64::from_bits(self.elapsed_bits.load(Ordering::Acquire))
    }

    /// Moves the clock to `seconds` unless it is already past it and
    /// returns the resulting elapsed time.
    pub fn advance_to(&self, seconds: f64) -> f64 {
        // also maps -0.0, whose bit pattern would otherwise win fetch_max
        let seconds = if seconds.is_finite() && seconds > 0.0 { seconds } else { 0.0 };
        let previous = self
            .elapsed_bits
            .fetch_max(seconds.to_bits(), Ordering::AcqRel);
        f64::from_bits(previous).max(seconds)
    }

    pub fn record_dispatch(&self, lateness: f64, tolerance: f64) {
        let mut stats = self.latency.lock();
        stats.dispatched += 1;
        if lateness > tolerance {
            stats.late += 1;
        }
        if lateness > stats.max_lateness {
            stats.max_lateness = lateness;
        }
    }

    pub fn latency(&self) -> LatencyStats {
        *self.latency.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_per_beat() {
        let scale = TimeScale::new(60.0, 1.0);
        assert!((scale.seconds_per_beat() - 1.0).abs() < 1e-9);

        let scale = TimeScale::new(120.0, 2.0);
        assert!((scale.seconds_per_beat() - 0.25).abs() < 1e-9);
        assert!((scale.beats_to_seconds(4.0) - 1.0).abs() < 1e-9);
        assert!((scale.seconds_to_beats(1.0) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_scale_clamps_invalid_input() {
        let scale = TimeScale::new(0.0, -3.0);
        assert!(scale.bpm >= MIN_BPM);
        assert!(scale.rate >= MIN_RATE);
        assert!(scale.seconds_per_beat().is_finite());
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = SessionClock::new();
        assert_eq!(clock.elapsed(), 0.0);
        assert_eq!(clock.advance_to(1.5), 1.5);
        assert_eq!(clock.advance_to(0.5), 1.5);
        assert_eq!(clock.elapsed(), 1.5);
        assert_eq!(clock.advance_to(2.0), 2.0);
    }

    #[test]
    fn test_latency_stats() {
        let clock = SessionClock::new();
        clock.record_dispatch(0.0, 0.01);
        clock.record_dispatch(0.05, 0.01);
        let stats = clock.latency();
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.late, 1);
        assert!((stats.max_lateness - 0.05).abs() < 1e-9);
    }
}
