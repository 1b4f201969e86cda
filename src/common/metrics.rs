//! Decode counters for the event dispatcher
//!
//! # Design Principles (KISS)
//! - Lock-free atomic counters so a monitor thread can read while decoding runs
//! - Simple snapshot mechanism for reporting
//! - Counters are per dispatcher, never process-wide

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::event::EventKind;

/// Atomic counters updated by `EventDispatcher`
///
/// All operations use Relaxed ordering. Statistics are eventually consistent,
/// which is acceptable for monitoring.
#[derive(Debug, Default)]
pub struct DecodeCounters {
    /// Buffers handed to `decode`
    pub buffers: AtomicU64,
    /// Buffers rejected with an error
    pub failed: AtomicU64,
    /// Physics event buffers
    pub physics: AtomicU64,
    /// Scaler event buffers
    pub scaler: AtomicU64,
    /// EPICS event buffers
    pub epics: AtomicU64,
    /// Prescale record buffers
    pub prescale: AtomicU64,
    /// Sync/control event buffers
    pub control: AtomicU64,
    /// Buffers of an unhandled event type
    pub other: AtomicU64,
    /// Hits forwarded to the sink
    pub hits: AtomicU64,
    /// Sub-events produced by block splitting
    pub sub_events: AtomicU64,
    /// Words accepted for decoding
    pub words: AtomicU64,
}

impl DecodeCounters {
    /// Create new zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one buffer of the given kind
    #[inline]
    pub fn inc_kind(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::Physics(_) => &self.physics,
            EventKind::Scaler => &self.scaler,
            EventKind::Epics => &self.epics,
            EventKind::Prescale(_) => &self.prescale,
            EventKind::Control(_) => &self.control,
            EventKind::Other(_) => &self.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_buffers(&self) {
        self.buffers.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_hits(&self, n: u64) {
        self.hits.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_sub_events(&self, n: u64) {
        self.sub_events.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_words(&self, n: u64) {
        self.words.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a snapshot of current values
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            buffers: self.buffers.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            physics: self.physics.load(Ordering::Relaxed),
            scaler: self.scaler.load(Ordering::Relaxed),
            epics: self.epics.load(Ordering::Relaxed),
            prescale: self.prescale.load(Ordering::Relaxed),
            control: self.control.load(Ordering::Relaxed),
            other: self.other.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            sub_events: self.sub_events.load(Ordering::Relaxed),
            words: self.words.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in [
            &self.buffers,
            &self.failed,
            &self.physics,
            &self.scaler,
            &self.epics,
            &self.prescale,
            &self.control,
            &self.other,
            &self.hits,
            &self.sub_events,
            &self.words,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of counter values at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub buffers: u64,
    pub failed: u64,
    pub physics: u64,
    pub scaler: u64,
    pub epics: u64,
    pub prescale: u64,
    pub control: u64,
    pub other: u64,
    pub hits: u64,
    pub sub_events: u64,
    pub words: u64,
}

impl CounterSnapshot {
    /// Calculate rates between two snapshots given elapsed seconds
    pub fn rate_from(&self, prev: &CounterSnapshot, elapsed_secs: f64) -> RateSnapshot {
        if elapsed_secs <= 0.0 {
            return RateSnapshot::default();
        }

        RateSnapshot {
            buffer_rate: self.buffers.saturating_sub(prev.buffers) as f64 / elapsed_secs,
            hit_rate: self.hits.saturating_sub(prev.hits) as f64 / elapsed_secs,
            word_rate: self.words.saturating_sub(prev.words) as f64 / elapsed_secs,
        }
    }
}

/// Rate calculations from counter snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct RateSnapshot {
    /// Buffers per second
    pub buffer_rate: f64,
    /// Hits per second
    pub hit_rate: f64,
    /// Words per second
    pub word_rate: f64,
}

impl RateSnapshot {
    /// Format hit rate as human-readable string (K/s, M/s)
    pub fn format_hit_rate(&self) -> String {
        if self.hit_rate >= 1_000_000.0 {
            format!("{:.2} M/s", self.hit_rate / 1_000_000.0)
        } else if self.hit_rate >= 1_000.0 {
            format!("{:.2} K/s", self.hit_rate / 1_000.0)
        } else {
            format!("{:.0} /s", self.hit_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ControlKind, PrescaleFormat};

    #[test]
    fn test_counters_new() {
        let counters = DecodeCounters::new();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_inc_kind() {
        let counters = DecodeCounters::new();
        counters.inc_kind(EventKind::Physics(1));
        counters.inc_kind(EventKind::Physics(5));
        counters.inc_kind(EventKind::Epics);
        counters.inc_kind(EventKind::Prescale(PrescaleFormat::Registers));
        counters.inc_kind(EventKind::Control(ControlKind::Go));
        counters.inc_kind(EventKind::Other(99));

        let snap = counters.snapshot();
        assert_eq!(snap.physics, 2);
        assert_eq!(snap.epics, 1);
        assert_eq!(snap.prescale, 1);
        assert_eq!(snap.control, 1);
        assert_eq!(snap.other, 1);
        assert_eq!(snap.scaler, 0);
    }

    #[test]
    fn test_reset() {
        let counters = DecodeCounters::new();
        counters.inc_buffers();
        counters.add_hits(50);
        counters.reset();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_rate_calculation() {
        let prev = CounterSnapshot {
            buffers: 10,
            hits: 1000,
            words: 5000,
            ..Default::default()
        };
        let current = CounterSnapshot {
            buffers: 30,
            hits: 3000,
            words: 9000,
            ..Default::default()
        };

        let rate = current.rate_from(&prev, 2.0);
        assert_eq!(rate.buffer_rate, 10.0);
        assert_eq!(rate.hit_rate, 1000.0);
        assert_eq!(rate.word_rate, 2000.0);
    }

    #[test]
    fn test_rate_zero_elapsed() {
        let current = CounterSnapshot {
            hits: 100,
            ..Default::default()
        };
        let rate = current.rate_from(&CounterSnapshot::default(), 0.0);
        assert_eq!(rate.hit_rate, 0.0);
    }

    #[test]
    fn test_format_hit_rate() {
        let rate = RateSnapshot {
            hit_rate: 500.0,
            ..Default::default()
        };
        assert_eq!(rate.format_hit_rate(), "500 /s");

        let rate = RateSnapshot {
            hit_rate: 1500.0,
            ..Default::default()
        };
        assert_eq!(rate.format_hit_rate(), "1.50 K/s");

        let rate = RateSnapshot {
            hit_rate: 2_500_000.0,
            ..Default::default()
        };
        assert_eq!(rate.format_hit_rate(), "2.50 M/s");
    }
}
