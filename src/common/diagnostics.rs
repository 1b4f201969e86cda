//! Per-instance diagnostics for non-fatal decode conditions
//!
//! Each decoder owns one `DecoderDiagnostics`. Counters are never shared
//! between instances, so two modules decoding the same buffer report their
//! own warnings independently.

use serde::Serialize;

/// Default number of occurrences between repeated log lines
pub const DEFAULT_WARNING_INTERVAL: u64 = 100;

/// Kinds of non-fatal conditions a decoder can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Warning {
    /// Header or trailer word count disagrees with words actually seen
    WordCountMismatch,
    /// Number of sub-events differs from the declared block size
    BlockSizeMismatch,
    /// Block header and event header carry different slot numbers
    InconsistentSlot,
    /// Block ended without a trailer for this slot
    MissingTrailer,
    /// Data word arrived before any event header of the block
    OrphanData,
    /// Crate or slot id outside the supported range
    OutOfBounds,
    /// Word or bank did not match any configured module
    Unassigned,
}

pub const WARNING_KINDS: usize = 7;

impl Warning {
    pub const ALL: [Warning; WARNING_KINDS] = [
        Warning::WordCountMismatch,
        Warning::BlockSizeMismatch,
        Warning::InconsistentSlot,
        Warning::MissingTrailer,
        Warning::OrphanData,
        Warning::OutOfBounds,
        Warning::Unassigned,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Rate-limited warning counters owned by a single decoder instance
#[derive(Debug, Clone)]
pub struct DecoderDiagnostics {
    interval: u64,
    counts: [u64; WARNING_KINDS],
}

impl Default for DecoderDiagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_WARNING_INTERVAL)
    }
}

impl DecoderDiagnostics {
    /// Create counters that log the first and then every `interval`-th occurrence
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            counts: [0; WARNING_KINDS],
        }
    }

    /// Record one occurrence; returns true when it should be logged
    pub fn record(&mut self, warning: Warning) -> bool {
        let count = &mut self.counts[warning.index()];
        let previous = *count;
        *count += 1;
        self.interval <= 1 || previous % self.interval == 0
    }

    /// Number of occurrences of a warning kind
    pub fn count(&self, warning: Warning) -> u64 {
        self.counts[warning.index()]
    }

    /// Total number of warnings recorded
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Non-zero counters, for reporting
    pub fn summary(&self) -> Vec<(Warning, u64)> {
        Warning::ALL
            .iter()
            .map(|w| (*w, self.count(*w)))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}
