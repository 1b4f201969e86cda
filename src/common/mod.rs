//! Common types shared across the decoder components
//!
//! Bounds, errors, per-instance diagnostics, counters and CLI arguments.

pub mod cli;
pub mod diagnostics;
pub mod error;
pub mod metrics;

pub use cli::{CommonArgs, DecodeArgs};
pub use diagnostics::{DecoderDiagnostics, Warning, DEFAULT_WARNING_INTERVAL};
pub use error::{DecodeError, DecodeResult, SinkError};
pub use metrics::{CounterSnapshot, DecodeCounters, RateSnapshot};

/// Number of readout crates addressable by a decoder (ids 0..MAX_ROC)
pub const MAX_ROC: u32 = 32;

/// Number of slots per crate (ids 0..MAX_SLOT, the width of a 5-bit slot field)
pub const MAX_SLOT: u32 = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_cover_five_bit_slot_field() {
        assert_eq!(MAX_SLOT, 1 << 5);
        assert!(31 < MAX_SLOT);
        assert!(MAX_ROC > 0);
    }
}
