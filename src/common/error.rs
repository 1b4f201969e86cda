//! Error types for the decoding engine
//!
//! # Design Principles (KISS)
//! - Fatal-for-buffer conditions are `DecodeError` variants
//! - Non-fatal conditions never become errors; they go to `DecoderDiagnostics`
//! - Sink failures are split into "this buffer" and "this run" severities

use thiserror::Error;

/// Failures reported by a Slot Data sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Per-slot storage is full; the current buffer cannot be completed
    #[error("slot capacity exceeded for crate {crate_id} slot {slot} (capacity {capacity})")]
    CapacityExceeded {
        crate_id: u32,
        slot: u32,
        capacity: usize,
    },

    /// Downstream consumer is gone; no further data can be accepted
    #[error("sink disconnected: downstream consumer dropped")]
    Disconnected,
}

/// Errors returned by `EventDispatcher::decode`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Declared length exceeds the configured maximum event length
    #[error("event length {declared} exceeds maximum {max}")]
    Truncated { declared: usize, max: usize },

    /// Buffer is too short to hold an event header
    #[error("buffer too short: {0} words")]
    TooShort(usize),

    /// Buffer holds fewer words than its length word declares
    #[error("incomplete buffer: declared {declared} words, only {available} available")]
    Incomplete { declared: usize, available: usize },

    /// A bank inside the event overruns its enclosing range
    #[error("malformed bank at word {offset}: length {len} exceeds remaining {remaining} words")]
    MalformedBank {
        offset: usize,
        len: usize,
        remaining: usize,
    },

    /// The sink ran out of capacity while decoding this buffer
    #[error("sink overflow: {0}")]
    SinkOverflow(SinkError),

    /// The sink failed permanently; the run cannot continue
    #[error("sink failed: {0}")]
    SinkFailed(SinkError),

    /// A previous sink failure aborted the run
    #[error("run aborted after unrecoverable sink failure")]
    RunAborted,
}

impl DecodeError {
    /// True when the error poisons every later decode call
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::SinkFailed(_) | Self::RunAborted)
    }
}

impl From<SinkError> for DecodeError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::CapacityExceeded { .. } => Self::SinkOverflow(err),
            SinkError::Disconnected => Self::SinkFailed(err),
        }
    }
}

/// Result type alias using DecodeError
pub type DecodeResult<T> = Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_message() {
        let err = DecodeError::Truncated {
            declared: 401,
            max: 400,
        };
        let msg = err.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("400"));
    }

    #[test]
    fn test_capacity_maps_to_overflow() {
        let err: DecodeError = SinkError::CapacityExceeded {
            crate_id: 1,
            slot: 4,
            capacity: 16,
        }
        .into();
        assert!(matches!(err, DecodeError::SinkOverflow(_)));
        assert!(!err.is_fatal_for_run());
    }

    #[test]
    fn test_disconnect_is_fatal_for_run() {
        let err: DecodeError = SinkError::Disconnected.into();
        assert!(matches!(err, DecodeError::SinkFailed(_)));
        assert!(err.is_fatal_for_run());
        assert!(DecodeError::RunAborted.is_fatal_for_run());
    }

    #[test]
    fn test_malformed_bank_message() {
        let err = DecodeError::MalformedBank {
            offset: 7,
            len: 12,
            remaining: 3,
        };
        assert!(err.to_string().contains("word 7"));
    }
}
