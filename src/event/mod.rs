//! CODA event buffer framing
//!
//! Classifies a buffer by its event type and walks the readout-crate (ROC)
//! banks it carries. All framing is validated before any payload is touched.

pub mod builder;
pub mod epics;
pub mod prescale;
pub mod run_info;

pub use builder::BufferBuilder;
pub use epics::{EpicsEntry, EpicsStore};
pub use prescale::PrescaleTable;
pub use run_info::RunInfo;

use serde::Serialize;

use crate::common::DecodeError;

/// CODA event-type codes and framing constants
pub mod constants {
    pub const EVENT_TYPE_SHIFT: u32 = 16;

    pub const PHYSICS_MIN: u32 = 1;
    pub const PHYSICS_MAX: u32 = 15;
    pub const SYNC_EVENT: u32 = 16;
    pub const PRESTART_EVENT: u32 = 17;
    pub const GO_EVENT: u32 = 18;
    pub const PAUSE_EVENT: u32 = 19;
    pub const END_EVENT: u32 = 20;
    pub const TS_PRESCALE_EVENT: u32 = 120;
    pub const EPICS_EVENT: u32 = 131;
    pub const PRESCALE_EVENT: u32 = 133;
    pub const SCALER_EVENT: u32 = 140;

    /// Low half of a physics event header word (bank of banks, tag 0xCC)
    pub const PHYSICS_HEADER_TAG: u32 = 0x10CC;
    /// Low half of a control event header word
    pub const CONTROL_HEADER_TAG: u32 = 0x01CC;
    /// Event-ID bank header word
    pub const EVENT_ID_HEADER: u32 = 0xC000_0100;
    /// Usual event-ID bank length (header, number, class, status)
    pub const EVENT_ID_LENGTH: u32 = 4;

    /// Index of the event-ID bank length word
    pub const EVENT_ID_OFFSET: usize = 2;
    /// Index of the event number
    pub const EVENT_NUMBER_OFFSET: usize = 4;
    /// First ROC bank of a scaler event
    pub const SCALER_ROC_OFFSET: usize = 2;

    pub const ROC_ID_SHIFT: u32 = 16;
    pub const ROC_ID_MASK: u32 = 0xFF;
}

/// Record format of a prescale event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrescaleFormat {
    /// Trigger supervisor register dump
    Registers,
    /// `psN=value` text record
    Text,
}

/// Run-control transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControlKind {
    Sync,
    Prestart,
    Go,
    Pause,
    End,
}

/// Classification of an event buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    /// Trigger event with its trigger type (1..=15)
    Physics(u32),
    Scaler,
    Epics,
    Prescale(PrescaleFormat),
    Control(ControlKind),
    /// Unhandled event type
    Other(u32),
}

impl EventKind {
    /// Map a CODA event type to its kind
    pub fn from_type(event_type: u32) -> Self {
        use constants::*;
        match event_type {
            PHYSICS_MIN..=PHYSICS_MAX => Self::Physics(event_type),
            SYNC_EVENT => Self::Control(ControlKind::Sync),
            PRESTART_EVENT => Self::Control(ControlKind::Prestart),
            GO_EVENT => Self::Control(ControlKind::Go),
            PAUSE_EVENT => Self::Control(ControlKind::Pause),
            END_EVENT => Self::Control(ControlKind::End),
            TS_PRESCALE_EVENT => Self::Prescale(PrescaleFormat::Registers),
            PRESCALE_EVENT => Self::Prescale(PrescaleFormat::Text),
            EPICS_EVENT => Self::Epics,
            SCALER_EVENT => Self::Scaler,
            other => Self::Other(other),
        }
    }

    /// Classify a buffer from its header word (word 1)
    pub fn classify(buffer: &[u32]) -> Option<Self> {
        buffer
            .get(1)
            .map(|&header| Self::from_type(event_type(header)))
    }

    /// CODA event type code of this kind
    pub fn event_type(&self) -> u32 {
        use constants::*;
        match self {
            Self::Physics(t) | Self::Other(t) => *t,
            Self::Control(ControlKind::Sync) => SYNC_EVENT,
            Self::Control(ControlKind::Prestart) => PRESTART_EVENT,
            Self::Control(ControlKind::Go) => GO_EVENT,
            Self::Control(ControlKind::Pause) => PAUSE_EVENT,
            Self::Control(ControlKind::End) => END_EVENT,
            Self::Prescale(PrescaleFormat::Registers) => TS_PRESCALE_EVENT,
            Self::Prescale(PrescaleFormat::Text) => PRESCALE_EVENT,
            Self::Epics => EPICS_EVENT,
            Self::Scaler => SCALER_EVENT,
        }
    }

    pub fn is_physics(&self) -> bool {
        matches!(self, Self::Physics(_))
    }
}

/// Event type field of a header word
#[inline]
pub fn event_type(header: u32) -> u32 {
    header >> constants::EVENT_TYPE_SHIFT
}

/// Location of one ROC bank inside an event buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RocBank {
    /// ROC (crate) id from the bank header
    pub roc: u32,
    /// Index of the bank length word
    pub offset: usize,
    /// Index of the first payload word
    pub start: usize,
    /// One past the last payload word
    pub end: usize,
}

impl RocBank {
    /// Payload words of this bank
    pub fn payload<'a>(&self, buffer: &'a [u32]) -> &'a [u32] {
        &buffer[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Walk the ROC banks of `event`, starting at word `first`
///
/// Every bank must fit inside the event; the first bank that overruns
/// (or declares no header word) fails the whole event.
pub fn roc_banks(event: &[u32], first: usize) -> Result<Vec<RocBank>, DecodeError> {
    let mut banks = Vec::new();
    let mut pos = first;

    while pos < event.len() {
        let len = event[pos] as usize;
        let remaining = event.len() - pos - 1;
        if len == 0 || len > remaining {
            return Err(DecodeError::MalformedBank {
                offset: pos,
                len,
                remaining,
            });
        }

        let header = event[pos + 1];
        banks.push(RocBank {
            roc: (header >> constants::ROC_ID_SHIFT) & constants::ROC_ID_MASK,
            offset: pos,
            start: pos + 2,
            end: pos + 1 + len,
        });
        pos += len + 1;
    }

    Ok(banks)
}

/// Index of the first ROC bank of a physics event
///
/// Checks that the event-ID bank fits inside the event.
pub fn physics_roc_offset(event: &[u32]) -> Result<usize, DecodeError> {
    let id_offset = constants::EVENT_ID_OFFSET;
    let len = event.get(id_offset).copied().unwrap_or(0) as usize;
    let remaining = event.len().saturating_sub(id_offset + 1);
    if len > remaining {
        return Err(DecodeError::MalformedBank {
            offset: id_offset,
            len,
            remaining,
        });
    }
    Ok(id_offset + 1 + len)
}

/// Event number of a physics event (0 when the event-ID bank is too short)
pub fn physics_event_number(event: &[u32]) -> u32 {
    match event.get(constants::EVENT_ID_OFFSET) {
        Some(&len) if len >= 2 => event
            .get(constants::EVENT_NUMBER_OFFSET)
            .copied()
            .unwrap_or(0),
        _ => 0,
    }
}

/// Unpack ASCII text carried in 32-bit words (little-endian bytes, NUL padded)
pub fn words_to_text(words: &[u32]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .take_while(|&b| b != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Pack ASCII text into 32-bit words (little-endian bytes, NUL padded)
pub fn text_to_words(text: &str) -> Vec<u32> {
    text.as_bytes()
        .chunks(4)
        .map(|chunk| {
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(bytes)
        })
        .collect()
}
