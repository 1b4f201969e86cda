//! Builder for CODA event buffers
//!
//! Used by the emulator and by tests to produce well-framed buffers.

use super::constants::*;
use super::{text_to_words, ControlKind, EventKind, PrescaleFormat};

/// Low half of a ROC bank header word (bank of 32-bit words)
const ROC_BANK_TAG: u32 = 0x0100;

/// Incrementally builds one event buffer; the length word is filled in by `build`
#[derive(Debug, Clone)]
pub struct BufferBuilder {
    words: Vec<u32>,
}

impl BufferBuilder {
    fn with_header(kind: EventKind, tag: u32) -> Self {
        Self {
            words: vec![0, (kind.event_type() << EVENT_TYPE_SHIFT) | tag],
        }
    }

    /// Physics event of the given trigger type with a standard event-ID bank
    pub fn physics(trigger: u32, event_number: u32) -> Self {
        let mut builder = Self::with_header(EventKind::Physics(trigger), PHYSICS_HEADER_TAG);
        builder
            .words
            .extend_from_slice(&[EVENT_ID_LENGTH, EVENT_ID_HEADER, event_number, 0, 0]);
        builder
    }

    /// Scaler event; ROC banks follow the header directly
    pub fn scaler() -> Self {
        Self::with_header(EventKind::Scaler, PHYSICS_HEADER_TAG)
    }

    /// Control event: `time`, then run number/type for prestart or
    /// reserved/event count for the others
    pub fn control(kind: ControlKind, time: u32, a: u32, b: u32) -> Self {
        let mut builder = Self::with_header(EventKind::Control(kind), CONTROL_HEADER_TAG);
        builder.words.extend_from_slice(&[time, a, b]);
        builder
    }

    /// EPICS event carrying `text`
    pub fn epics(text: &str) -> Self {
        let mut builder = Self::with_header(EventKind::Epics, PHYSICS_HEADER_TAG);
        builder.words.extend(text_to_words(text));
        builder
    }

    /// Trigger-supervisor prescale register record
    pub fn prescale_registers(registers: &[u32]) -> Self {
        let mut builder = Self::with_header(
            EventKind::Prescale(PrescaleFormat::Registers),
            PHYSICS_HEADER_TAG,
        );
        builder.words.extend_from_slice(registers);
        builder
    }

    /// `psN=value` prescale text record
    pub fn prescale_text(text: &str) -> Self {
        let mut builder = Self::with_header(
            EventKind::Prescale(PrescaleFormat::Text),
            PHYSICS_HEADER_TAG,
        );
        builder.words.extend(text_to_words(text));
        builder
    }

    /// Append a ROC bank with the given payload
    pub fn roc(mut self, roc: u32, payload: &[u32]) -> Self {
        self.words.push(payload.len() as u32 + 1);
        self.words.push((roc << ROC_ID_SHIFT) | ROC_BANK_TAG);
        self.words.extend_from_slice(payload);
        self
    }

    /// Append raw words (for malformed-buffer tests)
    pub fn raw(mut self, words: &[u32]) -> Self {
        self.words.extend_from_slice(words);
        self
    }

    /// Finish the buffer, setting word 0 to the number of following words
    pub fn build(mut self) -> Vec<u32> {
        self.words[0] = self.words.len() as u32 - 1;
        self.words
    }
}
