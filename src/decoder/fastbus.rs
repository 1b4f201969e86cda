//! Fastbus-style module decoder
//!
//! Single-event family: every data word carries the module's slot number in
//! a fixed field, so a module's data is the run of consecutive words whose
//! slot field matches.

use tracing::{trace, warn};

use super::common::{field, place, DecodedHit, SlotAddress};
use crate::common::{DecoderDiagnostics, SinkError, Warning};
use crate::config::ModuleConfig;
use crate::sink::SlotSink;

/// Decoder bound to one Fastbus (crate, slot)
#[derive(Debug, Clone)]
pub struct FastbusModule {
    config: ModuleConfig,
    address: SlotAddress,
    header: u32,
    words_seen: usize,
    diagnostics: DecoderDiagnostics,
}

impl FastbusModule {
    pub fn new(crate_id: u32, config: ModuleConfig, diagnostics: DecoderDiagnostics) -> Self {
        Self {
            address: SlotAddress::new(crate_id, config.slot),
            config,
            header: 0,
            words_seen: 0,
            diagnostics,
        }
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    pub fn crate_id(&self) -> u32 {
        self.address.crate_id()
    }

    pub fn slot(&self) -> u32 {
        self.address.slot()
    }

    /// True when the word's slot field names this module
    #[inline]
    pub fn is_slot(&self, word: u32) -> bool {
        field(word, self.config.slot_mask, self.config.slot_shift) == self.config.slot
    }

    /// Extract (channel, value) from a data word
    #[inline]
    pub fn decode_word(&self, word: u32) -> (u32, u32) {
        (
            field(word, self.config.chan_mask, self.config.chan_shift),
            word & self.config.data_mask(),
        )
    }

    /// Build a data word for this module (inverse of `decode_word`)
    pub fn encode_word(&self, channel: u32, value: u32) -> u32 {
        place(self.config.slot, self.config.slot_mask, self.config.slot_shift)
            | place(channel, self.config.chan_mask, self.config.chan_shift)
            | (value & self.config.data_mask())
    }

    /// Decode this module's words from the front of `words`
    ///
    /// Scans while the slot field matches, stopping at the first foreign word
    /// or the end of the slice. With a header configured the first matching
    /// word is kept as header and not emitted. Returns the number of words
    /// consumed (header included).
    pub fn load_slot<S: SlotSink>(
        &mut self,
        sink: &mut S,
        words: &[u32],
    ) -> Result<usize, SinkError> {
        self.address.check_bounds("fastbus");
        self.header = 0;
        self.words_seen = 0;

        while self.words_seen < words.len() && self.is_slot(words[self.words_seen]) {
            let word = words[self.words_seen];
            if self.config.has_header && self.words_seen == 0 {
                self.header = word;
                trace!(slot = self.config.slot, header = word, "fastbus header");
            } else {
                let (channel, value) = self.decode_word(word);
                sink.load_data(&DecodedHit {
                    crate_id: self.address.crate_id(),
                    slot: self.address.slot(),
                    channel,
                    value,
                    raw: word,
                    sub_event: 0,
                })?;
            }
            self.words_seen += 1;
        }

        self.check_word_count();
        Ok(self.words_seen)
    }

    fn check_word_count(&mut self) {
        if !self.config.has_header || self.config.wdcnt_mask == 0 || self.words_seen == 0 {
            return;
        }
        let expected = (self.header & self.config.wdcnt_mask) as usize;
        if expected != self.words_seen && self.diagnostics.record(Warning::WordCountMismatch) {
            warn!(
                crate_id = self.address.crate_id(),
                slot = self.address.slot(),
                expected,
                seen = self.words_seen,
                occurrences = self.diagnostics.count(Warning::WordCountMismatch),
                "fastbus header word count mismatch"
            );
        }
    }

    /// Header word captured by the last `load_slot` (0 when none)
    pub fn header(&self) -> u32 {
        self.header
    }

    /// Words consumed by the last `load_slot`
    pub fn words_seen(&self) -> usize {
        self.words_seen
    }

    pub fn diagnostics(&self) -> &DecoderDiagnostics {
        &self.diagnostics
    }
}
