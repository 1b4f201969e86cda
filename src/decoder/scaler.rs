//! Scaler module decoder
//!
//! A scaler readout is a header word `0xABC` + slot + channel count,
//! followed by one counter word per channel.

use tracing::warn;

use super::common::{DecodedHit, SlotAddress};
use crate::common::{DecoderDiagnostics, Warning};
use crate::config::ModuleConfig;

mod constants {
    pub const HEADER_MASK: u32 = 0xFFF0_0000;
    pub const HEADER_TAG: u32 = 0xABC0_0000;
    pub const SLOT_SHIFT: u32 = 16;
    pub const SLOT_MASK: u32 = 0xF;
    pub const COUNT_MASK: u32 = 0xFF;
}

/// True for a scaler header word
#[inline]
pub fn is_scaler_header(word: u32) -> bool {
    word & constants::HEADER_MASK == constants::HEADER_TAG
}

/// Slot field of a scaler header
#[inline]
pub fn header_slot(word: u32) -> u32 {
    (word >> constants::SLOT_SHIFT) & constants::SLOT_MASK
}

/// Channel count of a scaler header
#[inline]
pub fn header_count(word: u32) -> usize {
    (word & constants::COUNT_MASK) as usize
}

/// Build a scaler header word
pub fn scaler_header(slot: u32, count: u32) -> u32 {
    constants::HEADER_TAG
        | ((slot & constants::SLOT_MASK) << constants::SLOT_SHIFT)
        | (count & constants::COUNT_MASK)
}

/// Decoder bound to one scaler (crate, slot); keeps the latest readout
#[derive(Debug, Clone)]
pub struct ScalerModule {
    config: ModuleConfig,
    address: SlotAddress,
    counts: Vec<u32>,
    raw: Vec<u32>,
    reads: u64,
    diagnostics: DecoderDiagnostics,
}

impl ScalerModule {
    pub fn new(crate_id: u32, config: ModuleConfig, diagnostics: DecoderDiagnostics) -> Self {
        Self {
            address: SlotAddress::new(crate_id, config.slot),
            config,
            counts: Vec::new(),
            raw: Vec::new(),
            reads: 0,
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

    /// Load one readout starting at its header word
    ///
    /// Returns the number of words consumed. A readout cut short by the end
    /// of `words` keeps the counters that are present.
    pub fn load(&mut self, words: &[u32]) -> usize {
        self.address.check_bounds("scaler");
        let Some(&header) = words.first() else {
            return 0;
        };

        let declared = header_count(header);
        let available = words.len() - 1;
        let count = declared.min(available);
        if count < declared && self.diagnostics.record(Warning::WordCountMismatch) {
            warn!(
                crate_id = self.address.crate_id(),
                slot = self.address.slot(),
                expected = declared,
                seen = available,
                "scaler readout truncated"
            );
        }

        let mask = self.config.data_mask();
        self.raw = words[1..=count].to_vec();
        self.counts = self.raw.iter().map(|w| w & mask).collect();
        self.reads += 1;
        count + 1
    }

    /// Counter of a channel from the latest readout
    pub fn count(&self, channel: u32) -> Option<u32> {
        self.counts.get(channel as usize).copied()
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Number of readouts loaded so far
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Latest readout as hits, channel 0 first
    pub fn hits(&self) -> impl Iterator<Item = DecodedHit> + '_ {
        self.counts
            .iter()
            .zip(&self.raw)
            .enumerate()
            .map(|(channel, (&value, &raw))| DecodedHit {
                crate_id: self.address.crate_id(),
                slot: self.address.slot(),
                channel: channel as u32,
                value,
                raw,
                sub_event: 0,
            })
    }

    pub fn diagnostics(&self) -> &DecoderDiagnostics {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaler(slot: u32) -> ScalerModule {
        ScalerModule::new(9, ModuleConfig::scaler(slot), DecoderDiagnostics::default())
    }

    #[test]
    fn test_header_fields() {
        let header = scaler_header(7, 32);
        assert_eq!(header, 0xABC7_0020);
        assert!(is_scaler_header(header));
        assert_eq!(header_slot(header), 7);
        assert_eq!(header_count(header), 32);
        assert!(!is_scaler_header(0xABD0_0000));
    }

    #[test]
    fn test_load_readout() {
        let mut module = scaler(2);
        let words = [scaler_header(2, 3), 100, 200, 0xFFFF_FFFF, 0xDEAD];

        assert_eq!(module.load(&words), 4);
        assert_eq!(module.counts(), &[100, 200, 0xFFFF_FFFF]);
        assert_eq!(module.count(2), Some(0xFFFF_FFFF));
        assert_eq!(module.count(3), None);
        assert_eq!(module.reads(), 1);

        let hits: Vec<_> = module.hits().collect();
        assert_eq!(hits.len(), 3);
        assert_eq!((hits[1].crate_id, hits[1].slot, hits[1].channel), (9, 2, 1));
        assert_eq!(hits[1].value, 200);
    }

    #[test]
    fn test_latest_readout_wins() {
        let mut module = scaler(2);
        module.load(&[scaler_header(2, 2), 1, 2]);
        module.load(&[scaler_header(2, 2), 10, 20]);
        assert_eq!(module.counts(), &[10, 20]);
        assert_eq!(module.reads(), 2);
    }

    #[test]
    fn test_truncated_readout() {
        let mut module = scaler(2);
        assert_eq!(module.load(&[scaler_header(2, 4), 1, 2]), 3);
        assert_eq!(module.counts(), &[1, 2]);
        assert_eq!(module.diagnostics().count(Warning::WordCountMismatch), 1);
    }

    #[test]
    fn test_custom_data_mask() {
        let mut config = ModuleConfig::scaler(1);
        config.data_mask = Some(0x00FF_FFFF);
        let mut module = ScalerModule::new(1, config, DecoderDiagnostics::default());
        module.load(&[scaler_header(1, 1), 0xFF12_3456]);
        assert_eq!(module.count(0), Some(0x0012_3456));
    }
}
