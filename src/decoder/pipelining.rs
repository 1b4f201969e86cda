//! Pipelining (block-structured) module decoder
//!
//! The module's share of a crate payload is first cut into per-event
//! sub-buffers by its `BlockSplitter`; each sub-buffer is then decoded on
//! its own, in order.

use tracing::trace;

use super::block_splitter::BlockSplitter;
use super::common::{field, place, DecodedHit, FrameWord, SlotAddress};
use crate::common::{DecoderDiagnostics, SinkError};
use crate::config::ModuleConfig;
use crate::sink::SlotSink;

/// Decode state inside one sub-buffer
#[derive(Debug, Clone, Default)]
struct EventState {
    /// Inside a block whose header carries this module's slot
    owned: bool,
    last_event_index: Option<u32>,
}

/// Decoder bound to one pipelining (crate, slot)
#[derive(Debug, Clone)]
pub struct PipeliningModule {
    config: ModuleConfig,
    address: SlotAddress,
    splitter: BlockSplitter,
    state: EventState,
}

impl PipeliningModule {
    pub fn new(crate_id: u32, config: ModuleConfig, diagnostics: DecoderDiagnostics) -> Self {
        Self {
            address: SlotAddress::new(crate_id, config.slot),
            splitter: BlockSplitter::new(config.slot, diagnostics),
            config,
            state: EventState::default(),
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

    /// Extract (channel, value) from a data word
    #[inline]
    pub fn decode_word(&self, word: u32) -> (u32, u32) {
        (
            field(word, self.config.chan_mask, self.config.chan_shift),
            word & self.config.data_mask(),
        )
    }

    /// Build an untagged data word (inverse of `decode_word`)
    pub fn encode_word(&self, channel: u32, value: u32) -> u32 {
        place(channel, self.config.chan_mask, self.config.chan_shift)
            | (value & self.config.data_mask())
    }

    /// Split the crate payload and decode every sub-event in order
    ///
    /// Returns the number of sub-events decoded.
    pub fn decode<S: SlotSink>(
        &mut self,
        sink: &mut S,
        payload: &[u32],
    ) -> Result<usize, SinkError> {
        self.address.check_bounds("pipelining");
        self.state = EventState::default();

        let count = self.splitter.split_buffer(payload);
        self.splitter.reset();

        let mut sub_event = 0;
        while let Some(block) = self.splitter.next_block() {
            decode_event(
                &self.config,
                &self.address,
                &mut self.state,
                sink,
                block,
                sub_event,
            )?;
            sub_event += 1;
        }

        Ok(count)
    }

    pub fn splitter(&self) -> &BlockSplitter {
        &self.splitter
    }

    pub fn is_multiblock(&self) -> bool {
        self.splitter.is_multiblock()
    }

    /// Event index from the last event header seen for this slot
    pub fn last_event_index(&self) -> Option<u32> {
        self.state.last_event_index
    }

    pub fn diagnostics(&self) -> &DecoderDiagnostics {
        self.splitter.diagnostics()
    }
}

/// Decode one self-contained sub-buffer
///
/// Words count as ours only inside a block opened by our block header.
/// Frame words and fillers are not hits.
fn decode_event<S: SlotSink>(
    config: &ModuleConfig,
    address: &SlotAddress,
    state: &mut EventState,
    sink: &mut S,
    words: &[u32],
    sub_event: u32,
) -> Result<(), SinkError> {
    state.owned = false;

    for &word in words {
        match FrameWord::classify(word) {
            FrameWord::BlockHeader { slot, .. } => state.owned = slot == config.slot,
            FrameWord::BlockTrailer { slot, .. } => {
                if slot == config.slot {
                    state.owned = false;
                }
            }
            FrameWord::EventHeader { slot, index } => {
                if state.owned && (slot == config.slot || slot == 0) {
                    trace!(slot = config.slot, index, sub_event, "event header");
                    state.last_event_index = Some(index);
                }
            }
            FrameWord::Filler => {}
            FrameWord::Data => {
                if !state.owned {
                    continue;
                }
                sink.load_data(&DecodedHit {
                    crate_id: address.crate_id(),
                    slot: address.slot(),
                    channel: field(word, config.chan_mask, config.chan_shift),
                    value: word & config.data_mask(),
                    raw: word,
                    sub_event,
                })?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Warning;
    use crate::sink::SlotDataStore;

    fn fadc(slot: u32) -> PipeliningModule {
        PipeliningModule::new(
            3,
            ModuleConfig::pipelining(slot, 0x0780_0000, 23, 0x0000_0FFF),
            DecoderDiagnostics::default(),
        )
    }

    fn block(
        module: &PipeliningModule,
        events: &[&[(u32, u32)]],
        trailer_count: Option<u32>,
    ) -> Vec<u32> {
        let slot = module.config().slot;
        let mut words = vec![FrameWord::block_header(slot, 1, events.len() as u32)];
        for (i, hits) in events.iter().enumerate() {
            words.push(FrameWord::event_header(slot, i as u32));
            words.extend(hits.iter().map(|&(c, v)| module.encode_word(c, v)));
        }
        let count = trailer_count.unwrap_or(words.len() as u32 + 1);
        words.push(FrameWord::block_trailer(slot, count));
        words
    }

    fn values(store: &SlotDataStore, crate_id: u32, slot: u32) -> Vec<(u32, u32, u32)> {
        store
            .slot(crate_id, slot)
            .map(|s| {
                s.hits()
                    .iter()
                    .map(|h| (h.sub_event, h.channel, h.value))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_multiblock_hits_tagged_by_sub_event() {
        let mut module = fadc(3);
        let mut store = SlotDataStore::new(64);
        let payload = block(&module, &[&[(0, 100), (1, 101)], &[(2, 200)]], None);

        assert_eq!(module.decode(&mut store, &payload).unwrap(), 2);
        assert!(module.is_multiblock());
        assert_eq!(
            values(&store, 3, 3),
            vec![(0, 0, 100), (0, 1, 101), (1, 2, 200)]
        );
        assert_eq!(module.last_event_index(), Some(1));
        assert_eq!(module.diagnostics().total(), 0);
    }

    #[test]
    fn test_legacy_single_event() {
        let mut module = fadc(3);
        let mut store = SlotDataStore::new(64);
        let payload = block(&module, &[&[(5, 55), (6, 66)]], None);

        assert_eq!(module.decode(&mut store, &payload).unwrap(), 1);
        assert!(!module.is_multiblock());
        assert_eq!(values(&store, 3, 3), vec![(0, 5, 55), (0, 6, 66)]);
    }

    #[test]
    fn test_legacy_shared_payload_filters_by_slot() {
        let mut module = fadc(3);
        let neighbour = fadc(4);
        let mut store = SlotDataStore::new(64);

        let mut payload = block(&neighbour, &[&[(1, 999)]], None);
        payload.extend(block(&module, &[&[(1, 11)]], None));
        payload.push(neighbour.encode_word(2, 888));

        module.decode(&mut store, &payload).unwrap();
        assert_eq!(values(&store, 3, 3), vec![(0, 1, 11)]);
        assert!(store.slot(3, 4).is_none());
    }

    #[test]
    fn test_multiblock_interleaved_modules() {
        let mut a = fadc(3);
        let mut b = fadc(4);
        let mut store = SlotDataStore::new(64);

        let mut payload = block(&a, &[&[(0, 1)], &[(0, 2)]], None);
        payload.extend(block(&b, &[&[(1, 10)], &[(1, 20)]], None));

        assert_eq!(a.decode(&mut store, &payload).unwrap(), 2);
        assert_eq!(b.decode(&mut store, &payload).unwrap(), 2);
        assert_eq!(values(&store, 3, 3), vec![(0, 0, 1), (1, 0, 2)]);
        assert_eq!(values(&store, 3, 4), vec![(0, 1, 10), (1, 1, 20)]);
    }

    #[test]
    fn test_filler_is_not_a_hit() {
        let mut module = fadc(3);
        let mut store = SlotDataStore::new(64);
        let mut payload = block(&module, &[&[(0, 1)], &[(0, 2)]], None);
        let trailer = payload.pop().unwrap();
        payload.push(FrameWord::filler(3));
        payload.push(trailer);

        module.decode(&mut store, &payload).unwrap();
        assert_eq!(values(&store, 3, 3), vec![(0, 0, 1), (1, 0, 2)]);
    }

    #[test]
    fn test_trailer_mismatch_does_not_change_hits() {
        let events: &[&[(u32, u32)]] = &[&[(0, 7), (3, 8)], &[(1, 9)]];

        let mut good = fadc(3);
        let mut good_store = SlotDataStore::new(64);
        let payload = block(&good, events, None);
        good.decode(&mut good_store, &payload).unwrap();

        let mut bad = fadc(3);
        let mut bad_store = SlotDataStore::new(64);
        let payload = block(&bad, events, Some(1234));
        bad.decode(&mut bad_store, &payload).unwrap();

        assert_eq!(values(&good_store, 3, 3), values(&bad_store, 3, 3));
        assert_eq!(good.diagnostics().count(Warning::WordCountMismatch), 0);
        assert_eq!(bad.diagnostics().count(Warning::WordCountMismatch), 1);
    }

    #[test]
    fn test_capacity_error_propagates() {
        let mut module = fadc(3);
        let mut store = SlotDataStore::new(1);
        let payload = block(&module, &[&[(0, 1), (1, 2)]], None);
        assert!(matches!(
            module.decode(&mut store, &payload),
            Err(SinkError::CapacityExceeded { .. })
        ));
    }
}
