//! Block splitter for pipelining modules
//!
//! A pipelining module in multiblock mode packs several events into one
//! wire buffer:
//!
//! ```text
//! BlockHeader(slot, n) EventHeader(slot, 0) data... EventHeader(slot, 1) data... BlockTrailer(slot)
//! ```
//!
//! The splitter cuts one module's share of such a buffer into self-contained
//! sub-buffers, one per event, each starting with a copy of the block header.
//! Frame and data words of other slots are filtered out.

use tracing::{error, info, warn};

use super::common::FrameWord;
use crate::common::{DecoderDiagnostics, Warning};

/// Per-module splitting state
///
/// The sub-buffer list is rebuilt by every `split_buffer` call. Only the
/// multiblock flag survives from one buffer to the next.
#[derive(Debug, Clone)]
pub struct BlockSplitter {
    slot: u32,
    multiblock: bool,
    first_time: bool,
    blocks: Vec<Vec<u32>>,
    cursor: usize,
    block_size: usize,
    diagnostics: DecoderDiagnostics,
}

/// Scan state of one `split_buffer` call
struct Scan {
    /// Last block header belonged to this slot
    owned: bool,
    /// Any block header of this slot was seen
    seen_own: bool,
    block_header: u32,
    block_words: usize,
    event_slot: Option<u32>,
    open: Option<Vec<u32>>,
    produced: Vec<Vec<u32>>,
    declared: usize,
}

impl BlockSplitter {
    pub fn new(slot: u32, diagnostics: DecoderDiagnostics) -> Self {
        Self {
            slot,
            multiblock: false,
            first_time: true,
            blocks: Vec::new(),
            cursor: 0,
            block_size: 0,
            diagnostics,
        }
    }

    /// Split one wire buffer into per-event sub-buffers
    ///
    /// In legacy mode the whole buffer is the single sub-buffer. Returns the
    /// number of sub-buffers produced.
    ///
    /// Buffers are scanned until one carries a block header of this slot;
    /// that header decides between legacy and multiblock mode.
    pub fn split_buffer(&mut self, buffer: &[u32]) -> usize {
        self.blocks.clear();
        self.cursor = 0;
        self.block_size = 0;

        if !self.first_time && !self.multiblock {
            self.blocks.push(buffer.to_vec());
            return 1;
        }

        let mut scan = Scan {
            owned: false,
            seen_own: false,
            block_header: 0,
            block_words: 0,
            event_slot: None,
            open: None,
            produced: Vec::new(),
            declared: 0,
        };

        for &word in buffer {
            self.scan_word(&mut scan, word);
        }

        if let Some(sub) = scan.open.take() {
            self.report(Warning::MissingTrailer, "block ended without trailer");
            scan.produced.push(sub);
        }
        if scan.seen_own {
            self.first_time = false;
        }

        if !self.multiblock {
            self.blocks.push(buffer.to_vec());
            return 1;
        }

        self.block_size = scan.declared;
        self.blocks = scan.produced;
        if self.blocks.len() != self.block_size && self.diagnostics.record(Warning::BlockSizeMismatch)
        {
            error!(
                slot = self.slot,
                declared = self.block_size,
                produced = self.blocks.len(),
                occurrences = self.diagnostics.count(Warning::BlockSizeMismatch),
                "number of events in block inconsistent with block size"
            );
        }
        self.blocks.len()
    }

    fn scan_word(&mut self, scan: &mut Scan, word: u32) {
        let frame = FrameWord::classify(word);
        if scan.owned && !matches!(frame, FrameWord::BlockHeader { .. }) {
            scan.block_words += 1;
        }

        match frame {
            FrameWord::BlockHeader {
                slot, block_size, ..
            } => {
                scan.owned = slot == self.slot;
                if !scan.owned {
                    return;
                }
                scan.seen_own = true;
                if let Some(sub) = scan.open.take() {
                    self.report(Warning::MissingTrailer, "new block before trailer");
                    scan.produced.push(sub);
                }
                if block_size > 1 && !self.multiblock {
                    info!(slot = self.slot, block_size, "multiblock mode enabled");
                    self.multiblock = true;
                }
                scan.block_header = word;
                scan.block_words = 1;
                scan.event_slot = None;
                scan.declared += block_size as usize;
            }
            FrameWord::BlockTrailer { slot, word_count } => {
                if !scan.owned || slot != self.slot {
                    return;
                }
                let mut sub = scan.open.take().unwrap_or_else(|| vec![scan.block_header]);
                sub.push(word);
                scan.produced.push(sub);
                scan.owned = false;

                if word_count as usize != scan.block_words
                    && self.diagnostics.record(Warning::WordCountMismatch)
                {
                    warn!(
                        slot = self.slot,
                        expected = word_count,
                        seen = scan.block_words,
                        occurrences = self.diagnostics.count(Warning::WordCountMismatch),
                        "block trailer word count mismatch"
                    );
                }
            }
            FrameWord::EventHeader { slot, .. } => {
                if !scan.owned {
                    return;
                }
                scan.event_slot = Some(slot);
                // older firmware leaves the event header slot at zero
                if slot == self.slot || slot == 0 {
                    if let Some(sub) = scan.open.take() {
                        scan.produced.push(sub);
                    }
                    scan.open = Some(vec![scan.block_header, word]);
                } else {
                    self.report(Warning::InconsistentSlot, "event header of foreign slot");
                }
            }
            FrameWord::Filler | FrameWord::Data => {
                if !scan.owned {
                    return;
                }
                if scan.event_slot.is_some_and(|s| s != self.slot) {
                    self.report(Warning::InconsistentSlot, "inconsistent slot number");
                }
                match scan.open.as_mut() {
                    Some(sub) => sub.push(word),
                    None => self.report(Warning::OrphanData, "data before event header"),
                }
            }
        }
    }

    fn report(&mut self, warning: Warning, message: &str) {
        if self.diagnostics.record(warning) {
            warn!(
                slot = self.slot,
                kind = ?warning,
                occurrences = self.diagnostics.count(warning),
                "{}",
                message
            );
        }
    }

    /// Rewind iteration to the first sub-buffer
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Next sub-buffer, or None once all have been returned
    pub fn next_block(&mut self) -> Option<&[u32]> {
        let block = self.blocks.get(self.cursor)?;
        self.cursor += 1;
        Some(block.as_slice())
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.blocks.len()
    }

    /// Number of sub-buffers from the last split
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_multiblock(&self) -> bool {
        self.multiblock
    }

    /// Sum of block sizes declared by this slot's block headers in the last split
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn diagnostics(&self) -> &DecoderDiagnostics {
        &self.diagnostics
    }
}
