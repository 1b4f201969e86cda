//! Common types for the module decoders

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::common::{MAX_ROC, MAX_SLOT};

/// One decoded (channel, value) measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedHit {
    pub crate_id: u32,
    pub slot: u32,
    pub channel: u32,
    pub value: u32,
    /// Word the hit was decoded from
    pub raw: u32,
    /// Position of the event inside a multiblock buffer (0 otherwise)
    pub sub_event: u32,
}

/// Pipelining frame-word layout
pub mod frame {
    pub const TAG_BIT: u32 = 0x8000_0000;
    pub const TYPE_SHIFT: u32 = 27;
    pub const TYPE_MASK: u32 = 0xF;
    pub const SLOT_SHIFT: u32 = 22;
    pub const SLOT_MASK: u32 = 0x1F;

    pub const BLOCK_NUMBER_SHIFT: u32 = 8;
    pub const BLOCK_NUMBER_MASK: u32 = 0x3FF;
    pub const BLOCK_SIZE_MASK: u32 = 0xFF;
    pub const WORD_COUNT_MASK: u32 = 0x3F_FFFF;
    pub const EVENT_INDEX_MASK: u32 = 0x3F_FFFF;

    pub const BLOCK_HEADER: u32 = 0;
    pub const BLOCK_TRAILER: u32 = 1;
    pub const EVENT_HEADER: u32 = 2;
    pub const FILLER: u32 = 15;
}

/// Classified pipelining word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameWord {
    BlockHeader {
        slot: u32,
        block_number: u32,
        block_size: u32,
    },
    BlockTrailer {
        slot: u32,
        word_count: u32,
    },
    EventHeader {
        slot: u32,
        index: u32,
    },
    /// Tagged filler word
    Filler,
    /// Untagged word or a tagged word of any other type
    Data,
}

impl FrameWord {
    pub fn classify(word: u32) -> Self {
        if word & frame::TAG_BIT == 0 {
            return Self::Data;
        }
        let slot = (word >> frame::SLOT_SHIFT) & frame::SLOT_MASK;
        match (word >> frame::TYPE_SHIFT) & frame::TYPE_MASK {
            frame::BLOCK_HEADER => Self::BlockHeader {
                slot,
                block_number: (word >> frame::BLOCK_NUMBER_SHIFT) & frame::BLOCK_NUMBER_MASK,
                block_size: word & frame::BLOCK_SIZE_MASK,
            },
            frame::BLOCK_TRAILER => Self::BlockTrailer {
                slot,
                word_count: word & frame::WORD_COUNT_MASK,
            },
            frame::EVENT_HEADER => Self::EventHeader {
                slot,
                index: word & frame::EVENT_INDEX_MASK,
            },
            frame::FILLER => Self::Filler,
            _ => Self::Data,
        }
    }

    fn tagged(kind: u32, slot: u32) -> u32 {
        frame::TAG_BIT
            | ((kind & frame::TYPE_MASK) << frame::TYPE_SHIFT)
            | ((slot & frame::SLOT_MASK) << frame::SLOT_SHIFT)
    }

    pub fn block_header(slot: u32, block_number: u32, block_size: u32) -> u32 {
        Self::tagged(frame::BLOCK_HEADER, slot)
            | ((block_number & frame::BLOCK_NUMBER_MASK) << frame::BLOCK_NUMBER_SHIFT)
            | (block_size & frame::BLOCK_SIZE_MASK)
    }

    pub fn block_trailer(slot: u32, word_count: u32) -> u32 {
        Self::tagged(frame::BLOCK_TRAILER, slot) | (word_count & frame::WORD_COUNT_MASK)
    }

    pub fn event_header(slot: u32, index: u32) -> u32 {
        Self::tagged(frame::EVENT_HEADER, slot) | (index & frame::EVENT_INDEX_MASK)
    }

    pub fn filler(slot: u32) -> u32 {
        Self::tagged(frame::FILLER, slot)
    }
}

/// Crate/slot identity of a decoder, bounds-checked once on first use
#[derive(Debug, Clone)]
pub struct SlotAddress {
    crate_id: u32,
    slot: u32,
    checked: bool,
}

impl SlotAddress {
    pub fn new(crate_id: u32, slot: u32) -> Self {
        Self {
            crate_id,
            slot,
            checked: false,
        }
    }

    /// Clamp out-of-range ids to 0 the first time this is called
    ///
    /// Returns true when a clamp happened.
    pub fn check_bounds(&mut self, family: &str) -> bool {
        if self.checked {
            return false;
        }
        self.checked = true;

        let mut clamped = false;
        if self.crate_id >= MAX_ROC {
            error!(
                family,
                crate_id = self.crate_id,
                max = MAX_ROC,
                "crate out of bounds, using crate 0"
            );
            self.crate_id = 0;
            clamped = true;
        }
        if self.slot >= MAX_SLOT {
            error!(
                family,
                slot = self.slot,
                max = MAX_SLOT,
                "slot out of bounds, using slot 0"
            );
            self.slot = 0;
            clamped = true;
        }
        clamped
    }

    pub fn crate_id(&self) -> u32 {
        self.crate_id
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }
}

/// Extract a masked, shifted field
#[inline]
pub fn field(word: u32, mask: u32, shift: u32) -> u32 {
    (word & mask).checked_shr(shift).unwrap_or(0)
}

/// Place a value into a masked, shifted field
#[inline]
pub fn place(value: u32, mask: u32, shift: u32) -> u32 {
    value.checked_shl(shift).unwrap_or(0) & mask
}
