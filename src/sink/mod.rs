//! Slot Data sinks
//!
//! A sink receives decoded hits in buffer order. `SlotDataStore` keeps them
//! in memory grouped per (crate, slot); `ChannelSink` forwards them to a
//! consumer thread over a bounded channel.

use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};

use tracing::{debug, warn};

use crate::common::SinkError;
use crate::decoder::DecodedHit;

/// Consumer of decoded hits
pub trait SlotSink {
    /// Called once per physics event before its hits are loaded
    fn begin_event(&mut self, _event_number: u32) {}

    /// Append one hit
    fn load_data(&mut self, hit: &DecodedHit) -> Result<(), SinkError>;
}

impl<S: SlotSink + ?Sized> SlotSink for &mut S {
    fn begin_event(&mut self, event_number: u32) {
        (**self).begin_event(event_number)
    }

    fn load_data(&mut self, hit: &DecodedHit) -> Result<(), SinkError> {
        (**self).load_data(hit)
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Hits of one slot in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotData {
    hits: Vec<DecodedHit>,
}

impl SlotData {
    pub fn hits(&self) -> &[DecodedHit] {
        &self.hits
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Values recorded for a channel, in order
    pub fn channel_values(&self, channel: u32) -> Vec<u32> {
        self.hits
            .iter()
            .filter(|h| h.channel == channel)
            .map(|h| h.value)
            .collect()
    }
}

/// Per-slot hit storage with a fixed per-slot capacity
#[derive(Debug, Clone)]
pub struct SlotDataStore {
    capacity: usize,
    event_number: u32,
    slots: BTreeMap<(u32, u32), SlotData>,
}

impl SlotDataStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            event_number: 0,
            slots: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Event number passed to the last `begin_event`
    pub fn event_number(&self) -> u32 {
        self.event_number
    }

    pub fn slot(&self, crate_id: u32, slot: u32) -> Option<&SlotData> {
        self.slots.get(&(crate_id, slot))
    }

    /// All hits, ordered by (crate, slot) then arrival
    pub fn hits(&self) -> impl Iterator<Item = &DecodedHit> {
        self.slots.values().flat_map(|s| s.hits.iter())
    }

    pub fn num_hits(&self) -> usize {
        self.slots.values().map(SlotData::len).sum()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

impl SlotSink for SlotDataStore {
    fn begin_event(&mut self, event_number: u32) {
        self.event_number = event_number;
        self.clear();
    }

    fn load_data(&mut self, hit: &DecodedHit) -> Result<(), SinkError> {
        let data = self.slots.entry((hit.crate_id, hit.slot)).or_default();
        if data.hits.len() >= self.capacity {
            return Err(SinkError::CapacityExceeded {
                crate_id: hit.crate_id,
                slot: hit.slot,
                capacity: self.capacity,
            });
        }
        data.hits.push(*hit);
        Ok(())
    }
}

// =============================================================================
// Channel sink
// =============================================================================

/// Message sent by `ChannelSink`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMessage {
    BeginEvent(u32),
    Hit(DecodedHit),
}

/// Forwards hits to another thread over a bounded channel
///
/// Every event boundary is sent, so events without hits still reach the
/// consumer. Blocks while the channel is full. A dropped receiver is
/// reported as `SinkError::Disconnected` by the next `load_data`.
#[derive(Debug)]
pub struct ChannelSink {
    tx: SyncSender<SinkMessage>,
    disconnected: bool,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel
    pub fn bounded(capacity: usize) -> (Self, Receiver<SinkMessage>) {
        let (tx, rx) = std::sync::mpsc::sync_channel(capacity);
        (
            Self {
                tx,
                disconnected: false,
            },
            rx,
        )
    }

    fn send(&self, msg: SinkMessage) -> Result<(), SinkError> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => {
                debug!("sink channel full, waiting for consumer");
                self.tx.send(msg).map_err(|_| SinkError::Disconnected)
            }
            Err(TrySendError::Disconnected(_)) => Err(SinkError::Disconnected),
        }
    }
}

impl SlotSink for ChannelSink {
    fn begin_event(&mut self, event_number: u32) {
        if self.disconnected {
            return;
        }
        if self.send(SinkMessage::BeginEvent(event_number)).is_err() {
            warn!(event_number, "sink consumer disconnected");
            self.disconnected = true;
        }
    }

    fn load_data(&mut self, hit: &DecodedHit) -> Result<(), SinkError> {
        if self.disconnected {
            return Err(SinkError::Disconnected);
        }
        let result = self.send(SinkMessage::Hit(*hit));
        if result.is_err() {
            self.disconnected = true;
        }
        result
    }
}
