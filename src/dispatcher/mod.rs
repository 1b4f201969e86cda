//! Event dispatcher - top level of the decoding engine
//!
//! Classifies each buffer by event type and routes it:
//! - Physics: every ROC bank goes to the `CrateDecoder` of its crate
//! - Scaler: scaler crates update their counters
//! - EPICS / Prescale: parsed into the query tables
//! - Control: run number and transition times
//!
//! Framing is validated in full before the first hit reaches the sink.
//! A sink that disconnects poisons the dispatcher for the rest of the run.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::common::{
    DecodeCounters, DecodeError, DecodeResult, DecoderDiagnostics, SinkError, Warning, MAX_ROC,
};
use crate::config::{Config, ConfigError, CrateMap, DecoderSettings};
use crate::decoder::{CrateDecoder, DecodedHit};
use crate::event::{
    constants, event_type, physics_event_number, physics_roc_offset, roc_banks, words_to_text,
    ControlKind, EpicsStore, EventKind, PrescaleFormat, PrescaleTable, RocBank, RunInfo,
};
use crate::sink::SlotSink;

/// Forwards hits and counts them
struct CountingSink<'a, S: SlotSink> {
    inner: &'a mut S,
    hits: u64,
}

impl<S: SlotSink> SlotSink for CountingSink<'_, S> {
    fn begin_event(&mut self, event_number: u32) {
        self.inner.begin_event(event_number);
    }

    fn load_data(&mut self, hit: &DecodedHit) -> Result<(), SinkError> {
        self.inner.load_data(hit)?;
        self.hits += 1;
        Ok(())
    }
}

/// Top-level buffer decoder
#[derive(Debug)]
pub struct EventDispatcher {
    settings: DecoderSettings,
    crates: BTreeMap<u32, CrateDecoder>,
    prescale: PrescaleTable,
    epics: EpicsStore,
    run_info: RunInfo,
    event_number: u32,
    poisoned: bool,
    counters: Arc<DecodeCounters>,
    diagnostics: DecoderDiagnostics,
}

impl EventDispatcher {
    /// Resolve the crate map into decoders
    pub fn new(map: &CrateMap, settings: DecoderSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        map.validate()?;

        let mut crates = BTreeMap::new();
        for crate_config in &map.crates {
            if crate_config.id >= MAX_ROC {
                warn!(
                    crate_id = crate_config.id,
                    max = MAX_ROC,
                    "crate id out of range, its banks will be skipped"
                );
            }
            if let Some(decoder) = CrateDecoder::new(crate_config, settings.warning_interval) {
                crates.insert(crate_config.id, decoder);
            }
        }

        info!(
            crates = crates.len(),
            modules = map.num_modules(),
            max_event_length = settings.max_event_length,
            "event dispatcher ready"
        );

        Ok(Self {
            diagnostics: DecoderDiagnostics::new(settings.warning_interval),
            settings,
            crates,
            prescale: PrescaleTable::new(),
            epics: EpicsStore::new(),
            run_info: RunInfo::default(),
            event_number: 0,
            poisoned: false,
            counters: Arc::new(DecodeCounters::new()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(&config.crate_map(), config.decoder.clone())
    }

    /// Decode one buffer, forwarding physics hits to `sink`
    ///
    /// Word 0 holds the number of following words. On error nothing more
    /// from this buffer reaches the sink.
    pub fn decode<S: SlotSink>(
        &mut self,
        buffer: &[u32],
        sink: &mut S,
    ) -> DecodeResult<EventKind> {
        if self.poisoned {
            return Err(DecodeError::RunAborted);
        }
        self.counters.inc_buffers();

        let result = self.decode_buffer(buffer, sink);
        match &result {
            Ok(kind) => self.counters.inc_kind(*kind),
            Err(e) => {
                self.counters.inc_failed();
                if e.is_fatal_for_run() {
                    self.poisoned = true;
                    error!(error = %e, "sink failed, aborting run");
                } else {
                    error!(error = %e, words = buffer.len(), "buffer rejected");
                }
            }
        }
        result
    }

    fn decode_buffer<S: SlotSink>(
        &mut self,
        buffer: &[u32],
        sink: &mut S,
    ) -> DecodeResult<EventKind> {
        if buffer.len() < 2 {
            return Err(DecodeError::TooShort(buffer.len()));
        }
        let declared = buffer[0] as usize + 1;
        if declared > self.settings.max_event_length {
            return Err(DecodeError::Truncated {
                declared,
                max: self.settings.max_event_length,
            });
        }
        if declared > buffer.len() {
            return Err(DecodeError::Incomplete {
                declared,
                available: buffer.len(),
            });
        }
        if declared < 2 {
            return Err(DecodeError::TooShort(declared));
        }

        let event = &buffer[..declared];
        let kind = EventKind::from_type(event_type(event[1]));
        self.counters.add_words(declared as u64);

        match kind {
            EventKind::Physics(_) => self.decode_physics(event, sink)?,
            EventKind::Scaler => self.decode_scalers(event)?,
            EventKind::Epics => {
                let loaded = self.epics.load(&words_to_text(&event[2..]), self.event_number);
                debug!(loaded, event_number = self.event_number, "EPICS event");
            }
            EventKind::Prescale(PrescaleFormat::Registers) => {
                let loaded = self.prescale.load_registers(event);
                debug!(loaded, "prescale registers");
            }
            EventKind::Prescale(PrescaleFormat::Text) => {
                let loaded = self.prescale.load_text(&words_to_text(&event[2..]));
                debug!(loaded, "prescale text record");
            }
            EventKind::Control(control) => {
                self.run_info.apply(control, event);
                match control {
                    ControlKind::Prestart => info!(
                        run = self.run_info.run_number,
                        run_type = self.run_info.run_type,
                        "prestart"
                    ),
                    ControlKind::End => info!(
                        run = self.run_info.run_number,
                        events = self.run_info.event_count,
                        "end of run"
                    ),
                    _ => debug!(?control, "control event"),
                }
            }
            EventKind::Other(t) => debug!(event_type = t, "ignoring event type"),
        }

        Ok(kind)
    }

    fn decode_physics<S: SlotSink>(&mut self, event: &[u32], sink: &mut S) -> DecodeResult<()> {
        let banks = roc_banks(event, physics_roc_offset(event)?)?;
        self.event_number = physics_event_number(event);

        let mut counting = CountingSink {
            inner: sink,
            hits: 0,
        };
        counting.begin_event(self.event_number);

        let mut sub_events = 0;
        let mut result = Ok(());
        for bank in &banks {
            let Some(decoder) = self.route(bank) else {
                continue;
            };
            match decoder.decode(&mut counting, bank.payload(event)) {
                Ok(n) => sub_events += n,
                Err(e) => {
                    result = Err(DecodeError::from(e));
                    break;
                }
            }
        }

        self.counters.add_hits(counting.hits);
        self.counters.add_sub_events(sub_events as u64);
        result
    }

    fn decode_scalers(&mut self, event: &[u32]) -> DecodeResult<()> {
        let banks = roc_banks(event, constants::SCALER_ROC_OFFSET)?;
        for bank in &banks {
            if let Some(decoder) = self.route(bank) {
                let loaded = decoder.load_scalers(bank.payload(event));
                debug!(crate_id = bank.roc, loaded, "scaler readouts");
            }
        }
        Ok(())
    }

    /// Crate decoder for a bank, or None when the bank must be skipped
    fn route(&mut self, bank: &RocBank) -> Option<&mut CrateDecoder> {
        if bank.roc >= MAX_ROC {
            if self.diagnostics.record(Warning::OutOfBounds) {
                warn!(
                    roc = bank.roc,
                    offset = bank.offset,
                    max = MAX_ROC,
                    "ROC id out of range, skipping bank"
                );
            }
            return None;
        }
        let decoder = self.crates.get_mut(&bank.roc);
        if decoder.is_none() && self.diagnostics.record(Warning::Unassigned) {
            warn!(
                roc = bank.roc,
                offset = bank.offset,
                "ROC not in crate map, skipping bank"
            );
        }
        decoder
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Prescale factor of a trigger type (1 when unknown)
    pub fn prescale_factor(&self, trigger: u32) -> u32 {
        self.prescale.factor(trigger)
    }

    /// Latest counter of a scaler channel
    pub fn scaler(&self, crate_id: u32, slot: u32, channel: u32) -> Option<u32> {
        self.crates.get(&crate_id)?.scaler(slot)?.count(channel)
    }

    /// Number of readouts seen for a scaler
    pub fn scaler_reads(&self, crate_id: u32, slot: u32) -> u64 {
        self.crates
            .get(&crate_id)
            .and_then(|c| c.scaler(slot))
            .map_or(0, |s| s.reads())
    }

    /// EPICS value as of a physics event number (latest when None)
    pub fn epics_value(&self, tag: &str, event: Option<u32>) -> Option<f64> {
        self.epics.value(tag, event)
    }

    pub fn epics_time(&self, tag: &str, event: Option<u32>) -> Option<i64> {
        self.epics.time(tag, event)
    }

    pub fn epics_string(&self, tag: &str, event: Option<u32>) -> Option<&str> {
        self.epics.string(tag, event)
    }

    pub fn is_epics_loaded(&self, tag: &str) -> bool {
        self.epics.is_loaded(tag)
    }

    pub fn run_info(&self) -> &RunInfo {
        &self.run_info
    }

    /// Event number of the last physics event
    pub fn event_number(&self) -> u32 {
        self.event_number
    }

    pub fn crate_decoder(&self, crate_id: u32) -> Option<&CrateDecoder> {
        self.crates.get(&crate_id)
    }

    pub fn metrics(&self) -> &Arc<DecodeCounters> {
        &self.counters
    }

    pub fn settings(&self) -> &DecoderSettings {
        &self.settings
    }

    /// True after an unrecoverable sink failure
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Warning counts summed over the dispatcher and every decoder
    pub fn warning_summary(&self) -> Vec<(Warning, u64)> {
        let mut all = vec![&self.diagnostics];
        for c in self.crates.values() {
            all.push(c.diagnostics());
            all.extend(c.modules().iter().map(|m| m.diagnostics()));
        }

        Warning::ALL
            .iter()
            .map(|&w| (w, all.iter().map(|d| d.count(w)).sum::<u64>()))
            .filter(|&(_, n)| n > 0)
            .collect()
    }
}
