//! Family dispatch for module decoders
//!
//! `ModuleDecoder` is resolved once per (crate, slot) from the crate map.
//! `CrateDecoder` owns all decoders of one crate and walks a ROC payload
//! with the scan strategy of the crate's family.

use tracing::{debug, warn};

use super::common::DecodedHit;
use super::fastbus::FastbusModule;
use super::pipelining::PipeliningModule;
use super::scaler::{header_count, header_slot, is_scaler_header, ScalerModule};
use crate::common::{DecoderDiagnostics, SinkError, Warning};
use crate::config::{CrateConfig, ModuleConfig, ModuleFamily};
use crate::sink::SlotSink;

/// Decoder of one module, by hardware family
#[derive(Debug, Clone)]
pub enum ModuleDecoder {
    Fastbus(FastbusModule),
    Pipelining(PipeliningModule),
    Scaler(ScalerModule),
}

impl ModuleDecoder {
    pub fn new(crate_id: u32, config: &ModuleConfig, warning_interval: u64) -> Self {
        let diagnostics = DecoderDiagnostics::new(warning_interval);
        let config = config.clone();
        match config.family {
            ModuleFamily::Fastbus => {
                Self::Fastbus(FastbusModule::new(crate_id, config, diagnostics))
            }
            ModuleFamily::Pipelining => {
                Self::Pipelining(PipeliningModule::new(crate_id, config, diagnostics))
            }
            ModuleFamily::Scaler => Self::Scaler(ScalerModule::new(crate_id, config, diagnostics)),
        }
    }

    pub fn family(&self) -> ModuleFamily {
        match self {
            Self::Fastbus(_) => ModuleFamily::Fastbus,
            Self::Pipelining(_) => ModuleFamily::Pipelining,
            Self::Scaler(_) => ModuleFamily::Scaler,
        }
    }

    pub fn config(&self) -> &ModuleConfig {
        match self {
            Self::Fastbus(m) => m.config(),
            Self::Pipelining(m) => m.config(),
            Self::Scaler(m) => m.config(),
        }
    }

    /// Configured slot number
    pub fn slot(&self) -> u32 {
        self.config().slot
    }

    pub fn diagnostics(&self) -> &DecoderDiagnostics {
        match self {
            Self::Fastbus(m) => m.diagnostics(),
            Self::Pipelining(m) => m.diagnostics(),
            Self::Scaler(m) => m.diagnostics(),
        }
    }
}

/// Hit sink that drops everything; scaler events only update counters
struct Discard;

impl SlotSink for Discard {
    fn load_data(&mut self, _hit: &DecodedHit) -> Result<(), SinkError> {
        Ok(())
    }
}

/// All module decoders of one readout crate
#[derive(Debug, Clone)]
pub struct CrateDecoder {
    crate_id: u32,
    family: ModuleFamily,
    modules: Vec<ModuleDecoder>,
    diagnostics: DecoderDiagnostics,
}

impl CrateDecoder {
    /// Build the decoders of a crate; None for a crate without modules
    pub fn new(config: &CrateConfig, warning_interval: u64) -> Option<Self> {
        let family = config.family()?;
        Some(Self {
            crate_id: config.id,
            family,
            modules: config
                .modules
                .iter()
                .map(|m| ModuleDecoder::new(config.id, m, warning_interval))
                .collect(),
            diagnostics: DecoderDiagnostics::new(warning_interval),
        })
    }

    pub fn crate_id(&self) -> u32 {
        self.crate_id
    }

    pub fn family(&self) -> ModuleFamily {
        self.family
    }

    pub fn modules(&self) -> &[ModuleDecoder] {
        &self.modules
    }

    pub fn module(&self, slot: u32) -> Option<&ModuleDecoder> {
        self.modules.iter().find(|m| m.slot() == slot)
    }

    /// Crate-level diagnostics (words no module claimed)
    pub fn diagnostics(&self) -> &DecoderDiagnostics {
        &self.diagnostics
    }

    /// Decode the payload of a physics-event ROC bank
    ///
    /// Returns the number of sub-events produced by block splitting.
    pub fn decode<S: SlotSink>(
        &mut self,
        sink: &mut S,
        payload: &[u32],
    ) -> Result<usize, SinkError> {
        match self.family {
            ModuleFamily::Fastbus => {
                self.scan_fastbus(sink, payload)?;
                Ok(0)
            }
            ModuleFamily::Pipelining => {
                let mut sub_events = 0;
                for module in &mut self.modules {
                    if let ModuleDecoder::Pipelining(m) = module {
                        sub_events += m.decode(sink, payload)?;
                    }
                }
                Ok(sub_events)
            }
            ModuleFamily::Scaler => {
                self.scan_scalers(sink, payload)?;
                Ok(0)
            }
        }
    }

    /// Load scaler readouts from a scaler-event ROC bank without emitting hits
    pub fn load_scalers(&mut self, payload: &[u32]) -> usize {
        if self.family != ModuleFamily::Scaler {
            debug!(
                crate_id = self.crate_id,
                family = %self.family,
                "skipping non-scaler crate in scaler event"
            );
            return 0;
        }
        // Discard never fails
        self.scan_scalers(&mut Discard, payload).unwrap_or(0)
    }

    fn scan_fastbus<S: SlotSink>(
        &mut self,
        sink: &mut S,
        payload: &[u32],
    ) -> Result<(), SinkError> {
        let mut pos = 0;
        while pos < payload.len() {
            let word = payload[pos];
            let module = self.modules.iter_mut().find_map(|m| match m {
                ModuleDecoder::Fastbus(f) if f.is_slot(word) => Some(f),
                _ => None,
            });
            match module {
                Some(m) => pos += m.load_slot(sink, &payload[pos..])?.max(1),
                None => {
                    if self.diagnostics.record(Warning::Unassigned) {
                        debug!(
                            crate_id = self.crate_id,
                            word = format_args!("{:#010x}", word),
                            offset = pos,
                            "word matches no configured slot"
                        );
                    }
                    pos += 1;
                }
            }
        }
        Ok(())
    }

    /// Returns the number of readouts loaded
    fn scan_scalers<S: SlotSink>(
        &mut self,
        sink: &mut S,
        payload: &[u32],
    ) -> Result<usize, SinkError> {
        let mut pos = 0;
        let mut loaded = 0;
        while pos < payload.len() {
            let word = payload[pos];
            if !is_scaler_header(word) {
                pos += 1;
                continue;
            }

            let slot = header_slot(word);
            let module = self.modules.iter_mut().find_map(|m| match m {
                ModuleDecoder::Scaler(s) if s.config().slot == slot => Some(s),
                _ => None,
            });
            match module {
                Some(m) => {
                    pos += m.load(&payload[pos..]);
                    for hit in m.hits() {
                        sink.load_data(&hit)?;
                    }
                    loaded += 1;
                }
                None => {
                    if self.diagnostics.record(Warning::Unassigned) {
                        warn!(
                            crate_id = self.crate_id,
                            slot,
                            "scaler readout for unconfigured slot"
                        );
                    }
                    pos += 1 + header_count(word);
                }
            }
        }
        Ok(loaded)
    }

    /// Scaler module of a slot
    pub fn scaler(&self, slot: u32) -> Option<&ScalerModule> {
        self.modules.iter().find_map(|m| match m {
            ModuleDecoder::Scaler(s) if s.config().slot == slot => Some(s),
            _ => None,
        })
    }
}
