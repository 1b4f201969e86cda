//! Synthetic buffer generator
//!
//! Produces well-framed CODA buffers for a crate map together with the hits
//! a correct decoder must emit for them. Used for the `--emulate` mode of
//! `coda_decode` and by the integration tests.
//!
//! Value distribution per data word (same shape for every module):
//! - Gaussian peak: mean = 500 + channel * 50, sigma = 50
//! - Uniform background over the free data bits
//!
//! The generator is seeded, so a given seed always reproduces the same run.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::common::MAX_ROC;
use crate::config::{CrateConfig, CrateMap, ModuleConfig, ModuleFamily};
use crate::decoder::common::{field, place};
use crate::decoder::{scaler_header, DecodedHit, FrameWord};
use crate::event::{BufferBuilder, ControlKind};

/// Largest slot a scaler header can address
const MAX_SCALER_SLOT: u32 = 0xF;
const PEAK_SIGMA: f64 = 50.0;

/// Emulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// RNG seed
    pub seed: u64,
    /// Physics trigger type of generated events
    pub trigger: u32,
    /// Events per pipelining block (1 = single-event readout)
    pub block_size: u32,
    /// Upper bound on data words per module and event
    pub max_hits_per_module: u32,
    /// Counters per scaler readout
    pub scaler_channels: u32,
    /// Fraction of uniform background values
    pub background_ratio: f64,
    /// Physics buffers between scaler events (0 = none)
    pub scaler_interval: u32,
    /// Pipelining slots left out of the first physics buffer of a run
    pub late_slots: Vec<u32>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            trigger: 1,
            block_size: 1,
            max_hits_per_module: 4,
            scaler_channels: 16,
            background_ratio: 0.3,
            scaler_interval: 100,
            late_slots: Vec::new(),
        }
    }
}

/// One generated buffer and the hits it must decode to, in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticBuffer {
    pub words: Vec<u32>,
    pub event_number: u32,
    pub expected: Vec<DecodedHit>,
}

/// Seeded generator of physics, scaler and control buffers
pub struct BufferEmulator {
    config: EmulatorConfig,
    crates: Vec<CrateConfig>,
    rng: StdRng,
    event_number: u32,
    block_number: u32,
    run_number: u32,
    clock: u32,
    scaler_counts: BTreeMap<(u32, u32), Vec<u32>>,
}

impl BufferEmulator {
    pub fn new(map: &CrateMap, config: EmulatorConfig) -> Self {
        let mut crates: Vec<CrateConfig> = map
            .crates
            .iter()
            .filter(|c| {
                if c.id >= MAX_ROC {
                    warn!(crate_id = c.id, "crate id out of range, not emulated");
                }
                c.id < MAX_ROC && !c.modules.is_empty()
            })
            .cloned()
            .collect();
        crates.sort_by_key(|c| c.id);

        for c in &crates {
            for m in &c.modules {
                if m.family == ModuleFamily::Scaler && m.slot > MAX_SCALER_SLOT {
                    warn!(
                        crate_id = c.id,
                        slot = m.slot,
                        "scaler slot not addressable by the readout header, not emulated"
                    );
                }
            }
        }

        debug!(
            crates = crates.len(),
            seed = config.seed,
            block_size = config.block_size,
            "buffer emulator ready"
        );

        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            crates,
            event_number: 0,
            block_number: 0,
            run_number: 0,
            clock: 0,
            scaler_counts: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    /// Event number of the last physics buffer
    pub fn event_number(&self) -> u32 {
        self.event_number
    }

    /// Counters of the last generated readout of a scaler
    pub fn scaler_counts(&self, crate_id: u32, slot: u32) -> Option<&[u32]> {
        self.scaler_counts
            .get(&(crate_id, slot))
            .map(Vec::as_slice)
    }

    /// Prestart buffer; starts a new run
    pub fn prestart(&mut self, run_number: u32, run_type: u32) -> Vec<u32> {
        self.run_number = run_number;
        self.event_number = 0;
        self.control(ControlKind::Prestart, run_number, run_type)
    }

    pub fn go(&mut self) -> Vec<u32> {
        self.control(ControlKind::Go, 0, self.event_number)
    }

    pub fn end(&mut self) -> Vec<u32> {
        self.control(ControlKind::End, 0, self.event_number)
    }

    fn control(&mut self, kind: ControlKind, a: u32, b: u32) -> Vec<u32> {
        self.clock += 1;
        BufferBuilder::control(kind, self.clock, a, b).build()
    }

    /// Next physics buffer covering every emulated crate
    ///
    /// With a block size above one each pipelining module packs that many
    /// sub-events into the buffer.
    pub fn next_physics(&mut self) -> SyntheticBuffer {
        self.event_number += 1;
        self.block_number = (self.block_number + 1) & 0x3FF;

        let mut builder = BufferBuilder::physics(self.config.trigger, self.event_number);
        let mut expected = Vec::new();

        for index in 0..self.crates.len() {
            let crate_id = self.crates[index].id;
            let modules = self.crates[index].modules.clone();
            let mut payload = Vec::new();
            for module in &modules {
                match module.family {
                    ModuleFamily::Fastbus => {
                        self.fastbus_words(crate_id, module, &mut payload, &mut expected)
                    }
                    ModuleFamily::Pipelining => {
                        if self.event_number == 1 && self.config.late_slots.contains(&module.slot)
                        {
                            debug!(crate_id, slot = module.slot, "module held back");
                            continue;
                        }
                        self.pipelining_block(crate_id, module, &mut payload, &mut expected)
                    }
                    ModuleFamily::Scaler => {
                        self.scaler_readout(crate_id, module, &mut payload, Some(&mut expected))
                    }
                }
            }
            builder = builder.roc(crate_id, &payload);
        }

        SyntheticBuffer {
            words: builder.build(),
            event_number: self.event_number,
            expected,
        }
    }

    /// Scaler event with one readout per scaler module
    ///
    /// Scaler events update counters only, so `expected` is empty.
    pub fn scaler_event(&mut self) -> SyntheticBuffer {
        let mut builder = BufferBuilder::scaler();
        for index in 0..self.crates.len() {
            if self.crates[index].family() != Some(ModuleFamily::Scaler) {
                continue;
            }
            let crate_id = self.crates[index].id;
            let modules = self.crates[index].modules.clone();
            let mut payload = Vec::new();
            for module in &modules {
                self.scaler_readout(crate_id, module, &mut payload, None);
            }
            builder = builder.roc(crate_id, &payload);
        }

        SyntheticBuffer {
            words: builder.build(),
            event_number: self.event_number,
            expected: Vec::new(),
        }
    }

    fn fastbus_words(
        &mut self,
        crate_id: u32,
        module: &ModuleConfig,
        payload: &mut Vec<u32>,
        expected: &mut Vec<DecodedHit>,
    ) {
        let n = self.rng.gen_range(0..=self.config.max_hits_per_module);
        let slot_bits = place(module.slot, module.slot_mask, module.slot_shift);

        if module.has_header {
            // word count includes the header itself
            payload.push(slot_bits | ((n + 1) & module.wdcnt_mask));
        }
        for _ in 0..n {
            let word = slot_bits | self.data_word(module);
            payload.push(word);
            expected.push(hit(crate_id, module, word, 0));
        }
    }

    fn pipelining_block(
        &mut self,
        crate_id: u32,
        module: &ModuleConfig,
        payload: &mut Vec<u32>,
        expected: &mut Vec<DecodedHit>,
    ) {
        let slot = module.slot;
        let block_size = self.config.block_size.max(1);
        let start = payload.len();

        payload.push(FrameWord::block_header(slot, self.block_number, block_size));
        for sub_event in 0..block_size {
            let index = self.event_number.wrapping_sub(1) * block_size + sub_event;
            payload.push(FrameWord::event_header(slot, index));
            let n = self.rng.gen_range(0..=self.config.max_hits_per_module);
            for _ in 0..n {
                let word = self.data_word(module);
                payload.push(word);
                expected.push(hit(crate_id, module, word, sub_event));
            }
        }
        let word_count = (payload.len() - start + 1) as u32;
        payload.push(FrameWord::block_trailer(slot, word_count));
    }

    fn scaler_readout(
        &mut self,
        crate_id: u32,
        module: &ModuleConfig,
        payload: &mut Vec<u32>,
        expected: Option<&mut Vec<DecodedHit>>,
    ) {
        if module.slot > MAX_SCALER_SLOT {
            return;
        }
        let channels = self.config.scaler_channels as usize;
        let counts = self
            .scaler_counts
            .entry((crate_id, module.slot))
            .or_insert_with(|| vec![0; channels]);
        for count in counts.iter_mut() {
            *count = count.wrapping_add(self.rng.gen_range(0..1000));
        }

        payload.push(scaler_header(module.slot, channels as u32));
        payload.extend_from_slice(counts);

        if let Some(expected) = expected {
            let mask = module.data_mask();
            expected.extend(counts.iter().enumerate().map(|(channel, &raw)| DecodedHit {
                crate_id,
                slot: module.slot,
                channel: channel as u32,
                value: raw & mask,
                raw,
                sub_event: 0,
            }));
        }
    }

    /// Channel and value bits of one data word (no slot or frame bits)
    fn data_word(&mut self, module: &ModuleConfig) -> u32 {
        let channel = self.rng.gen_range(0..=module.max_channel());
        let free = module.data_mask() & !module.chan_mask & !module.slot_mask & 0x7FFF_FFFF;

        let value = if self.rng.gen_bool(self.config.background_ratio.clamp(0.0, 1.0)) {
            self.rng.gen::<u32>()
        } else {
            let mean = 500.0 + channel as f64 * 50.0;
            Normal::new(mean, PEAK_SIGMA)
                .map(|n| n.sample(&mut self.rng))
                .unwrap_or(mean)
                .clamp(0.0, u32::MAX as f64) as u32
        };

        place(channel, module.chan_mask, module.chan_shift) | (value & free)
    }
}

/// Hit a decoder must produce for a data word
fn hit(crate_id: u32, module: &ModuleConfig, word: u32, sub_event: u32) -> DecodedHit {
    DecodedHit {
        crate_id,
        slot: module.slot,
        channel: field(word, module.chan_mask, module.chan_shift),
        value: word & module.data_mask(),
        raw: word,
        sub_event,
    }
}
