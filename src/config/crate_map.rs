//! Crate map: (crate, slot) → hardware family + bit-field configuration
//!
//! The map is resolved before decoding starts and is read-only afterwards.
//! A crate holds modules of exactly one family; the dispatcher picks the
//! crate's scan strategy from it.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Default Fastbus slot field (bits 31-27)
pub const FASTBUS_SLOT_MASK: u32 = 0xF800_0000;
pub const FASTBUS_SLOT_SHIFT: u32 = 27;

/// Pipelining data words never carry the frame tag bit
const PIPELINING_TAG_BIT: u32 = 0x8000_0000;

/// Largest slot in the 5-bit pipelining frame slot field
const PIPELINING_MAX_SLOT: u32 = 0x1F;

/// Largest slot in the 4-bit scaler header slot field
const SCALER_MAX_SLOT: u32 = 0xF;

/// Hardware family of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFamily {
    /// Single-event modules that tag every word with their slot
    Fastbus,
    /// Block-structured modules that may batch several events per buffer
    Pipelining,
    /// Scaler boards read out behind a 0xABC header word
    Scaler,
}

impl ModuleFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fastbus => "fastbus",
            Self::Pipelining => "pipelining",
            Self::Scaler => "scaler",
        }
    }
}

impl std::fmt::Display for ModuleFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bit-field configuration of one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Slot number within the crate
    pub slot: u32,

    /// Hardware family
    pub family: ModuleFamily,

    /// Model name, informational only (e.g. "1877", "fadc250")
    #[serde(default)]
    pub model: String,

    /// Slot field mask (Fastbus)
    #[serde(default = "default_slot_mask")]
    pub slot_mask: u32,

    /// Slot field shift (Fastbus)
    #[serde(default = "default_slot_shift")]
    pub slot_shift: u32,

    /// First word of the module's data is a header carrying the word count
    #[serde(default)]
    pub has_header: bool,

    /// Channel field mask
    #[serde(default)]
    pub chan_mask: u32,

    /// Channel field shift
    #[serde(default)]
    pub chan_shift: u32,

    /// Data field mask; defaults depend on the family
    #[serde(default)]
    pub data_mask: Option<u32>,

    /// Word-count field of the header word (0 = no word count)
    #[serde(default)]
    pub wdcnt_mask: u32,
}

fn default_slot_mask() -> u32 {
    FASTBUS_SLOT_MASK
}

fn default_slot_shift() -> u32 {
    FASTBUS_SLOT_SHIFT
}

impl ModuleConfig {
    /// Fastbus module with the default slot field
    pub fn fastbus(slot: u32, chan_mask: u32, chan_shift: u32, data_mask: u32) -> Self {
        Self {
            slot,
            family: ModuleFamily::Fastbus,
            model: String::new(),
            slot_mask: FASTBUS_SLOT_MASK,
            slot_shift: FASTBUS_SLOT_SHIFT,
            has_header: false,
            chan_mask,
            chan_shift,
            data_mask: Some(data_mask),
            wdcnt_mask: 0,
        }
    }

    /// Pipelining module decoding data words with the given fields
    pub fn pipelining(slot: u32, chan_mask: u32, chan_shift: u32, data_mask: u32) -> Self {
        Self {
            family: ModuleFamily::Pipelining,
            ..Self::fastbus(slot, chan_mask, chan_shift, data_mask)
        }
    }

    /// Scaler board with full-width counters
    pub fn scaler(slot: u32) -> Self {
        Self {
            slot,
            family: ModuleFamily::Scaler,
            model: String::new(),
            slot_mask: FASTBUS_SLOT_MASK,
            slot_shift: FASTBUS_SLOT_SHIFT,
            has_header: false,
            chan_mask: 0,
            chan_shift: 0,
            data_mask: None,
            wdcnt_mask: 0,
        }
    }

    /// Builder-style header configuration
    pub fn with_header(mut self, wdcnt_mask: u32) -> Self {
        self.has_header = true;
        self.wdcnt_mask = wdcnt_mask;
        self
    }

    /// Effective data mask
    pub fn data_mask(&self) -> u32 {
        self.data_mask.unwrap_or(match self.family {
            ModuleFamily::Fastbus | ModuleFamily::Pipelining => 0x0000_FFFF,
            ModuleFamily::Scaler => 0xFFFF_FFFF,
        })
    }

    /// Largest channel number representable in the channel field
    pub fn max_channel(&self) -> u32 {
        self.chan_mask.checked_shr(self.chan_shift).unwrap_or(0)
    }

    /// Check internal consistency of the bit fields
    pub fn validate(&self, crate_id: u32) -> Result<(), ConfigError> {
        let invalid = |what: &str| {
            ConfigError::InvalidModule(format!(
                "crate {} slot {} ({}): {}",
                crate_id, self.slot, self.family, what
            ))
        };

        if self.chan_shift >= 32 || self.slot_shift >= 32 {
            return Err(invalid("shift must be below 32"));
        }

        match self.family {
            ModuleFamily::Fastbus => {
                if self.slot_mask == 0 {
                    return Err(invalid("slot mask is empty"));
                }
                if self.slot_mask & (self.chan_mask | self.data_mask()) != 0 {
                    return Err(invalid("channel/data fields overlap the slot field"));
                }
                if self.slot > self.slot_mask >> self.slot_shift {
                    return Err(invalid("slot does not fit in the slot field"));
                }
            }
            ModuleFamily::Pipelining => {
                if (self.chan_mask | self.data_mask()) & PIPELINING_TAG_BIT != 0 {
                    return Err(invalid("channel/data fields overlap the frame tag bit"));
                }
                if self.slot > PIPELINING_MAX_SLOT {
                    return Err(invalid("slot does not fit in the frame slot field"));
                }
            }
            ModuleFamily::Scaler => {
                if self.slot > SCALER_MAX_SLOT {
                    return Err(invalid("slot does not fit in the scaler header slot field"));
                }
            }
        }

        Ok(())
    }
}

/// One readout crate and its modules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrateConfig {
    /// ROC id
    pub id: u32,

    /// Modules in this crate
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl CrateConfig {
    /// Family shared by all modules of the crate (None for an empty crate)
    pub fn family(&self) -> Option<ModuleFamily> {
        self.modules.first().map(|m| m.family)
    }
}

/// Resolved table of readout crates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrateMap {
    #[serde(default)]
    pub crates: Vec<CrateConfig>,
}

impl CrateMap {
    /// Build a map from a list of crates
    pub fn new(crates: Vec<CrateConfig>) -> Self {
        Self { crates }
    }

    /// Add a module, creating its crate on first use
    pub fn insert(&mut self, crate_id: u32, module: ModuleConfig) {
        match self.crates.iter_mut().find(|c| c.id == crate_id) {
            Some(c) => c.modules.push(module),
            None => self.crates.push(CrateConfig {
                id: crate_id,
                modules: vec![module],
            }),
        }
    }

    /// Look up a crate by ROC id
    pub fn get_crate(&self, crate_id: u32) -> Option<&CrateConfig> {
        self.crates.iter().find(|c| c.id == crate_id)
    }

    /// Look up the module at (crate, slot)
    pub fn module(&self, crate_id: u32, slot: u32) -> Option<&ModuleConfig> {
        self.get_crate(crate_id)?
            .modules
            .iter()
            .find(|m| m.slot == slot)
    }

    /// Total number of configured modules
    pub fn num_modules(&self) -> usize {
        self.crates.iter().map(|c| c.modules.len()).sum()
    }

    /// Check the whole map: unique crates and slots, one family per crate,
    /// and consistent bit fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, c) in self.crates.iter().enumerate() {
            if self.crates[..i].iter().any(|other| other.id == c.id) {
                return Err(ConfigError::DuplicateCrate(c.id));
            }

            let family = c.family();
            for (j, m) in c.modules.iter().enumerate() {
                if c.modules[..j].iter().any(|other| other.slot == m.slot) {
                    return Err(ConfigError::DuplicateModule {
                        crate_id: c.id,
                        slot: m.slot,
                    });
                }
                if Some(m.family) != family {
                    return Err(ConfigError::MixedCrate(c.id));
                }
                m.validate(c.id)?;
            }
        }
        Ok(())
    }
}
