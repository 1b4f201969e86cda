//! Module decoders for CODA readout crates
//!
//! Converts the words of one ROC bank into `DecodedHit`s, per hardware family.

pub mod block_splitter;
pub mod common;
pub mod fastbus;
pub mod module;
pub mod pipelining;
pub mod scaler;

pub use block_splitter::BlockSplitter;
pub use common::{DecodedHit, FrameWord, SlotAddress};
pub use fastbus::FastbusModule;
pub use module::{CrateDecoder, ModuleDecoder};
pub use pipelining::PipeliningModule;
pub use scaler::{scaler_header, ScalerModule};
