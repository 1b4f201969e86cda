//! CODA-RS: Event decoder for CODA data acquisition buffers
//!
//! Turns raw CODA event buffers into per-(crate, slot) hits. Fastbus-style,
//! pipelining (multiblock) and scaler modules are described by a TOML crate
//! map; physics hits go to a `SlotSink`, while scaler, EPICS, prescale and
//! control events update queryable state on the `EventDispatcher`.

pub mod common;
pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod emulator;
pub mod event;
pub mod sink;
pub mod source;
