//! Spindle core - two-deck DJ mixing engine
//!
//! Decodes tracks into memory, plays them on two independent decks with
//! tempo/pitch/EQ control, mixes them through an equal-power crossfader into
//! a real-time output callback, and keeps one deck beat-aligned with the
//! other. Consumed by `spindle-ffi` behind a flat C ABI, or directly as a
//! Rust library.

pub mod analysis;
pub mod audio;
pub mod decode;
pub mod engine;
pub mod types;

pub use decode::{decode_file, DecodeError, PcmBuffer};
pub use engine::{Deck, Engine, EngineEvent, SyncManager};
pub use types::*;
