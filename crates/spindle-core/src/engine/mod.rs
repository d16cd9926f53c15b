//! Audio engine - decks, mixer, sync and the render callback body
//!
//! - Deck: one playback voice with cursor, tempo/pitch stage, EQ and gain
//! - Mixer: equal-power crossfade of the two decks plus soft clipping
//! - SyncManager: tempo match, one-shot alignment, cued starts
//! - Engine/EngineCore: host and audio-thread halves of the whole

mod deck;
mod engine;
mod eq;
mod events;
mod mixer;
mod sync;

pub use deck::*;
pub use engine::*;
pub use events::*;
pub use mixer::*;
pub use sync::*;
