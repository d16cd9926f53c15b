//! Deferred notifications from the audio thread to the host
//!
//! The render callback must never call host code, so it enqueues events on a
//! lock-free SPSC ring instead. The host drains the consumer end from its own
//! worker (the FFI layer runs a timer thread; embedders may poll however
//! they like). Pushes into a full ring are dropped; position events are
//! periodic and a lost track-ended event would only occur if the host
//! stopped draining entirely.

use rtrb::{Consumer, Producer, RingBuffer};

/// Notifications emitted by the render callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    /// Throttled playhead report, emitted at roughly 10 Hz per deck
    Position { deck: usize, seconds: f64 },
    /// The deck ran out of track and paused at its end
    TrackEnded { deck: usize },
}

/// Create the SPSC event channel.
///
/// The producer lives in the render callback; the consumer is drained by the
/// host. The ring is allocated once here, so the audio thread never
/// allocates when pushing.
pub fn event_channel(capacity: usize) -> (Producer<EngineEvent>, Consumer<EngineEvent>) {
    RingBuffer::new(capacity)
}
