//! Playback engine contract.
//!
//! The audio engine runs out of process; this trait is the session
//! controller's view of it. After a successful `bind` the engine pushes
//! `Message::Engine` events onto the bus, and `snapshot` exposes its live
//! state for full resynchronization after a (re)connect.

use tokio::sync::broadcast::Sender;

use crate::protocol::{Message, RepeatMode, TransportItem};

/// Live engine state read back on (re)connection.
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    pub playing: bool,
    pub current: Option<TransportItem>,
    pub repeat_mode: RepeatMode,
    pub shuffle: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub queue: Vec<TransportItem>,
    pub queue_index: usize,
}

/// Interface implemented by concrete playback engines.
pub trait PlaybackEngine: Send {
    /// Establishes the live connection and registers the bus as the event
    /// sink. Failure leaves the engine unbound; callers may retry later.
    fn bind(&mut self, events: Sender<Message>) -> Result<(), String>;

    /// Reads the engine's current definitive state.
    fn snapshot(&self) -> EngineSnapshot;

    /// Replaces the queue, prepares the item at `start_index`, and starts
    /// playback in the foreground.
    fn set_queue(&mut self, items: Vec<TransportItem>, start_index: usize);

    fn append(&mut self, item: TransportItem);

    fn insert_at(&mut self, index: usize, item: TransportItem);

    fn play(&mut self);

    fn pause(&mut self);

    fn seek_to(&mut self, position_ms: u64);

    fn skip_next(&mut self);

    fn skip_previous(&mut self);

    fn skip_to(&mut self, index: usize);

    fn set_repeat_mode(&mut self, mode: RepeatMode);

    fn set_shuffle(&mut self, enabled: bool);

    fn position_ms(&self) -> u64;

    fn duration_ms(&self) -> u64;

    fn has_next(&self) -> bool;

    fn current_index(&self) -> usize;
}
