//! Event and message types for glyphgrid.
//!
//! Two layers live here:
//! * [`protocol`]: the closed set of changes and transport messages exchanged
//!   between a client's local model and the authoritative server.
//! * Runtime events: what a client's event loop consumes (inbound server
//!   messages, user actions, ticks) plus the async source registry that feeds
//!   them.

use core_geom::{GlyphBounds, GlyphCoord};
use core_grid::UserId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub mod protocol;
pub use protocol::{
    Change, ClientChange, LoadSnapshot, LocalChange, NonEmpty, Rgb, ServerChange, Timestamp,
    ToClient, ToServer, UserData,
};

// -------------------------------------------------------------------------------------------------
// Channel Policy
// -------------------------------------------------------------------------------------------------
// Every loop owns one bounded mpsc receiver sized by `EVENT_CHANNEL_CAP`. Producers `send().await`
// and therefore park under backpressure instead of dropping events: an edit lost between the input
// and the local model would never be submitted and the client would silently diverge.
// -------------------------------------------------------------------------------------------------
pub const EVENT_CHANNEL_CAP: usize = 8192;

// Simple atomic counters (fetch_add relaxed), inspected by tests and logged at shutdown.
pub static CHANNEL_SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
pub static TICKS_EMITTED: AtomicU64 = AtomicU64::new(0);

/// Top-level event enum consumed by a client event loop.
#[derive(Debug, Clone)]
pub enum Event {
    /// Message delivered by the transport from the server.
    Inbound(ToClient),
    /// Decoded user intent.
    Action(UserAction),
    /// Periodic monotonic tick used to commit idle undo batches and flush
    /// the outbox without busy polling.
    Tick,
    Shutdown,
}

/// User intents after input decoding. Input devices are outside the core;
/// whatever decodes keys or pointer events produces these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    /// Type `text` with its first glyph at `at`.
    Type { at: GlyphCoord, text: String },
    Undo,
    Redo,
    /// Explicitly close the current undo batch.
    CommitBatch,
    /// The visible glyph rectangle changed (pan / resize / zoom).
    Pan(GlyphBounds),
    ToggleUser(UserId),
}

// -------------------------------------------------------------------------------------------------
// Async Event Sources
// -------------------------------------------------------------------------------------------------
// Each source is responsible for its own async task lifecycle; on channel send failure (consumer
// dropped) it must terminate promptly.

/// Trait implemented by any async event producer. Implementors usually hold configuration and
/// spawn one background task that pushes `Event`s into the shared channel.
pub trait AsyncEventSource: Send + 'static {
    /// Human-readable stable identifier (used for logging / diagnostics).
    fn name(&self) -> &'static str;
    /// Consume self and spawn the background task, returning a JoinHandle. Implementors should
    /// stop when `tx.send(..).await` returns Err (channel closed) or on their own internal stop
    /// condition.
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Registry of event sources, spawned together at startup.
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl Default for EventSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }
    pub fn register<S: AsyncEventSource>(&mut self, src: S) {
        self.sources.push(Box::new(src));
    }
    pub fn len(&self) -> usize {
        self.sources.len()
    }
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
    /// Spawn all registered sources, returning their JoinHandles. Each source receives its own
    /// clone of `tx`; during shutdown the caller should drop its final `Sender` before awaiting
    /// the handles so the sources observe the closed channel and exit.
    pub fn spawn_all(&mut self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        // Drain so duplicate spawns are prevented if called twice.
        let mut out = Vec::with_capacity(self.sources.len());
        for src in self.sources.drain(..) {
            let name = src.name();
            tracing::info!(target: "runtime.events", source = name, "spawning event source");
            out.push(src.spawn(tx.clone()));
        }
        out
    }
}

/// Emits `Event::Tick` every `interval`. Missed ticks are delayed, not
/// bursted: a stalled loop catches up with one tick.
pub struct TickEventSource {
    interval: Duration,
}

impl TickEventSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl AsyncEventSource for TickEventSource {
    fn name(&self) -> &'static str {
        "tick"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(Event::Tick).await.is_err() {
                    break;
                }
                TICKS_EMITTED.fetch_add(1, Ordering::Relaxed);
            }
        })
    }
}

/// Replays a fixed list of user actions, one every `pace`. Stands in for an
/// input decoder in headless sessions.
pub struct ScriptedActionSource {
    actions: Vec<UserAction>,
    pace: Duration,
}

impl ScriptedActionSource {
    pub fn new(actions: Vec<UserAction>, pace: Duration) -> Self {
        Self { actions, pace }
    }
}

impl AsyncEventSource for ScriptedActionSource {
    fn name(&self) -> &'static str {
        "script"
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let total = self.actions.len();
            for (sent, action) in self.actions.into_iter().enumerate() {
                tokio::time::sleep(self.pace).await;
                if tx.send(Event::Action(action)).await.is_err() {
                    tracing::debug!(target: "runtime.events", sent, total, "script_abandoned");
                    return;
                }
            }
        })
    }
}
