//! Player event types and the event bus listeners subscribe to
//!
//! Events are broadcast on a `tokio::sync::broadcast` channel. A listener
//! holds an [`EventSubscription`]; dropping it unregisters the listener, so
//! an owner tears down its own subscriptions instead of relying on a global
//! listener table.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Default number of events buffered per subscriber before it starts lagging
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events emitted by the playback engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// The displayed position changed (seconds)
    Playback { time: f64 },

    /// Playback started or stopped
    PlayStateChanged { playing: bool },

    /// A seek settled
    ///
    /// `cached` is true when the target was already inside the video queue
    /// and no decoder round trip was needed.
    Seeked {
        time: f64,
        cached: bool,
        skipped_audio: usize,
        skipped_video: usize,
    },

    /// The last frame of the stream has been presented
    EndOfStream,

    /// The audio render context ran out of queued samples while playing
    AudioUnderrun { time: Option<f64> },

    /// The decoder output size changed
    Resized { width: u32, height: u32 },
}

/// Broadcast bus for [`PlayerEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an event to all subscribers
    pub fn emit(&self, event: PlayerEvent) {
        trace!("event: {:?}", event);
        // No receivers is OK
        let _ = self.tx.send(event);
    }

    /// Register a listener
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// A registered listener; dropping it unregisters
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<PlayerEvent>,
}

impl EventSubscription {
    /// Wait for the next event.
    ///
    /// Returns `None` once the bus is gone. Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<PlayerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    trace!("event subscriber lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is already queued
    pub fn try_recv(&mut self) -> Option<PlayerEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
