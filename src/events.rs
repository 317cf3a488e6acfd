//! Event spine (C9): a process-local subscriber registry with non-blocking,
//! bounded fan-out. A slow subscriber degrades (dropped events, logged) rather
//! than backpressuring the producer.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::domain::{Ball, Game};
use crate::side_picker::Side;
use crate::stage::Stage;

/// Bounded channel capacity per subscriber.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 100;

/// A state change the orchestrator fans out to subscribers. Events carry
/// values, not references, so subscribers never observe partial mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GameEvent {
    GameCreated { room_id: String, game_id: String },
    StageChanged { room_id: String, game_id: String, from: Stage, to: Stage, auto: bool },
    BallDrawn { room_id: String, game_id: String, ball: Ball },
    SideSelected { room_id: String, game_id: String, side: Side },
    GameCompleted { room_id: String, game: Box<Game> },
    GameCancelled { room_id: String, game_id: String, reason: String },
}

/// Subscriber registry. Cheap to clone — the map lives behind an `Arc<RwLock<_>>`.
#[derive(Clone)]
pub struct EventSpine {
    subscribers: Arc<RwLock<HashMap<String, mpsc::Sender<GameEvent>>>>,
}

impl EventSpine {
    pub fn new() -> Self {
        EventSpine { subscribers: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Register a new subscriber and return its receiving end.
    pub async fn subscribe(&self, subscriber_id: impl Into<String>) -> mpsc::Receiver<GameEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.subscribers.write().await.insert(subscriber_id.into(), tx);
        rx
    }

    /// Remove a subscriber; its channel closes, unblocking any pending receiver.
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.write().await.remove(subscriber_id);
    }

    /// Fan out `event` to every subscriber. Never blocks: a full channel drops
    /// the event for that subscriber and logs a warning instead of awaiting
    /// capacity. The subscriber is not removed on a single drop.
    pub async fn fan_out(&self, event: GameEvent) {
        let subscribers = self.subscribers.read().await;
        for (subscriber_id, tx) in subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event.clone()) {
                warn!("event spine: dropping event for slow subscriber {subscriber_id}");
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for EventSpine {
    fn default() -> Self {
        Self::new()
    }
}
