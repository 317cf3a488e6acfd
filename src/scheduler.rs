//! Timer scheduler (C7): per-(room, game) one-shot stage timers with cancel,
//! replace, and a retrying auto-advance callback.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const RETRY_BACKOFFS_MS: [u64; 3] = [200, 400, 600];

type TimerKey = (String, String);
type AutoAdvanceFn =
    Arc<dyn Fn(String, String) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

/// Holds the spawned timer task per `(room, game)`, guarded by its own lock —
/// disjoint from the manager's stage lock, as §4.7 requires.
#[derive(Clone)]
pub struct TimerScheduler {
    timers: Arc<Mutex<HashMap<TimerKey, JoinHandle<()>>>>,
    auto_advance: AutoAdvanceFn,
}

impl TimerScheduler {
    /// `auto_advance` is the manager's auto-advance entry point, boxed so the
    /// scheduler does not depend on the manager's concrete type.
    pub fn new<F, Fut>(auto_advance: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        TimerScheduler {
            timers: Arc::new(Mutex::new(HashMap::new())),
            auto_advance: Arc::new(move |room, game| Box::pin(auto_advance(room, game))),
        }
    }

    /// Cancel and replace any existing timer for `(room, game)`, then arm a
    /// new one for `duration`. `None` means infinite — no timer is armed.
    pub async fn arm(&self, room: &str, game_id: &str, duration: Option<Duration>) {
        self.cancel(room, game_id).await;
        let Some(duration) = duration else { return };

        let key: TimerKey = (room.to_string(), game_id.to_string());
        let timers = self.timers.clone();
        let auto_advance = self.auto_advance.clone();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;

            // Remove bookkeeping before invoking the callback so the callback
            // cannot observe its own timer as still armed.
            timers.lock().await.remove(&task_key);

            let (room, game_id) = task_key;
            Self::fire_with_retry(auto_advance, room, game_id).await;
        });

        self.timers.lock().await.insert(key, handle);
    }

    /// Explicit cancel. Aborts the pending task; the callback never fires.
    pub async fn cancel(&self, room: &str, game_id: &str) {
        let key: TimerKey = (room.to_string(), game_id.to_string());
        if let Some(handle) = self.timers.lock().await.remove(&key) {
            handle.abort();
        }
    }

    async fn fire_with_retry(auto_advance: AutoAdvanceFn, room: String, game_id: String) {
        let mut attempt = 0;
        loop {
            match (auto_advance)(room.clone(), game_id.clone()).await {
                Ok(()) => return,
                Err(e) if attempt < RETRY_BACKOFFS_MS.len() => {
                    warn!(
                        "scheduler: auto-advance failed for room {room} game {game_id} (attempt {}): {e}",
                        attempt + 1
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFFS_MS[attempt])).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "scheduler: auto-advance exhausted retries for room {room} game {game_id}: {e}"
                    );
                    return;
                }
            }
        }
    }

    #[cfg(test)]
    async fn armed_count(&self) -> usize {
        self.timers.lock().await.len()
    }
}
