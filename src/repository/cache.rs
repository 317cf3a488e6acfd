//! Cache repository (C4): fast read/write of the current game and the
//! per-room lucky-ball vector, backed by an embedded key-value store.
//!
//! This mirrors the reference project's embedded sled-backed store — trees
//! stand in for the "cache" and "durable" tiers a networked deployment would
//! split across Redis and a SQL database.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::Game;
use crate::errors::{OrchestratorError, Result};

const TREE_CACHE: &str = "drawhall_cache";

fn prefixed(namespace: &str, rest: &str) -> Vec<u8> {
    format!("{namespace}:{rest}").into_bytes()
}

/// A cache value with an optional expiry. `None` means the entry never expires.
#[derive(Serialize, serde::Deserialize)]
struct Envelope {
    expires_at_millis: Option<i64>,
    payload: Vec<u8>,
}

/// Embedded key-value cache: current game, lucky-ball vector, and per-stage
/// timeout markers. Cheap to clone — `sled::Tree` is `Arc`-backed internally.
#[derive(Clone)]
pub struct CacheRepository {
    tree: sled::Tree,
    namespace: String,
}

impl CacheRepository {
    pub fn open(db: &sled::Db, namespace: impl Into<String>) -> Result<Self> {
        let tree = db
            .open_tree(TREE_CACHE)
            .map_err(|e| OrchestratorError::CacheUnavailable(e.to_string()))?;
        Ok(CacheRepository { tree, namespace: namespace.into() })
    }

    pub fn open_at_path(path: impl AsRef<Path>, namespace: impl Into<String>) -> Result<Self> {
        let db = sled::open(path).map_err(|e| OrchestratorError::CacheUnavailable(e.to_string()))?;
        Self::open(&db, namespace)
    }

    // ---- low-level get/set(ttl)/delete/exists, the interface named in §6 ----

    fn set_raw(&self, key: &[u8], payload: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at_millis = ttl.map(|d| (Utc::now() + chrono::Duration::from_std(d).unwrap_or_default()).timestamp_millis());
        let envelope = Envelope { expires_at_millis, payload };
        let bytes = bincode::serialize(&envelope)
            .map_err(|e| OrchestratorError::DataCorrupted(e.to_string()))?;
        self.tree.insert(key, bytes).map_err(|e| OrchestratorError::CacheUnavailable(e.to_string()))?;
        Ok(())
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(bytes) = self.tree.get(key).map_err(|e| OrchestratorError::CacheUnavailable(e.to_string()))? else {
            return Ok(None);
        };
        let envelope: Envelope =
            bincode::deserialize(&bytes).map_err(|e| OrchestratorError::DataCorrupted(e.to_string()))?;
        if let Some(expires_at_millis) = envelope.expires_at_millis {
            if Utc::now().timestamp_millis() >= expires_at_millis {
                let _ = self.tree.remove(key);
                return Ok(None);
            }
        }
        Ok(Some(envelope.payload))
    }

    fn delete_raw(&self, key: &[u8]) -> Result<()> {
        self.tree.remove(key).map_err(|e| OrchestratorError::CacheUnavailable(e.to_string()))?;
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get_raw(key)?.is_some())
    }

    fn set_typed<T: Serialize>(&self, key: &[u8], value: &T, ttl: Option<Duration>) -> Result<()> {
        let payload =
            serde_json::to_vec(value).map_err(|e| OrchestratorError::DataCorrupted(e.to_string()))?;
        self.set_raw(key, payload, ttl)
    }

    fn get_typed<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        let Some(payload) = self.get_raw(key)? else { return Ok(None) };
        let value = serde_json::from_slice(&payload)
            .map_err(|e| OrchestratorError::DataCorrupted(e.to_string()))?;
        Ok(Some(value))
    }

    // ---- current-game ----

    fn current_key(&self, room_id: &str) -> Vec<u8> {
        prefixed(&self.namespace, &format!("room:{room_id}:current"))
    }

    pub fn save_game(&self, room_id: &str, game: &Game) -> Result<()> {
        self.set_typed(&self.current_key(room_id), game, None)
    }

    pub fn get_current_game(&self, room_id: &str) -> Result<Option<Game>> {
        self.get_typed(&self.current_key(room_id))
    }

    pub fn delete_current_game(&self, room_id: &str) -> Result<()> {
        self.delete_raw(&self.current_key(room_id))
    }

    // ---- lucky-ball vector ----

    fn lucky_balls_key(&self, room_id: &str) -> Vec<u8> {
        prefixed(&self.namespace, &format!("room:{room_id}:lucky_balls"))
    }

    /// Delete-then-write, with a read-after-write check — the lucky-ball
    /// vector is the one cache value hydration on restart cannot regenerate
    /// on a whim, so coherence is verified eagerly.
    pub fn save_lucky_balls(&self, room_id: &str, numbers: &[u8]) -> Result<()> {
        let key = self.lucky_balls_key(room_id);
        self.delete_raw(&key)?;
        self.set_typed(&key, &numbers.to_vec(), None)?;
        let read_back: Option<Vec<u8>> = self.get_typed(&key)?;
        if read_back.as_deref() != Some(numbers) {
            return Err(OrchestratorError::CacheUnavailable(format!(
                "lucky-ball read-after-write mismatch for room {room_id}"
            )));
        }
        Ok(())
    }

    pub fn get_lucky_balls(&self, room_id: &str) -> Result<Vec<u8>> {
        Ok(self.get_typed(&self.lucky_balls_key(room_id))?.unwrap_or_default())
    }

    // ---- per-stage timeout markers ----

    fn timeout_key(&self, game_id: &str, stage: &str) -> Vec<u8> {
        prefixed(&self.namespace, &format!("timeout:{game_id}:{stage}"))
    }

    pub fn save_stage_timeout(
        &self,
        game_id: &str,
        stage: &str,
        expires_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<()> {
        self.set_typed(&self.timeout_key(game_id, stage), &expires_at, Some(ttl))
    }

    pub fn get_stage_timeout(&self, game_id: &str, stage: &str) -> Result<Option<DateTime<Utc>>> {
        self.get_typed(&self.timeout_key(game_id, stage))
    }

    pub fn delete_stage_timeout(&self, game_id: &str, stage: &str) -> Result<()> {
        self.delete_raw(&self.timeout_key(game_id, stage))
    }

    // ---- per-room history list (list-push / list-range) ----

    fn history_list_prefix(&self, room_id: &str) -> String {
        format!("room:{room_id}:history_list:")
    }

    /// Append `game_id` to the per-room history-id list. No TTL — the list
    /// grows for the life of the room.
    pub fn push_history_id(&self, room_id: &str, game_id: &str) -> Result<()> {
        let index = self.tree.scan_prefix(prefixed(&self.namespace, &self.history_list_prefix(room_id))).count();
        let key = prefixed(&self.namespace, &format!("{}{:012}", self.history_list_prefix(room_id), index));
        self.set_typed(&key, &game_id.to_string(), None)
    }

    /// Most recently pushed `limit` history ids for `room_id`, newest first.
    pub fn history_list_range(&self, room_id: &str, limit: usize) -> Result<Vec<String>> {
        let prefix = prefixed(&self.namespace, &self.history_list_prefix(room_id));
        let mut ids = Vec::new();
        for entry in self.tree.scan_prefix(&prefix) {
            let (_, bytes) = entry.map_err(|e| OrchestratorError::CacheUnavailable(e.to_string()))?;
            let envelope: Envelope =
                bincode::deserialize(&bytes).map_err(|e| OrchestratorError::DataCorrupted(e.to_string()))?;
            let id: String = serde_json::from_slice(&envelope.payload)
                .map_err(|e| OrchestratorError::DataCorrupted(e.to_string()))?;
            ids.push(id);
        }
        ids.reverse();
        ids.truncate(limit);
        Ok(ids)
    }

    /// Cache-side 30-day-TTL copy of a finalized game, written alongside the
    /// durable-store row (§6 `history:<gameID>` key).
    pub fn cache_history_copy(&self, game: &Game) -> Result<()> {
        let key = prefixed(&self.namespace, &format!("history:{}", game.game_id));
        let ttl = Duration::from_secs(30 * 24 * 3600);
        self.set_typed(&key, game, Some(ttl))
    }

    pub fn key_exists(&self, room_id: &str) -> Result<bool> {
        self.exists(&self.current_key(room_id))
    }

    /// Remove any expired entries. Intended to run on a periodic background
    /// sweep alongside lazy expiry-on-read.
    pub fn sweep_expired(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.tree.iter() {
            let (key, bytes) = entry.map_err(|e| OrchestratorError::CacheUnavailable(e.to_string()))?;
            let envelope: Envelope = match bincode::deserialize(&bytes) {
                Ok(e) => e,
                Err(_) => continue,
            };
            if let Some(expires_at_millis) = envelope.expires_at_millis {
                if Utc::now().timestamp_millis() >= expires_at_millis {
                    if self.tree.remove(&key).is_ok() {
                        removed += 1;
                    }
                }
            }
        }
        if removed > 0 {
            debug!("cache sweep removed {removed} expired entries");
        }
        Ok(removed)
    }
}
