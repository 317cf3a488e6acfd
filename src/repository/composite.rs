//! Composite repository (C6): routes each operation to the tier that owns it,
//! and keeps the cache tier best-effort-synchronized with the durable tier.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;

use crate::domain::Game;
use crate::errors::Result;
use crate::repository::cache::CacheRepository;
use crate::repository::durable::{DurableRepository, GameHistorySnapshot};

/// Façade over the cache and durable repositories. Current-game state and
/// lucky-ball vectors are cache-owned (hot path); finalized-game history and
/// aggregate counters are durable-owned (authoritative).
#[derive(Clone)]
pub struct CompositeRepository {
    cache: CacheRepository,
    durable: DurableRepository,
}

impl CompositeRepository {
    pub fn new(cache: CacheRepository, durable: DurableRepository) -> Self {
        CompositeRepository { cache, durable }
    }

    /// Open the cache tier at `cache_path` and the durable tier at
    /// `durable_path` — two independent embedded stores, matching the split
    /// the configuration file exposes (§4.10).
    pub fn open_at_paths(
        cache_path: impl AsRef<Path>,
        durable_path: impl AsRef<Path>,
        namespace: impl Into<String>,
    ) -> Result<Self> {
        let cache = CacheRepository::open_at_path(cache_path, namespace)?;
        let durable = DurableRepository::open_at_path(durable_path)?;
        Ok(CompositeRepository::new(cache, durable))
    }

    /// Convenience for tests and single-store deployments: both tiers share
    /// one embedded store, distinguished by sled tree.
    pub fn open_at_path(path: impl AsRef<Path>, namespace: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .map_err(|e| crate::errors::OrchestratorError::PersistenceFailed(e.to_string()))?;
        let cache = CacheRepository::open(&db, namespace)?;
        let durable = DurableRepository::open(&db)?;
        Ok(CompositeRepository::new(cache, durable))
    }

    // ---- current-game (cache) ----

    pub fn save_game(&self, room_id: &str, game: &Game) -> Result<()> {
        self.cache.save_game(room_id, game)
    }

    pub fn get_current_game(&self, room_id: &str) -> Result<Option<Game>> {
        self.cache.get_current_game(room_id)
    }

    pub fn delete_current_game(&self, room_id: &str) -> Result<()> {
        self.cache.delete_current_game(room_id)
    }

    // ---- lucky-ball vector (cache) ----

    pub fn save_lucky_balls(&self, room_id: &str, numbers: &[u8]) -> Result<()> {
        self.cache.save_lucky_balls(room_id, numbers)
    }

    pub fn get_lucky_balls(&self, room_id: &str) -> Result<Vec<u8>> {
        self.cache.get_lucky_balls(room_id)
    }

    // ---- per-stage timeout markers (cache) ----

    pub fn save_stage_timeout(
        &self,
        game_id: &str,
        stage: &str,
        expires_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<()> {
        self.cache.save_stage_timeout(game_id, stage, expires_at, ttl)
    }

    pub fn get_stage_timeout(&self, game_id: &str, stage: &str) -> Result<Option<DateTime<Utc>>> {
        self.cache.get_stage_timeout(game_id, stage)
    }

    pub fn delete_stage_timeout(&self, game_id: &str, stage: &str) -> Result<()> {
        self.cache.delete_stage_timeout(game_id, stage)
    }

    // ---- finalized-game history (durable, authoritative; cache best-effort) ----

    /// Write the durable row first. A cache-side copy and history-list entry
    /// follow best-effort — a failure there is logged, not propagated, since
    /// the durable row is already the source of truth.
    pub fn save_game_history(&self, game: &Game) -> Result<()> {
        self.durable.save_game_history(game)?;

        if let Err(e) = self.cache.cache_history_copy(game) {
            warn!("composite repository: cache history copy failed for {}: {e}", game.game_id);
        }
        if let Err(e) = self.cache.push_history_id(&game.room_id, &game.game_id) {
            warn!("composite repository: history-list push failed for {}: {e}", game.game_id);
        }
        Ok(())
    }

    pub fn get_game_by_id(&self, game_id: &str) -> Result<Option<GameHistorySnapshot>> {
        self.durable.get_game_by_id(game_id)
    }

    pub fn get_recent_game_histories(
        &self,
        room: Option<&str>,
        limit: usize,
    ) -> Result<Vec<GameHistorySnapshot>> {
        self.durable.get_recent_game_histories(room, limit)
    }

    pub fn get_total_count(&self, room: Option<&str>) -> Result<usize> {
        self.durable.get_total_count(room)
    }

    pub fn get_cancelled_count(&self, room: Option<&str>) -> Result<usize> {
        self.durable.get_cancelled_count(room)
    }

    pub fn sweep_expired_cache(&self) -> Result<usize> {
        self.cache.sweep_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Ball, BallKind};
    use crate::stage::Stage;

    fn repo() -> (tempfile::TempDir, CompositeRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = CompositeRepository::open_at_path(dir.path(), "test").unwrap();
        (dir, repo)
    }

    #[test]
    fn save_game_history_populates_both_tiers() {
        let (_dir, repo) = repo();
        let mut game = Game::new("SG01".into(), 2);
        game.stage = Stage::GameOver;
        game.ended_at = Some(Utc::now());
        game.regular_balls.push(Ball::new(20, BallKind::Regular, true));

        repo.save_game_history(&game).unwrap();

        assert!(repo.get_game_by_id(&game.game_id).unwrap().is_some());
        assert_eq!(repo.get_total_count(Some("SG01")).unwrap(), 1);
    }

    #[test]
    fn open_at_paths_keeps_cache_and_durable_in_separate_stores() {
        let cache_dir = tempfile::tempdir().unwrap();
        let durable_dir = tempfile::tempdir().unwrap();
        let repo = CompositeRepository::open_at_paths(cache_dir.path(), durable_dir.path(), "test").unwrap();

        let mut game = Game::new("SG01".into(), 2);
        repo.save_game("SG01", &game).unwrap();
        game.stage = Stage::GameOver;
        game.ended_at = Some(Utc::now());
        repo.save_game_history(&game).unwrap();

        assert!(repo.get_current_game("SG01").unwrap().is_some());
        assert!(repo.get_game_by_id(&game.game_id).unwrap().is_some());
    }

    #[test]
    fn current_game_round_trips_through_cache() {
        let (_dir, repo) = repo();
        let game = Game::new("SG01".into(), 1);
        repo.save_game("SG01", &game).unwrap();
        let fetched = repo.get_current_game("SG01").unwrap().unwrap();
        assert_eq!(fetched.game_id, game.game_id);
    }
}
