//! Durable repository (C5): append-only game history and aggregate counters.
//!
//! Tables are modeled as independent sled trees, matching the per-entity tree
//! layout the reference project uses for its own persistent store. There is
//! no cross-tree transaction primitive — each table write is sequential,
//! serialized by the manager's single writer lock (§4.5).

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Ball, Game};
use crate::errors::{OrchestratorError, Result};
use crate::stage::Stage;

const TREE_GAMES: &str = "drawhall_games";
const TREE_DRAWN_BALLS: &str = "drawhall_drawn_balls";
const TREE_LUCKY_BALLS: &str = "drawhall_lucky_balls";
const TREE_STAGE_LOGS: &str = "drawhall_stage_logs";
const TREE_JACKPOT_GAMES: &str = "drawhall_jackpot_games";

/// Denormalized snapshot row stored in the `games` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameHistorySnapshot {
    pub game_id: String,
    pub room_id: String,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    /// JSON blob of the whole game, for forensic/analytics replay.
    pub game_json: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DrawnBallRow {
    game_id: String,
    ball: Ball,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LuckyBallRow {
    room_id: String,
    game_id: String,
    numbers: Vec<u8>,
    active: bool,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StageLogRow {
    game_id: String,
    room_id: String,
    stage: Stage,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct JackpotGameRow {
    game_id: String,
    jackpot_id: String,
    lucky_balls: Vec<u8>,
    drawn_count: usize,
}

fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| OrchestratorError::DataCorrupted(e.to_string()))
}

fn from_bytes<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| OrchestratorError::DataCorrupted(e.to_string()))
}

/// Embedded durable store: a games snapshot table, a per-ball row table, a
/// lucky-ball draw table, a stage-log table, and a jackpot-sub-game table.
#[derive(Clone)]
pub struct DurableRepository {
    games: sled::Tree,
    drawn_balls: sled::Tree,
    lucky_balls: sled::Tree,
    stage_logs: sled::Tree,
    jackpot_games: sled::Tree,
}

impl DurableRepository {
    pub fn open(db: &sled::Db) -> Result<Self> {
        let open = |name: &str| {
            db.open_tree(name).map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))
        };
        Ok(DurableRepository {
            games: open(TREE_GAMES)?,
            drawn_balls: open(TREE_DRAWN_BALLS)?,
            lucky_balls: open(TREE_LUCKY_BALLS)?,
            stage_logs: open(TREE_STAGE_LOGS)?,
            jackpot_games: open(TREE_JACKPOT_GAMES)?,
        })
    }

    pub fn open_at_path(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;
        Self::open(&db)
    }

    /// Upsert by game-id: snapshot row, per-ball rows, lucky-ball row, and an
    /// appended stage-log row. Failures here are fatal to the surrounding
    /// action — the caller's in-memory stage change is not rolled back.
    pub fn save_game_history(&self, game: &Game) -> Result<()> {
        let game_json = serde_json::to_value(game)
            .map_err(|e| OrchestratorError::DataCorrupted(e.to_string()))?;
        let snapshot = GameHistorySnapshot {
            game_id: game.game_id.clone(),
            room_id: game.room_id.clone(),
            stage: game.stage,
            started_at: game.started_at,
            ended_at: game.ended_at,
            cancelled: game.cancelled,
            game_json,
        };
        self.games
            .insert(game.game_id.as_bytes(), to_bytes(&snapshot)?)
            .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;

        self.replace_drawn_ball_rows(game)?;

        if let Some(jackpot) = &game.jackpot {
            let lucky_row = LuckyBallRow {
                room_id: game.room_id.clone(),
                game_id: game.game_id.clone(),
                numbers: jackpot.lucky_balls.clone(),
                active: true,
                recorded_at: Utc::now(),
            };
            self.upsert_active_lucky_row(lucky_row)?;

            let jackpot_row = JackpotGameRow {
                game_id: game.game_id.clone(),
                jackpot_id: jackpot.id.clone(),
                lucky_balls: jackpot.lucky_balls.clone(),
                drawn_count: jackpot.drawn_balls.len(),
            };
            self.jackpot_games
                .insert(jackpot.id.as_bytes(), to_bytes(&jackpot_row)?)
                .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;
        }

        self.append_stage_log(game)?;
        Ok(())
    }

    fn replace_drawn_ball_rows(&self, game: &Game) -> Result<()> {
        let prefix = format!("{}:", game.game_id);
        let stale_keys: Vec<sled::IVec> = self
            .drawn_balls
            .scan_prefix(prefix.as_bytes())
            .keys()
            .filter_map(|k| k.ok())
            .collect();
        for key in stale_keys {
            self.drawn_balls
                .remove(key)
                .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;
        }

        let all_balls: Vec<&Ball> = game
            .regular_balls
            .iter()
            .chain(game.extra_balls.iter())
            .chain(game.jackpot.iter().flat_map(|j| j.drawn_balls.iter()))
            .collect();
        for (index, ball) in all_balls.into_iter().enumerate() {
            let key = format!("{prefix}{index:06}");
            let row = DrawnBallRow { game_id: game.game_id.clone(), ball: ball.clone() };
            self.drawn_balls
                .insert(key.as_bytes(), to_bytes(&row)?)
                .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn upsert_active_lucky_row(&self, row: LuckyBallRow) -> Result<()> {
        let prefix = format!("{}:", row.room_id);
        let active_keys: Vec<sled::IVec> = self
            .lucky_balls
            .scan_prefix(prefix.as_bytes())
            .keys()
            .filter_map(|k| k.ok())
            .collect();
        for key in active_keys {
            if let Some(bytes) = self
                .lucky_balls
                .get(&key)
                .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?
            {
                let mut existing: LuckyBallRow = from_bytes(&bytes)?;
                if existing.active {
                    existing.active = false;
                    self.lucky_balls
                        .insert(key, to_bytes(&existing)?)
                        .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;
                }
            }
        }

        let key = format!("{}{}", prefix, row.game_id);
        self.lucky_balls
            .insert(key.as_bytes(), to_bytes(&row)?)
            .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;
        Ok(())
    }

    fn append_stage_log(&self, game: &Game) -> Result<()> {
        let row = StageLogRow {
            game_id: game.game_id.clone(),
            room_id: game.room_id.clone(),
            stage: game.stage,
            at: Utc::now(),
        };
        let key = format!("{}:{:020}", game.game_id, Utc::now().timestamp_nanos_opt().unwrap_or_default());
        self.stage_logs
            .insert(key.as_bytes(), to_bytes(&row)?)
            .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;
        Ok(())
    }

    pub fn get_game_by_id(&self, game_id: &str) -> Result<Option<GameHistorySnapshot>> {
        let Some(bytes) = self
            .games
            .get(game_id.as_bytes())
            .map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?
        else {
            return Ok(None);
        };
        Ok(Some(from_bytes(&bytes)?))
    }

    fn game_id_prefix(room_id: &str) -> String {
        format!("room_{room_id}_game_")
    }

    /// Recent game-history snapshots, optionally scoped to `room`, newest
    /// start-time first.
    pub fn get_recent_game_histories(
        &self,
        room: Option<&str>,
        limit: usize,
    ) -> Result<Vec<GameHistorySnapshot>> {
        let mut snapshots = Vec::new();
        for entry in self.games.iter() {
            let (key, bytes) = entry.map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;
            if let Some(room) = room {
                let prefix = Self::game_id_prefix(room);
                if !key.starts_with(prefix.as_bytes()) {
                    continue;
                }
            }
            snapshots.push(from_bytes::<GameHistorySnapshot>(&bytes)?);
        }
        snapshots.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        snapshots.truncate(limit);
        Ok(snapshots)
    }

    pub fn get_total_count(&self, room: Option<&str>) -> Result<usize> {
        self.count_where(room, |_| true)
    }

    pub fn get_cancelled_count(&self, room: Option<&str>) -> Result<usize> {
        self.count_where(room, |snapshot| snapshot.cancelled)
    }

    fn count_where(&self, room: Option<&str>, predicate: impl Fn(&GameHistorySnapshot) -> bool) -> Result<usize> {
        let mut count = 0;
        for entry in self.games.iter() {
            let (key, bytes) = entry.map_err(|e| OrchestratorError::PersistenceFailed(e.to_string()))?;
            if let Some(room) = room {
                let prefix = Self::game_id_prefix(room);
                if !key.starts_with(prefix.as_bytes()) {
                    continue;
                }
            }
            let snapshot: GameHistorySnapshot = from_bytes(&bytes)?;
            if predicate(&snapshot) {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BallKind, Game};
    use crate::stage::Stage;

    fn finished_game(room: &str) -> Game {
        let mut game = Game::new(room.to_string(), 2);
        game.stage = Stage::GameOver;
        game.ended_at = Some(Utc::now());
        game.regular_balls.push(Ball::new(10, BallKind::Regular, true));
        game
    }

    #[test]
    fn save_and_fetch_game_history() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DurableRepository::open_at_path(dir.path()).unwrap();
        let game = finished_game("SG01");
        repo.save_game_history(&game).unwrap();

        let fetched = repo.get_game_by_id(&game.game_id).unwrap().unwrap();
        assert_eq!(fetched.stage, Stage::GameOver);
        assert!(fetched.ended_at.is_some());
        assert!(!fetched.cancelled);
    }

    #[test]
    fn counts_scope_by_room_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DurableRepository::open_at_path(dir.path()).unwrap();
        repo.save_game_history(&finished_game("SG01")).unwrap();
        repo.save_game_history(&finished_game("SG01")).unwrap();
        repo.save_game_history(&finished_game("SG02")).unwrap();

        assert_eq!(repo.get_total_count(Some("SG01")).unwrap(), 2);
        assert_eq!(repo.get_total_count(Some("SG02")).unwrap(), 1);
        assert_eq!(repo.get_total_count(None).unwrap(), 3);
    }

    #[test]
    fn recent_histories_ordered_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DurableRepository::open_at_path(dir.path()).unwrap();
        let mut first = finished_game("SG01");
        first.started_at = Utc::now() - chrono::Duration::hours(2);
        let mut second = finished_game("SG01");
        second.started_at = Utc::now();
        repo.save_game_history(&first).unwrap();
        repo.save_game_history(&second).unwrap();

        let recent = repo.get_recent_game_histories(Some("SG01"), 10).unwrap();
        assert_eq!(recent[0].game_id, second.game_id);
        assert_eq!(recent[1].game_id, first.game_id);
    }
}
