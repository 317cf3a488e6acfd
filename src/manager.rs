//! Game manager (C8): per-room lifecycle, stage machine, ball intake,
//! jackpot branch decision, and event fan-out — the core coordinator.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::RwLock;

use crate::domain::{Ball, BallKind, Game};
use crate::errors::{OrchestratorError, Result};
use crate::events::{EventSpine, GameEvent};
use crate::repository::CompositeRepository;
use crate::scheduler::TimerScheduler;
use crate::side_picker::pick_side;
use crate::stage::{next_stage, Stage};

const AUTO_ADVANCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-room, per-game runtime orchestrator. Constructed behind an `Arc`
/// because the timer scheduler and spawned auto-advance tasks need to call
/// back into it after this function returns.
pub struct GameManager {
    repo: CompositeRepository,
    events: EventSpine,
    state: RwLock<HashMap<String, Game>>,
    scheduler: TimerScheduler,
    self_ref: Weak<GameManager>,
    supported_rooms: Vec<String>,
    default_room: String,
    pool_size: u8,
    stage_durations: HashMap<Stage, Duration>,
}

impl GameManager {
    pub fn new(
        repo: CompositeRepository,
        events: EventSpine,
        supported_rooms: Vec<String>,
        default_room: String,
        pool_size: u8,
        stage_durations: HashMap<Stage, Duration>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let weak_for_timer = weak.clone();
            let scheduler = TimerScheduler::new(move |room, _game_id| {
                let weak = weak_for_timer.clone();
                async move {
                    match weak.upgrade() {
                        Some(manager) => manager.advance_stage(&room, true).await.map_err(|e| e.to_string()),
                        None => Ok(()),
                    }
                }
            });
            GameManager {
                repo,
                events,
                state: RwLock::new(HashMap::new()),
                scheduler,
                self_ref: weak.clone(),
                supported_rooms,
                default_room,
                pool_size,
                stage_durations,
            }
        })
    }

    pub fn supported_rooms(&self) -> &[String] {
        &self.supported_rooms
    }

    pub fn default_room(&self) -> &str {
        &self.default_room
    }

    fn check_room_supported(&self, room: &str) -> Result<()> {
        if self.supported_rooms.iter().any(|r| r == room) {
            Ok(())
        } else {
            Err(OrchestratorError::RoomNotSupported { room: room.to_string() })
        }
    }

    fn effective_timeout(&self, stage: Stage) -> Option<Duration> {
        self.stage_durations.get(&stage).copied().or_else(|| stage.timeout())
    }

    fn stamp_expiry(&self, game: &mut Game) {
        game.stage_expires_at = self
            .effective_timeout(game.stage)
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| chrono::Utc::now() + d);
    }

    async fn arm_timer(&self, room: &str, game: &Game) {
        self.scheduler.arm(room, &game.game_id, self.effective_timeout(game.stage)).await;
    }

    fn spawn_auto_advance(&self, room: &str) {
        let Some(manager) = self.self_ref.upgrade() else { return };
        let room = room.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(AUTO_ADVANCE_TIMEOUT, manager.advance_stage(&room, true)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("manager: auto-advance failed for room {room}: {e}"),
                Err(_) => error!("manager: auto-advance timed out for room {room}"),
            }
        });
    }

    /// Hydrate every supported room from storage, seeding a lucky-ball vector
    /// and a fresh game where either is absent.
    pub async fn start(&self) -> Result<()> {
        for room in self.supported_rooms.clone() {
            let lucky_balls = self.repo.get_lucky_balls(&room)?;
            if lucky_balls.is_empty() {
                let generated = crate::domain::generate_lucky_balls(75)?;
                let numbers: Vec<u8> = generated.iter().map(|b| b.number).collect();
                self.repo.save_lucky_balls(&room, &numbers)?;
                info!("manager: generated lucky-ball vector for room {room}");
            }

            let existing = self.repo.get_current_game(&room)?;
            let game = match existing {
                Some(game) => game,
                None => {
                    let mut fresh = Game::new_random(room.clone())?;
                    self.stamp_expiry(&mut fresh);
                    self.repo.save_game(&room, &fresh)?;
                    fresh
                }
            };

            let remaining = match game.stage_expires_at {
                Some(expires_at) => {
                    let remaining_ms = (expires_at - chrono::Utc::now()).num_milliseconds();
                    Some(Duration::from_millis(remaining_ms.max(0) as u64))
                }
                None => self.effective_timeout(game.stage),
            };
            self.scheduler.arm(&room, &game.game_id, remaining).await;

            self.state.write().await.insert(room.clone(), game);
            info!("manager: hydrated room {room}");
        }
        Ok(())
    }

    pub async fn create_new_game(&self, room: &str) -> Result<String> {
        self.check_room_supported(room)?;
        let mut state = self.state.write().await;
        if let Some(current) = state.get(room) {
            if current.stage != Stage::Preparation && current.stage != Stage::GameOver {
                return Err(OrchestratorError::GameInProgress { room: room.to_string() });
            }
        }

        let mut game = Game::new_random(room.to_string())?;
        self.stamp_expiry(&mut game);
        let game_id = game.game_id.clone();
        state.insert(room.to_string(), game.clone());
        drop(state);

        self.repo.save_game(room, &game)?;
        self.arm_timer(room, &game).await;
        self.events
            .fan_out(GameEvent::GameCreated { room_id: room.to_string(), game_id: game_id.clone() })
            .await;
        Ok(game_id)
    }

    pub async fn get_current_game(&self, room: &str) -> Result<Option<Game>> {
        self.check_room_supported(room)?;
        Ok(self.state.read().await.get(room).cloned())
    }

    /// The room's persisted lucky-ball vector (§4.4 `get-lucky-balls`),
    /// empty if it has not been generated yet.
    pub fn get_lucky_balls(&self, room: &str) -> Result<Vec<u8>> {
        self.check_room_supported(room)?;
        self.repo.get_lucky_balls(room)
    }

    pub async fn get_current_stage(&self, room: &str) -> Result<Stage> {
        self.check_room_supported(room)?;
        self.state
            .read()
            .await
            .get(room)
            .map(|g| g.stage)
            .ok_or_else(|| OrchestratorError::GameNotFound { room: room.to_string() })
    }

    /// Advance the current stage. At `PayoutSettlement`, resolves the
    /// jackpot/lucky branch; at `GameOver`, finalizes the finished game into
    /// history and seeds a fresh one.
    pub async fn advance_stage(&self, room: &str, auto: bool) -> Result<()> {
        self.check_room_supported(room)?;
        let mut state = self.state.write().await;
        let game = state
            .get(room)
            .cloned()
            .ok_or_else(|| OrchestratorError::GameNotFound { room: room.to_string() })?;

        if game.stage == Stage::GameOver {
            let mut finished = game.clone();
            finished.ended_at = Some(chrono::Utc::now());

            let mut fresh = Game::new_random(room.to_string())?;
            self.stamp_expiry(&mut fresh);
            state.insert(room.to_string(), fresh.clone());
            drop(state);

            self.scheduler.cancel(room, &finished.game_id).await;
            self.repo.save_game_history(&finished)?;
            self.repo.save_game(room, &fresh)?;
            self.arm_timer(room, &fresh).await;

            self.events
                .fan_out(GameEvent::GameCompleted { room_id: room.to_string(), game: Box::new(finished) })
                .await;
            self.events
                .fan_out(GameEvent::StageChanged {
                    room_id: room.to_string(),
                    game_id: fresh.game_id.clone(),
                    from: Stage::GameOver,
                    to: Stage::Preparation,
                    auto,
                })
                .await;
            return Ok(());
        }

        let lucky_numbers = if game.stage == Stage::PayoutSettlement {
            match self.repo.get_lucky_balls(room) {
                Ok(numbers) if !numbers.is_empty() => Some(numbers),
                Ok(_) => None,
                Err(e) => {
                    warn!("manager: lucky-ball fetch failed for room {room}, falling back to has-jackpot: {e}");
                    None
                }
            }
        } else {
            None
        };

        let from_stage = game.stage;
        let to_stage = next_stage(from_stage, &game, lucky_numbers.as_deref());

        let mut updated = game;
        updated.stage = to_stage;
        updated.touch();
        self.stamp_expiry(&mut updated);

        let mut side_just_picked = None;
        if to_stage == Stage::ExtraBallSideSelectBettingStart && updated.extra_side.is_none() {
            let side = pick_side()?;
            updated.extra_side = Some(side);
            side_just_picked = Some(side);
        }
        // Reaching either jackpot stage at all means the branch rule already
        // routed here — on a full lucky match that can happen with
        // `has_jackpot` unset, so initialization must not re-check the flag.
        if matches!(to_stage, Stage::JackpotPreparation | Stage::JackpotDrawingStart) && updated.jackpot.is_none() {
            let lucky = self.repo.get_lucky_balls(room)?;
            updated.ensure_jackpot_initialized(&lucky);
        }

        state.insert(room.to_string(), updated.clone());
        drop(state);

        self.repo.save_game(room, &updated)?;
        self.arm_timer(room, &updated).await;

        if let Some(side) = side_just_picked {
            self.events
                .fan_out(GameEvent::SideSelected { room_id: room.to_string(), game_id: updated.game_id.clone(), side })
                .await;
        }
        self.events
            .fan_out(GameEvent::StageChanged {
                room_id: room.to_string(),
                game_id: updated.game_id.clone(),
                from: from_stage,
                to: to_stage,
                auto,
            })
            .await;
        Ok(())
    }

    async fn draw_ball(&self, room: &str, kind: BallKind, number: u8, last: bool) -> Result<Ball> {
        self.check_room_supported(room)?;
        let mut state = self.state.write().await;
        let mut game = state
            .get(room)
            .cloned()
            .ok_or_else(|| OrchestratorError::GameNotFound { room: room.to_string() })?;

        let room_lucky_balls = if matches!(kind, BallKind::Jackpot | BallKind::Lucky) {
            self.repo.get_lucky_balls(room)?
        } else {
            Vec::new()
        };

        let ball = {
            let drawn = game.add_ball(number, kind, last, self.pool_size, &room_lucky_balls)?;
            drawn.clone()
        };
        let is_terminal = game.pool_is_terminal(kind);

        state.insert(room.to_string(), game.clone());
        drop(state);

        self.repo.save_game(room, &game)?;
        self.events
            .fan_out(GameEvent::BallDrawn { room_id: room.to_string(), game_id: game.game_id.clone(), ball: ball.clone() })
            .await;

        if is_terminal {
            self.spawn_auto_advance(room);
        }
        Ok(ball)
    }

    pub async fn update_regular_balls(&self, room: &str, number: u8, last: bool) -> Result<Ball> {
        self.draw_ball(room, BallKind::Regular, number, last).await
    }

    pub async fn update_extra_balls(&self, room: &str, number: u8, last: bool) -> Result<Ball> {
        self.draw_ball(room, BallKind::Extra, number, last).await
    }

    pub async fn handle_draw_jackpot_ball(&self, room: &str, number: u8, last: bool) -> Result<Ball> {
        self.draw_ball(room, BallKind::Jackpot, number, last).await
    }

    pub async fn handle_draw_lucky_ball(&self, room: &str, number: u8, last: bool) -> Result<Ball> {
        self.draw_ball(room, BallKind::Lucky, number, last).await
    }

    /// Batch-replace the whole extra-ball array in one call (§4.8).
    pub async fn replace_extra_balls(&self, room: &str, numbers: &[u8]) -> Result<()> {
        self.check_room_supported(room)?;
        let mut state = self.state.write().await;
        let mut game = state
            .get(room)
            .cloned()
            .ok_or_else(|| OrchestratorError::GameNotFound { room: room.to_string() })?;

        game.replace_extra_balls(numbers, self.pool_size)?;
        let is_terminal = game.pool_is_terminal(BallKind::Extra);

        state.insert(room.to_string(), game.clone());
        drop(state);

        self.repo.save_game(room, &game)?;
        for ball in &game.extra_balls {
            self.events
                .fan_out(GameEvent::BallDrawn { room_id: room.to_string(), game_id: game.game_id.clone(), ball: ball.clone() })
                .await;
        }
        if is_terminal {
            self.spawn_auto_advance(room);
        }
        Ok(())
    }

    pub async fn cancel_game(&self, room: &str, reason: &str) -> Result<()> {
        self.check_room_supported(room)?;
        let mut state = self.state.write().await;
        let mut game = state
            .get(room)
            .cloned()
            .ok_or_else(|| OrchestratorError::GameNotFound { room: room.to_string() })?;

        if game.cancelled {
            return Err(OrchestratorError::GameAlreadyCancelled { game_id: game.game_id });
        }
        if !game.stage.is_cancellable() {
            return Err(OrchestratorError::CannotCancelGame { current: game.stage });
        }

        let now = chrono::Utc::now();
        game.cancelled = true;
        game.cancel_reason = Some(reason.to_string());
        game.cancelled_at = Some(now);
        game.ended_at = Some(now);
        let cancelled_game = game.clone();

        let mut fresh = Game::new_random(room.to_string())?;
        self.stamp_expiry(&mut fresh);
        state.insert(room.to_string(), fresh.clone());
        drop(state);

        self.scheduler.cancel(room, &cancelled_game.game_id).await;
        self.repo.save_game_history(&cancelled_game)?;
        self.repo.delete_current_game(room)?;
        self.repo.save_game(room, &fresh)?;
        self.arm_timer(room, &fresh).await;

        self.events
            .fan_out(GameEvent::GameCancelled {
                room_id: room.to_string(),
                game_id: cancelled_game.game_id,
                reason: reason.to_string(),
            })
            .await;
        Ok(())
    }

    pub async fn reset_game(&self, room: &str) -> Result<Game> {
        self.check_room_supported(room)?;
        let current = self
            .get_current_game(room)
            .await?
            .ok_or_else(|| OrchestratorError::GameNotFound { room: room.to_string() })?;

        self.repo.save_game_history(&current)?;
        self.repo.delete_current_game(room)?;
        self.scheduler.cancel(room, &current.game_id).await;
        self.state.write().await.remove(room);

        self.create_new_game(room).await?;
        self.get_current_game(room)
            .await?
            .ok_or_else(|| OrchestratorError::GameNotFound { room: room.to_string() })
    }

    /// Permitted only in `Preparation`, `NewRound`, or `CardPurchaseOpen`.
    pub async fn set_has_jackpot(&self, room: &str, enabled: bool) -> Result<()> {
        self.check_room_supported(room)?;
        let mut state = self.state.write().await;
        let mut game = state
            .get(room)
            .cloned()
            .ok_or_else(|| OrchestratorError::GameNotFound { room: room.to_string() })?;

        if !matches!(game.stage, Stage::Preparation | Stage::NewRound | Stage::CardPurchaseOpen) {
            return Err(OrchestratorError::InvalidStage { current: game.stage });
        }
        game.has_jackpot = enabled;
        game.touch();
        state.insert(room.to_string(), game.clone());
        drop(state);

        self.repo.save_game(room, &game)
    }

    /// Recent finalized-game history rows for `room`, newest first (§4.5).
    pub fn get_recent_game_histories(
        &self,
        room: &str,
        limit: usize,
    ) -> Result<Vec<crate::repository::GameHistorySnapshot>> {
        self.check_room_supported(room)?;
        self.repo.get_recent_game_histories(Some(room), limit)
    }

    pub async fn subscribe(&self, subscriber_id: impl Into<String>) -> tokio::sync::mpsc::Receiver<GameEvent> {
        self.events.subscribe(subscriber_id).await
    }

    pub async fn unsubscribe(&self, subscriber_id: &str) {
        self.events.unsubscribe(subscriber_id).await
    }

    /// Remove expired cache entries. Intended to be called on a background
    /// interval (see `main.rs`'s cache sweeper) in addition to the lazy
    /// expiry-on-read the cache tier already performs.
    pub fn sweep_expired_cache(&self) -> Result<usize> {
        self.repo.sweep_expired_cache()
    }
}
