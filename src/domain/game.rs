//! Game entity (C1): the aggregate that the stage machine and ball-draw
//! transaction operate over.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ball::{validate_ball_number, Ball, BallKind, LUCKY_BALL_COUNT};
use crate::domain::jackpot::JackpotSubGame;
use crate::errors::{OrchestratorError, Result};
use crate::side_picker::Side;
use crate::stage::Stage;

pub const MIN_EXTRA_BALL_COUNT: u8 = 1;
pub const MAX_EXTRA_BALL_COUNT: u8 = 3;

/// One complete cycle from `Preparation` to `GameOver`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    pub room_id: String,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stage_expires_at: Option<DateTime<Utc>>,
    pub regular_balls: Vec<Ball>,
    pub extra_balls: Vec<Ball>,
    pub extra_side: Option<Side>,
    pub extra_ball_count: u8,
    pub has_jackpot: bool,
    pub jackpot: Option<JackpotSubGame>,
    pub cancelled: bool,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Uniformly pick the extra-ball count in `{1,2,3}` from a cryptographically
/// strong RNG.
pub fn pick_extra_ball_count() -> Result<u8> {
    let mut rng = OsRng;
    let span = (MAX_EXTRA_BALL_COUNT - MIN_EXTRA_BALL_COUNT + 1) as u32;
    let mut buf = [0u8; 4];
    rng.try_fill_bytes(&mut buf).map_err(|_| OrchestratorError::RngFailure)?;
    let roll = u32::from_le_bytes(buf) % span;
    Ok(MIN_EXTRA_BALL_COUNT + roll as u8)
}

impl Game {
    /// Build a fresh `Preparation`-stage game with an explicit extra-ball
    /// count (used by tests and by callers that already rolled one).
    pub fn new(room_id: String, extra_ball_count: u8) -> Self {
        let now = Utc::now();
        Game {
            game_id: format!("room_{room_id}_game_{}", Uuid::new_v4()),
            room_id,
            stage: Stage::Preparation,
            started_at: now,
            ended_at: None,
            stage_expires_at: None,
            regular_balls: Vec::new(),
            extra_balls: Vec::new(),
            extra_side: None,
            extra_ball_count,
            has_jackpot: true,
            jackpot: None,
            cancelled: false,
            cancel_reason: None,
            cancelled_at: None,
            updated_at: now,
        }
    }

    /// Build a fresh game, rolling the extra-ball count with the secure RNG.
    pub fn new_random(room_id: String) -> Result<Self> {
        let extra_ball_count = pick_extra_ball_count()?;
        Ok(Self::new(room_id, extra_ball_count))
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled && self.stage != Stage::GameOver
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Numbers already drawn in the regular, extra, and in-progress jackpot
    /// pools — the union invariant 1 forbids duplicates across.
    fn cross_pool_numbers(&self) -> Vec<u8> {
        let mut numbers: Vec<u8> = self
            .regular_balls
            .iter()
            .chain(self.extra_balls.iter())
            .map(|b| b.number)
            .collect();
        if let Some(jackpot) = &self.jackpot {
            numbers.extend(
                jackpot
                    .drawn_balls
                    .iter()
                    .filter(|b| b.kind == BallKind::Jackpot)
                    .map(|b| b.number),
            );
        }
        numbers
    }

    fn lucky_drawn_count(&self) -> usize {
        self.jackpot
            .as_ref()
            .map(|j| j.drawn_balls.iter().filter(|b| b.kind == BallKind::Lucky).count())
            .unwrap_or(0)
    }

    pub(crate) fn ensure_jackpot_initialized(&mut self, room_lucky_balls: &[u8]) {
        if self.jackpot.is_none() {
            self.jackpot = Some(JackpotSubGame::new(&self.room_id, room_lucky_balls.to_vec()));
        }
    }

    /// The stage a ball of `kind` may legally be drawn in.
    pub fn expected_stage_for(kind: BallKind) -> Stage {
        match kind {
            BallKind::Regular => Stage::DrawingStart,
            BallKind::Extra => Stage::ExtraBallDrawingStart,
            BallKind::Jackpot => Stage::JackpotDrawingStart,
            BallKind::Lucky => Stage::DrawingLuckyBallsStart,
        }
    }

    /// The sole mutator of draw state (C1 §4.1). `pool_size` is the
    /// configured ball-pool size (default 75); `room_lucky_balls` is used only
    /// to lazily attach a jackpot sub-game's winning pattern if one is not
    /// already initialized.
    pub fn add_ball(
        &mut self,
        number: u8,
        kind: BallKind,
        last: bool,
        pool_size: u8,
        room_lucky_balls: &[u8],
    ) -> Result<&Ball> {
        let expected_stage = Self::expected_stage_for(kind);
        if self.stage != expected_stage {
            return Err(OrchestratorError::InvalidStage { current: self.stage });
        }

        validate_ball_number(number, pool_size)?;

        match kind {
            BallKind::Regular => {
                if self.cross_pool_numbers().contains(&number) {
                    return Err(OrchestratorError::DuplicateBall { number });
                }
                if self.regular_balls.len() >= pool_size as usize {
                    return Err(OrchestratorError::MaxBallsReached { max: pool_size as usize });
                }
                self.regular_balls.push(Ball::new(number, kind, last));
                self.touch();
                Ok(self.regular_balls.last().unwrap())
            }
            BallKind::Extra => {
                if self.cross_pool_numbers().contains(&number) {
                    return Err(OrchestratorError::DuplicateBall { number });
                }
                let cap = self.extra_ball_count as usize;
                if self.extra_balls.len() >= cap {
                    return Err(OrchestratorError::MaxBallsReached { max: cap });
                }
                self.extra_balls.push(Ball::new(number, kind, last));
                self.touch();
                Ok(self.extra_balls.last().unwrap())
            }
            BallKind::Jackpot => {
                // Reaching `JackpotDrawingStart` at all (the stage check above)
                // is the real gate — the branch rule can route here on a full
                // lucky match even when `has_jackpot` was never set.
                if self.cross_pool_numbers().contains(&number) {
                    return Err(OrchestratorError::DuplicateBall { number });
                }
                self.ensure_jackpot_initialized(room_lucky_balls);
                let jackpot = self.jackpot.as_mut().unwrap();
                let drawn_count =
                    jackpot.drawn_balls.iter().filter(|b| b.kind == BallKind::Jackpot).count();
                if drawn_count >= pool_size as usize {
                    return Err(OrchestratorError::MaxBallsReached { max: pool_size as usize });
                }
                jackpot.drawn_balls.push(Ball::new(number, kind, last));
                self.touch();
                Ok(self.jackpot.as_ref().unwrap().drawn_balls.last().unwrap())
            }
            BallKind::Lucky => {
                self.ensure_jackpot_initialized(room_lucky_balls);
                let jackpot = self.jackpot.as_mut().unwrap();
                if jackpot.drawn_balls.iter().any(|b| b.kind == BallKind::Lucky && b.number == number) {
                    return Err(OrchestratorError::DuplicateBall { number });
                }
                let drawn_count =
                    jackpot.drawn_balls.iter().filter(|b| b.kind == BallKind::Lucky).count();
                if drawn_count >= LUCKY_BALL_COUNT {
                    return Err(OrchestratorError::MaxBallsReached { max: LUCKY_BALL_COUNT });
                }
                jackpot.drawn_balls.push(Ball::new(number, kind, last));
                self.touch();
                Ok(self.jackpot.as_ref().unwrap().drawn_balls.last().unwrap())
            }
        }
    }

    /// Whether the pool for `kind` has reached its terminal (auto-advance)
    /// condition after the most recent draw.
    pub fn pool_is_terminal(&self, kind: BallKind) -> bool {
        match kind {
            BallKind::Regular => self.regular_balls.last().map(|b| b.last).unwrap_or(false),
            BallKind::Extra => self.extra_balls.len() >= self.extra_ball_count as usize,
            BallKind::Jackpot => self
                .jackpot
                .as_ref()
                .and_then(|j| j.drawn_balls.iter().filter(|b| b.kind == BallKind::Jackpot).last())
                .map(|b| b.last)
                .unwrap_or(false),
            BallKind::Lucky => {
                let last_flagged = self
                    .jackpot
                    .as_ref()
                    .and_then(|j| j.drawn_balls.iter().filter(|b| b.kind == BallKind::Lucky).last())
                    .map(|b| b.last)
                    .unwrap_or(false);
                last_flagged || self.lucky_drawn_count() == LUCKY_BALL_COUNT
            }
        }
    }

    /// Replace the entire extra-ball array in one call (the batch-replace
    /// entry point alongside incremental `add_ball`). Re-validates the whole
    /// array: range, internal duplicates, duplicates against the regular
    /// pool, and length against `extra_ball_count`.
    pub fn replace_extra_balls(&mut self, numbers: &[u8], pool_size: u8) -> Result<()> {
        if self.stage != Stage::ExtraBallDrawingStart {
            return Err(OrchestratorError::InvalidStage { current: self.stage });
        }
        if numbers.len() > self.extra_ball_count as usize {
            return Err(OrchestratorError::MaxBallsReached { max: self.extra_ball_count as usize });
        }
        let mut seen = std::collections::HashSet::new();
        for &number in numbers {
            validate_ball_number(number, pool_size)?;
            if !seen.insert(number) {
                return Err(OrchestratorError::DuplicateBall { number });
            }
            if self.regular_balls.iter().any(|b| b.number == number) {
                return Err(OrchestratorError::DuplicateBall { number });
            }
        }

        let last_index = numbers.len().saturating_sub(1);
        self.extra_balls = numbers
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let last = numbers.len() == self.extra_ball_count as usize && i == last_index;
                Ball::new(n, BallKind::Extra, last)
            })
            .collect();
        self.touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_ball_rejects_wrong_stage() {
        let mut game = Game::new("SG01".into(), 2);
        let err = game.add_ball(10, BallKind::Regular, false, 75, &[]).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStage { .. }));
    }

    #[test]
    fn add_ball_rejects_duplicates_across_regular_and_extra() {
        let mut game = Game::new("SG01".into(), 2);
        game.stage = Stage::DrawingStart;
        game.add_ball(10, BallKind::Regular, false, 75, &[]).unwrap();
        assert!(matches!(
            game.add_ball(10, BallKind::Regular, false, 75, &[]),
            Err(OrchestratorError::DuplicateBall { number: 10 })
        ));

        game.stage = Stage::ExtraBallDrawingStart;
        assert!(matches!(
            game.add_ball(10, BallKind::Extra, false, 75, &[]),
            Err(OrchestratorError::DuplicateBall { number: 10 })
        ));
    }

    #[test]
    fn add_ball_flags_extra_pool_terminal_at_cap() {
        let mut game = Game::new("SG01".into(), 2);
        game.stage = Stage::ExtraBallDrawingStart;
        game.add_ball(60, BallKind::Extra, false, 75, &[]).unwrap();
        assert!(!game.pool_is_terminal(BallKind::Extra));
        game.add_ball(61, BallKind::Extra, true, 75, &[]).unwrap();
        assert!(game.pool_is_terminal(BallKind::Extra));
        assert!(matches!(
            game.add_ball(62, BallKind::Extra, false, 75, &[]),
            Err(OrchestratorError::MaxBallsReached { .. })
        ));
    }

    #[test]
    fn jackpot_ball_lazily_initializes_sub_game() {
        let mut game = Game::new("SG01".into(), 2);
        game.stage = Stage::JackpotDrawingStart;
        assert!(game.jackpot.is_none());
        game.add_ball(5, BallKind::Jackpot, false, 75, &[3, 7, 14, 21, 28, 35, 42]).unwrap();
        let jackpot = game.jackpot.as_ref().unwrap();
        assert_eq!(jackpot.lucky_balls, vec![3, 7, 14, 21, 28, 35, 42]);
        assert_eq!(jackpot.drawn_balls.len(), 1);
    }

    #[test]
    fn lucky_pool_terminal_on_last_flag_or_seven_draws() {
        let mut game = Game::new("SG01".into(), 2);
        game.stage = Stage::DrawingLuckyBallsStart;
        for n in [3u8, 7, 14, 21, 28, 35] {
            game.add_ball(n, BallKind::Lucky, false, 75, &[]).unwrap();
            assert!(!game.pool_is_terminal(BallKind::Lucky));
        }
        game.add_ball(42, BallKind::Lucky, true, 75, &[]).unwrap();
        assert!(game.pool_is_terminal(BallKind::Lucky));
    }

    #[test]
    fn replace_extra_balls_validates_whole_array() {
        let mut game = Game::new("SG01".into(), 2);
        game.stage = Stage::ExtraBallDrawingStart;
        game.replace_extra_balls(&[60, 61], 75).unwrap();
        assert_eq!(game.extra_balls.len(), 2);
        assert!(game.extra_balls.last().unwrap().last);

        let mut too_many = Game::new("SG01".into(), 2);
        too_many.stage = Stage::ExtraBallDrawingStart;
        assert!(too_many.replace_extra_balls(&[1, 2, 3], 75).is_err());
    }
}
