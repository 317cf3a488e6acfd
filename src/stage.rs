//! Stage catalog: the per-game state machine (C2).
//!
//! Stages are a tagged enum with a static configuration table keyed by the tag.
//! Stage-specific behavior stays out of the manager and lives here plus in the
//! discrete side-effect handlers the manager invokes.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::Game;

/// A state in the per-game stage machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preparation,
    NewRound,
    CardPurchaseOpen,
    CardPurchaseClose,
    DrawingStart,
    DrawingClose,
    ExtraBallPrepare,
    ExtraBallSideSelectBettingStart,
    ExtraBallSideSelectBettingClosed,
    ExtraBallDrawingStart,
    ExtraBallDrawingClose,
    PayoutSettlement,
    JackpotPreparation,
    JackpotDrawingStart,
    JackpotDrawingClosed,
    JackpotSettlement,
    LuckyPreparation,
    DrawingLuckyBallsStart,
    DrawingLuckyBallsClosed,
    GameOver,
}

/// The kind of ball pool a stage may legally accept draws for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    Regular,
    Extra,
    Jackpot,
    Lucky,
}

/// Per-stage configuration: timeout, preconditions, draw legality, cancellability.
#[derive(Debug, Clone, Copy)]
pub struct StageConfig {
    pub stage: Stage,
    /// `None` means infinite — no timer is armed, manual advance only.
    pub timeout: Option<Duration>,
    pub require_dealer: bool,
    pub require_game_signal: bool,
    pub draw: Option<DrawKind>,
    pub max_balls_in_stage: usize,
    pub cancellable: bool,
}

const MINUTE: u64 = 60;

/// The full stage configuration table, in catalog order.
pub const STAGE_TABLE: &[StageConfig] = &[
    StageConfig { stage: Stage::Preparation, timeout: None, require_dealer: true, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: false },
    StageConfig { stage: Stage::NewRound, timeout: Some(Duration::from_secs(10)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::CardPurchaseOpen, timeout: Some(Duration::from_secs(10 * MINUTE)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::CardPurchaseClose, timeout: Some(Duration::from_secs(10)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::DrawingStart, timeout: None, require_dealer: true, require_game_signal: false, draw: Some(DrawKind::Regular), max_balls_in_stage: 75, cancellable: true },
    StageConfig { stage: Stage::DrawingClose, timeout: Some(Duration::from_secs(10)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::ExtraBallPrepare, timeout: Some(Duration::from_secs(10)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::ExtraBallSideSelectBettingStart, timeout: Some(Duration::from_secs(2 * MINUTE)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::ExtraBallSideSelectBettingClosed, timeout: Some(Duration::from_secs(10)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::ExtraBallDrawingStart, timeout: Some(Duration::from_secs(2 * MINUTE)), require_dealer: true, require_game_signal: false, draw: Some(DrawKind::Extra), max_balls_in_stage: 3, cancellable: true },
    StageConfig { stage: Stage::ExtraBallDrawingClose, timeout: Some(Duration::from_secs(10)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::PayoutSettlement, timeout: Some(Duration::from_secs(30)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::JackpotPreparation, timeout: None, require_dealer: true, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::JackpotDrawingStart, timeout: None, require_dealer: true, require_game_signal: true, draw: Some(DrawKind::Jackpot), max_balls_in_stage: 75, cancellable: true },
    StageConfig { stage: Stage::JackpotDrawingClosed, timeout: Some(Duration::from_secs(10)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::JackpotSettlement, timeout: Some(Duration::from_secs(30)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::LuckyPreparation, timeout: None, require_dealer: true, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: true },
    StageConfig { stage: Stage::DrawingLuckyBallsStart, timeout: Some(Duration::from_secs(3 * MINUTE)), require_dealer: true, require_game_signal: false, draw: Some(DrawKind::Lucky), max_balls_in_stage: 7, cancellable: true },
    StageConfig { stage: Stage::DrawingLuckyBallsClosed, timeout: Some(Duration::from_secs(10)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: false },
    StageConfig { stage: Stage::GameOver, timeout: Some(Duration::from_secs(3600)), require_dealer: false, require_game_signal: false, draw: None, max_balls_in_stage: 0, cancellable: false },
];

impl Stage {
    /// Parse a config-file stage key (`snake_case`, matching the serde
    /// representation) into a `Stage`. Used to resolve per-stage duration
    /// overrides from the on-disk configuration.
    pub fn from_config_key(key: &str) -> Option<Stage> {
        use Stage::*;
        Some(match key {
            "preparation" => Preparation,
            "new_round" => NewRound,
            "card_purchase_open" => CardPurchaseOpen,
            "card_purchase_close" => CardPurchaseClose,
            "drawing_start" => DrawingStart,
            "drawing_close" => DrawingClose,
            "extra_ball_prepare" => ExtraBallPrepare,
            "extra_ball_side_select_betting_start" => ExtraBallSideSelectBettingStart,
            "extra_ball_side_select_betting_closed" => ExtraBallSideSelectBettingClosed,
            "extra_ball_drawing_start" => ExtraBallDrawingStart,
            "extra_ball_drawing_close" => ExtraBallDrawingClose,
            "payout_settlement" => PayoutSettlement,
            "jackpot_preparation" => JackpotPreparation,
            "jackpot_drawing_start" => JackpotDrawingStart,
            "jackpot_drawing_closed" => JackpotDrawingClosed,
            "jackpot_settlement" => JackpotSettlement,
            "lucky_preparation" => LuckyPreparation,
            "drawing_lucky_balls_start" => DrawingLuckyBallsStart,
            "drawing_lucky_balls_closed" => DrawingLuckyBallsClosed,
            "game_over" => GameOver,
            _ => return None,
        })
    }

    pub fn config(self) -> &'static StageConfig {
        STAGE_TABLE
            .iter()
            .find(|c| c.stage == self)
            .expect("every Stage variant has a STAGE_TABLE entry")
    }

    pub fn timeout(self) -> Option<Duration> {
        self.config().timeout
    }

    pub fn is_cancellable(self) -> bool {
        self.config().cancellable
    }

    /// The stage immediately following this one on the main line, ignoring the
    /// payout-settlement branch and the game-over finalization special case —
    /// callers that need branch-aware succession should use [`next_stage`].
    pub fn natural_successor(self) -> Stage {
        use Stage::*;
        match self {
            Preparation => NewRound,
            NewRound => CardPurchaseOpen,
            CardPurchaseOpen => CardPurchaseClose,
            CardPurchaseClose => DrawingStart,
            DrawingStart => DrawingClose,
            DrawingClose => ExtraBallPrepare,
            ExtraBallPrepare => ExtraBallSideSelectBettingStart,
            ExtraBallSideSelectBettingStart => ExtraBallSideSelectBettingClosed,
            ExtraBallSideSelectBettingClosed => ExtraBallDrawingStart,
            ExtraBallDrawingStart => ExtraBallDrawingClose,
            ExtraBallDrawingClose => PayoutSettlement,
            // PayoutSettlement is branch-resolved; natural_successor is not authoritative there.
            PayoutSettlement => JackpotPreparation,
            JackpotPreparation => JackpotDrawingStart,
            JackpotDrawingStart => JackpotDrawingClosed,
            JackpotDrawingClosed => JackpotSettlement,
            JackpotSettlement => LuckyPreparation,
            LuckyPreparation => DrawingLuckyBallsStart,
            DrawingLuckyBallsStart => DrawingLuckyBallsClosed,
            DrawingLuckyBallsClosed => GameOver,
            GameOver => Preparation,
        }
    }
}

/// Outcome of the payout-settlement branch decision, including the detail the
/// manager logs (matched/unmatched lucky numbers).
#[derive(Debug, Clone)]
pub struct BranchDecision {
    pub next_stage: Stage,
    pub matched: Vec<u8>,
    pub unmatched: Vec<u8>,
}

/// Decide the successor of `PayoutSettlement` for `game`, given the room's
/// current lucky-ball vector (`None` if the lucky-ball fetch failed).
///
/// has-jackpot OR a full lucky-number match routes to the jackpot branch;
/// otherwise the lucky-ball branch is taken directly, skipping jackpot.
pub fn payout_settlement_branch(game: &Game, lucky_numbers: Option<&[u8]>) -> BranchDecision {
    let lucky_numbers = match lucky_numbers {
        Some(numbers) => numbers,
        None => {
            let next_stage = if game.has_jackpot {
                Stage::JackpotPreparation
            } else {
                Stage::LuckyPreparation
            };
            return BranchDecision { next_stage, matched: Vec::new(), unmatched: Vec::new() };
        }
    };

    let drawn: HashSet<u8> = game
        .regular_balls
        .iter()
        .chain(game.extra_balls.iter())
        .map(|b| b.number)
        .collect();

    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for &number in lucky_numbers {
        if drawn.contains(&number) {
            matched.push(number);
        } else {
            unmatched.push(number);
        }
    }

    let full_match = unmatched.is_empty() && !lucky_numbers.is_empty();
    let next_stage = if game.has_jackpot || full_match {
        Stage::JackpotPreparation
    } else {
        Stage::LuckyPreparation
    };

    BranchDecision { next_stage, matched, unmatched }
}

/// Resolve the true successor of `stage` for `game`, applying the payout-settlement
/// branch rule. `GameOver`'s successor (`Preparation`) is returned as-is; the manager
/// is responsible for performing finalization on that edge, not this function.
pub fn next_stage(stage: Stage, game: &Game, lucky_numbers: Option<&[u8]>) -> Stage {
    if stage == Stage::PayoutSettlement {
        payout_settlement_branch(game, lucky_numbers).next_stage
    } else {
        stage.natural_successor()
    }
}
