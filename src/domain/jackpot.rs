//! Jackpot sub-game value type (C1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ball::Ball;

/// Optional branch attached to a game once has-jackpot is true and a jackpot
/// or lucky ball has been drawn. Owned by the game — no back-reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JackpotSubGame {
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// Unset until the jackpot branch reaches a terminal stage.
    pub ended_at: Option<DateTime<Utc>>,
    /// The room's lucky-ball vector, attached at initialization time. Exactly
    /// 7 numbers once the vector is current.
    pub lucky_balls: Vec<u8>,
    pub drawn_balls: Vec<Ball>,
}

impl JackpotSubGame {
    /// Lazily initialize a jackpot sub-game, attaching the room's current
    /// lucky-ball vector.
    pub fn new(room_id: &str, lucky_balls: Vec<u8>) -> Self {
        JackpotSubGame {
            id: format!("jackpot_{room_id}_{}", Uuid::new_v4()),
            started_at: Utc::now(),
            ended_at: None,
            lucky_balls,
            drawn_balls: Vec::new(),
        }
    }
}
