//! Typed error taxonomy for the orchestrator.
//!
//! Every fallible boundary inside the library returns [`OrchestratorError`]; the CLI
//! layer wraps these in `anyhow::Result` at the process boundary.

use thiserror::Error;

use crate::stage::Stage;

/// All error kinds a dealer action, timer callback, or repository call can surface.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("stage {current:?} does not allow this action")]
    InvalidStage { current: Stage },

    #[error("no current game for room {room}")]
    GameNotFound { room: String },

    #[error("room {room} already has a game in progress")]
    GameInProgress { room: String },

    #[error("game {game_id} is already cancelled")]
    GameAlreadyCancelled { game_id: String },

    #[error("stage {current:?} cannot be cancelled")]
    CannotCancelGame { current: Stage },

    #[error("ball number {number} is outside the legal range [1,{max}]")]
    InvalidBall { number: u8, max: u8 },

    #[error("ball number {number} was already drawn in this game")]
    DuplicateBall { number: u8 },

    #[error("maximum balls for this pool already reached ({max})")]
    MaxBallsReached { max: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("cache store unavailable: {0}")]
    CacheUnavailable(String),

    #[error("durable store write failed: {0}")]
    PersistenceFailed(String),

    #[error("stored data could not be deserialized: {0}")]
    DataCorrupted(String),

    #[error("cryptographic RNG failed to produce a value")]
    RngFailure,

    #[error("room {room} is not in the supported-room set")]
    RoomNotSupported { room: String },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
