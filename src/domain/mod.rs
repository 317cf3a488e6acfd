//! Ball & game entities (C1): value types, invariants, and pool-draw rules.

mod ball;
mod game;
mod jackpot;

pub use ball::{
    generate_lucky_balls, is_duplicate, validate_ball_number, Ball, BallKind,
    DEFAULT_BALL_POOL_SIZE, LUCKY_BALL_COUNT,
};
pub use game::{pick_extra_ball_count, Game, MAX_EXTRA_BALL_COUNT, MIN_EXTRA_BALL_COUNT};
pub use jackpot::JackpotSubGame;
