//! Ball value type and pool-draw rules (C1).

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::errors::{OrchestratorError, Result};

/// Default number of balls in the regular/extra/jackpot pool.
pub const DEFAULT_BALL_POOL_SIZE: u8 = 75;
/// Exact length of the lucky-ball vector.
pub const LUCKY_BALL_COUNT: usize = 7;

/// Which pool a ball belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallKind {
    Regular,
    Extra,
    Jackpot,
    Lucky,
}

/// A single drawn ball. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ball {
    pub number: u8,
    pub kind: BallKind,
    /// True for the final ball of its kind in the current game.
    pub last: bool,
    pub drawn_at: DateTime<Utc>,
}

impl Ball {
    pub fn new(number: u8, kind: BallKind, last: bool) -> Self {
        Ball { number, kind, last, drawn_at: Utc::now() }
    }
}

/// Reject a ball number outside `[1, pool_size]`.
pub fn validate_ball_number(number: u8, pool_size: u8) -> Result<()> {
    if number < 1 || number > pool_size {
        return Err(OrchestratorError::InvalidBall { number, max: pool_size });
    }
    Ok(())
}

/// Whether `number` already appears in `pool`.
pub fn is_duplicate(pool: &[Ball], number: u8) -> bool {
    pool.iter().any(|b| b.number == number)
}

/// Draw `count` distinct numbers in `[1, pool_size]` from a cryptographically
/// strong RNG. Fails with `RngFailure` rather than falling back to a weak source.
fn draw_distinct(count: usize, pool_size: u8) -> Result<Vec<u8>> {
    if count > pool_size as usize {
        return Err(OrchestratorError::InvalidParameter(format!(
            "cannot draw {count} distinct numbers from a pool of {pool_size}"
        )));
    }
    let mut rng = OsRng;
    let mut drawn: Vec<u8> = Vec::with_capacity(count);
    // Rejection sampling keeps the distribution uniform over the legal pool
    // without the modulo bias a naive `% pool_size` would introduce.
    while drawn.len() < count {
        let candidate = (rng.next_u32() % pool_size as u32) as u8 + 1;
        if !drawn.contains(&candidate) {
            drawn.push(candidate);
        }
    }
    Ok(drawn)
}

/// Generate the per-room lucky-ball vector: 7 distinct numbers in `[1, pool_size]`,
/// the last entry flagged as last.
pub fn generate_lucky_balls(pool_size: u8) -> Result<Vec<Ball>> {
    let numbers = draw_distinct(LUCKY_BALL_COUNT, pool_size)?;
    let last_index = numbers.len() - 1;
    Ok(numbers
        .into_iter()
        .enumerate()
        .map(|(i, n)| Ball::new(n, BallKind::Lucky, i == last_index))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_numbers() {
        assert!(validate_ball_number(0, 75).is_err());
        assert!(validate_ball_number(76, 75).is_err());
        assert!(validate_ball_number(1, 75).is_ok());
        assert!(validate_ball_number(75, 75).is_ok());
    }

    #[test]
    fn detects_duplicates() {
        let pool = vec![Ball::new(10, BallKind::Regular, false)];
        assert!(is_duplicate(&pool, 10));
        assert!(!is_duplicate(&pool, 11));
    }

    #[test]
    fn lucky_balls_are_distinct_and_flag_the_last() {
        let balls = generate_lucky_balls(75).unwrap();
        assert_eq!(balls.len(), LUCKY_BALL_COUNT);
        let numbers: std::collections::HashSet<u8> = balls.iter().map(|b| b.number).collect();
        assert_eq!(numbers.len(), LUCKY_BALL_COUNT);
        assert!(balls.iter().all(|b| (1..=75).contains(&b.number)));
        assert!(balls.last().unwrap().last);
        assert!(balls[..LUCKY_BALL_COUNT - 1].iter().all(|b| !b.last));
    }
}
