//! Side picker (C3): cryptographically uniform left/right choice for
//! extra-ball side-select betting.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::errors::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// Pick left or right uniformly using a cryptographically strong RNG.
pub fn pick_side() -> Result<Side> {
    let mut rng = OsRng;
    let mut buf = [0u8; 1];
    rng.try_fill_bytes(&mut buf).map_err(|_| OrchestratorError::RngFailure)?;
    Ok(if buf[0] & 1 == 0 { Side::Left } else { Side::Right })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_a_side_without_failing() {
        for _ in 0..50 {
            assert!(pick_side().is_ok());
        }
    }
}
