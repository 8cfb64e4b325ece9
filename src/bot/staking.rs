//! Staking strategies
//!
//! Pure functions sizing the next stake from the last outcome. Every result
//! is clamped to ten times the initial stake.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Multiple of the initial stake no strategy may exceed
pub const STAKE_CAP_MULTIPLIER: u32 = 10;

/// Rule for sizing the next stake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StakingStrategy {
    /// Double on a loss, reset on a win
    #[default]
    #[serde(rename = "martingale")]
    Martingale,
    /// Add one unit on a loss, reset on a win
    #[serde(rename = "dalembert")]
    DAlembert,
    /// Add one unit on a win outside a losing streak, otherwise hold
    #[serde(rename = "oscars_grind")]
    OscarsGrind,
}

/// Next stake, with the uncapped value for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeDecision {
    pub stake: Decimal,
    /// What the strategy asked for before the cap
    pub requested: Decimal,
    pub capped: bool,
}

impl StakingStrategy {
    /// Compute the next stake
    ///
    /// # Arguments
    /// * `initial` - Initial stake of the run (one unit)
    /// * `current` - Stake of the trade that just settled
    /// * `last_was_win` - Outcome of that trade
    /// * `consecutive_losses` - Losing streak before that trade settled
    pub fn next_stake(
        &self,
        initial: Decimal,
        current: Decimal,
        last_was_win: bool,
        consecutive_losses: u32,
    ) -> StakeDecision {
        let requested = match (self, last_was_win) {
            (StakingStrategy::Martingale, true) => initial,
            (StakingStrategy::Martingale, false) => current * Decimal::TWO,
            (StakingStrategy::DAlembert, true) => initial,
            (StakingStrategy::DAlembert, false) => current + initial,
            (StakingStrategy::OscarsGrind, true) if consecutive_losses == 0 => current + initial,
            (StakingStrategy::OscarsGrind, _) => current,
        };

        let cap = initial * Decimal::from(STAKE_CAP_MULTIPLIER);
        StakeDecision {
            stake: requested.min(cap),
            requested,
            capped: requested > cap,
        }
    }
}

impl std::fmt::Display for StakingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StakingStrategy::Martingale => write!(f, "martingale"),
            StakingStrategy::DAlembert => write!(f, "dalembert"),
            StakingStrategy::OscarsGrind => write!(f, "oscars_grind"),
        }
    }
}
