//! Loss-recovery stake progression.
//!
//! Pure functions over a team's progression state: stake sizing, stop-loss
//! verdicts, and the win/loss transitions that feed new progression values
//! back to the store. No I/O lives here.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::types::PunterError;

/// Currency precision of the ledger.
const CURRENCY_DP: u32 = 2;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Staking configuration.
#[derive(Debug, Clone)]
pub struct StakingConfig {
    /// Stake used while a team carries no loss to recover.
    pub initial_stake: Decimal,
    /// Fixed profit targeted by each recovery stake, on top of the
    /// cumulative loss being chased.
    pub target_profit: Decimal,
    /// Progression ceiling. Reaching it is a hard stop for the team.
    pub max_progression_steps: u32,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            initial_stake: dec!(100),
            target_profit: dec!(100),
            max_progression_steps: 7,
        }
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

/// Outcome of sizing a stake for one team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeDecision {
    pub stake: Decimal,
    pub stop_loss_reached: bool,
}

/// Result of applying a settled outcome to a team's progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressionUpdate {
    /// Signed profit (win) or loss (negative of the stake).
    pub result: Decimal,
    pub cumulative_loss: Decimal,
    pub progression_step: u32,
}

#[derive(Default)]
pub struct StakingCalculator {
    config: StakingConfig,
}

impl StakingCalculator {
    pub fn new(config: StakingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StakingConfig {
        &self.config
    }

    /// Size the next stake for a team.
    ///
    /// At or past the progression ceiling the verdict is a stop-loss:
    /// zero stake, no placement, regardless of odds or loss size. Below
    /// the ceiling the stake recovers the cumulative loss plus the
    /// configured target profit at the offered odds:
    ///
    ///   stake = (cumulative_loss + target_profit) / (odds − 1)
    ///
    /// with the configured initial stake while no loss is carried.
    /// Odds at or below 1.0 cannot price a back bet and are rejected
    /// before any placement.
    pub fn calculate_stake(
        &self,
        cumulative_loss: Decimal,
        odds: Decimal,
        progression_step: u32,
    ) -> Result<StakeDecision, PunterError> {
        if progression_step >= self.config.max_progression_steps {
            debug!(
                progression_step,
                max = self.config.max_progression_steps,
                "Stop-loss ceiling reached"
            );
            return Ok(StakeDecision {
                stake: Decimal::ZERO,
                stop_loss_reached: true,
            });
        }

        if odds <= Decimal::ONE {
            return Err(PunterError::InvalidOdds(odds));
        }

        let stake = if cumulative_loss > Decimal::ZERO {
            (cumulative_loss + self.config.target_profit) / (odds - Decimal::ONE)
        } else {
            self.config.initial_stake
        };

        Ok(StakeDecision {
            stake: stake.round_dp(CURRENCY_DP),
            stop_loss_reached: false,
        })
    }

    /// Profit a bet returns if it wins: stake × (odds − 1).
    pub fn calculate_potential_profit(stake: Decimal, odds: Decimal) -> Decimal {
        (stake * (odds - Decimal::ONE)).round_dp(CURRENCY_DP)
    }

    /// Apply a win. A win always fully resets the progression,
    /// whatever the prior step.
    pub fn process_win(stake: Decimal, odds: Decimal) -> ProgressionUpdate {
        ProgressionUpdate {
            result: Self::calculate_potential_profit(stake, odds),
            cumulative_loss: Decimal::ZERO,
            progression_step: 0,
        }
    }

    /// Apply a loss: the stake is added to the cumulative loss and the
    /// progression advances one step.
    pub fn process_loss(
        stake: Decimal,
        cumulative_loss: Decimal,
        progression_step: u32,
    ) -> ProgressionUpdate {
        ProgressionUpdate {
            result: -stake,
            cumulative_loss: (cumulative_loss + stake).round_dp(CURRENCY_DP),
            progression_step: progression_step + 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
