//! Settlement reconciliation.
//!
//! Matches locally tracked unsettled bets against the exchange's
//! cleared-order feed. A bet whose order reference shows up settled is
//! driven to WON or LOST and its outcome is folded into the owning
//! team's progression. Bets with no settlement record yet stay pending
//! and are retried on the next interval.
//!
//! `process_bet_result` is the single settlement path: the periodic
//! job and the operator's manual settle both go through it, so team
//! progression can never diverge between the two.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::engine::lifecycle;
use crate::exchange::{MarketDataProvider, SettlementRecord};
use crate::ledger::Ledger;
use crate::notify::NotificationSink;
use crate::staking::StakingCalculator;
use crate::store::TeamProgressionStore;
use crate::types::{Bet, BetStatus, MatchStatus, PunterError, ReconcileOutcome, Team};

/// Settle one bet and update its team's progression.
///
/// The bet row is claimed first with a compare-and-swap that only
/// matches a non-terminal status, so of two racing settlements (a
/// reconciliation pass and a manual settle, say) exactly one folds
/// into the team. The team's loss history is then re-read under its
/// lease, so a snapshot taken at placement can never be applied stale.
/// `reported_profit` is the exchange's own profit figure for a win;
/// absent, the bet's recorded odds price the win.
pub async fn process_bet_result(
    store: &TeamProgressionStore,
    notifier: &dyn NotificationSink,
    bet: &mut Bet,
    won: bool,
    reported_profit: Option<Decimal>,
) -> Result<Team, PunterError> {
    let to = if won { BetStatus::Won } else { BetStatus::Lost };
    lifecycle::advance(bet, to)?;

    let stake = bet.stake;
    let odds = bet.odds;
    let result = if won {
        reported_profit
            .unwrap_or_else(|| StakingCalculator::calculate_potential_profit(stake, odds))
    } else {
        -stake
    };
    bet.result = Some(result);

    if !store.ledger().settle_bet(bet).await? {
        // Lost the claim: the stored row is already terminal (or gone).
        let current = store.ledger().get_bet(&bet.id).await?;
        return Err(PunterError::IllegalTransition {
            from: current.status,
            to,
        });
    }

    let team = store
        .with_team(&bet.team_id, |t| {
            let update = if won {
                StakingCalculator::process_win(stake, odds)
            } else {
                StakingCalculator::process_loss(stake, t.cumulative_loss, t.progression_step)
            };
            t.cumulative_loss = update.cumulative_loss;
            t.progression_step = update.progression_step;
            t.last_stake = stake;
            if won {
                t.matches_won += 1;
            } else {
                t.matches_lost += 1;
            }
            t.total_profit += result;
            Ok(())
        })
        .await?;

    let match_status = if won { MatchStatus::Won } else { MatchStatus::Lost };
    store
        .ledger()
        .update_match_status(&bet.team_name, bet.created_at.date_naive(), match_status)
        .await?;

    notifier.bet_settled(bet, &team).await;
    Ok(team)
}

pub struct ReconciliationJob {
    exchange: Arc<dyn MarketDataProvider>,
    store: Arc<TeamProgressionStore>,
    notifier: Arc<dyn NotificationSink>,
    lookback_days: u32,
}

impl ReconciliationJob {
    pub fn new(
        exchange: Arc<dyn MarketDataProvider>,
        store: Arc<TeamProgressionStore>,
        notifier: Arc<dyn NotificationSink>,
        lookback_days: u32,
    ) -> Self {
        Self {
            exchange,
            store,
            notifier,
            lookback_days,
        }
    }

    /// Run one reconciliation pass over all unsettled bets.
    pub async fn run(&self) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::started();
        info!("Reconciliation starting");

        let pending = match self.store.ledger().pending_bets().await {
            Ok(bets) => bets,
            Err(e) => {
                let outcome = ReconcileOutcome::failed(format!("Could not load bets: {e}"));
                self.notifier.reconcile_finished(&outcome).await;
                return outcome;
            }
        };
        outcome.pending_checked = pending.len();

        if pending.is_empty() {
            outcome.message = "No pending bets".into();
            self.notifier.reconcile_finished(&outcome).await;
            return outcome;
        }

        let settled = match self.exchange.settled_orders(self.lookback_days).await {
            Ok(records) => records,
            Err(e) => {
                let mut failed =
                    ReconcileOutcome::failed(format!("Could not fetch settlements: {e}"));
                failed.pending_checked = outcome.pending_checked;
                self.notifier.reconcile_finished(&failed).await;
                return failed;
            }
        };

        let by_ref: HashMap<&str, &SettlementRecord> = settled
            .iter()
            .map(|r| (r.order_ref.as_str(), r))
            .collect();

        for mut bet in pending {
            let Some(record) = bet.order_ref.as_deref().and_then(|r| by_ref.get(r)) else {
                debug!(bet_id = %bet.id, "No settlement record yet");
                outcome.still_pending += 1;
                continue;
            };

            let won = record.is_win();
            let reported = won.then_some(record.profit);
            match process_bet_result(&self.store, self.notifier.as_ref(), &mut bet, won, reported)
                .await
            {
                Ok(_) => {
                    outcome.settled_found += 1;
                    if won {
                        outcome.won += 1;
                    } else {
                        outcome.lost += 1;
                    }
                }
                Err(e) => {
                    outcome.errors.push(format!("{}: {e}", bet.id));
                }
            }
        }

        outcome.message = format!(
            "Settled {} of {} pending bets",
            outcome.settled_found, outcome.pending_checked
        );
        self.notifier.reconcile_finished(&outcome).await;
        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
