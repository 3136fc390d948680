//! Notification sinks.
//!
//! Jobs report noteworthy moments (placements, settlements, stop-loss
//! hits, job completions) through `NotificationSink`. The log sink
//! writes structured log lines; the broadcast sink fans events out on
//! a tokio broadcast channel for the dashboard's activity feed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::types::{Bet, CycleOutcome, ReconcileOutcome, Team};

/// One entry in the activity feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BetPlaced,
    BetSettled,
    StopLoss,
    CycleFinished,
    ReconcileFinished,
}

impl Notification {
    fn new(kind: NotificationKind, message: String) -> Self {
        Self {
            kind,
            message,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn bet_placed(&self, bet: &Bet);
    async fn bet_settled(&self, bet: &Bet, team: &Team);
    async fn stop_loss(&self, team: &Team);
    async fn cycle_finished(&self, outcome: &CycleOutcome);
    async fn reconcile_finished(&self, outcome: &ReconcileOutcome);
}

// ---------------------------------------------------------------------------
// Log sink
// ---------------------------------------------------------------------------

/// Sink that only writes structured log lines.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn bet_placed(&self, bet: &Bet) {
        info!(bet_id = %bet.id, team = %bet.team_name, stake = %bet.stake, odds = %bet.odds, "Bet placed");
    }

    async fn bet_settled(&self, bet: &Bet, team: &Team) {
        info!(
            bet_id = %bet.id,
            team = %team.name,
            status = %bet.status,
            result = %bet.result.unwrap_or_default(),
            cumulative_loss = %team.cumulative_loss,
            "Bet settled"
        );
    }

    async fn stop_loss(&self, team: &Team) {
        warn!(
            team = %team.name,
            step = team.progression_step,
            cumulative_loss = %team.cumulative_loss,
            "Stop-loss reached, team halted"
        );
    }

    async fn cycle_finished(&self, outcome: &CycleOutcome) {
        info!(%outcome, "Placement cycle finished");
    }

    async fn reconcile_finished(&self, outcome: &ReconcileOutcome) {
        info!(%outcome, "Reconciliation finished");
    }
}

// ---------------------------------------------------------------------------
// Broadcast sink
// ---------------------------------------------------------------------------

/// Sink that logs and also fans events out to subscribers. Slow or
/// absent subscribers never block a job; the channel drops the oldest
/// entries instead.
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    fn publish(&self, kind: NotificationKind, message: String) {
        // Send fails only when nobody is subscribed.
        let _ = self.tx.send(Notification::new(kind, message));
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn bet_placed(&self, bet: &Bet) {
        LogSink.bet_placed(bet).await;
        self.publish(
            NotificationKind::BetPlaced,
            format!("{} staked {} @ {} on {}", bet.team_name, bet.stake, bet.odds, bet.event_name),
        );
    }

    async fn bet_settled(&self, bet: &Bet, team: &Team) {
        LogSink.bet_settled(bet, team).await;
        self.publish(
            NotificationKind::BetSettled,
            format!("{} {}: {}", bet.team_name, bet.status, bet.result.unwrap_or_default()),
        );
    }

    async fn stop_loss(&self, team: &Team) {
        LogSink.stop_loss(team).await;
        self.publish(
            NotificationKind::StopLoss,
            format!(
                "{} hit stop-loss at step {} (loss {})",
                team.name, team.progression_step, team.cumulative_loss
            ),
        );
    }

    async fn cycle_finished(&self, outcome: &CycleOutcome) {
        LogSink.cycle_finished(outcome).await;
        self.publish(NotificationKind::CycleFinished, outcome.to_string());
    }

    async fn reconcile_finished(&self, outcome: &ReconcileOutcome) {
        LogSink.reconcile_finished(outcome).await;
        self.publish(NotificationKind::ReconcileFinished, outcome.to_string());
    }
}
