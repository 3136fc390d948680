//! Job scheduling.
//!
//! Two independent triggers share one process: the placement cycle
//! fires once a day at a configured local time, reconciliation fires
//! on a fixed interval. The dashboard's manual triggers go through the
//! same `Scheduler` handle, so a manual cycle and the scheduled one
//! are single-flight: whichever starts second is refused while the
//! first is still running.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::engine::cycle::CycleOrchestrator;
use crate::engine::reconcile::ReconciliationJob;
use crate::types::{CycleOutcome, ReconcileOutcome};

/// When the next daily run fires, given the configured local wall time
/// and its offset from UTC.
pub fn next_daily_run(
    now: DateTime<Utc>,
    hour: u32,
    minute: u32,
    utc_offset_minutes: i32,
) -> DateTime<Utc> {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    let local_now = now.with_timezone(&offset);
    let target_time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default();

    let mut target = local_now.date_naive().and_time(target_time);
    if target <= local_now.naive_local() {
        target += ChronoDuration::days(1);
    }
    match target.and_local_timezone(offset) {
        chrono::LocalResult::Single(t) => t.with_timezone(&Utc),
        // Fixed offsets have no DST gaps, but don't panic on the
        // impossible either.
        _ => now + ChronoDuration::days(1),
    }
}

pub struct Scheduler {
    cycle: Arc<CycleOrchestrator>,
    reconcile: Arc<ReconciliationJob>,
    cycle_gate: Mutex<()>,
    reconcile_gate: Mutex<()>,
    cycle_hour: u32,
    cycle_minute: u32,
    utc_offset_minutes: i32,
    reconcile_interval: Duration,
    last_cycle: RwLock<Option<CycleOutcome>>,
    last_reconcile: RwLock<Option<ReconcileOutcome>>,
}

impl Scheduler {
    pub fn new(
        cycle: Arc<CycleOrchestrator>,
        reconcile: Arc<ReconciliationJob>,
        cycle_hour: u32,
        cycle_minute: u32,
        utc_offset_minutes: i32,
        reconcile_interval: Duration,
    ) -> Self {
        Self {
            cycle,
            reconcile,
            cycle_gate: Mutex::new(()),
            reconcile_gate: Mutex::new(()),
            cycle_hour,
            cycle_minute,
            utc_offset_minutes,
            reconcile_interval,
            last_cycle: RwLock::new(None),
            last_reconcile: RwLock::new(None),
        }
    }

    /// Outcome of the most recent placement cycle, scheduled or manual.
    pub async fn last_cycle(&self) -> Option<CycleOutcome> {
        self.last_cycle.read().await.clone()
    }

    /// Outcome of the most recent reconciliation pass.
    pub async fn last_reconcile(&self) -> Option<ReconcileOutcome> {
        self.last_reconcile.read().await.clone()
    }

    /// Run the placement cycle unless one is already in flight.
    /// Returns None when refused.
    pub async fn try_run_cycle(&self) -> Option<CycleOutcome> {
        let Ok(_guard) = self.cycle_gate.try_lock() else {
            warn!("Placement cycle already running, trigger ignored");
            return None;
        };
        let outcome = self.cycle.run_cycle().await;
        *self.last_cycle.write().await = Some(outcome.clone());
        Some(outcome)
    }

    /// Run reconciliation unless one is already in flight.
    pub async fn try_run_reconcile(&self) -> Option<ReconcileOutcome> {
        let Ok(_guard) = self.reconcile_gate.try_lock() else {
            warn!("Reconciliation already running, trigger ignored");
            return None;
        };
        let outcome = self.reconcile.run().await;
        *self.last_reconcile.write().await = Some(outcome.clone());
        Some(outcome)
    }

    /// Drive both triggers forever. Caller races this against its
    /// shutdown signal.
    pub async fn run(&self) {
        let mut reconcile_tick = tokio::time::interval(self.reconcile_interval);
        // First tick fires immediately; catch up on settlements from
        // the last shutdown before waiting a full interval.
        reconcile_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let next_cycle =
                next_daily_run(Utc::now(), self.cycle_hour, self.cycle_minute, self.utc_offset_minutes);
            let until_cycle = (next_cycle - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            info!(
                next_cycle = %next_cycle,
                in_secs = until_cycle.as_secs(),
                "Next placement cycle scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(until_cycle) => {
                    self.try_run_cycle().await;
                }
                _ = reconcile_tick.tick() => {
                    self.try_run_reconcile().await;
                }
            }
        }
    }
}
