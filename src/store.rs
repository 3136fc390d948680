//! Team progression store.
//!
//! Serialises read-modify-write access to team rows. Every mutation of
//! a team's progression goes through `with_team`, which holds that
//! team's lease for the duration of the update. The placement and
//! reconciliation jobs can therefore overlap freely; they only contend
//! when they touch the same team, and then one of them waits.
//!
//! The ledger's version column is a second line of defence: if an
//! out-of-process writer races us anyway, the save fails with
//! `VersionConflict` and the update is re-run against the fresh row.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::ledger::Ledger;
use crate::types::{PunterError, Team};

/// Attempts for one `with_team` update before giving up.
const MAX_SAVE_ATTEMPTS: u32 = 3;

pub struct TeamProgressionStore {
    ledger: Arc<dyn Ledger>,
    leases: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TeamProgressionStore {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    async fn lease(&self, team_id: &str) -> Arc<Mutex<()>> {
        let mut leases = self.leases.lock().await;
        leases
            .entry(team_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn get(&self, team_id: &str) -> Result<Team, PunterError> {
        self.ledger.get_team(team_id).await
    }

    pub async fn list(&self) -> Result<Vec<Team>, PunterError> {
        self.ledger.load_teams().await
    }

    /// Run a read-modify-write update against one team under its
    /// lease. The closure is re-applied to a freshly loaded row on a
    /// version conflict, so it must be a pure function of the team it
    /// is given.
    pub async fn with_team<F>(&self, team_id: &str, mut apply: F) -> Result<Team, PunterError>
    where
        F: FnMut(&mut Team) -> Result<(), PunterError>,
    {
        let lease = self.lease(team_id).await;
        let _guard = lease.lock().await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut team = self.ledger.get_team(team_id).await?;
            apply(&mut team)?;

            match self.ledger.save_team(&team).await {
                Ok(()) => {
                    // Reflect the bump the ledger applied.
                    team.version += 1;
                    return Ok(team);
                }
                Err(PunterError::VersionConflict(_)) if attempt < MAX_SAVE_ATTEMPTS => {
                    warn!(team_id, attempt, "Version conflict, retrying team update");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Operator reset: wipe a team's loss and progression back to a
    /// fresh state, with `last_stake` restored to the configured
    /// initial stake. Win/loss history is kept.
    pub async fn reset_progression(
        &self,
        team_id: &str,
        initial_stake: Decimal,
    ) -> Result<Team, PunterError> {
        let team = self
            .with_team(team_id, |t| {
                t.cumulative_loss = Decimal::ZERO;
                t.progression_step = 0;
                t.last_stake = initial_stake;
                Ok(())
            })
            .await?;
        info!(team = %team.name, "Progression reset");
        Ok(team)
    }
}
