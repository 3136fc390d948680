//! Persistence layer.
//!
//! The `Ledger` trait is the system of record for teams, bets and the
//! match schedule. The SQLite implementation backs the running bot;
//! tests use an in-memory instance of the same implementation.

pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::{Bet, MatchStatus, PunterError, ScheduledMatch, Team};

#[async_trait]
pub trait Ledger: Send + Sync {
    // -- Teams -------------------------------------------------------------

    async fn load_teams(&self) -> Result<Vec<Team>, PunterError>;

    async fn get_team(&self, team_id: &str) -> Result<Team, PunterError>;

    /// Persist a team, guarded by its optimistic-lock version. The
    /// stored row must still carry `team.version`; on success the row's
    /// version is bumped by one. A stale version fails with
    /// `VersionConflict` and writes nothing.
    async fn save_team(&self, team: &Team) -> Result<(), PunterError>;

    async fn insert_team(&self, team: &Team) -> Result<(), PunterError>;

    async fn delete_team(&self, team_id: &str) -> Result<(), PunterError>;

    // -- Schedule ----------------------------------------------------------

    /// Matches scheduled for the given date.
    async fn scheduled_matches(&self, date: NaiveDate)
        -> Result<Vec<ScheduledMatch>, PunterError>;

    async fn upsert_match(&self, m: &ScheduledMatch) -> Result<(), PunterError>;

    async fn update_match_status(
        &self,
        team_name: &str,
        date: NaiveDate,
        status: MatchStatus,
    ) -> Result<(), PunterError>;

    // -- Bets --------------------------------------------------------------

    async fn insert_bet(&self, bet: &Bet) -> Result<(), PunterError>;

    async fn get_bet(&self, bet_id: &str) -> Result<Bet, PunterError>;

    /// All bets in a non-terminal status, oldest first.
    async fn pending_bets(&self) -> Result<Vec<Bet>, PunterError>;

    /// Bets already recorded for a team on a given date, any status.
    /// Used to keep the daily cycle idempotent.
    async fn bets_for_team_on(
        &self,
        team_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Bet>, PunterError>;

    /// Recent bets, newest first, capped at `limit`.
    async fn recent_bets(&self, limit: u32) -> Result<Vec<Bet>, PunterError>;

    /// Persist a bet's mutable lifecycle fields (status, order_ref,
    /// result, timestamps).
    async fn update_bet(&self, bet: &Bet) -> Result<(), PunterError>;

    /// Atomically move a bet into a terminal status. Writes nothing
    /// and returns `false` when the stored row is already terminal,
    /// so of two racing settlements exactly one claims the bet.
    async fn settle_bet(&self, bet: &Bet) -> Result<bool, PunterError>;
}
