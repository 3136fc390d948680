//! Shared types for the PUNTER engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that exchange, ledger,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Team
// ---------------------------------------------------------------------------

/// A tracked team and its staking-progression state.
///
/// The progression fields (`cumulative_loss`, `progression_step`,
/// `last_stake`) are owned by the `TeamProgressionStore` and mutated only
/// through staking outcomes or an explicit operator reset. The aggregate
/// stats are derived from settled bets and are not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    /// Exchange sport identifier (Betfair event type, "1" = soccer).
    pub sport_id: String,
    pub league: String,
    pub country: String,
    /// Total stake lost since the last win/reset.
    pub cumulative_loss: Decimal,
    /// Consecutive losses since the last win/reset.
    pub progression_step: u32,
    pub last_stake: Decimal,
    pub status: TeamStatus,
    /// Optimistic-concurrency stamp, bumped by the ledger on every save.
    pub version: i64,
    pub matches_won: u32,
    pub matches_lost: u32,
    pub total_profit: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] loss={} step={} last_stake={} (W{}/L{})",
            self.name,
            self.status,
            self.cumulative_loss,
            self.progression_step,
            self.last_stake,
            self.matches_won,
            self.matches_lost,
        )
    }
}

impl Team {
    /// Create a fresh team with zeroed progression.
    pub fn new(name: &str, sport_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            sport_id: sport_id.to_string(),
            league: String::new(),
            country: String::new(),
            cumulative_loss: Decimal::ZERO,
            progression_step: 0,
            last_stake: Decimal::ZERO,
            status: TeamStatus::Active,
            version: 0,
            matches_won: 0,
            matches_lost: 0,
            total_profit: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TeamStatus::Active
    }

    /// Number of settled matches for this team.
    pub fn matches_settled(&self) -> u32 {
        self.matches_won + self.matches_lost
    }

    /// Win rate as a percentage. Returns 0.0 if no settled matches.
    pub fn win_rate(&self) -> f64 {
        let settled = self.matches_settled();
        if settled == 0 {
            0.0
        } else {
            (self.matches_won as f64 / settled as f64) * 100.0
        }
    }
}

/// Whether a team participates in the daily placement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamStatus {
    Active,
    Paused,
}

impl fmt::Display for TeamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeamStatus::Active => write!(f, "ACTIVE"),
            TeamStatus::Paused => write!(f, "PAUSED"),
        }
    }
}

impl std::str::FromStr for TeamStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(TeamStatus::Active),
            "paused" => Ok(TeamStatus::Paused),
            _ => Err(anyhow::anyhow!("Unknown team status: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Pronostic
// ---------------------------------------------------------------------------

/// The backed side of a two-way match outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pronostic {
    Home,
    Away,
}

impl Pronostic {
    pub fn opposite(&self) -> Self {
        match self {
            Pronostic::Home => Pronostic::Away,
            Pronostic::Away => Pronostic::Home,
        }
    }

    /// Determine which side of the fixture our team plays on.
    ///
    /// Case-insensitive substring match in both directions — ledger names
    /// and exchange runner names rarely agree exactly ("Arsenal" vs
    /// "Arsenal FC"). Returns None when neither side matches; callers
    /// must treat that as a data-quality problem, not a default.
    pub fn determine(team_name: &str, home_team: &str, away_team: &str) -> Option<Self> {
        let team = team_name.to_lowercase();
        let home = home_team.to_lowercase();
        let away = away_team.to_lowercase();

        if team.contains(&home) || home.contains(&team) {
            Some(Pronostic::Home)
        } else if team.contains(&away) || away.contains(&team) {
            Some(Pronostic::Away)
        } else {
            None
        }
    }
}

impl fmt::Display for Pronostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pronostic::Home => write!(f, "HOME"),
            Pronostic::Away => write!(f, "AWAY"),
        }
    }
}

impl std::str::FromStr for Pronostic {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HOME" => Ok(Pronostic::Home),
            "AWAY" => Ok(Pronostic::Away),
            _ => Err(anyhow::anyhow!("Unknown pronostic: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Bet
// ---------------------------------------------------------------------------

/// A single wager through its lifecycle, from creation to settlement.
///
/// Created by the placement job. At placement `odds` and
/// `potential_profit` are refreshed together to the exchange's matched
/// price; after that only `status`, `result` and the timestamps
/// change. Terminal bets are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub team_id: String,
    pub team_name: String,
    pub event_id: String,
    pub event_name: String,
    pub market_id: String,
    pub selection_id: String,
    pub pronostic: Pronostic,
    pub odds: Decimal,
    pub stake: Decimal,
    /// stake × (odds − 1), fixed at creation.
    pub potential_profit: Decimal,
    pub status: BetStatus,
    /// Exchange-assigned order reference, set once placement succeeds.
    pub order_ref: Option<String>,
    /// Signed settlement profit/loss.
    pub result: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub placed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} stake={} @ {} ({})",
            self.status, self.team_name, self.event_name, self.stake, self.odds, self.pronostic,
        )
    }
}

impl Bet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        team_id: String,
        team_name: String,
        event_id: String,
        event_name: String,
        market_id: String,
        selection_id: String,
        pronostic: Pronostic,
        odds: Decimal,
        stake: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            team_id,
            team_name,
            event_id,
            event_name,
            market_id,
            selection_id,
            pronostic,
            odds,
            stake,
            potential_profit: (stake * (odds - Decimal::ONE)).round_dp(2),
            status: BetStatus::Pending,
            order_ref: None,
            result: None,
            created_at: Utc::now(),
            placed_at: None,
            settled_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status, BetStatus::Won | BetStatus::Lost)
    }
}

/// Lifecycle status of a bet. Transition rules live in
/// `engine::lifecycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetStatus {
    /// Created, not yet sent to the exchange.
    Pending,
    /// Accepted by the exchange.
    Placed,
    /// Fully filled. Exchanges that report full match atomically may
    /// never surface this state distinctly from Placed.
    Matched,
    Won,
    Lost,
    /// Placement rejected or settlement undeterminable.
    Error,
}

impl BetStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BetStatus::Won | BetStatus::Lost | BetStatus::Error)
    }

    /// All non-terminal statuses, in lifecycle order.
    pub const UNSETTLED: &'static [BetStatus] =
        &[BetStatus::Pending, BetStatus::Placed, BetStatus::Matched];
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Pending => write!(f, "PENDING"),
            BetStatus::Placed => write!(f, "PLACED"),
            BetStatus::Matched => write!(f, "MATCHED"),
            BetStatus::Won => write!(f, "WON"),
            BetStatus::Lost => write!(f, "LOST"),
            BetStatus::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for BetStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(BetStatus::Pending),
            "PLACED" => Ok(BetStatus::Placed),
            "MATCHED" => Ok(BetStatus::Matched),
            "WON" => Ok(BetStatus::Won),
            "LOST" => Ok(BetStatus::Lost),
            "ERROR" => Ok(BetStatus::Error),
            _ => Err(anyhow::anyhow!("Unknown bet status: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduled match
// ---------------------------------------------------------------------------

/// A match row from the ledger's per-team schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledMatch {
    pub team_name: String,
    pub event_name: String,
    pub home_team: String,
    pub away_team: String,
    pub scheduled_for: chrono::NaiveDate,
    /// Odds captured into the ledger ahead of time. Absent means the
    /// placement job must resolve live prices from the exchange.
    pub odds: Option<Decimal>,
    pub status: MatchStatus,
}

/// Ledger-side status of a scheduled match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchStatus {
    Scheduled,
    Pending,
    Won,
    Lost,
    Error,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Scheduled => write!(f, "SCHEDULED"),
            MatchStatus::Pending => write!(f, "PENDING"),
            MatchStatus::Won => write!(f, "WON"),
            MatchStatus::Lost => write!(f, "LOST"),
            MatchStatus::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for MatchStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SCHEDULED" => Ok(MatchStatus::Scheduled),
            "PENDING" => Ok(MatchStatus::Pending),
            "WON" => Ok(MatchStatus::Won),
            "LOST" => Ok(MatchStatus::Lost),
            "ERROR" => Ok(MatchStatus::Error),
            _ => Err(anyhow::anyhow!("Unknown match status: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Job outcome records
// ---------------------------------------------------------------------------

/// Structured result of one placement-job run. This is the record the
/// dashboard relays and the notification sink broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub teams_checked: usize,
    pub matches_found: usize,
    pub bets_placed: usize,
    pub total_staked: Decimal,
    pub errors: Vec<String>,
}

impl CycleOutcome {
    pub fn started() -> Self {
        Self {
            success: true,
            message: String::new(),
            timestamp: Utc::now(),
            teams_checked: 0,
            matches_found: 0,
            bets_placed: 0,
            total_staked: Decimal::ZERO,
            errors: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::started()
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "teams={} matches={} placed={} staked={} errors={}",
            self.teams_checked,
            self.matches_found,
            self.bets_placed,
            self.total_staked,
            self.errors.len(),
        )
    }
}

/// Structured result of one reconciliation-job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub pending_checked: usize,
    pub settled_found: usize,
    pub won: usize,
    pub lost: usize,
    pub still_pending: usize,
    pub errors: Vec<String>,
}

impl ReconcileOutcome {
    pub fn started() -> Self {
        Self {
            success: true,
            message: String::new(),
            timestamp: Utc::now(),
            pending_checked: 0,
            settled_found: 0,
            won: 0,
            lost: 0,
            still_pending: 0,
            errors: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::started()
        }
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked={} settled={} (W{}/L{}) pending={} errors={}",
            self.pending_checked,
            self.settled_found,
            self.won,
            self.lost,
            self.still_pending,
            self.errors.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for PUNTER.
#[derive(Debug, thiserror::Error)]
pub enum PunterError {
    #[error("Connectivity error ({service}): {message}")]
    Connectivity { service: String, message: String },

    #[error("Invalid odds {0}: must be greater than 1.0")]
    InvalidOdds(Decimal),

    #[error("Stop-loss reached at progression step {step} (max {max})")]
    StopLoss { step: u32, max: u32 },

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Placement rejected: {0}")]
    Placement(String),

    #[error("Illegal bet transition: {from} -> {to}")]
    IllegalTransition { from: BetStatus, to: BetStatus },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Concurrent modification of team {0}")]
    VersionConflict(String),

    #[error("Team not found: {0}")]
    TeamNotFound(String),

    #[error("Bet not found: {0}")]
    BetNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for PunterError {
    fn from(e: sqlx::Error) -> Self {
        PunterError::Ledger(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // -- Pronostic tests --

    #[test]
    fn test_pronostic_display() {
        assert_eq!(format!("{}", Pronostic::Home), "HOME");
        assert_eq!(format!("{}", Pronostic::Away), "AWAY");
    }

    #[test]
    fn test_pronostic_opposite() {
        assert_eq!(Pronostic::Home.opposite(), Pronostic::Away);
        assert_eq!(Pronostic::Away.opposite(), Pronostic::Home);
    }

    #[test]
    fn test_determine_home_side() {
        let p = Pronostic::determine("Arsenal", "Arsenal FC", "Chelsea");
        assert_eq!(p, Some(Pronostic::Home));
    }

    #[test]
    fn test_determine_away_side() {
        let p = Pronostic::determine("Chelsea FC", "Arsenal", "Chelsea");
        assert_eq!(p, Some(Pronostic::Away));
    }

    #[test]
    fn test_determine_case_insensitive() {
        let p = Pronostic::determine("LIVERPOOL", "liverpool fc", "Everton");
        assert_eq!(p, Some(Pronostic::Home));
    }

    #[test]
    fn test_determine_no_match() {
        let p = Pronostic::determine("Real Madrid", "Arsenal", "Chelsea");
        assert_eq!(p, None);
    }

    // -- TeamStatus tests --

    #[test]
    fn test_team_status_from_str() {
        assert_eq!("active".parse::<TeamStatus>().unwrap(), TeamStatus::Active);
        assert_eq!("PAUSED".parse::<TeamStatus>().unwrap(), TeamStatus::Paused);
        assert!("dormant".parse::<TeamStatus>().is_err());
    }

    #[test]
    fn test_team_status_serialization() {
        assert_eq!(serde_json::to_string(&TeamStatus::Active).unwrap(), "\"active\"");
        let parsed: TeamStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(parsed, TeamStatus::Paused);
    }

    // -- Team tests --

    #[test]
    fn test_team_new_zeroed_progression() {
        let team = Team::new("Arsenal", "1");
        assert_eq!(team.cumulative_loss, Decimal::ZERO);
        assert_eq!(team.progression_step, 0);
        assert_eq!(team.version, 0);
        assert!(team.is_active());
        assert_eq!(team.win_rate(), 0.0);
    }

    #[test]
    fn test_team_win_rate() {
        let mut team = Team::new("Arsenal", "1");
        team.matches_won = 7;
        team.matches_lost = 3;
        assert!((team.win_rate() - 70.0).abs() < f64::EPSILON);
        assert_eq!(team.matches_settled(), 10);
    }

    #[test]
    fn test_team_serialization_roundtrip() {
        let mut team = Team::new("Arsenal", "1");
        team.cumulative_loss = dec!(250.50);
        team.progression_step = 3;
        let json = serde_json::to_string(&team).unwrap();
        let parsed: Team = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.name, "Arsenal");
        assert_eq!(parsed.cumulative_loss, dec!(250.50));
        assert_eq!(parsed.progression_step, 3);
    }

    #[test]
    fn test_team_display() {
        let team = Team::new("Arsenal", "1");
        let display = format!("{team}");
        assert!(display.contains("Arsenal"));
        assert!(display.contains("ACTIVE"));
    }

    // -- BetStatus tests --

    #[test]
    fn test_bet_status_terminal() {
        assert!(!BetStatus::Pending.is_terminal());
        assert!(!BetStatus::Placed.is_terminal());
        assert!(!BetStatus::Matched.is_terminal());
        assert!(BetStatus::Won.is_terminal());
        assert!(BetStatus::Lost.is_terminal());
        assert!(BetStatus::Error.is_terminal());
    }

    #[test]
    fn test_bet_status_unsettled_list() {
        assert_eq!(BetStatus::UNSETTLED.len(), 3);
        assert!(BetStatus::UNSETTLED.iter().all(|s| !s.is_terminal()));
    }

    #[test]
    fn test_bet_status_from_str_roundtrip() {
        for s in ["PENDING", "PLACED", "MATCHED", "WON", "LOST", "ERROR"] {
            let status: BetStatus = s.parse().unwrap();
            assert_eq!(format!("{status}"), s);
        }
        assert!("VOID".parse::<BetStatus>().is_err());
    }

    #[test]
    fn test_bet_status_serialization() {
        let json = serde_json::to_string(&BetStatus::Placed).unwrap();
        assert_eq!(json, "\"PLACED\"");
        let parsed: BetStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, BetStatus::Placed);
    }

    // -- MatchStatus tests --

    #[test]
    fn test_match_status_from_str() {
        assert_eq!("scheduled".parse::<MatchStatus>().unwrap(), MatchStatus::Scheduled);
        assert_eq!("WON".parse::<MatchStatus>().unwrap(), MatchStatus::Won);
        assert!("abandoned".parse::<MatchStatus>().is_err());
    }

    // -- Outcome record tests --

    #[test]
    fn test_cycle_outcome_started() {
        let outcome = CycleOutcome::started();
        assert!(outcome.success);
        assert_eq!(outcome.bets_placed, 0);
        assert_eq!(outcome.total_staked, Decimal::ZERO);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_cycle_outcome_failed() {
        let outcome = CycleOutcome::failed("no connectivity");
        assert!(!outcome.success);
        assert_eq!(outcome.message, "no connectivity");
    }

    #[test]
    fn test_cycle_outcome_serialization_roundtrip() {
        let mut outcome = CycleOutcome::started();
        outcome.bets_placed = 2;
        outcome.total_staked = dec!(350.00);
        let json = serde_json::to_string(&outcome).unwrap();
        let parsed: CycleOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.bets_placed, 2);
        assert_eq!(parsed.total_staked, dec!(350.00));
    }

    #[test]
    fn test_reconcile_outcome_display() {
        let mut outcome = ReconcileOutcome::started();
        outcome.pending_checked = 5;
        outcome.won = 2;
        outcome.lost = 1;
        outcome.still_pending = 2;
        let display = format!("{outcome}");
        assert!(display.contains("W2/L1"));
        assert!(display.contains("pending=2"));
    }

    // -- PunterError tests --

    #[test]
    fn test_error_display() {
        let e = PunterError::InvalidOdds(dec!(1.0));
        assert!(format!("{e}").contains("1.0"));

        let e = PunterError::StopLoss { step: 7, max: 7 };
        assert!(format!("{e}").contains("step 7"));

        let e = PunterError::IllegalTransition {
            from: BetStatus::Won,
            to: BetStatus::Pending,
        };
        assert_eq!(format!("{e}"), "Illegal bet transition: WON -> PENDING");
    }
}
