//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.
//! Mutating endpoints go through the same single-flight scheduler and
//! team store the bot itself uses, so a manual trigger can never race
//! a scheduled run.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::reconcile::process_bet_result;
use crate::ledger::Ledger;
use crate::notify::{Notification, NotificationSink};
use crate::scheduler::Scheduler;
use crate::store::TeamProgressionStore;
use crate::types::{Bet, CycleOutcome, PunterError, ReconcileOutcome, Team};

/// Activity feed entries kept in memory for the dashboard.
const ACTIVITY_CAPACITY: usize = 200;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub bot_name: String,
    pub dry_run: bool,
    /// Configured initial stake, restored by an operator reset.
    pub initial_stake: Decimal,
    pub start_time: DateTime<Utc>,
    pub store: Arc<TeamProgressionStore>,
    pub scheduler: Arc<Scheduler>,
    pub notifier: Arc<dyn NotificationSink>,
    pub activity: RwLock<Vec<Notification>>,
}

impl DashboardState {
    pub fn new(
        bot_name: String,
        dry_run: bool,
        initial_stake: Decimal,
        store: Arc<TeamProgressionStore>,
        scheduler: Arc<Scheduler>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            bot_name,
            dry_run,
            initial_stake,
            start_time: Utc::now(),
            store,
            scheduler,
            notifier,
            activity: RwLock::new(Vec::new()),
        }
    }

    /// Append to the activity feed, dropping the oldest entries past
    /// capacity.
    pub async fn record(&self, notification: Notification) {
        let mut feed = self.activity.write().await;
        feed.push(notification);
        if feed.len() > ACTIVITY_CAPACITY {
            let excess = feed.len() - ACTIVITY_CAPACITY;
            feed.drain(..excess);
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StateResponse {
    pub bot_name: String,
    pub dry_run: bool,
    pub uptime_secs: i64,
    pub last_cycle: Option<CycleOutcome>,
    pub last_reconcile: Option<ReconcileOutcome>,
    pub activity: Vec<Notification>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamView {
    #[serde(flatten)]
    pub team: Team,
    pub win_rate: f64,
}

impl From<Team> for TeamView {
    fn from(team: Team) -> Self {
        let win_rate = team.win_rate();
        Self { team, win_rate }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub teams_total: usize,
    pub teams_active: usize,
    pub total_profit: Decimal,
    pub open_loss: Decimal,
    pub matches_won: u32,
    pub matches_lost: u32,
    pub win_rate: f64,
    pub pending_bets: usize,
}

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    pub won: bool,
}

/// Error body for failed requests.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(e: PunterError) -> ApiError {
    let status = match &e {
        PunterError::TeamNotFound(_) | PunterError::BetNotFound(_) => StatusCode::NOT_FOUND,
        PunterError::IllegalTransition { .. } | PunterError::VersionConflict(_) => {
            StatusCode::CONFLICT
        }
        PunterError::Connectivity { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody { error: e.to_string() }))
}

fn busy(what: &str) -> ApiError {
    (
        StatusCode::CONFLICT,
        Json(ErrorBody {
            error: format!("{what} already running"),
        }),
    )
}

// ---------------------------------------------------------------------------
// Read endpoints
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/state
pub async fn get_state(State(state): State<AppState>) -> Json<StateResponse> {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    let activity = state.activity.read().await;
    let start = activity.len().saturating_sub(20);

    Json(StateResponse {
        bot_name: state.bot_name.clone(),
        dry_run: state.dry_run,
        uptime_secs: uptime,
        last_cycle: state.scheduler.last_cycle().await,
        last_reconcile: state.scheduler.last_reconcile().await,
        activity: activity[start..].to_vec(),
    })
}

/// GET /api/teams
pub async fn get_teams(
    State(state): State<AppState>,
) -> Result<Json<Vec<TeamView>>, ApiError> {
    let teams = state.store.list().await.map_err(api_error)?;
    Ok(Json(teams.into_iter().map(TeamView::from).collect()))
}

/// GET /api/bets — the 100 most recent bets, newest first.
pub async fn get_bets(State(state): State<AppState>) -> Result<Json<Vec<Bet>>, ApiError> {
    let bets = state
        .store
        .ledger()
        .recent_bets(100)
        .await
        .map_err(api_error)?;
    Ok(Json(bets))
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let teams = state.store.list().await.map_err(api_error)?;
    let pending = state
        .store
        .ledger()
        .pending_bets()
        .await
        .map_err(api_error)?;

    let matches_won: u32 = teams.iter().map(|t| t.matches_won).sum();
    let matches_lost: u32 = teams.iter().map(|t| t.matches_lost).sum();
    let settled = matches_won + matches_lost;
    // Percentage, matching Team::win_rate.
    let win_rate = if settled > 0 {
        (matches_won as f64 / settled as f64) * 100.0
    } else {
        0.0
    };

    Ok(Json(StatsResponse {
        teams_total: teams.len(),
        teams_active: teams.iter().filter(|t| t.is_active()).count(),
        total_profit: teams.iter().map(|t| t.total_profit).sum(),
        open_loss: teams.iter().map(|t| t.cumulative_loss).sum(),
        matches_won,
        matches_lost,
        win_rate,
        pending_bets: pending.len(),
    }))
}

// ---------------------------------------------------------------------------
// Mutating endpoints
// ---------------------------------------------------------------------------

/// POST /api/run-cycle — trigger a placement cycle now.
///
/// Refused with 409 while a cycle (scheduled or manual) is in flight.
pub async fn post_run_cycle(
    State(state): State<AppState>,
) -> Result<Json<CycleOutcome>, ApiError> {
    match state.scheduler.try_run_cycle().await {
        Some(outcome) => Ok(Json(outcome)),
        None => Err(busy("placement cycle")),
    }
}

/// POST /api/reconcile — trigger a reconciliation pass now.
pub async fn post_reconcile(
    State(state): State<AppState>,
) -> Result<Json<ReconcileOutcome>, ApiError> {
    match state.scheduler.try_run_reconcile().await {
        Some(outcome) => Ok(Json(outcome)),
        None => Err(busy("reconciliation")),
    }
}

/// POST /api/teams/:id/reset — zero a team's loss progression.
pub async fn post_reset_team(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
) -> Result<Json<TeamView>, ApiError> {
    let team = state
        .store
        .reset_progression(&team_id, state.initial_stake)
        .await
        .map_err(api_error)?;
    Ok(Json(TeamView::from(team)))
}

/// POST /api/bets/:id/settle — manually settle a bet the exchange
/// never reported on. Runs the same settlement path as reconciliation.
pub async fn post_settle_bet(
    State(state): State<AppState>,
    Path(bet_id): Path<String>,
    Json(req): Json<SettleRequest>,
) -> Result<Json<Bet>, ApiError> {
    let mut bet = state
        .store
        .ledger()
        .get_bet(&bet_id)
        .await
        .map_err(api_error)?;

    process_bet_result(&state.store, state.notifier.as_ref(), &mut bet, req.won, None)
        .await
        .map_err(api_error)?;

    Ok(Json(bet))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
