//! SQLite-backed ledger.
//!
//! Money and odds columns are stored as TEXT and parsed into
//! `Decimal`, which keeps currency arithmetic exact through the
//! round-trip. Timestamps are RFC 3339 TEXT, dates are `YYYY-MM-DD`.
//!
//! Team rows carry a `version` column used as an optimistic lock:
//! `save_team` only matches the version it read, so a concurrent
//! writer surfaces as `VersionConflict` instead of a lost update.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use super::Ledger;
use crate::types::{Bet, BetStatus, MatchStatus, Pronostic, PunterError, ScheduledMatch, Team, TeamStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS teams (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL UNIQUE,
    sport_id         TEXT NOT NULL,
    league           TEXT NOT NULL DEFAULT '',
    country          TEXT NOT NULL DEFAULT '',
    cumulative_loss  TEXT NOT NULL,
    progression_step INTEGER NOT NULL,
    last_stake       TEXT NOT NULL,
    status           TEXT NOT NULL,
    version          INTEGER NOT NULL DEFAULT 0,
    matches_won      INTEGER NOT NULL DEFAULT 0,
    matches_lost     INTEGER NOT NULL DEFAULT 0,
    total_profit     TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS matches (
    team_name     TEXT NOT NULL,
    event_name    TEXT NOT NULL,
    home_team     TEXT NOT NULL,
    away_team     TEXT NOT NULL,
    scheduled_for TEXT NOT NULL,
    odds          TEXT,
    status        TEXT NOT NULL,
    PRIMARY KEY (team_name, scheduled_for)
);

CREATE TABLE IF NOT EXISTS bets (
    id               TEXT PRIMARY KEY,
    team_id          TEXT NOT NULL,
    team_name        TEXT NOT NULL,
    event_id         TEXT NOT NULL,
    event_name       TEXT NOT NULL,
    market_id        TEXT NOT NULL,
    selection_id     TEXT NOT NULL,
    pronostic        TEXT NOT NULL,
    odds             TEXT NOT NULL,
    stake            TEXT NOT NULL,
    potential_profit TEXT NOT NULL,
    status           TEXT NOT NULL,
    order_ref        TEXT,
    result           TEXT,
    created_at       TEXT NOT NULL,
    placed_at        TEXT,
    settled_at       TEXT
);

CREATE INDEX IF NOT EXISTS idx_bets_status ON bets(status);
CREATE INDEX IF NOT EXISTS idx_bets_team ON bets(team_id, created_at);
"#;

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if needed) the database at `path` and apply the
    /// schema.
    pub async fn open(path: &str) -> Result<Self, PunterError> {
        Self::connect(path, 5).await
    }

    /// In-memory instance, for tests. A single connection — every
    /// pooled connection to `:memory:` would otherwise get its own
    /// empty database.
    pub async fn in_memory() -> Result<Self, PunterError> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(path: &str, max_connections: u32) -> Result<Self, PunterError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| PunterError::Config(format!("bad database url {path}: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        info!(path, "Ledger opened");
        Ok(Self { pool })
    }

    fn decimal(row: &SqliteRow, col: &str) -> Result<Decimal, PunterError> {
        let raw: String = row.try_get(col)?;
        Decimal::from_str(&raw)
            .map_err(|e| PunterError::Ledger(format!("bad decimal in {col}: {e}")))
    }

    fn opt_decimal(row: &SqliteRow, col: &str) -> Result<Option<Decimal>, PunterError> {
        let raw: Option<String> = row.try_get(col)?;
        raw.map(|s| {
            Decimal::from_str(&s)
                .map_err(|e| PunterError::Ledger(format!("bad decimal in {col}: {e}")))
        })
        .transpose()
    }

    fn timestamp(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>, PunterError> {
        let raw: String = row.try_get(col)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| PunterError::Ledger(format!("bad timestamp in {col}: {e}")))
    }

    fn opt_timestamp(row: &SqliteRow, col: &str) -> Result<Option<DateTime<Utc>>, PunterError> {
        let raw: Option<String> = row.try_get(col)?;
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| PunterError::Ledger(format!("bad timestamp in {col}: {e}")))
        })
        .transpose()
    }

    fn row_to_team(row: &SqliteRow) -> Result<Team, PunterError> {
        let status: String = row.try_get("status")?;
        let step: i64 = row.try_get("progression_step")?;
        let won: i64 = row.try_get("matches_won")?;
        let lost: i64 = row.try_get("matches_lost")?;
        Ok(Team {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            sport_id: row.try_get("sport_id")?,
            league: row.try_get("league")?,
            country: row.try_get("country")?,
            cumulative_loss: Self::decimal(row, "cumulative_loss")?,
            progression_step: step as u32,
            last_stake: Self::decimal(row, "last_stake")?,
            status: TeamStatus::from_str(&status)
                .map_err(|e| PunterError::Ledger(e.to_string()))?,
            version: row.try_get("version")?,
            matches_won: won as u32,
            matches_lost: lost as u32,
            total_profit: Self::decimal(row, "total_profit")?,
            updated_at: Self::timestamp(row, "updated_at")?,
        })
    }

    fn row_to_match(row: &SqliteRow) -> Result<ScheduledMatch, PunterError> {
        let date: String = row.try_get("scheduled_for")?;
        let status: String = row.try_get("status")?;
        Ok(ScheduledMatch {
            team_name: row.try_get("team_name")?,
            event_name: row.try_get("event_name")?,
            home_team: row.try_get("home_team")?,
            away_team: row.try_get("away_team")?,
            scheduled_for: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| PunterError::Ledger(format!("bad date: {e}")))?,
            odds: Self::opt_decimal(row, "odds")?,
            status: MatchStatus::from_str(&status)
                .map_err(|e| PunterError::Ledger(e.to_string()))?,
        })
    }

    fn row_to_bet(row: &SqliteRow) -> Result<Bet, PunterError> {
        let pronostic: String = row.try_get("pronostic")?;
        let status: String = row.try_get("status")?;
        Ok(Bet {
            id: row.try_get("id")?,
            team_id: row.try_get("team_id")?,
            team_name: row.try_get("team_name")?,
            event_id: row.try_get("event_id")?,
            event_name: row.try_get("event_name")?,
            market_id: row.try_get("market_id")?,
            selection_id: row.try_get("selection_id")?,
            pronostic: Pronostic::from_str(&pronostic)
                .map_err(|e| PunterError::Ledger(e.to_string()))?,
            odds: Self::decimal(row, "odds")?,
            stake: Self::decimal(row, "stake")?,
            potential_profit: Self::decimal(row, "potential_profit")?,
            status: BetStatus::from_str(&status)
                .map_err(|e| PunterError::Ledger(e.to_string()))?,
            order_ref: row.try_get("order_ref")?,
            result: Self::opt_decimal(row, "result")?,
            created_at: Self::timestamp(row, "created_at")?,
            placed_at: Self::opt_timestamp(row, "placed_at")?,
            settled_at: Self::opt_timestamp(row, "settled_at")?,
        })
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    // -- Teams -------------------------------------------------------------

    async fn load_teams(&self) -> Result<Vec<Team>, PunterError> {
        let rows = sqlx::query("SELECT * FROM teams ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_team).collect()
    }

    async fn get_team(&self, team_id: &str) -> Result<Team, PunterError> {
        let row = sqlx::query("SELECT * FROM teams WHERE id = ?")
            .bind(team_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PunterError::TeamNotFound(team_id.to_string()))?;
        Self::row_to_team(&row)
    }

    async fn save_team(&self, team: &Team) -> Result<(), PunterError> {
        let result = sqlx::query(
            r#"
            UPDATE teams SET
                name = ?, sport_id = ?, league = ?, country = ?,
                cumulative_loss = ?, progression_step = ?, last_stake = ?,
                status = ?, version = version + 1,
                matches_won = ?, matches_lost = ?, total_profit = ?,
                updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&team.name)
        .bind(&team.sport_id)
        .bind(&team.league)
        .bind(&team.country)
        .bind(team.cumulative_loss.to_string())
        .bind(team.progression_step as i64)
        .bind(team.last_stake.to_string())
        .bind(team.status.to_string())
        .bind(team.matches_won as i64)
        .bind(team.matches_lost as i64)
        .bind(team.total_profit.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(&team.id)
        .bind(team.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either the row is gone or someone else bumped the version.
            let exists = sqlx::query("SELECT 1 FROM teams WHERE id = ?")
                .bind(&team.id)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            return if exists {
                Err(PunterError::VersionConflict(team.id.clone()))
            } else {
                Err(PunterError::TeamNotFound(team.id.clone()))
            };
        }

        debug!(team = %team.name, version = team.version + 1, "Team saved");
        Ok(())
    }

    async fn insert_team(&self, team: &Team) -> Result<(), PunterError> {
        sqlx::query(
            r#"
            INSERT INTO teams (
                id, name, sport_id, league, country,
                cumulative_loss, progression_step, last_stake,
                status, version, matches_won, matches_lost,
                total_profit, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&team.id)
        .bind(&team.name)
        .bind(&team.sport_id)
        .bind(&team.league)
        .bind(&team.country)
        .bind(team.cumulative_loss.to_string())
        .bind(team.progression_step as i64)
        .bind(team.last_stake.to_string())
        .bind(team.status.to_string())
        .bind(team.version)
        .bind(team.matches_won as i64)
        .bind(team.matches_lost as i64)
        .bind(team.total_profit.to_string())
        .bind(team.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_team(&self, team_id: &str) -> Result<(), PunterError> {
        let result = sqlx::query("DELETE FROM teams WHERE id = ?")
            .bind(team_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(PunterError::TeamNotFound(team_id.to_string()));
        }
        Ok(())
    }

    // -- Schedule ----------------------------------------------------------

    async fn scheduled_matches(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ScheduledMatch>, PunterError> {
        let rows = sqlx::query("SELECT * FROM matches WHERE scheduled_for = ? ORDER BY team_name")
            .bind(date.format("%Y-%m-%d").to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_match).collect()
    }

    async fn upsert_match(&self, m: &ScheduledMatch) -> Result<(), PunterError> {
        sqlx::query(
            r#"
            INSERT INTO matches (
                team_name, event_name, home_team, away_team,
                scheduled_for, odds, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (team_name, scheduled_for) DO UPDATE SET
                event_name = excluded.event_name,
                home_team = excluded.home_team,
                away_team = excluded.away_team,
                odds = excluded.odds,
                status = excluded.status
            "#,
        )
        .bind(&m.team_name)
        .bind(&m.event_name)
        .bind(&m.home_team)
        .bind(&m.away_team)
        .bind(m.scheduled_for.format("%Y-%m-%d").to_string())
        .bind(m.odds.map(|d| d.to_string()))
        .bind(m.status.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_match_status(
        &self,
        team_name: &str,
        date: NaiveDate,
        status: MatchStatus,
    ) -> Result<(), PunterError> {
        sqlx::query("UPDATE matches SET status = ? WHERE team_name = ? AND scheduled_for = ?")
            .bind(status.to_string())
            .bind(team_name)
            .bind(date.format("%Y-%m-%d").to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -- Bets --------------------------------------------------------------

    async fn insert_bet(&self, bet: &Bet) -> Result<(), PunterError> {
        sqlx::query(
            r#"
            INSERT INTO bets (
                id, team_id, team_name, event_id, event_name,
                market_id, selection_id, pronostic, odds, stake,
                potential_profit, status, order_ref, result,
                created_at, placed_at, settled_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&bet.id)
        .bind(&bet.team_id)
        .bind(&bet.team_name)
        .bind(&bet.event_id)
        .bind(&bet.event_name)
        .bind(&bet.market_id)
        .bind(&bet.selection_id)
        .bind(bet.pronostic.to_string())
        .bind(bet.odds.to_string())
        .bind(bet.stake.to_string())
        .bind(bet.potential_profit.to_string())
        .bind(bet.status.to_string())
        .bind(&bet.order_ref)
        .bind(bet.result.map(|d| d.to_string()))
        .bind(bet.created_at.to_rfc3339())
        .bind(bet.placed_at.map(|t| t.to_rfc3339()))
        .bind(bet.settled_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_bet(&self, bet_id: &str) -> Result<Bet, PunterError> {
        let row = sqlx::query("SELECT * FROM bets WHERE id = ?")
            .bind(bet_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PunterError::BetNotFound(bet_id.to_string()))?;
        Self::row_to_bet(&row)
    }

    async fn pending_bets(&self) -> Result<Vec<Bet>, PunterError> {
        let rows = sqlx::query(
            "SELECT * FROM bets WHERE status IN ('PENDING', 'PLACED', 'MATCHED') \
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_bet).collect()
    }

    async fn bets_for_team_on(
        &self,
        team_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Bet>, PunterError> {
        // created_at is RFC 3339, so a date prefix match selects the day.
        let rows = sqlx::query(
            "SELECT * FROM bets WHERE team_id = ? AND created_at LIKE ? ORDER BY created_at",
        )
        .bind(team_id)
        .bind(format!("{}%", date.format("%Y-%m-%d")))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_bet).collect()
    }

    async fn recent_bets(&self, limit: u32) -> Result<Vec<Bet>, PunterError> {
        let rows = sqlx::query("SELECT * FROM bets ORDER BY created_at DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_bet).collect()
    }

    async fn update_bet(&self, bet: &Bet) -> Result<(), PunterError> {
        let result = sqlx::query(
            r#"
            UPDATE bets SET
                status = ?, order_ref = ?, result = ?,
                odds = ?, potential_profit = ?, placed_at = ?, settled_at = ?
            WHERE id = ?
            "#,
        )
        .bind(bet.status.to_string())
        .bind(&bet.order_ref)
        .bind(bet.result.map(|d| d.to_string()))
        .bind(bet.odds.to_string())
        .bind(bet.potential_profit.to_string())
        .bind(bet.placed_at.map(|t| t.to_rfc3339()))
        .bind(bet.settled_at.map(|t| t.to_rfc3339()))
        .bind(&bet.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PunterError::BetNotFound(bet.id.clone()));
        }
        Ok(())
    }

    async fn settle_bet(&self, bet: &Bet) -> Result<bool, PunterError> {
        let result = sqlx::query(
            r#"
            UPDATE bets SET status = ?, result = ?, settled_at = ?
            WHERE id = ? AND status NOT IN ('WON', 'LOST', 'ERROR')
            "#,
        )
        .bind(bet.status.to_string())
        .bind(bet.result.map(|d| d.to_string()))
        .bind(bet.settled_at.map(|t| t.to_rfc3339()))
        .bind(&bet.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn ledger() -> SqliteLedger {
        SqliteLedger::in_memory().await.unwrap()
    }

    fn team(name: &str) -> Team {
        Team::new(name, "1")
    }

    fn bet(team: &Team) -> Bet {
        Bet::new(
            team.id.clone(),
            team.name.clone(),
            "evt-1".into(),
            format!("{} v Somebody", team.name),
            "1.234".into(),
            "101".into(),
            Pronostic::Home,
            dec!(2.0),
            dec!(100),
        )
    }

    #[tokio::test]
    async fn test_team_roundtrip() {
        let l = ledger().await;
        let mut t = team("Arsenal");
        t.cumulative_loss = dec!(123.45);
        t.progression_step = 3;
        l.insert_team(&t).await.unwrap();

        let loaded = l.get_team(&t.id).await.unwrap();
        assert_eq!(loaded.name, "Arsenal");
        assert_eq!(loaded.cumulative_loss, dec!(123.45));
        assert_eq!(loaded.progression_step, 3);
        assert_eq!(loaded.version, 0);
    }

    #[tokio::test]
    async fn test_save_bumps_version() {
        let l = ledger().await;
        let mut t = team("Chelsea");
        l.insert_team(&t).await.unwrap();

        t.cumulative_loss = dec!(50);
        l.save_team(&t).await.unwrap();

        let loaded = l.get_team(&t.id).await.unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.cumulative_loss, dec!(50));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let l = ledger().await;
        let t = team("Leeds");
        l.insert_team(&t).await.unwrap();

        // First writer wins.
        let mut first = l.get_team(&t.id).await.unwrap();
        first.progression_step = 1;
        l.save_team(&first).await.unwrap();

        // Second writer still holds version 0.
        let mut second = t.clone();
        second.progression_step = 9;
        let err = l.save_team(&second).await.unwrap_err();
        assert!(matches!(err, PunterError::VersionConflict(_)));

        let loaded = l.get_team(&t.id).await.unwrap();
        assert_eq!(loaded.progression_step, 1);
    }

    #[tokio::test]
    async fn test_missing_team() {
        let l = ledger().await;
        let err = l.get_team("nope").await.unwrap_err();
        assert!(matches!(err, PunterError::TeamNotFound(_)));

        let err = l.save_team(&team("Ghost")).await.unwrap_err();
        assert!(matches!(err, PunterError::TeamNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_team() {
        let l = ledger().await;
        let t = team("Everton");
        l.insert_team(&t).await.unwrap();
        l.delete_team(&t.id).await.unwrap();
        assert!(l.get_team(&t.id).await.is_err());
    }

    #[tokio::test]
    async fn test_match_upsert_and_status() {
        let l = ledger().await;
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let m = ScheduledMatch {
            team_name: "Arsenal".into(),
            event_name: "Arsenal v Chelsea".into(),
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            scheduled_for: date,
            odds: Some(dec!(1.85)),
            status: MatchStatus::Scheduled,
        };
        l.upsert_match(&m).await.unwrap();

        // Upsert with new odds replaces, not duplicates.
        let mut m2 = m.clone();
        m2.odds = Some(dec!(1.90));
        l.upsert_match(&m2).await.unwrap();

        let found = l.scheduled_matches(date).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].odds, Some(dec!(1.90)));

        l.update_match_status("Arsenal", date, MatchStatus::Pending)
            .await
            .unwrap();
        let found = l.scheduled_matches(date).await.unwrap();
        assert_eq!(found[0].status, MatchStatus::Pending);
    }

    #[tokio::test]
    async fn test_bet_roundtrip_and_pending() {
        let l = ledger().await;
        let t = team("Arsenal");
        l.insert_team(&t).await.unwrap();

        let mut b = bet(&t);
        l.insert_bet(&b).await.unwrap();

        let pending = l.pending_bets().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, BetStatus::Pending);
        assert_eq!(pending[0].stake, dec!(100));

        b.status = BetStatus::Won;
        b.result = Some(dec!(100.00));
        b.settled_at = Some(Utc::now());
        l.update_bet(&b).await.unwrap();

        assert!(l.pending_bets().await.unwrap().is_empty());
        let loaded = l.get_bet(&b.id).await.unwrap();
        assert_eq!(loaded.status, BetStatus::Won);
        assert_eq!(loaded.result, Some(dec!(100.00)));
    }

    #[tokio::test]
    async fn test_bets_for_team_on_day() {
        let l = ledger().await;
        let t = team("Arsenal");
        let other = team("Chelsea");
        l.insert_team(&t).await.unwrap();
        l.insert_team(&other).await.unwrap();

        l.insert_bet(&bet(&t)).await.unwrap();
        l.insert_bet(&bet(&other)).await.unwrap();

        let today = Utc::now().date_naive();
        let found = l.bets_for_team_on(&t.id, today).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].team_id, t.id);

        let yesterday = today.pred_opt().unwrap();
        assert!(l.bets_for_team_on(&t.id, yesterday).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_bets_limit() {
        let l = ledger().await;
        let t = team("Arsenal");
        l.insert_team(&t).await.unwrap();
        for _ in 0..5 {
            l.insert_bet(&bet(&t)).await.unwrap();
        }
        assert_eq!(l.recent_bets(3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_missing_bet() {
        let l = ledger().await;
        let t = team("Arsenal");
        let b = bet(&t);
        let err = l.update_bet(&b).await.unwrap_err();
        assert!(matches!(err, PunterError::BetNotFound(_)));
    }

    #[tokio::test]
    async fn test_settle_bet_claims_once() {
        let l = ledger().await;
        let t = team("Arsenal");
        let mut b = bet(&t);
        b.status = BetStatus::Placed;
        l.insert_bet(&b).await.unwrap();

        b.status = BetStatus::Won;
        b.result = Some(dec!(100));
        b.settled_at = Some(Utc::now());
        assert!(l.settle_bet(&b).await.unwrap());

        // The row is terminal now; a second claim writes nothing.
        let mut again = b.clone();
        again.status = BetStatus::Lost;
        again.result = Some(dec!(-100));
        assert!(!l.settle_bet(&again).await.unwrap());

        let loaded = l.get_bet(&b.id).await.unwrap();
        assert_eq!(loaded.status, BetStatus::Won);
        assert_eq!(loaded.result, Some(dec!(100)));
    }

    #[tokio::test]
    async fn test_settle_missing_bet_claims_nothing() {
        let l = ledger().await;
        let t = team("Arsenal");
        let mut b = bet(&t);
        b.status = BetStatus::Won;
        assert!(!l.settle_bet(&b).await.unwrap());
    }
}
