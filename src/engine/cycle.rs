//! Daily placement cycle.
//!
//! For each active team with a match scheduled today: work out which
//! side of the fixture the team plays, resolve the live market and
//! odds, size the stake from the team's progression state, and place
//! the order. Teams are processed sequentially; one team's failure is
//! recorded and the cycle moves on. Only a connectivity failure aborts
//! the run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::engine::lifecycle;
use crate::exchange::{search_terms, EventSummary, MarketDataProvider, MarketSummary};
use crate::ledger::Ledger;
use crate::notify::NotificationSink;
use crate::staking::StakingCalculator;
use crate::store::TeamProgressionStore;
use crate::types::{
    Bet, BetStatus, CycleOutcome, MatchStatus, Pronostic, PunterError, ScheduledMatch, Team,
};

pub struct CycleOrchestrator {
    exchange: Arc<dyn MarketDataProvider>,
    store: Arc<TeamProgressionStore>,
    notifier: Arc<dyn NotificationSink>,
    staking: StakingCalculator,
    dry_run: bool,
}

/// What happened for one team in one cycle run.
enum TeamResult {
    /// No scheduled match, already attempted, or stop-loss/odds guard.
    Skipped,
    /// Match found but nothing placed (resolution problem).
    MatchOnly,
    Placed { stake: Decimal },
    Failed { reason: String },
}

impl CycleOrchestrator {
    pub fn new(
        exchange: Arc<dyn MarketDataProvider>,
        store: Arc<TeamProgressionStore>,
        notifier: Arc<dyn NotificationSink>,
        staking: StakingCalculator,
        dry_run: bool,
    ) -> Self {
        Self {
            exchange,
            store,
            notifier,
            staking,
            dry_run,
        }
    }

    /// Run one placement cycle over all active teams.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let mut outcome = CycleOutcome::started();
        info!(dry_run = self.dry_run, "Placement cycle starting");

        let teams = match self.store.list().await {
            Ok(teams) => teams,
            Err(e) => {
                let outcome = CycleOutcome::failed(format!("Could not load teams: {e}"));
                self.notifier.cycle_finished(&outcome).await;
                return outcome;
            }
        };

        let today = Utc::now().date_naive();
        let schedule: HashMap<String, ScheduledMatch> =
            match self.store.ledger().scheduled_matches(today).await {
                Ok(matches) => matches
                    .into_iter()
                    .map(|m| (m.team_name.clone(), m))
                    .collect(),
                Err(e) => {
                    let outcome = CycleOutcome::failed(format!("Could not load schedule: {e}"));
                    self.notifier.cycle_finished(&outcome).await;
                    return outcome;
                }
            };

        for team in teams.iter().filter(|t| t.is_active()) {
            outcome.teams_checked += 1;

            let Some(scheduled) = schedule.get(&team.name) else {
                debug!(team = %team.name, "No match scheduled today");
                continue;
            };

            match self.process_team(team, scheduled).await {
                Ok(TeamResult::Skipped) => {}
                Ok(TeamResult::MatchOnly) => outcome.matches_found += 1,
                Ok(TeamResult::Placed { stake }) => {
                    outcome.matches_found += 1;
                    outcome.bets_placed += 1;
                    outcome.total_staked += stake;
                }
                Ok(TeamResult::Failed { reason }) => {
                    outcome.matches_found += 1;
                    outcome.errors.push(format!("{}: {reason}", team.name));
                }
                Err(e @ PunterError::Connectivity { .. }) => {
                    // The exchange is gone; nothing further will succeed.
                    outcome.success = false;
                    outcome.message = e.to_string();
                    outcome.errors.push(format!("{}: {e}", team.name));
                    break;
                }
                Err(e) => {
                    outcome.errors.push(format!("{}: {e}", team.name));
                }
            }
        }

        if outcome.message.is_empty() {
            outcome.message = format!(
                "Cycle complete: {} bets from {} teams",
                outcome.bets_placed, outcome.teams_checked
            );
        }
        self.notifier.cycle_finished(&outcome).await;
        outcome
    }

    /// Handle a single team. Connectivity errors bubble up; everything
    /// else is folded into a `TeamResult`.
    async fn process_team(
        &self,
        team: &Team,
        scheduled: &ScheduledMatch,
    ) -> Result<TeamResult, PunterError> {
        // Already attempted today? The ledger is the source of truth,
        // so a re-run (scheduled or manual) never places twice.
        let existing = self
            .store
            .ledger()
            .bets_for_team_on(&team.id, scheduled.scheduled_for)
            .await?;
        if !existing.is_empty() {
            debug!(team = %team.name, "Bet already recorded for today, skipping");
            return Ok(TeamResult::Skipped);
        }

        let Some(pronostic) =
            Pronostic::determine(&team.name, &scheduled.home_team, &scheduled.away_team)
        else {
            warn!(
                team = %team.name,
                home = %scheduled.home_team,
                away = %scheduled.away_team,
                "Team matches neither side of its fixture"
            );
            return Ok(TeamResult::Failed {
                reason: PunterError::Resolution(format!(
                    "team name matches neither {} nor {}",
                    scheduled.home_team, scheduled.away_team
                ))
                .to_string(),
            });
        };

        let (event, market) = match self.resolve_market(team).await {
            Ok(found) => found,
            Err(e @ PunterError::Connectivity { .. }) => return Err(e),
            Err(e) => return Ok(TeamResult::Failed { reason: e.to_string() }),
        };

        let side_name = match pronostic {
            Pronostic::Home => &scheduled.home_team,
            Pronostic::Away => &scheduled.away_team,
        };
        let Some(selection_id) = Self::find_selection(&market, side_name) else {
            return Ok(TeamResult::Failed {
                reason: PunterError::Resolution(format!(
                    "no runner matching '{side_name}' in market {}",
                    market.market_id
                ))
                .to_string(),
            });
        };

        // Odds captured in the ledger win over a live quote.
        let odds = match scheduled.odds {
            Some(odds) => odds,
            None => {
                let prices = self.exchange.market_prices(&market.market_id).await?;
                match prices.back_price_for(&selection_id) {
                    Some(odds) => odds,
                    None => {
                        return Ok(TeamResult::Failed {
                            reason: PunterError::Resolution(format!(
                                "no back price for selection {selection_id}"
                            ))
                            .to_string(),
                        })
                    }
                }
            }
        };

        let decision = match self
            .staking
            .calculate_stake(team.cumulative_loss, odds, team.progression_step)
        {
            Ok(decision) => decision,
            Err(e) => {
                // Invalid odds: a guard, not a cycle error.
                warn!(team = %team.name, %odds, "Skipping placement: {e}");
                return Ok(TeamResult::MatchOnly);
            }
        };
        if decision.stop_loss_reached {
            self.notifier.stop_loss(team).await;
            return Ok(TeamResult::MatchOnly);
        }

        let mut bet = Bet::new(
            team.id.clone(),
            team.name.clone(),
            event.id.clone(),
            event.name.clone(),
            market.market_id.clone(),
            selection_id,
            pronostic,
            odds,
            decision.stake,
        );

        if self.dry_run {
            info!(
                team = %team.name,
                stake = %bet.stake,
                odds = %bet.odds,
                market_id = %bet.market_id,
                "[DRY RUN] Would place bet"
            );
            return Ok(TeamResult::Placed { stake: bet.stake });
        }

        self.store.ledger().insert_bet(&bet).await?;

        match self
            .exchange
            .place_back_bet(&bet.market_id, &bet.selection_id, odds, bet.stake, &bet.id)
            .await
        {
            Ok(placement) => {
                bet.order_ref = Some(placement.order_ref);
                lifecycle::advance(&mut bet, BetStatus::Placed)?;
                if placement.matched {
                    lifecycle::advance(&mut bet, BetStatus::Matched)?;
                }
                if let Some(price) = placement.average_price {
                    // The fill price is what the settlement will pay.
                    bet.odds = price;
                    bet.potential_profit =
                        StakingCalculator::calculate_potential_profit(bet.stake, price);
                }
                self.store.ledger().update_bet(&bet).await?;

                let stake = bet.stake;
                self.store
                    .with_team(&team.id, |t| {
                        t.last_stake = stake;
                        Ok(())
                    })
                    .await?;
                self.store
                    .ledger()
                    .update_match_status(&team.name, scheduled.scheduled_for, MatchStatus::Pending)
                    .await?;

                self.notifier.bet_placed(&bet).await;
                Ok(TeamResult::Placed { stake })
            }
            Err(e) => {
                lifecycle::advance(&mut bet, BetStatus::Error)?;
                self.store.ledger().update_bet(&bet).await?;
                self.store
                    .ledger()
                    .update_match_status(&team.name, scheduled.scheduled_for, MatchStatus::Error)
                    .await?;
                match e {
                    PunterError::Connectivity { .. } => Err(e),
                    _ => Ok(TeamResult::Failed { reason: e.to_string() }),
                }
            }
        }
    }

    /// Find today's event and its match-odds market for a team, trying
    /// progressively shortened search terms.
    async fn resolve_market(
        &self,
        team: &Team,
    ) -> Result<(EventSummary, MarketSummary), PunterError> {
        for term in search_terms(&team.name) {
            let events = self.exchange.search_events(&team.sport_id, &term).await?;
            let Some(event) = events.into_iter().next() else {
                debug!(team = %team.name, term, "No events for search term");
                continue;
            };

            let markets = self.exchange.list_markets(&event.id).await?;
            let Some(market) = markets.into_iter().next() else {
                return Err(PunterError::Resolution(format!(
                    "no match-odds market for event {}",
                    event.name
                )));
            };
            return Ok((event, market));
        }
        Err(PunterError::Resolution(format!(
            "no event found for '{}'",
            team.name
        )))
    }

    /// Runner whose name matches the given side label, either
    /// direction, case-insensitive.
    fn find_selection(market: &MarketSummary, side_name: &str) -> Option<String> {
        let side = side_name.to_lowercase();
        market
            .runners
            .iter()
            .find(|r| {
                let runner = r.runner_name.to_lowercase();
                runner.contains(&side) || side.contains(&runner)
            })
            .map(|r| r.selection_id.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;

    use crate::exchange::{
        MarketPrices, MockMarketDataProvider, PlacementResult, RunnerPrice, RunnerSummary,
    };
    use crate::ledger::sqlite::SqliteLedger;
    use crate::ledger::Ledger;
    use crate::notify::LogSink;
    use crate::staking::StakingConfig;

    fn event() -> EventSummary {
        EventSummary {
            id: "evt-1".into(),
            name: "Arsenal v Chelsea".into(),
            country_code: Some("GB".into()),
            open_date: None,
        }
    }

    fn market() -> MarketSummary {
        MarketSummary {
            market_id: "1.234".into(),
            market_name: "Match Odds".into(),
            runners: vec![
                RunnerSummary {
                    selection_id: "101".into(),
                    runner_name: "Arsenal".into(),
                },
                RunnerSummary {
                    selection_id: "102".into(),
                    runner_name: "Chelsea".into(),
                },
            ],
        }
    }

    fn scheduled(team_name: &str, odds: Option<Decimal>) -> ScheduledMatch {
        ScheduledMatch {
            team_name: team_name.into(),
            event_name: "Arsenal v Chelsea".into(),
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            scheduled_for: Utc::now().date_naive(),
            odds,
            status: MatchStatus::Scheduled,
        }
    }

    async fn store_with(team: &Team, m: &ScheduledMatch) -> Arc<TeamProgressionStore> {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger.insert_team(team).await.unwrap();
        ledger.upsert_match(m).await.unwrap();
        Arc::new(TeamProgressionStore::new(Arc::new(ledger)))
    }

    fn orchestrator(
        exchange: MockMarketDataProvider,
        store: Arc<TeamProgressionStore>,
    ) -> CycleOrchestrator {
        CycleOrchestrator::new(
            Arc::new(exchange),
            store,
            Arc::new(LogSink),
            StakingCalculator::new(StakingConfig::default()),
            false,
        )
    }

    #[tokio::test]
    async fn test_happy_path_places_bet() {
        let team = Team::new("Arsenal", "1");
        let store = store_with(&team, &scheduled("Arsenal", None)).await;

        let mut exchange = MockMarketDataProvider::new();
        exchange
            .expect_search_events()
            .returning(|_, _| Ok(vec![event()]));
        exchange
            .expect_list_markets()
            .with(eq("evt-1"))
            .returning(|_| Ok(vec![market()]));
        exchange
            .expect_market_prices()
            .with(eq("1.234"))
            .returning(|_| {
                Ok(MarketPrices {
                    market_id: "1.234".into(),
                    runners: vec![RunnerPrice {
                        selection_id: "101".into(),
                        back_price: Some(dec!(2.0)),
                    }],
                })
            });
        exchange
            .expect_place_back_bet()
            .times(1)
            .returning(|_, _, _, _, _| {
                Ok(PlacementResult {
                    order_ref: "bf-order-1".into(),
                    matched: true,
                    average_price: None,
                })
            });

        let orch = orchestrator(exchange, store.clone());
        let outcome = orch.run_cycle().await;

        assert!(outcome.success);
        assert_eq!(outcome.teams_checked, 1);
        assert_eq!(outcome.matches_found, 1);
        assert_eq!(outcome.bets_placed, 1);
        assert_eq!(outcome.total_staked, dec!(100.00));
        assert!(outcome.errors.is_empty());

        let bets = store.ledger().recent_bets(10).await.unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].status, BetStatus::Matched);
        assert_eq!(bets[0].order_ref.as_deref(), Some("bf-order-1"));
        assert_eq!(bets[0].stake, dec!(100.00));

        let loaded = store.get(&team.id).await.unwrap();
        assert_eq!(loaded.last_stake, dec!(100.00));
    }

    #[tokio::test]
    async fn test_matched_price_reprices_bet() {
        let team = Team::new("Arsenal", "1");
        let store = store_with(&team, &scheduled("Arsenal", Some(dec!(2.0)))).await;

        let mut exchange = MockMarketDataProvider::new();
        exchange
            .expect_search_events()
            .returning(|_, _| Ok(vec![event()]));
        exchange
            .expect_list_markets()
            .returning(|_| Ok(vec![market()]));
        // Filled at a better price than requested.
        exchange
            .expect_place_back_bet()
            .returning(|_, _, _, _, _| {
                Ok(PlacementResult {
                    order_ref: "bf-order-5".into(),
                    matched: true,
                    average_price: Some(dec!(2.1)),
                })
            });

        orchestrator(exchange, store.clone()).run_cycle().await;

        // Odds and potential profit move together to the fill price.
        let bets = store.ledger().recent_bets(10).await.unwrap();
        assert_eq!(bets[0].odds, dec!(2.1));
        assert_eq!(bets[0].potential_profit, dec!(110.00));
    }

    #[tokio::test]
    async fn test_recovery_stake_uses_ledger_odds() {
        let mut team = Team::new("Arsenal", "1");
        team.cumulative_loss = dec!(100);
        team.progression_step = 1;
        // Odds captured in the schedule, so no live quote is needed.
        let store = store_with(&team, &scheduled("Arsenal", Some(dec!(1.5)))).await;

        let mut exchange = MockMarketDataProvider::new();
        exchange
            .expect_search_events()
            .returning(|_, _| Ok(vec![event()]));
        exchange
            .expect_list_markets()
            .returning(|_| Ok(vec![market()]));
        exchange.expect_market_prices().times(0);
        exchange
            .expect_place_back_bet()
            .withf(|_, _, odds, stake, _| *odds == dec!(1.5) && *stake == dec!(400.00))
            .returning(|_, _, _, _, _| {
                Ok(PlacementResult {
                    order_ref: "bf-order-2".into(),
                    matched: false,
                    average_price: None,
                })
            });

        let outcome = orchestrator(exchange, store).run_cycle().await;
        assert_eq!(outcome.bets_placed, 1);
        assert_eq!(outcome.total_staked, dec!(400.00));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let team = Team::new("Arsenal", "1");
        let store = store_with(&team, &scheduled("Arsenal", Some(dec!(2.0)))).await;

        let mut exchange = MockMarketDataProvider::new();
        exchange
            .expect_search_events()
            .returning(|_, _| Ok(vec![event()]));
        exchange
            .expect_list_markets()
            .returning(|_| Ok(vec![market()]));
        // Exactly one order over two runs.
        exchange
            .expect_place_back_bet()
            .times(1)
            .returning(|_, _, _, _, _| {
                Ok(PlacementResult {
                    order_ref: "bf-order-3".into(),
                    matched: false,
                    average_price: None,
                })
            });

        let orch = orchestrator(exchange, store.clone());
        let first = orch.run_cycle().await;
        let second = orch.run_cycle().await;

        assert_eq!(first.bets_placed, 1);
        assert_eq!(second.bets_placed, 0);
        assert_eq!(store.ledger().recent_bets(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_loss_team_is_skipped() {
        let mut team = Team::new("Arsenal", "1");
        team.cumulative_loss = dec!(5000);
        team.progression_step = 7;
        let store = store_with(&team, &scheduled("Arsenal", Some(dec!(2.0)))).await;

        let mut exchange = MockMarketDataProvider::new();
        exchange
            .expect_search_events()
            .returning(|_, _| Ok(vec![event()]));
        exchange
            .expect_list_markets()
            .returning(|_| Ok(vec![market()]));
        exchange.expect_place_back_bet().times(0);

        let outcome = orchestrator(exchange, store.clone()).run_cycle().await;

        assert!(outcome.success);
        assert_eq!(outcome.matches_found, 1);
        assert_eq!(outcome.bets_placed, 0);
        // Stop-loss is a skip, not an error, and mutates nothing.
        assert!(outcome.errors.is_empty());
        let loaded = store.get(&team.id).await.unwrap();
        assert_eq!(loaded.version, 0);
    }

    #[tokio::test]
    async fn test_unmatched_fixture_side_recorded_as_error() {
        let team = Team::new("Real Madrid", "1");
        let mut m = scheduled("Real Madrid", Some(dec!(2.0)));
        m.home_team = "Arsenal".into();
        m.away_team = "Chelsea".into();
        let store = store_with(&team, &m).await;

        let mut exchange = MockMarketDataProvider::new();
        exchange.expect_place_back_bet().times(0);

        let outcome = orchestrator(exchange, store).run_cycle().await;
        assert!(outcome.success);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("Real Madrid"));
    }

    #[tokio::test]
    async fn test_placement_failure_marks_bet_error_and_continues() {
        let team = Team::new("Arsenal", "1");
        let store = store_with(&team, &scheduled("Arsenal", Some(dec!(2.0)))).await;

        let mut exchange = MockMarketDataProvider::new();
        exchange
            .expect_search_events()
            .returning(|_, _| Ok(vec![event()]));
        exchange
            .expect_list_markets()
            .returning(|_| Ok(vec![market()]));
        exchange
            .expect_place_back_bet()
            .returning(|_, _, _, _, _| Err(PunterError::Placement("INSUFFICIENT_FUNDS".into())));

        let outcome = orchestrator(exchange, store.clone()).run_cycle().await;

        assert!(outcome.success);
        assert_eq!(outcome.bets_placed, 0);
        assert_eq!(outcome.errors.len(), 1);

        let bets = store.ledger().recent_bets(10).await.unwrap();
        assert_eq!(bets[0].status, BetStatus::Error);
    }

    #[tokio::test]
    async fn test_connectivity_failure_aborts_cycle() {
        let team = Team::new("Arsenal", "1");
        let store = store_with(&team, &scheduled("Arsenal", Some(dec!(2.0)))).await;

        let mut exchange = MockMarketDataProvider::new();
        exchange.expect_search_events().returning(|_, _| {
            Err(PunterError::Connectivity {
                service: "betfair".into(),
                message: "connection refused".into(),
            })
        });

        let outcome = orchestrator(exchange, store).run_cycle().await;
        assert!(!outcome.success);
        assert_eq!(outcome.bets_placed, 0);
    }

    #[tokio::test]
    async fn test_search_falls_back_to_stripped_term() {
        let team = Team::new("Brentford FC", "1");
        let mut m = scheduled("Brentford FC", Some(dec!(2.0)));
        m.home_team = "Brentford".into();
        m.away_team = "Fulham".into();
        let store = store_with(&team, &m).await;

        let mut exchange = MockMarketDataProvider::new();
        exchange
            .expect_search_events()
            .with(eq("1"), eq("Brentford FC"))
            .returning(|_, _| Ok(vec![]));
        exchange
            .expect_search_events()
            .with(eq("1"), eq("Brentford"))
            .returning(|_, _| {
                Ok(vec![EventSummary {
                    id: "evt-9".into(),
                    name: "Brentford v Fulham".into(),
                    country_code: None,
                    open_date: None,
                }])
            });
        exchange.expect_list_markets().returning(|_| {
            Ok(vec![MarketSummary {
                market_id: "1.999".into(),
                market_name: "Match Odds".into(),
                runners: vec![RunnerSummary {
                    selection_id: "201".into(),
                    runner_name: "Brentford".into(),
                }],
            }])
        });
        exchange
            .expect_place_back_bet()
            .times(1)
            .returning(|_, _, _, _, _| {
                Ok(PlacementResult {
                    order_ref: "bf-order-4".into(),
                    matched: false,
                    average_price: None,
                })
            });

        let outcome = orchestrator(exchange, store).run_cycle().await;
        assert_eq!(outcome.bets_placed, 1);
    }

    #[tokio::test]
    async fn test_dry_run_places_nothing() {
        let team = Team::new("Arsenal", "1");
        let store = store_with(&team, &scheduled("Arsenal", Some(dec!(2.0)))).await;

        let mut exchange = MockMarketDataProvider::new();
        exchange
            .expect_search_events()
            .returning(|_, _| Ok(vec![event()]));
        exchange
            .expect_list_markets()
            .returning(|_| Ok(vec![market()]));
        exchange.expect_place_back_bet().times(0);

        let orch = CycleOrchestrator::new(
            Arc::new(exchange),
            store.clone(),
            Arc::new(LogSink),
            StakingCalculator::new(StakingConfig::default()),
            true,
        );
        let outcome = orch.run_cycle().await;

        assert_eq!(outcome.bets_placed, 1);
        assert!(store.ledger().recent_bets(10).await.unwrap().is_empty());
    }
}
