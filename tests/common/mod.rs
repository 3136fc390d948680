//! Mock exchange for integration testing.
//!
//! Provides a deterministic `MarketDataProvider` implementation with
//! known fixtures, idempotent placement, and a controllable settlement
//! queue. All state is in-memory.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

use punter::exchange::{
    EventSummary, MarketDataProvider, MarketPrices, MarketSummary, PlacementResult, RunnerPrice,
    RunnerSummary, SettlementRecord,
};
use punter::types::PunterError;

/// One fixture the mock can discover: an event with a single
/// match-odds market and both runners priced.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub event_id: String,
    pub event_name: String,
    pub market_id: String,
    pub home_runner: String,
    pub away_runner: String,
    pub back_price: Decimal,
}

impl Fixture {
    pub fn new(n: u32, home: &str, away: &str, back_price: Decimal) -> Self {
        Self {
            event_id: format!("ev-{n}"),
            event_name: format!("{home} v {away}"),
            market_id: format!("1.{}", 1000 + n),
            home_runner: home.to_string(),
            away_runner: away.to_string(),
            back_price,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub customer_ref: String,
    pub market_id: String,
    pub selection_id: String,
    pub odds: Decimal,
    pub stake: Decimal,
}

/// A mock betting exchange for deterministic testing.
pub struct MockExchange {
    fixtures: Mutex<Vec<Fixture>>,
    placements: Arc<Mutex<Vec<PlacedOrder>>>,
    settlements: Arc<Mutex<Vec<SettlementRecord>>>,
    /// If set, all operations return a connectivity error.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            fixtures: Mutex::new(Vec::new()),
            placements: Arc::new(Mutex::new(Vec::new())),
            settlements: Arc::new(Mutex::new(Vec::new())),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn add_fixture(&self, fixture: Fixture) {
        self.fixtures.lock().unwrap().push(fixture);
    }

    /// Force all subsequent operations to fail as unreachable.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// All orders accepted so far, duplicates excluded.
    pub fn placements(&self) -> Vec<PlacedOrder> {
        self.placements.lock().unwrap().clone()
    }

    /// Queue a settlement for the order with the given customer ref.
    /// `profit` is signed; positive means the bet won.
    pub fn settle(&self, customer_ref: &str, profit: Decimal) {
        let order = self
            .placements
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.customer_ref == customer_ref)
            .cloned()
            .expect("settling an order that was never placed");

        self.settlements.lock().unwrap().push(SettlementRecord {
            order_ref: Self::order_ref(customer_ref),
            market_id: order.market_id,
            selection_id: order.selection_id,
            profit,
            settled_at: Some(chrono::Utc::now()),
        });
    }

    fn order_ref(customer_ref: &str) -> String {
        format!("O-{customer_ref}")
    }

    fn check_error(&self) -> Result<(), PunterError> {
        if let Some(msg) = self.force_error.lock().unwrap().as_ref() {
            return Err(PunterError::Connectivity {
                service: "mock".into(),
                message: msg.clone(),
            });
        }
        Ok(())
    }

    fn find_fixture<F>(&self, pred: F) -> Option<Fixture>
    where
        F: Fn(&Fixture) -> bool,
    {
        self.fixtures.lock().unwrap().iter().find(|f| pred(f)).cloned()
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for MockExchange {
    async fn search_events(
        &self,
        _sport_id: &str,
        term: &str,
    ) -> Result<Vec<EventSummary>, PunterError> {
        self.check_error()?;
        let term = term.to_lowercase();
        Ok(self
            .fixtures
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.event_name.to_lowercase().contains(&term))
            .map(|f| EventSummary {
                id: f.event_id.clone(),
                name: f.event_name.clone(),
                country_code: Some("GB".into()),
                open_date: Some(chrono::Utc::now()),
            })
            .collect())
    }

    async fn list_markets(&self, event_id: &str) -> Result<Vec<MarketSummary>, PunterError> {
        self.check_error()?;
        Ok(self
            .find_fixture(|f| f.event_id == event_id)
            .map(|f| MarketSummary {
                market_id: f.market_id.clone(),
                market_name: "Match Odds".into(),
                runners: vec![
                    RunnerSummary {
                        selection_id: format!("{}-home", f.market_id),
                        runner_name: f.home_runner.clone(),
                    },
                    RunnerSummary {
                        selection_id: format!("{}-away", f.market_id),
                        runner_name: f.away_runner.clone(),
                    },
                ],
            })
            .into_iter()
            .collect())
    }

    async fn market_prices(&self, market_id: &str) -> Result<MarketPrices, PunterError> {
        self.check_error()?;
        let fixture = self
            .find_fixture(|f| f.market_id == market_id)
            .ok_or_else(|| PunterError::Resolution(format!("unknown market {market_id}")))?;

        Ok(MarketPrices {
            market_id: fixture.market_id.clone(),
            runners: vec![
                RunnerPrice {
                    selection_id: format!("{}-home", fixture.market_id),
                    back_price: Some(fixture.back_price),
                },
                RunnerPrice {
                    selection_id: format!("{}-away", fixture.market_id),
                    back_price: Some(fixture.back_price),
                },
            ],
        })
    }

    async fn place_back_bet(
        &self,
        market_id: &str,
        selection_id: &str,
        odds: Decimal,
        stake: Decimal,
        customer_ref: &str,
    ) -> Result<PlacementResult, PunterError> {
        self.check_error()?;

        // Idempotent on customer_ref, like the real exchange.
        let mut placements = self.placements.lock().unwrap();
        if !placements.iter().any(|p| p.customer_ref == customer_ref) {
            placements.push(PlacedOrder {
                customer_ref: customer_ref.to_string(),
                market_id: market_id.to_string(),
                selection_id: selection_id.to_string(),
                odds,
                stake,
            });
        }

        Ok(PlacementResult {
            order_ref: Self::order_ref(customer_ref),
            matched: true,
            average_price: None,
        })
    }

    async fn settled_orders(&self, _days: u32) -> Result<Vec<SettlementRecord>, PunterError> {
        self.check_error()?;
        Ok(self.settlements.lock().unwrap().clone())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
