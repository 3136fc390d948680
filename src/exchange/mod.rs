//! Exchange integrations.
//!
//! Defines the `MarketDataProvider` trait and provides the Betfair
//! implementation. The engine only talks to the exchange through this
//! trait, so tests swap in a mock without touching the job code.

pub mod betfair;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::PunterError;

/// An upcoming event returned by an event search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: String,
    pub name: String,
    pub country_code: Option<String>,
    pub open_date: Option<DateTime<Utc>>,
}

/// A market listed under an event, with its runners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    pub market_id: String,
    pub market_name: String,
    pub runners: Vec<RunnerSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSummary {
    pub selection_id: String,
    pub runner_name: String,
}

/// Best available back price for one runner of a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerPrice {
    pub selection_id: String,
    pub back_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPrices {
    pub market_id: String,
    pub runners: Vec<RunnerPrice>,
}

impl MarketPrices {
    pub fn back_price_for(&self, selection_id: &str) -> Option<Decimal> {
        self.runners
            .iter()
            .find(|r| r.selection_id == selection_id)
            .and_then(|r| r.back_price)
    }
}

/// Exchange acknowledgement of a placed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementResult {
    pub order_ref: String,
    pub matched: bool,
    /// Price the order actually matched at, when reported.
    pub average_price: Option<Decimal>,
}

/// One cleared (settled) order from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub order_ref: String,
    pub market_id: String,
    pub selection_id: String,
    /// Signed profit. Positive means the bet won.
    pub profit: Decimal,
    pub settled_at: Option<DateTime<Utc>>,
}

impl SettlementRecord {
    pub fn is_win(&self) -> bool {
        self.profit > Decimal::ZERO
    }
}

/// Abstraction over a betting exchange.
///
/// Implementors provide event discovery, market pricing, order
/// placement and settlement lookup. All methods surface
/// `PunterError::Connectivity` for transport failures so callers can
/// distinguish an unreachable exchange from a domain refusal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Search upcoming events matching a free-text term within the
    /// given sport.
    async fn search_events(
        &self,
        sport_id: &str,
        term: &str,
    ) -> Result<Vec<EventSummary>, PunterError>;

    /// List match-odds markets for an event.
    async fn list_markets(&self, event_id: &str) -> Result<Vec<MarketSummary>, PunterError>;

    /// Current best back prices for a market.
    async fn market_prices(&self, market_id: &str) -> Result<MarketPrices, PunterError>;

    /// Place a back bet. `customer_ref` is the caller's idempotency
    /// key; submitting the same ref twice must not create two orders.
    async fn place_back_bet(
        &self,
        market_id: &str,
        selection_id: &str,
        odds: Decimal,
        stake: Decimal,
        customer_ref: &str,
    ) -> Result<PlacementResult, PunterError>;

    /// Orders cleared within the last `days` days.
    async fn settled_orders(&self, days: u32) -> Result<Vec<SettlementRecord>, PunterError>;

    /// Exchange name for logging and identification.
    fn name(&self) -> &str;
}

/// Search-term candidates for a team, most specific first. Exchange
/// event names rarely carry the full club name ("Brentford FC"), so
/// after the verbatim name we retry with common suffixes stripped.
pub fn search_terms(team_name: &str) -> Vec<String> {
    const SUFFIXES: &[&str] = &[" United FC", " United", " FC"];
    let mut terms = vec![team_name.to_string()];
    for suffix in SUFFIXES {
        if let Some(stripped) = team_name.strip_suffix(suffix) {
            terms.push(stripped.to_string());
            break;
        }
    }
    terms
}
