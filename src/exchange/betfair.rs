//! Betfair Exchange integration.
//!
//! Implements `MarketDataProvider` against the Betfair Exchange API
//! (JSON-RPC over REST).
//!
//! Betting API base: https://api.betfair.com/exchange/betting/rest/v1.0/
//! Auth: https://identitysso.betfair.com/api/login
//!
//! Auth requires an App Key plus a session token obtained via
//! username/password login. Headers: `X-Application: {app_key}`,
//! `X-Authentication: {session_token}`. Sessions expire server-side;
//! a 401 triggers one transparent re-login and retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{
    EventSummary, MarketDataProvider, MarketPrices, MarketSummary, PlacementResult, RunnerPrice,
    RunnerSummary, SettlementRecord,
};
use crate::types::PunterError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const AUTH_URL: &str = "https://identitysso.betfair.com/api/login";
const BETTING_URL: &str = "https://api.betfair.com/exchange/betting/rest/v1.0";
const EXCHANGE_NAME: &str = "betfair";

/// Maximum results per catalogue request.
const DEFAULT_FETCH_LIMIT: u32 = 100;

/// Only match-odds markets are of interest.
const MARKET_TYPE: &str = "MATCH_ODDS";

/// Transport-level retry budget per API call.
const MAX_TRANSPORT_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Betfair API types
// ---------------------------------------------------------------------------

/// Login response from the SSO endpoint.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "sessionToken")]
    session_token: Option<String>,
    #[serde(rename = "loginStatus")]
    login_status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventResult {
    event: EventInfo,
    #[serde(default)]
    #[allow(dead_code)]
    market_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventInfo {
    id: String,
    name: String,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    open_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketCatalogue {
    market_id: String,
    market_name: String,
    #[serde(default)]
    runners: Vec<RunnerCatalogue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerCatalogue {
    selection_id: u64,
    runner_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketBook {
    market_id: String,
    #[serde(default)]
    runners: Vec<RunnerBook>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerBook {
    selection_id: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    ex: Option<ExchangePrices>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangePrices {
    #[serde(default)]
    available_to_back: Vec<PriceSize>,
}

#[derive(Debug, Deserialize)]
struct PriceSize {
    price: f64,
    #[allow(dead_code)]
    size: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrdersResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    instruction_reports: Vec<InstructionReport>,
    #[serde(default)]
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstructionReport {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    bet_id: Option<String>,
    #[serde(default)]
    average_price_matched: Option<f64>,
    #[serde(default)]
    size_matched: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentOrdersResponse {
    #[serde(default)]
    current_orders: Vec<CurrentOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentOrder {
    bet_id: String,
    #[serde(default)]
    size_matched: Option<f64>,
    #[serde(default)]
    average_price_matched: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearedOrdersResponse {
    #[serde(default)]
    cleared_orders: Vec<ClearedOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearedOrder {
    bet_id: String,
    market_id: String,
    selection_id: u64,
    #[serde(default)]
    profit: Option<f64>,
    #[serde(default)]
    settled_date: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Betfair Exchange client.
pub struct BetfairClient {
    http: Client,
    app_key: String,
    session_token: std::sync::RwLock<Option<String>>,
    username: String,
    password: SecretString,
}

impl BetfairClient {
    pub fn new(
        app_key: String,
        username: String,
        password: SecretString,
    ) -> Result<Self, PunterError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("PUNTER/0.1.0 (exchange-staking-engine)")
            .build()
            .map_err(|e| PunterError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            app_key,
            session_token: std::sync::RwLock::new(None),
            username,
            password,
        })
    }

    fn connectivity(context: &str, e: impl std::fmt::Display) -> PunterError {
        PunterError::Connectivity {
            service: EXCHANGE_NAME.to_string(),
            message: format!("{context}: {e}"),
        }
    }

    // -- Authentication ----------------------------------------------------

    /// Authenticate with Betfair SSO and store the session token.
    async fn login(&self) -> Result<(), PunterError> {
        info!("Authenticating with Betfair...");

        let resp = self
            .http
            .post(AUTH_URL)
            .header("X-Application", &self.app_key)
            .header("Accept", "application/json")
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(|e| Self::connectivity("login request failed", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Self::connectivity("login failed", status));
        }

        let login: LoginResponse = resp
            .json()
            .await
            .map_err(|e| Self::connectivity("failed to parse login response", e))?;

        if login.login_status != "SUCCESS" {
            return Err(Self::connectivity("login rejected", login.login_status));
        }

        let token = login.session_token.ok_or_else(|| {
            Self::connectivity("login", "succeeded but no session token returned")
        })?;

        {
            let mut guard = self.session_token.write().unwrap();
            *guard = Some(token);
        }

        info!("Betfair authentication successful");
        Ok(())
    }

    /// Get a valid session token, logging in if necessary.
    async fn ensure_session(&self) -> Result<String, PunterError> {
        {
            let guard = self.session_token.read().unwrap();
            if let Some(ref token) = *guard {
                return Ok(token.clone());
            }
        }
        self.login().await?;
        let guard = self.session_token.read().unwrap();
        guard
            .clone()
            .ok_or_else(|| Self::connectivity("session", "token missing after login"))
    }

    // -- API helpers -------------------------------------------------------

    /// Authenticated POST to the Betting API.
    ///
    /// Transport failures are retried up to `MAX_TRANSPORT_ATTEMPTS`
    /// times with exponential backoff. Safe for placeOrders too: the
    /// customerRef makes a retried submission idempotent. A 401 gets
    /// one transparent re-login on top of that.
    async fn betting_api<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, PunterError> {
        let mut token = self.ensure_session().await?;
        let url = format!("{BETTING_URL}/{endpoint}/");
        let mut reauthed = false;

        debug!(url = %url, "Betfair API request");

        for attempt in 1..=MAX_TRANSPORT_ATTEMPTS {
            let sent = self
                .http
                .post(&url)
                .header("X-Application", &self.app_key)
                .header("X-Authentication", &token)
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            let resp = match sent {
                Ok(resp) => resp,
                Err(e) => {
                    if attempt == MAX_TRANSPORT_ATTEMPTS {
                        return Err(Self::connectivity(endpoint, e));
                    }
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                    warn!(endpoint, attempt, error = %e, "Betfair request failed, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            if resp.status() == reqwest::StatusCode::UNAUTHORIZED && !reauthed {
                // Session expired — clear token and re-login once.
                {
                    let mut guard = self.session_token.write().unwrap();
                    *guard = None;
                }
                warn!("Betfair session expired, re-authenticating...");
                token = self.ensure_session().await?;
                reauthed = true;
                continue;
            }

            if !resp.status().is_success() {
                return Err(Self::connectivity(endpoint, resp.status()));
            }

            return resp
                .json()
                .await
                .map_err(|e| Self::connectivity(endpoint, e));
        }

        Err(Self::connectivity(endpoint, "retry budget exhausted"))
    }

    // -- Conversion helpers ------------------------------------------------

    fn parse_time(s: Option<&str>) -> Option<DateTime<Utc>> {
        s.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Look up a live order by the customerOrderRef it was placed
    /// under. Recovers the exchange bet id when placeOrders reports a
    /// duplicate transaction, so the settlement feed (keyed by bet id)
    /// can still match it.
    async fn order_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> Result<Option<PlacementResult>, PunterError> {
        let body = serde_json::json!({
            "customerOrderRefs": [customer_ref],
            "orderProjection": "ALL"
        });

        let resp: CurrentOrdersResponse = self.betting_api("listCurrentOrders", &body).await?;

        Ok(resp.current_orders.into_iter().next().map(|o| PlacementResult {
            order_ref: o.bet_id,
            matched: o.size_matched.unwrap_or(0.0) > 0.0,
            average_price: o
                .average_price_matched
                .filter(|p| *p > 0.0)
                .and_then(Decimal::from_f64),
        }))
    }

    fn best_back_price(runner: &RunnerBook) -> Option<Decimal> {
        if runner.status.as_deref() != Some("ACTIVE") && runner.status.is_some() {
            return None;
        }
        runner
            .ex
            .as_ref()
            .and_then(|ex| ex.available_to_back.first())
            .and_then(|ps| Decimal::from_f64(ps.price))
    }
}

// ---------------------------------------------------------------------------
// MarketDataProvider trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketDataProvider for BetfairClient {
    async fn search_events(
        &self,
        sport_id: &str,
        term: &str,
    ) -> Result<Vec<EventSummary>, PunterError> {
        let now = Utc::now();
        let from = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        // Only today's fixtures are placement candidates.
        let to = (now + chrono::Duration::days(1))
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string();

        let body = serde_json::json!({
            "filter": {
                "eventTypeIds": [sport_id],
                "textQuery": term,
                "marketStartTime": { "from": from, "to": to }
            }
        });

        let results: Vec<EventResult> = self.betting_api("listEvents", &body).await?;

        Ok(results
            .into_iter()
            .map(|r| EventSummary {
                id: r.event.id,
                name: r.event.name,
                country_code: r.event.country_code,
                open_date: Self::parse_time(r.event.open_date.as_deref()),
            })
            .collect())
    }

    async fn list_markets(&self, event_id: &str) -> Result<Vec<MarketSummary>, PunterError> {
        let body = serde_json::json!({
            "filter": {
                "eventIds": [event_id],
                "marketTypeCodes": [MARKET_TYPE]
            },
            "maxResults": DEFAULT_FETCH_LIMIT,
            "marketProjection": ["RUNNER_DESCRIPTION"]
        });

        let catalogues: Vec<MarketCatalogue> =
            self.betting_api("listMarketCatalogue", &body).await?;

        Ok(catalogues
            .into_iter()
            .map(|c| MarketSummary {
                market_id: c.market_id,
                market_name: c.market_name,
                runners: c
                    .runners
                    .into_iter()
                    .map(|r| RunnerSummary {
                        selection_id: r.selection_id.to_string(),
                        runner_name: r.runner_name,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn market_prices(&self, market_id: &str) -> Result<MarketPrices, PunterError> {
        let body = serde_json::json!({
            "marketIds": [market_id],
            "priceProjection": {
                "priceData": ["EX_BEST_OFFERS"],
                "virtualise": false
            }
        });

        let books: Vec<MarketBook> = self.betting_api("listMarketBook", &body).await?;
        let book = books
            .into_iter()
            .next()
            .ok_or_else(|| Self::connectivity("listMarketBook", "no market book returned"))?;

        Ok(MarketPrices {
            market_id: book.market_id.clone(),
            runners: book
                .runners
                .iter()
                .map(|r| RunnerPrice {
                    selection_id: r.selection_id.to_string(),
                    back_price: Self::best_back_price(r),
                })
                .collect(),
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
        let selection: u64 = selection_id
            .parse()
            .map_err(|_| PunterError::Placement(format!("bad selection id: {selection_id}")))?;

        let body = serde_json::json!({
            "marketId": market_id,
            "customerRef": customer_ref,
            "instructions": [{
                "orderType": "LIMIT",
                "selectionId": selection,
                "side": "BACK",
                "customerOrderRef": customer_ref,
                "limitOrder": {
                    "size": stake.to_f64().unwrap_or(0.0),
                    "price": odds.to_f64().unwrap_or(0.0),
                    "persistenceType": "LAPSE"
                }
            }]
        });

        let resp: PlaceOrdersResponse = self.betting_api("placeOrders", &body).await?;

        if let Some(ref error_code) = resp.error_code {
            // DUPLICATE_TRANSACTION means this customerRef was already
            // accepted. The order exists; look up its real bet id, or
            // the settlement feed can never match it.
            if error_code == "DUPLICATE_TRANSACTION" {
                warn!(customer_ref, "Order already placed under this reference");
                return match self.order_by_customer_ref(customer_ref).await? {
                    Some(placement) => Ok(placement),
                    None => Err(PunterError::Placement(
                        "duplicate transaction but no matching current order".into(),
                    )),
                };
            }
            return Err(PunterError::Placement(format!(
                "placeOrders error: {error_code}"
            )));
        }

        if resp.status.as_deref() == Some("FAILURE") {
            let instruction_error = resp
                .instruction_reports
                .first()
                .and_then(|r| r.error_code.as_deref())
                .unwrap_or("UNKNOWN");
            return Err(PunterError::Placement(format!(
                "order refused: {instruction_error}"
            )));
        }

        let report = resp
            .instruction_reports
            .first()
            .ok_or_else(|| PunterError::Placement("no instruction report returned".into()))?;

        if report.status.as_deref() != Some("SUCCESS") {
            let code = report.error_code.as_deref().unwrap_or("UNKNOWN");
            return Err(PunterError::Placement(format!("instruction failed: {code}")));
        }

        let order_ref = report
            .bet_id
            .clone()
            .ok_or_else(|| PunterError::Placement("no bet id in instruction report".into()))?;

        let matched = report.size_matched.unwrap_or(0.0) > 0.0;
        let average_price = report
            .average_price_matched
            .filter(|p| *p > 0.0)
            .and_then(Decimal::from_f64);

        info!(
            order_ref = %order_ref,
            market_id = %market_id,
            stake = %stake,
            odds = %odds,
            matched,
            "Betfair order placed"
        );

        Ok(PlacementResult {
            order_ref,
            matched,
            average_price,
        })
    }

    async fn settled_orders(&self, days: u32) -> Result<Vec<SettlementRecord>, PunterError> {
        let now = Utc::now();
        let from = (now - chrono::Duration::days(days as i64))
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string();

        let body = serde_json::json!({
            "betStatus": "SETTLED",
            "settledDateRange": { "from": from },
            "groupBy": "BET",
            "includeItemDescription": false
        });

        let resp: ClearedOrdersResponse = self.betting_api("listClearedOrders", &body).await?;

        Ok(resp
            .cleared_orders
            .into_iter()
            .map(|o| SettlementRecord {
                order_ref: o.bet_id,
                market_id: o.market_id,
                selection_id: o.selection_id.to_string(),
                profit: o
                    .profit
                    .and_then(Decimal::from_f64)
                    .unwrap_or(Decimal::ZERO)
                    .round_dp(2),
                settled_at: Self::parse_time(o.settled_date.as_deref()),
            })
            .collect())
    }

    fn name(&self) -> &str {
        EXCHANGE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
