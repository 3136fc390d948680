//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Exchange credentials are referenced by env-var name in the config
//! and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::staking::StakingConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub staking: StakingSection,
    pub exchange: ExchangeConfig,
    pub ledger: LedgerConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub name: String,
    /// Local time of day the placement cycle fires, "HH:MM".
    pub cycle_time: String,
    /// Offset of that local time from UTC, in minutes.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Minutes between reconciliation runs.
    pub reconcile_interval_mins: u64,
    /// Log placements without sending orders.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StakingSection {
    pub initial_stake: Decimal,
    pub target_profit: Decimal,
    pub max_progression_steps: u32,
}

impl Default for StakingSection {
    fn default() -> Self {
        Self {
            initial_stake: dec!(100),
            target_profit: dec!(100),
            max_progression_steps: 7,
        }
    }
}

impl From<StakingSection> for StakingConfig {
    fn from(s: StakingSection) -> Self {
        Self {
            initial_stake: s.initial_stake,
            target_profit: s.target_profit,
            max_progression_steps: s.max_progression_steps,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    /// Betfair event type id; "1" is soccer.
    pub sport_id: String,
    /// Days of cleared orders fetched per reconciliation.
    pub settlement_lookback_days: u32,
    pub app_key_env: String,
    pub username_env: String,
    pub password_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Exchange credentials resolved from the environment.
pub struct ExchangeCredentials {
    pub app_key: String,
    pub username: String,
    pub password: SecretString,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        Self::parse_cycle_time(&self.bot.cycle_time)
            .with_context(|| format!("Bad cycle_time '{}'", self.bot.cycle_time))?;
        anyhow::ensure!(
            self.staking.max_progression_steps > 0,
            "max_progression_steps must be at least 1"
        );
        anyhow::ensure!(
            self.staking.initial_stake > Decimal::ZERO,
            "initial_stake must be positive"
        );
        anyhow::ensure!(
            self.bot.reconcile_interval_mins > 0,
            "reconcile_interval_mins must be at least 1"
        );
        Ok(())
    }

    /// Parse "HH:MM" into (hour, minute).
    pub fn parse_cycle_time(s: &str) -> Result<(u32, u32)> {
        let (h, m) = s
            .split_once(':')
            .context("expected HH:MM")?;
        let hour: u32 = h.parse().context("bad hour")?;
        let minute: u32 = m.parse().context("bad minute")?;
        anyhow::ensure!(hour < 24 && minute < 60, "time out of range");
        Ok((hour, minute))
    }

    /// Resolve the exchange credentials named by the config.
    pub fn exchange_credentials(&self) -> Result<ExchangeCredentials> {
        Ok(ExchangeCredentials {
            app_key: Self::resolve_env(&self.exchange.app_key_env)?,
            username: Self::resolve_env(&self.exchange.username_env)?,
            password: SecretString::new(Self::resolve_env(&self.exchange.password_env)?),
        })
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
