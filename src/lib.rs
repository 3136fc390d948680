//! PUNTER — Exchange Betting Automation Engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod staking;
pub mod exchange;
pub mod ledger;
pub mod store;
pub mod notify;
pub mod engine;
pub mod scheduler;
pub mod dashboard;
