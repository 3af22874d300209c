//! ring-trader: bridge-currency ring arbitrage trader.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod shutdown;
pub mod exchange;
pub mod storage;
pub mod strategy;
pub mod engine;
pub mod dashboard;
