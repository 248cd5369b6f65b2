//! # Signal Evaluation
//!
//! This crate decides whether a published signal should be entered right now.
//!
//! - **Pure logic:** no database, API or execution knowledge. The caller fetches
//!   the current price and hands it in, so evaluation can be re-run on every
//!   poll without side effects.
//! - **Strategy agnostic callers:** the engine works against `EntryStrategy`,
//!   not a concrete rule set.

pub mod error;
pub mod retrace_entry;

pub use error::StrategyError;
pub use retrace_entry::RetraceEntry;

use chrono::{DateTime, Utc};
use core_types::{Signal, TradeDecision};
use rust_decimal::Decimal;

pub trait EntryStrategy: Send + Sync {
    /// Checks that need no market data.
    ///
    /// Returns the symbol to price on success, or the terminal `Fail` decision.
    fn screen<'a>(&self, signal: &'a Signal, now: DateTime<Utc>) -> Result<&'a str, TradeDecision>;

    /// Full evaluation. `current_price` is `None` when the price could not be fetched.
    fn evaluate(
        &self,
        signal: &Signal,
        current_price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> TradeDecision;
}
