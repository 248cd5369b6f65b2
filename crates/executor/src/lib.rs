//! # Executor
//!
//! Order sequences that move capital: the protected buy, cancel-and-replace of
//! a protective order, and cancel-and-sell liquidation. Each sequence returns a
//! typed outcome so callers can tell "nothing happened" apart from "capital is
//! exposed".
//!
//! The account summary used by the pre-trade checks also lives here.

pub mod error;
pub mod exchange;
pub mod portfolio;

pub use error::{ExecutorError, LiquidationError, ReplaceError};
pub use exchange::{ExecutionOutcome, ExecutionReport, TradeExecutor};
pub use portfolio::{fetch_account_summary, AccountSummary, HeldAsset};
