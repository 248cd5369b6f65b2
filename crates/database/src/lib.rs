//! # Database Crate
//!
//! The engine's persistent record of accounts, signals and trades, on PostgreSQL.
//!
//! ## Architectural Principles
//!
//! - **Adapter:** all SQL lives here. The rest of the application talks to the
//!   [`TradeStore`] trait, which tests replace with an in-memory store.
//! - **Asynchronous & Pooled:** All operations are asynchronous and share a
//!   connection pool (`PgPool`).
//! - **Terminal states are enforced in SQL:** closing only ever matches
//!   `ACTIVE` rows.
//!
//! ## Public API
//!
//! - `connect` / `run_migrations`: pool setup and embedded schema migrations.
//! - `TradeStore` / `Account`: the persistence contract.
//! - `DbRepository`: the PostgreSQL implementation.
//! - `DbError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod repository;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use repository::DbRepository;
pub use store::{Account, TradeStore};
