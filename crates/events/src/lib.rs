//! # Notifications
//!
//! The messages the engine emits when positions open, close, or are left
//! exposed. Sinks (the Telegram alerter, logs) subscribe to a broadcast
//! channel of [`Notification`]s.
//!
//! Depends only on `core-types`.

// Declare the modules that make up this crate.
pub mod error;
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use error::EventsError;
pub use messages::{Notification, NotificationKind};
