//! Capital and position policies: whether a trade may be opened, when a
//! stop should trail, when a position is stuck, and which positions may be
//! swapped out for better candidates.
//!
//! Everything here is pure. Callers gather exchange state and act on the verdicts.

pub mod eligibility;
pub mod error;
pub mod stuck;
pub mod swap;
pub mod trailing;

pub use eligibility::{check_eligibility, Eligibility, EligibilityContext};
pub use error::RiskError;
pub use stuck::StuckPolicy;
pub use swap::{is_swap_candidate, SwapQueue};
pub use trailing::TrailingPolicy;
