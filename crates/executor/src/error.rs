use api_client::error::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Signal cannot be executed: {0}")]
    InvalidSignal(String),
}

/// Failure of a cancel-then-replace sequence on a protective order.
#[derive(Error, Debug)]
pub enum ReplaceError {
    /// The old order is still working; nothing was changed.
    #[error("Failed to cancel protective order: {0}")]
    CancelFailed(ApiError),

    /// The old order is gone and the new one was not placed.
    #[error("Protective order cancelled but re-placement failed, position is unprotected: {0}")]
    Unprotected(ApiError),
}

/// Failure of a cancel-then-sell sequence.
#[derive(Error, Debug)]
pub enum LiquidationError {
    /// Nothing was sold; the position is as it was.
    #[error("Failed to cancel open orders before selling: {0}")]
    CancelFailed(ApiError),

    #[error("Orders cancelled but the market sell failed: {0}")]
    SellFailed(ApiError),
}
