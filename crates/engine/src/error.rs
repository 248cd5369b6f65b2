use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("API client error: {0}")]
    ApiClient(#[from] api_client::error::ApiError),

    #[error("Database error: {0}")]
    Database(#[from] database::DbError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] strategies::StrategyError),

    #[error("Risk management error: {0}")]
    Risk(#[from] risk::RiskError),

    #[error("Execution error: {0}")]
    Executor(#[from] executor::ExecutorError),

    #[error("Liquidation failed: {0}")]
    Liquidation(#[from] executor::LiquidationError),

    #[error("Signal {signal} is already being monitored for account {account}")]
    AlreadyMonitoring { account: Uuid, signal: Uuid },

    #[error("Account already holds an active trade on {0}")]
    AlreadyHolding(String),

    #[error("Signal {0} not found")]
    SignalNotFound(Uuid),

    #[error("Trade {0} not found")]
    TradeNotFound(Uuid),

    #[error("Trade {0} is not active")]
    TradeNotActive(Uuid),

    #[error("Trade {0} has no protective order on record")]
    MissingProtection(Uuid),

    #[error("Engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Market sell on {0} was not filled")]
    SellNotFilled(String),
}
