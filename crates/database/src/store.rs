use crate::error::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use configuration::AccountSettings;
use core_types::{ProtectiveOrderId, Signal, Trade, TradeClose};
use rust_decimal::Decimal;
use uuid::Uuid;

/// An account the engine trades for.
#[derive(Debug, Clone)]
pub struct Account {
    pub account_id: Uuid,
    pub label: String,
    pub api_key: String,
    pub api_secret: String,
    pub telegram_chat_id: Option<String>,
    pub settings: AccountSettings,
}

/// Persistence the engine depends on.
///
/// Local trade records are a cache of exchange state: the engine writes to
/// the store only after the exchange has confirmed the corresponding action.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn account(&self, account_id: Uuid) -> Result<Account, DbError>;

    async fn accounts(&self) -> Result<Vec<Account>, DbError>;

    async fn autotrade_accounts(&self) -> Result<Vec<Account>, DbError>;

    async fn signal(&self, signal_id: Uuid) -> Result<Option<Signal>, DbError>;

    /// The most recently issued signal for a pair. Authoritative for risk
    /// level and targets whenever a position is re-examined.
    async fn latest_signal_for_pair(&self, coin_pair: &str) -> Result<Option<Signal>, DbError>;

    /// Signals issued at or after `since`, newest first.
    async fn signals_since(&self, since: DateTime<Utc>) -> Result<Vec<Signal>, DbError>;

    async fn insert_trade(&self, trade: &Trade) -> Result<(), DbError>;

    async fn active_trades(&self) -> Result<Vec<Trade>, DbError>;

    async fn active_trades_for_account(&self, account_id: Uuid) -> Result<Vec<Trade>, DbError>;

    async fn trade(&self, trade_id: Uuid) -> Result<Option<Trade>, DbError>;

    async fn trade_by_protective_order(
        &self,
        account_id: Uuid,
        id: ProtectiveOrderId,
    ) -> Result<Option<Trade>, DbError>;

    /// Records a replacement protective order and its stop price.
    async fn update_protection(
        &self,
        trade_id: Uuid,
        id: ProtectiveOrderId,
        stop_price: Decimal,
    ) -> Result<(), DbError>;

    /// Moves an ACTIVE trade to a terminal status. Fails with
    /// [`DbError::AlreadyClosed`] if the trade is already terminal.
    async fn close_trade(&self, trade_id: Uuid, close: &TradeClose) -> Result<(), DbError>;
}
