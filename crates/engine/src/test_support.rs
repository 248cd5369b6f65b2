//! In-memory collaborators for engine tests.

use crate::context::{ClientProvider, EngineContext};
use crate::error::EngineError;
use crate::monitor::trade_from_report;
use api_client::mock::MockExchange;
use api_client::ApiClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use configuration::{AccountSettings, EngineSettings};
use core_types::{
    PriceLevel, ProtectiveListStatus, ProtectiveOrder, ProtectiveOrderId, RiskLevel, Signal, Trade,
    TradeClose,
};
use database::{Account, DbError, TradeStore};
use executor::ExecutionReport;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    accounts: Mutex<Vec<Account>>,
    signals: Mutex<Vec<Signal>>,
    trades: Mutex<Vec<Trade>>,
}

impl MemoryStore {
    pub fn add_account(&self, account: Account) {
        self.accounts.lock().unwrap().push(account);
    }

    pub fn add_signal(&self, signal: Signal) {
        self.signals.lock().unwrap().push(signal);
    }

    pub fn add_trade(&self, trade: Trade) {
        self.trades.lock().unwrap().push(trade);
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.trades.lock().unwrap().clone()
    }

    pub fn trade_now(&self, id: Uuid) -> Trade {
        self.trades().into_iter().find(|t| t.id == id).unwrap()
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    async fn account(&self, account_id: Uuid) -> Result<Account, DbError> {
        self.accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.account_id == account_id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn accounts(&self) -> Result<Vec<Account>, DbError> {
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn autotrade_accounts(&self) -> Result<Vec<Account>, DbError> {
        Ok(self.accounts().await?.into_iter().filter(|a| a.settings.autotrade_enabled).collect())
    }

    async fn signal(&self, signal_id: Uuid) -> Result<Option<Signal>, DbError> {
        Ok(self.signals.lock().unwrap().iter().find(|s| s.id == signal_id).cloned())
    }

    async fn latest_signal_for_pair(&self, coin_pair: &str) -> Result<Option<Signal>, DbError> {
        Ok(self
            .signals
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.coin_pair.as_deref() == Some(coin_pair))
            .max_by_key(|s| s.issued_at)
            .cloned())
    }

    async fn signals_since(&self, since: DateTime<Utc>) -> Result<Vec<Signal>, DbError> {
        let mut signals: Vec<Signal> =
            self.signals.lock().unwrap().iter().filter(|s| s.issued_at >= since).cloned().collect();
        signals.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(signals)
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<(), DbError> {
        self.add_trade(trade.clone());
        Ok(())
    }

    async fn active_trades(&self) -> Result<Vec<Trade>, DbError> {
        Ok(self.trades().into_iter().filter(|t| !t.status.is_terminal()).collect())
    }

    async fn active_trades_for_account(&self, account_id: Uuid) -> Result<Vec<Trade>, DbError> {
        Ok(self.active_trades().await?.into_iter().filter(|t| t.account_id == account_id).collect())
    }

    async fn trade(&self, trade_id: Uuid) -> Result<Option<Trade>, DbError> {
        Ok(self.trades().into_iter().find(|t| t.id == trade_id))
    }

    async fn trade_by_protective_order(
        &self,
        account_id: Uuid,
        id: ProtectiveOrderId,
    ) -> Result<Option<Trade>, DbError> {
        Ok(self
            .trades()
            .into_iter()
            .find(|t| t.account_id == account_id && t.protective_order_id == Some(id)))
    }

    async fn update_protection(
        &self,
        trade_id: Uuid,
        id: ProtectiveOrderId,
        stop_price: Decimal,
    ) -> Result<(), DbError> {
        let mut trades = self.trades.lock().unwrap();
        let trade = trades.iter_mut().find(|t| t.id == trade_id).ok_or(DbError::NotFound)?;
        trade.protective_order_id = Some(id);
        trade.stop_price = stop_price;
        Ok(())
    }

    async fn close_trade(&self, trade_id: Uuid, close: &TradeClose) -> Result<(), DbError> {
        let mut trades = self.trades.lock().unwrap();
        let trade = trades.iter_mut().find(|t| t.id == trade_id).ok_or(DbError::NotFound)?;
        if trade.status.is_terminal() {
            return Err(DbError::AlreadyClosed(trade_id));
        }
        trade.apply_close(close)?;
        Ok(())
    }
}

/// Every account trades on the same mock exchange.
pub struct SharedExchange(pub Arc<MockExchange>);

impl ClientProvider for SharedExchange {
    fn client_for(&self, _account: &Account) -> Result<Arc<dyn ApiClient>, EngineError> {
        Ok(self.0.clone())
    }
}

pub struct Harness {
    pub ctx: Arc<EngineContext>,
    pub store: Arc<MemoryStore>,
    pub exchange: Arc<MockExchange>,
}

/// A funded mock account with SOLUSDT and ETHUSDT listed and no delays.
pub fn harness() -> Harness {
    let exchange = Arc::new(MockExchange::default());
    exchange.set_balance("USDT", dec!(100));
    exchange.set_rules("SOLUSDT", dec!(0.001), dec!(0.01), Some(dec!(5)));
    exchange.set_rules("ETHUSDT", dec!(0.0001), dec!(0.01), Some(dec!(5)));
    let store = Arc::new(MemoryStore::default());
    let settings = EngineSettings {
        signal_poll_interval_secs: 0,
        settlement_delay_ms: 0,
        cancel_settle_delay_ms: 0,
        ..EngineSettings::default()
    };
    let (notifier, _) = broadcast::channel(64);
    let ctx = Arc::new(EngineContext::new(
        store.clone(),
        Arc::new(SharedExchange(exchange.clone())),
        settings,
        notifier,
    ));
    Harness { ctx, store, exchange }
}

pub fn account() -> Account {
    Account {
        account_id: Uuid::new_v4(),
        label: "test".to_string(),
        api_key: String::new(),
        api_secret: String::new(),
        telegram_chat_id: None,
        settings: AccountSettings::default(),
    }
}

pub fn signal(pair: &str, entry: Decimal, stop: Decimal, targets: &[Decimal]) -> Signal {
    Signal {
        id: Uuid::new_v4(),
        coin_pair: Some(pair.to_string()),
        entry_price: Some(entry),
        targets: targets
            .iter()
            .enumerate()
            .map(|(i, price)| PriceLevel::new(i as u32 + 1, *price))
            .collect(),
        stop_losses: vec![PriceLevel::new(1, stop)],
        risk_level: Some(RiskLevel::Normal),
        issued_at: Utc::now(),
    }
}

/// Records `signal` and a protected position on it bought at the signal's entry.
pub fn seed_position(h: &Harness, account: &Account, signal: &Signal, quantity: Decimal, buy_fee: Decimal) -> Trade {
    let symbol = signal.coin_pair.clone().unwrap();
    let profit = signal.final_target().unwrap();
    let stop = signal.first_stop_loss().unwrap();
    h.store.add_signal(signal.clone());
    h.exchange.set_balance(core_types::base_asset(&symbol, "USDT"), quantity);
    let id = h.exchange.seed_protective(&symbol, quantity, profit, stop);
    let trade = trade_from_report(
        account.account_id,
        signal.id,
        ExecutionReport {
            symbol: symbol.clone(),
            entry_price: signal.entry_price.unwrap(),
            quantity,
            buy_fee,
            fee_asset: Some("USDT".into()),
            protective: ProtectiveOrder { id, symbol, status: ProtectiveListStatus::Executing },
            profit_price: profit,
            stop_price: stop,
        },
        Utc::now(),
    );
    h.store.add_trade(trade.clone());
    trade
}
