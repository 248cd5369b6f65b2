//! An in-memory exchange for tests.
//!
//! Balances move the way they do on a spot account: a market buy credits the
//! base asset net of a 0.1% commission, a protective order locks its quantity,
//! and cancelling unlocks it. Every call is logged, and any call can be
//! switched to fail.

use crate::error::ApiError;
use crate::precision::floor_to_step;
use crate::ApiClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{
    AssetBalance, ExecutedTrade, FillCommission, OpenOrder, OrderFill, OrderSide,
    ProtectiveListStatus, ProtectiveOrder, ProtectiveOrderId, SymbolRules,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

const COMMISSION_RATE: Decimal = dec!(0.001);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    CurrentPrice,
    AllPrices,
    Balances,
    OpenOrders,
    SymbolRules,
    MarketBuy,
    MarketSell,
    PlaceProtective,
    CancelProtective,
    CancelAll,
    ProtectiveStatus,
    RecentTrades,
}

#[derive(Debug, Default)]
struct MockState {
    quote_asset: String,
    prices: HashMap<String, Decimal>,
    balances: HashMap<String, AssetBalance>,
    rules: HashMap<String, SymbolRules>,
    open_orders: Vec<OpenOrder>,
    lists: HashMap<ProtectiveOrderId, (ProtectiveOrder, Decimal)>,
    trades: HashMap<String, Vec<ExecutedTrade>>,
    failing: HashSet<MockCall>,
    unfilled_buys: bool,
    calls: Vec<MockCall>,
    next_id: i64,
}

pub struct MockExchange {
    state: Mutex<MockState>,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new("USDT")
    }
}

impl MockExchange {
    pub fn new(quote_asset: &str) -> Self {
        Self {
            state: Mutex::new(MockState {
                quote_asset: quote_asset.to_string(),
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, call: MockCall) -> Result<MutexGuard<'_, MockState>, ApiError> {
        let mut state = self.state();
        state.calls.push(call);
        if state.failing.contains(&call) {
            return Err(ApiError::Binance { code: -1000, msg: format!("mock failure: {:?}", call) });
        }
        Ok(state)
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state().prices.insert(symbol.to_string(), price);
    }

    pub fn set_balance(&self, asset: &str, free: Decimal) {
        self.state().balances.insert(asset.to_string(), AssetBalance { free, locked: Decimal::ZERO });
    }

    pub fn balance(&self, asset: &str) -> AssetBalance {
        self.state().balances.get(asset).copied().unwrap_or_default()
    }

    pub fn set_rules(&self, symbol: &str, quantity_step: Decimal, price_tick: Decimal, min_notional: Option<Decimal>) {
        self.state().rules.insert(
            symbol.to_string(),
            SymbolRules { symbol: symbol.to_string(), quantity_step, price_tick, min_notional, quote_precision: 8 },
        );
    }

    /// Makes every subsequent `call` fail until [`MockExchange::recover`].
    pub fn fail_on(&self, call: MockCall) {
        self.state().failing.insert(call);
    }

    pub fn recover(&self, call: MockCall) {
        self.state().failing.remove(&call);
    }

    /// Market buys come back expired with nothing executed.
    pub fn reject_buys(&self) {
        self.state().unfilled_buys = true;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, call: MockCall) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn protective_ids(&self) -> Vec<ProtectiveOrderId> {
        let mut ids: Vec<_> = self.state().lists.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn working_orders(&self) -> Vec<OpenOrder> {
        self.state().open_orders.clone()
    }

    /// Back-dates the legs of a protective order.
    pub fn set_placed_at(&self, id: ProtectiveOrderId, placed_at: DateTime<Utc>) {
        for order in self.state().open_orders.iter_mut() {
            if order.protective_order_id == Some(id) {
                order.created_at = placed_at;
            }
        }
    }

    /// Places a protective order over `quantity` of an already credited balance,
    /// without logging a call.
    pub fn seed_protective(&self, symbol: &str, quantity: Decimal, profit: Decimal, stop: Decimal) -> ProtectiveOrderId {
        let mut state = self.state();
        let base = base_of(&state, symbol);
        let balance = state.balances.entry(base).or_default();
        balance.free -= quantity;
        balance.locked += quantity;
        open_list(&mut state, symbol, quantity, profit, stop).id
    }

    /// Simulates one leg of a protective order filling at `exit_price`.
    pub fn fill_protective(&self, id: ProtectiveOrderId, exit_price: Decimal, time: DateTime<Utc>) {
        let mut state = self.state();
        let Some((list, quantity)) = state.lists.get(&id).cloned() else {
            return;
        };
        state.open_orders.retain(|o| o.protective_order_id != Some(id));
        if let Some(entry) = state.lists.get_mut(&id) {
            entry.0.status = ProtectiveListStatus::AllDone;
        }
        let base = base_of(&state, &list.symbol);
        let quote = state.quote_asset.clone();
        let proceeds = exit_price * quantity;
        let fee = proceeds * COMMISSION_RATE;
        if let Some(balance) = state.balances.get_mut(&base) {
            balance.locked -= quantity;
        }
        state.balances.entry(quote.clone()).or_default().free += proceeds - fee;
        record_trade(&mut state, &list.symbol, exit_price, quantity, fee, &quote, false, time);
    }

    /// Forgets an order list entirely, as the exchange does with old lists.
    pub fn forget_protective(&self, id: ProtectiveOrderId) {
        let mut state = self.state();
        state.lists.remove(&id);
        state.open_orders.retain(|o| o.protective_order_id != Some(id));
    }
}

fn base_of(state: &MockState, symbol: &str) -> String {
    symbol.strip_suffix(state.quote_asset.as_str()).unwrap_or(symbol).to_string()
}

fn price_of(state: &MockState, symbol: &str) -> Result<Decimal, ApiError> {
    state.prices.get(symbol).copied().ok_or_else(|| ApiError::Binance {
        code: -1121,
        msg: format!("Invalid symbol {}", symbol),
    })
}

fn round_quantity(state: &MockState, symbol: &str, quantity: Decimal) -> Decimal {
    match state.rules.get(symbol) {
        Some(rules) => floor_to_step(quantity, rules.quantity_step),
        None => quantity.round_dp(8),
    }
}

#[allow(clippy::too_many_arguments)]
fn record_trade(
    state: &mut MockState,
    symbol: &str,
    price: Decimal,
    quantity: Decimal,
    commission: Decimal,
    commission_asset: &str,
    is_buyer: bool,
    time: DateTime<Utc>,
) {
    state.next_id += 1;
    let order_id = state.next_id;
    state.trades.entry(symbol.to_string()).or_default().push(ExecutedTrade {
        symbol: symbol.to_string(),
        order_id,
        price,
        quantity,
        commission,
        commission_asset: commission_asset.to_string(),
        is_buyer,
        time,
    });
}

fn open_list(state: &mut MockState, symbol: &str, quantity: Decimal, profit: Decimal, stop: Decimal) -> ProtectiveOrder {
    state.next_id += 1;
    let id = ProtectiveOrderId(state.next_id);
    let now = Utc::now();
    for (order_type, price, stop_price) in [
        ("STOP_LOSS_LIMIT", stop * dec!(0.995), stop),
        ("LIMIT_MAKER", profit, Decimal::ZERO),
    ] {
        state.next_id += 1;
        let order_id = state.next_id;
        state.open_orders.push(OpenOrder {
            symbol: symbol.to_string(),
            order_id,
            protective_order_id: Some(id),
            order_type: order_type.to_string(),
            side: OrderSide::Sell,
            quantity,
            price,
            stop_price,
            created_at: now,
        });
    }
    let order = ProtectiveOrder { id, symbol: symbol.to_string(), status: ProtectiveListStatus::Executing };
    state.lists.insert(id, (order.clone(), quantity));
    order
}

fn unlock_list(state: &mut MockState, id: ProtectiveOrderId) {
    let Some((list, quantity)) = state.lists.get(&id).cloned() else {
        return;
    };
    if list.status.is_done() {
        return;
    }
    state.open_orders.retain(|o| o.protective_order_id != Some(id));
    if let Some(entry) = state.lists.get_mut(&id) {
        entry.0.status = ProtectiveListStatus::AllDone;
    }
    let base = base_of(state, &list.symbol);
    let balance = state.balances.entry(base).or_default();
    balance.locked -= quantity;
    balance.free += quantity;
}

#[async_trait]
impl ApiClient for MockExchange {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ApiError> {
        let state = self.enter(MockCall::CurrentPrice)?;
        price_of(&state, symbol)
    }

    async fn all_prices(&self) -> Result<HashMap<String, Decimal>, ApiError> {
        Ok(self.enter(MockCall::AllPrices)?.prices.clone())
    }

    async fn account_balances(&self) -> Result<HashMap<String, AssetBalance>, ApiError> {
        Ok(self.enter(MockCall::Balances)?.balances.clone())
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrder>, ApiError> {
        let state = self.enter(MockCall::OpenOrders)?;
        Ok(state
            .open_orders
            .iter()
            .filter(|o| symbol.is_none_or(|s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ApiError> {
        let state = self.enter(MockCall::SymbolRules)?;
        state.rules.get(symbol).cloned().ok_or_else(|| ApiError::MissingSymbol(symbol.to_string()))
    }

    async fn place_market_buy(&self, symbol: &str, quote_amount: Decimal) -> Result<OrderFill, ApiError> {
        let mut state = self.enter(MockCall::MarketBuy)?;
        let price = price_of(&state, symbol)?;
        let quote = state.quote_asset.clone();
        let base = base_of(&state, symbol);

        if state.unfilled_buys {
            return Ok(OrderFill {
                symbol: symbol.to_string(),
                order_id: 0,
                status: "EXPIRED".to_string(),
                executed_qty: Decimal::ZERO,
                cumulative_quote_qty: Decimal::ZERO,
                fills: vec![],
            });
        }

        let quote_free = state.balances.get(&quote).map(|b| b.free).unwrap_or_default();
        if quote_free < quote_amount {
            return Err(ApiError::Binance { code: -2010, msg: "Account has insufficient balance".into() });
        }

        let quantity = round_quantity(&state, symbol, quote_amount / price);
        let spent = quantity * price;
        let commission = quantity * COMMISSION_RATE;
        state.balances.entry(quote).or_default().free -= spent;
        state.balances.entry(base.clone()).or_default().free += quantity - commission;
        record_trade(&mut state, symbol, price, quantity, commission, &base, true, Utc::now());
        let order_id = state.next_id;

        Ok(OrderFill {
            symbol: symbol.to_string(),
            order_id,
            status: "FILLED".to_string(),
            executed_qty: quantity,
            cumulative_quote_qty: spent,
            fills: vec![FillCommission { price, quantity, commission, commission_asset: base }],
        })
    }

    async fn place_market_sell(&self, symbol: &str, quantity: Decimal) -> Result<OrderFill, ApiError> {
        let mut state = self.enter(MockCall::MarketSell)?;
        let price = price_of(&state, symbol)?;
        let quote = state.quote_asset.clone();
        let base = base_of(&state, symbol);
        let quantity = round_quantity(&state, symbol, quantity);

        let base_free = state.balances.get(&base).map(|b| b.free).unwrap_or_default();
        if quantity.is_zero() || base_free < quantity {
            return Err(ApiError::Binance { code: -2010, msg: "Account has insufficient balance".into() });
        }

        let proceeds = quantity * price;
        let commission = proceeds * COMMISSION_RATE;
        if let Some(balance) = state.balances.get_mut(&base) {
            balance.free -= quantity;
        }
        state.balances.entry(quote.clone()).or_default().free += proceeds - commission;
        record_trade(&mut state, symbol, price, quantity, commission, &quote, false, Utc::now());
        let order_id = state.next_id;

        Ok(OrderFill {
            symbol: symbol.to_string(),
            order_id,
            status: "FILLED".to_string(),
            executed_qty: quantity,
            cumulative_quote_qty: proceeds,
            fills: vec![FillCommission { price, quantity, commission, commission_asset: quote }],
        })
    }

    async fn place_protective_exit(
        &self,
        symbol: &str,
        quantity: Decimal,
        profit_price: Decimal,
        stop_price: Decimal,
    ) -> Result<ProtectiveOrder, ApiError> {
        let mut state = self.enter(MockCall::PlaceProtective)?;
        let base = base_of(&state, symbol);
        let quantity = round_quantity(&state, symbol, quantity);

        let base_free = state.balances.get(&base).map(|b| b.free).unwrap_or_default();
        if quantity.is_zero() || base_free < quantity {
            return Err(ApiError::Binance { code: -2010, msg: "Account has insufficient balance".into() });
        }
        if let Some(balance) = state.balances.get_mut(&base) {
            balance.free -= quantity;
            balance.locked += quantity;
        }
        Ok(open_list(&mut state, symbol, quantity, profit_price, stop_price))
    }

    async fn cancel_protective_exit(&self, _symbol: &str, id: ProtectiveOrderId) -> Result<(), ApiError> {
        let mut state = self.enter(MockCall::CancelProtective)?;
        match state.lists.get(&id) {
            Some((list, _)) if !list.status.is_done() => {
                unlock_list(&mut state, id);
                Ok(())
            }
            _ => Err(ApiError::Binance { code: -2011, msg: "Unknown order sent.".into() }),
        }
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<(), ApiError> {
        let mut state = self.enter(MockCall::CancelAll)?;
        let ids: Vec<ProtectiveOrderId> = state
            .open_orders
            .iter()
            .filter(|o| o.symbol == symbol)
            .filter_map(|o| o.protective_order_id)
            .collect();
        for id in ids {
            unlock_list(&mut state, id);
        }
        state.open_orders.retain(|o| o.symbol != symbol);
        Ok(())
    }

    async fn protective_order_status(&self, id: ProtectiveOrderId) -> Result<Option<ProtectiveOrder>, ApiError> {
        let state = self.enter(MockCall::ProtectiveStatus)?;
        Ok(state.lists.get(&id).map(|(list, _)| list.clone()))
    }

    async fn recent_trades(&self, symbol: &str, limit: u32) -> Result<Vec<ExecutedTrade>, ApiError> {
        let state = self.enter(MockCall::RecentTrades)?;
        let trades = state.trades.get(symbol).cloned().unwrap_or_default();
        let skip = trades.len().saturating_sub(limit as usize);
        Ok(trades.into_iter().skip(skip).collect())
    }
}
