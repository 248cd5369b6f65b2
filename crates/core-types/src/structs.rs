use crate::enums::{Decision, RiskLevel, TradeStatus};
use crate::error::CoreError;
use crate::exchange::ProtectiveOrderId;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single take-profit target or stop-loss level of a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub level: u32,
    pub price: Decimal,
    #[serde(default)]
    pub status: Option<String>,
}

impl PriceLevel {
    pub fn new(level: u32, price: Decimal) -> Self {
        Self { level, price, status: None }
    }
}

/// A structured trading opportunity produced by the upstream signal parser.
///
/// Signals are immutable once issued. `targets` and `stop_losses` are kept
/// sorted by ascending level; see [`Signal::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub coin_pair: Option<String>,
    pub entry_price: Option<Decimal>,
    pub targets: Vec<PriceLevel>,
    pub stop_losses: Vec<PriceLevel>,
    pub risk_level: Option<RiskLevel>,
    pub issued_at: DateTime<Utc>,
}

impl Signal {
    /// Sorts targets and stop-losses by level so positional accessors are meaningful.
    pub fn normalize(mut self) -> Self {
        self.targets.sort_by_key(|t| t.level);
        self.stop_losses.sort_by_key(|s| s.level);
        self
    }

    /// The level-1 stop-loss, used as the safety floor and as the initial stop leg.
    pub fn first_stop_loss(&self) -> Option<Decimal> {
        self.stop_losses.first().map(|s| s.price)
    }

    pub fn first_target(&self) -> Option<Decimal> {
        self.targets.first().map(|t| t.price)
    }

    /// The last target is the profit leg of every protective order.
    pub fn final_target(&self) -> Option<Decimal> {
        self.targets.last().map(|t| t.price)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.issued_at
    }

    pub fn is_normal_risk(&self) -> bool {
        self.risk_level.as_ref().is_some_and(RiskLevel::is_normal)
    }
}

/// Strips the quote asset from a symbol, e.g. `BTCUSDT` -> `BTC`.
pub fn base_asset<'a>(symbol: &'a str, quote_asset: &str) -> &'a str {
    symbol.strip_suffix(quote_asset).unwrap_or(symbol)
}

/// Realized P&L of a long position, net of both legs' fees.
pub fn net_profit_loss(
    entry_price: Decimal,
    exit_price: Decimal,
    quantity: Decimal,
    buy_fee: Decimal,
    sell_fee: Decimal,
) -> Decimal {
    (exit_price - entry_price) * quantity - (buy_fee + sell_fee)
}

/// The evaluator's verdict on a signal, with the context needed to act on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub decision: Decision,
    pub symbol: String,
    pub reason: String,
    pub current_price: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub risk_level: Option<RiskLevel>,
}

impl TradeDecision {
    pub fn new(decision: Decision, signal: &Signal, reason: impl Into<String>) -> Self {
        Self {
            decision,
            symbol: signal.coin_pair.clone().unwrap_or_else(|| "N/A".to_string()),
            reason: reason.into(),
            current_price: None,
            entry_price: signal.entry_price,
            risk_level: signal.risk_level.clone(),
        }
    }

    pub fn with_price(mut self, current_price: Decimal) -> Self {
        self.current_price = Some(current_price);
        self
    }

    pub fn is_buy(&self) -> bool {
        self.decision == Decision::Buy
    }
}

/// Final economics of a trade when it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeClose {
    pub status: TradeStatus,
    pub exit_price: Decimal,
    pub sell_fee: Decimal,
    pub net_profit_loss: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// A position opened by the engine. Created with a filled buy, mutated only by
/// supervision or a manual close, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub account_id: Uuid,
    pub signal_id: Uuid,
    pub symbol: String,
    pub status: TradeStatus,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub buy_fee: Decimal,
    pub exit_price: Option<Decimal>,
    pub sell_fee: Option<Decimal>,
    pub net_profit_loss: Option<Decimal>,
    pub protective_order_id: Option<ProtectiveOrderId>,
    /// Current trigger price of the protective order's stop leg.
    pub stop_price: Decimal,
    /// Limit price of the protective order's profit leg.
    pub profit_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Trade {
    /// Builds the closing record for this trade at the given exit.
    pub fn close_at(
        &self,
        status: TradeStatus,
        exit_price: Decimal,
        sell_fee: Decimal,
        closed_at: DateTime<Utc>,
    ) -> TradeClose {
        TradeClose {
            status,
            exit_price,
            sell_fee,
            net_profit_loss: net_profit_loss(
                self.entry_price,
                exit_price,
                self.quantity,
                self.buy_fee,
                sell_fee,
            ),
            closed_at,
        }
    }

    /// Applies a terminal transition. Terminal trades cannot transition again.
    pub fn apply_close(&mut self, close: &TradeClose) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::InvalidInput(
                "trade status".to_string(),
                format!("trade {} is already {}", self.id, self.status),
            ));
        }
        if !close.status.is_terminal() {
            return Err(CoreError::InvalidInput(
                "trade status".to_string(),
                format!("{} is not a closing status", close.status),
            ));
        }
        self.status = close.status;
        self.exit_price = Some(close.exit_price);
        self.sell_fee = Some(close.sell_fee);
        self.net_profit_loss = Some(close.net_profit_loss);
        self.closed_at = Some(close.closed_at);
        Ok(())
    }

    /// Classifies an exchange-side close by comparing the exit against the stop leg.
    pub fn closing_status_for(&self, exit_price: Decimal) -> TradeStatus {
        if exit_price <= self.stop_price {
            TradeStatus::ClosedStopLoss
        } else {
            TradeStatus::ClosedTakeProfit
        }
    }
}
