//! Exchange-neutral views of the data the engine consumes from an exchange.
//!
//! The `api-client` crate deserializes raw wire responses and converts them
//! into these types, so nothing above it ever touches exchange JSON.

use crate::enums::{OrderSide, ProtectiveListStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle of a protective exit order on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtectiveOrderId(pub i64);

impl fmt::Display for ProtectiveOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Precision and size rules imposed by the exchange on a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRules {
    pub symbol: String,
    pub quantity_step: Decimal,
    pub price_tick: Decimal,
    pub min_notional: Option<Decimal>,
    /// Decimal places accepted for amounts expressed in the quote asset.
    pub quote_precision: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub locked: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// A working order as reported by the exchange's open-orders listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub symbol: String,
    pub order_id: i64,
    /// Set when the order is one leg of a protective order list.
    pub protective_order_id: Option<ProtectiveOrderId>,
    pub order_type: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub stop_price: Decimal,
    pub created_at: DateTime<Utc>,
}

impl OpenOrder {
    /// The stop leg of a protective order carries the trigger price.
    pub fn is_stop_leg(&self) -> bool {
        self.order_type.starts_with("STOP_LOSS")
    }

    pub fn is_take_profit_leg(&self) -> bool {
        self.order_type == "LIMIT_MAKER"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillCommission {
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
}

/// The result of a market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub symbol: String,
    pub order_id: i64,
    pub status: String,
    pub executed_qty: Decimal,
    pub cumulative_quote_qty: Decimal,
    pub fills: Vec<FillCommission>,
}

impl OrderFill {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED" && self.executed_qty > Decimal::ZERO
    }

    /// Volume-weighted fill price. `None` when nothing was executed.
    pub fn average_price(&self) -> Option<Decimal> {
        if self.executed_qty.is_zero() {
            return None;
        }
        Some(self.cumulative_quote_qty / self.executed_qty)
    }

    pub fn total_commission(&self) -> Decimal {
        self.fills.iter().map(|f| f.commission).sum()
    }

    pub fn commission_asset(&self) -> Option<&str> {
        self.fills.first().map(|f| f.commission_asset.as_str())
    }
}

/// A protective order list as placed or queried on the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveOrder {
    pub id: ProtectiveOrderId,
    pub symbol: String,
    pub status: ProtectiveListStatus,
}

/// One execution from the account's trade history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedTrade {
    pub symbol: String,
    pub order_id: i64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub is_buyer: bool,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(executed: Decimal, quote: Decimal) -> OrderFill {
        OrderFill {
            symbol: "BTCUSDT".into(),
            order_id: 1,
            status: "FILLED".into(),
            executed_qty: executed,
            cumulative_quote_qty: quote,
            fills: vec![
                FillCommission {
                    price: dec!(100),
                    quantity: dec!(0.05),
                    commission: dec!(0.00005),
                    commission_asset: "BTC".into(),
                },
                FillCommission {
                    price: dec!(102),
                    quantity: dec!(0.05),
                    commission: dec!(0.00005),
                    commission_asset: "BTC".into(),
                },
            ],
        }
    }

    #[test]
    fn average_price_and_commission_aggregate_fills() {
        let f = fill(dec!(0.1), dec!(10.1));
        assert_eq!(f.average_price(), Some(dec!(101)));
        assert_eq!(f.total_commission(), dec!(0.0001));
        assert_eq!(f.commission_asset(), Some("BTC"));
        assert!(f.is_filled());
    }

    #[test]
    fn empty_execution_has_no_average_price() {
        let mut f = fill(Decimal::ZERO, Decimal::ZERO);
        f.status = "EXPIRED".into();
        assert_eq!(f.average_price(), None);
        assert!(!f.is_filled());
    }
}
