use crate::error::EventsError;
use chrono::{DateTime, Utc};
use core_types::TradeStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A notification addressed to the account that owns the position.
///
/// Serializes flat, e.g.
/// `{"accountId":"...","timestamp":"...","type":"opened","symbol":"SOLUSDT","entryPrice":"99.9"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "accountId")]
    pub account_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotificationKind {
    Opened {
        symbol: String,
        #[serde(rename = "entryPrice")]
        entry_price: Decimal,
    },
    Closed {
        symbol: String,
        status: TradeStatus,
        #[serde(rename = "netProfitLoss")]
        net_profit_loss: Decimal,
    },
    /// Capital is committed without protection. Needs an operator.
    Critical { symbol: String, message: String },
}

impl Notification {
    pub fn new(account_id: Uuid, kind: NotificationKind) -> Self {
        Self { account_id, timestamp: Utc::now(), kind }
    }

    pub fn opened(account_id: Uuid, symbol: &str, entry_price: Decimal) -> Self {
        Self::new(account_id, NotificationKind::Opened { symbol: symbol.to_string(), entry_price })
    }

    pub fn closed(
        account_id: Uuid,
        symbol: &str,
        status: TradeStatus,
        net_profit_loss: Decimal,
    ) -> Self {
        Self::new(
            account_id,
            NotificationKind::Closed { symbol: symbol.to_string(), status, net_profit_loss },
        )
    }

    pub fn critical(account_id: Uuid, symbol: &str, message: impl Into<String>) -> Self {
        Self::new(
            account_id,
            NotificationKind::Critical { symbol: symbol.to_string(), message: message.into() },
        )
    }

    pub fn is_critical(&self) -> bool {
        matches!(self.kind, NotificationKind::Critical { .. })
    }

    pub fn symbol(&self) -> &str {
        match &self.kind {
            NotificationKind::Opened { symbol, .. }
            | NotificationKind::Closed { symbol, .. }
            | NotificationKind::Critical { symbol, .. } => symbol,
        }
    }

    pub fn to_json(&self) -> Result<String, EventsError> {
        serde_json::to_string(self).map_err(|e| EventsError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn opened_has_flat_wire_shape() {
        let n = Notification::opened(Uuid::nil(), "SOLUSDT", dec!(99.9));
        let value: serde_json::Value = serde_json::from_str(&n.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "opened");
        assert_eq!(value["symbol"], "SOLUSDT");
        assert_eq!(value["entryPrice"], "99.9");
        assert_eq!(value["accountId"], Uuid::nil().to_string());
    }

    #[test]
    fn closed_carries_status_and_pnl() {
        let n = Notification::closed(Uuid::nil(), "SOLUSDT", TradeStatus::ClosedStopLoss, dec!(-22));
        let value: serde_json::Value = serde_json::from_str(&n.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "closed");
        assert_eq!(value["status"], "CLOSED_STOP_LOSS");
        assert_eq!(value["netProfitLoss"], "-22");
        let back: Notification = serde_json::from_value(value).unwrap();
        assert_eq!(back, n);
    }
}
