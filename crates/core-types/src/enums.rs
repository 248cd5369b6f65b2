use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// The outcome of evaluating a signal against the current market.
///
/// `Skip` means "not yet" and the caller may retry later; `Fail` is terminal
/// for the current monitoring cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Buy,
    Skip,
    Fail,
}

/// Lifecycle status of a trade record. Every `Closed*` variant is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Active,
    ClosedTakeProfit,
    ClosedStopLoss,
    ClosedManual,
    ClosedSwap,
    /// Forced liquidation of a position that sat below its first target for too long.
    ClosedStuck,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Active => "ACTIVE",
            TradeStatus::ClosedTakeProfit => "CLOSED_TAKE_PROFIT",
            TradeStatus::ClosedStopLoss => "CLOSED_STOP_LOSS",
            TradeStatus::ClosedManual => "CLOSED_MANUAL",
            TradeStatus::ClosedSwap => "CLOSED_SWAP",
            TradeStatus::ClosedStuck => "CLOSED_STUCK",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(TradeStatus::Active),
            "CLOSED_TAKE_PROFIT" => Ok(TradeStatus::ClosedTakeProfit),
            "CLOSED_STOP_LOSS" => Ok(TradeStatus::ClosedStopLoss),
            "CLOSED_MANUAL" => Ok(TradeStatus::ClosedManual),
            "CLOSED_SWAP" => Ok(TradeStatus::ClosedSwap),
            "CLOSED_STUCK" => Ok(TradeStatus::ClosedStuck),
            other => Err(CoreError::UnknownTradeStatus(other.to_string())),
        }
    }
}

/// Risk classification attached to a signal by its publisher.
///
/// Anything other than "normal" or "high" is preserved verbatim so it can be
/// shown back to the user, but it is never treated as normal risk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RiskLevel {
    Normal,
    High,
    Other(String),
}

impl RiskLevel {
    pub fn is_normal(&self) -> bool {
        matches!(self, RiskLevel::Normal)
    }
}

impl From<String> for RiskLevel {
    fn from(value: String) -> Self {
        match value.trim().to_lowercase().as_str() {
            "normal" => RiskLevel::Normal,
            "high" => RiskLevel::High,
            _ => RiskLevel::Other(value),
        }
    }
}

impl From<&str> for RiskLevel {
    fn from(value: &str) -> Self {
        RiskLevel::from(value.to_string())
    }
}

impl From<RiskLevel> for String {
    fn from(value: RiskLevel) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Normal => f.write_str("normal"),
            RiskLevel::High => f.write_str("high"),
            RiskLevel::Other(raw) => f.write_str(raw),
        }
    }
}

/// Exchange-side status of a protective (one-cancels-the-other) order list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectiveListStatus {
    /// Both legs are still working.
    Executing,
    /// One leg filled and the other was cancelled, or the list was cancelled.
    AllDone,
    Rejected,
}

impl ProtectiveListStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, ProtectiveListStatus::AllDone)
    }
}
