pub mod enums;
pub mod error;
pub mod exchange;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{Decision, OrderSide, ProtectiveListStatus, RiskLevel, TradeStatus};
pub use error::CoreError;
pub use exchange::{
    AssetBalance, ExecutedTrade, FillCommission, OpenOrder, OrderFill, ProtectiveOrder,
    ProtectiveOrderId, SymbolRules,
};
pub use structs::{base_asset, net_profit_loss, PriceLevel, Signal, Trade, TradeClose, TradeDecision};
