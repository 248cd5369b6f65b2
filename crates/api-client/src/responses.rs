use crate::error::ApiError;
use chrono::{DateTime, TimeZone, Utc};
use core_types::{
    ExecutedTrade, FillCommission, OpenOrder, OrderFill, OrderSide, ProtectiveListStatus,
    ProtectiveOrder, ProtectiveOrderId, SymbolRules,
};
use rust_decimal::Decimal;
use serde::Deserialize;

// Using `#[serde(rename_all = "camelCase")]` to automatically map from JSON camelCase to Rust snake_case.

fn timestamp(ms: i64) -> Result<DateTime<Utc>, ApiError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ApiError::InvalidData(format!("Invalid timestamp: {}", ms)))
}

/// `GET /api/v3/ticker/price`, with or without a symbol.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// `GET /api/v3/account`. Only the balances are consumed.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub balances: Vec<BalanceResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

/// A single working order from `GET /api/v3/openOrders`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrderResponse {
    pub symbol: String,
    pub order_id: i64,
    /// `-1` when the order is not part of an order list.
    pub order_list_id: i64,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub stop_price: Decimal,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: OrderSide,
    pub time: i64,
}

impl TryFrom<OpenOrderResponse> for OpenOrder {
    type Error = ApiError;

    fn try_from(raw: OpenOrderResponse) -> Result<Self, Self::Error> {
        Ok(OpenOrder {
            created_at: timestamp(raw.time)?,
            protective_order_id: (raw.order_list_id >= 0)
                .then_some(ProtectiveOrderId(raw.order_list_id)),
            symbol: raw.symbol,
            order_id: raw.order_id,
            order_type: raw.order_type,
            side: raw.side,
            quantity: raw.orig_qty,
            price: raw.price,
            stop_price: raw.stop_price,
        })
    }
}

/// The `FULL` response of `POST /api/v3/order`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub status: String,
    pub executed_qty: Decimal,
    // Binance's own spelling.
    pub cummulative_quote_qty: Decimal,
    #[serde(default)]
    pub fills: Vec<FillResponse>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillResponse {
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
}

impl From<OrderResponse> for OrderFill {
    fn from(raw: OrderResponse) -> Self {
        OrderFill {
            symbol: raw.symbol,
            order_id: raw.order_id,
            status: raw.status,
            executed_qty: raw.executed_qty,
            cumulative_quote_qty: raw.cummulative_quote_qty,
            fills: raw
                .fills
                .into_iter()
                .map(|f| FillCommission {
                    price: f.price,
                    quantity: f.qty,
                    commission: f.commission,
                    commission_asset: f.commission_asset,
                })
                .collect(),
        }
    }
}

/// Returned by `POST /api/v3/order/oco`, `DELETE /api/v3/orderList` and `GET /api/v3/orderList`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListResponse {
    pub order_list_id: i64,
    pub symbol: String,
    pub list_order_status: String,
}

impl TryFrom<OrderListResponse> for ProtectiveOrder {
    type Error = ApiError;

    fn try_from(raw: OrderListResponse) -> Result<Self, Self::Error> {
        let status = match raw.list_order_status.as_str() {
            "EXECUTING" => ProtectiveListStatus::Executing,
            "ALL_DONE" => ProtectiveListStatus::AllDone,
            "REJECT" => ProtectiveListStatus::Rejected,
            other => {
                return Err(ApiError::InvalidData(format!(
                    "Unknown order list status: {}",
                    other
                )));
            }
        };
        Ok(ProtectiveOrder { id: ProtectiveOrderId(raw.order_list_id), symbol: raw.symbol, status })
    }
}

/// One row of `GET /api/v3/myTrades`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyTradeResponse {
    pub symbol: String,
    pub order_id: i64,
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    pub time: i64,
    pub is_buyer: bool,
}

impl TryFrom<MyTradeResponse> for ExecutedTrade {
    type Error = ApiError;

    fn try_from(raw: MyTradeResponse) -> Result<Self, Self::Error> {
        Ok(ExecutedTrade {
            time: timestamp(raw.time)?,
            symbol: raw.symbol,
            order_id: raw.order_id,
            price: raw.price,
            quantity: raw.qty,
            commission: raw.commission,
            commission_asset: raw.commission_asset,
            is_buyer: raw.is_buyer,
        })
    }
}

/// `GET /api/v3/exchangeInfo?symbol=...`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(rename = "quoteAssetPrecision", default = "default_quote_precision")]
    pub quote_precision: u32,
    pub filters: Vec<SymbolFilter>,
}

fn default_quote_precision() -> u32 {
    8
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER")]
    PriceFilter {
        #[serde(rename = "tickSize")]
        tick_size: Decimal,
    },
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        #[serde(rename = "stepSize")]
        step_size: Decimal,
    },
    #[serde(rename = "MIN_NOTIONAL")]
    MinNotional {
        #[serde(rename = "minNotional")]
        min_notional: Decimal,
    },
    #[serde(rename = "NOTIONAL")]
    Notional {
        #[serde(rename = "minNotional")]
        min_notional: Decimal,
    },
    #[serde(other)]
    Other,
}

impl TryFrom<SymbolInfo> for SymbolRules {
    type Error = ApiError;

    fn try_from(info: SymbolInfo) -> Result<Self, Self::Error> {
        let mut quantity_step = None;
        let mut price_tick = None;
        let mut min_notional = None;
        for filter in &info.filters {
            match filter {
                SymbolFilter::LotSize { step_size } => quantity_step = Some(*step_size),
                SymbolFilter::PriceFilter { tick_size } => price_tick = Some(*tick_size),
                SymbolFilter::MinNotional { min_notional: m }
                | SymbolFilter::Notional { min_notional: m } => min_notional = Some(*m),
                SymbolFilter::Other => {}
            }
        }
        Ok(SymbolRules {
            quantity_step: quantity_step.ok_or_else(|| ApiError::MissingFilter {
                symbol: info.symbol.clone(),
                filter: "LOT_SIZE",
            })?,
            price_tick: price_tick.ok_or_else(|| ApiError::MissingFilter {
                symbol: info.symbol.clone(),
                filter: "PRICE_FILTER",
            })?,
            min_notional,
            quote_precision: info.quote_precision,
            symbol: info.symbol,
        })
    }
}

/// Represents an error response from the Binance API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}
