use crate::auth::sign_request;
use crate::error::ApiError;
use crate::precision::{format_quote_amount, format_to_step, stop_limit_price};
use async_trait::async_trait;
use chrono::Utc;
use configuration::settings::ApiConfig;
use core_types::{
    AssetBalance, ExecutedTrade, OpenOrder, OrderFill, ProtectiveOrder, ProtectiveOrderId,
    SymbolRules,
};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::{debug, warn};

mod auth;
pub mod error;
#[cfg(any(test, feature = "test-mode"))]
pub mod mock;
pub mod precision;
pub mod responses;

// --- Public API ---
pub use responses::{
    AccountResponse, ApiErrorResponse, ExchangeInfoResponse, MyTradeResponse, OpenOrderResponse,
    OrderListResponse, OrderResponse, TickerPrice,
};

const LIVE_BASE_URL: &str = "https://api.binance.com";
const TESTNET_BASE_URL: &str = "https://testnet.binance.vision";

/// The exchange contract the engine trades through.
///
/// Every quantity and price handed to an implementation is raw; the
/// implementation applies the symbol's rounding rules before sending.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ApiError>;

    /// Last price of every listed symbol.
    async fn all_prices(&self) -> Result<HashMap<String, Decimal>, ApiError>;

    /// Free and locked balance per asset. (Authenticated)
    async fn account_balances(&self) -> Result<HashMap<String, AssetBalance>, ApiError>;

    /// Working orders, optionally restricted to one symbol. (Authenticated)
    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrder>, ApiError>;

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ApiError>;

    /// Spends `quote_amount` of the quote asset at market. (Authenticated)
    async fn place_market_buy(&self, symbol: &str, quote_amount: Decimal)
        -> Result<OrderFill, ApiError>;

    async fn place_market_sell(&self, symbol: &str, quantity: Decimal)
        -> Result<OrderFill, ApiError>;

    /// Places a one-cancels-the-other sell: a take-profit limit leg and a stop-limit leg.
    async fn place_protective_exit(
        &self,
        symbol: &str,
        quantity: Decimal,
        profit_price: Decimal,
        stop_price: Decimal,
    ) -> Result<ProtectiveOrder, ApiError>;

    async fn cancel_protective_exit(
        &self,
        symbol: &str,
        id: ProtectiveOrderId,
    ) -> Result<(), ApiError>;

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<(), ApiError>;

    /// `Ok(None)` when the exchange no longer knows the order list.
    async fn protective_order_status(
        &self,
        id: ProtectiveOrderId,
    ) -> Result<Option<ProtectiveOrder>, ApiError>;

    /// The account's most recent executions on `symbol`, oldest first.
    async fn recent_trades(&self, symbol: &str, limit: u32)
        -> Result<Vec<ExecutedTrade>, ApiError>;
}

/// A concrete implementation of the `ApiClient` for the Binance spot exchange.
pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
    api_secret: String,
    recv_window: u64,
    rules: RwLock<HashMap<String, SymbolRules>>,
}

impl BinanceClient {
    pub fn new(api_config: &ApiConfig, api_key: &str, api_secret: &str) -> Result<Self, ApiError> {
        let base_url = if api_config.live_mode { LIVE_BASE_URL } else { TESTNET_BASE_URL };

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-MBX-APIKEY",
            HeaderValue::from_str(api_key)
                .map_err(|e| ApiError::InvalidData(format!("Invalid API key: {}", e)))?,
        );

        Ok(Self {
            client: reqwest::Client::builder().default_headers(headers).build()?,
            base_url: base_url.to_string(),
            api_secret: api_secret.to_string(),
            recv_window: api_config.recv_window,
            rules: RwLock::new(HashMap::new()),
        })
    }

    async fn send_public<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        Self::decode(response).await
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        params.insert("recvWindow", self.recv_window.to_string());
        params.insert("timestamp", Utc::now().timestamp_millis().to_string());

        let query_string =
            serde_qs::to_string(&params).map_err(|e| ApiError::InvalidData(e.to_string()))?;
        let signature = sign_request(&self.api_secret, &query_string)?;

        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        );
        debug!(%method, path, "signed request");

        let response = self.client.request(method, &url).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str::<T>(&text).map_err(|e| ApiError::Deserialization(e.to_string()))
        } else {
            let api_error: ApiErrorResponse = serde_json::from_str(&text).map_err(|e| {
                ApiError::Deserialization(format!(
                    "Failed to deserialize error response: {}. Original text: {}",
                    e, text
                ))
            })?;
            Err(ApiError::Binance { code: api_error.code, msg: api_error.msg })
        }
    }

    fn cached_rules(&self, symbol: &str) -> Option<SymbolRules> {
        self.rules.read().ok().and_then(|rules| rules.get(symbol).cloned())
    }
}

#[async_trait]
impl ApiClient for BinanceClient {
    async fn current_price(&self, symbol: &str) -> Result<Decimal, ApiError> {
        let ticker: TickerPrice =
            self.send_public("/api/v3/ticker/price", &[("symbol", symbol)]).await?;
        Ok(ticker.price)
    }

    async fn all_prices(&self) -> Result<HashMap<String, Decimal>, ApiError> {
        let tickers: Vec<TickerPrice> = self.send_public("/api/v3/ticker/price", &[]).await?;
        Ok(tickers.into_iter().map(|t| (t.symbol, t.price)).collect())
    }

    async fn account_balances(&self) -> Result<HashMap<String, AssetBalance>, ApiError> {
        let account: AccountResponse =
            self.send_signed(Method::GET, "/api/v3/account", BTreeMap::new()).await?;
        Ok(account
            .balances
            .into_iter()
            .map(|b| (b.asset, AssetBalance { free: b.free, locked: b.locked }))
            .collect())
    }

    async fn open_orders(&self, symbol: Option<&str>) -> Result<Vec<OpenOrder>, ApiError> {
        let mut params = BTreeMap::new();
        if let Some(symbol) = symbol {
            params.insert("symbol", symbol.to_string());
        }
        let orders: Vec<OpenOrderResponse> =
            self.send_signed(Method::GET, "/api/v3/openOrders", params).await?;
        orders.into_iter().map(OpenOrder::try_from).collect()
    }

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ApiError> {
        if let Some(rules) = self.cached_rules(symbol) {
            return Ok(rules);
        }

        let info: ExchangeInfoResponse =
            self.send_public("/api/v3/exchangeInfo", &[("symbol", symbol)]).await?;
        let symbol_info = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ApiError::MissingSymbol(symbol.to_string()))?;
        let rules = SymbolRules::try_from(symbol_info)?;

        if let Ok(mut cache) = self.rules.write() {
            cache.insert(symbol.to_string(), rules.clone());
        }
        Ok(rules)
    }

    async fn place_market_buy(
        &self,
        symbol: &str,
        quote_amount: Decimal,
    ) -> Result<OrderFill, ApiError> {
        let rules = self.symbol_rules(symbol).await?;
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("side", "BUY".to_string());
        params.insert("type", "MARKET".to_string());
        params.insert("quoteOrderQty", format_quote_amount(quote_amount, rules.quote_precision));
        params.insert("newOrderRespType", "FULL".to_string());

        let response: OrderResponse =
            self.send_signed(Method::POST, "/api/v3/order", params).await?;
        Ok(response.into())
    }

    async fn place_market_sell(
        &self,
        symbol: &str,
        quantity: Decimal,
    ) -> Result<OrderFill, ApiError> {
        let rules = self.symbol_rules(symbol).await?;
        let formatted_quantity = format_to_step(quantity, rules.quantity_step);

        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("side", "SELL".to_string());
        params.insert("type", "MARKET".to_string());
        params.insert("quantity", formatted_quantity);
        params.insert("newOrderRespType", "FULL".to_string());

        let response: OrderResponse =
            self.send_signed(Method::POST, "/api/v3/order", params).await?;
        Ok(response.into())
    }

    async fn place_protective_exit(
        &self,
        symbol: &str,
        quantity: Decimal,
        profit_price: Decimal,
        stop_price: Decimal,
    ) -> Result<ProtectiveOrder, ApiError> {
        let rules = self.symbol_rules(symbol).await?;

        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("side", "SELL".to_string());
        params.insert("quantity", format_to_step(quantity, rules.quantity_step));
        params.insert("price", format_to_step(profit_price, rules.price_tick));
        params.insert("stopPrice", format_to_step(stop_price, rules.price_tick));
        params.insert(
            "stopLimitPrice",
            stop_limit_price(stop_price, rules.price_tick).to_string(),
        );
        params.insert("stopLimitTimeInForce", "GTC".to_string());

        let response: OrderListResponse =
            self.send_signed(Method::POST, "/api/v3/order/oco", params).await?;
        ProtectiveOrder::try_from(response)
    }

    async fn cancel_protective_exit(
        &self,
        symbol: &str,
        id: ProtectiveOrderId,
    ) -> Result<(), ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("orderListId", id.to_string());

        let _: OrderListResponse =
            self.send_signed(Method::DELETE, "/api/v3/orderList", params).await?;
        Ok(())
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<(), ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());

        let _: serde_json::Value =
            self.send_signed(Method::DELETE, "/api/v3/openOrders", params).await?;
        Ok(())
    }

    async fn protective_order_status(
        &self,
        id: ProtectiveOrderId,
    ) -> Result<Option<ProtectiveOrder>, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("orderListId", id.to_string());

        match self
            .send_signed::<OrderListResponse>(Method::GET, "/api/v3/orderList", params)
            .await
        {
            Ok(response) => ProtectiveOrder::try_from(response).map(Some),
            Err(e) if e.is_unknown_order() => {
                warn!(order_list_id = %id, "order list unknown to the exchange");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn recent_trades(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<Vec<ExecutedTrade>, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("limit", limit.to_string());

        let trades: Vec<MyTradeResponse> =
            self.send_signed(Method::GET, "/api/v3/myTrades", params).await?;
        trades.into_iter().map(ExecutedTrade::try_from).collect()
    }
}
