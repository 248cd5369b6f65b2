use crate::error::{ExecutorError, LiquidationError, ReplaceError};
use crate::portfolio::AccountSummary;
use api_client::precision::floor_to_step;
use api_client::ApiClient;
use configuration::EngineSettings;
use core_types::{base_asset, OrderFill, ProtectiveOrder, ProtectiveOrderId, Signal};
use risk::{check_eligibility, Eligibility, EligibilityContext};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What the executor produced for a signal it was asked to buy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub symbol: String,
    pub entry_price: Decimal,
    /// The protected quantity: the settled base balance after rounding.
    pub quantity: Decimal,
    /// Buy commission expressed in the quote asset where it can be.
    pub buy_fee: Decimal,
    pub fee_asset: Option<String>,
    pub protective: ProtectiveOrder,
    pub profit_price: Decimal,
    pub stop_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExecutionOutcome {
    Success(ExecutionReport),
    /// Nothing was bought.
    Fail(String),
    /// The buy filled but the position has no protective order.
    CriticalFail { symbol: String, reason: String, fill: OrderFill },
}

/// Runs the multi-step order sequences against one account's exchange client.
///
/// Every sequence that cancels before acting waits `cancel_settle_delay` in
/// between and never acts when the cancel was not confirmed.
pub struct TradeExecutor {
    client: Arc<dyn ApiClient>,
    quote_asset: String,
    settlement_delay: Duration,
    cancel_settle_delay: Duration,
}

impl TradeExecutor {
    pub fn new(
        client: Arc<dyn ApiClient>,
        quote_asset: impl Into<String>,
        settlement_delay: Duration,
        cancel_settle_delay: Duration,
    ) -> Self {
        Self { client, quote_asset: quote_asset.into(), settlement_delay, cancel_settle_delay }
    }

    pub fn from_settings(client: Arc<dyn ApiClient>, settings: &EngineSettings) -> Self {
        Self::new(
            client,
            settings.quote_asset.clone(),
            settings.settlement_delay(),
            settings.cancel_settle_delay(),
        )
    }

    pub fn client(&self) -> &Arc<dyn ApiClient> {
        &self.client
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    /// Pre-trade checks for spending `stake` on `symbol`.
    pub async fn can_execute(
        &self,
        symbol: &str,
        stake: Decimal,
        summary: &AccountSummary,
    ) -> Result<Eligibility, ExecutorError> {
        let open_orders = self.client.open_orders(Some(symbol)).await?;
        let rules = self.client.symbol_rules(symbol).await?;
        let base = base_asset(symbol, &self.quote_asset);

        let ctx = EligibilityContext {
            symbol: symbol.to_string(),
            stake,
            open_orders_on_symbol: open_orders.len(),
            quote_asset: self.quote_asset.clone(),
            quote_free: summary.free_of(&self.quote_asset),
            base_asset: base.to_string(),
            base_holding_value: summary.value_of(base),
            min_notional: rules.min_notional,
        };
        Ok(check_eligibility(&ctx))
    }

    /// Buys `stake` worth of the signal's pair and protects it with an exit order
    /// between the first stop-loss and the final target.
    pub async fn execute(&self, signal: &Signal, stake: Decimal) -> ExecutionOutcome {
        let (symbol, profit_price, stop_price) = match exit_levels(signal) {
            Ok(levels) => levels,
            Err(e) => return ExecutionOutcome::Fail(e.to_string()),
        };

        info!(symbol = %symbol, stake = %stake, "Placing market buy");
        let fill = match self.client.place_market_buy(&symbol, stake).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Market buy failed");
                return ExecutionOutcome::Fail(format!("Market buy failed: {}", e));
            }
        };
        let Some(entry_price) = fill.average_price().filter(|_| fill.is_filled()) else {
            warn!(symbol = %symbol, status = %fill.status, "Market buy was not filled");
            return ExecutionOutcome::Fail(format!("Market buy not filled (status {})", fill.status));
        };

        let base = base_asset(&symbol, &self.quote_asset).to_string();
        let commission = fill.total_commission();
        let fee_asset = fill.commission_asset().map(str::to_string);
        let buy_fee = match fee_asset.as_deref() {
            Some(asset) if asset == base => commission * entry_price,
            _ => commission,
        };
        debug!(symbol = %symbol, entry = %entry_price, executed = %fill.executed_qty, fee = %buy_fee, "Buy filled");

        tokio::time::sleep(self.settlement_delay).await;
        let quantity = self.protectable_quantity(&symbol, &base, &fill).await;

        match self
            .client
            .place_protective_exit(&symbol, quantity, profit_price, stop_price)
            .await
        {
            Ok(protective) => {
                info!(
                    symbol = %symbol,
                    order_list = %protective.id,
                    quantity = %quantity,
                    profit = %profit_price,
                    stop = %stop_price,
                    "Position opened and protected"
                );
                ExecutionOutcome::Success(ExecutionReport {
                    symbol,
                    entry_price,
                    quantity,
                    buy_fee,
                    fee_asset,
                    protective,
                    profit_price,
                    stop_price,
                })
            }
            Err(e) => {
                error!(symbol = %symbol, error = %e, "CRITICAL: buy filled but protective order failed");
                ExecutionOutcome::CriticalFail {
                    symbol,
                    reason: format!("Protective order placement failed: {}", e),
                    fill,
                }
            }
        }
    }

    /// The settled free balance of the bought asset, floored to the symbol's step.
    ///
    /// Falls back to the executed quantity net of any base-asset commission
    /// when the balance cannot be read.
    async fn protectable_quantity(&self, symbol: &str, base: &str, fill: &OrderFill) -> Decimal {
        let settled = match self.client.account_balances().await {
            Ok(balances) => balances.get(base).map(|b| b.free).filter(|free| !free.is_zero()),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Could not read settled balance");
                None
            }
        };
        let quantity = settled.unwrap_or_else(|| {
            let fee_in_base = match fill.commission_asset() {
                Some(asset) if asset == base => fill.total_commission(),
                _ => Decimal::ZERO,
            };
            warn!(symbol = %symbol, "Using executed quantity net of fees as the protected quantity");
            fill.executed_qty - fee_in_base
        });

        match self.client.symbol_rules(symbol).await {
            Ok(rules) => floor_to_step(quantity, rules.quantity_step),
            Err(_) => quantity,
        }
    }

    /// Cancels the protective order and places a new one with `new_stop` over the same quantity.
    pub async fn replace_protective_order(
        &self,
        symbol: &str,
        old_id: ProtectiveOrderId,
        quantity: Decimal,
        profit_price: Decimal,
        new_stop: Decimal,
    ) -> Result<ProtectiveOrder, ReplaceError> {
        self.client
            .cancel_protective_exit(symbol, old_id)
            .await
            .map_err(ReplaceError::CancelFailed)?;
        tokio::time::sleep(self.cancel_settle_delay).await;

        let replaced = self
            .client
            .place_protective_exit(symbol, quantity, profit_price, new_stop)
            .await
            .map_err(ReplaceError::Unprotected)?;
        info!(symbol = %symbol, old = %old_id, new = %replaced.id, stop = %new_stop, "Protective order replaced");
        Ok(replaced)
    }

    /// Cancels the protective order, then sells `quantity` at market.
    pub async fn close_position(
        &self,
        symbol: &str,
        id: ProtectiveOrderId,
        quantity: Decimal,
    ) -> Result<OrderFill, LiquidationError> {
        self.client
            .cancel_protective_exit(symbol, id)
            .await
            .map_err(LiquidationError::CancelFailed)?;
        tokio::time::sleep(self.cancel_settle_delay).await;

        self.client
            .place_market_sell(symbol, quantity)
            .await
            .map_err(LiquidationError::SellFailed)
    }

    /// Cancels every open order on `symbol` and sells whatever base balance is then free.
    pub async fn liquidate_symbol(&self, symbol: &str) -> Result<OrderFill, LiquidationError> {
        self.client
            .cancel_all_open_orders(symbol)
            .await
            .map_err(LiquidationError::CancelFailed)?;
        tokio::time::sleep(self.cancel_settle_delay).await;

        let base = base_asset(symbol, &self.quote_asset);
        let free = self
            .client
            .account_balances()
            .await
            .map_err(LiquidationError::SellFailed)?
            .get(base)
            .map(|b| b.free)
            .unwrap_or_default();
        info!(symbol = %symbol, quantity = %free, "Liquidating symbol");

        self.client
            .place_market_sell(symbol, free)
            .await
            .map_err(LiquidationError::SellFailed)
    }
}

fn exit_levels(signal: &Signal) -> Result<(String, Decimal, Decimal), ExecutorError> {
    let symbol = signal
        .coin_pair
        .clone()
        .ok_or_else(|| ExecutorError::InvalidSignal("signal has no coin pair".to_string()))?;
    let profit = signal
        .final_target()
        .ok_or_else(|| ExecutorError::InvalidSignal(format!("{} has no targets", symbol)))?;
    let stop = signal
        .first_stop_loss()
        .ok_or_else(|| ExecutorError::InvalidSignal(format!("{} has no stop-loss", symbol)))?;
    Ok((symbol, profit, stop))
}
