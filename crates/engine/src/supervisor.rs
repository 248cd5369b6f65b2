//! Position supervision: reconciling closed positions against the exchange,
//! and the stuck-position and trailing-stop policies applied to open ones.

use crate::context::EngineContext;
use crate::error::EngineError;
use api_client::ApiClient;
use chrono::{DateTime, Utc};
use core_types::{
    base_asset, OpenOrder, OrderFill, PriceLevel, ProtectiveOrderId, Signal, Trade, TradeClose, TradeStatus,
};
use database::{Account, DbError};
use events::Notification;
use executor::{LiquidationError, ReplaceError, TradeExecutor};
use risk::{StuckPolicy, TrailingPolicy};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub closed: usize,
    pub trailed: usize,
    pub liquidated: usize,
    pub failed: usize,
}

impl SweepReport {
    fn absorb(&mut self, other: SweepReport) {
        self.checked += other.checked;
        self.closed += other.closed;
        self.trailed += other.trailed;
        self.liquidated += other.liquidated;
        self.failed += other.failed;
    }
}

/// One full supervision pass: reconcile every active trade, then manage the
/// open protective orders of each account that has a policy switched on.
pub async fn run_sweep(ctx: &EngineContext) -> Result<SweepReport, EngineError> {
    let mut report = reconcile_active_trades(ctx).await?;

    for account in ctx.store.accounts().await? {
        if !account.settings.stuck_enabled && !account.settings.trailing_enabled {
            continue;
        }
        match manage_positions(ctx, &account).await {
            Ok(managed) => report.absorb(managed),
            Err(e) => {
                warn!(account = %account.account_id, error = %e, "Position management failed");
                report.failed += 1;
            }
        }
    }

    info!(
        checked = report.checked,
        closed = report.closed,
        trailed = report.trailed,
        liquidated = report.liquidated,
        failed = report.failed,
        "Supervisor sweep complete"
    );
    Ok(report)
}

/// Closes local trades whose protective order is no longer working on the exchange.
///
/// A failure on one trade is logged and counted; the rest are still processed.
pub async fn reconcile_active_trades(ctx: &EngineContext) -> Result<SweepReport, EngineError> {
    let trades = ctx.store.active_trades().await?;
    let mut accounts: HashMap<Uuid, Account> = HashMap::new();
    let mut report = SweepReport::default();

    for trade in trades {
        report.checked += 1;
        let result = reconcile_with_account(ctx, &mut accounts, &trade).await;
        match result {
            Ok(Some(_)) => report.closed += 1,
            Ok(None) => {}
            Err(e) => {
                warn!(trade_id = %trade.id, symbol = %trade.symbol, error = %e, "Failed to reconcile trade");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

async fn reconcile_with_account(
    ctx: &EngineContext,
    accounts: &mut HashMap<Uuid, Account>,
    trade: &Trade,
) -> Result<Option<TradeClose>, EngineError> {
    if !accounts.contains_key(&trade.account_id) {
        let account = ctx.store.account(trade.account_id).await?;
        accounts.insert(trade.account_id, account);
    }
    let account = &accounts[&trade.account_id];
    let client = ctx.client_for(account)?;
    reconcile_trade(ctx, client.as_ref(), trade).await
}

/// Checks one trade against the exchange and closes it if its protective order is done.
///
/// A done order is first checked for a live replacement on the symbol that no
/// trade owns yet; such a replacement is linked to the trade instead of closing
/// it. Otherwise the exit is taken from the latest sell executed since the trade
/// opened. When none is found the trade is left for the next sweep.
pub async fn reconcile_trade(
    ctx: &EngineContext,
    client: &dyn ApiClient,
    trade: &Trade,
) -> Result<Option<TradeClose>, EngineError> {
    let Some(id) = trade.protective_order_id else {
        warn!(trade_id = %trade.id, "Active trade has no protective order on record");
        return Ok(None);
    };

    match client.protective_order_status(id).await? {
        Some(order) if !order.status.is_done() => return Ok(None),
        Some(_) => {}
        None => debug!(trade_id = %trade.id, order_list = %id, "Protective order unknown to the exchange"),
    }

    if let Some(live) = unlinked_protection(ctx, client, trade, id).await? {
        info!(
            trade_id = %trade.id,
            old_list = %id,
            new_list = %live.id,
            stop = %live.stop_price,
            "Relinking trade to its working protective order"
        );
        ctx.store.update_protection(trade.id, live.id, live.stop_price).await?;
        return Ok(None);
    }

    let executions = client.recent_trades(&trade.symbol, ctx.settings.recent_trade_limit).await?;
    let Some(last_sell) = executions
        .iter()
        .filter(|t| !t.is_buyer && t.time >= trade.opened_at)
        .max_by_key(|t| t.time)
    else {
        warn!(trade_id = %trade.id, symbol = %trade.symbol, "Position closed but no sell found in recent executions");
        return Ok(None);
    };

    let sell_fee = fee_in_quote(
        last_sell.commission,
        &last_sell.commission_asset,
        last_sell.price,
        &trade.symbol,
        &ctx.settings.quote_asset,
    );
    let status = trade.closing_status_for(last_sell.price);
    let close = trade.close_at(status, last_sell.price, sell_fee, Utc::now());
    persist_close(ctx, trade, close).await
}

/// The newest working protective order on the trade's symbol that is not the
/// recorded one and is not owned by another trade of the account.
async fn unlinked_protection(
    ctx: &EngineContext,
    client: &dyn ApiClient,
    trade: &Trade,
    recorded: ProtectiveOrderId,
) -> Result<Option<ProtectedPosition>, EngineError> {
    let orders = client.open_orders(Some(&trade.symbol)).await?;
    let mut candidates: Vec<ProtectedPosition> =
        protected_positions(&orders).into_iter().filter(|p| p.id != recorded).collect();
    candidates.sort_by_key(|p| std::cmp::Reverse(p.placed_at));

    for candidate in candidates {
        if ctx.store.trade_by_protective_order(trade.account_id, candidate.id).await?.is_none() {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Records a terminal close and notifies the owner. A trade that was already
/// closed elsewhere yields `None`.
pub(crate) async fn persist_close(
    ctx: &EngineContext,
    trade: &Trade,
    close: TradeClose,
) -> Result<Option<TradeClose>, EngineError> {
    match ctx.store.close_trade(trade.id, &close).await {
        Ok(()) => {
            info!(
                trade_id = %trade.id,
                symbol = %trade.symbol,
                status = %close.status,
                exit = %close.exit_price,
                pnl = %close.net_profit_loss,
                "Trade closed"
            );
            ctx.notify(Notification::closed(
                trade.account_id,
                &trade.symbol,
                close.status,
                close.net_profit_loss,
            ));
            Ok(Some(close))
        }
        Err(DbError::AlreadyClosed(_)) => {
            debug!(trade_id = %trade.id, "Trade was already closed");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Commission expressed in the quote asset. Commissions paid in a third asset
/// are taken at face value.
pub(crate) fn fee_in_quote(
    commission: Decimal,
    commission_asset: &str,
    price: Decimal,
    symbol: &str,
    quote_asset: &str,
) -> Decimal {
    if commission_asset != quote_asset && commission_asset == base_asset(symbol, quote_asset) {
        commission * price
    } else {
        commission
    }
}

/// Builds the closing record of `trade` from a market sell.
pub(crate) fn close_from_fill(
    trade: &Trade,
    status: TradeStatus,
    fill: &OrderFill,
    quote_asset: &str,
    closed_at: DateTime<Utc>,
) -> Result<TradeClose, EngineError> {
    let exit_price = fill
        .average_price()
        .filter(|_| fill.is_filled())
        .ok_or_else(|| EngineError::SellNotFilled(trade.symbol.clone()))?;
    let sell_fee = fee_in_quote(
        fill.total_commission(),
        fill.commission_asset().unwrap_or(quote_asset),
        exit_price,
        &trade.symbol,
        quote_asset,
    );
    Ok(trade.close_at(status, exit_price, sell_fee, closed_at))
}

/// One protective order as seen on the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectedPosition {
    pub id: ProtectiveOrderId,
    pub symbol: String,
    pub quantity: Decimal,
    pub stop_price: Decimal,
    /// Limit price of the take-profit leg, when it is still working.
    pub profit_price: Option<Decimal>,
    pub placed_at: DateTime<Utc>,
}

/// Groups open orders by their protective order. Orders outside any protective
/// order, and protective orders without a stop leg, are ignored.
pub fn protected_positions(orders: &[OpenOrder]) -> Vec<ProtectedPosition> {
    let mut legs: BTreeMap<ProtectiveOrderId, Vec<&OpenOrder>> = BTreeMap::new();
    for order in orders {
        if let Some(id) = order.protective_order_id {
            legs.entry(id).or_default().push(order);
        }
    }

    legs.into_iter()
        .filter_map(|(id, legs)| {
            let stop = legs.iter().find(|o| o.is_stop_leg())?;
            Some(ProtectedPosition {
                id,
                symbol: stop.symbol.clone(),
                quantity: stop.quantity,
                stop_price: stop.stop_price,
                profit_price: legs.iter().find(|o| o.is_take_profit_leg()).map(|o| o.price),
                placed_at: stop.created_at,
            })
        })
        .collect()
}

/// Applies the stuck-position and trailing-stop policies to every protective
/// order of `account`. Stuck handling wins: a liquidated position is not trailed.
pub async fn manage_positions(ctx: &EngineContext, account: &Account) -> Result<SweepReport, EngineError> {
    let settings = &account.settings;
    let stuck = settings.stuck_enabled.then(|| StuckPolicy::from_settings(settings));
    let trailing = if settings.trailing_enabled {
        Some(TrailingPolicy::from_settings(settings)?)
    } else {
        None
    };

    let executor = ctx.executor_for(account)?;
    let orders = executor.client().open_orders(None).await?;
    let mut report = SweepReport::default();

    for position in protected_positions(&orders) {
        report.checked += 1;
        let result = manage_position(ctx, account, &executor, &position, stuck.as_ref(), trailing.as_ref()).await;
        match result {
            Ok(PositionAction::Liquidated) => report.liquidated += 1,
            Ok(PositionAction::Trailed) => report.trailed += 1,
            Ok(PositionAction::Unchanged) => {}
            Ok(PositionAction::Unprotected) => report.failed += 1,
            Err(e) => {
                warn!(symbol = %position.symbol, order_list = %position.id, error = %e, "Failed to manage position");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PositionAction {
    Unchanged,
    Liquidated,
    Trailed,
    /// The old protective order was cancelled and no new one is working.
    Unprotected,
}

async fn manage_position(
    ctx: &EngineContext,
    account: &Account,
    executor: &TradeExecutor,
    position: &ProtectedPosition,
    stuck: Option<&StuckPolicy>,
    trailing: Option<&TrailingPolicy>,
) -> Result<PositionAction, EngineError> {
    let trade = ctx.store.trade_by_protective_order(account.account_id, position.id).await?;
    let Some(signal) = signal_for(ctx, trade.as_ref(), &position.symbol).await? else {
        debug!(symbol = %position.symbol, "No signal for protected position, leaving it alone");
        return Ok(PositionAction::Unchanged);
    };
    let now = Utc::now();
    let price = executor.client().current_price(&position.symbol).await?;

    if let Some(policy) = stuck {
        if policy.is_stuck(position.placed_at, now, price, signal.first_target()) {
            info!(symbol = %position.symbol, order_list = %position.id, price = %price, "Liquidating stuck position");
            return liquidate_stuck(ctx, account, executor, position, trade.as_ref()).await;
        }
    }

    let Some(policy) = trailing else {
        return Ok(PositionAction::Unchanged);
    };
    let Some(profit_price) = signal.final_target().or(position.profit_price) else {
        return Ok(PositionAction::Unchanged);
    };
    // The stop leg must stay below the take-profit leg it is paired with.
    let levels: Vec<PriceLevel> = signal.targets.iter().filter(|t| t.price < profit_price).cloned().collect();
    let Some(new_stop) = policy.next_stop(&levels, price, position.stop_price) else {
        return Ok(PositionAction::Unchanged);
    };

    info!(symbol = %position.symbol, old_stop = %position.stop_price, new_stop = %new_stop, "Trailing stop");
    match executor
        .replace_protective_order(&position.symbol, position.id, position.quantity, profit_price, new_stop)
        .await
    {
        Ok(replaced) => {
            if let Some(trade) = &trade {
                ctx.store.update_protection(trade.id, replaced.id, new_stop).await?;
            }
            Ok(PositionAction::Trailed)
        }
        Err(ReplaceError::CancelFailed(e)) => {
            warn!(symbol = %position.symbol, error = %e, "Cancel failed, stop left unchanged");
            Ok(PositionAction::Unchanged)
        }
        Err(ReplaceError::Unprotected(e)) => {
            error!(symbol = %position.symbol, error = %e, "CRITICAL: position left without a protective order");
            ctx.notify(Notification::critical(
                account.account_id,
                &position.symbol,
                format!("Stop could not be re-placed at {} after cancelling: {}", new_stop, e),
            ));
            Ok(PositionAction::Unprotected)
        }
    }
}

async fn liquidate_stuck(
    ctx: &EngineContext,
    account: &Account,
    executor: &TradeExecutor,
    position: &ProtectedPosition,
    trade: Option<&Trade>,
) -> Result<PositionAction, EngineError> {
    match executor.close_position(&position.symbol, position.id, position.quantity).await {
        Ok(fill) => {
            if let Some(trade) = trade {
                let close = close_from_fill(trade, TradeStatus::ClosedStuck, &fill, executor.quote_asset(), Utc::now())?;
                persist_close(ctx, trade, close).await?;
            }
            Ok(PositionAction::Liquidated)
        }
        Err(LiquidationError::CancelFailed(e)) => {
            warn!(symbol = %position.symbol, error = %e, "Cancel failed, stuck position left for the next cycle");
            Ok(PositionAction::Unchanged)
        }
        Err(LiquidationError::SellFailed(e)) => {
            error!(symbol = %position.symbol, error = %e, "CRITICAL: protective order cancelled but the sell failed");
            ctx.notify(Notification::critical(
                account.account_id,
                &position.symbol,
                format!("Stuck position unprotected, market sell failed: {}", e),
            ));
            Err(LiquidationError::SellFailed(e).into())
        }
    }
}

/// The trade's own signal, or the latest signal for the pair.
async fn signal_for(
    ctx: &EngineContext,
    trade: Option<&Trade>,
    symbol: &str,
) -> Result<Option<Signal>, EngineError> {
    if let Some(trade) = trade {
        if let Some(signal) = ctx.store.signal(trade.signal_id).await? {
            return Ok(Some(signal));
        }
    }
    Ok(ctx.store.latest_signal_for_pair(symbol).await?)
}

/// Cancels the trade's protective order, sells its quantity and closes it as manual.
pub async fn close_trade_manually(ctx: &EngineContext, trade_id: Uuid) -> Result<TradeClose, EngineError> {
    let trade = ctx.store.trade(trade_id).await?.ok_or(EngineError::TradeNotFound(trade_id))?;
    if trade.status.is_terminal() {
        return Err(EngineError::TradeNotActive(trade_id));
    }
    let id = trade.protective_order_id.ok_or(EngineError::MissingProtection(trade_id))?;
    let account = ctx.store.account(trade.account_id).await?;
    let executor = ctx.executor_for(&account)?;

    let fill = match executor.close_position(&trade.symbol, id, trade.quantity).await {
        Ok(fill) => fill,
        Err(LiquidationError::SellFailed(e)) => {
            error!(trade_id = %trade.id, symbol = %trade.symbol, error = %e, "CRITICAL: manual close cancelled protection but the sell failed");
            ctx.notify(Notification::critical(
                account.account_id,
                &trade.symbol,
                format!("Manual close left the position unprotected: {}", e),
            ));
            return Err(LiquidationError::SellFailed(e).into());
        }
        Err(e) => return Err(e.into()),
    };

    let close = close_from_fill(&trade, TradeStatus::ClosedManual, &fill, executor.quote_asset(), Utc::now())?;
    persist_close(ctx, &trade, close.clone()).await?;
    Ok(close)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{account, harness, seed_position, signal, Harness};
    use api_client::mock::MockCall;
    use chrono::Duration;
    use core_types::OrderSide;
    use events::NotificationKind;
    use rust_decimal_macros::dec;

    /// Opens a 1 SOL position at 100 protected between 90 and the final target.
    fn open_trade(h: &Harness, acct: &Account, targets: &[Decimal]) -> Trade {
        let s = signal("SOLUSDT", dec!(100), dec!(90), targets);
        seed_position(h, acct, &s, dec!(1), dec!(0.1))
    }

    fn managed_account(h: &Harness, stuck: bool, trailing: bool) -> Account {
        let mut acct = account();
        acct.settings.stuck_enabled = stuck;
        acct.settings.trailing_enabled = trailing;
        h.store.add_account(acct.clone());
        acct
    }

    #[tokio::test]
    async fn filled_stop_leg_closes_as_stop_loss() {
        let h = harness();
        let acct = managed_account(&h, false, false);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        h.exchange.fill_protective(trade.protective_order_id.unwrap(), dec!(89.5), Utc::now());

        let report = run_sweep(&h.ctx).await.unwrap();

        assert_eq!(report.closed, 1);
        let closed = h.store.trade_now(trade.id);
        assert_eq!(closed.status, TradeStatus::ClosedStopLoss);
        assert_eq!(closed.exit_price, Some(dec!(89.5)));
        assert_eq!(closed.sell_fee, Some(dec!(0.0895)));
        assert_eq!(closed.net_profit_loss, Some(dec!(-10.6895)));
    }

    #[tokio::test]
    async fn filled_profit_leg_closes_as_take_profit_and_notifies() {
        let h = harness();
        let acct = managed_account(&h, false, false);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        h.exchange.fill_protective(trade.protective_order_id.unwrap(), dec!(130), Utc::now());
        let mut notifications = h.ctx.subscribe();

        run_sweep(&h.ctx).await.unwrap();

        assert_eq!(h.store.trade_now(trade.id).status, TradeStatus::ClosedTakeProfit);
        match notifications.recv().await.unwrap().kind {
            NotificationKind::Closed { status, .. } => assert_eq!(status, TradeStatus::ClosedTakeProfit),
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[tokio::test]
    async fn working_protective_order_leaves_trade_active() {
        let h = harness();
        let acct = managed_account(&h, false, false);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);

        let report = run_sweep(&h.ctx).await.unwrap();

        assert_eq!(report.closed, 0);
        assert_eq!(h.store.trade_now(trade.id).status, TradeStatus::Active);
        assert_eq!(h.exchange.count(MockCall::RecentTrades), 0);
    }

    #[tokio::test]
    async fn replaced_protection_is_relinked_instead_of_closed() {
        let h = harness();
        let acct = managed_account(&h, false, false);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        let old = trade.protective_order_id.unwrap();
        h.exchange.cancel_protective_exit("SOLUSDT", old).await.unwrap();
        let replaced = h.exchange.place_protective_exit("SOLUSDT", dec!(1), dec!(130), dec!(110)).await.unwrap();
        h.exchange.clear_calls();

        let report = run_sweep(&h.ctx).await.unwrap();

        assert_eq!(report.closed, 0);
        let relinked = h.store.trade_now(trade.id);
        assert_eq!(relinked.status, TradeStatus::Active);
        assert_eq!(relinked.protective_order_id, Some(replaced.id));
        assert_eq!(relinked.stop_price, dec!(110));
        assert_eq!(h.exchange.count(MockCall::RecentTrades), 0);

        let report = run_sweep(&h.ctx).await.unwrap();
        assert_eq!(report.closed, 0);
        assert_eq!(h.exchange.count(MockCall::OpenOrders), 1);
    }

    #[tokio::test]
    async fn forgotten_protection_closes_from_recent_sell() {
        let h = harness();
        let acct = managed_account(&h, false, false);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        let id = trade.protective_order_id.unwrap();
        h.exchange.fill_protective(id, dec!(130), Utc::now());
        h.exchange.forget_protective(id);
        assert!(!h.exchange.protective_ids().contains(&id));

        let report = run_sweep(&h.ctx).await.unwrap();

        assert_eq!(report.closed, 1);
        let closed = h.store.trade_now(trade.id);
        assert_eq!(closed.status, TradeStatus::ClosedTakeProfit);
        assert_eq!(closed.exit_price, Some(dec!(130)));
    }

    #[tokio::test]
    async fn sells_from_before_the_trade_opened_are_ignored() {
        let h = harness();
        let acct = managed_account(&h, false, false);
        h.exchange.set_balance("SOL", dec!(1));
        let earlier = h.exchange.seed_protective("SOLUSDT", dec!(1), dec!(130), dec!(90));
        h.exchange.fill_protective(earlier, dec!(130), Utc::now() - Duration::days(1));
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        h.exchange.forget_protective(trade.protective_order_id.unwrap());

        let report = run_sweep(&h.ctx).await.unwrap();

        assert_eq!(report.closed, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(h.store.trade_now(trade.id).status, TradeStatus::Active);
        assert_eq!(h.exchange.count(MockCall::RecentTrades), 1);
    }

    #[tokio::test]
    async fn one_failing_trade_does_not_stop_the_sweep() {
        let h = harness();
        let acct = managed_account(&h, false, false);
        let healthy = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        h.exchange.fill_protective(healthy.protective_order_id.unwrap(), dec!(130), Utc::now());
        let mut orphan = healthy.clone();
        orphan.id = Uuid::new_v4();
        orphan.account_id = Uuid::new_v4();
        h.store.add_trade(orphan);

        let report = run_sweep(&h.ctx).await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.closed, 1);
        assert_eq!(h.store.trade_now(healthy.id).status, TradeStatus::ClosedTakeProfit);
    }

    #[tokio::test]
    async fn stuck_position_is_liquidated_after_threshold() {
        let h = harness();
        let acct = managed_account(&h, true, true);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        let id = trade.protective_order_id.unwrap();
        h.exchange.set_placed_at(id, Utc::now() - Duration::hours(7));
        h.exchange.set_price("SOLUSDT", dec!(101));

        let report = manage_positions(&h.ctx, &acct).await.unwrap();

        assert_eq!(report.liquidated, 1);
        assert_eq!(report.trailed, 0);
        let closed = h.store.trade_now(trade.id);
        assert_eq!(closed.status, TradeStatus::ClosedStuck);
        assert_eq!(closed.exit_price, Some(dec!(101)));
    }

    #[tokio::test]
    async fn young_position_is_not_stuck() {
        let h = harness();
        let acct = managed_account(&h, true, false);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        h.exchange.set_placed_at(trade.protective_order_id.unwrap(), Utc::now() - Duration::hours(5));
        h.exchange.set_price("SOLUSDT", dec!(101));

        let report = manage_positions(&h.ctx, &acct).await.unwrap();

        assert_eq!(report.liquidated, 0);
        assert_eq!(h.exchange.count(MockCall::CancelProtective), 0);
    }

    #[tokio::test]
    async fn stuck_cancel_failure_leaves_position_untouched() {
        let h = harness();
        let acct = managed_account(&h, true, false);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        h.exchange.set_placed_at(trade.protective_order_id.unwrap(), Utc::now() - Duration::hours(7));
        h.exchange.set_price("SOLUSDT", dec!(101));
        h.exchange.fail_on(MockCall::CancelProtective);

        let report = manage_positions(&h.ctx, &acct).await.unwrap();

        assert_eq!(report.liquidated, 0);
        assert_eq!(h.exchange.count(MockCall::MarketSell), 0);
        assert_eq!(h.store.trade_now(trade.id).status, TradeStatus::Active);
    }

    #[tokio::test]
    async fn trailing_stop_only_moves_up() {
        let h = harness();
        let acct = managed_account(&h, false, true);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(120), dec!(130), dec!(150)]);

        let mut stops = vec![trade.stop_price];
        for price in [dec!(105), dec!(111), dec!(121), dec!(121), dec!(125), dec!(140)] {
            h.exchange.set_price("SOLUSDT", price);
            manage_positions(&h.ctx, &acct).await.unwrap();
            stops.push(h.store.trade_now(trade.id).stop_price);
        }

        assert_eq!(stops, vec![dec!(90), dec!(90), dec!(110), dec!(120), dec!(120), dec!(120), dec!(130)]);
        assert!(stops.windows(2).all(|w| w[0] <= w[1]));

        let orders = h.exchange.working_orders();
        let stop_leg = orders.iter().find(|o| o.is_stop_leg()).unwrap();
        assert_eq!(stop_leg.stop_price, dec!(130));
        assert_eq!(stop_leg.side, OrderSide::Sell);
        let profit_leg = orders.iter().find(|o| o.is_take_profit_leg()).unwrap();
        assert_eq!(profit_leg.price, dec!(150));
        assert_eq!(h.store.trade_now(trade.id).protective_order_id, Some(stop_leg.protective_order_id.unwrap()));
    }

    #[tokio::test]
    async fn trailing_stops_below_the_take_profit_leg() {
        let h = harness();
        let acct = managed_account(&h, false, true);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        h.exchange.set_price("SOLUSDT", dec!(140));

        let report = manage_positions(&h.ctx, &acct).await.unwrap();

        assert_eq!(report.trailed, 1);
        assert_eq!(h.store.trade_now(trade.id).stop_price, dec!(110));
        let orders = h.exchange.working_orders();
        assert_eq!(orders.iter().find(|o| o.is_stop_leg()).unwrap().stop_price, dec!(110));
        assert_eq!(orders.iter().find(|o| o.is_take_profit_leg()).unwrap().price, dec!(130));

        let report = manage_positions(&h.ctx, &acct).await.unwrap();
        assert_eq!(report.trailed, 0);
    }

    #[tokio::test]
    async fn failed_replacement_is_reported_as_critical() {
        let h = harness();
        let acct = managed_account(&h, false, true);
        open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        h.exchange.set_price("SOLUSDT", dec!(112));
        h.exchange.fail_on(MockCall::PlaceProtective);
        let mut notifications = h.ctx.subscribe();

        let report = manage_positions(&h.ctx, &acct).await.unwrap();

        assert_eq!(report.failed, 1);
        assert!(notifications.recv().await.unwrap().is_critical());
    }

    #[tokio::test]
    async fn manual_close_sells_and_marks_manual() {
        let h = harness();
        let acct = managed_account(&h, false, false);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        h.exchange.set_price("SOLUSDT", dec!(105));

        let close = close_trade_manually(&h.ctx, trade.id).await.unwrap();

        assert_eq!(close.status, TradeStatus::ClosedManual);
        assert_eq!(close.exit_price, dec!(105));
        assert_eq!(close.sell_fee, dec!(0.105));
        assert_eq!(close.net_profit_loss, dec!(4.795));
        assert!(matches!(
            close_trade_manually(&h.ctx, trade.id).await,
            Err(EngineError::TradeNotActive(_))
        ));
    }

    #[tokio::test]
    async fn manual_close_does_not_sell_without_cancel() {
        let h = harness();
        let acct = managed_account(&h, false, false);
        let trade = open_trade(&h, &acct, &[dec!(110), dec!(130)]);
        h.exchange.set_price("SOLUSDT", dec!(105));
        h.exchange.fail_on(MockCall::CancelProtective);

        assert!(close_trade_manually(&h.ctx, trade.id).await.is_err());
        assert_eq!(h.exchange.count(MockCall::MarketSell), 0);
        assert_eq!(h.store.trade_now(trade.id).status, TradeStatus::Active);
    }
}
