//! One-shot evaluation and execution of every recent signal for an account,
//! with the risk-priority swap.

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::monitor::{evaluate_signal, open_position, EntryOutcome};
use crate::supervisor::{close_from_fill, persist_close};
use chrono::{DateTime, Duration, Utc};
use core_types::{Decision, RiskLevel, Signal, TradeStatus};
use database::Account;
use events::Notification;
use executor::{fetch_account_summary, LiquidationError, TradeExecutor};
use risk::{is_swap_candidate, Eligibility, SwapQueue};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchAction {
    Evaluated(Decision),
    Skipped,
    Swapped,
    SwapFailed,
    Opened,
    Failed,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub symbol: String,
    pub action: BatchAction,
    pub detail: String,
}

/// Every step a batch took, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchLog {
    pub entries: Vec<BatchEntry>,
}

impl BatchLog {
    fn push(&mut self, symbol: &str, action: BatchAction, detail: impl Into<String>) {
        self.entries.push(BatchEntry { symbol: symbol.to_string(), action, detail: detail.into() });
    }

    pub fn with_action(&self, action: BatchAction) -> Vec<&str> {
        self.entries.iter().filter(|e| e.action == action).map(|e| e.symbol.as_str()).collect()
    }
}

/// Evaluates the account's recent signals, then buys every BUY.
///
/// With risk priority on, normal-risk buys go first and each may free capital
/// by liquidating one stuck high-risk position; a symbol sold that way is not
/// bought back by a high-risk signal in the same batch.
pub async fn run_batch(ctx: &EngineContext, account_id: Uuid, now: DateTime<Utc>) -> Result<BatchLog, EngineError> {
    let account = ctx.store.account(account_id).await?;
    let executor = ctx.executor_for(&account)?;
    let strategy = ctx.strategy_for(&account)?;
    let mut log = BatchLog::default();

    let lookback = Duration::minutes(account.settings.signal_validity_minutes as i64);
    let mut seen_pairs = HashSet::new();
    let signals: Vec<Signal> = ctx
        .store
        .signals_since(now - lookback)
        .await?
        .into_iter()
        .filter(|s| s.coin_pair.as_ref().is_some_and(|pair| seen_pairs.insert(pair.clone())))
        .collect();

    let mut buys = Vec::new();
    for signal in signals {
        let decision = evaluate_signal(&strategy, executor.client().as_ref(), &signal, now).await;
        log.push(&decision.symbol, BatchAction::Evaluated(decision.decision), decision.reason.clone());
        if decision.is_buy() {
            buys.push(signal);
        }
    }
    info!(account = %account_id, buys = buys.len(), "Batch evaluation complete");

    if !account.settings.prioritize_normal_risk {
        for signal in &buys {
            enter(ctx, &account, signal, &executor, &mut log).await;
        }
        return Ok(log);
    }

    let mut normal = Vec::new();
    let mut high = Vec::new();
    for signal in buys {
        match current_risk(ctx, &signal).await? {
            Some(RiskLevel::Normal) => normal.push(signal),
            Some(RiskLevel::High) => high.push(signal),
            other => {
                let symbol = signal.coin_pair.as_deref().unwrap_or_default();
                log.push(symbol, BatchAction::Skipped, format!("Unclassified risk level {:?}", other));
            }
        }
    }

    let mut swaps = SwapQueue::new(swap_candidates(ctx, &executor).await?);
    for signal in &normal {
        let symbol = signal.coin_pair.as_deref().unwrap_or_default();
        let summary = fetch_account_summary(executor.client().as_ref(), executor.quote_asset()).await?;
        if let Eligibility::Ineligible(reason) =
            executor.can_execute(symbol, account.settings.stake_per_trade, &summary).await?
        {
            log.push(symbol, BatchAction::Skipped, reason);
            continue;
        }
        if let Some(stuck_symbol) = swaps.take() {
            swap_out(ctx, &account, &executor, &stuck_symbol, &mut swaps, &mut log).await?;
        }
        enter(ctx, &account, signal, &executor, &mut log).await;
    }

    for signal in &high {
        let symbol = signal.coin_pair.as_deref().unwrap_or_default();
        if swaps.was_swapped(symbol) {
            log.push(symbol, BatchAction::Skipped, "Sold in a swap during this batch");
            continue;
        }
        enter(ctx, &account, signal, &executor, &mut log).await;
    }
    Ok(log)
}

/// Risk level of the latest signal on the pair, which supersedes the one evaluated.
async fn current_risk(ctx: &EngineContext, signal: &Signal) -> Result<Option<RiskLevel>, EngineError> {
    let Some(pair) = signal.coin_pair.as_deref() else {
        return Ok(None);
    };
    Ok(ctx
        .store
        .latest_signal_for_pair(pair)
        .await?
        .and_then(|latest| latest.risk_level)
        .or_else(|| signal.risk_level.clone()))
}

/// Symbols with open orders whose latest signal is high risk and whose price
/// sits strictly between that signal's first stop-loss and first target.
async fn swap_candidates(ctx: &EngineContext, executor: &TradeExecutor) -> Result<Vec<String>, EngineError> {
    let symbols: BTreeSet<String> =
        executor.client().open_orders(None).await?.into_iter().map(|o| o.symbol).collect();

    let mut candidates = Vec::new();
    for symbol in symbols {
        let Some(signal) = ctx.store.latest_signal_for_pair(&symbol).await? else {
            continue;
        };
        if signal.risk_level != Some(RiskLevel::High) {
            continue;
        }
        let (Some(stop), Some(target)) = (signal.first_stop_loss(), signal.first_target()) else {
            continue;
        };
        match executor.client().current_price(&symbol).await {
            Ok(price) if is_swap_candidate(price, stop, target) => candidates.push(symbol),
            Ok(_) => {}
            Err(e) => warn!(symbol = %symbol, error = %e, "No price for swap candidate"),
        }
    }
    info!(candidates = ?candidates, "Swap candidates");
    Ok(candidates)
}

async fn swap_out(
    ctx: &EngineContext,
    account: &Account,
    executor: &TradeExecutor,
    symbol: &str,
    swaps: &mut SwapQueue,
    log: &mut BatchLog,
) -> Result<(), EngineError> {
    match executor.liquidate_symbol(symbol).await {
        Ok(fill) => {
            swaps.mark_swapped(symbol);
            let trades = ctx.store.active_trades_for_account(account.account_id).await?;
            if let Some(trade) = trades.iter().find(|t| t.symbol == symbol) {
                let close = close_from_fill(trade, TradeStatus::ClosedSwap, &fill, executor.quote_asset(), Utc::now())?;
                persist_close(ctx, trade, close).await?;
            }
            log.push(symbol, BatchAction::Swapped, format!("Sold {} to free capital", fill.executed_qty));
        }
        Err(LiquidationError::CancelFailed(e)) => {
            warn!(symbol = %symbol, error = %e, "Swap cancel failed");
            log.push(symbol, BatchAction::SwapFailed, e.to_string());
        }
        Err(LiquidationError::SellFailed(e)) => {
            swaps.mark_swapped(symbol);
            error!(symbol = %symbol, error = %e, "CRITICAL: orders cancelled for swap but the sell failed");
            ctx.notify(Notification::critical(
                account.account_id,
                symbol,
                format!("Swap left the position unprotected: {}", e),
            ));
            log.push(symbol, BatchAction::SwapFailed, e.to_string());
        }
    }
    Ok(())
}

async fn enter(ctx: &EngineContext, account: &Account, signal: &Signal, executor: &TradeExecutor, log: &mut BatchLog) {
    let symbol = signal.coin_pair.as_deref().unwrap_or_default();
    match open_position(ctx, account, signal, executor).await {
        Ok(EntryOutcome::Opened(trade)) => {
            log.push(symbol, BatchAction::Opened, format!("Bought {} at {}", trade.quantity, trade.entry_price))
        }
        Ok(EntryOutcome::Ineligible(reason)) => log.push(symbol, BatchAction::Skipped, reason),
        Ok(EntryOutcome::Failed(reason)) => log.push(symbol, BatchAction::Failed, reason),
        Ok(EntryOutcome::Critical(reason)) => log.push(symbol, BatchAction::Critical, reason),
        Err(e) => log.push(symbol, BatchAction::Failed, e.to_string()),
    }
}
