use crate::context::EngineContext;
use crate::error::EngineError;
use crate::registry::TaskTicket;
use api_client::ApiClient;
use chrono::{DateTime, Utc};
use core_types::{Decision, Signal, Trade, TradeDecision, TradeStatus};
use database::Account;
use events::Notification;
use executor::{fetch_account_summary, ExecutionOutcome, ExecutionReport, TradeExecutor};
use risk::Eligibility;
use std::sync::Arc;
use strategies::EntryStrategy;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of trying to open a position for a BUY decision.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Opened(Trade),
    /// Pre-trade checks refused the buy; nothing was spent.
    Ineligible(String),
    /// The buy did not go through; nothing was spent.
    Failed(String),
    /// The buy filled but the position is not protected.
    Critical(String),
}

/// Why a Signal Monitor stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorExit {
    Entry(EntryOutcome),
    Rejected(TradeDecision),
    Cancelled,
    Error(String),
}

/// Prices the signal's pair and runs the full evaluation.
///
/// Signals failing the static checks are decided without touching the exchange.
pub async fn evaluate_signal(
    strategy: &dyn EntryStrategy,
    client: &dyn ApiClient,
    signal: &Signal,
    now: DateTime<Utc>,
) -> TradeDecision {
    let symbol = match strategy.screen(signal, now) {
        Ok(symbol) => symbol,
        Err(decision) => return decision,
    };
    let price = match client.current_price(symbol).await {
        Ok(price) => Some(price),
        Err(e) => {
            warn!(symbol = %symbol, error = %e, "Could not fetch current price");
            None
        }
    };
    strategy.evaluate(signal, price, now)
}

/// Runs the pre-trade checks, then the protected buy, and records the trade.
pub async fn open_position(
    ctx: &EngineContext,
    account: &Account,
    signal: &Signal,
    executor: &TradeExecutor,
) -> Result<EntryOutcome, EngineError> {
    let symbol = signal.coin_pair.as_deref().unwrap_or("N/A");
    let stake = account.settings.stake_per_trade;

    let summary = fetch_account_summary(executor.client().as_ref(), executor.quote_asset()).await?;
    if let Eligibility::Ineligible(reason) = executor.can_execute(symbol, stake, &summary).await? {
        info!(account = %account.account_id, symbol = %symbol, reason = %reason, "Skipping ineligible buy");
        return Ok(EntryOutcome::Ineligible(reason));
    }

    match executor.execute(signal, stake).await {
        ExecutionOutcome::Success(report) => {
            let trade = trade_from_report(account.account_id, signal.id, report, Utc::now());
            if let Err(e) = ctx.store.insert_trade(&trade).await {
                error!(
                    trade_id = %trade.id,
                    symbol = %trade.symbol,
                    error = %e,
                    "CRITICAL: protected position opened but the trade could not be recorded"
                );
                ctx.notify(Notification::critical(
                    account.account_id,
                    &trade.symbol,
                    format!("Position is protected on the exchange but was not recorded: {}", e),
                ));
                return Err(e.into());
            }
            ctx.notify(Notification::opened(account.account_id, &trade.symbol, trade.entry_price));
            Ok(EntryOutcome::Opened(trade))
        }
        ExecutionOutcome::Fail(reason) => Ok(EntryOutcome::Failed(reason)),
        ExecutionOutcome::CriticalFail { symbol, reason, fill } => {
            error!(symbol = %symbol, executed = %fill.executed_qty, reason = %reason, "CRITICAL: unprotected position");
            ctx.notify(Notification::critical(account.account_id, &symbol, reason.clone()));
            Ok(EntryOutcome::Critical(reason))
        }
    }
}

pub(crate) fn trade_from_report(
    account_id: Uuid,
    signal_id: Uuid,
    report: ExecutionReport,
    opened_at: DateTime<Utc>,
) -> Trade {
    Trade {
        id: Uuid::new_v4(),
        account_id,
        signal_id,
        symbol: report.symbol,
        status: TradeStatus::Active,
        entry_price: report.entry_price,
        quantity: report.quantity,
        buy_fee: report.buy_fee,
        exit_price: None,
        sell_fee: None,
        net_profit_loss: None,
        protective_order_id: Some(report.protective.id),
        stop_price: report.stop_price,
        profit_price: report.profit_price,
        opened_at,
        closed_at: None,
    }
}

/// Watches one signal for one account until it is bought, rejected, or cancelled.
///
/// Liveness is checked against the registry before every evaluation; the
/// ticket is released on every exit path.
pub async fn run_signal_monitor(
    ctx: Arc<EngineContext>,
    account: Account,
    signal: Signal,
    ticket: TaskTicket,
) -> MonitorExit {
    let exit = monitor_loop(&ctx, &account, &signal, &ticket).await;
    ctx.registry.finish(&ticket);
    info!(account = %account.account_id, signal = %signal.id, exit = ?exit, "Signal monitor finished");
    exit
}

async fn monitor_loop(
    ctx: &EngineContext,
    account: &Account,
    signal: &Signal,
    ticket: &TaskTicket,
) -> MonitorExit {
    let (executor, strategy) = match (ctx.executor_for(account), ctx.strategy_for(account)) {
        (Ok(executor), Ok(strategy)) => (executor, strategy),
        (Err(e), _) | (_, Err(e)) => return MonitorExit::Error(e.to_string()),
    };

    loop {
        if !ctx.registry.is_live(ticket) {
            info!(account = %account.account_id, signal = %signal.id, "Monitor cancelled");
            return MonitorExit::Cancelled;
        }

        let decision = evaluate_signal(&strategy, executor.client().as_ref(), signal, Utc::now()).await;
        debug!(symbol = %decision.symbol, decision = ?decision.decision, reason = %decision.reason, "Evaluated signal");

        match decision.decision {
            Decision::Buy => {
                return match open_position(ctx, account, signal, &executor).await {
                    Ok(outcome) => MonitorExit::Entry(outcome),
                    Err(e) => {
                        warn!(symbol = %decision.symbol, error = %e, "Entry attempt failed");
                        MonitorExit::Error(e.to_string())
                    }
                };
            }
            Decision::Fail => return MonitorExit::Rejected(decision),
            Decision::Skip => tokio::time::sleep(ctx.settings.poll_interval()).await,
        }
    }
}
