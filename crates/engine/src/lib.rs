//! # Engine
//!
//! Runs the trading loops for every account:
//!
//! - **Signal Monitors**: one task per (account, signal), registered in the
//!   [`TaskRegistry`], polling the entry strategy until it buys or gives up.
//! - **Supervisor sweep**: reconciles local trades against exchange order
//!   status and applies the stuck-position and trailing-stop policies.
//! - **Autotrade scheduler**: starts monitors for fresh signals on each
//!   account's interval.
//!
//! Exchange state is the source of truth. The store is written only after the
//! exchange confirms an action, so a crash between the two is repaired by the
//! next sweep.

use crate::error::EngineError;
use chrono::Utc;
use core_types::Signal;
use database::Account;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod batch;
pub mod context;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use batch::{run_batch, BatchAction, BatchEntry, BatchLog};
pub use context::{BinanceClients, ClientProvider, EngineContext};
pub use monitor::{evaluate_signal, EntryOutcome, MonitorExit};
pub use registry::{TaskKey, TaskRegistry, TaskTicket};
pub use scheduler::AutotradeScheduler;
pub use supervisor::{close_trade_manually, run_sweep, SweepReport};

/// Registers and spawns a Signal Monitor. Fails if one is already live for the key.
pub fn start_monitor(
    ctx: &Arc<EngineContext>,
    account: Account,
    signal: Signal,
) -> Result<JoinHandle<MonitorExit>, EngineError> {
    let key = (account.account_id, signal.id);
    let ticket = ctx.registry.try_register(key).ok_or(EngineError::AlreadyMonitoring {
        account: account.account_id,
        signal: signal.id,
    })?;
    info!(account = %account.account_id, signal = %signal.id, symbol = ?signal.coin_pair, "Starting signal monitor");
    Ok(tokio::spawn(monitor::run_signal_monitor(ctx.clone(), account, signal, ticket)))
}

/// Starts a monitor on request, unless the account already holds the pair.
pub async fn activate_monitor(
    ctx: &Arc<EngineContext>,
    account_id: Uuid,
    signal_id: Uuid,
) -> Result<JoinHandle<MonitorExit>, EngineError> {
    let account = ctx.store.account(account_id).await?;
    let signal = ctx.store.signal(signal_id).await?.ok_or(EngineError::SignalNotFound(signal_id))?;
    if let Some(pair) = signal.coin_pair.as_deref() {
        let active = ctx.store.active_trades_for_account(account_id).await?;
        if active.iter().any(|t| t.symbol == pair) {
            return Err(EngineError::AlreadyHolding(pair.to_string()));
        }
    }
    start_monitor(ctx, account, signal)
}

/// The long-running daemon: supervisor sweep and autotrade scheduler side by side.
pub struct Engine {
    ctx: Arc<EngineContext>,
    scheduler: Arc<AutotradeScheduler>,
}

impl Engine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx, scheduler: Arc::new(AutotradeScheduler::new()) }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Runs until one of the loops stops, which only happens if it panics.
    pub async fn run(&self) -> Result<(), EngineError> {
        info!(
            sweep_secs = self.ctx.settings.sweep_interval_secs,
            tick_secs = self.ctx.settings.scheduler_tick_secs,
            "Engine starting"
        );
        let supervisor = tokio::spawn(supervisor_loop(self.ctx.clone()));
        let scheduler = tokio::spawn(scheduler_loop(self.ctx.clone(), self.scheduler.clone()));

        let stopped = tokio::select! {
            res = supervisor => ("supervisor", res),
            res = scheduler => ("scheduler", res),
        };
        match stopped {
            (name, Err(e)) => {
                error!(loop_name = name, error = %e, "Engine loop terminated");
                Err(e.into())
            }
            (name, Ok(())) => {
                warn!(loop_name = name, "Engine loop exited");
                Ok(())
            }
        }
    }
}

async fn supervisor_loop(ctx: Arc<EngineContext>) {
    let mut timer = interval(ctx.settings.sweep_interval());
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        if let Err(e) = run_sweep(&ctx).await {
            error!(error = %e, "Supervisor sweep failed");
        }
    }
}

async fn scheduler_loop(ctx: Arc<EngineContext>, scheduler: Arc<AutotradeScheduler>) {
    let mut timer = interval(ctx.settings.scheduler_tick());
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        timer.tick().await;
        if let Err(e) = scheduler.tick(&ctx, Utc::now()).await {
            error!(error = %e, "Autotrade scheduler tick failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{account, harness, seed_position, signal};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn duplicate_monitor_is_rejected() {
        let h = harness();
        let acct = account();
        let s = signal("SOLUSDT", dec!(100), dec!(90), &[dec!(110)]);
        h.exchange.set_price("SOLUSDT", dec!(105));

        let _first = start_monitor(&h.ctx, acct.clone(), s.clone()).unwrap();
        let second = start_monitor(&h.ctx, acct.clone(), s.clone());

        assert!(matches!(second, Err(EngineError::AlreadyMonitoring { .. })));
        h.ctx.registry.cancel(&(acct.account_id, s.id));
    }

    #[tokio::test]
    async fn activation_refuses_a_held_pair() {
        let h = harness();
        let acct = account();
        h.store.add_account(acct.clone());
        let held = signal("SOLUSDT", dec!(100), dec!(90), &[dec!(110)]);
        seed_position(&h, &acct, &held, dec!(1), dec!(0.1));
        let again = signal("SOLUSDT", dec!(98), dec!(88), &[dec!(120)]);
        h.store.add_signal(again.clone());

        let result = activate_monitor(&h.ctx, acct.account_id, again.id).await;

        assert!(matches!(result, Err(EngineError::AlreadyHolding(ref s)) if s == "SOLUSDT"));
        assert!(h.ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn activation_of_unknown_signal_fails() {
        let h = harness();
        let acct = account();
        h.store.add_account(acct.clone());

        let result = activate_monitor(&h.ctx, acct.account_id, Uuid::new_v4()).await;

        assert!(matches!(result, Err(EngineError::SignalNotFound(_))));
    }
}
