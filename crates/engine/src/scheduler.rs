use crate::context::EngineContext;
use crate::error::EngineError;
use crate::start_monitor;
use chrono::{DateTime, Duration, Utc};
use core_types::Signal;
use database::Account;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-account last-trigger times of the autotrade cycle.
///
/// Held in memory only. After a restart every account triggers immediately.
#[derive(Debug, Default)]
pub struct AutotradeScheduler {
    last_run: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl AutotradeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_due(&self, account_id: Uuid, interval: Duration, now: DateTime<Utc>) -> bool {
        match self.last_run.lock().unwrap_or_else(PoisonError::into_inner).get(&account_id) {
            Some(last) => now - *last >= interval,
            None => true,
        }
    }

    pub fn mark_run(&self, account_id: Uuid, at: DateTime<Utc>) {
        self.last_run.lock().unwrap_or_else(PoisonError::into_inner).insert(account_id, at);
    }

    /// Runs the autotrade cycle of every enabled account whose interval has elapsed.
    ///
    /// Returns the accounts that were triggered.
    pub async fn tick(&self, ctx: &Arc<EngineContext>, now: DateTime<Utc>) -> Result<Vec<Uuid>, EngineError> {
        let mut triggered = Vec::new();
        for account in ctx.store.autotrade_accounts().await? {
            if !self.is_due(account.account_id, account.settings.autotrade_interval(), now) {
                continue;
            }
            match run_autotrade_cycle(ctx, &account, now).await {
                Ok(started) => {
                    info!(account = %account.account_id, monitors = started.len(), "Autotrade cycle complete")
                }
                Err(e) => warn!(account = %account.account_id, error = %e, "Autotrade cycle failed"),
            }
            self.mark_run(account.account_id, now);
            triggered.push(account.account_id);
        }
        Ok(triggered)
    }
}

/// Recent signals worth monitoring for `account`, newest first.
///
/// Drops signals on a pair the account already trades or already monitors,
/// keeps only the newest signal per pair, and with risk priority on drops
/// anything not classified as normal risk.
pub fn select_candidates(
    account: &Account,
    signals: Vec<Signal>,
    active_symbols: &HashSet<String>,
    monitored: &HashSet<Uuid>,
) -> Vec<Signal> {
    let mut seen_pairs = HashSet::new();
    signals
        .into_iter()
        .filter(|s| {
            let Some(pair) = s.coin_pair.as_deref() else {
                return false;
            };
            if active_symbols.contains(pair) || monitored.contains(&s.id) {
                return false;
            }
            if account.settings.prioritize_normal_risk && !s.is_normal_risk() {
                debug!(symbol = %pair, risk = ?s.risk_level, "Skipping signal outside normal risk");
                return false;
            }
            seen_pairs.insert(pair.to_string())
        })
        .collect()
}

/// One autotrade cycle: starts a Signal Monitor for each candidate signal.
pub async fn run_autotrade_cycle(
    ctx: &Arc<EngineContext>,
    account: &Account,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>, EngineError> {
    let lookback = Duration::minutes(account.settings.signal_validity_minutes as i64);
    let signals = ctx.store.signals_since(now - lookback).await?;
    if signals.is_empty() {
        debug!(account = %account.account_id, "No recent signals");
        return Ok(Vec::new());
    }

    let active_symbols: HashSet<String> = ctx
        .store
        .active_trades_for_account(account.account_id)
        .await?
        .into_iter()
        .map(|t| t.symbol)
        .collect();
    let monitored: HashSet<Uuid> = ctx.registry.signals_for_account(account.account_id).into_iter().collect();

    let mut started = Vec::new();
    for signal in select_candidates(account, signals, &active_symbols, &monitored) {
        let signal_id = signal.id;
        match start_monitor(ctx, account.clone(), signal) {
            Ok(_) => started.push(signal_id),
            Err(e) => debug!(signal = %signal_id, error = %e, "Monitor not started"),
        }
    }
    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{account, harness, signal};
    use core_types::RiskLevel;
    use rust_decimal_macros::dec;

    #[test]
    fn first_trigger_is_immediate_then_waits_for_interval() {
        let scheduler = AutotradeScheduler::new();
        let id = Uuid::new_v4();
        let now = Utc::now();

        assert!(scheduler.is_due(id, Duration::minutes(5), now));
        scheduler.mark_run(id, now);
        assert!(!scheduler.is_due(id, Duration::minutes(5), now + Duration::minutes(4)));
        assert!(scheduler.is_due(id, Duration::minutes(5), now + Duration::minutes(5)));
    }

    #[test]
    fn candidates_exclude_held_monitored_and_risky_signals() {
        let acct = account();
        let held = signal("SOLUSDT", dec!(100), dec!(90), &[dec!(110)]);
        let monitored = signal("ETHUSDT", dec!(100), dec!(90), &[dec!(110)]);
        let mut risky = signal("XRPUSDT", dec!(1), dec!(0.9), &[dec!(1.1)]);
        risky.risk_level = Some(RiskLevel::High);
        let fresh = signal("ADAUSDT", dec!(1), dec!(0.9), &[dec!(1.1)]);
        let older_duplicate = signal("ADAUSDT", dec!(1), dec!(0.9), &[dec!(1.1)]);

        let candidates = select_candidates(
            &acct,
            vec![held, monitored.clone(), risky.clone(), fresh.clone(), older_duplicate],
            &HashSet::from(["SOLUSDT".to_string()]),
            &HashSet::from([monitored.id]),
        );
        assert_eq!(candidates, vec![fresh]);

        let mut relaxed = account();
        relaxed.settings.prioritize_normal_risk = false;
        let candidates = select_candidates(&relaxed, vec![risky.clone()], &HashSet::new(), &HashSet::new());
        assert_eq!(candidates, vec![risky]);
    }

    #[tokio::test]
    async fn tick_starts_monitors_once_per_interval() {
        let h = harness();
        let mut acct = account();
        acct.settings.autotrade_enabled = true;
        h.store.add_account(acct.clone());
        let s = signal("SOLUSDT", dec!(100), dec!(90), &[dec!(110)]);
        h.store.add_signal(s.clone());
        h.exchange.set_price("SOLUSDT", dec!(105));
        let scheduler = AutotradeScheduler::new();
        let now = Utc::now();

        assert_eq!(scheduler.tick(&h.ctx, now).await.unwrap(), vec![acct.account_id]);
        assert!(h.ctx.registry.contains(&(acct.account_id, s.id)));

        assert!(scheduler.tick(&h.ctx, now + Duration::minutes(1)).await.unwrap().is_empty());
        h.ctx.registry.cancel(&(acct.account_id, s.id));
    }

    #[tokio::test]
    async fn disabled_accounts_are_never_triggered() {
        let h = harness();
        h.store.add_account(account());
        let scheduler = AutotradeScheduler::new();

        assert!(scheduler.tick(&h.ctx, Utc::now()).await.unwrap().is_empty());
    }
}
