use crate::EntryStrategy;
use crate::error::StrategyError;
use chrono::{DateTime, Duration, Utc};
use configuration::AccountSettings;
use core_types::{Decision, Signal, TradeDecision};
use rust_decimal::Decimal;

/// Buys once price has pulled back to the signal's entry without breaking its first stop.
#[derive(Debug, Clone)]
pub struct RetraceEntry {
    /// Signals older than this are expired. `None` disables the age check.
    validity: Option<Duration>,
}

impl RetraceEntry {
    pub fn new(validity: Option<Duration>) -> Result<Self, StrategyError> {
        if let Some(window) = validity {
            if window <= Duration::zero() {
                return Err(StrategyError::InvalidParameters(
                    "signal validity window must be positive".to_string(),
                ));
            }
        }
        Ok(Self { validity })
    }

    pub fn from_settings(settings: &AccountSettings) -> Result<Self, StrategyError> {
        Self::new(settings.signal_validity())
    }
}

impl EntryStrategy for RetraceEntry {
    fn screen<'a>(&self, signal: &'a Signal, now: DateTime<Utc>) -> Result<&'a str, TradeDecision> {
        if let Some(window) = self.validity {
            let age = signal.age(now);
            if age > window {
                return Err(TradeDecision::new(
                    Decision::Fail,
                    signal,
                    format!(
                        "Signal expired: {} minutes old, validity is {} minutes",
                        age.num_minutes(),
                        window.num_minutes()
                    ),
                ));
            }
        }

        match (signal.coin_pair.as_deref(), signal.entry_price) {
            (Some(pair), Some(_)) if !pair.is_empty() => Ok(pair),
            _ => Err(TradeDecision::new(
                Decision::Fail,
                signal,
                "Malformed signal: coin pair or entry price is missing",
            )),
        }
    }

    fn evaluate(
        &self,
        signal: &Signal,
        current_price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> TradeDecision {
        let symbol = match self.screen(signal, now) {
            Ok(symbol) => symbol,
            Err(decision) => return decision,
        };
        // Checked by `screen`.
        let Some(entry_price) = signal.entry_price else {
            return TradeDecision::new(Decision::Fail, signal, "Malformed signal: entry price is missing");
        };

        let Some(price) = current_price else {
            return TradeDecision::new(
                Decision::Fail,
                signal,
                format!("Price unavailable for {}", symbol),
            );
        };

        let Some(stop_loss) = signal.first_stop_loss() else {
            return TradeDecision::new(
                Decision::Fail,
                signal,
                "Signal has no level-1 stop-loss to validate against",
            )
            .with_price(price);
        };

        if price < stop_loss {
            return TradeDecision::new(
                Decision::Fail,
                signal,
                format!(
                    "Price {} is already below stop-loss {}, unsafe to enter",
                    price, stop_loss
                ),
            )
            .with_price(price);
        }

        if price <= entry_price {
            TradeDecision::new(
                Decision::Buy,
                signal,
                format!("Price {} is at or below entry {}", price, entry_price),
            )
            .with_price(price)
        } else {
            TradeDecision::new(
                Decision::Skip,
                signal,
                format!("Price {} has not retraced to entry {}", price, entry_price),
            )
            .with_price(price)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::PriceLevel;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn signal(issued_at: DateTime<Utc>) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            coin_pair: Some("SOLUSDT".into()),
            entry_price: Some(dec!(100)),
            targets: vec![PriceLevel::new(1, dec!(110)), PriceLevel::new(2, dec!(120))],
            stop_losses: vec![PriceLevel::new(1, dec!(90))],
            risk_level: Some("normal".into()),
            issued_at,
        }
    }

    fn strategy() -> RetraceEntry {
        RetraceEntry::new(Some(Duration::minutes(30))).unwrap()
    }

    #[test]
    fn entry_scenarios() {
        let now = Utc::now();
        let s = signal(now);
        assert_eq!(strategy().evaluate(&s, Some(dec!(95)), now).decision, Decision::Buy);
        assert_eq!(strategy().evaluate(&s, Some(dec!(105)), now).decision, Decision::Skip);
        assert_eq!(strategy().evaluate(&s, Some(dec!(85)), now).decision, Decision::Fail);
    }

    #[test]
    fn boundaries_are_inclusive_for_entry_and_stop() {
        let now = Utc::now();
        let s = signal(now);
        let at_entry = strategy().evaluate(&s, Some(dec!(100)), now);
        assert!(at_entry.is_buy());
        assert_eq!(at_entry.current_price, Some(dec!(100)));
        assert!(strategy().evaluate(&s, Some(dec!(90)), now).is_buy());
    }

    #[test]
    fn buy_holds_across_the_whole_entry_band() {
        let now = Utc::now();
        let s = signal(now);
        let mut price = dec!(90);
        while price <= dec!(100) {
            assert!(strategy().evaluate(&s, Some(price), now).is_buy(), "price {}", price);
            price += dec!(0.25);
        }
    }

    #[test]
    fn expired_signal_fails_regardless_of_price() {
        let now = Utc::now();
        let s = signal(now - Duration::minutes(31));
        for price in [Some(dec!(95)), Some(dec!(105)), None] {
            let decision = strategy().evaluate(&s, price, now);
            assert_eq!(decision.decision, Decision::Fail);
            assert!(decision.reason.contains("expired"));
        }
    }

    #[test]
    fn age_filter_can_be_disabled() {
        let now = Utc::now();
        let s = signal(now - Duration::days(3));
        let strategy = RetraceEntry::new(None).unwrap();
        assert!(strategy.evaluate(&s, Some(dec!(95)), now).is_buy());
    }

    #[test]
    fn malformed_and_unpriced_signals_fail() {
        let now = Utc::now();
        let mut s = signal(now);
        assert_eq!(strategy().evaluate(&s, None, now).decision, Decision::Fail);

        s.entry_price = None;
        let decision = strategy().evaluate(&s, Some(dec!(95)), now);
        assert_eq!(decision.decision, Decision::Fail);
        assert!(decision.reason.contains("Malformed"));

        let mut s = signal(now);
        s.coin_pair = None;
        assert_eq!(strategy().evaluate(&s, Some(dec!(95)), now).symbol, "N/A");
    }

    #[test]
    fn missing_stop_loss_fails() {
        let now = Utc::now();
        let mut s = signal(now);
        s.stop_losses.clear();
        assert_eq!(strategy().evaluate(&s, Some(dec!(95)), now).decision, Decision::Fail);
    }

    #[test]
    fn rejects_non_positive_window() {
        assert!(RetraceEntry::new(Some(Duration::zero())).is_err());
    }
}
