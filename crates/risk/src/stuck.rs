use chrono::{DateTime, Duration, Utc};
use configuration::AccountSettings;
use rust_decimal::Decimal;

/// Flags positions that have sat below their first target for too long.
#[derive(Debug, Clone, PartialEq)]
pub struct StuckPolicy {
    pub max_age: Duration,
}

impl StuckPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn from_settings(settings: &AccountSettings) -> Self {
        Self::new(settings.stuck_duration())
    }

    /// True when the protective order is older than `max_age` and price is
    /// still under the first target. Without a first target nothing is stuck.
    pub fn is_stuck(
        &self,
        placed_at: DateTime<Utc>,
        now: DateTime<Utc>,
        current_price: Decimal,
        first_target: Option<Decimal>,
    ) -> bool {
        let Some(first_target) = first_target else {
            return false;
        };
        now - placed_at > self.max_age && current_price < first_target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn six_hour_threshold_scenarios() {
        let policy = StuckPolicy::new(Duration::hours(6));
        let now = Utc::now();
        assert!(policy.is_stuck(now - Duration::hours(7), now, dec!(101), Some(dec!(110))));
        assert!(!policy.is_stuck(now - Duration::hours(5), now, dec!(101), Some(dec!(110))));
    }

    #[test]
    fn price_at_or_above_first_target_is_not_stuck() {
        let policy = StuckPolicy::new(Duration::hours(6));
        let now = Utc::now();
        assert!(!policy.is_stuck(now - Duration::hours(7), now, dec!(110), Some(dec!(110))));
        assert!(!policy.is_stuck(now - Duration::hours(7), now, dec!(101), None));
    }
}
