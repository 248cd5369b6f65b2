use crate::error::RiskError;
use configuration::AccountSettings;
use core_types::PriceLevel;
use rust_decimal::Decimal;

/// Raises a protective stop to targets the price has cleared by a margin.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingPolicy {
    pub min_level: u32,
    pub trigger_margin: Decimal,
}

impl TrailingPolicy {
    pub fn new(min_level: u32, trigger_margin: Decimal) -> Result<Self, RiskError> {
        if trigger_margin < Decimal::ZERO {
            return Err(RiskError::InvalidParameters(
                "trailing trigger margin must not be negative".to_string(),
            ));
        }
        Ok(Self { min_level, trigger_margin })
    }

    pub fn from_settings(settings: &AccountSettings) -> Result<Self, RiskError> {
        Self::new(settings.min_trailing_level, settings.trailing_trigger_margin)
    }

    /// The stop price to trail to, or `None` when the stop should stay put.
    ///
    /// A target qualifies once `current_price >= target * (1 + margin)` and it
    /// sits above the current stop. The highest qualifying target wins, and
    /// the result is always strictly above `current_stop`.
    pub fn next_stop(
        &self,
        targets: &[PriceLevel],
        current_price: Decimal,
        current_stop: Decimal,
    ) -> Option<Decimal> {
        targets
            .iter()
            .filter(|t| t.level >= self.min_level)
            .filter(|t| current_price >= t.price * (Decimal::ONE + self.trigger_margin))
            .map(|t| t.price)
            .filter(|price| *price > current_stop)
            .max()
    }
}
