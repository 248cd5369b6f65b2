//! Quantity and price rounding to exchange step sizes.
//!
//! Every value sent to the exchange is floored to a multiple of the symbol's
//! step and rendered with exactly as many decimals as the step carries.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Fraction of the stop price the stop-limit leg is allowed to fill at.
pub const STOP_LIMIT_FACTOR: Decimal = dec!(0.995);

/// Number of decimal digits implied by a step, e.g. `0.00100000` -> 3, `1.0` -> 0.
pub fn step_decimals(step: Decimal) -> u32 {
    step.normalize().scale()
}

/// Rounds `value` down to the nearest multiple of `step`.
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    let mut floored = (value / step).floor() * step;
    floored.rescale(step_decimals(step));
    floored
}

/// Floors and formats a value the way the exchange expects it on the wire.
pub fn format_to_step(value: Decimal, step: Decimal) -> String {
    floor_to_step(value, step).to_string()
}

/// The limit price of the stop leg, slightly under the trigger so it crosses the book.
pub fn stop_limit_price(stop_price: Decimal, tick: Decimal) -> Decimal {
    floor_to_step(stop_price * STOP_LIMIT_FACTOR, tick)
}

/// Truncates a quote-asset amount to the decimal places the symbol accepts.
pub fn format_quote_amount(amount: Decimal, precision: u32) -> String {
    amount
        .round_dp_with_strategy(precision, RoundingStrategy::ToZero)
        .normalize()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_to_step_with_step_decimals() {
        assert_eq!(format_to_step(dec!(1.23456), dec!(0.001)), "1.234");
        assert_eq!(format_to_step(dec!(1.23456), dec!(0.00100000)), "1.234");
        assert_eq!(format_to_step(dec!(12.99), dec!(1.00000000)), "12");
        assert_eq!(format_to_step(dec!(5), dec!(0.01)), "5.00");
    }

    #[test]
    fn rounding_is_idempotent_and_never_rounds_up() {
        for (raw, step) in [
            (dec!(1.23456), dec!(0.001)),
            (dec!(0.000999), dec!(0.0001)),
            (dec!(250.5), dec!(10)),
            (dec!(7), dec!(0.5)),
        ] {
            let once = floor_to_step(raw, step);
            assert!(once <= raw);
            assert_eq!(floor_to_step(once, step), once);
        }
    }

    #[test]
    fn stop_limit_sits_half_a_percent_under_the_trigger() {
        assert_eq!(stop_limit_price(dec!(90), dec!(0.01)), dec!(89.55));
        assert_eq!(stop_limit_price(dec!(0.12345), dec!(0.0001)), dec!(0.1228));
    }

    #[test]
    fn quote_amount_is_truncated_to_precision() {
        assert_eq!(format_quote_amount(dec!(10.98765432109), 8), "10.98765432");
        assert_eq!(format_quote_amount(dec!(14.999), 2), "14.99");
        assert_eq!(format_quote_amount(dec!(15.00), 2), "15");
        assert_eq!(format_quote_amount(dec!(7.5), 0), "7");
    }

    #[test]
    fn step_decimals_ignores_trailing_zeros() {
        assert_eq!(step_decimals(dec!(0.01000000)), 2);
        assert_eq!(step_decimals(dec!(1.00000000)), 0);
    }
}
