use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Share of the stake an existing holding may reach before a new buy is refused.
const MAX_HOLDING_FRACTION: Decimal = dec!(0.5);

/// Account and market state a pre-trade check is made against.
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityContext {
    pub symbol: String,
    pub stake: Decimal,
    /// Working orders already placed on `symbol`.
    pub open_orders_on_symbol: usize,
    pub quote_asset: String,
    pub quote_free: Decimal,
    pub base_asset: String,
    /// Value of the existing base-asset holding in the quote asset.
    pub base_holding_value: Decimal,
    pub min_notional: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Eligibility {
    Eligible,
    /// Not tradeable now. The opportunity may become eligible later.
    Ineligible(String),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Runs the pre-trade checks in order; the first failing check decides.
pub fn check_eligibility(ctx: &EligibilityContext) -> Eligibility {
    if ctx.open_orders_on_symbol > 0 {
        return Eligibility::Ineligible(format!(
            "{} open order(s) already target {}",
            ctx.open_orders_on_symbol, ctx.symbol
        ));
    }

    if ctx.quote_free < ctx.stake {
        return Eligibility::Ineligible(format!(
            "Insufficient {} balance: available {}, required {}",
            ctx.quote_asset,
            ctx.quote_free.round_dp(2),
            ctx.stake
        ));
    }

    if ctx.base_holding_value >= ctx.stake * MAX_HOLDING_FRACTION {
        return Eligibility::Ineligible(format!(
            "{} already held with value {} {}",
            ctx.base_asset,
            ctx.base_holding_value.round_dp(2),
            ctx.quote_asset
        ));
    }

    if let Some(min_notional) = ctx.min_notional {
        if ctx.stake < min_notional {
            return Eligibility::Ineligible(format!(
                "Stake {} is below the minimum notional {} for {}",
                ctx.stake, min_notional, ctx.symbol
            ));
        }
    }

    Eligibility::Eligible
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EligibilityContext {
        EligibilityContext {
            symbol: "SOLUSDT".into(),
            stake: dec!(11),
            open_orders_on_symbol: 0,
            quote_asset: "USDT".into(),
            quote_free: dec!(50),
            base_asset: "SOL".into(),
            base_holding_value: dec!(0),
            min_notional: Some(dec!(5)),
        }
    }

    #[test]
    fn clean_account_is_eligible() {
        assert_eq!(check_eligibility(&ctx()), Eligibility::Eligible);
    }

    #[test]
    fn open_order_conflict_short_circuits() {
        let c = EligibilityContext { open_orders_on_symbol: 2, quote_free: dec!(0), ..ctx() };
        match check_eligibility(&c) {
            Eligibility::Ineligible(reason) => assert!(reason.contains("open order")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn balance_must_cover_stake() {
        assert!(!check_eligibility(&EligibilityContext { quote_free: dec!(10.99), ..ctx() }).is_eligible());
        assert!(check_eligibility(&EligibilityContext { quote_free: dec!(11), ..ctx() }).is_eligible());
    }

    #[test]
    fn holding_must_stay_under_half_the_stake() {
        assert!(check_eligibility(&EligibilityContext { base_holding_value: dec!(5.49), ..ctx() }).is_eligible());
        assert!(!check_eligibility(&EligibilityContext { base_holding_value: dec!(5.5), ..ctx() }).is_eligible());
    }

    #[test]
    fn stake_must_meet_min_notional() {
        let c = EligibilityContext { min_notional: Some(dec!(20)), ..ctx() };
        assert!(!check_eligibility(&c).is_eligible());
        let c = EligibilityContext { min_notional: None, ..ctx() };
        assert!(check_eligibility(&c).is_eligible());
    }
}
