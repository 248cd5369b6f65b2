use crate::error::ExecutorError;
use api_client::ApiClient;
use core_types::AssetBalance;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;

/// Assets valued one-to-one against the quote asset.
pub const STABLECOINS: [&str; 6] = ["USDT", "BUSD", "USDC", "DAI", "TUSD", "FDUSD"];

/// Holdings worth less than this (in the quote asset) are left out of the summary.
const DUST_THRESHOLD: Decimal = dec!(0.01);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeldAsset {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
    /// Value of `total` in the quote asset.
    pub value: Decimal,
}

/// A snapshot of an account's holdings valued in the quote asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub quote_asset: String,
    /// Sorted by value, largest first.
    pub held_assets: Vec<HeldAsset>,
    pub total_value: Decimal,
}

impl AccountSummary {
    /// Values every balance with `prices` (keyed by symbol).
    ///
    /// Assets with no `<asset><quote>` price are skipped rather than valued at zero.
    pub fn from_balances(
        balances: &HashMap<String, AssetBalance>,
        prices: &HashMap<String, Decimal>,
        quote_asset: &str,
    ) -> Self {
        let mut held_assets: Vec<HeldAsset> = balances
            .iter()
            .filter(|(_, balance)| !balance.total().is_zero())
            .filter_map(|(asset, balance)| {
                let total = balance.total();
                let value = if asset == quote_asset || STABLECOINS.contains(&asset.as_str()) {
                    total
                } else {
                    total * prices.get(&format!("{}{}", asset, quote_asset))?
                };
                (value > DUST_THRESHOLD).then(|| HeldAsset {
                    asset: asset.clone(),
                    free: balance.free,
                    locked: balance.locked,
                    total,
                    value,
                })
            })
            .collect();

        held_assets.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.asset.cmp(&b.asset)));
        let total_value = held_assets.iter().map(|a| a.value).sum();

        Self { quote_asset: quote_asset.to_string(), held_assets, total_value }
    }

    pub fn asset(&self, asset: &str) -> Option<&HeldAsset> {
        self.held_assets.iter().find(|a| a.asset == asset)
    }

    pub fn free_of(&self, asset: &str) -> Decimal {
        self.asset(asset).map(|a| a.free).unwrap_or_default()
    }

    pub fn value_of(&self, asset: &str) -> Decimal {
        self.asset(asset).map(|a| a.value).unwrap_or_default()
    }
}

pub async fn fetch_account_summary(
    client: &dyn ApiClient,
    quote_asset: &str,
) -> Result<AccountSummary, ExecutorError> {
    let balances = client.account_balances().await?;
    let prices = client.all_prices().await?;
    Ok(AccountSummary::from_balances(&balances, &prices, quote_asset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(free: Decimal, locked: Decimal) -> AssetBalance {
        AssetBalance { free, locked }
    }

    #[test]
    fn values_holdings_in_quote_asset() {
        let balances = HashMap::from([
            ("USDT".to_string(), balance(dec!(40), Decimal::ZERO)),
            ("FDUSD".to_string(), balance(dec!(5), Decimal::ZERO)),
            ("SOL".to_string(), balance(dec!(0.5), dec!(0.5))),
            ("SHIB".to_string(), balance(dec!(100), Decimal::ZERO)),
            ("XYZ".to_string(), balance(dec!(3), Decimal::ZERO)),
        ]);
        let prices = HashMap::from([
            ("SOLUSDT".to_string(), dec!(100)),
            ("SHIBUSDT".to_string(), dec!(0.00001)),
        ]);

        let summary = AccountSummary::from_balances(&balances, &prices, "USDT");

        let assets: Vec<&str> = summary.held_assets.iter().map(|a| a.asset.as_str()).collect();
        assert_eq!(assets, vec!["SOL", "USDT", "FDUSD"]);
        assert_eq!(summary.total_value, dec!(145));
        assert_eq!(summary.free_of("USDT"), dec!(40));
        assert_eq!(summary.value_of("SOL"), dec!(100));
        assert_eq!(summary.value_of("SHIB"), Decimal::ZERO);
    }
}
