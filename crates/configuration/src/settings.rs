use crate::error::ConfigError;
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub exchange: ApiConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Per-account settings used when an account has no stored configuration.
    #[serde(default)]
    pub defaults: AccountSettings,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.quote_asset.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "engine.quote_asset must not be empty".to_string(),
            ));
        }
        if self.engine.signal_poll_interval_secs == 0
            || self.engine.sweep_interval_secs == 0
            || self.engine.scheduler_tick_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "engine poll, sweep and scheduler intervals must be positive".to_string(),
            ));
        }
        self.defaults.validate()
    }
}

/// Cadences and fixed delays of the engine's loops.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// How long a Signal Monitor sleeps after a SKIP.
    pub signal_poll_interval_secs: u64,
    /// Period of the reconciliation and position-management sweep.
    pub sweep_interval_secs: u64,
    /// Tick of the per-account autotrade scheduler.
    pub scheduler_tick_secs: u64,
    /// Wait after a market buy before reading the settled base balance.
    pub settlement_delay_ms: u64,
    /// Wait after cancelling a protective order before acting on the freed quantity.
    pub cancel_settle_delay_ms: u64,
    pub quote_asset: String,
    /// Number of recent executions fetched when reconstructing an exit.
    pub recent_trade_limit: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            signal_poll_interval_secs: 60,
            sweep_interval_secs: 300,
            scheduler_tick_secs: 60,
            settlement_delay_ms: 2_000,
            cancel_settle_delay_ms: 2_000,
            quote_asset: "USDT".to_string(),
            recent_trade_limit: 10,
        }
    }
}

impl EngineSettings {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.signal_poll_interval_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn scheduler_tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.scheduler_tick_secs)
    }

    pub fn settlement_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.settlement_delay_ms)
    }

    pub fn cancel_settle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cancel_settle_delay_ms)
    }
}

/// Exchange connection settings. Credentials are per account and live in the database.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// `false` routes every request to the spot testnet.
    pub live_mode: bool,
    pub recv_window: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { live_mode: false, recv_window: 5_000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    /// Receives critical alerts for every account.
    pub operator_chat_id: Option<String>,
}

impl TelegramConfig {
    pub fn is_enabled(&self) -> bool {
        self.bot_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    pub directory: String,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
            file_prefix: "autotrader.log".to_string(),
        }
    }
}

/// The smallest autotrade interval an account may configure.
pub const MIN_AUTOTRADE_INTERVAL_MINUTES: u64 = 3;

/// Trading preferences of a single account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    /// Quote-asset amount spent per trade.
    pub stake_per_trade: Decimal,
    pub autotrade_enabled: bool,
    pub autotrade_interval_minutes: u64,
    pub trailing_enabled: bool,
    /// Targets below this level never move the stop.
    pub min_trailing_level: u32,
    /// Fraction above a target the price must reach before the stop trails to it.
    pub trailing_trigger_margin: Decimal,
    pub stuck_enabled: bool,
    pub stuck_duration_hours: u64,
    pub prioritize_normal_risk: bool,
    pub signal_age_filter_enabled: bool,
    pub signal_validity_minutes: u64,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            stake_per_trade: dec!(11),
            autotrade_enabled: false,
            autotrade_interval_minutes: 5,
            trailing_enabled: false,
            min_trailing_level: 1,
            trailing_trigger_margin: dec!(0.005),
            stuck_enabled: false,
            stuck_duration_hours: 6,
            prioritize_normal_risk: true,
            signal_age_filter_enabled: true,
            signal_validity_minutes: 30,
        }
    }
}

impl AccountSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stake_per_trade <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "stake_per_trade must be positive".to_string(),
            ));
        }
        if self.autotrade_interval_minutes < MIN_AUTOTRADE_INTERVAL_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "autotrade_interval_minutes must be at least {}",
                MIN_AUTOTRADE_INTERVAL_MINUTES
            )));
        }
        if self.trailing_trigger_margin < Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "trailing_trigger_margin must not be negative".to_string(),
            ));
        }
        if self.stuck_duration_hours == 0 {
            return Err(ConfigError::ValidationError(
                "stuck_duration_hours must be positive".to_string(),
            ));
        }
        if self.signal_validity_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "signal_validity_minutes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn autotrade_interval(&self) -> Duration {
        Duration::minutes(self.autotrade_interval_minutes as i64)
    }

    pub fn stuck_duration(&self) -> Duration {
        Duration::hours(self.stuck_duration_hours as i64)
    }

    /// `None` when the age filter is switched off.
    pub fn signal_validity(&self) -> Option<Duration> {
        self.signal_age_filter_enabled
            .then(|| Duration::minutes(self.signal_validity_minutes as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = AccountSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.stuck_duration(), Duration::hours(6));
        assert_eq!(settings.signal_validity(), Some(Duration::minutes(30)));
    }

    #[test]
    fn rejects_short_interval_and_bad_stake() {
        let mut settings = AccountSettings { autotrade_interval_minutes: 2, ..Default::default() };
        assert!(settings.validate().is_err());
        settings.autotrade_interval_minutes = 3;
        settings.stake_per_trade = Decimal::ZERO;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn disabled_age_filter_has_no_window() {
        let settings = AccountSettings { signal_age_filter_enabled: false, ..Default::default() };
        assert_eq!(settings.signal_validity(), None);
    }

    #[test]
    fn partial_settings_fill_from_defaults() {
        let settings: AccountSettings =
            serde_json::from_str(r#"{"stake_per_trade":"25","trailing_enabled":true}"#).unwrap();
        assert_eq!(settings.stake_per_trade, dec!(25));
        assert!(settings.trailing_enabled);
        assert_eq!(settings.autotrade_interval_minutes, 5);
    }
}
