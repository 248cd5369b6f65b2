use crate::error::ConfigError;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{
    AccountSettings, ApiConfig, Config, DatabaseConfig, EngineSettings, LoggingConfig,
    TelegramConfig, MIN_AUTOTRADE_INTERVAL_MINUTES,
};

/// Loads the application configuration from a TOML file layered with the environment.
///
/// Environment variables prefixed `AUTOTRADER__` override file values, using
/// `__` as the section separator (e.g. `AUTOTRADER__DATABASE__URL`).
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("AUTOTRADER")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    Ok(config)
}
