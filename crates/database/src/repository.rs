use crate::error::DbError;
use crate::store::{Account, TradeStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use configuration::AccountSettings;
use core_types::{PriceLevel, ProtectiveOrderId, RiskLevel, Signal, Trade, TradeClose, TradeStatus};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

/// The `DbRepository` provides the PostgreSQL implementation of [`TradeStore`].
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
    /// Settings for accounts without a stored configuration.
    defaults: AccountSettings,
}

/// Represents a row of `accounts` left-joined with `account_settings`.
#[derive(Debug, Clone, FromRow)]
pub struct DbAccount {
    pub account_id: Uuid,
    pub label: String,
    pub api_key: String,
    pub api_secret: String,
    pub telegram_chat_id: Option<String>,
    pub settings: Option<JsonValue>,
}

/// Represents a row from the `signals` table.
#[derive(Debug, Clone, FromRow)]
pub struct DbSignal {
    pub signal_id: Uuid,
    pub coin_pair: Option<String>,
    pub entry_price: Option<Decimal>,
    pub targets: JsonValue,
    pub stop_losses: JsonValue,
    pub risk_level: Option<String>,
    pub issued_at: DateTime<Utc>,
}

/// Database-specific trade struct that matches the trades table schema.
#[derive(Debug, Clone, FromRow)]
pub struct DbTrade {
    pub trade_id: Uuid,
    pub account_id: Uuid,
    pub signal_id: Uuid,
    pub symbol: String,
    pub status: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub buy_fee: Decimal,
    pub exit_price: Option<Decimal>,
    pub sell_fee: Option<Decimal>,
    pub net_profit_loss: Option<Decimal>,
    pub protective_order_id: Option<i64>,
    pub stop_price: Decimal,
    pub profit_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

const ACCOUNT_COLUMNS: &str = r#"
    SELECT a.account_id, a.label, a.api_key, a.api_secret, a.telegram_chat_id, s.settings
    FROM accounts AS a
    LEFT JOIN account_settings AS s ON s.account_id = a.account_id
"#;

const SIGNAL_COLUMNS: &str = r#"
    SELECT signal_id, coin_pair, entry_price, targets, stop_losses, risk_level, issued_at
    FROM signals
"#;

const TRADE_COLUMNS: &str = r#"
    SELECT trade_id, account_id, signal_id, symbol, status, entry_price, quantity, buy_fee,
           exit_price, sell_fee, net_profit_loss, protective_order_id, stop_price, profit_price,
           opened_at, closed_at
    FROM trades
"#;

impl DbAccount {
    fn into_account(self, defaults: &AccountSettings) -> Result<Account, DbError> {
        let settings = match self.settings {
            Some(stored) => merge_settings(defaults, stored)?,
            None => defaults.clone(),
        };
        Ok(Account {
            account_id: self.account_id,
            label: self.label,
            api_key: self.api_key,
            api_secret: self.api_secret,
            telegram_chat_id: self.telegram_chat_id,
            settings,
        })
    }
}

/// Overlays the keys of a stored settings object on the configured defaults.
fn merge_settings(defaults: &AccountSettings, stored: JsonValue) -> Result<AccountSettings, DbError> {
    let mut merged = serde_json::to_value(defaults)?;
    match (&mut merged, stored) {
        (JsonValue::Object(base), JsonValue::Object(overrides)) => base.extend(overrides),
        (_, other) => {
            return Err(DbError::InvalidData(format!("account settings must be an object, got {}", other)));
        }
    }
    let settings: AccountSettings = serde_json::from_value(merged)?;
    settings.validate().map_err(|e| DbError::InvalidData(e.to_string()))?;
    Ok(settings)
}

impl TryFrom<DbSignal> for Signal {
    type Error = DbError;

    fn try_from(row: DbSignal) -> Result<Self, Self::Error> {
        Ok(Signal {
            id: row.signal_id,
            coin_pair: row.coin_pair,
            entry_price: row.entry_price,
            targets: serde_json::from_value::<Vec<PriceLevel>>(row.targets)?,
            stop_losses: serde_json::from_value::<Vec<PriceLevel>>(row.stop_losses)?,
            risk_level: row.risk_level.map(RiskLevel::from),
            issued_at: row.issued_at,
        }
        .normalize())
    }
}

impl TryFrom<DbTrade> for Trade {
    type Error = DbError;

    fn try_from(row: DbTrade) -> Result<Self, Self::Error> {
        Ok(Trade {
            id: row.trade_id,
            account_id: row.account_id,
            signal_id: row.signal_id,
            symbol: row.symbol,
            status: row.status.parse::<TradeStatus>()?,
            entry_price: row.entry_price,
            quantity: row.quantity,
            buy_fee: row.buy_fee,
            exit_price: row.exit_price,
            sell_fee: row.sell_fee,
            net_profit_loss: row.net_profit_loss,
            protective_order_id: row.protective_order_id.map(ProtectiveOrderId),
            stop_price: row.stop_price,
            profit_price: row.profit_price,
            opened_at: row.opened_at,
            closed_at: row.closed_at,
        })
    }
}

fn into_trades(rows: Vec<DbTrade>) -> Result<Vec<Trade>, DbError> {
    rows.into_iter().map(Trade::try_from).collect()
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: PgPool, defaults: AccountSettings) -> Self {
        Self { pool, defaults }
    }

    async fn fetch_accounts(&self, filter: &str) -> Result<Vec<Account>, DbError> {
        let query = format!("{} {} ORDER BY a.created_at ASC", ACCOUNT_COLUMNS, filter);
        let rows = sqlx::query_as::<_, DbAccount>(&query).fetch_all(&self.pool).await?;
        rows.into_iter().map(|row| row.into_account(&self.defaults)).collect()
    }
}

#[async_trait]
impl TradeStore for DbRepository {
    async fn account(&self, account_id: Uuid) -> Result<Account, DbError> {
        let query = format!("{} WHERE a.account_id = $1", ACCOUNT_COLUMNS);
        let row = sqlx::query_as::<_, DbAccount>(&query)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NotFound)?;
        row.into_account(&self.defaults)
    }

    async fn accounts(&self) -> Result<Vec<Account>, DbError> {
        self.fetch_accounts("").await
    }

    async fn autotrade_accounts(&self) -> Result<Vec<Account>, DbError> {
        // The flag lives inside the JSONB document, so filter after decoding.
        let accounts = self.fetch_accounts("").await?;
        Ok(accounts.into_iter().filter(|a| a.settings.autotrade_enabled).collect())
    }

    async fn signal(&self, signal_id: Uuid) -> Result<Option<Signal>, DbError> {
        let query = format!("{} WHERE signal_id = $1", SIGNAL_COLUMNS);
        sqlx::query_as::<_, DbSignal>(&query)
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Signal::try_from)
            .transpose()
    }

    async fn latest_signal_for_pair(&self, coin_pair: &str) -> Result<Option<Signal>, DbError> {
        let query = format!(
            "{} WHERE coin_pair = $1 ORDER BY issued_at DESC LIMIT 1",
            SIGNAL_COLUMNS
        );
        sqlx::query_as::<_, DbSignal>(&query)
            .bind(coin_pair)
            .fetch_optional(&self.pool)
            .await?
            .map(Signal::try_from)
            .transpose()
    }

    async fn signals_since(&self, since: DateTime<Utc>) -> Result<Vec<Signal>, DbError> {
        let query = format!("{} WHERE issued_at >= $1 ORDER BY issued_at DESC", SIGNAL_COLUMNS);
        let rows = sqlx::query_as::<_, DbSignal>(&query)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Signal::try_from).collect()
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                trade_id, account_id, signal_id, symbol, status, entry_price, quantity, buy_fee,
                exit_price, sell_fee, net_profit_loss, protective_order_id, stop_price,
                profit_price, opened_at, closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(trade.id)
        .bind(trade.account_id)
        .bind(trade.signal_id)
        .bind(&trade.symbol)
        .bind(trade.status.as_str())
        .bind(trade.entry_price)
        .bind(trade.quantity)
        .bind(trade.buy_fee)
        .bind(trade.exit_price)
        .bind(trade.sell_fee)
        .bind(trade.net_profit_loss)
        .bind(trade.protective_order_id.map(|id| id.0))
        .bind(trade.stop_price)
        .bind(trade.profit_price)
        .bind(trade.opened_at)
        .bind(trade.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_trades(&self) -> Result<Vec<Trade>, DbError> {
        let query = format!("{} WHERE status = $1 ORDER BY opened_at ASC", TRADE_COLUMNS);
        let rows = sqlx::query_as::<_, DbTrade>(&query)
            .bind(TradeStatus::Active.as_str())
            .fetch_all(&self.pool)
            .await?;
        into_trades(rows)
    }

    async fn active_trades_for_account(&self, account_id: Uuid) -> Result<Vec<Trade>, DbError> {
        let query = format!(
            "{} WHERE status = $1 AND account_id = $2 ORDER BY opened_at ASC",
            TRADE_COLUMNS
        );
        let rows = sqlx::query_as::<_, DbTrade>(&query)
            .bind(TradeStatus::Active.as_str())
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        into_trades(rows)
    }

    async fn trade(&self, trade_id: Uuid) -> Result<Option<Trade>, DbError> {
        let query = format!("{} WHERE trade_id = $1", TRADE_COLUMNS);
        sqlx::query_as::<_, DbTrade>(&query)
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Trade::try_from)
            .transpose()
    }

    async fn trade_by_protective_order(
        &self,
        account_id: Uuid,
        id: ProtectiveOrderId,
    ) -> Result<Option<Trade>, DbError> {
        let query = format!(
            "{} WHERE account_id = $1 AND protective_order_id = $2 ORDER BY opened_at DESC LIMIT 1",
            TRADE_COLUMNS
        );
        sqlx::query_as::<_, DbTrade>(&query)
            .bind(account_id)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(Trade::try_from)
            .transpose()
    }

    async fn update_protection(
        &self,
        trade_id: Uuid,
        id: ProtectiveOrderId,
        stop_price: Decimal,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE trades SET protective_order_id = $1, stop_price = $2 WHERE trade_id = $3 AND status = $4",
        )
        .bind(id.0)
        .bind(stop_price)
        .bind(trade_id)
        .bind(TradeStatus::Active.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn close_trade(&self, trade_id: Uuid, close: &TradeClose) -> Result<(), DbError> {
        if !close.status.is_terminal() {
            return Err(DbError::InvalidData(format!(
                "{} is not a closing status",
                close.status
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE trades
            SET status = $1, exit_price = $2, sell_fee = $3, net_profit_loss = $4, closed_at = $5
            WHERE trade_id = $6 AND status = $7
            "#,
        )
        .bind(close.status.as_str())
        .bind(close.exit_price)
        .bind(close.sell_fee)
        .bind(close.net_profit_loss)
        .bind(close.closed_at)
        .bind(trade_id)
        .bind(TradeStatus::Active.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.trade(trade_id).await? {
                Some(_) => Err(DbError::AlreadyClosed(trade_id)),
                None => Err(DbError::NotFound),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn signal_rows_decode_and_sort_levels() {
        let row = DbSignal {
            signal_id: Uuid::new_v4(),
            coin_pair: Some("SOLUSDT".into()),
            entry_price: Some(dec!(100)),
            targets: json!([{"level": 2, "price": "120"}, {"level": 1, "price": "110", "status": "hit"}]),
            stop_losses: json!([{"level": 1, "price": 90}]),
            risk_level: Some("High".into()),
            issued_at: Utc::now(),
        };
        let signal = Signal::try_from(row).unwrap();
        assert_eq!(signal.first_target(), Some(dec!(110)));
        assert_eq!(signal.final_target(), Some(dec!(120)));
        assert_eq!(signal.first_stop_loss(), Some(dec!(90)));
        assert_eq!(signal.risk_level, Some(RiskLevel::High));
    }

    #[test]
    fn trade_rows_reject_unknown_status() {
        let row = DbTrade {
            trade_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            symbol: "SOLUSDT".into(),
            status: "ERROR".into(),
            entry_price: dec!(100),
            quantity: dec!(1),
            buy_fee: dec!(0.1),
            exit_price: None,
            sell_fee: None,
            net_profit_loss: None,
            protective_order_id: Some(9),
            stop_price: dec!(90),
            profit_price: dec!(130),
            opened_at: Utc::now(),
            closed_at: None,
        };
        assert!(matches!(Trade::try_from(row.clone()), Err(DbError::InvalidData(_))));

        let trade = Trade::try_from(DbTrade { status: "ACTIVE".into(), ..row }).unwrap();
        assert_eq!(trade.protective_order_id, Some(ProtectiveOrderId(9)));
    }

    #[test]
    fn stored_settings_override_defaults() {
        let row = DbAccount {
            account_id: Uuid::new_v4(),
            label: "main".into(),
            api_key: "k".into(),
            api_secret: "s".into(),
            telegram_chat_id: None,
            settings: Some(json!({"autotrade_enabled": true, "stake_per_trade": "20"})),
        };
        let account = row.clone().into_account(&AccountSettings::default()).unwrap();
        assert!(account.settings.autotrade_enabled);
        assert_eq!(account.settings.stake_per_trade, dec!(20));

        let defaults = AccountSettings { stake_per_trade: dec!(15), ..Default::default() };
        let account = DbAccount { settings: None, ..row }.into_account(&defaults).unwrap();
        assert_eq!(account.settings.stake_per_trade, dec!(15));
    }

    fn account_row(settings: JsonValue) -> DbAccount {
        DbAccount {
            account_id: Uuid::new_v4(),
            label: "main".into(),
            api_key: "k".into(),
            api_secret: "s".into(),
            telegram_chat_id: None,
            settings: Some(settings),
        }
    }

    #[test]
    fn partial_settings_fill_from_configured_defaults() {
        let defaults = AccountSettings { stake_per_trade: dec!(15), stuck_duration_hours: 12, ..Default::default() };
        let account = account_row(json!({"autotrade_enabled": true, "trailing_enabled": true}))
            .into_account(&defaults)
            .unwrap();

        assert!(account.settings.autotrade_enabled);
        assert!(account.settings.trailing_enabled);
        assert_eq!(account.settings.stake_per_trade, dec!(15));
        assert_eq!(account.settings.stuck_duration_hours, 12);
    }

    #[test]
    fn invalid_stored_settings_are_rejected() {
        let defaults = AccountSettings { stake_per_trade: dec!(15), ..Default::default() };
        for stored in [
            json!({"autotrade_enabled": true, "stuck_duration_hours": 0}),
            json!({"autotrade_interval_minutes": 1}),
            json!({"stake_per_trade": "0"}),
            json!(["not", "an", "object"]),
        ] {
            let result = account_row(stored.clone()).into_account(&defaults);
            assert!(matches!(result, Err(DbError::InvalidData(_))), "accepted {}", stored);
        }
    }
}
