use alerter::{run_alerter_service, TelegramAlerter};
use anyhow::Context;
use api_client::ApiClient;
use chrono::Utc;
use clap::{Parser, Subcommand};
use comfy_table::Table;
use configuration::{init_tracing, load_config, Config};
use database::{connect, run_migrations, DbRepository, TradeStore};
use engine::{
    activate_monitor, close_trade_manually, evaluate_signal, run_batch, run_sweep, BinanceClients,
    Engine, EngineContext,
};
use executor::fetch_account_summary;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// How long a one-shot command waits for pending notifications to be delivered.
const ALERT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Signal-driven spot trading engine.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file, without extension.
    #[arg(long, short, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor sweep and the autotrade scheduler until interrupted.
    Run,
    /// Run a single reconciliation and position-management pass.
    Sweep,
    /// Evaluate a signal for an account against the current price.
    Evaluate {
        #[arg(long)]
        account: Uuid,
        #[arg(long)]
        signal: Uuid,
    },
    /// Monitor a signal for an account until it is bought or rejected.
    Activate {
        #[arg(long)]
        account: Uuid,
        #[arg(long)]
        signal: Uuid,
    },
    /// Evaluate and execute all recent signals for an account.
    Batch {
        #[arg(long)]
        account: Uuid,
        /// Print the batch log as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Close an active trade at market.
    Close {
        #[arg(long)]
        trade: Uuid,
    },
    /// Show an account's holdings and open orders.
    Status {
        #[arg(long)]
        account: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(&cli.config).context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging).context("Failed to initialise logging")?;

    let pool = connect(&config.database).await.context("Failed to connect to the database")?;
    run_migrations(&pool).await.context("Failed to run database migrations")?;
    let store: Arc<dyn TradeStore> = Arc::new(DbRepository::new(pool, config.defaults.clone()));

    let (notifier, _) = broadcast::channel(256);
    let ctx = Arc::new(EngineContext::new(
        store.clone(),
        Arc::new(BinanceClients::new(config.exchange.clone())),
        config.engine.clone(),
        notifier,
    ));
    let alerts = spawn_alerter(&config, store.as_ref(), &ctx).await?;

    let result = execute(cli.command, ctx.clone()).await;

    // Dropping the last sender closes the channel and lets the alerter drain.
    drop(ctx);
    if let Some(handle) = alerts {
        if tokio::time::timeout(ALERT_DRAIN_TIMEOUT, handle).await.is_err() {
            warn!("Timed out delivering pending notifications");
        }
    }
    result
}

async fn spawn_alerter(
    config: &Config,
    store: &dyn TradeStore,
    ctx: &EngineContext,
) -> anyhow::Result<Option<JoinHandle<()>>> {
    let chats: HashMap<Uuid, String> = store
        .accounts()
        .await
        .context("Failed to load accounts")?
        .into_iter()
        .filter_map(|a| a.telegram_chat_id.map(|chat| (a.account_id, chat)))
        .collect();

    Ok(TelegramAlerter::new(&config.telegram, chats)
        .map(|alerter| tokio::spawn(run_alerter_service(alerter, ctx.subscribe()))))
}

async fn execute(command: Commands, ctx: Arc<EngineContext>) -> anyhow::Result<()> {
    match command {
        Commands::Run => {
            let engine = Engine::new(ctx.clone());
            tokio::select! {
                res = engine.run() => res?,
                _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
            }
        }
        Commands::Sweep => {
            let report = run_sweep(&ctx).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Evaluate { account, signal } => {
            let account = ctx.store.account(account).await?;
            let signal = ctx
                .store
                .signal(signal)
                .await?
                .with_context(|| format!("Signal {} not found", signal))?;
            let client = ctx.client_for(&account)?;
            let strategy = ctx.strategy_for(&account)?;
            let decision = evaluate_signal(&strategy, client.as_ref(), &signal, Utc::now()).await;
            println!(
                "{} {:?} (price {}): {}",
                decision.symbol,
                decision.decision,
                decision.current_price.map(|p| p.to_string()).unwrap_or_else(|| "n/a".into()),
                decision.reason
            );
        }
        Commands::Activate { account, signal } => {
            let handle = activate_monitor(&ctx, account, signal).await?;
            let key = (account, signal);
            tokio::select! {
                exit = handle => println!("Monitor finished: {:?}", exit?),
                _ = tokio::signal::ctrl_c() => {
                    ctx.registry.cancel(&key);
                    info!("Monitor cancelled");
                }
            }
        }
        Commands::Batch { account, json } => {
            let log = run_batch(&ctx, account, Utc::now()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&log)?);
            } else {
                let mut table = Table::new();
                table.set_header(vec!["Symbol", "Action", "Detail"]);
                for entry in &log.entries {
                    table.add_row(vec![entry.symbol.clone(), format!("{:?}", entry.action), entry.detail.clone()]);
                }
                println!("{table}");
            }
        }
        Commands::Close { trade } => {
            let close = close_trade_manually(&ctx, trade).await?;
            println!(
                "Trade {} closed at {} (net P&L {})",
                trade, close.exit_price, close.net_profit_loss
            );
        }
        Commands::Status { account } => {
            let account = ctx.store.account(account).await?;
            let client = ctx.client_for(&account)?;
            let summary = fetch_account_summary(client.as_ref(), &ctx.settings.quote_asset).await?;
            let orders = client.open_orders(None).await?;

            let mut holdings = Table::new();
            holdings.set_header(vec!["Asset", "Free", "Locked", "Value"]);
            for asset in &summary.held_assets {
                holdings.add_row(vec![
                    asset.asset.clone(),
                    asset.free.normalize().to_string(),
                    asset.locked.normalize().to_string(),
                    asset.value.round_dp(2).to_string(),
                ]);
            }
            println!("{} ({})", account.label, account.account_id);
            println!("{holdings}");
            println!("Total value: {} {}", summary.total_value.round_dp(2), summary.quote_asset);

            let mut open = Table::new();
            open.set_header(vec!["Symbol", "Type", "Side", "Quantity", "Price", "List", "Placed"]);
            for order in &orders {
                let price = if order.is_stop_leg() { order.stop_price } else { order.price };
                open.add_row(vec![
                    order.symbol.clone(),
                    order.order_type.clone(),
                    format!("{:?}", order.side),
                    order.quantity.normalize().to_string(),
                    price.normalize().to_string(),
                    order.protective_order_id.map(|id| id.to_string()).unwrap_or_default(),
                    order.created_at.format("%Y-%m-%d %H:%M").to_string(),
                ]);
            }
            println!("{open}");
        }
    }
    Ok(())
}
