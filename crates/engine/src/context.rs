use crate::error::EngineError;
use crate::registry::TaskRegistry;
use api_client::{ApiClient, BinanceClient};
use configuration::{ApiConfig, EngineSettings};
use database::{Account, TradeStore};
use events::Notification;
use executor::TradeExecutor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use strategies::RetraceEntry;
use tokio::sync::broadcast;
use tracing::{debug, error};
use uuid::Uuid;

/// Hands out the exchange client for an account.
pub trait ClientProvider: Send + Sync {
    fn client_for(&self, account: &Account) -> Result<Arc<dyn ApiClient>, EngineError>;
}

/// One authenticated Binance client per account, created on first use.
///
/// Clients are reused so their symbol-rule caches survive between cycles.
pub struct BinanceClients {
    config: ApiConfig,
    clients: Mutex<HashMap<Uuid, Arc<dyn ApiClient>>>,
}

impl BinanceClients {
    pub fn new(config: ApiConfig) -> Self {
        Self { config, clients: Mutex::new(HashMap::new()) }
    }
}

impl ClientProvider for BinanceClients {
    fn client_for(&self, account: &Account) -> Result<Arc<dyn ApiClient>, EngineError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&account.account_id) {
            return Ok(client.clone());
        }
        let client: Arc<dyn ApiClient> =
            Arc::new(BinanceClient::new(&self.config, &account.api_key, &account.api_secret)?);
        clients.insert(account.account_id, client.clone());
        Ok(client)
    }
}

/// Everything the engine's loops share.
pub struct EngineContext {
    pub store: Arc<dyn TradeStore>,
    pub clients: Arc<dyn ClientProvider>,
    pub registry: Arc<TaskRegistry>,
    pub settings: EngineSettings,
    notifier: broadcast::Sender<Notification>,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn TradeStore>,
        clients: Arc<dyn ClientProvider>,
        settings: EngineSettings,
        notifier: broadcast::Sender<Notification>,
    ) -> Self {
        Self { store, clients, registry: Arc::new(TaskRegistry::new()), settings, notifier }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        if notification.is_critical() {
            error!(
                account = %notification.account_id,
                symbol = %notification.symbol(),
                "CRITICAL notification raised"
            );
        }
        if self.notifier.send(notification).is_err() {
            debug!("No notification subscribers");
        }
    }

    pub fn client_for(&self, account: &Account) -> Result<Arc<dyn ApiClient>, EngineError> {
        self.clients.client_for(account)
    }

    pub fn executor_for(&self, account: &Account) -> Result<TradeExecutor, EngineError> {
        Ok(TradeExecutor::from_settings(self.client_for(account)?, &self.settings))
    }

    pub fn strategy_for(&self, account: &Account) -> Result<RetraceEntry, EngineError> {
        Ok(RetraceEntry::from_settings(&account.settings)?)
    }
}
