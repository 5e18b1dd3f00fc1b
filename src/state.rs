use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc};

use crate::clients::FrontendClient;
use crate::config::Config;
use crate::db::Store;
use crate::events::SecurityEvent;
use crate::services::{
    AccessGuard, DisclosureSink, EphemeralDisclosure, LoggingSink, PasswordPolicy, RosterSync,
    SeaOrmTwoFactorService, SessionManager, TwoFactorService, WarningWatchdog,
};

/// Everything the daemon shares between the HTTP surface, the CLI paths and
/// the background listeners. Cheap to clone; the heavyweight pieces are behind
/// `Arc` or are connection-pool handles.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    pub policy: PasswordPolicy,

    pub sessions: SessionManager,

    pub two_factor: Arc<dyn TwoFactorService>,

    pub guard: Arc<AccessGuard>,

    pub disclosures: Arc<EphemeralDisclosure>,

    pub watchdog: Arc<WarningWatchdog>,

    pub event_bus: broadcast::Sender<SecurityEvent>,
}

impl SharedState {
    /// Connects the store, syncs the role roster and wires every service.
    /// The returned receiver fires when the watchdog wants the process
    /// restarted; the daemon selects on it, tests can drop it.
    pub async fn new(config: Config) -> anyhow::Result<(Self, mpsc::Receiver<()>)> {
        let (event_bus, _) = broadcast::channel(config.general.event_bus_buffer_size);
        Self::with_event_bus(config, event_bus).await
    }

    pub async fn with_event_bus(
        config: Config,
        event_bus: broadcast::Sender<SecurityEvent>,
    ) -> anyhow::Result<(Self, mpsc::Receiver<()>)> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let policy = PasswordPolicy::new(config.security.clone());

        // Roster grants are idempotent; listed ids get their role and the
        // role's default password on first sight.
        RosterSync::new(store.clone(), policy.clone())
            .sync(&config.roster)
            .await?;

        let sessions = SessionManager::new(store.clone());

        let two_factor: Arc<dyn TwoFactorService> = Arc::new(SeaOrmTwoFactorService::new(
            store.clone(),
            policy.clone(),
            event_bus.clone(),
            config.two_factor.issuer.clone(),
        ));

        let guard = Arc::new(AccessGuard::new(
            store.clone(),
            policy.clone(),
            sessions.clone(),
            two_factor.clone(),
            event_bus.clone(),
        ));

        // Without a frontend adapter the disclosure sink degrades to a
        // logging no-op, so the timers still run and cancel normally.
        let sink: Arc<dyn DisclosureSink> = match FrontendClient::from_config(&config.frontend) {
            Some(client) => Arc::new(client),
            None => Arc::new(LoggingSink),
        };
        let disclosures = Arc::new(EphemeralDisclosure::new(sink));

        let (restart_tx, restart_rx) = mpsc::channel(1);
        let watchdog = Arc::new(WarningWatchdog::new(
            config.watchdog.clone(),
            event_bus.clone(),
            restart_tx,
        ));
        watchdog.clone().start_listener();

        Ok((
            Self {
                config: Arc::new(RwLock::new(config)),
                store,
                policy,
                sessions,
                two_factor,
                guard,
                disclosures,
                watchdog,
                event_bus,
            },
            restart_rx,
        ))
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }
}
