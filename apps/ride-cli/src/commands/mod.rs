// mod.rs — Shared command context: store, engine, identity gateway.

pub mod driver;
pub mod reconcile;
pub mod ride;

use std::sync::Arc;

use anyhow::Context;
use ride_lifecycle::{
    BackgroundNotifier, EventDispatcher, Identity, IdentityGateway, LogSink, MemoryRideStore,
    RideLifecycleEngine, RideStore, StaticTokenGateway,
};
use ride_store_sqlite::SqliteRideStore;

use crate::config::{RideConfig, RideSettings, StoreBackend};

/// Everything a command needs, opened once per invocation.
pub struct Session {
    pub engine: RideLifecycleEngine,
    pub store: Arc<dyn RideStore>,
    notifier: Arc<BackgroundNotifier>,
    gateway: StaticTokenGateway,
    token: Option<String>,
}

impl Session {
    pub fn open(
        config: &RideConfig,
        settings: &RideSettings,
        token: Option<&str>,
    ) -> anyhow::Result<Self> {
        let store: Arc<dyn RideStore> = match settings.store.backend {
            StoreBackend::Sqlite => Arc::new(
                SqliteRideStore::open(&config.database, settings.store.busy_timeout())
                    .with_context(|| format!("failed to open {}", config.database.display()))?,
            ),
            StoreBackend::Memory => Arc::new(MemoryRideStore::new()),
        };

        let mut dispatcher = EventDispatcher::new();
        if settings.sync.events_log {
            dispatcher.add_sink(Box::new(LogSink::new(&config.events_log)));
        }
        let notifier = Arc::new(BackgroundNotifier::spawn(Box::new(dispatcher))?);

        let engine = RideLifecycleEngine::new(Arc::clone(&store), notifier.clone());
        Ok(Self {
            engine,
            store,
            notifier,
            gateway: StaticTokenGateway::from_map(settings.identity.tokens.clone()),
            token: token.map(str::to_string),
        })
    }

    /// Verify the presented token and return the caller's identity.
    pub fn caller(&self) -> anyhow::Result<Identity> {
        let token = self
            .token
            .as_deref()
            .context("no credential: pass --token or set RIDE_TOKEN")?;
        Ok(self.gateway.verify(token)?)
    }

    /// Flush pending sync notifications before the process exits.
    pub fn finish(self) {
        self.notifier.shutdown();
    }
}

/// Shorten `s` to at most `max` characters for table columns.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::path::Path;

    use super::Session;
    use crate::config::{RideConfig, RideSettings};

    /// Settings with a passenger, two drivers and an anonymous token.
    pub fn settings() -> RideSettings {
        let mut settings = RideSettings::default();
        settings.identity.tokens = HashMap::from([
            ("tok-p".to_string(), "passenger-1".to_string()),
            ("tok-d1".to_string(), "driver-1".to_string()),
            ("tok-d2".to_string(), "driver-2".to_string()),
        ]);
        settings
    }

    pub fn session(root: &Path, token: &str) -> Session {
        Session::open(&RideConfig::for_project(root), &settings(), Some(token)).unwrap()
    }
}
