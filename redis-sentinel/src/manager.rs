use std::sync::Arc;

use tokio::sync::broadcast;

use crate::address_cache::AddressCache;
use crate::client::ClientFactory;
use crate::client::backend::FredClientFactory;
use crate::configuration::RedisConfig;
use crate::connection::LifecycleEvent;
use crate::connection::RoutingConnection;
use crate::connection::StickinessRegistry;
use crate::connector::SentinelConnector;
use crate::error::Error;
use crate::events::Event;
use crate::events::EventSink;
use crate::sentinel::SentinelLocator;

/// Hands out the connections named in a [`RedisConfig`].
///
/// Every connection of a manager shares one [`AddressCache`] and one event
/// stream. The manager keeps track of each connection's stickiness so a
/// new unit of work can release reads back to the replicas.
pub struct SentinelManager {
    config: RedisConfig,
    connector: Arc<SentinelConnector>,
    registry: Arc<StickinessRegistry>,
    events: EventSink,
}

impl SentinelManager {
    pub fn new(config: RedisConfig, factory: Arc<dyn ClientFactory>) -> Self {
        let events = EventSink::default();
        let locator = SentinelLocator::new(
            factory.clone(),
            Arc::new(AddressCache::new()),
            config.retry.sentinel_policy(),
            events.clone(),
        );
        let connector = SentinelConnector::new(
            locator,
            factory,
            config.retry.clone(),
            events.clone(),
        );

        Self {
            config,
            connector: Arc::new(connector),
            registry: Arc::new(StickinessRegistry::new()),
            events,
        }
    }

    /// A manager talking to real servers.
    pub fn with_fred(config: RedisConfig) -> Self {
        Self::new(config, Arc::new(FredClientFactory))
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Open the connection called `name`.
    pub async fn connection(&self, name: &str) -> Result<RoutingConnection, Error> {
        let config = self.config.connections.get(name).ok_or_else(|| {
            Error::configuration(format!("Redis connection [{name}] not configured."))
        })?;
        if config.uses_sentinel() && !self.config.clusters.is_empty() {
            return Err(Error::configuration(
                "Redis Sentinel connections do not support Redis Cluster.",
            ));
        }

        let connection = self
            .connector
            .connect(name, config, &self.config.options)
            .await?;
        self.registry.register(connection.stickiness());

        tracing::debug!(
            component = "SentinelManager",
            connection = name,
            sentinel = config.uses_sentinel(),
            "redis connection opened"
        );
        Ok(connection)
    }

    /// Release every live connection's reads back to the replicas.
    pub fn reset_stickiness(&self) {
        self.registry.reset_all();
    }

    pub fn on_lifecycle(&self, event: LifecycleEvent) {
        tracing::trace!(component = "SentinelManager", ?event, "resetting stickiness");
        match event {
            LifecycleEvent::JobProcessing | LifecycleEvent::RequestReceived => {
                self.reset_stickiness()
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn address_cache(&self) -> &Arc<AddressCache> {
        self.connector.locator().address_cache()
    }

    /// Forget every resolved address.
    pub fn flush_address_cache(&self) {
        self.address_cache().flush();
    }

    pub fn connector(&self) -> &Arc<SentinelConnector> {
        &self.connector
    }

    pub fn registry(&self) -> &Arc<StickinessRegistry> {
        &self.registry
    }
}
