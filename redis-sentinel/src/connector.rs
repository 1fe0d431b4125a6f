//! Turns connection configurations into live [`RoutingConnection`]s.
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::IndexedRandom;

use crate::address_cache::ServiceAddress;
use crate::client::ClientFactory;
use crate::client::RedisClient;
use crate::client::SentinelNode;
use crate::configuration::ClientOptions;
use crate::configuration::ConnectionConfig;
use crate::configuration::RetryConfig;
use crate::connection::NodeFactory;
use crate::connection::RoutingConnection;
use crate::error::Error;
use crate::events::EventSink;
use crate::sentinel::SentinelLocator;
use crate::sentinel::required_service;

/// Builds clients against the nodes Sentinel reports for a connection.
pub struct SentinelConnector {
    locator: SentinelLocator,
    factory: Arc<dyn ClientFactory>,
    retry: RetryConfig,
    events: EventSink,
}

impl SentinelConnector {
    pub fn new(
        locator: SentinelLocator,
        factory: Arc<dyn ClientFactory>,
        retry: RetryConfig,
        events: EventSink,
    ) -> Self {
        Self {
            locator,
            factory,
            retry,
            events,
        }
    }

    pub fn locator(&self) -> &SentinelLocator {
        &self.locator
    }

    /// Open a client for `config`.
    ///
    /// Connections without Sentinel settings connect straight to their
    /// configured host. Otherwise the master is used, or a random healthy
    /// replica when `read_only` is set and replica reads are enabled.
    /// `refresh` bypasses the address cache.
    pub async fn build_client(
        &self,
        config: &ConnectionConfig,
        global: &ClientOptions,
        refresh: bool,
        read_only: bool,
    ) -> Result<Arc<dyn RedisClient>, Error> {
        if !config.uses_sentinel() {
            let options = config.plain_node_options(global);
            return Ok(self.factory.connect(&options).await?);
        }

        let service = required_service(config)?;
        let address = if read_only && config.read_only_replicas {
            let replicas = self.locator.locate_replicas(config, refresh).await?;
            pick(&replicas)?
        } else {
            self.locator.locate_master(config, refresh).await?
        };

        tracing::debug!(
            component = "SentinelConnector",
            service,
            address = %address,
            read_only,
            refresh,
            "connecting to redis node"
        );
        let options = config.node_options(&address, global);
        Ok(self.factory.connect(&options).await?)
    }

    /// A routing connection for the connection called `name`.
    ///
    /// The master client is opened right away. The replica client, when
    /// replica reads are enabled, is opened by the first read.
    pub async fn connect(
        self: &Arc<Self>,
        name: &str,
        config: &ConnectionConfig,
        global: &ClientOptions,
    ) -> Result<RoutingConnection, Error> {
        let config = Arc::new(config.clone());
        let global = Arc::new(global.clone());

        let master = self.build_client(&config, &global, false, false).await?;
        let mut connection = RoutingConnection::new(name, master)
            .with_master_factory(Arc::new(ConnectorNodeFactory {
                connector: self.clone(),
                config: config.clone(),
                global: global.clone(),
                read_only: false,
            }))
            .with_retry_policy(self.retry.redis_policy(config.retry_override()))
            .with_events(self.events.clone());

        if config.uses_sentinel() && config.read_only_replicas {
            connection = connection.with_replica_factory(Arc::new(ConnectorNodeFactory {
                connector: self.clone(),
                config,
                global,
                read_only: true,
            }));
        }

        Ok(connection)
    }

    /// Redis Cluster is not supported through Sentinel.
    pub async fn connect_to_cluster(
        &self,
        _name: &str,
        _config: &ConnectionConfig,
    ) -> Result<RoutingConnection, Error> {
        Err(Error::NotImplemented(
            "The Redis Sentinel driver does not support connecting to clusters.".to_string(),
        ))
    }

    /// A reachable Sentinel node for `config`.
    pub async fn create_sentinel(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn SentinelNode>, Error> {
        self.locator.create_sentinel(config).await
    }
}

fn pick(addresses: &[ServiceAddress]) -> Result<ServiceAddress, Error> {
    addresses
        .choose(&mut rand::rng())
        .cloned()
        .ok_or_else(|| Error::configuration("No Redis node address was resolved."))
}

/// Rebuilds one side of a connection through its connector.
struct ConnectorNodeFactory {
    connector: Arc<SentinelConnector>,
    config: Arc<ConnectionConfig>,
    global: Arc<ClientOptions>,
    read_only: bool,
}

#[async_trait]
impl NodeFactory for ConnectorNodeFactory {
    async fn build(&self, refresh: bool) -> Result<Arc<dyn RedisClient>, Error> {
        self.connector
            .build_client(&self.config, &self.global, refresh, self.read_only)
            .await
    }
}
