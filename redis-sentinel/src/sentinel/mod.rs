//! Master and replica discovery through Redis Sentinel.
use std::sync::Arc;

use crate::address_cache::AddressCache;
use crate::address_cache::ServiceAddress;
use crate::client::ClientFactory;
use crate::client::ReplicaEntry;
use crate::client::SentinelNode;
use crate::client::SentinelOptions;
use crate::configuration::ConnectionConfig;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::RedisError;
use crate::events::Event;
use crate::events::EventSink;
use crate::retry::RetryHooks;
use crate::retry::RetryPolicy;

mod endpoint;

use endpoint::normalize_host;
use endpoint::normalize_port;

const COMPONENT: &str = "SentinelLocator";

/// The configured master group name, or a configuration error.
pub(crate) fn required_service(config: &ConnectionConfig) -> Result<&str, Error> {
    config
        .service()
        .ok_or_else(|| Error::configuration("Redis Sentinel service name is not configured."))
}

/// Finds a reachable Sentinel and asks it where the nodes of a service live.
///
/// Resolved addresses are written to the shared [`AddressCache`] and served
/// from it until a caller asks for a refresh.
pub struct SentinelLocator {
    factory: Arc<dyn ClientFactory>,
    cache: Arc<AddressCache>,
    retry: RetryPolicy,
    events: EventSink,
}

impl SentinelLocator {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        cache: Arc<AddressCache>,
        retry: RetryPolicy,
        events: EventSink,
    ) -> Self {
        Self {
            factory,
            cache,
            retry,
            events,
        }
    }

    pub fn address_cache(&self) -> &Arc<AddressCache> {
        &self.cache
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The first configured Sentinel answering `PING`.
    ///
    /// Endpoints with a malformed host or port are skipped. When none
    /// answers, the error carries the last failure seen.
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn SentinelNode>, Error> {
        let mut last_error = None;

        for endpoint in config.sentinel_endpoints() {
            let configured = endpoint.host.as_deref().unwrap_or_default();
            let Some(host) = normalize_host(configured) else {
                tracing::warn!(
                    component = COMPONENT,
                    host = configured,
                    "skipping Redis Sentinel endpoint with an invalid host"
                );
                continue;
            };
            let Some(port) = normalize_port(endpoint.port.as_ref()) else {
                tracing::warn!(
                    component = COMPONENT,
                    host = %host,
                    port = ?endpoint.port,
                    "skipping Redis Sentinel endpoint with an invalid port"
                );
                continue;
            };

            match self.ping(&config.sentinel_options(host.clone(), port)).await {
                Ok(Some(sentinel)) => return Ok(sentinel),
                Ok(None) => {
                    tracing::debug!(
                        component = COMPONENT,
                        %host,
                        %port,
                        "Redis Sentinel did not answer PING"
                    );
                }
                Err(error) => {
                    tracing::debug!(
                        component = COMPONENT,
                        %host,
                        %port,
                        reason = %error,
                        "Redis Sentinel is unreachable"
                    );
                    last_error = Some(error);
                }
            }
        }

        Err(Error::Configuration {
            message: "No reachable Redis Sentinel host found.".to_string(),
            source: last_error,
        })
    }

    /// A connected Sentinel answering `PING`. Sentinels failing it are closed.
    async fn ping(
        &self,
        options: &SentinelOptions,
    ) -> Result<Option<Arc<dyn SentinelNode>>, RedisError> {
        let sentinel = self.factory.connect_sentinel(options).await?;
        match sentinel.ping().await {
            Ok(true) => Ok(Some(sentinel)),
            Ok(false) => {
                sentinel.quit().await;
                Ok(None)
            }
            Err(error) => {
                sentinel.quit().await;
                Err(error)
            }
        }
    }

    /// A reachable Sentinel for `config`, located under the retry policy.
    ///
    /// The caller owns the returned client and should `quit` it when done.
    pub async fn create_sentinel(
        &self,
        config: &ConnectionConfig,
    ) -> Result<Arc<dyn SentinelNode>, Error> {
        if config.sentinel.is_none() && config.sentinels.is_none() {
            return Err(Error::configuration("Redis Sentinel configuration is missing."));
        }
        let service = required_service(config)?;

        let hooks = SentinelHooks {
            service,
            context: "connect_to_sentinel",
            events: &self.events,
        };
        self.retry
            .execute(move || self.connect(config), &hooks)
            .await
    }

    /// Address of the current master of the service.
    pub async fn locate_master(
        &self,
        config: &ConnectionConfig,
        refresh: bool,
    ) -> Result<ServiceAddress, Error> {
        let service = required_service(config)?;
        if refresh {
            self.cache.forget(service);
        } else if let Some(address) = self.cache.get(service) {
            return Ok(address);
        }

        let hooks = SentinelHooks {
            service,
            context: "locate_master",
            events: &self.events,
        };
        let address = self
            .retry
            .execute(
                move || async move {
                    let sentinel = self.connect(config).await?;
                    let address = sentinel.master_addr(service).await;
                    sentinel.quit().await;
                    address?.ok_or_else(|| not_found("No master found for service", service))
                },
                &hooks,
            )
            .await?;

        self.cache.set(service, address.ip.clone(), address.port);
        Ok(address)
    }

    /// Addresses of the healthy replicas of the service.
    ///
    /// Falls back to the master address when Sentinel reports no healthy
    /// replica, so that callers always get something to read from.
    pub async fn locate_replicas(
        &self,
        config: &ConnectionConfig,
        refresh: bool,
    ) -> Result<Vec<ServiceAddress>, Error> {
        let service = required_service(config)?;
        if refresh {
            self.cache.forget(service);
        } else {
            let cached = self.cache.replicas(service);
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let hooks = SentinelHooks {
            service,
            context: "locate_replicas",
            events: &self.events,
        };
        let replicas = self
            .retry
            .execute(
                move || async move {
                    let sentinel = self.connect(config).await?;
                    let replicas = sentinel.replicas(service).await;
                    sentinel.quit().await;
                    replicas?.ok_or_else(|| not_found("No replicas found for service", service))
                },
                &hooks,
            )
            .await?;

        let healthy = healthy_replicas(&replicas);
        if healthy.is_empty() {
            tracing::debug!(
                component = COMPONENT,
                service,
                reported = replicas.len(),
                "no healthy replica, reading from the master"
            );
            return Ok(vec![self.locate_master(config, false).await?]);
        }

        self.cache.set_replicas(service, &healthy);
        Ok(healthy)
    }
}

fn not_found(message: &str, service: &str) -> Error {
    RedisError::new(ErrorKind::Sentinel, format!("{message} '{service}'.")).into()
}

fn healthy_replicas(replicas: &[ReplicaEntry]) -> Vec<ServiceAddress> {
    replicas
        .iter()
        .filter(|replica| !replica.is_down())
        .filter_map(ReplicaEntry::address)
        .collect()
}

struct SentinelHooks<'a> {
    service: &'a str,
    context: &'static str,
    events: &'a EventSink,
}

impl RetryHooks<Error> for SentinelHooks<'_> {
    fn on_fail(&self, error: &Error, attempts: u32) {
        tracing::error!(
            component = COMPONENT,
            method = self.context,
            service = self.service,
            reason = %error,
            attempts,
            "{} - fail",
            self.context
        );
        self.events.emit(Event::SentinelResolutionFailed {
            service: self.service.to_string(),
            error: error.to_string(),
            context: self.context,
            attempts,
        });
    }

    fn on_reconnect(&self, attempts: u32) {
        tracing::info!(
            component = COMPONENT,
            method = self.context,
            service = self.service,
            attempts,
            "{} - reconnected",
            self.context
        );
        self.events.emit(Event::SentinelResolutionReconnected {
            service: self.service.to_string(),
            context: self.context,
            attempts,
        });
    }

    fn on_exhausted(&self, error: &Error, attempts: u32) {
        tracing::error!(
            component = COMPONENT,
            method = self.context,
            service = self.service,
            reason = %error,
            attempts,
            "{} - max fail",
            self.context
        );
        self.events.emit(Event::SentinelResolutionMaxRetriesExhausted {
            service: self.service.to_string(),
            error: error.to_string(),
            context: self.context,
            attempts,
        });
    }
}
