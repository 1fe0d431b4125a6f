//! The `redis` configuration section.
//!
//! Every connection is described by a [`ConnectionConfig`]. Most node
//! settings can be given either at the top level of the connection or under
//! its `sentinel` key. Which one wins depends on who reads it: data nodes
//! prefer the top level, Sentinel nodes prefer `sentinel.*`.
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::address_cache::ServiceAddress;
use crate::client::NodeOptions;
use crate::client::SentinelOptions;
use crate::retry::DEFAULT_ATTEMPTS;
use crate::retry::DEFAULT_DELAY;
use crate::retry::RetryPolicy;

#[cfg(test)]
mod tests;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);
pub(crate) const DEFAULT_SENTINEL_PORT: u16 = 26379;
const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: u16 = 6379;

const DEFAULT_SENTINEL_MESSAGES: &[&str] = &[
    "No master found for service",
    "No replicas found for service",
];

const DEFAULT_REDIS_MESSAGES: &[&str] = &[
    "broken pipe",
    "connection closed",
    "connection refused",
    "connection lost",
    "failed while reconnecting",
    "is loading the dataset in memory",
    "read error on connection",
    "socket",
    "went away",
    "loading",
    "readonly",
    "can't write against a read only replica",
    "Temporary failure in name resolution",
];

/// Fill the gaps of `self` with the values of `fallback`.
pub trait Merge {
    fn merge(&self, fallback: Option<&Self>) -> Self;
}

/// Redis configuration, holding every named connection.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct RedisConfig {
    /// Client options shared by every connection
    pub options: ClientOptions,
    /// Redis Cluster definitions. Not supported together with Sentinel connections.
    pub clusters: HashMap<String, serde_json::Value>,
    /// Retry policies for Sentinel lookups and data node commands
    pub retry: RetryConfig,
    /// Named connections
    pub connections: HashMap<String, ConnectionConfig>,
}

impl FromStr for RedisConfig {
    type Err = serde_yaml::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s)
    }
}

/// Generate the JSON schema of [`RedisConfig`].
pub fn generate_config_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(RedisConfig)
}

/// Options applied to every client built for a connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ClientOptions {
    /// Prefix prepended to every key
    pub prefix: Option<String>,
}

impl Merge for ClientOptions {
    fn merge(&self, fallback: Option<&Self>) -> Self {
        match fallback {
            None => self.clone(),
            Some(fallback) => ClientOptions {
                prefix: self.prefix.clone().or_else(|| fallback.prefix.clone()),
            },
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    /// Retries around Sentinel lookups
    pub sentinel: RetrySettings,
    /// Retries around data node commands
    pub redis: RetrySettings,
}

impl RetryConfig {
    pub fn sentinel_policy(&self) -> RetryPolicy {
        self.sentinel.policy(None, DEFAULT_SENTINEL_MESSAGES)
    }

    /// The data node policy, with attempts and delay optionally overridden per connection.
    pub fn redis_policy(&self, overrides: Option<&RetryOverride>) -> RetryPolicy {
        self.redis.policy(overrides, DEFAULT_REDIS_MESSAGES)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Retries after the first failed attempt (default: 5)
    pub attempts: Option<u32>,
    #[serde(deserialize_with = "humantime_serde::deserialize", default)]
    #[schemars(with = "String", default)]
    /// Base backoff delay (default: 1s)
    pub delay: Option<Duration>,
    /// Case-insensitive fragments of retryable error messages
    pub messages: Option<Vec<String>>,
}

impl RetrySettings {
    fn policy(&self, overrides: Option<&RetryOverride>, default_messages: &[&str]) -> RetryPolicy {
        let attempts = overrides
            .and_then(|overrides| overrides.attempts)
            .or(self.attempts)
            .unwrap_or(DEFAULT_ATTEMPTS);
        let delay = overrides
            .and_then(|overrides| overrides.delay)
            .or(self.delay)
            .unwrap_or(DEFAULT_DELAY);

        match &self.messages {
            Some(messages) => RetryPolicy::new(attempts, delay, messages),
            None => RetryPolicy::new(attempts, delay, default_messages),
        }
    }
}

/// Per-connection retry settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConnectionRetry {
    pub redis: Option<RetryOverride>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RetryOverride {
    pub attempts: Option<u32>,
    #[serde(deserialize_with = "humantime_serde::deserialize", default)]
    #[schemars(with = "String", default)]
    pub delay: Option<Duration>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    /// Resolve nodes through Redis Sentinel
    #[default]
    Sentinel,
    /// Connect straight to `host`/`port`
    Plain,
}

/// A Sentinel node to ask for the current topology.
///
/// Host and port are checked when connecting, not when parsing: a malformed
/// entry is skipped with a warning and the other Sentinels are still tried.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SentinelEndpoint {
    pub host: Option<String>,
    /// Defaults to 26379
    pub port: Option<EndpointPort>,
}

impl SentinelEndpoint {
    pub fn new(host: impl Into<String>, port: Option<i64>) -> Self {
        Self {
            host: Some(host.into()),
            port: port.map(EndpointPort::Number),
        }
    }
}

/// A Sentinel port, given as a number or as a string such as `"26379"`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum EndpointPort {
    Number(i64),
    Text(String),
}

impl EndpointPort {
    /// The port as an integer, `None` when the text is not a number.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(port) => Some(*port),
            Self::Text(port) => port.trim().parse().ok(),
        }
    }
}

/// The `sentinel` key of a connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SentinelSection {
    /// Name of the monitored master group
    pub service: Option<String>,
    pub sentinels: Option<Vec<SentinelEndpoint>>,
    pub host: Option<String>,
    pub port: Option<i64>,
    pub password: Option<String>,
    #[serde(deserialize_with = "humantime_serde::deserialize", default)]
    #[schemars(with = "String", default)]
    pub timeout: Option<Duration>,
    #[serde(deserialize_with = "humantime_serde::deserialize", default)]
    #[schemars(with = "String", default)]
    pub read_timeout: Option<Duration>,
    #[serde(deserialize_with = "humantime_serde::deserialize", default)]
    #[schemars(with = "String", default)]
    pub retry_interval: Option<Duration>,
    pub persistent: Option<bool>,
    pub database: Option<u8>,
}

impl SentinelSection {
    fn settings(&self) -> NodeSettings {
        NodeSettings {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            timeout: self.timeout,
            read_timeout: self.read_timeout,
            retry_interval: self.retry_interval,
            persistent: self.persistent,
            database: self.database,
        }
    }
}

/// One named connection.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub client: ClientKind,
    pub sentinel: Option<SentinelSection>,
    /// Name of the monitored master group, when not given under `sentinel`
    pub service: Option<String>,
    pub host: Option<String>,
    pub port: Option<i64>,
    pub password: Option<String>,
    #[serde(deserialize_with = "humantime_serde::deserialize", default)]
    #[schemars(with = "String", default)]
    /// Connect timeout (default: 200ms)
    pub timeout: Option<Duration>,
    #[serde(deserialize_with = "humantime_serde::deserialize", default)]
    #[schemars(with = "String", default)]
    /// Read timeout, none when unset or zero
    pub read_timeout: Option<Duration>,
    #[serde(deserialize_with = "humantime_serde::deserialize", default)]
    #[schemars(with = "String", default)]
    /// Delay between low level reconnection attempts, disabled when zero
    pub retry_interval: Option<Duration>,
    pub persistent: Option<bool>,
    pub database: Option<u8>,
    /// Sentinel nodes, taking precedence over `sentinel.sentinels`
    pub sentinels: Option<Vec<SentinelEndpoint>>,
    /// Send read-only commands to replicas
    #[serde(default)]
    pub read_only_replicas: bool,
    /// Shorthand for `options.prefix`
    pub prefix: Option<String>,
    #[serde(default)]
    pub options: ClientOptions,
    pub retry: Option<ConnectionRetry>,
}

impl ConnectionConfig {
    /// Whether this connection resolves its nodes through Sentinel.
    pub fn uses_sentinel(&self) -> bool {
        self.client == ClientKind::Sentinel && (self.sentinel.is_some() || self.sentinels.is_some())
    }

    /// The master group name, `sentinel.service` first.
    pub fn service(&self) -> Option<&str> {
        self.sentinel
            .as_ref()
            .and_then(|sentinel| sentinel.service.as_deref())
            .or(self.service.as_deref())
            .map(str::trim)
            .filter(|service| !service.is_empty())
    }

    /// Sentinel nodes to try, in order.
    ///
    /// An explicit list wins. Otherwise a single endpoint is built from the
    /// legacy `host`/`port` keys.
    pub fn sentinel_endpoints(&self) -> Vec<SentinelEndpoint> {
        let sentinel = self.sentinel.as_ref();
        if let Some(sentinels) = self
            .sentinels
            .as_ref()
            .or_else(|| sentinel.and_then(|sentinel| sentinel.sentinels.as_ref()))
        {
            return sentinels.clone();
        }

        let host = sentinel
            .and_then(|sentinel| sentinel.host.clone())
            .or_else(|| self.host.clone())
            .unwrap_or_default();
        let port = sentinel
            .and_then(|sentinel| sentinel.port)
            .or(self.port)
            .or(Some(i64::from(DEFAULT_SENTINEL_PORT)));

        vec![SentinelEndpoint::new(host, port)]
    }

    /// Options for a Sentinel node, preferring `sentinel.*` settings.
    pub fn sentinel_options(&self, host: String, port: u16) -> SentinelOptions {
        let settings = self.sentinel_settings().merge(Some(&self.settings()));
        SentinelOptions {
            host,
            port,
            auth: settings.password(),
            connect_timeout: settings.timeout.unwrap_or(DEFAULT_TIMEOUT),
            read_timeout: settings.read_timeout(),
            retry_interval: settings.retry_interval.unwrap_or_default(),
            persistent: settings.persistent.unwrap_or_default(),
        }
    }

    /// Options for the data node at `address`, preferring top level settings.
    pub fn node_options(&self, address: &ServiceAddress, global: &ClientOptions) -> NodeOptions {
        let settings = self.settings().merge(Some(&self.sentinel_settings()));
        settings.node_options(address.ip.clone(), address.port, self.merged_options(global))
    }

    /// Options for a connection that skips Sentinel.
    pub fn plain_node_options(&self, global: &ClientOptions) -> NodeOptions {
        let settings = self.settings().merge(Some(&self.sentinel_settings()));
        let host = settings
            .host
            .clone()
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string());
        let port = settings
            .port
            .and_then(|port| u16::try_from(port).ok())
            .filter(|port| *port > 0)
            .unwrap_or(DEFAULT_REDIS_PORT);
        settings.node_options(host, port, self.merged_options(global))
    }

    /// Global options overridden by this connection's own options.
    pub fn merged_options(&self, global: &ClientOptions) -> ClientOptions {
        let mut options = self.options.merge(Some(global));
        if let Some(prefix) = &self.prefix {
            options.prefix = Some(prefix.clone());
        }
        options
    }

    pub fn retry_override(&self) -> Option<&RetryOverride> {
        self.retry.as_ref().and_then(|retry| retry.redis.as_ref())
    }

    fn settings(&self) -> NodeSettings {
        NodeSettings {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            timeout: self.timeout,
            read_timeout: self.read_timeout,
            retry_interval: self.retry_interval,
            persistent: self.persistent,
            database: self.database,
        }
    }

    fn sentinel_settings(&self) -> NodeSettings {
        self.sentinel
            .as_ref()
            .map(SentinelSection::settings)
            .unwrap_or_default()
    }
}

/// Settings that may appear both at the top level and under `sentinel`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct NodeSettings {
    host: Option<String>,
    port: Option<i64>,
    password: Option<String>,
    timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    retry_interval: Option<Duration>,
    persistent: Option<bool>,
    database: Option<u8>,
}

impl Merge for NodeSettings {
    fn merge(&self, fallback: Option<&Self>) -> Self {
        match fallback {
            None => self.clone(),
            Some(fallback) => NodeSettings {
                host: self.host.clone().or_else(|| fallback.host.clone()),
                port: self.port.or(fallback.port),
                password: self.password.clone().or_else(|| fallback.password.clone()),
                timeout: self.timeout.or(fallback.timeout),
                read_timeout: self.read_timeout.or(fallback.read_timeout),
                retry_interval: self.retry_interval.or(fallback.retry_interval),
                persistent: self.persistent.or(fallback.persistent),
                database: self.database.or(fallback.database),
            },
        }
    }
}

impl NodeSettings {
    fn password(&self) -> Option<String> {
        self.password
            .clone()
            .filter(|password| !password.is_empty())
    }

    fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout.filter(|timeout| !timeout.is_zero())
    }

    fn node_options(&self, host: String, port: u16, options: ClientOptions) -> NodeOptions {
        NodeOptions {
            host,
            port,
            password: self.password(),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            read_timeout: self.read_timeout(),
            retry_interval: self.retry_interval.unwrap_or_default(),
            persistent: self.persistent.unwrap_or_default(),
            database: self.database.unwrap_or_default(),
            prefix: options.prefix,
        }
    }
}
