//! The client seam: what the core needs from an underlying Redis client.
//!
//! The core never speaks the wire protocol. It is handed a [`ClientFactory`]
//! able to open data-node clients and Sentinel clients, and funnels every
//! command through [`RedisClient::execute`].
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
pub use ::fred::types::Value;

use crate::address_cache::ServiceAddress;
use crate::error::RedisError;

pub mod backend;

/// One Redis command with its arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    name: String,
    args: Vec<Value>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Value>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Value] {
        &self.args
    }

    /// The same command with `prefix` prepended to its key arguments.
    pub fn with_key_prefix(&self, prefix: &str) -> Self {
        if prefix.is_empty() {
            return self.clone();
        }

        let name = self.name.to_ascii_uppercase();
        let args = match name.as_str() {
            "PING" | "ECHO" | "INFO" | "TIME" | "DBSIZE" | "FLUSHDB" | "FLUSHALL" | "SELECT"
            | "SCAN" | "AUTH" | "CLIENT" | "CONFIG" | "MEMORY" | "MULTI" | "EXEC" | "DISCARD"
            | "UNWATCH" | "SCRIPT" | "EVAL" | "EVALSHA" | "PUBLISH" | "QUIT" | "ROLE" => {
                self.args.clone()
            }
            "MGET" | "DEL" | "UNLINK" | "EXISTS" | "TOUCH" | "WATCH" | "SINTER" | "SUNION"
            | "SDIFF" => self.args.iter().map(|key| prefixed(prefix, key)).collect(),
            "MSET" | "MSETNX" => self
                .args
                .iter()
                .enumerate()
                .map(|(index, arg)| {
                    if index % 2 == 0 {
                        prefixed(prefix, arg)
                    } else {
                        arg.clone()
                    }
                })
                .collect(),
            _ => self
                .args
                .iter()
                .enumerate()
                .map(|(index, arg)| {
                    if index == 0 {
                        prefixed(prefix, arg)
                    } else {
                        arg.clone()
                    }
                })
                .collect(),
        };

        Self {
            name: self.name.clone(),
            args,
        }
    }
}

fn prefixed(prefix: &str, key: &Value) -> Value {
    match key {
        Value::Bytes(bytes) => {
            let mut namespaced = Vec::with_capacity(prefix.len() + bytes.len());
            namespaced.extend_from_slice(prefix.as_bytes());
            namespaced.extend_from_slice(bytes);
            Value::Bytes(namespaced.into())
        }
        other => match other.as_string() {
            Some(key) => Value::from(format!("{prefix}{key}")),
            None => other.clone(),
        },
    }
}

/// Everything needed to open a client against one data node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeOptions {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub retry_interval: Duration,
    pub persistent: bool,
    pub database: u8,
    pub prefix: Option<String>,
}

impl NodeOptions {
    pub fn address(&self) -> ServiceAddress {
        ServiceAddress::new(self.host.clone(), self.port)
    }
}

/// Everything needed to open a client against one Sentinel node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentinelOptions {
    pub host: String,
    pub port: u16,
    pub auth: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub retry_interval: Duration,
    pub persistent: bool,
}

/// One entry of `SENTINEL REPLICAS <service>`, as reported field by field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplicaEntry {
    fields: HashMap<String, String>,
}

impl ReplicaEntry {
    pub fn new<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Health flags, falling back to the reported role when flags are missing.
    pub fn flags(&self) -> &str {
        self.get("flags")
            .or_else(|| self.get("role-reported"))
            .unwrap_or_default()
    }

    /// Whether Sentinel reported this replica as down or disconnected.
    pub fn is_down(&self) -> bool {
        let flags = self.flags();
        flags.contains("s_down") || flags.contains("o_down") || flags.contains("disconnected")
    }

    pub fn address(&self) -> Option<ServiceAddress> {
        let ip = self.get("ip")?;
        let port = self.get("port")?.trim().parse().ok()?;
        Some(ServiceAddress::new(ip, port))
    }
}

impl From<HashMap<String, String>> for ReplicaEntry {
    fn from(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }
}

/// A live client connected to one data node.
#[async_trait]
pub trait RedisClient: Send + Sync {
    /// Identifies this client in logs and events.
    fn id(&self) -> &str;

    async fn execute(&self, command: &Command) -> Result<Value, RedisError>;

    /// Send all commands in one round trip, returning one reply per command.
    async fn pipeline(&self, commands: &[Command]) -> Result<Vec<Value>, RedisError>;

    /// Send all commands inside `MULTI`/`EXEC`.
    async fn transaction(&self, commands: &[Command]) -> Result<Vec<Value>, RedisError>;

    /// Close the connection. Further calls are no-ops.
    async fn quit(&self);
}

/// A live client connected to one Sentinel node.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SentinelNode: Send + Sync {
    async fn ping(&self) -> Result<bool, RedisError>;

    /// `SENTINEL GET-MASTER-ADDR-BY-NAME`, `None` when the service is unknown.
    async fn master_addr(&self, service: &str) -> Result<Option<ServiceAddress>, RedisError>;

    /// `SENTINEL REPLICAS`, `None` when Sentinel reports no usable answer.
    async fn replicas(&self, service: &str) -> Result<Option<Vec<ReplicaEntry>>, RedisError>;

    async fn quit(&self);
}

/// Opens clients against concrete addresses.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, options: &NodeOptions) -> Result<Arc<dyn RedisClient>, RedisError>;

    async fn connect_sentinel(
        &self,
        options: &SentinelOptions,
    ) -> Result<Arc<dyn SentinelNode>, RedisError>;
}
