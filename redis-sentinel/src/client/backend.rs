//! [`ClientFactory`] backed by fred.
//!
//! fred's own reconnection is switched off: recovering from a failed node
//! means asking Sentinel again, which is the job of the connector.
//!
//! fred keeps a connection open until `QUIT`, even once every handle to the
//! client is gone. Clients are closed through [`RedisClient::quit`] and
//! [`SentinelNode::quit`], and dropping one that is still open spawns the
//! `QUIT` on the current runtime.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use fred::clients::Client;
use fred::clients::SentinelClient;
use fred::interfaces::ClientLike;
use fred::interfaces::SentinelInterface;
use fred::interfaces::TransactionInterface;
use fred::socket2::TcpKeepalive;
use fred::types::Builder;
use fred::types::ClusterHash;
use fred::types::CustomCommand;
use fred::types::config::Config;
use fred::types::config::ConnectionConfig;
use fred::types::config::SentinelConfig;
use fred::types::config::ServerConfig;
use fred::types::config::TcpConfig;

use super::ClientFactory;
use super::Command;
use super::NodeOptions;
use super::RedisClient;
use super::ReplicaEntry;
use super::SentinelNode;
use super::SentinelOptions;
use super::Value;
use crate::address_cache::ServiceAddress;
use crate::error::ErrorKind;
use crate::error::RedisError;

const KEEPALIVE: Duration = Duration::from_secs(600);

fn custom_command(command: &Command, prefix: Option<&str>) -> (CustomCommand, Vec<Value>) {
    let command = match prefix {
        Some(prefix) => command.with_key_prefix(prefix),
        None => command.clone(),
    };
    (
        CustomCommand::new(
            command.name().to_ascii_uppercase(),
            ClusterHash::FirstKey,
            false,
        ),
        command.arguments().to_vec(),
    )
}

fn tcp_config(persistent: bool) -> TcpConfig {
    TcpConfig {
        nodelay: Some(true),
        keepalive: persistent.then(|| TcpKeepalive::new().with_time(KEEPALIVE)),
        ..Default::default()
    }
}

async fn close<C>(client: &C, closed: &AtomicBool)
where
    C: ClientLike,
{
    if closed.swap(true, Ordering::AcqRel) {
        return;
    }
    if let Err(error) = client.quit().await {
        tracing::debug!(
            component = "FredClientFactory",
            client = client.id(),
            reason = %error,
            "failed to close redis connection"
        );
    }
}

fn close_on_drop<C>(client: &C, closed: &AtomicBool)
where
    C: ClientLike + Clone + 'static,
{
    if closed.swap(true, Ordering::AcqRel) {
        return;
    }
    // outside a runtime there is nothing to run the QUIT on
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        let client = client.clone();
        runtime.spawn(async move {
            let _ = client.quit().await;
        });
    }
}

/// A data node client builder without a reconnect policy.
fn node_builder(options: &NodeOptions) -> Builder {
    let config = Config {
        server: ServerConfig::new_centralized(options.host.clone(), options.port),
        password: options.password.clone().filter(|password| !password.is_empty()),
        database: Some(options.database),
        fail_fast: true,
        ..Default::default()
    };

    let mut builder = Builder::from_config(config);
    builder
        .with_connection_config(|config| {
            config.connection_timeout = options.timeout;
            config.max_command_attempts = 1;
            config.tcp = tcp_config(options.persistent);
        })
        .with_performance_config(|config| {
            if let Some(read_timeout) = options.read_timeout {
                config.default_command_timeout = read_timeout;
            }
        });
    builder
}

/// Opens fred clients.
#[derive(Clone, Debug, Default)]
pub struct FredClientFactory;

#[async_trait]
impl ClientFactory for FredClientFactory {
    async fn connect(&self, options: &NodeOptions) -> Result<Arc<dyn RedisClient>, RedisError> {
        let client = node_builder(options).build()?;
        client.init().await?;
        tracing::debug!(
            component = "FredClientFactory",
            host = %options.host,
            port = options.port,
            database = options.database,
            "redis client connected"
        );

        Ok(Arc::new(FredClient {
            id: format!("{}:{}/{}", options.host, options.port, client.id()),
            client,
            prefix: options.prefix.clone().filter(|prefix| !prefix.is_empty()),
            closed: AtomicBool::new(false),
        }))
    }

    async fn connect_sentinel(
        &self,
        options: &SentinelOptions,
    ) -> Result<Arc<dyn SentinelNode>, RedisError> {
        let config = SentinelConfig {
            host: options.host.clone(),
            port: options.port,
            password: options.auth.clone(),
            ..Default::default()
        };
        let connection = ConnectionConfig {
            connection_timeout: options.connect_timeout,
            max_command_attempts: 1,
            tcp: tcp_config(options.persistent),
            ..Default::default()
        };

        let client = SentinelClient::new(config, None, Some(connection), None);
        client.init().await?;

        Ok(Arc::new(FredSentinel {
            client,
            read_timeout: options.read_timeout,
            closed: AtomicBool::new(false),
        }))
    }
}

/// A fred client bound to one data node.
pub struct FredClient {
    id: String,
    client: Client,
    prefix: Option<String>,
    closed: AtomicBool,
}

impl Drop for FredClient {
    fn drop(&mut self) {
        close_on_drop(&self.client, &self.closed);
    }
}

#[async_trait]
impl RedisClient for FredClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, command: &Command) -> Result<Value, RedisError> {
        let (command, args) = custom_command(command, self.prefix.as_deref());
        Ok(self.client.custom::<Value, Value>(command, args).await?)
    }

    async fn pipeline(&self, commands: &[Command]) -> Result<Vec<Value>, RedisError> {
        let pipeline = self.client.pipeline();
        for command in commands {
            let (command, args) = custom_command(command, self.prefix.as_deref());
            let _: () = pipeline.custom(command, args).await?;
        }
        Ok(pipeline.all().await?)
    }

    async fn transaction(&self, commands: &[Command]) -> Result<Vec<Value>, RedisError> {
        let transaction = self.client.multi();
        for command in commands {
            let (command, args) = custom_command(command, self.prefix.as_deref());
            let _: () = transaction.custom(command, args).await?;
        }
        Ok(transaction.exec(true).await?)
    }

    async fn quit(&self) {
        close(&self.client, &self.closed).await;
    }
}

/// A fred client bound to one Sentinel node.
pub struct FredSentinel {
    client: SentinelClient,
    read_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl Drop for FredSentinel {
    fn drop(&mut self) {
        close_on_drop(&self.client, &self.closed);
    }
}

impl FredSentinel {
    async fn with_read_timeout<T, F>(&self, request: F) -> Result<T, RedisError>
    where
        F: Future<Output = Result<T, fred::error::Error>>,
    {
        match self.read_timeout {
            Some(timeout) if !timeout.is_zero() => tokio::time::timeout(timeout, request)
                .await
                .map_err(|_| {
                    RedisError::new(ErrorKind::Timeout, "read error on connection: timed out")
                })?
                .map_err(Into::into),
            _ => request.await.map_err(Into::into),
        }
    }
}

#[async_trait]
impl SentinelNode for FredSentinel {
    async fn ping(&self) -> Result<bool, RedisError> {
        let ping = CustomCommand::new("PING", ClusterHash::Random, false);
        let reply: Value = self
            .with_read_timeout(self.client.custom::<Value, Value>(ping, vec![]))
            .await?;
        Ok(reply.as_str().is_some_and(|reply| reply.eq_ignore_ascii_case("PONG")))
    }

    async fn master_addr(&self, service: &str) -> Result<Option<ServiceAddress>, RedisError> {
        let reply: Option<Vec<String>> = self
            .with_read_timeout(self.client.get_master_addr_by_name(service.to_string()))
            .await?;

        Ok(match reply.as_deref() {
            Some([ip, port]) => port
                .parse()
                .ok()
                .map(|port| ServiceAddress::new(ip.clone(), port)),
            _ => None,
        })
    }

    async fn replicas(&self, service: &str) -> Result<Option<Vec<ReplicaEntry>>, RedisError> {
        let reply: Option<Vec<HashMap<String, String>>> = self
            .with_read_timeout(self.client.replicas(service.to_string()))
            .await?;
        Ok(reply.map(|replicas| replicas.into_iter().map(ReplicaEntry::from).collect()))
    }

    async fn quit(&self) {
        close(&self.client, &self.closed).await;
    }
}
