//! Read/write splitting connection with retries and failover recovery.
//!
//! A [`RoutingConnection`] owns a master client and, when replica reads are
//! enabled, a lazily created replica client. Each command is classified by
//! name: reads go to the replica unless a write already happened on this
//! connection ([`Stickiness`]) or a batch is running. Everything else goes to
//! the master. Retryable failures mark the client used as stale, and the next
//! attempt rebuilds it against freshly resolved addresses.
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use fred::types::FromValue;
use parking_lot::Mutex;

use crate::client::Command;
use crate::client::RedisClient;
use crate::client::Value;
use crate::error::Error;
use crate::error::RedisError;
use crate::events::Event;
use crate::events::EventSink;
use crate::retry::RetryHooks;
use crate::retry::RetryPolicy;

mod command;
mod stickiness;

pub use command::is_read_only;
use command::is_flush;
pub use stickiness::LifecycleEvent;
pub use stickiness::Stickiness;
pub use stickiness::StickinessRegistry;

const COMPONENT: &str = "RoutingConnection";

/// Builds the client behind one side of a [`RoutingConnection`].
#[async_trait]
pub trait NodeFactory: Send + Sync {
    /// Open a new client. `refresh` asks for addresses to be resolved again
    /// rather than served from a cache.
    async fn build(&self, refresh: bool) -> Result<Arc<dyn RedisClient>, Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Master,
    Replica,
}

impl Target {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Replica => "replica",
        }
    }
}

/// One side of the connection: the current client and how to replace it.
struct Slot {
    client: Mutex<Option<Arc<dyn RedisClient>>>,
    factory: Option<Arc<dyn NodeFactory>>,
    stale: AtomicBool,
}

impl Slot {
    fn new(client: Option<Arc<dyn RedisClient>>) -> Self {
        Self {
            client: Mutex::new(client),
            factory: None,
            stale: AtomicBool::new(false),
        }
    }

    fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    async fn resolve(&self) -> Result<Arc<dyn RedisClient>, Error> {
        let stale = self.stale.load(Ordering::Acquire);
        let current = self.client.lock().clone();

        let factory = match (&self.factory, current) {
            (Some(factory), None) => factory,
            (Some(factory), Some(_)) if stale => factory,
            (_, Some(client)) => return Ok(client),
            (None, None) => {
                return Err(Error::configuration(
                    "No Redis client is available for this connection.",
                ));
            }
        };

        // keep the stale flag when the rebuild fails, so the next attempt tries again
        let client = factory.build(stale).await?;
        let replaced = self.client.lock().replace(client.clone());
        self.stale.store(false, Ordering::Release);
        if let Some(replaced) = replaced {
            replaced.quit().await;
        }
        Ok(client)
    }
}

#[derive(Clone, Copy, Debug)]
enum BatchKind {
    Pipeline,
    Transaction,
}

impl BatchKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Transaction => "transaction",
        }
    }
}

/// Increments the transaction depth for as long as it lives.
struct TransactionScope<'a> {
    depth: &'a AtomicUsize,
}

impl<'a> TransactionScope<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::AcqRel);
        Self { depth }
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Commands queued by a [`RoutingConnection::pipeline`] or
/// [`RoutingConnection::transaction`] body.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn add(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A logical Redis connection routing commands between master and replica.
///
/// One instance serves one unit of work at a time, which the `&mut self`
/// command methods enforce. Stickiness may still be reset from elsewhere
/// through the shared [`Stickiness`] handle.
pub struct RoutingConnection {
    name: String,
    master: Slot,
    replica: Slot,
    stickiness: Arc<Stickiness>,
    transaction_depth: AtomicUsize,
    retry: RetryPolicy,
    events: EventSink,
}

impl RoutingConnection {
    pub fn new(name: impl Into<String>, master: Arc<dyn RedisClient>) -> Self {
        Self {
            name: name.into(),
            master: Slot::new(Some(master)),
            replica: Slot::new(None),
            stickiness: Arc::default(),
            transaction_depth: AtomicUsize::new(0),
            retry: RetryPolicy::default(),
            events: EventSink::default(),
        }
    }

    /// Rebuild the master client from `factory` after failures.
    pub fn with_master_factory(mut self, factory: Arc<dyn NodeFactory>) -> Self {
        self.master.factory = Some(factory);
        self
    }

    /// Enable replica reads, the replica client being built from `factory` on first use.
    pub fn with_replica_factory(mut self, factory: Arc<dyn NodeFactory>) -> Self {
        self.replica.factory = Some(factory);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_stickiness(mut self, stickiness: Arc<Stickiness>) -> Self {
        self.stickiness = stickiness;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stickiness(&self) -> &Arc<Stickiness> {
        &self.stickiness
    }

    /// Whether reads are currently pinned to the master.
    pub fn is_sticky(&self) -> bool {
        self.stickiness.is_engaged()
    }

    /// Let reads go to replicas again. Commands already running are unaffected.
    pub fn reset_stickiness(&self) {
        self.stickiness.reset();
    }

    pub fn transaction_depth(&self) -> usize {
        self.transaction_depth.load(Ordering::Acquire)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run one command, routed, retried and tracked for stickiness.
    pub async fn execute(&mut self, command: Command) -> Result<Value, Error> {
        let read_only = is_read_only(command.name());
        let command = &command;
        let result = self
            .dispatch(command.name(), read_only, move |client| async move {
                client.execute(command).await
            })
            .await;

        if is_flush(command.name()) {
            self.stickiness.reset();
        }
        result
    }

    /// Run one command and convert its reply.
    pub async fn query<R: FromValue>(&mut self, command: Command) -> Result<R, Error> {
        Ok(self.execute(command).await?.convert()?)
    }

    /// Send the commands queued by `body` in one round trip, on the master.
    ///
    /// The whole batch is retried as one unit.
    pub async fn pipeline<F>(&mut self, body: F) -> Result<Vec<Value>, Error>
    where
        F: FnOnce(&mut Batch) -> Result<(), Error>,
    {
        self.batch(BatchKind::Pipeline, body).await
    }

    /// Run the commands queued by `body` inside `MULTI`/`EXEC`, on the master.
    pub async fn transaction<F>(&mut self, body: F) -> Result<Vec<Value>, Error>
    where
        F: FnOnce(&mut Batch) -> Result<(), Error>,
    {
        self.batch(BatchKind::Transaction, body).await
    }

    async fn batch<F>(&self, kind: BatchKind, body: F) -> Result<Vec<Value>, Error>
    where
        F: FnOnce(&mut Batch) -> Result<(), Error>,
    {
        let _scope = TransactionScope::enter(&self.transaction_depth);

        let mut batch = Batch::default();
        body(&mut batch)?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let commands = batch.commands();
        self.dispatch(kind.as_str(), false, move |client| async move {
            match kind {
                BatchKind::Pipeline => client.pipeline(commands).await,
                BatchKind::Transaction => client.transaction(commands).await,
            }
        })
        .await
    }

    pub async fn get<R: FromValue>(&mut self, key: impl Into<Value>) -> Result<R, Error> {
        self.query(Command::new("GET").arg(key)).await
    }

    /// `SET`, with a millisecond expiration when `expire` is given.
    pub async fn set(
        &mut self,
        key: impl Into<Value>,
        value: impl Into<Value>,
        expire: Option<Duration>,
    ) -> Result<(), Error> {
        let mut command = Command::new("SET").arg(key).arg(value);
        if let Some(expire) = expire {
            let millis = i64::try_from(expire.as_millis()).unwrap_or(i64::MAX);
            command = command.arg("PX").arg(millis);
        }
        self.query(command).await
    }

    pub async fn del<I, K>(&mut self, keys: I) -> Result<i64, Error>
    where
        I: IntoIterator<Item = K>,
        K: Into<Value>,
    {
        self.query(Command::new("DEL").args(keys)).await
    }

    pub async fn exists<I, K>(&mut self, keys: I) -> Result<i64, Error>
    where
        I: IntoIterator<Item = K>,
        K: Into<Value>,
    {
        self.query(Command::new("EXISTS").args(keys)).await
    }

    pub async fn expire(&mut self, key: impl Into<Value>, seconds: i64) -> Result<bool, Error> {
        self.query(Command::new("EXPIRE").arg(key).arg(seconds)).await
    }

    pub async fn ttl(&mut self, key: impl Into<Value>) -> Result<i64, Error> {
        self.query(Command::new("TTL").arg(key)).await
    }

    pub async fn incr(&mut self, key: impl Into<Value>) -> Result<i64, Error> {
        self.query(Command::new("INCR").arg(key)).await
    }

    pub async fn hget<R: FromValue>(
        &mut self,
        key: impl Into<Value>,
        field: impl Into<Value>,
    ) -> Result<R, Error> {
        self.query(Command::new("HGET").arg(key).arg(field)).await
    }

    pub async fn hset(
        &mut self,
        key: impl Into<Value>,
        field: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Result<i64, Error> {
        self.query(Command::new("HSET").arg(key).arg(field).arg(value))
            .await
    }

    pub async fn hgetall<R: FromValue>(&mut self, key: impl Into<Value>) -> Result<R, Error> {
        self.query(Command::new("HGETALL").arg(key)).await
    }

    pub async fn lpush<I, V>(&mut self, key: impl Into<Value>, values: I) -> Result<i64, Error>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query(Command::new("LPUSH").arg(key).args(values)).await
    }

    pub async fn lrange<R: FromValue>(
        &mut self,
        key: impl Into<Value>,
        start: i64,
        stop: i64,
    ) -> Result<R, Error> {
        self.query(Command::new("LRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    pub async fn mget<R, I, K>(&mut self, keys: I) -> Result<R, Error>
    where
        R: FromValue,
        I: IntoIterator<Item = K>,
        K: Into<Value>,
    {
        self.query(Command::new("MGET").args(keys)).await
    }

    /// One `SCAN` step, replying with the next cursor and a page of keys.
    pub async fn scan<R: FromValue>(
        &mut self,
        cursor: impl Into<Value>,
        pattern: Option<&str>,
        count: Option<u32>,
    ) -> Result<R, Error> {
        let mut command = Command::new("SCAN").arg(cursor);
        if let Some(pattern) = pattern {
            command = command.arg("MATCH").arg(pattern);
        }
        if let Some(count) = count {
            command = command.arg("COUNT").arg(i64::from(count));
        }
        self.query(command).await
    }

    pub async fn ping(&mut self) -> Result<String, Error> {
        self.query(Command::new("PING")).await
    }

    pub async fn info(&mut self, section: Option<&str>) -> Result<String, Error> {
        let mut command = Command::new("INFO");
        if let Some(section) = section {
            command = command.arg(section);
        }
        self.query(command).await
    }

    /// `FLUSHDB`. Resets stickiness whatever the outcome.
    pub async fn flushdb(&mut self) -> Result<(), Error> {
        self.query(Command::new("FLUSHDB")).await
    }

    /// `FLUSHALL`. Resets stickiness whatever the outcome.
    pub async fn flushall(&mut self) -> Result<(), Error> {
        self.query(Command::new("FLUSHALL")).await
    }

    fn route(&self, read_only: bool) -> Target {
        if read_only
            && self.replica.factory.is_some()
            && self.transaction_depth() == 0
            && !self.stickiness.is_engaged()
        {
            Target::Replica
        } else {
            Target::Master
        }
    }

    fn slot(&self, target: Target) -> &Slot {
        match target {
            Target::Master => &self.master,
            Target::Replica => &self.replica,
        }
    }

    async fn dispatch<T, F, Fut>(&self, command: &str, read_only: bool, send: F) -> Result<T, Error>
    where
        F: Fn(Arc<dyn RedisClient>) -> Fut,
        Fut: Future<Output = Result<T, RedisError>>,
    {
        let routed = Mutex::new(Routed::default());
        let hooks = CommandHooks {
            connection: self,
            command,
            read_only,
            routed: &routed,
        };

        let routed = &routed;
        let send = &send;
        let result = self
            .retry
            .execute(
                move || async move {
                    let target = self.route(read_only);
                    *routed.lock() = Routed {
                        target,
                        client: None,
                    };
                    tracing::trace!(
                        component = COMPONENT,
                        connection = %self.name,
                        command,
                        target = target.as_str(),
                        "routing command"
                    );

                    let client = self.slot(target).resolve().await?;
                    routed.lock().client = Some(client.id().to_string());
                    Ok::<T, Error>(send(client).await?)
                },
                &hooks,
            )
            .await;

        if result.is_ok() && !read_only {
            self.stickiness.engage();
        }
        result
    }
}

#[derive(Debug)]
struct Routed {
    target: Target,
    client: Option<String>,
}

impl Default for Routed {
    fn default() -> Self {
        Self {
            target: Target::Master,
            client: None,
        }
    }
}

struct CommandHooks<'a> {
    connection: &'a RoutingConnection,
    command: &'a str,
    read_only: bool,
    routed: &'a Mutex<Routed>,
}

impl CommandHooks<'_> {
    fn routed(&self) -> (Target, String) {
        let routed = self.routed.lock();
        let client = routed
            .client
            .clone()
            .unwrap_or_else(|| routed.target.as_str().to_string());
        (routed.target, client)
    }
}

impl RetryHooks<Error> for CommandHooks<'_> {
    fn on_fail(&self, error: &Error, attempts: u32) {
        let (target, client) = self.routed();
        tracing::error!(
            component = COMPONENT,
            method = self.command,
            connection = %self.connection.name,
            client = %client,
            target = target.as_str(),
            read_only = self.read_only,
            reason = %error,
            attempts,
            "{} - fail",
            self.command
        );
        self.connection.events.emit(Event::ConnectionCommandFailed {
            connection: self.connection.name.clone(),
            client,
            command: self.command.to_string(),
            error: error.to_string(),
            attempts,
            read_only: self.read_only,
        });
        self.connection.slot(target).mark_stale();
    }

    fn on_reconnect(&self, attempts: u32) {
        let (_, client) = self.routed();
        tracing::info!(
            component = COMPONENT,
            method = self.command,
            connection = %self.connection.name,
            client = %client,
            attempts,
            "{} - reconnected",
            self.command
        );
        self.connection.events.emit(Event::ConnectionReconnected {
            connection: self.connection.name.clone(),
            client,
            command: self.command.to_string(),
            attempts,
        });
    }

    fn on_exhausted(&self, error: &Error, attempts: u32) {
        let (_, client) = self.routed();
        tracing::error!(
            component = COMPONENT,
            method = self.command,
            connection = %self.connection.name,
            client = %client,
            reason = %error,
            attempts,
            "{} - max fail",
            self.command
        );
        self.connection
            .events
            .emit(Event::ConnectionCommandMaxRetriesExhausted {
                connection: self.connection.name.clone(),
                client,
                command: self.command.to_string(),
                error: error.to_string(),
                attempts,
            });
    }
}
