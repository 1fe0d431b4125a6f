//! In-memory stand-ins for Redis and Sentinel nodes.
//!
//! [`FakeFactory`] opens [`FakeClient`]s against [`FakeNode`]s, one node per
//! address, and hands out whatever Sentinels were registered with it.
//! Everything that goes through it is recorded so tests can assert on
//! routing and failover.
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::address_cache::ServiceAddress;
use crate::client::ClientFactory;
use crate::client::Command;
use crate::client::NodeOptions;
use crate::client::RedisClient;
use crate::client::ReplicaEntry;
use crate::client::SentinelNode;
use crate::client::SentinelOptions;
use crate::client::Value;
use crate::connection::NodeFactory;
use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::RedisError;

fn refused() -> RedisError {
    RedisError::new(ErrorKind::IO, "Connection refused")
}

/// A data node: records commands and answers with scripted replies.
#[derive(Debug)]
pub struct FakeNode {
    address: ServiceAddress,
    commands: Mutex<Vec<Command>>,
    replies: Mutex<VecDeque<Result<Value, RedisError>>>,
    refusing: AtomicBool,
    closed: AtomicUsize,
}

impl FakeNode {
    fn new(address: ServiceAddress) -> Self {
        Self {
            address,
            commands: Mutex::default(),
            replies: Mutex::default(),
            refusing: AtomicBool::new(false),
            closed: AtomicUsize::new(0),
        }
    }

    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    /// Answer the next command with `value`.
    pub fn reply(&self, value: impl Into<Value>) -> &Self {
        self.replies.lock().push_back(Ok(value.into()));
        self
    }

    /// Fail the next command with an I/O error carrying `message`.
    pub fn fail(&self, message: &str) -> &Self {
        self.replies
            .lock()
            .push_back(Err(RedisError::new(ErrorKind::IO, message)));
        self
    }

    pub fn fail_times(&self, times: usize, message: &str) -> &Self {
        for _ in 0..times {
            self.fail(message);
        }
        self
    }

    /// Make new connections to this node fail.
    pub fn refuse_connections(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Upper-cased names of the commands received so far.
    pub fn command_names(&self) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .map(|command| command.name().to_ascii_uppercase())
            .collect()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().clone()
    }

    /// Clients of this node closed so far.
    pub fn closed_clients(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn respond(&self, command: &Command) -> Result<Value, RedisError> {
        self.commands.lock().push(command.clone());
        match self.replies.lock().pop_front() {
            Some(reply) => reply,
            None => Ok(default_reply(command)),
        }
    }
}

fn default_reply(command: &Command) -> Value {
    match command.name().to_ascii_uppercase().as_str() {
        "PING" => Value::from("PONG"),
        "SET" | "FLUSHDB" | "FLUSHALL" => Value::from("OK"),
        _ => Value::Null,
    }
}

/// A client bound to one [`FakeNode`].
#[derive(Debug)]
pub struct FakeClient {
    id: String,
    node: Arc<FakeNode>,
    closed: AtomicBool,
}

impl FakeClient {
    pub fn node(&self) -> &Arc<FakeNode> {
        &self.node
    }
}

#[async_trait]
impl RedisClient for FakeClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, command: &Command) -> Result<Value, RedisError> {
        self.node.respond(command)
    }

    async fn pipeline(&self, commands: &[Command]) -> Result<Vec<Value>, RedisError> {
        commands
            .iter()
            .map(|command| self.node.respond(command))
            .collect()
    }

    async fn transaction(&self, commands: &[Command]) -> Result<Vec<Value>, RedisError> {
        self.pipeline(commands).await
    }

    async fn quit(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.node.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A Sentinel node reporting a configurable topology for every service.
#[derive(Debug, Default)]
pub struct FakeSentinel {
    unreachable: AtomicBool,
    master: Mutex<Option<ServiceAddress>>,
    replicas: Mutex<Option<Vec<ReplicaEntry>>>,
    master_requests: AtomicUsize,
    replica_requests: AtomicUsize,
    quits: AtomicUsize,
}

impl FakeSentinel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_master(self, ip: &str, port: u16) -> Self {
        self.set_master(ip, port);
        self
    }

    /// Report one healthy replica per address.
    pub fn with_replicas(self, replicas: &[(&str, u16)]) -> Self {
        self.set_replicas(
            replicas
                .iter()
                .map(|(ip, port)| replica(ip, *port, "slave"))
                .collect(),
        );
        self
    }

    pub fn set_master(&self, ip: &str, port: u16) {
        *self.master.lock() = Some(ServiceAddress::new(ip, port));
    }

    pub fn set_replicas(&self, replicas: Vec<ReplicaEntry>) {
        *self.replicas.lock() = Some(replicas);
    }

    /// Make `PING` fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn master_requests(&self) -> usize {
        self.master_requests.load(Ordering::SeqCst)
    }

    pub fn replica_requests(&self) -> usize {
        self.replica_requests.load(Ordering::SeqCst)
    }

    /// Times a client of this Sentinel was closed.
    pub fn quits(&self) -> usize {
        self.quits.load(Ordering::SeqCst)
    }
}

/// A `SENTINEL REPLICAS` entry.
pub fn replica(ip: &str, port: u16, flags: &str) -> ReplicaEntry {
    ReplicaEntry::new([
        ("ip", ip.to_string()),
        ("port", port.to_string()),
        ("flags", flags.to_string()),
    ])
}

#[async_trait]
impl SentinelNode for FakeSentinel {
    async fn ping(&self) -> Result<bool, RedisError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(RedisError::new(ErrorKind::IO, "Connection lost"))
        } else {
            Ok(true)
        }
    }

    async fn master_addr(&self, _service: &str) -> Result<Option<ServiceAddress>, RedisError> {
        self.master_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.master.lock().clone())
    }

    async fn replicas(&self, _service: &str) -> Result<Option<Vec<ReplicaEntry>>, RedisError> {
        self.replica_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.replicas.lock().clone())
    }

    async fn quit(&self) {
        self.quits.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FactoryState {
    nodes: HashMap<ServiceAddress, Arc<FakeNode>>,
    sentinels: HashMap<ServiceAddress, Arc<dyn SentinelNode>>,
    connects: Vec<NodeOptions>,
    sentinel_connects: Vec<SentinelOptions>,
    opened: usize,
}

/// A [`ClientFactory`] wired to in-memory nodes. Clones share their state.
#[derive(Clone, Default)]
pub struct FakeFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `sentinel` at `host:port`. Other Sentinel addresses refuse connections.
    pub fn add_sentinel<S>(&self, host: &str, port: u16, sentinel: Arc<S>)
    where
        S: SentinelNode + 'static,
    {
        self.state
            .lock()
            .sentinels
            .insert(ServiceAddress::new(host, port), sentinel);
    }

    /// The data node at `host:port`, created on first use.
    pub fn node(&self, host: &str, port: u16) -> Arc<FakeNode> {
        let address = ServiceAddress::new(host, port);
        self.state
            .lock()
            .nodes
            .entry(address.clone())
            .or_insert_with(|| Arc::new(FakeNode::new(address)))
            .clone()
    }

    /// Options of every data node connection opened, in order.
    pub fn connects(&self) -> Vec<NodeOptions> {
        self.state.lock().connects.clone()
    }

    /// Options of every Sentinel connection attempted, in order.
    pub fn sentinel_connects(&self) -> Vec<SentinelOptions> {
        self.state.lock().sentinel_connects.clone()
    }

    fn open(&self, address: ServiceAddress) -> Result<Arc<dyn RedisClient>, RedisError> {
        let node = self.node(&address.ip, address.port);
        if node.refusing.load(Ordering::SeqCst) {
            return Err(refused());
        }
        let opened = {
            let mut state = self.state.lock();
            state.opened += 1;
            state.opened
        };
        Ok(Arc::new(FakeClient {
            id: format!("{address}#{opened}"),
            node,
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl ClientFactory for FakeFactory {
    async fn connect(&self, options: &NodeOptions) -> Result<Arc<dyn RedisClient>, RedisError> {
        self.state.lock().connects.push(options.clone());
        self.open(options.address())
    }

    async fn connect_sentinel(
        &self,
        options: &SentinelOptions,
    ) -> Result<Arc<dyn SentinelNode>, RedisError> {
        let mut state = self.state.lock();
        state.sentinel_connects.push(options.clone());
        state
            .sentinels
            .get(&ServiceAddress::new(options.host.clone(), options.port))
            .cloned()
            .ok_or_else(refused)
    }
}

/// A [`NodeFactory`] opening clients against a list of addresses.
///
/// Each build moves to the next address, staying on the last one once the
/// list is exhausted. Builds and their `refresh` flag are recorded.
pub struct FakeNodeFactory {
    factory: FakeFactory,
    addresses: Vec<ServiceAddress>,
    builds: Mutex<Vec<bool>>,
}

impl FakeNodeFactory {
    pub fn new(factory: &FakeFactory, addresses: &[(&str, u16)]) -> Self {
        Self {
            factory: factory.clone(),
            addresses: addresses
                .iter()
                .map(|(ip, port)| ServiceAddress::new(*ip, *port))
                .collect(),
            builds: Mutex::default(),
        }
    }

    /// The `refresh` flag of every build so far.
    pub fn builds(&self) -> Vec<bool> {
        self.builds.lock().clone()
    }
}

#[async_trait]
impl NodeFactory for FakeNodeFactory {
    async fn build(&self, refresh: bool) -> Result<Arc<dyn RedisClient>, Error> {
        let index = {
            let mut builds = self.builds.lock();
            builds.push(refresh);
            builds.len() - 1
        };
        let address = self
            .addresses
            .get(index)
            .or_else(|| self.addresses.last())
            .cloned()
            .ok_or_else(|| Error::configuration("no address to connect to"))?;
        Ok(self.factory.open(address)?)
    }
}
