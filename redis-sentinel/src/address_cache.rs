//! Process-wide cache of the node addresses resolved through Sentinel.
use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

/// Address of one Redis node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceAddress {
    pub ip: String,
    pub port: u16,
}

impl ServiceAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl<S: Into<String>> From<(S, u16)> for ServiceAddress {
    fn from((ip, port): (S, u16)) -> Self {
        Self::new(ip, port)
    }
}

impl From<&ServiceAddress> for ServiceAddress {
    fn from(address: &ServiceAddress) -> Self {
        address.clone()
    }
}

#[derive(Clone, Debug, Default)]
struct CachedNodes {
    master: Option<ServiceAddress>,
    replicas: Vec<ServiceAddress>,
}

/// Last known master and healthy replicas, per Sentinel service name.
///
/// One instance is shared by every connector of a process. Entries are
/// replaced wholesale, last writer wins.
#[derive(Debug, Default)]
pub struct AddressCache {
    nodes: Mutex<HashMap<String, CachedNodes>>,
}

impl AddressCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached master address for `service`.
    pub fn get(&self, service: &str) -> Option<ServiceAddress> {
        self.nodes
            .lock()
            .get(service)
            .and_then(|nodes| nodes.master.clone())
    }

    pub fn set(&self, service: &str, ip: impl Into<String>, port: u16) {
        self.nodes
            .lock()
            .entry(service.to_string())
            .or_default()
            .master = Some(ServiceAddress::new(ip, port));
    }

    /// Cached replica addresses for `service`, empty when none are known.
    pub fn replicas(&self, service: &str) -> Vec<ServiceAddress> {
        self.nodes
            .lock()
            .get(service)
            .map(|nodes| nodes.replicas.clone())
            .unwrap_or_default()
    }

    /// Replace the replica list of `service`.
    ///
    /// Accepts anything convertible to a [`ServiceAddress`], such as
    /// `(ip, port)` pairs or addresses parsed from Sentinel replica maps.
    pub fn set_replicas<I, A>(&self, service: &str, replicas: I)
    where
        I: IntoIterator<Item = A>,
        A: Into<ServiceAddress>,
    {
        let replicas = replicas.into_iter().map(Into::into).collect();
        self.nodes
            .lock()
            .entry(service.to_string())
            .or_default()
            .replicas = replicas;
    }

    /// Drop both the master and the replicas of `service`.
    pub fn forget(&self, service: &str) {
        self.nodes.lock().remove(service);
    }

    pub fn flush(&self) {
        self.nodes.lock().clear();
    }
}
