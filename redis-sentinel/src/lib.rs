//! Redis connections that follow a Sentinel-monitored master.
//!
//! A [`SentinelManager`] opens the connections named in a [`RedisConfig`].
//! Each one is a [`RoutingConnection`]: writes go to the current master,
//! reads optionally go to a healthy replica, and transient failures are
//! retried with exponential backoff after re-resolving the affected node
//! through Sentinel.
//!
//! Once a connection has written to the master, its reads stay there until
//! the stickiness is reset. Call [`SentinelManager::on_lifecycle`] at the
//! start of each unit of work, or wrap a tower service in
//! [`ResetStickinessLayer`].

pub mod address_cache;
pub mod client;
pub mod configuration;
pub mod connection;
pub mod connector;
pub mod error;
pub mod events;
pub mod layers;
mod manager;
pub mod retry;
pub mod sentinel;
pub mod test_harness;

pub use address_cache::AddressCache;
pub use address_cache::ServiceAddress;
pub use client::Command;
pub use client::Value;
pub use configuration::RedisConfig;
pub use connection::LifecycleEvent;
pub use connection::RoutingConnection;
pub use connector::SentinelConnector;
pub use error::Error;
pub use error::RedisError;
pub use events::Event;
pub use events::EventSink;
pub use layers::ResetStickinessLayer;
pub use manager::SentinelManager;
pub use retry::RetryPolicy;
pub use sentinel::SentinelLocator;
