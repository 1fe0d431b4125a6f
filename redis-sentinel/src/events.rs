//! Failure and recovery notifications.
//!
//! Events are fire-and-forget: nothing in this crate waits on a subscriber,
//! and a slow subscriber only loses the oldest events.
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Event {
    /// A command failed with a retryable error.
    ConnectionCommandFailed {
        connection: String,
        client: String,
        command: String,
        error: String,
        attempts: u32,
        read_only: bool,
    },
    /// A command kept failing until its retry budget was spent.
    ConnectionCommandMaxRetriesExhausted {
        connection: String,
        client: String,
        command: String,
        error: String,
        attempts: u32,
    },
    /// A command succeeded after at least one failure.
    ConnectionReconnected {
        connection: String,
        client: String,
        command: String,
        attempts: u32,
    },
    /// A Sentinel lookup failed with a retryable error.
    SentinelResolutionFailed {
        service: String,
        error: String,
        context: &'static str,
        attempts: u32,
    },
    /// A Sentinel lookup kept failing until its retry budget was spent.
    SentinelResolutionMaxRetriesExhausted {
        service: String,
        error: String,
        context: &'static str,
        attempts: u32,
    },
    /// A Sentinel lookup succeeded after at least one failure.
    SentinelResolutionReconnected {
        service: String,
        context: &'static str,
        attempts: u32,
    },
}

/// Broadcasts [`Event`]s to any number of subscribers.
#[derive(Clone, Debug)]
pub struct EventSink {
    sender: broadcast::Sender<Event>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub(crate) fn emit(&self, event: Event) {
        // no subscriber is fine
        let _ = self.sender.send(event);
    }
}
