//! Read stickiness and the hooks resetting it.
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

/// Set once a write went to the master, pinning later reads to it.
#[derive(Debug, Default)]
pub struct Stickiness {
    engaged: AtomicBool,
}

impl Stickiness {
    pub fn engage(&self) {
        self.engaged.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.engaged.store(false, Ordering::Release);
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }
}

/// Start of a new unit of work in the embedding application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum LifecycleEvent {
    /// A queued job is about to be processed.
    JobProcessing,
    /// A long-lived worker received a new request.
    RequestReceived,
}

/// Every live connection's stickiness flag, held weakly.
#[derive(Debug, Default)]
pub struct StickinessRegistry {
    flags: Mutex<Vec<Weak<Stickiness>>>,
}

impl StickinessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, stickiness: &Arc<Stickiness>) {
        let mut flags = self.flags.lock();
        flags.retain(|flag| flag.strong_count() > 0);
        flags.push(Arc::downgrade(stickiness));
    }

    /// Reset every live flag, forgetting the ones whose connection is gone.
    pub fn reset_all(&self) {
        self.flags.lock().retain(|flag| match flag.upgrade() {
            Some(stickiness) => {
                stickiness.reset();
                true
            }
            None => false,
        });
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        let mut flags = self.flags.lock();
        flags.retain(|flag| flag.strong_count() > 0);
        flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_all_reaches_every_live_connection() {
        let registry = StickinessRegistry::new();
        let first = Arc::new(Stickiness::default());
        let second = Arc::new(Stickiness::default());
        registry.register(&first);
        registry.register(&second);
        first.engage();
        second.engage();

        registry.reset_all();

        assert!(!first.is_engaged());
        assert!(!second.is_engaged());
    }

    #[test]
    fn dropped_connections_are_pruned() {
        let registry = StickinessRegistry::new();
        let kept = Arc::new(Stickiness::default());
        registry.register(&kept);
        registry.register(&Arc::new(Stickiness::default()));

        assert_eq!(registry.len(), 1);
        registry.reset_all();
        assert_eq!(registry.len(), 1);

        drop(kept);
        assert!(registry.is_empty());
    }

    #[test]
    fn reset_is_idempotent() {
        let stickiness = Stickiness::default();
        stickiness.reset();
        assert!(!stickiness.is_engaged());
        stickiness.engage();
        stickiness.engage();
        assert!(stickiness.is_engaged());
        stickiness.reset();
        stickiness.reset();
        assert!(!stickiness.is_engaged());
    }
}
