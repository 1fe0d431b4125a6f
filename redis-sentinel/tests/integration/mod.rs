use std::sync::Arc;

use redis_sentinel::SentinelManager;
use redis_sentinel::test_harness::FakeFactory;
use redis_sentinel::test_harness::FakeSentinel;

mod failover;
mod routing;
mod stickiness;

const CONFIG: &str = r#"
options:
  prefix: "app:"
retry:
  sentinel:
    attempts: 1
    delay: 10ms
  redis:
    attempts: 2
    delay: 10ms
connections:
  default:
    sentinel:
      service: mymaster
      sentinels:
        - host: 10.0.0.9
        - host: 10.0.0.1
    read_only_replicas: true
  writer:
    sentinel:
      service: mymaster
      host: 10.0.0.1
  lenient:
    sentinel:
      service: mymaster
      sentinels:
        - port: 26379
        - host: 10.0.0.1
          port: abc
        - host: 10.0.0.1
          port: "26379"
  cache:
    client: plain
    host: 10.0.9.9
    port: 6380
"#;

/// A manager wired to one Sentinel reporting a master and a single replica.
pub(crate) struct Deployment {
    pub(crate) manager: SentinelManager,
    pub(crate) factory: FakeFactory,
    pub(crate) sentinel: Arc<FakeSentinel>,
}

impl Deployment {
    pub(crate) fn new() -> Self {
        let factory = FakeFactory::new();
        let sentinel = Arc::new(
            FakeSentinel::new()
                .with_master("10.0.1.1", 6379)
                .with_replicas(&[("10.0.2.1", 6379)]),
        );
        factory.add_sentinel("10.0.0.1", 26379, sentinel.clone());

        let manager = SentinelManager::new(
            CONFIG.parse().expect("valid configuration"),
            Arc::new(factory.clone()),
        );
        Self {
            manager,
            factory,
            sentinel,
        }
    }

    pub(crate) fn commands_at(&self, ip: &str, port: u16) -> Vec<String> {
        self.factory.node(ip, port).command_names()
    }
}
