use std::sync::Arc;

use pretty_assertions::assert_eq;
use redis_sentinel::Error;
use redis_sentinel::Event;
use redis_sentinel::ServiceAddress;
use redis_sentinel::test_harness::FakeSentinel;
use redis_sentinel::test_harness::replica;

use super::Deployment;

#[tokio::test(start_paused = true)]
async fn writes_follow_a_promoted_master() {
    let deployment = Deployment::new();
    let mut events = deployment.manager.subscribe();
    let mut connection = deployment.manager.connection("writer").await.unwrap();
    connection.set("k", "v", None).await.unwrap();

    deployment.sentinel.set_master("10.0.1.2", 6379);
    deployment
        .factory
        .node("10.0.1.1", 6379)
        .fail("Connection lost");
    connection.set("k", "w", None).await.unwrap();

    assert_eq!(deployment.commands_at("10.0.1.1", 6379), vec!["SET", "SET"]);
    assert_eq!(deployment.commands_at("10.0.1.2", 6379), vec!["SET"]);
    assert_eq!(deployment.factory.node("10.0.1.1", 6379).closed_clients(), 1);
    assert_eq!(deployment.factory.node("10.0.1.2", 6379).closed_clients(), 0);
    assert_eq!(deployment.sentinel.quits(), 2);
    assert_eq!(
        deployment.manager.address_cache().get("mymaster"),
        Some(ServiceAddress::new("10.0.1.2", 6379))
    );

    assert!(matches!(
        events.try_recv().unwrap(),
        Event::ConnectionCommandFailed { attempts: 0, .. }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        Event::ConnectionReconnected { attempts: 1, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn reads_follow_a_replacement_replica() {
    let deployment = Deployment::new();
    let mut connection = deployment.manager.connection("default").await.unwrap();
    let _: Option<String> = connection.get("x").await.unwrap();

    deployment
        .sentinel
        .set_replicas(vec![replica("10.0.2.2", 6379, "slave")]);
    deployment
        .factory
        .node("10.0.2.1", 6379)
        .fail("Connection lost");
    let _: Option<String> = connection.get("x").await.unwrap();

    assert_eq!(deployment.commands_at("10.0.2.1", 6379), vec!["GET", "GET"]);
    assert_eq!(deployment.commands_at("10.0.2.2", 6379), vec!["GET"]);
    assert!(deployment.commands_at("10.0.1.1", 6379).is_empty());
}

#[tokio::test(start_paused = true)]
async fn an_unreachable_master_surfaces_the_last_error() {
    let deployment = Deployment::new();
    let mut events = deployment.manager.subscribe();
    let mut connection = deployment.manager.connection("writer").await.unwrap();

    let master = deployment.factory.node("10.0.1.1", 6379);
    master.fail("Connection lost");
    master.refuse_connections(true);

    let error = connection.set("k", "v", None).await.unwrap_err();

    assert!(matches!(error, Error::Redis(_)));
    assert_eq!(error.to_string(), "Connection refused");
    assert_eq!(master.command_names(), vec!["SET"]);
    assert!(!connection.is_sticky());

    let mut failures = 0;
    let mut exhausted = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::ConnectionCommandFailed { .. } => failures += 1,
            Event::ConnectionCommandMaxRetriesExhausted { attempts, error, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(error, "Connection refused");
                exhausted += 1;
            }
            _ => {}
        }
    }
    assert_eq!(failures, 3);
    assert_eq!(exhausted, 1);
}

#[tokio::test(start_paused = true)]
async fn a_missing_master_is_retried_then_reported() {
    let deployment = Deployment::new();
    let mut events = deployment.manager.subscribe();
    let sentinel = Arc::new(FakeSentinel::new());
    deployment
        .factory
        .add_sentinel("10.0.0.1", 26379, sentinel.clone());

    let error = deployment.manager.connection("writer").await.err().unwrap();

    assert_eq!(error.to_string(), "No master found for service 'mymaster'.");
    assert_eq!(sentinel.master_requests(), 2);
    assert!(matches!(
        events.try_recv().unwrap(),
        Event::SentinelResolutionFailed { context: "locate_master", attempts: 0, .. }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        Event::SentinelResolutionFailed { attempts: 1, .. }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        Event::SentinelResolutionMaxRetriesExhausted { attempts: 1, .. }
    ));
}

#[tokio::test]
async fn unreachable_sentinels_are_a_configuration_error() {
    let deployment = Deployment::new();
    deployment.sentinel.set_unreachable(true);

    let error = deployment.manager.connection("default").await.err().unwrap();

    assert!(matches!(error, Error::Configuration { .. }));
    assert_eq!(error.to_string(), "No reachable Redis Sentinel host found.");
    assert_eq!(deployment.factory.sentinel_connects().len(), 2);
    assert!(deployment.factory.connects().is_empty());
}

#[tokio::test]
async fn malformed_sentinel_entries_are_skipped() {
    let deployment = Deployment::new();
    let mut connection = deployment.manager.connection("lenient").await.unwrap();
    connection.set("k", "v", None).await.unwrap();

    assert_eq!(deployment.commands_at("10.0.1.1", 6379), vec!["SET"]);
    assert_eq!(deployment.factory.sentinel_connects().len(), 1);
}
