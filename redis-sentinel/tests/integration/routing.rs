use pretty_assertions::assert_eq;
use redis_sentinel::Command;
use redis_sentinel::Error;
use redis_sentinel::ServiceAddress;
use redis_sentinel::client::ReplicaEntry;
use redis_sentinel::test_harness::replica;

use super::Deployment;

#[tokio::test]
async fn reads_follow_the_replica_until_the_first_write() {
    let deployment = Deployment::new();
    let mut connection = deployment.manager.connection("default").await.unwrap();

    let _: Option<String> = connection.get("x").await.unwrap();
    connection.set("x", "y", None).await.unwrap();
    let _: Option<String> = connection.get("x").await.unwrap();

    assert_eq!(deployment.commands_at("10.0.2.1", 6379), vec!["GET"]);
    assert_eq!(deployment.commands_at("10.0.1.1", 6379), vec!["SET", "GET"]);
}

#[tokio::test]
async fn read_only_commands_stay_off_the_master_while_unpinned() {
    let deployment = Deployment::new();
    let mut connection = deployment.manager.connection("default").await.unwrap();

    for name in ["get", "HGETALL", "Exists", "zrange", "ttl", "info"] {
        connection.execute(Command::new(name).arg("k")).await.unwrap();
    }

    assert!(deployment.commands_at("10.0.1.1", 6379).is_empty());
    assert_eq!(deployment.commands_at("10.0.2.1", 6379).len(), 6);
    assert!(!connection.is_sticky());
}

#[tokio::test]
async fn batches_go_to_the_master_and_restore_the_depth() {
    let deployment = Deployment::new();
    let mut connection = deployment.manager.connection("default").await.unwrap();

    let replies = connection
        .transaction(|batch| {
            batch
                .add(Command::new("GET").arg("a"))
                .add(Command::new("SET").arg("a").arg("1"));
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(replies.len(), 2);
    assert_eq!(connection.transaction_depth(), 0);
    assert_eq!(deployment.commands_at("10.0.1.1", 6379), vec!["GET", "SET"]);
    assert!(deployment.commands_at("10.0.2.1", 6379).is_empty());
}

#[tokio::test]
async fn unhealthy_replicas_send_reads_to_the_master() {
    let deployment = Deployment::new();
    deployment.sentinel.set_replicas(vec![
        replica("10.0.2.1", 6379, "slave,s_down"),
        replica("10.0.2.2", 6379, "slave,o_down"),
        replica("10.0.2.3", 6379, "slave,disconnected"),
    ]);
    let mut connection = deployment.manager.connection("default").await.unwrap();

    let _: Option<String> = connection.get("x").await.unwrap();

    assert_eq!(deployment.commands_at("10.0.1.1", 6379), vec!["GET"]);
    assert!(
        deployment
            .manager
            .address_cache()
            .replicas("mymaster")
            .is_empty()
    );
}

#[tokio::test]
async fn healthy_replicas_are_cached_without_the_unhealthy_ones() {
    let deployment = Deployment::new();
    deployment.sentinel.set_replicas(vec![
        replica("10.0.2.1", 6379, "slave,s_down"),
        replica("10.0.2.2", 6379, "slave"),
        ReplicaEntry::new([("ip", "10.0.2.4"), ("flags", "slave")]),
    ]);
    let mut connection = deployment.manager.connection("default").await.unwrap();

    let _: Option<String> = connection.get("x").await.unwrap();

    assert_eq!(deployment.commands_at("10.0.2.2", 6379), vec!["GET"]);
    assert_eq!(
        deployment.manager.address_cache().replicas("mymaster"),
        vec![ServiceAddress::new("10.0.2.2", 6379)]
    );
}

#[tokio::test]
async fn plain_connections_skip_sentinel() {
    let deployment = Deployment::new();
    let mut connection = deployment.manager.connection("cache").await.unwrap();

    connection.set("k", "v", None).await.unwrap();

    assert_eq!(deployment.commands_at("10.0.9.9", 6380), vec!["SET"]);
    assert!(deployment.factory.sentinel_connects().is_empty());
    assert_eq!(deployment.sentinel.master_requests(), 0);
}

#[tokio::test]
async fn data_nodes_receive_the_connection_options() {
    let deployment = Deployment::new();
    deployment.manager.connection("writer").await.unwrap();

    let connects = deployment.factory.connects();
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].address(), ServiceAddress::new("10.0.1.1", 6379));
    assert_eq!(connects[0].prefix.as_deref(), Some("app:"));
}

#[tokio::test]
async fn cluster_connections_are_not_implemented() {
    let deployment = Deployment::new();
    let config = &deployment.manager.config().connections["default"];

    let error = deployment
        .manager
        .connector()
        .connect_to_cluster("default", config)
        .await
        .err()
        .unwrap();

    assert!(matches!(error, Error::NotImplemented(_)));
}
