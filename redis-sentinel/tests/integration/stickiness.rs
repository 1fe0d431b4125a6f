use std::convert::Infallible;

use pretty_assertions::assert_eq;
use redis_sentinel::LifecycleEvent;
use redis_sentinel::ResetStickinessLayer;
use tower::Layer;
use tower::ServiceExt;

use super::Deployment;

#[tokio::test]
async fn a_new_job_sends_reads_back_to_the_replica() {
    let deployment = Deployment::new();
    let mut connection = deployment.manager.connection("default").await.unwrap();

    connection.set("x", "y", None).await.unwrap();
    let _: Option<String> = connection.get("x").await.unwrap();
    deployment.manager.on_lifecycle(LifecycleEvent::JobProcessing);
    let _: Option<String> = connection.get("x").await.unwrap();

    assert_eq!(deployment.commands_at("10.0.1.1", 6379), vec!["SET", "GET"]);
    assert_eq!(deployment.commands_at("10.0.2.1", 6379), vec!["GET"]);
}

#[tokio::test]
async fn flushing_releases_the_connection() {
    let deployment = Deployment::new();
    let mut connection = deployment.manager.connection("default").await.unwrap();

    connection.set("x", "y", None).await.unwrap();
    connection.flushdb().await.unwrap();
    let _: Option<String> = connection.get("x").await.unwrap();

    assert_eq!(
        deployment.commands_at("10.0.1.1", 6379),
        vec!["SET", "FLUSHDB"]
    );
    assert_eq!(deployment.commands_at("10.0.2.1", 6379), vec!["GET"]);
}

#[tokio::test]
async fn stickiness_is_per_connection() {
    let deployment = Deployment::new();
    let mut writer = deployment.manager.connection("default").await.unwrap();
    let mut reader = deployment.manager.connection("default").await.unwrap();

    writer.set("x", "y", None).await.unwrap();
    let _: Option<String> = reader.get("x").await.unwrap();

    assert!(writer.is_sticky());
    assert!(!reader.is_sticky());
    assert_eq!(deployment.commands_at("10.0.2.1", 6379), vec!["GET"]);
}

#[tokio::test]
async fn inbound_requests_reset_every_connection() {
    let deployment = Deployment::new();
    let mut connection = deployment.manager.connection("default").await.unwrap();
    connection.set("x", "y", None).await.unwrap();
    assert!(connection.is_sticky());

    let stickiness = connection.stickiness().clone();
    let service = ResetStickinessLayer::new(deployment.manager.registry().clone()).layer(
        tower::service_fn(move |_request: ()| {
            let sticky = stickiness.is_engaged();
            async move { Ok::<_, Infallible>(sticky) }
        }),
    );

    let sticky = service.oneshot(()).await.unwrap();
    assert!(!sticky);
    assert!(!connection.is_sticky());
}
