use std::time::Duration;

use pretty_assertions::assert_eq;

use super::*;

const FULL: &str = r#"
options:
  prefix: "global:"
retry:
  sentinel:
    attempts: 3
    delay: 250ms
  redis:
    attempts: 4
    delay: 100ms
    messages: ["connection lost"]
connections:
  default:
    sentinel:
      service: mymaster
      sentinels:
        - host: 10.0.0.1
          port: 26379
        - host: 10.0.0.2
      password: sentinel-secret
      timeout: 1s
      database: 3
    password: node-secret
    read_timeout: 2s
    read_only_replicas: true
  cache:
    client: plain
    host: redis.internal
    port: 6380
    prefix: "cache:"
    retry:
      redis:
        attempts: 1
"#;

fn parse(yaml: &str) -> RedisConfig {
    yaml.parse().expect("valid configuration")
}

#[test]
fn parses_a_full_configuration() {
    let config = parse(FULL);
    assert_eq!(config.connections.len(), 2);

    let default = &config.connections["default"];
    assert!(default.uses_sentinel());
    assert!(default.read_only_replicas);
    assert_eq!(default.service(), Some("mymaster"));
    assert_eq!(
        default.sentinel_endpoints(),
        vec![
            SentinelEndpoint::new("10.0.0.1", Some(26379)),
            SentinelEndpoint::new("10.0.0.2", None),
        ]
    );

    let cache = &config.connections["cache"];
    assert!(!cache.uses_sentinel());
    assert_eq!(cache.client, ClientKind::Plain);
}

#[test]
fn unknown_fields_are_rejected() {
    let result = "connections:\n  default:\n    sentinal: {}\n".parse::<RedisConfig>();
    assert!(result.is_err());
}

#[test]
fn data_nodes_prefer_top_level_settings() {
    let config = parse(FULL);
    let default = &config.connections["default"];

    let options = default.node_options(&ServiceAddress::new("10.0.0.9", 6379), &config.options);
    assert_eq!(
        options,
        NodeOptions {
            host: "10.0.0.9".to_string(),
            port: 6379,
            password: Some("node-secret".to_string()),
            timeout: Duration::from_secs(1),
            read_timeout: Some(Duration::from_secs(2)),
            retry_interval: Duration::ZERO,
            persistent: false,
            database: 3,
            prefix: Some("global:".to_string()),
        }
    );
}

#[test]
fn sentinel_nodes_prefer_sentinel_settings() {
    let config = parse(FULL);
    let options = config.connections["default"].sentinel_options("10.0.0.1".to_string(), 26379);
    assert_eq!(
        options,
        SentinelOptions {
            host: "10.0.0.1".to_string(),
            port: 26379,
            auth: Some("sentinel-secret".to_string()),
            connect_timeout: Duration::from_secs(1),
            read_timeout: Some(Duration::from_secs(2)),
            retry_interval: Duration::ZERO,
            persistent: false,
        }
    );
}

#[test]
fn defaults_apply_when_nothing_is_set() {
    let config = parse("connections:\n  default:\n    sentinel:\n      service: mymaster\n");
    let default = &config.connections["default"];

    let options = default.sentinel_options("127.0.0.1".to_string(), 26379);
    assert_eq!(options.connect_timeout, Duration::from_millis(200));
    assert_eq!(options.read_timeout, None);
    assert_eq!(options.auth, None);

    let options = default.node_options(
        &ServiceAddress::new("127.0.0.1", 6379),
        &ClientOptions::default(),
    );
    assert_eq!(options.database, 0);
    assert_eq!(options.prefix, None);
    assert!(!options.persistent);
}

#[test]
fn zero_read_timeout_and_empty_password_mean_none() {
    let config = parse(
        "connections:\n  default:\n    sentinel:\n      service: s\n    read_timeout: 0s\n    password: \"\"\n",
    );
    let options = config.connections["default"]
        .node_options(&ServiceAddress::new("127.0.0.1", 6379), &ClientOptions::default());
    assert_eq!(options.read_timeout, None);
    assert_eq!(options.password, None);
}

#[test]
fn legacy_host_and_port_build_a_single_endpoint() {
    let config = parse(
        "connections:\n  a:\n    sentinel:\n      service: s\n      host: 10.0.0.5\n  b:\n    sentinel:\n      service: s\n    host: 10.0.0.6\n    port: 26380\n",
    );
    assert_eq!(
        config.connections["a"].sentinel_endpoints(),
        vec![SentinelEndpoint::new("10.0.0.5", Some(26379))]
    );
    assert_eq!(
        config.connections["b"].sentinel_endpoints(),
        vec![SentinelEndpoint::new("10.0.0.6", Some(26380))]
    );
}

#[test]
fn top_level_sentinels_win_over_nested_ones() {
    let config = parse(
        "connections:\n  a:\n    sentinels: [{host: 10.0.0.1}]\n    sentinel:\n      service: s\n      sentinels: [{host: 10.0.0.2}]\n",
    );
    assert_eq!(
        config.connections["a"].sentinel_endpoints(),
        vec![SentinelEndpoint::new("10.0.0.1", None)]
    );
}

#[test]
fn malformed_sentinel_entries_still_parse() {
    let config = parse(
        r#"
connections:
  default:
    sentinel:
      service: mymaster
      sentinels:
        - port: 26379
        - host: 10.0.0.1
          port: abc
        - host: 10.0.0.2
          port: "26380"
        - host: 10.0.0.3
"#,
    );
    let endpoints = config.connections["default"].sentinel_endpoints();

    assert_eq!(endpoints.len(), 4);
    assert_eq!(endpoints[0].host, None);
    assert_eq!(endpoints[1].port, Some(EndpointPort::Text("abc".to_string())));
    assert_eq!(endpoints[1].port.as_ref().and_then(EndpointPort::as_i64), None);
    assert_eq!(endpoints[2].port.as_ref().and_then(EndpointPort::as_i64), Some(26380));
    assert_eq!(endpoints[3], SentinelEndpoint::new("10.0.0.3", None));
}

#[test]
fn service_may_be_given_at_the_top_level() {
    let config = parse("connections:\n  a:\n    sentinel: {}\n    service: other\n  b:\n    sentinel:\n      service: \"  \"\n");
    assert_eq!(config.connections["a"].service(), Some("other"));
    assert_eq!(config.connections["b"].service(), None);
}

#[test]
fn connection_prefix_overrides_global_options() {
    let config = parse(FULL);
    let cache = &config.connections["cache"];

    assert_eq!(
        cache.merged_options(&config.options).prefix.as_deref(),
        Some("cache:")
    );

    let options = cache.plain_node_options(&config.options);
    assert_eq!(options.host, "redis.internal");
    assert_eq!(options.port, 6380);
    assert_eq!(options.prefix.as_deref(), Some("cache:"));
}

#[test]
fn plain_connections_default_to_localhost() {
    let config = parse("connections:\n  a:\n    client: plain\n");
    let options = config.connections["a"].plain_node_options(&ClientOptions::default());
    assert_eq!(options.address(), ServiceAddress::new("127.0.0.1", 6379));
}

#[test]
fn retry_policies_resolve_defaults_and_overrides() {
    let config = parse(FULL);

    let sentinel = config.retry.sentinel_policy();
    assert_eq!(sentinel.limit(), 3);
    assert_eq!(sentinel.delay(), Duration::from_millis(250));
    assert!(sentinel.is_retryable("No master found for service 'mymaster'."));

    let redis = config
        .retry
        .redis_policy(config.connections["cache"].retry_override());
    assert_eq!(redis.limit(), 1);
    assert_eq!(redis.delay(), Duration::from_millis(100));
    assert_eq!(redis.messages(), ["connection lost".to_string()]);

    let defaults = RetryConfig::default().redis_policy(None);
    assert_eq!(defaults.limit(), 5);
    assert_eq!(defaults.delay(), Duration::from_secs(1));
    assert!(defaults.is_retryable("READONLY You can't write against a read only replica."));
    assert!(defaults.is_retryable("Connection refused"));
    assert!(!defaults.is_retryable("WRONGTYPE Operation against a key"));
}

#[test]
fn schema_generation() {
    let schema = serde_json::to_value(generate_config_schema()).expect("schema serializes");
    let properties = &schema["properties"];
    assert!(properties.get("connections").is_some());
    assert!(properties.get("retry").is_some());
}
