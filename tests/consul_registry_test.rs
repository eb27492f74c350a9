//! Consul 注册中心门面测试（内存 agent）

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockConsulApi, grpc_instance, wait_until};
use flare_discovery::error::ErrorCode;
use flare_discovery::registry::consul::{Client, ClientOptions, ConsulRegistry, RegistryOptions};
use flare_discovery::registry::{Discovery, Registrar};

const WAIT: Duration = Duration::from_secs(5);

fn fast_registry(api: Arc<MockConsulApi>) -> ConsulRegistry {
    let client = Client::with_options(
        api,
        ClientOptions::default().with_wait_time(Duration::from_millis(200)),
    );
    ConsulRegistry::with_options(
        client,
        true,
        RegistryOptions {
            poll_interval: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(10),
            resolve_timeout: Duration::from_secs(1),
            query_timeout: Duration::from_secs(2),
            passing_only: true,
        },
    )
}

#[tokio::test]
async fn get_service_without_any_instance_is_not_found() {
    let registry = fast_registry(MockConsulApi::new());
    let err = registry.get_service("missing-srv").await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ServiceNotFound));
}

#[tokio::test]
async fn get_service_falls_back_to_remote_query() {
    let api = MockConsulApi::new();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-1", "10.0.0.1:9000")]);
    let registry = fast_registry(api.clone());

    let services = registry.get_service("user-srv").await.unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(api.queries.lock()[0].wait_index, 0);
}

#[tokio::test]
async fn get_service_prefers_cached_snapshot() {
    let api = MockConsulApi::new();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-1", "10.0.0.1:9000")]);
    let registry = fast_registry(api.clone());
    let _watcher = registry.watch("user-srv").await.unwrap();

    let queries_before = api.query_count();
    let services = registry.get_service("user-srv").await.unwrap();
    assert_eq!(services[0].id, "u-1");
    // 缓存命中时不会发出 wait_index = 0 的查询
    assert!(
        api.queries.lock()[queries_before..]
            .iter()
            .all(|q| q.wait_index != 0)
    );
}

#[tokio::test]
async fn watch_returns_initial_snapshot_immediately() {
    let api = MockConsulApi::new();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-1", "10.0.0.1:9000")]);
    let registry = fast_registry(api);

    let watcher = registry.watch("user-srv").await.unwrap();
    let services = tokio::time::timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(services[0].id, "u-1");
}

#[tokio::test]
async fn refresh_loop_broadcasts_membership_changes() {
    let api = MockConsulApi::new();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-1", "10.0.0.1:9000")]);
    let registry = fast_registry(api.clone());

    let watcher = registry.watch("user-srv").await.unwrap();
    watcher.next().await.unwrap();

    api.set_service(
        "user-srv",
        &[
            grpc_instance("user-srv", "u-1", "10.0.0.1:9000"),
            grpc_instance("user-srv", "u-2", "10.0.0.2:9000"),
        ],
    );

    let services = tokio::time::timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(services.len(), 2);
}

#[tokio::test]
async fn second_watch_shares_the_service_set() {
    let api = MockConsulApi::new();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-1", "10.0.0.1:9000")]);
    let registry = fast_registry(api.clone());

    let first = registry.watch("user-srv").await.unwrap();
    let initial_queries = api
        .queries
        .lock()
        .iter()
        .filter(|q| q.wait_index == 0)
        .count();
    let second = registry.watch("user-srv").await.unwrap();

    // 第二次监听不再同步解析
    let after = api
        .queries
        .lock()
        .iter()
        .filter(|q| q.wait_index == 0)
        .count();
    assert_eq!(initial_queries, after);
    assert_eq!(registry.service_set("user-srv").await.unwrap().watcher_count(), 2);

    assert_eq!(first.next().await.unwrap().len(), 1);
    assert_eq!(second.next().await.unwrap().len(), 1);
}

#[tokio::test]
async fn refresh_errors_keep_the_last_index() {
    let api = MockConsulApi::new();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-1", "10.0.0.1:9000")]);
    let registry = fast_registry(api.clone());

    let watcher = registry.watch("user-srv").await.unwrap();
    watcher.next().await.unwrap();
    let index = api.index();

    api.fail_next_queries(3);
    let before = api.query_count();
    assert!(wait_until(WAIT, || api.query_count() >= before + 4).await);

    let queries = api.queries.lock().clone();
    assert_eq!(queries[0].wait_index, 0);
    assert!(queries[1..].iter().all(|q| q.wait_index == index));

    // 恢复后仍能观察到变化
    api.set_service(
        "user-srv",
        &[grpc_instance("user-srv", "u-9", "10.0.0.9:9000")],
    );
    let services = tokio::time::timeout(WAIT, watcher.next()).await.unwrap().unwrap();
    assert_eq!(services[0].id, "u-9");
}

#[tokio::test]
async fn empty_refresh_result_keeps_last_snapshot() {
    let api = MockConsulApi::new();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-1", "10.0.0.1:9000")]);
    let registry = fast_registry(api.clone());

    let watcher = registry.watch("user-srv").await.unwrap();
    watcher.next().await.unwrap();

    let before = api.query_count();
    api.set_service("user-srv", &[]);
    assert!(wait_until(WAIT, || api.query_count() >= before + 2).await);

    assert!(
        tokio::time::timeout(Duration::from_millis(100), watcher.next())
            .await
            .is_err()
    );
    let cached = registry.get_service("user-srv").await.unwrap();
    assert_eq!(cached[0].id, "u-1");
}

#[tokio::test]
async fn failed_initial_resolve_is_retried_by_next_watch() {
    let api = MockConsulApi::new();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-1", "10.0.0.1:9000")]);
    let registry = fast_registry(api.clone());

    api.fail_next_queries(1);
    let err = match registry.watch("user-srv").await {
        Ok(_) => panic!("initial resolve should fail"),
        Err(e) => e,
    };
    assert_eq!(err.code(), Some(ErrorCode::RegistryUnavailable));
    assert!(registry.service_set("user-srv").await.is_none());

    let watcher = registry.watch("user-srv").await.unwrap();
    assert_eq!(watcher.next().await.unwrap().len(), 1);
}

#[tokio::test]
async fn refresh_loop_keeps_running_after_watchers_stop() {
    let api = MockConsulApi::new();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-1", "10.0.0.1:9000")]);
    let registry = fast_registry(api.clone());

    let watcher = registry.watch("user-srv").await.unwrap();
    watcher.stop().unwrap();
    drop(watcher);
    assert_eq!(registry.service_set("user-srv").await.unwrap().watcher_count(), 0);

    api.set_service(
        "user-srv",
        &[grpc_instance("user-srv", "u-2", "10.0.0.2:9000")],
    );
    let set = registry.service_set("user-srv").await.unwrap();
    assert!(wait_until(WAIT, || set.snapshot().first().map(|s| s.id.as_str()) == Some("u-2")).await);
}

#[tokio::test]
async fn close_stops_refresh_loops_and_watchers() {
    let api = MockConsulApi::new();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-1", "10.0.0.1:9000")]);
    let registry = fast_registry(api.clone());

    let watcher = registry.watch("user-srv").await.unwrap();
    watcher.next().await.unwrap();

    registry.close();
    assert!(watcher.next().await.unwrap_err().is_cancelled());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = api.query_count();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-2", "10.0.0.2:9000")]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(api.query_count(), settled);

    assert!(registry.watch("user-srv").await.is_err());
}

#[tokio::test]
async fn list_services_returns_non_empty_snapshots() {
    let api = MockConsulApi::new();
    api.set_service("user-srv", &[grpc_instance("user-srv", "u-1", "10.0.0.1:9000")]);
    let registry = fast_registry(api.clone());

    let _user = registry.watch("user-srv").await.unwrap();
    let _empty = registry.watch("empty-srv").await.unwrap();

    let services = registry.list_services().await;
    assert_eq!(services.len(), 1);
    assert_eq!(services["user-srv"][0].id, "u-1");
}

#[tokio::test]
async fn registrar_passes_health_check_flag_through() {
    let api = MockConsulApi::new();
    let registry = ConsulRegistry::with_options(
        Client::new(api.clone()),
        false,
        RegistryOptions::default(),
    );

    let instance = grpc_instance("user-srv", "u-1", "10.0.0.1:9000");
    registry.register(&instance).await.unwrap();
    registry.deregister(&instance).await.unwrap();

    let registrations = api.registrations.lock();
    assert_eq!(registrations.len(), 1);
    // 只有 TTL 检查
    assert_eq!(registrations[0].checks.len(), 1);
    assert_eq!(*api.deregistrations.lock(), vec!["u-1".to_string()]);
}
