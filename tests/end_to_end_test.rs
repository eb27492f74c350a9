//! 注册中心 → 解析器 → 连接池 → 负载均衡通道 全链路测试

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockConsulApi, SpyClientConn, grpc_instance, wait_until};
use flare_discovery::balancer::PickInfo;
use flare_discovery::client::ClientBuilder;
use flare_discovery::error::ErrorCode;
use flare_discovery::registry::Watcher;
use flare_discovery::registry::consul::{
    Client, ClientOptions, ConsulRegistry, ConsulWatcher, RegistryOptions, ServiceSet,
};
use flare_discovery::resolver::DiscoveryResolver;
use flare_discovery::selector::{DoneInfo, SelectorKind};
use tokio_test::{assert_pending, assert_ready, task};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(5);

fn fast_registry(api: Arc<MockConsulApi>) -> Arc<ConsulRegistry> {
    let client = Client::with_options(
        api,
        ClientOptions::default().with_wait_time(Duration::from_millis(200)),
    );
    Arc::new(ConsulRegistry::with_options(
        client,
        true,
        RegistryOptions {
            poll_interval: Duration::from_millis(10),
            retry_backoff: Duration::from_millis(10),
            resolve_timeout: Duration::from_secs(1),
            query_timeout: Duration::from_secs(2),
            passing_only: true,
        },
    ))
}

#[tokio::test]
async fn membership_changes_reach_watchers_and_resolver() {
    let set = Arc::new(ServiceSet::new("svc-a"));
    let token = CancellationToken::new();
    let watcher = ConsulWatcher::new(set.clone(), &token);

    let mut next = task::spawn(watcher.next());
    assert_pending!(next.poll());

    set.broadcast(vec![grpc_instance("svc-a", "a-1", "10.0.0.1:9000")]);
    assert_eq!(assert_ready!(next.poll()).unwrap().len(), 1);
    drop(next);

    let spy = SpyClientConn::new();
    let resolver_watcher = Arc::new(ConsulWatcher::new(set.clone(), &token));
    let resolver = DiscoveryResolver::new("svc-a", resolver_watcher, spy.clone(), "grpc", true);
    resolver.start();

    set.broadcast(vec![
        grpc_instance("svc-a", "a-1", "10.0.0.1:9000"),
        grpc_instance("svc-a", "a-2", "10.0.0.2:9000"),
        grpc_instance("svc-a", "a-2-dup", "10.0.0.2:9000"),
    ]);
    assert_eq!(watcher.next().await.unwrap().len(), 3);

    assert!(wait_until(WAIT, || spy.last_addrs().len() == 2).await);
    assert_eq!(spy.last_addrs(), vec!["10.0.0.1:9000", "10.0.0.2:9000"]);

    token.cancel();
    assert!(watcher.next().await.unwrap_err().is_cancelled());
}

#[tokio::test]
async fn discovery_channel_follows_registry() {
    let api = MockConsulApi::new();
    api.set_service(
        "svc-a",
        &[
            grpc_instance("svc-a", "a-1", "127.0.0.1:19101"),
            grpc_instance("svc-a", "a-2", "127.0.0.1:19102"),
        ],
    );
    let registry = fast_registry(api.clone());

    let channel = ClientBuilder::new()
        .endpoint("discovery:///svc-a")
        .discovery(registry.clone())
        .balancer(SelectorKind::WeightedRoundRobin)
        .insecure(true)
        .build()
        .await
        .unwrap();

    let pool = channel.pool().clone();
    assert!(wait_until(WAIT, || pool.addresses().len() == 2).await);
    assert_eq!(channel.target(), "discovery:///svc-a");

    let picked = channel.pick(&PickInfo::default()).await.unwrap();
    assert!(picked.sub_conn.addr().starts_with("127.0.0.1:191"));
    picked.finish(&DoneInfo::ok());

    // 下线一个实例后连接池随之收缩
    api.set_service("svc-a", &[grpc_instance("svc-a", "a-2", "127.0.0.1:19102")]);
    assert!(wait_until(WAIT, || pool.addresses() == vec!["127.0.0.1:19102"]).await);

    // 实例全部下线时保留最后一次的地址
    let updates = pool.update_count();
    api.set_service("svc-a", &[]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.update_count(), updates);
    assert_eq!(pool.addresses(), vec!["127.0.0.1:19102"]);

    drop(channel);
    registry.close();
}

#[tokio::test]
async fn pick_waits_for_first_addresses() {
    let api = MockConsulApi::new();
    let registry = fast_registry(api.clone());

    let channel = ClientBuilder::new()
        .endpoint("discovery:///svc-late")
        .discovery(registry.clone())
        .insecure(true)
        .pick_timeout(Duration::from_millis(50))
        .build()
        .await
        .unwrap();

    let err = channel.pick(&PickInfo::default()).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NoSubConnAvailable));

    let waiting = {
        let channel = channel.clone();
        tokio::spawn(async move {
            let info = PickInfo {
                method: "/svc.Late/Call".to_string(),
            };
            // 通道的 pick_timeout 较短，循环等待地址出现
            for _ in 0..100 {
                if let Ok(picked) = channel.pick(&info).await {
                    return Some(picked.sub_conn.addr().to_string());
                }
            }
            None
        })
    };

    api.set_service("svc-late", &[grpc_instance("svc-late", "l-1", "127.0.0.1:19201")]);
    let picked = tokio::time::timeout(WAIT, waiting).await.unwrap().unwrap();
    assert_eq!(picked.as_deref(), Some("127.0.0.1:19201"));

    registry.close();
}

#[tokio::test]
async fn direct_targets_skip_the_registry() {
    let channel = ClientBuilder::new()
        .endpoint("direct:///127.0.0.1:19301,127.0.0.1:19302")
        .insecure(true)
        .build()
        .await
        .unwrap();
    assert_eq!(
        channel.pool().addresses(),
        vec!["127.0.0.1:19301", "127.0.0.1:19302"]
    );

    let bare = ClientBuilder::new()
        .endpoint("127.0.0.1:19303")
        .insecure(true)
        .build()
        .await
        .unwrap();
    assert_eq!(bare.pool().addresses(), vec!["127.0.0.1:19303"]);
    assert!(bare.pick(&PickInfo::default()).await.is_ok());
}

#[tokio::test]
async fn call_to_unreachable_address_fails() {
    let channel = ClientBuilder::new()
        .endpoint("direct:///127.0.0.1:1")
        .insecure(true)
        .connect_timeout(Duration::from_millis(500))
        .build()
        .await
        .unwrap();

    let request = http::Request::builder()
        .method("POST")
        .uri("http://127.0.0.1:1/svc.Echo/Ping")
        .header("content-type", "application/grpc")
        .body(tonic::body::Body::empty())
        .unwrap();

    let result = tokio::time::timeout(WAIT, channel.oneshot(request)).await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn discovery_target_without_discovery_is_rejected() {
    let err = ClientBuilder::new()
        .endpoint("discovery:///svc-a")
        .build()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ConfigurationError));
}

#[tokio::test]
async fn unknown_scheme_is_rejected() {
    let err = ClientBuilder::new()
        .endpoint("etcd:///svc-a")
        .build()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ResolverNotFound));

    let err = ClientBuilder::new()
        .endpoint("direct:///127.0.0.1:19401")
        .balancer_name("least_conn")
        .build()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::BalancerNotFound));
}
