//! 真实 Consul agent 集成测试
//!
//! 需要本地运行 `consul agent -dev`，默认忽略：
//! `cargo test --test consul_live_test -- --ignored`
//!
//! agent 地址可以通过 `CONSUL_HTTP_ADDR` 覆盖，默认 `http://127.0.0.1:8500`。

use std::time::Duration;

use flare_discovery::config::DiscoveryConfig;
use flare_discovery::registry::consul::ConsulRegistry;
use flare_discovery::registry::{Discovery, Registrar, ServiceInstance};

fn live_instance() -> ServiceInstance {
    ServiceInstance::new("flare-live-test")
        .with_version("v0.0.1")
        .with_metadata("zone", "local")
        .with_endpoint("grpc://127.0.0.1:19500")
}

#[tokio::test]
#[ignore]
async fn register_watch_and_deregister_against_local_agent() {
    let mut config = DiscoveryConfig::default();
    config.apply_env_overrides();
    config.consul.wait_time_secs = 2;
    config.registry.enable_health_check = false;
    let registry = ConsulRegistry::from_config(&config).unwrap();

    let instance = live_instance();
    registry.register(&instance).await.unwrap();

    let watcher = registry.watch("flare-live-test").await.unwrap();
    let services = tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            let services = watcher.next().await.unwrap();
            if services.iter().any(|s| s.id == instance.id) {
                return services;
            }
        }
    })
    .await
    .unwrap();
    let found = services.iter().find(|s| s.id == instance.id).unwrap();
    assert_eq!(found.version, "v0.0.1");
    assert_eq!(found.endpoints, instance.endpoints);

    registry.deregister(&instance).await.unwrap();
    watcher.stop().unwrap();
    registry.close();
}
