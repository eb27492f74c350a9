//! 负载均衡名称注册表

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use super::{PickerBuilder, SelectorPickerBuilder};
use crate::error::{ErrorCode, FlareError, Result};
use crate::selector::SelectorKind;

/// 按名称索引的 PickerBuilder
///
/// 同名重复注册不会报错也不会覆盖，进程内多个客户端可以各自初始化。
#[derive(Default)]
pub struct BalancerRegistry {
    builders: RwLock<HashMap<String, Arc<dyn PickerBuilder>>>,
}

impl BalancerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预先注册内置算法
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register_defaults();
        registry
    }

    /// 进程级注册表
    pub fn global() -> &'static BalancerRegistry {
        static GLOBAL: OnceLock<BalancerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(BalancerRegistry::with_defaults)
    }

    pub fn register_defaults(&self) {
        for kind in SelectorKind::ALL {
            self.register(kind.name(), Arc::new(SelectorPickerBuilder::from_kind(kind)));
        }
    }

    /// 注册构建器，返回是否新注册
    pub fn register(&self, name: &str, builder: Arc<dyn PickerBuilder>) -> bool {
        let mut builders = self.builders.write();
        if builders.contains_key(name) {
            debug!(balancer = %name, "Balancer already registered");
            return false;
        }
        builders.insert(name.to_string(), builder);
        true
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn PickerBuilder>> {
        self.builders.read().get(name).cloned().ok_or_else(|| {
            FlareError::localized(
                ErrorCode::BalancerNotFound,
                format!("balancer {} not registered", name),
            )
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.builders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
