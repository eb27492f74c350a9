//! 子连接池
//!
//! 解析器推送地址列表后增量维护子连接，并重建 Picker 发布给调用方。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::balancer::{ErrPicker, Picker, PickerBuildInfo, PickerBuilder, SubConn};
use crate::error::{FlareError, Result};
use crate::resolver::{Address, ClientConn, ResolverState};

/// 子连接参数
#[derive(Debug, Clone)]
pub struct SubConnSettings {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    /// 使用 https 连接
    pub secure: bool,
}

impl Default for SubConnSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(2),
            secure: false,
        }
    }
}

impl SubConnSettings {
    fn channel(&self, addr: &str) -> Result<Channel> {
        let scheme = if self.secure { "https" } else { "http" };
        let endpoint = Endpoint::from_shared(format!("{}://{}", scheme, addr))
            .map_err(|e| FlareError::invalid_endpoint(addr, e.to_string()))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout);
        // 首次调用时才建立连接，断开后自动重连
        Ok(endpoint.connect_lazy())
    }
}

/// 连接管理器
pub struct SubConnPool {
    picker_builder: Arc<dyn PickerBuilder>,
    settings: SubConnSettings,
    sub_conns: Mutex<HashMap<String, SubConn>>,
    picker_tx: watch::Sender<Arc<dyn Picker>>,
    updates: AtomicU64,
}

impl SubConnPool {
    pub fn new(picker_builder: Arc<dyn PickerBuilder>, settings: SubConnSettings) -> Self {
        let initial: Arc<dyn Picker> = Arc::new(ErrPicker::new(FlareError::no_sub_conn_available()));
        let (picker_tx, _) = watch::channel(initial);
        Self {
            picker_builder,
            settings,
            sub_conns: Mutex::new(HashMap::new()),
            picker_tx,
            updates: AtomicU64::new(0),
        }
    }

    /// 订阅 Picker 变化
    pub fn subscribe(&self) -> watch::Receiver<Arc<dyn Picker>> {
        self.picker_tx.subscribe()
    }

    /// 当前 Picker
    pub fn picker(&self) -> Arc<dyn Picker> {
        self.picker_tx.borrow().clone()
    }

    /// 当前子连接地址，已排序
    pub fn addresses(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.sub_conns.lock().keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// 收到的地址更新次数
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    fn rebuild(&self, ready: Vec<SubConn>) {
        let count = ready.len();
        let picker = self.picker_builder.build(PickerBuildInfo { ready });
        self.picker_tx.send_replace(picker);
        debug!(sub_conns = count, "Picker rebuilt");
    }
}

impl ClientConn for SubConnPool {
    fn update_state(&self, state: ResolverState) -> Result<()> {
        self.updates.fetch_add(1, Ordering::Relaxed);

        let ready = {
            let mut sub_conns = self.sub_conns.lock();
            let mut next: HashMap<String, SubConn> = HashMap::with_capacity(state.addresses.len());

            for address in state.addresses {
                if next.contains_key(&address.addr) {
                    continue;
                }
                let channel = match sub_conns.remove(&address.addr) {
                    Some(existing) => existing.channel().clone(),
                    None => match self.settings.channel(&address.addr) {
                        Ok(channel) => {
                            info!(addr = %address.addr, "Sub connection created");
                            channel
                        }
                        Err(e) => {
                            warn!(addr = %address.addr, error = %e, "Skip invalid address");
                            continue;
                        }
                    },
                };
                next.insert(address.addr.clone(), SubConn::new(address, channel));
            }

            for removed in sub_conns.keys() {
                info!(addr = %removed, "Sub connection removed");
            }
            *sub_conns = next;
            sub_conns.values().cloned().collect::<Vec<_>>()
        };

        self.rebuild(ready);
        Ok(())
    }
}

impl std::fmt::Debug for SubConnPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubConnPool")
            .field("addresses", &self.addresses())
            .field("updates", &self.update_count())
            .finish()
    }
}

/// 直接用地址构造子连接，主要用于测试
pub fn lazy_sub_conn(address: Address, settings: &SubConnSettings) -> Result<SubConn> {
    let channel = settings.channel(&address.addr)?;
    Ok(SubConn::new(address, channel))
}
