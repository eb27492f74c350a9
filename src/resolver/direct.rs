//! 静态地址解析器：`direct:///127.0.0.1:9000,127.0.0.1:9001`

use std::sync::Arc;

use async_trait::async_trait;

use super::{Address, ClientConn, Resolver, ResolverBuilder, ResolverState, Target};
use crate::error::{FlareError, Result};

pub const DIRECT_SCHEME: &str = "direct";

#[derive(Debug, Default, Clone, Copy)]
pub struct DirectBuilder;

impl DirectBuilder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ResolverBuilder for DirectBuilder {
    fn scheme(&self) -> &str {
        DIRECT_SCHEME
    }

    async fn build(&self, target: &Target, cc: Arc<dyn ClientConn>) -> Result<Box<dyn Resolver>> {
        let addresses: Vec<Address> = target
            .endpoint
            .trim_start_matches('/')
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(Address::new)
            .collect();

        if addresses.is_empty() {
            return Err(FlareError::invalid_endpoint(target.to_string(), "no address"));
        }

        cc.update_state(ResolverState { addresses })?;
        Ok(Box::new(DirectResolver))
    }
}

/// 地址在构建时一次性推送，之后无事可做
struct DirectResolver;

impl Resolver for DirectResolver {
    fn resolve_now(&self) {}

    fn close(&self) {}
}
