//! 端点 URL 工具
//!
//! 端点格式为 `scheme://host:port`，加密监听通过 `isSecure=true` 查询参数区分。

use url::Url;

use crate::error::{FlareError, Result};

const SECURE_QUERY_KEY: &str = "isSecure";

/// 构建端点 URL
pub fn new_endpoint(scheme: &str, host: &str, is_secure: bool) -> Result<Url> {
    let raw = if is_secure {
        format!("{}://{}?{}=true", scheme, host, SECURE_QUERY_KEY)
    } else {
        format!("{}://{}", scheme, host)
    };
    Url::parse(&raw).map_err(|e| FlareError::invalid_endpoint(raw, e.to_string()))
}

/// 返回第一个 scheme 和加密标记都匹配的端点的 `host:port`
///
/// 没有匹配项时返回 `Ok(None)`；遇到无法解析的端点直接返回错误。
pub fn parse_endpoint(endpoints: &[String], scheme: &str, secure: bool) -> Result<Option<String>> {
    for endpoint in endpoints {
        let raw = Url::parse(endpoint)
            .map_err(|e| FlareError::invalid_endpoint(endpoint, e.to_string()))?;
        if raw.scheme() == scheme && is_secure(&raw) == secure {
            return Ok(Some(host_port(&raw, endpoint)?));
        }
    }
    Ok(None)
}

/// 端点是否标记为加密
pub fn is_secure(raw: &Url) -> bool {
    raw.query_pairs()
        .find(|(key, _)| key == SECURE_QUERY_KEY)
        .is_some_and(|(_, value)| parse_bool(&value))
}

fn host_port(raw: &Url, endpoint: &str) -> Result<String> {
    let host = raw
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| FlareError::invalid_endpoint(endpoint, "missing host"))?;
    // 解析后的 URL 会省略协议默认端口，这里补回来保证地址可拨号
    Ok(match raw.port_or_known_default() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "t" | "T" | "true" | "TRUE" | "True")
}
