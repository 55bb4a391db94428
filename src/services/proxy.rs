//! 会话级代理路由
//!
//! 代理配置只作用于由本 router 构建出的会话，不碰进程级网络栈，
//! 同进程里不相关的连接不会被悄悄改道。

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use crate::config::env::constants;
use crate::domain::tunnel::ProxyEndpoint;
use crate::error::WorkflowError;

/// 代理路由器
///
/// `configure` 幂等：重复应用相同端点是空操作，应用不同端点则替换。
#[derive(Debug, Default)]
pub struct ProxyRouter {
    endpoint: Option<ProxyEndpoint>,
}

impl ProxyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录出站流量要经过的 SOCKS 端点，返回配置是否发生变化
    pub fn configure(&mut self, endpoint: ProxyEndpoint) -> bool {
        if self.endpoint.as_ref() == Some(&endpoint) {
            debug!(proxy = %endpoint, "proxy endpoint unchanged");
            return false;
        }
        info!(proxy = %endpoint, "routing session traffic through proxy");
        self.endpoint = Some(endpoint);
        true
    }

    pub fn endpoint(&self) -> Option<&ProxyEndpoint> {
        self.endpoint.as_ref()
    }

    /// 构建一个走当前代理配置的 HTTP 会话
    ///
    /// Cookie 存储随会话走，登录态由它承载。
    pub fn build_session(&self, base_url: &str) -> Result<HttpSession, WorkflowError> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(constants::HTTP_TIMEOUT_SECS));

        if let Some(endpoint) = &self.endpoint {
            builder = builder.proxy(reqwest::Proxy::all(endpoint.socks_url())?);
        }

        Ok(HttpSession {
            client: builder.build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// 一个绑定了门户站点和代理配置的 HTTP 会话
#[derive(Clone, Debug)]
pub struct HttpSession {
    client: Client,
    base_url: String,
}

impl HttpSession {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 站点内路径拼 URL
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_is_idempotent() {
        let mut router = ProxyRouter::new();
        let endpoint = ProxyEndpoint::new("127.0.0.1", 1080);

        assert!(router.configure(endpoint.clone()));
        assert!(!router.configure(endpoint.clone()));
        assert_eq!(router.endpoint(), Some(&endpoint));
    }

    #[test]
    fn test_configure_replaces_different_endpoint() {
        let mut router = ProxyRouter::new();
        router.configure(ProxyEndpoint::new("127.0.0.1", 1080));

        let other = ProxyEndpoint::new("127.0.0.1", 1081);
        assert!(router.configure(other.clone()));
        assert_eq!(router.endpoint(), Some(&other));
    }

    #[test]
    fn test_build_session_without_proxy() {
        let router = ProxyRouter::new();
        let session = router.build_session("http://10.50.2.206/").unwrap();
        assert_eq!(session.url("/api/charge/query"), "http://10.50.2.206/api/charge/query");
        assert_eq!(session.url("api/charge/query"), "http://10.50.2.206/api/charge/query");
    }

    #[test]
    fn test_build_session_with_proxy() {
        let mut router = ProxyRouter::new();
        router.configure(ProxyEndpoint::new("127.0.0.1", 1080));
        // 代理端点合法时构建必须成功，路由本身在集成环境验证
        router.build_session("http://10.50.2.206").unwrap();
    }
}
