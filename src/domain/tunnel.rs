//! 隧道相关领域模型
//!
//! 纯数据类型，无 tokio 依赖

use serde::{Deserialize, Serialize};

/// 隧道外部状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    Running,
    Stopped,
}

/// 一个正在运行的隧道实例
///
/// 同一逻辑隧道名在任意时刻至多存在一个活动 handle。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelHandle {
    /// 逻辑隧道名（即容器名）
    pub name: String,
    /// 底层容器 ID
    pub container_id: String,
    /// 本地代理端点
    pub proxy: ProxyEndpoint,
}

/// 本地 SOCKS 代理端点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// SOCKS5 代理 URL，`socks5h` 使 DNS 解析也走隧道
    pub fn socks_url(&self) -> String {
        format!("socks5h://{}:{}", self.host, self.port)
    }

    /// TCP 探活用的 `host:port` 地址
    pub fn dial_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 传给隧道容器的拨号环境
///
/// 密码只进容器环境变量，不进日志。
#[derive(Clone)]
pub struct TunnelEnv {
    /// VPN 服务端地址
    pub server_url: String,
    /// VPN 账号
    pub username: String,
    /// VPN 密码
    pub password: String,
    /// 客户端版本号
    pub client_version: String,
}

impl TunnelEnv {
    /// 容器镜像要求的 CLI_OPTS 字符串，格式固定为 `-d 地址 -u 账号 -p 密码`
    pub fn cli_opts(&self) -> String {
        format!(
            "-d {} -u {} -p {}",
            self.server_url, self.username, self.password
        )
    }
}

impl std::fmt::Debug for TunnelEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelEnv")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("client_version", &self.client_version)
            .finish()
    }
}
