//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::tunnel::{ProxyEndpoint, TunnelEnv};

/// 环境配置
///
/// 核心只在工作流启动时读取一次，之后不再触碰环境。
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// 门户配置
    pub portal: PortalConfig,
    /// 隧道配置
    pub tunnel: TunnelConfig,
    /// 默认充值配置
    pub charge: ChargeConfig,
    /// 偏好记录存放目录
    pub data_dir: PathBuf,
}

/// 计费门户配置
#[derive(Clone, Debug)]
pub struct PortalConfig {
    /// 门户站点 URL
    pub site: String,
    /// 门户账号
    pub username: String,
    /// 门户密码
    pub password: String,
    /// 登录成功后到第一次 API 调用之间的等待秒数
    /// （门户会拒绝紧跟登录的请求，经验值）
    pub post_login_delay_secs: u64,
}

/// 隧道配置
#[derive(Clone, Debug)]
pub struct TunnelConfig {
    /// 容器名，同时作为逻辑隧道名
    pub container_name: String,
    /// 容器镜像
    pub image: String,
    /// VPN 拨号环境
    pub env: TunnelEnv,
    /// 本地 SOCKS 代理端点
    pub socks: ProxyEndpoint,
    /// 等待隧道就绪的上限
    pub ready_timeout: Duration,
    /// 代理端口可拨通之后的静置秒数
    /// （docker 先发布端口，容器内的客户端随后才完成拨号）
    pub settle_secs: u64,
}

/// 默认充值配置
#[derive(Clone, Debug)]
pub struct ChargeConfig {
    pub building_code: String,
    pub room: String,
    pub amount_kwh: i64,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        Self {
            portal: PortalConfig::from_env(),
            tunnel: TunnelConfig::from_env(),
            charge: ChargeConfig::from_env(),
            data_dir: env::var("EPAY_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
        }
    }
}

impl PortalConfig {
    pub fn from_env() -> Self {
        Self {
            site: env::var("FEE_SITE").unwrap_or_else(|_| "http://10.50.2.206".to_string()),
            username: env::var("FEE_USER").unwrap_or_default(),
            password: env::var("FEE_PASSWORD").unwrap_or_default(),
            post_login_delay_secs: parse_or("FEE_DELAY", 5),
        }
    }
}

impl TunnelConfig {
    pub fn from_env() -> Self {
        let container_name =
            env::var("VPN_CONTAINER_NAME").unwrap_or_else(|_| "easyconnect_vpn".to_string());
        let image =
            env::var("EC_IMAGE").unwrap_or_else(|_| "hagb/docker-easyconnect:cli".to_string());

        let env_cfg = TunnelEnv {
            server_url: env::var("EC_SERVER_URL").unwrap_or_default(),
            username: env::var("EC_USERNAME").unwrap_or_default(),
            password: env::var("EC_PASSWORD").unwrap_or_default(),
            client_version: env::var("EC_VER").unwrap_or_else(|_| "7.6.3".to_string()),
        };

        Self {
            container_name,
            image,
            env: env_cfg,
            socks: ProxyEndpoint::new("127.0.0.1", parse_or("EPAY_SOCKS_PORT", 1080)),
            ready_timeout: Duration::from_secs(parse_or("EPAY_READY_TIMEOUT_SECS", 60)),
            settle_secs: parse_or("EPAY_TUNNEL_SETTLE_SECS", 5),
        }
    }
}

impl ChargeConfig {
    pub fn from_env() -> Self {
        Self {
            building_code: env::var("FEE_BUILDING").unwrap_or_default(),
            room: env::var("FEE_ROOM").unwrap_or_default(),
            amount_kwh: parse_or("FEE_AMOUNT", 1),
        }
    }
}

/// 解析数值环境变量，缺失或非法时回退默认值
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// 常量
pub mod constants {
    /// 验证码提交次数上限，防止静默死循环
    pub const CAPTCHA_MAX_ATTEMPTS: u32 = 3;

    /// 隧道就绪探测间隔（毫秒）
    pub const READY_PROBE_INTERVAL_MS: u64 = 500;

    /// 单次 HTTP 请求超时（秒）
    pub const HTTP_TIMEOUT_SECS: u64 = 30;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
