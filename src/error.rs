//! 统一错误处理
//!
//! 整条工作流只向调用方暴露一个错误类型 `WorkflowError`，
//! 并通过 `component()` 标记错误来源组件，便于前端渲染精确的提示。

use std::time::Duration;

use thiserror::Error;

/// 错误来源组件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// VPN 隧道
    Tunnel,
    /// 门户认证
    Auth,
    /// 电表 API
    Meter,
    /// 底层网络
    Network,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Tunnel => "tunnel",
            Component::Auth => "auth",
            Component::Meter => "meter",
            Component::Network => "network",
        }
    }
}

/// 认证失败的具体原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailKind {
    /// 用户名或密码错误
    BadCredentials,
    /// 门户无法访问
    PortalUnreachable,
    /// 门户返回了意料之外的响应
    UnexpectedResponse,
}

impl std::fmt::Display for AuthFailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailKind::BadCredentials => write!(f, "bad credentials"),
            AuthFailKind::PortalUnreachable => write!(f, "portal unreachable"),
            AuthFailKind::UnexpectedResponse => write!(f, "unexpected portal response"),
        }
    }
}

/// 工作流错误类型
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// 隧道容器启动失败
    #[error("tunnel start failed: {0}")]
    TunnelStart(String),

    /// 隧道在限定时间内未就绪
    #[error("tunnel did not become ready within {0:?}")]
    TunnelTimeout(Duration),

    /// 门户入口页面出现登录墙，会话未认证
    #[error("portal entry page shows the auth wall, not authenticated")]
    NotAuthenticated,

    /// 验证码错误
    #[error("captcha code rejected by the portal")]
    CaptchaRejected,

    /// 登录失败
    #[error("authentication failed: {0}")]
    AuthFailed(AuthFailKind),

    /// 登录状态机非法转换，调用方使用错误
    #[error("operation not valid in auth state `{0}`")]
    InvalidAuthState(&'static str),

    /// 远端 API 返回 success=false
    #[error("metering api rejected the request: {0}")]
    ApiRejected(String),

    /// 账号未绑定宿舍
    #[error("no room is bound to this account")]
    RoomNotFound,

    /// 充值度数必须为正整数，调用方契约违例
    #[error("invalid recharge amount: {0} kwh (must be a positive integer)")]
    InvalidAmount(i64),

    /// 传输层失败（DNS、连接拒绝、超时）
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// 响应结构无法解析
    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(String),
}

impl WorkflowError {
    /// 错误来源组件
    pub fn component(&self) -> Component {
        match self {
            WorkflowError::TunnelStart(_) | WorkflowError::TunnelTimeout(_) => Component::Tunnel,
            WorkflowError::NotAuthenticated
            | WorkflowError::CaptchaRejected
            | WorkflowError::AuthFailed(_)
            | WorkflowError::InvalidAuthState(_) => Component::Auth,
            WorkflowError::ApiRejected(_)
            | WorkflowError::RoomNotFound
            | WorkflowError::InvalidAmount(_) => Component::Meter,
            WorkflowError::Network(_) | WorkflowError::UnexpectedResponse(_) => Component::Network,
        }
    }
}
