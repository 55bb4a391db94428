//! 认证相关领域模型

/// 门户登录凭据
///
/// 一经提供不可变；`Debug` 输出对密码打码，凭据永远不进日志。
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 验证码挑战
///
/// 由 AuthSession 在需要验证码时产生，图片字节留在内存中，
/// 由调用方（GUI / CLI / 测试）自行决定如何展示。
/// 一次挑战只消费一次，随本次登录尝试一起失效。
pub struct CaptchaChallenge {
    pub image: Vec<u8>,
}

/// 登录状态机
///
/// `Unauthenticated` 为初始态，`LoggedOut` 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    CaptchaPending,
    Authenticated,
    LoggedOut,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::CaptchaPending => "captcha_pending",
            AuthState::Authenticated => "authenticated",
            AuthState::LoggedOut => "logged_out",
        }
    }
}
