//! 门户认证会话
//!
//! 登录状态机：`Unauthenticated → CaptchaPending → Authenticated → LoggedOut`。
//! 验证码图片以内存字节暴露给调用方，验证码答案通过直接调用送回，
//! 核心不落盘、不交互。

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::auth::{AuthState, CaptchaChallenge, Credentials};
use crate::error::{AuthFailKind, WorkflowError};
use crate::services::proxy::HttpSession;

/// 入口页登录墙标记，出现即说明当前会话未被门户认可
const AUTH_WALL_MARKER: &str = "auth_page_wrapper";

const NEED_CAPTCHA_PATH: &str = "api/auth/needCaptcha";
const CAPTCHA_IMAGE_PATH: &str = "api/auth/captcha";
const LOGIN_PATH: &str = "api/auth/login";
const LOGOUT_PATH: &str = "api/auth/logout";

/// 入口页是否出现登录墙
pub fn shows_auth_wall(html: &str) -> bool {
    html.contains(AUTH_WALL_MARKER)
}

/// 认证会话
#[derive(Debug)]
pub struct AuthSession {
    session: HttpSession,
    creds: Credentials,
    state: AuthState,
}

impl AuthSession {
    /// 建立认证会话
    ///
    /// 构造前置检查：抓取门户入口页，出现登录墙标记立即失败，
    /// 不发起任何验证码或登录请求。这挡住了缓存凭据失效后
    /// 页面被静默重定向到登录墙的情况。
    pub async fn connect(
        session: HttpSession,
        creds: Credentials,
    ) -> Result<Self, WorkflowError> {
        let entry = session
            .client()
            .get(session.url("/"))
            .send()
            .await?
            .text()
            .await?;

        if shows_auth_wall(&entry) {
            warn!("portal entry page shows the auth wall");
            return Err(WorkflowError::NotAuthenticated);
        }

        Ok(Self {
            session,
            creds,
            state: AuthState::Unauthenticated,
        })
    }

    #[cfg(test)]
    fn with_state(session: HttpSession, creds: Credentials, state: AuthState) -> Self {
        Self {
            session,
            creds,
            state,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// 门户是否要求本次登录输入验证码，纯查询，不改状态
    pub async fn need_captcha(&self) -> Result<bool, WorkflowError> {
        let body = self
            .session
            .client()
            .get(self.session.url(NEED_CAPTCHA_PATH))
            .query(&[
                ("username", self.creds.username()),
                ("_dc", &Utc::now().timestamp().to_string()),
            ])
            .send()
            .await?
            .text()
            .await?;

        Ok(body.trim() == "true")
    }

    /// 进入登录流程
    ///
    /// 需要验证码时转入 `CaptchaPending` 并返回 true，
    /// 调用方随后走 `captcha_image` / `submit_captcha`；
    /// 否则留在 `Unauthenticated`，直接 `login` 即可。
    pub async fn start(&mut self) -> Result<bool, WorkflowError> {
        if self.state != AuthState::Unauthenticated {
            return Err(WorkflowError::InvalidAuthState(self.state.as_str()));
        }

        if self.need_captcha().await? {
            debug!("portal demands a captcha for this login");
            self.state = AuthState::CaptchaPending;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// 抓取当前挑战的验证码图片
    pub async fn captcha_image(&self) -> Result<CaptchaChallenge, WorkflowError> {
        if self.state != AuthState::CaptchaPending {
            return Err(WorkflowError::InvalidAuthState(self.state.as_str()));
        }

        let image = self
            .session
            .client()
            .get(self.session.url(CAPTCHA_IMAGE_PATH))
            .query(&[("_dc", Utc::now().timestamp())])
            .send()
            .await?
            .bytes()
            .await?;

        Ok(CaptchaChallenge {
            image: image.to_vec(),
        })
    }

    /// 带验证码答案尝试登录，仅在 `CaptchaPending` 有效
    ///
    /// 验证码错误返回 `CaptchaRejected`，状态保持 `CaptchaPending`，
    /// 调用方可在有限次数内重试。
    pub async fn submit_captcha(&mut self, code: &str) -> Result<(), WorkflowError> {
        if self.state != AuthState::CaptchaPending {
            return Err(WorkflowError::InvalidAuthState(self.state.as_str()));
        }

        if self.post_login(Some(code)).await? {
            info!(username = %self.creds.username(), "login succeeded (with captcha)");
            self.state = AuthState::Authenticated;
            Ok(())
        } else {
            debug!("captcha code rejected");
            Err(WorkflowError::CaptchaRejected)
        }
    }

    /// 无验证码登录，仅在 `Unauthenticated` 有效
    pub async fn login(&mut self) -> Result<(), WorkflowError> {
        if self.state != AuthState::Unauthenticated {
            return Err(WorkflowError::InvalidAuthState(self.state.as_str()));
        }

        if self.post_login(None).await? {
            info!(username = %self.creds.username(), "login succeeded");
            self.state = AuthState::Authenticated;
            Ok(())
        } else {
            Err(WorkflowError::AuthFailed(AuthFailKind::BadCredentials))
        }
    }

    /// 提交凭据，返回门户报告的 success 标志
    async fn post_login(&self, captcha: Option<&str>) -> Result<bool, WorkflowError> {
        let mut form = vec![
            ("username", self.creds.username().to_string()),
            ("password", self.creds.password().to_string()),
            ("renew", "true".to_string()),
        ];
        if let Some(code) = captcha {
            form.push(("captcha", code.to_string()));
        }

        let response = self
            .session
            .client()
            .post(self.session.url(LOGIN_PATH))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "portal unreachable during login");
                WorkflowError::AuthFailed(AuthFailKind::PortalUnreachable)
            })?;

        let body = response.text().await.map_err(|e| {
            warn!(error = %e, "failed to read login response");
            WorkflowError::AuthFailed(AuthFailKind::PortalUnreachable)
        })?;

        let value: Value = serde_json::from_str(&body)
            .map_err(|_| WorkflowError::AuthFailed(AuthFailKind::UnexpectedResponse))?;
        value
            .get("success")
            .and_then(Value::as_bool)
            .ok_or(WorkflowError::AuthFailed(AuthFailKind::UnexpectedResponse))
    }

    /// 登出
    ///
    /// 服务端失效尽力而为，无论服务端调用成败，本地状态都进入
    /// `LoggedOut`，清理流程不能被一次失败的登出卡住。
    pub async fn logout(&mut self) {
        if self.state == AuthState::Authenticated {
            let result = self
                .session
                .client()
                .get(self.session.url(LOGOUT_PATH))
                .send()
                .await;
            if let Err(e) = result {
                warn!(error = %e, "server-side logout failed, dropping session anyway");
            }
        }
        self.state = AuthState::LoggedOut;
    }

    /// 取出已认证的 HTTP 会话给电表客户端用
    pub fn authenticated_session(&self) -> Result<&HttpSession, WorkflowError> {
        if self.state != AuthState::Authenticated {
            return Err(WorkflowError::NotAuthenticated);
        }
        Ok(&self.session)
    }
}
