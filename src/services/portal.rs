//! 真实门户会话装配
//!
//! 把代理会话、认证状态机和电表客户端接成编排器需要的
//! `PortalSession`。Cookie 随 HTTP 会话走，认证层和电表层
//! 共享同一个会话对象。

use async_trait::async_trait;

use crate::config::env::PortalConfig;
use crate::domain::auth::{CaptchaChallenge, Credentials};
use crate::domain::meter::{MeterState, RechargeRecord, RoomIdentity};
use crate::error::WorkflowError;
use crate::services::auth::AuthSession;
use crate::services::meter::MeterClient;
use crate::services::proxy::ProxyRouter;
use crate::services::workflow::{PortalSession, SessionFactory};

/// 真实会话工厂
pub struct PortalFactory {
    config: PortalConfig,
}

impl PortalFactory {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for PortalFactory {
    async fn open(&self, router: &ProxyRouter) -> Result<Box<dyn PortalSession>, WorkflowError> {
        let http = router.build_session(&self.config.site)?;
        let creds = Credentials::new(&self.config.username, &self.config.password);
        // 构造即做入口页前置检查
        let auth = AuthSession::connect(http, creds).await?;
        Ok(Box::new(PortalBackend { auth }))
    }
}

/// 认证会话 + 电表客户端的组合体
struct PortalBackend {
    auth: AuthSession,
}

impl PortalBackend {
    /// 电表客户端只能从已认证的会话上长出来
    fn meter(&self) -> Result<MeterClient, WorkflowError> {
        Ok(MeterClient::new(self.auth.authenticated_session()?.clone()))
    }
}

#[async_trait]
impl PortalSession for PortalBackend {
    async fn begin_login(&mut self) -> Result<bool, WorkflowError> {
        self.auth.start().await
    }

    async fn captcha_image(&mut self) -> Result<CaptchaChallenge, WorkflowError> {
        self.auth.captcha_image().await
    }

    async fn submit_captcha(&mut self, code: &str) -> Result<(), WorkflowError> {
        self.auth.submit_captcha(code).await
    }

    async fn login(&mut self) -> Result<(), WorkflowError> {
        self.auth.login().await
    }

    async fn logout(&mut self) {
        self.auth.logout().await;
    }

    async fn query_state(&self) -> Result<MeterState, WorkflowError> {
        self.meter()?.query_state().await
    }

    async fn list_recharges(&self) -> Result<Vec<RechargeRecord>, WorkflowError> {
        self.meter()?.list_recharges().await
    }

    async fn resolve_own_room(&self) -> Result<RoomIdentity, WorkflowError> {
        self.meter()?.resolve_own_room().await
    }

    async fn recharge(&self, room: &RoomIdentity, kwh: i64) -> Result<(), WorkflowError> {
        self.meter()?.recharge(room, kwh).await
    }
}
