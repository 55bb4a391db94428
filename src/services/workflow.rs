//! 端到端工作流编排
//!
//! 单次逻辑运行：起隧道 → 等就绪 → 配代理 → 登录（可能带验证码）→
//! 电表操作 → 无条件清理。清理（尽力登出 + 停隧道）在每条退出路径上
//! 都会执行；对外只暴露一个 `WorkflowResult`，携带第一个遇到的错误。

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::env::constants;
use crate::domain::auth::CaptchaChallenge;
use crate::domain::meter::{MeterState, RechargeRecord, RoomIdentity};
use crate::error::WorkflowError;
use crate::infra::docker::ContainerRuntime;
use crate::services::proxy::ProxyRouter;
use crate::services::tunnel::TunnelProvider;

/// 验证码解答来源（GUI、CLI 或测试桩）
#[async_trait]
pub trait CaptchaSolver: Send {
    async fn solve(&mut self, challenge: &CaptchaChallenge) -> Result<String, WorkflowError>;
}

/// 一个已建立（尚未登录）的门户会话
///
/// 认证与电表操作合在一个对象上，电表操作只在登录成功后可用，
/// 会话随登出一起失效。
#[async_trait]
pub trait PortalSession: Send {
    /// 进入登录流程，返回是否需要验证码
    async fn begin_login(&mut self) -> Result<bool, WorkflowError>;
    async fn captcha_image(&mut self) -> Result<CaptchaChallenge, WorkflowError>;
    async fn submit_captcha(&mut self, code: &str) -> Result<(), WorkflowError>;
    async fn login(&mut self) -> Result<(), WorkflowError>;
    /// 尽力而为的登出，永不失败
    async fn logout(&mut self);

    async fn query_state(&self) -> Result<MeterState, WorkflowError>;
    async fn list_recharges(&self) -> Result<Vec<RechargeRecord>, WorkflowError>;
    async fn resolve_own_room(&self) -> Result<RoomIdentity, WorkflowError>;
    async fn recharge(&self, room: &RoomIdentity, kwh: i64) -> Result<(), WorkflowError>;
}

/// 会话工厂：在代理配置就绪后建立门户会话
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, router: &ProxyRouter) -> Result<Box<dyn PortalSession>, WorkflowError>;
}

/// 调用方请求的电表操作
#[derive(Debug, Clone)]
pub enum MeterRequest {
    /// 查电表状态
    Query,
    /// 查历史账单
    History,
    /// 充值；room 为 None 时充给本人宿舍
    Recharge {
        room: Option<RoomIdentity>,
        kwh: i64,
    },
}

/// 一次运行的成功产出
#[derive(Debug)]
pub enum WorkflowOutcome {
    State(MeterState),
    History(Vec<RechargeRecord>),
    /// 充值已落账，附最新一条账单作为回执
    Recharged(RechargeRecord),
}

/// 单次端到端运行的结果
pub type WorkflowResult = Result<WorkflowOutcome, WorkflowError>;

/// 工作流参数
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// 等待隧道就绪的上限
    pub ready_timeout: Duration,
    /// 登录成功后到第一次 API 调用之间的等待
    pub post_login_delay: Duration,
    /// 验证码提交次数上限
    pub captcha_attempts: u32,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(60),
            post_login_delay: Duration::from_secs(5),
            captcha_attempts: constants::CAPTCHA_MAX_ATTEMPTS,
        }
    }
}

/// 工作流编排器
///
/// 整条流程是一个顺序任务，内部没有并发扇出；
/// 每个网络调用都有界超时。
pub struct Orchestrator<R: ContainerRuntime, F: SessionFactory> {
    tunnel: TunnelProvider<R>,
    factory: F,
    options: WorkflowOptions,
}

impl<R: ContainerRuntime, F: SessionFactory> Orchestrator<R, F> {
    pub fn new(tunnel: TunnelProvider<R>, factory: F, options: WorkflowOptions) -> Self {
        Self {
            tunnel,
            factory,
            options,
        }
    }

    /// 单次端到端运行
    ///
    /// 步骤 1–5 任一失败都会中止剩余步骤，但清理总会执行；
    /// 登出失败只记日志，不能遮蔽主结果。
    pub async fn run(
        &self,
        request: MeterRequest,
        solver: &mut dyn CaptchaSolver,
    ) -> WorkflowResult {
        let mut session: Option<Box<dyn PortalSession>> = None;
        let result = self.execute(&request, solver, &mut session).await;

        // 无条件清理，即使前面的步骤失败或根本没走到
        if let Some(s) = session.as_mut() {
            s.logout().await;
        }
        self.tunnel.stop().await;

        match &result {
            Ok(outcome) => info!(outcome = ?outcome, "workflow finished"),
            Err(e) => {
                error!(component = e.component().as_str(), error = %e, "workflow failed")
            }
        }
        result
    }

    async fn execute(
        &self,
        request: &MeterRequest,
        solver: &mut dyn CaptchaSolver,
        session_slot: &mut Option<Box<dyn PortalSession>>,
    ) -> WorkflowResult {
        // 1. 拿隧道；已在运行则直接复用
        let handle = self.tunnel.start().await?;

        // 2. 有界等待隧道就绪
        self.tunnel
            .await_ready(&handle, self.options.ready_timeout)
            .await?;

        // 3. 即将创建的会话走隧道的本地端点
        let mut router = ProxyRouter::new();
        router.configure(handle.proxy.clone());

        // 4. 建会话并登录
        let session = session_slot.insert(self.factory.open(&router).await?);
        if session.begin_login().await? {
            self.captcha_login(session.as_mut(), solver).await?;
        } else {
            session.login().await?;
        }

        // 门户会拒绝紧跟登录的请求（观察到的服务端怪癖），稍作等待
        if !self.options.post_login_delay.is_zero() {
            sleep(self.options.post_login_delay).await;
        }

        // 5. 执行调用方请求的电表操作
        match request {
            MeterRequest::Query => Ok(WorkflowOutcome::State(session.query_state().await?)),
            MeterRequest::History => {
                Ok(WorkflowOutcome::History(session.list_recharges().await?))
            }
            MeterRequest::Recharge { room, kwh } => {
                let room = match room {
                    Some(room) => room.clone(),
                    None => session.resolve_own_room().await?,
                };
                session.recharge(&room, *kwh).await?;

                // 取最新一条账单作为回执，服务端按最近在前返回
                let receipt = session
                    .list_recharges()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        WorkflowError::UnexpectedResponse(
                            "recharge accepted but history came back empty".to_string(),
                        )
                    })?;
                Ok(WorkflowOutcome::Recharged(receipt))
            }
        }
    }

    /// 验证码登录循环，提交次数有上限，防止静默死循环
    async fn captcha_login(
        &self,
        session: &mut dyn PortalSession,
        solver: &mut dyn CaptchaSolver,
    ) -> Result<(), WorkflowError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let challenge = session.captcha_image().await?;
            let code = solver.solve(&challenge).await?;
            match session.submit_captcha(&code).await {
                Ok(()) => return Ok(()),
                Err(WorkflowError::CaptchaRejected) if attempt < self.options.captcha_attempts => {
                    warn!(attempt, "captcha rejected, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use chrono::NaiveDate;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;
    use crate::config::env::TunnelConfig;
    use crate::domain::tunnel::{ProxyEndpoint, TunnelEnv, TunnelStatus};
    use crate::error::Component;
    use crate::infra::docker::ContainerSpec;

    #[derive(Default)]
    struct FakeRuntime {
        launches: AtomicU32,
        stops: AtomicU32,
        running: AsyncMutex<Option<String>>,
    }

    #[async_trait]
    impl ContainerRuntime for Arc<FakeRuntime> {
        async fn engine_available(&self) -> bool {
            true
        }

        async fn running_container(&self, _name: &str) -> Result<Option<String>, String> {
            Ok(self.running.lock().await.clone())
        }

        async fn remove(&self, _name: &str) {}

        async fn launch(&self, _spec: &ContainerSpec) -> Result<String, String> {
            let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("container-{}", n);
            *self.running.lock().await = Some(id.clone());
            Ok(id)
        }

        async fn stop(&self, _name: &str) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            *self.running.lock().await = None;
        }
    }

    /// 每一步可以单独注入失败的门户会话
    #[derive(Clone, Default)]
    struct FakePlan {
        captcha_required: bool,
        login_fails: bool,
        recharge_rejects: Option<String>,
        history: Vec<RechargeRecord>,
        own_room: Option<RoomIdentity>,
    }

    struct FakeSession {
        plan: FakePlan,
        counters: Arc<Counters>,
    }

    #[derive(Default)]
    struct Counters {
        opened: AtomicU32,
        captcha_submits: AtomicU32,
        logouts: AtomicU32,
    }

    #[async_trait]
    impl PortalSession for FakeSession {
        async fn begin_login(&mut self) -> Result<bool, WorkflowError> {
            Ok(self.plan.captcha_required)
        }

        async fn captcha_image(&mut self) -> Result<CaptchaChallenge, WorkflowError> {
            Ok(CaptchaChallenge {
                image: vec![0xff, 0xd8],
            })
        }

        async fn submit_captcha(&mut self, _code: &str) -> Result<(), WorkflowError> {
            self.counters.captcha_submits.fetch_add(1, Ordering::SeqCst);
            Err(WorkflowError::CaptchaRejected)
        }

        async fn login(&mut self) -> Result<(), WorkflowError> {
            if self.plan.login_fails {
                Err(WorkflowError::AuthFailed(
                    crate::error::AuthFailKind::BadCredentials,
                ))
            } else {
                Ok(())
            }
        }

        async fn logout(&mut self) {
            self.counters.logouts.fetch_add(1, Ordering::SeqCst);
        }

        async fn query_state(&self) -> Result<MeterState, WorkflowError> {
            Ok(MeterState {
                recharges: 5,
                remaining_kwh: 12.5,
                power_w: 100,
                voltage_v: 220,
                power_factor: 0.98,
                limit_w: 500,
                state_code: 1,
            })
        }

        async fn list_recharges(&self) -> Result<Vec<RechargeRecord>, WorkflowError> {
            Ok(self.plan.history.clone())
        }

        async fn resolve_own_room(&self) -> Result<RoomIdentity, WorkflowError> {
            self.plan.own_room.clone().ok_or(WorkflowError::RoomNotFound)
        }

        async fn recharge(&self, _room: &RoomIdentity, kwh: i64) -> Result<(), WorkflowError> {
            if kwh <= 0 {
                return Err(WorkflowError::InvalidAmount(kwh));
            }
            match &self.plan.recharge_rejects {
                Some(msg) => Err(WorkflowError::ApiRejected(msg.clone())),
                None => Ok(()),
            }
        }
    }

    struct FakeFactory {
        plan: FakePlan,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn open(
            &self,
            _router: &ProxyRouter,
        ) -> Result<Box<dyn PortalSession>, WorkflowError> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                plan: self.plan.clone(),
                counters: self.counters.clone(),
            }))
        }
    }

    fn record(order_id: i64) -> RechargeRecord {
        RechargeRecord {
            order_id,
            kind: "微信".to_string(),
            amount_money: 10.0,
            quantity_kwh: 20,
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
        }
    }

    struct Harness {
        runtime: Arc<FakeRuntime>,
        counters: Arc<Counters>,
        orchestrator: Orchestrator<Arc<FakeRuntime>, FakeFactory>,
        _listener: tokio::net::TcpListener,
    }

    async fn harness(plan: FakePlan) -> Harness {
        // 真实监听者喂给就绪探测
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let runtime = Arc::new(FakeRuntime::default());
        let counters = Arc::new(Counters::default());
        let config = TunnelConfig {
            container_name: "easyconnect_vpn".into(),
            image: "hagb/docker-easyconnect:cli".into(),
            env: TunnelEnv {
                server_url: "https://vpn.example.edu".into(),
                username: "u".into(),
                password: "p".into(),
                client_version: "7.6.3".into(),
            },
            socks: ProxyEndpoint::new("127.0.0.1", port),
            ready_timeout: Duration::from_secs(2),
            settle_secs: 0,
        };
        let tunnel = TunnelProvider::new(&config, runtime.clone());
        let factory = FakeFactory {
            plan,
            counters: counters.clone(),
        };
        let options = WorkflowOptions {
            ready_timeout: Duration::from_secs(2),
            post_login_delay: Duration::ZERO,
            captcha_attempts: 3,
        };

        Harness {
            runtime,
            counters,
            orchestrator: Orchestrator::new(tunnel, factory, options),
            _listener: listener,
        }
    }

    struct NoopSolver;

    #[async_trait]
    impl CaptchaSolver for NoopSolver {
        async fn solve(&mut self, _challenge: &CaptchaChallenge) -> Result<String, WorkflowError> {
            Ok("0000".to_string())
        }
    }

    #[tokio::test]
    async fn test_recharge_success_returns_receipt() {
        let h = harness(FakePlan {
            history: vec![record(42), record(41)],
            ..Default::default()
        })
        .await;

        let outcome = h
            .orchestrator
            .run(
                MeterRequest::Recharge {
                    room: Some(RoomIdentity::new("C3", "302")),
                    kwh: 10,
                },
                &mut NoopSolver,
            )
            .await
            .unwrap();

        match outcome {
            WorkflowOutcome::Recharged(receipt) => assert_eq!(receipt.order_id, 42),
            other => panic!("expected Recharged, got {:?}", other),
        }
        // 成功路径也要完成清理
        assert_eq!(h.runtime.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.counters.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recharge_own_room_resolves_identity() {
        let h = harness(FakePlan {
            history: vec![record(7)],
            own_room: Some(RoomIdentity::new("C1", "101")),
            ..Default::default()
        })
        .await;

        let outcome = h
            .orchestrator
            .run(MeterRequest::Recharge { room: None, kwh: 5 }, &mut NoopSolver)
            .await
            .unwrap();
        assert!(matches!(outcome, WorkflowOutcome::Recharged(_)));
    }

    #[tokio::test]
    async fn test_cleanup_runs_when_login_fails() {
        let h = harness(FakePlan {
            login_fails: true,
            ..Default::default()
        })
        .await;

        let result = h
            .orchestrator
            .run(MeterRequest::Query, &mut NoopSolver)
            .await;

        assert!(matches!(result, Err(WorkflowError::AuthFailed(_))));
        assert_eq!(h.runtime.stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.orchestrator.tunnel.status().await.unwrap(),
            TunnelStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_cleanup_runs_when_recharge_rejected() {
        let h = harness(FakePlan {
            recharge_rejects: Some("insufficient balance".to_string()),
            ..Default::default()
        })
        .await;

        let result = h
            .orchestrator
            .run(
                MeterRequest::Recharge {
                    room: Some(RoomIdentity::new("C3", "302")),
                    kwh: 10,
                },
                &mut NoopSolver,
            )
            .await;

        match result {
            Err(err) => {
                assert_eq!(err.component(), Component::Meter);
                match err {
                    WorkflowError::ApiRejected(msg) => assert_eq!(msg, "insufficient balance"),
                    other => panic!("expected ApiRejected, got {:?}", other),
                }
            }
            Ok(_) => panic!("expected failure"),
        }
        // 登出与停隧道都只执行一次
        assert_eq!(h.counters.logouts.load(Ordering::SeqCst), 1);
        assert_eq!(h.runtime.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_captcha_gives_up_after_three_attempts() {
        let h = harness(FakePlan {
            captcha_required: true,
            ..Default::default()
        })
        .await;

        let result = h
            .orchestrator
            .run(MeterRequest::Query, &mut NoopSolver)
            .await;

        assert!(matches!(result, Err(WorkflowError::CaptchaRejected)));
        assert_eq!(h.counters.captcha_submits.load(Ordering::SeqCst), 3);
        assert_eq!(h.runtime.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ready_timeout_skips_session_but_still_cleans_up() {
        // 1 端口上没有监听者，就绪探测必然超时
        let runtime = Arc::new(FakeRuntime::default());
        let counters = Arc::new(Counters::default());
        let config = TunnelConfig {
            container_name: "easyconnect_vpn".into(),
            image: "hagb/docker-easyconnect:cli".into(),
            env: TunnelEnv {
                server_url: "https://vpn.example.edu".into(),
                username: "u".into(),
                password: "p".into(),
                client_version: "7.6.3".into(),
            },
            socks: ProxyEndpoint::new("127.0.0.1", 1),
            ready_timeout: Duration::from_millis(200),
            settle_secs: 0,
        };
        let orchestrator = Orchestrator::new(
            TunnelProvider::new(&config, runtime.clone()),
            FakeFactory {
                plan: FakePlan::default(),
                counters: counters.clone(),
            },
            WorkflowOptions {
                ready_timeout: Duration::from_millis(200),
                post_login_delay: Duration::ZERO,
                captcha_attempts: 3,
            },
        );

        let result = orchestrator.run(MeterRequest::Query, &mut NoopSolver).await;

        assert!(matches!(result, Err(WorkflowError::TunnelTimeout(_))));
        // 会话从未建立，但隧道照样被停掉
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.stops.load(Ordering::SeqCst), 1);
    }
}
