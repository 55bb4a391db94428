//! VPN 隧道生命周期管理
//!
//! 我们用容器跑 EasyConnect 客户端，容器对外只暴露一个本地 SOCKS 端口。
//! start 幂等：同名隧道已在运行时直接复用，不重复拉起；stop 尽力而为，
//! 从未启动或已停止都不算错误，清理阶段随时可以安全调用。

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::env::{constants, TunnelConfig};
use crate::domain::tunnel::{ProxyEndpoint, TunnelEnv, TunnelHandle, TunnelStatus};
use crate::error::WorkflowError;
use crate::infra::docker::{ContainerRuntime, ContainerSpec};

/// 容器内 SOCKS5 服务端口
const CONTAINER_SOCKS_PORT: u16 = 1080;
/// 容器内 HTTP 代理端口，一并发布便于排查
const CONTAINER_HTTP_PORT: u16 = 8888;

/// 隧道管理器
///
/// 每个逻辑隧道名对应一个实例；`lifecycle` 互斥锁串行化 start/stop，
/// 保证多个工作流并发时单例不变式仍然成立。
pub struct TunnelProvider<R: ContainerRuntime> {
    name: String,
    image: String,
    env: TunnelEnv,
    socks: ProxyEndpoint,
    settle: Duration,
    runtime: R,
    lifecycle: Mutex<()>,
}

impl<R: ContainerRuntime> TunnelProvider<R> {
    pub fn new(config: &TunnelConfig, runtime: R) -> Self {
        Self {
            name: config.container_name.clone(),
            image: config.image.clone(),
            env: config.env.clone(),
            socks: config.socks.clone(),
            settle: Duration::from_secs(config.settle_secs),
            runtime,
            lifecycle: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 隧道的本地代理端点
    pub fn proxy_endpoint(&self) -> &ProxyEndpoint {
        &self.socks
    }

    fn container_spec(&self) -> ContainerSpec {
        ContainerSpec {
            name: self.name.clone(),
            image: self.image.clone(),
            env: vec![
                ("EC_VER".to_string(), self.env.client_version.clone()),
                ("CLI_OPTS".to_string(), self.env.cli_opts()),
            ],
            ports: vec![
                (self.socks.port, CONTAINER_SOCKS_PORT),
                (CONTAINER_HTTP_PORT, CONTAINER_HTTP_PORT),
            ],
            devices: vec!["/dev/net/tun".to_string()],
            cap_add: vec!["NET_ADMIN".to_string()],
        }
    }

    /// 查询真实外部状态，不做缓存
    pub async fn status(&self) -> Result<TunnelStatus, WorkflowError> {
        let running = self
            .runtime
            .running_container(&self.name)
            .await
            .map_err(WorkflowError::TunnelStart)?;
        Ok(match running {
            Some(_) => TunnelStatus::Running,
            None => TunnelStatus::Stopped,
        })
    }

    /// 启动隧道
    ///
    /// 已在运行时返回现有 handle，不重新拉起。
    pub async fn start(&self) -> Result<TunnelHandle, WorkflowError> {
        let _guard = self.lifecycle.lock().await;

        if !self.runtime.engine_available().await {
            return Err(WorkflowError::TunnelStart(
                "container engine is not available".to_string(),
            ));
        }

        if let Some(id) = self
            .runtime
            .running_container(&self.name)
            .await
            .map_err(WorkflowError::TunnelStart)?
        {
            info!(tunnel = %self.name, "tunnel already running, reusing");
            return Ok(self.handle(id));
        }

        // 同名的残留容器会让 --name 冲突，先清掉
        self.runtime.remove(&self.name).await;

        info!(tunnel = %self.name, image = %self.image, "starting vpn container");
        let id = self
            .runtime
            .launch(&self.container_spec())
            .await
            .map_err(WorkflowError::TunnelStart)?;

        Ok(self.handle(id))
    }

    fn handle(&self, container_id: String) -> TunnelHandle {
        TunnelHandle {
            name: self.name.clone(),
            container_id,
            proxy: self.socks.clone(),
        }
    }

    /// 停止隧道，尽力而为
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        debug!(tunnel = %self.name, "stopping vpn container");
        self.runtime.stop(&self.name).await;
    }

    /// 等待隧道就绪
    ///
    /// 主动探测本地代理端口直到可拨通，超时返回 `TunnelTimeout`。
    /// 端口通了之后再静置 `settle`：docker 先发布端口，
    /// 容器内的客户端随后才完成拨号，光靠探测端口证明不了链路已通。
    pub async fn await_ready(
        &self,
        handle: &TunnelHandle,
        ready_timeout: Duration,
    ) -> Result<(), WorkflowError> {
        let interval = Duration::from_millis(constants::READY_PROBE_INTERVAL_MS);
        let deadline = Instant::now() + ready_timeout;
        let addr = handle.proxy.dial_addr();

        loop {
            match timeout(interval, TcpStream::connect(&addr)).await {
                Ok(Ok(_stream)) => {
                    debug!(tunnel = %self.name, proxy = %handle.proxy, "proxy port is dialable");
                    break;
                }
                Ok(Err(e)) => {
                    debug!(tunnel = %self.name, error = %e, "proxy port not ready yet");
                }
                Err(_) => {
                    // 连接尝试本身超时，视为未就绪
                }
            }

            if Instant::now() >= deadline {
                warn!(tunnel = %self.name, timeout = ?ready_timeout, "tunnel never became ready");
                return Err(WorkflowError::TunnelTimeout(ready_timeout));
            }
            sleep(interval).await;
        }

        if !self.settle.is_zero() {
            debug!(tunnel = %self.name, settle = ?self.settle, "waiting for vpn dial-up to settle");
            sleep(self.settle).await;
        }
        Ok(())
    }
}
