//! 容器运行时
//!
//! 隧道层通过 `ContainerRuntime` 与容器引擎交互，生产实现走 docker CLI，
//! 测试注入假引擎。核心只观察成功 / 失败和容器 ID，引擎本身视为黑盒。

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// 要启动的容器描述
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// 环境变量（可能含密码，不打日志）
    pub env: Vec<(String, String)>,
    /// 端口发布，(宿主机端口, 容器端口)，只绑定 127.0.0.1
    pub ports: Vec<(u16, u16)>,
    /// 需要的设备，如 /dev/net/tun
    pub devices: Vec<String>,
    /// 附加 capability，如 NET_ADMIN
    pub cap_add: Vec<String>,
}

impl ContainerSpec {
    /// `docker run` 参数列表
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--rm".to_string(),
        ];
        for device in &self.devices {
            args.push("--device".to_string());
            args.push(device.clone());
        }
        for cap in &self.cap_add {
            args.push("--cap-add".to_string());
            args.push(cap.clone());
        }
        for (host, container) in &self.ports {
            args.push("-p".to_string());
            args.push(format!("127.0.0.1:{}:{}", host, container));
        }
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.image.clone());
        args
    }
}

/// 容器引擎抽象
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// 引擎是否可用
    async fn engine_available(&self) -> bool;

    /// 查询真实运行状态，运行中则返回容器 ID，不做缓存
    async fn running_container(&self, name: &str) -> Result<Option<String>, String>;

    /// 强制删除同名容器，容器不存在不算错误
    async fn remove(&self, name: &str);

    /// 启动容器，返回容器 ID
    async fn launch(&self, spec: &ContainerSpec) -> Result<String, String>;

    /// 停止容器，已停止不算错误
    async fn stop(&self, name: &str);
}

/// docker CLI 实现
pub struct DockerCli;

impl DockerCli {
    async fn docker(args: &[&str]) -> Result<std::process::Output, String> {
        Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| format!("failed to run docker: {}", e))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn engine_available(&self) -> bool {
        match Self::docker(&["info"]).await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    async fn running_container(&self, name: &str) -> Result<Option<String>, String> {
        // inspect 比 ps 过滤更准确
        let output =
            Self::docker(&["inspect", "-f", "{{.State.Running}} {{.Id}}", name]).await?;
        if !output.status.success() {
            // 容器不存在
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut parts = stdout.trim().splitn(2, ' ');
        match (parts.next(), parts.next()) {
            (Some("true"), Some(id)) => Ok(Some(id.to_string())),
            _ => Ok(None),
        }
    }

    async fn remove(&self, name: &str) {
        if let Err(e) = Self::docker(&["rm", "-f", name]).await {
            debug!(container = %name, error = %e, "docker rm failed");
        }
    }

    async fn launch(&self, spec: &ContainerSpec) -> Result<String, String> {
        let args = spec.run_args();
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        debug!(container = %spec.name, image = %spec.image, "launching container");

        let output = Self::docker(&arg_refs).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("docker run failed: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn stop(&self, name: &str) {
        // 启动时带了 --rm，stop 之后容器自动删除
        match Self::docker(&["stop", name]).await {
            Ok(output) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!(container = %name, stderr = %stderr.trim(), "docker stop non-zero exit");
            }
            Err(e) => warn!(container = %name, error = %e, "docker stop failed"),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_shape() {
        let spec = ContainerSpec {
            name: "easyconnect_vpn".into(),
            image: "hagb/docker-easyconnect:cli".into(),
            env: vec![
                ("EC_VER".into(), "7.6.3".into()),
                ("CLI_OPTS".into(), "-d https://vpn -u u -p p".into()),
            ],
            ports: vec![(1080, 1080), (8888, 8888)],
            devices: vec!["/dev/net/tun".into()],
            cap_add: vec!["NET_ADMIN".into()],
        };

        let args = spec.run_args();
        assert_eq!(args[0], "run");
        assert!(args.contains(&"--rm".to_string()));
        assert!(args.contains(&"127.0.0.1:1080:1080".to_string()));
        assert!(args.contains(&"EC_VER=7.6.3".to_string()));
        // 镜像名必须排在所有选项之后
        assert_eq!(args.last().unwrap(), "hagb/docker-easyconnect:cli");
    }
}
