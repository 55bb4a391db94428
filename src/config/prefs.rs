//! 用户偏好记录
//!
//! 付费账户、VPN 账户、默认充值三类记录共用同一个平面键值结构，
//! 按 kind 参数化文件名、必填键和展示文案，读写各一条路径。
//! 核心在工作流启动时读取一次，运行期间不回写。

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

/// 偏好记录类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefKind {
    /// 门户付费账户
    Payer,
    /// VPN 登录账户
    TunnelLogin,
    /// 默认充值目标
    DefaultCharge,
}

impl PrefKind {
    /// 记录文件名，沿用既有数据文件
    pub fn file_name(&self) -> &'static str {
        match self {
            PrefKind::Payer => "payer_info.json",
            PrefKind::TunnelLogin => "vpn_info.json",
            PrefKind::DefaultCharge => "charge_info.json",
        }
    }

    /// 必填键，全部非空才算记录完整
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            PrefKind::Payer | PrefKind::TunnelLogin => &["username", "password"],
            PrefKind::DefaultCharge => &["building_code", "room", "amount"],
        }
    }
}

/// 一条平面键值偏好记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefRecord {
    pub kind: PrefKind,
    fields: BTreeMap<String, String>,
}

impl PrefRecord {
    pub fn new(kind: PrefKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// 所有必填键都存在且非空
    pub fn is_complete(&self) -> bool {
        self.kind
            .required_keys()
            .iter()
            .all(|k| self.get(k).map(|v| !v.is_empty()).unwrap_or(false))
    }

    /// 给前端展示的一行摘要，密码不出现
    pub fn summary(&self) -> String {
        let get = |k: &str| self.get(k).unwrap_or("");
        match self.kind {
            PrefKind::Payer => format!("付费账户: {}", get("username")),
            PrefKind::TunnelLogin => format!("VPN 默认登录账户: {}", get("username")),
            PrefKind::DefaultCharge => format!(
                "充值房间: {}-{}, 默认充值度数: {}",
                get("building_code"),
                get("room"),
                get("amount")
            ),
        }
    }
}

/// 偏好记录存取
pub struct PrefStore {
    dir: PathBuf,
}

impl PrefStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, kind: PrefKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// 读取一条记录，文件不存在返回 None
    pub fn load(&self, kind: PrefKind) -> io::Result<Option<PrefRecord>> {
        let path = self.path_for(kind);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let parsed: BTreeMap<String, serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // 数值也存过（历史数据里 amount 是数字），统一转成字符串
        let fields = parsed
            .into_iter()
            .map(|(k, v)| {
                let s = match v {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k, s)
            })
            .collect();

        Ok(Some(PrefRecord { kind, fields }))
    }

    /// 写入一条记录，目录不存在时创建
    pub fn save(&self, record: &PrefRecord) -> io::Result<()> {
        if !self.dir.as_path().exists() {
            fs::create_dir_all(&self.dir)?;
        }
        let json = serde_json::to_string_pretty(&record.fields)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(self.path_for(record.kind), json)
    }
}
