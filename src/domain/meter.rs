//! 电表相关领域模型
//!
//! 计费 API 的所有响应都是 `{success: bool, info: ...}` 信封，
//! 这里集中做信封校验与行解码，服务层只拿到类型化的数据。

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;

/// 电表状态快照
///
/// 只读快照，不做缓存，每次读取都发起新查询。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeterState {
    /// 累计充值次数
    pub recharges: i64,
    /// 剩余电量（度）
    #[serde(rename = "reskwh")]
    pub remaining_kwh: f64,
    /// 当前功率（W）
    #[serde(rename = "P")]
    pub power_w: i64,
    /// 电压（V）
    #[serde(rename = "U")]
    pub voltage_v: i64,
    /// 功率因数
    #[serde(rename = "FP")]
    pub power_factor: f64,
    /// 限定功率（W）
    #[serde(rename = "limit")]
    pub limit_w: i64,
    /// 电表状态码
    #[serde(rename = "state")]
    pub state_code: i64,
}

/// 一条历史充值记录，服务端既成事实，不可变
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RechargeRecord {
    #[serde(rename = "oid")]
    pub order_id: i64,
    /// 充值类型
    #[serde(rename = "type")]
    pub kind: String,
    /// 充值金额（元）
    #[serde(rename = "money")]
    pub amount_money: f64,
    /// 充值度数
    #[serde(rename = "quantity")]
    pub quantity_kwh: i64,
    #[serde(rename = "datetime", deserialize_with = "de_portal_datetime")]
    pub timestamp: NaiveDateTime,
}

/// 宿舍标识
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomIdentity {
    /// 楼号代码，如 "C1"
    #[serde(rename = "building")]
    pub building_code: String,
    /// 房间号
    pub room: String,
}

impl RoomIdentity {
    pub fn new(building_code: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            building_code: building_code.into(),
            room: room.into(),
        }
    }
}

impl std::fmt::Display for RoomIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.building_code, self.room)
    }
}

/// 宿舍楼显示名 → 楼号代码
const BUILDINGS: &[(&str, &str)] = &[
    ("一号学生公寓", "C1"),
    ("二号学生公寓", "C2"),
    ("三号学生公寓", "C3"),
    ("四号学生公寓", "C4"),
    ("五号学生公寓", "C5"),
    ("六号学生公寓", "C6"),
    ("七号学生公寓", "C7"),
    ("八号学生公寓", "C8"),
    ("九号学生公寓", "C9"),
    ("留学生及教师公寓", "B6"),
];

/// 按显示名查楼号代码
pub fn building_code(name: &str) -> Option<&'static str> {
    BUILDINGS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, code)| *code)
}

/// API 响应信封
#[derive(Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    info: Value,
}

/// 校验信封，成功时返回 `info`，失败时带上服务端消息
fn unwrap_envelope(body: &str) -> Result<Value, WorkflowError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| WorkflowError::UnexpectedResponse(format!("not an api envelope: {}", e)))?;

    if envelope.success {
        Ok(envelope.info)
    } else {
        let message = match envelope.info {
            Value::String(s) if !s.is_empty() => s,
            _ => "api returned an error".to_string(),
        };
        Err(WorkflowError::ApiRejected(message))
    }
}

/// 解码 `info` 数组为类型化的行
pub fn decode_rows<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, WorkflowError> {
    let info = unwrap_envelope(body)?;
    serde_json::from_value(info)
        .map_err(|e| WorkflowError::UnexpectedResponse(format!("bad info payload: {}", e)))
}

/// 解码单行响应（取 `info` 数组第一个元素）
pub fn decode_first<T: DeserializeOwned>(body: &str) -> Result<Option<T>, WorkflowError> {
    Ok(decode_rows(body)?.into_iter().next())
}

/// 只校验 success 标志，用于提交类接口
pub fn acknowledge(body: &str) -> Result<(), WorkflowError> {
    unwrap_envelope(body).map(|_| ())
}

/// 门户的 `datetime` 字段是 ISO-8601，但分隔符既见过 `T` 也见过空格
fn parse_portal_datetime(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
}

fn de_portal_datetime<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_portal_datetime(&raw).map_err(serde::de::Error::custom)
}
