//! 电表客户端
//!
//! 计费 API 的四个操作：查状态、查历史账单、提交充值、查本人宿舍。
//! 所有请求带 `_dc` 时间戳参数穿透缓存层；每个响应独立校验 success 标志。

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::meter::{
    acknowledge, decode_first, decode_rows, MeterState, RechargeRecord, RoomIdentity,
};
use crate::error::WorkflowError;
use crate::services::proxy::HttpSession;

const QUERY_PATH: &str = "api/charge/query";
const HISTORY_PATH: &str = "api/charge/user_account";
const SUBMIT_PATH: &str = "api/charge/Submit";
const GET_ROOM_PATH: &str = "api/charge/GetRoom";

/// 电表客户端
///
/// 要求一个已认证的会话；会话的生命周期由认证层掌管，
/// 本客户端不把会话带出登录 / 登出窗口之外。
pub struct MeterClient {
    session: HttpSession,
}

impl MeterClient {
    pub fn new(session: HttpSession) -> Self {
        Self { session }
    }

    fn dc() -> String {
        Utc::now().timestamp().to_string()
    }

    async fn get_text(&self, path: &str) -> Result<String, WorkflowError> {
        let body = self
            .session
            .client()
            .get(self.session.url(path))
            .query(&[("_dc", Self::dc())])
            .send()
            .await?
            .text()
            .await?;
        Ok(body)
    }

    /// 读取电表状态，一次新查询，不走缓存
    pub async fn query_state(&self) -> Result<MeterState, WorkflowError> {
        let body = self.get_text(QUERY_PATH).await?;
        decode_first(&body)?.ok_or_else(|| {
            WorkflowError::UnexpectedResponse("meter query returned empty info".to_string())
        })
    }

    /// 历史充值账单，有限列表，顺序由服务端定义
    pub async fn list_recharges(&self) -> Result<Vec<RechargeRecord>, WorkflowError> {
        let body = self.get_text(HISTORY_PATH).await?;
        decode_rows(&body)
    }

    /// 查本人宿舍
    pub async fn resolve_own_room(&self) -> Result<RoomIdentity, WorkflowError> {
        let body = self.get_text(GET_ROOM_PATH).await?;
        decode_first(&body)?.ok_or(WorkflowError::RoomNotFound)
    }

    /// 提交充值
    ///
    /// 度数必须为正整数，非法输入在发起任何网络请求之前就被拒绝。
    pub async fn recharge(&self, room: &RoomIdentity, kwh: i64) -> Result<(), WorkflowError> {
        if kwh <= 0 {
            return Err(WorkflowError::InvalidAmount(kwh));
        }

        debug!(room = %room, kwh = kwh, "submitting recharge");
        let body = self
            .session
            .client()
            .post(self.session.url(SUBMIT_PATH))
            .query(&[("_dc", Self::dc())])
            .form(&[
                ("building", room.building_code.as_str()),
                ("room", room.room.as_str()),
                ("kwh", &kwh.to_string()),
            ])
            .send()
            .await?
            .text()
            .await?;

        acknowledge(&body)?;
        info!(room = %room, kwh = kwh, "recharge accepted");
        Ok(())
    }

    /// 给本人宿舍充值，返回解析出的宿舍
    pub async fn recharge_own_room(&self, kwh: i64) -> Result<RoomIdentity, WorkflowError> {
        if kwh <= 0 {
            return Err(WorkflowError::InvalidAmount(kwh));
        }
        let room = self.resolve_own_room().await?;
        self.recharge(&room, kwh).await?;
        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::proxy::ProxyRouter;

    fn offline_client() -> MeterClient {
        // 9 端口上没有服务；能拿到 InvalidAmount 就证明校验先于网络请求
        MeterClient::new(ProxyRouter::new().build_session("http://127.0.0.1:9").unwrap())
    }

    #[tokio::test]
    async fn test_recharge_rejects_zero_kwh_before_network() {
        let client = offline_client();
        let room = RoomIdentity::new("C3", "302");
        match client.recharge(&room, 0).await {
            Err(WorkflowError::InvalidAmount(0)) => {}
            other => panic!("expected InvalidAmount, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recharge_rejects_negative_kwh_before_network() {
        let client = offline_client();
        let room = RoomIdentity::new("C3", "302");
        assert!(matches!(
            client.recharge(&room, -5).await,
            Err(WorkflowError::InvalidAmount(-5))
        ));
    }

    #[tokio::test]
    async fn test_recharge_own_room_validates_before_lookup() {
        let client = offline_client();
        assert!(matches!(
            client.recharge_own_room(0).await,
            Err(WorkflowError::InvalidAmount(0))
        ));
    }
}
