use async_trait::async_trait;

use crate::models::TransportRequest;
use crate::MlResult;

/// 节点间转发协作者
///
/// 远端返回的失败与本地错误走同一个 `Err` 通道。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_request(
        &self,
        target_node: &str,
        request: TransportRequest,
    ) -> MlResult<serde_json::Value>;
}

/// 接收转发请求的一端
#[async_trait]
pub trait TransportHandler: Send + Sync {
    async fn handle(&self, request: TransportRequest) -> MlResult<serde_json::Value>;
}
