use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use mltask_core::models::TransportRequest;
use mltask_core::traits::{Transport, TransportHandler};
use mltask_core::{MlResult, MlTaskError};

/// 进程内传输层
///
/// 节点把自己的处理器注册到同一个实例上，转发请求直接调用目标节点的处理器。
/// 请求在投递前会序列化一次，与跨进程传输的行为保持一致。
#[derive(Default)]
pub struct LocalTransport {
    handlers: DashMap<String, Arc<dyn TransportHandler>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node_id: impl Into<String>, handler: Arc<dyn TransportHandler>) {
        let node_id = node_id.into();
        info!("节点 {} 注册到本地传输层", node_id);
        self.handlers.insert(node_id, handler);
    }

    pub fn unregister(&self, node_id: &str) {
        if self.handlers.remove(node_id).is_some() {
            info!("节点 {} 已从本地传输层注销", node_id);
        }
    }

    pub fn is_registered(&self, node_id: &str) -> bool {
        self.handlers.contains_key(node_id)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send_request(&self, target_node: &str, request: TransportRequest) -> MlResult<Value> {
        // 先取出处理器再释放分片锁，避免在 await 期间持有
        let handler = self
            .handlers
            .get(target_node)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                warn!("目标节点 {} 不在线", target_node);
                MlTaskError::Transport(format!("node {target_node} is not connected"))
            })?;

        let wire = serde_json::to_vec(&request)?;
        let request: TransportRequest = serde_json::from_slice(&wire)?;
        debug!(
            "投递 {} 到节点 {} ({} 字节)",
            request.action.transport_action(),
            target_node,
            wire.len()
        );
        handler.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mltask_core::models::{ActionName, ExecuteRequest, FunctionName};
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl TransportHandler for EchoHandler {
        async fn handle(&self, request: TransportRequest) -> MlResult<Value> {
            Ok(json!({ "action": request.action.as_str(), "payload": request.payload }))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl TransportHandler for FailingHandler {
        async fn handle(&self, _request: TransportRequest) -> MlResult<Value> {
            Err(MlTaskError::Engine("remote engine failed".to_string()))
        }
    }

    fn request() -> TransportRequest {
        TransportRequest::new(
            ActionName::Execute,
            &ExecuteRequest::new(FunctionName::LocalSampleCalculator, json!({"operation": "sum"})),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_to_registered_node() {
        let transport = LocalTransport::new();
        transport.register("node-2", Arc::new(EchoHandler));

        let response = transport.send_request("node-2", request()).await.unwrap();

        assert_eq!(response["action"], "execute");
        assert_eq!(response["payload"]["input"]["operation"], "sum");
    }

    #[tokio::test]
    async fn test_unknown_node_is_transport_error() {
        let transport = LocalTransport::new();
        let result = transport.send_request("node-9", request()).await;
        assert!(matches!(result, Err(MlTaskError::Transport(_))));
    }

    #[tokio::test]
    async fn test_remote_error_is_passed_through() {
        let transport = LocalTransport::new();
        transport.register("node-2", Arc::new(FailingHandler));

        let result = transport.send_request("node-2", request()).await;

        assert!(matches!(result, Err(MlTaskError::Engine(_))));

        transport.unregister("node-2");
        assert!(!transport.is_registered("node-2"));
    }
}
