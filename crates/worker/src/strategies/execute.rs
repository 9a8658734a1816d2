use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use mltask_core::models::{ActionName, ExecuteRequest, ExecuteResponse};
use mltask_core::traits::MlEngine;
use mltask_core::MlResult;

use crate::runner::{RunnerContext, TaskExecutionStrategy};

/// 无状态执行，不登记任务，始终在接收请求的节点上执行
pub struct ExecuteStrategy {
    engine: Arc<dyn MlEngine>,
}

impl ExecuteStrategy {
    pub fn new(engine: Arc<dyn MlEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl TaskExecutionStrategy for ExecuteStrategy {
    type Request = ExecuteRequest;
    type Response = ExecuteResponse;

    fn action(&self) -> ActionName {
        ActionName::Execute
    }

    fn prefers_local(&self) -> bool {
        true
    }

    async fn execute_locally(
        &self,
        request: ExecuteRequest,
        context: Arc<RunnerContext>,
    ) -> MlResult<ExecuteResponse> {
        let function_name = request.function_name;
        let engine = Arc::clone(&self.engine);
        let input = request.input;

        let output = context
            .run_blocking(move || engine.execute(function_name, &input))
            .await?;
        debug!(function = %function_name, "执行完成");

        Ok(ExecuteResponse {
            function_name,
            output,
        })
    }
}
