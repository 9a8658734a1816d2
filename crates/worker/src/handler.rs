use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use mltask_core::models::{ActionName, TransportRequest};
use mltask_core::traits::TransportHandler;
use mltask_core::MlResult;

use crate::runner::{TaskExecutionStrategy, TaskRunner};
use crate::strategies::{ExecuteStrategy, PredictStrategy, TrainAndPredictStrategy, TrainingStrategy};

/// 接收其他节点转发来的任务请求，按动作名称交给对应的执行器
pub struct TaskActionHandler {
    predict: Arc<TaskRunner<PredictStrategy>>,
    train: Arc<TaskRunner<TrainingStrategy>>,
    train_and_predict: Arc<TaskRunner<TrainAndPredictStrategy>>,
    execute: Arc<TaskRunner<ExecuteStrategy>>,
}

impl TaskActionHandler {
    pub fn new(
        predict: Arc<TaskRunner<PredictStrategy>>,
        train: Arc<TaskRunner<TrainingStrategy>>,
        train_and_predict: Arc<TaskRunner<TrainAndPredictStrategy>>,
        execute: Arc<TaskRunner<ExecuteStrategy>>,
    ) -> Self {
        Self {
            predict,
            train,
            train_and_predict,
            execute,
        }
    }
}

async fn run_payload<S: TaskExecutionStrategy>(runner: &TaskRunner<S>, payload: Value) -> MlResult<Value> {
    let request: S::Request = serde_json::from_value(payload)?;
    let response = runner.run(request).await?;
    Ok(serde_json::to_value(response)?)
}

#[async_trait]
impl TransportHandler for TaskActionHandler {
    async fn handle(&self, request: TransportRequest) -> MlResult<Value> {
        debug!("收到转发请求: {}", request.action.transport_action());
        match request.action {
            ActionName::Predict => run_payload(&self.predict, request.payload).await,
            ActionName::Train => run_payload(&self.train, request.payload).await,
            ActionName::TrainAndPredict => {
                run_payload(&self.train_and_predict, request.payload).await
            }
            ActionName::Execute => run_payload(&self.execute, request.payload).await,
        }
    }
}
