use std::sync::Arc;

use async_trait::async_trait;

use mltask_core::models::{
    ActionName, DataFrame, MlOutput, MlTaskResponse, TaskState, TaskType, TrainingRequest,
};
use mltask_core::traits::{DatasetHandler, MlEngine};
use mltask_core::MlResult;

use super::{resolve_input_data, spawn_async_task};
use crate::runner::{RunnerContext, TaskExecutionStrategy};

/// 训练后直接在同一数据上预测，模型不保存
#[derive(Clone)]
pub struct TrainAndPredictStrategy {
    engine: Arc<dyn MlEngine>,
    dataset_handler: Arc<dyn DatasetHandler>,
}

impl TrainAndPredictStrategy {
    pub fn new(engine: Arc<dyn MlEngine>, dataset_handler: Arc<dyn DatasetHandler>) -> Self {
        Self {
            engine,
            dataset_handler,
        }
    }

    async fn train_and_predict(
        &self,
        request: &TrainingRequest,
        context: &RunnerContext,
    ) -> MlResult<MlOutput> {
        let data = resolve_input_data(self.dataset_handler.as_ref(), &request.input).await?;
        let engine = Arc::clone(&self.engine);
        let input = request.input.clone();
        context
            .run_blocking(move || engine.train_and_predict(&input, &data))
            .await
    }
}

#[async_trait]
impl TaskExecutionStrategy for TrainAndPredictStrategy {
    type Request = TrainingRequest;
    type Response = MlTaskResponse;

    fn action(&self) -> ActionName {
        ActionName::TrainAndPredict
    }

    async fn execute_locally(
        &self,
        request: TrainingRequest,
        context: Arc<RunnerContext>,
    ) -> MlResult<MlTaskResponse> {
        let input_type = request.input.input_dataset.as_ref().map(|d| d.input_type());
        let task = context
            .new_task(TaskType::TrainingAndPrediction, &request)
            .with_input_type(input_type);

        if request.is_async {
            let this = self.clone();
            let task_id = spawn_async_task(context, task, move |context| async move {
                this.train_and_predict(&request, &context).await.map(|_| None)
            })
            .await?;
            return Ok(MlTaskResponse::new(MlOutput::Prediction {
                task_id: Some(task_id),
                status: TaskState::Created,
                prediction_result: DataFrame::default(),
            }));
        }

        let task = context.start_task(task)?;
        let result = self.train_and_predict(&request, &context).await;
        let mut output = context.finish_task(&task, result, |_| None).await?;

        if let MlOutput::Prediction { task_id, .. } = &mut output {
            *task_id = Some(task.task_id.clone());
        }
        output.mark_status(TaskState::Completed);
        Ok(MlTaskResponse::new(output))
    }
}
