use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use mltask_core::models::{
    ActionName, MlOutput, MlTaskResponse, TaskState, TaskType, TrainingRequest,
};
use mltask_core::traits::{DatasetHandler, MlEngine, ModelStore};
use mltask_core::MlResult;

use super::{resolve_input_data, spawn_async_task};
use crate::runner::{RunnerContext, TaskExecutionStrategy};

/// 训练任务
#[derive(Clone)]
pub struct TrainingStrategy {
    engine: Arc<dyn MlEngine>,
    dataset_handler: Arc<dyn DatasetHandler>,
    model_store: Arc<dyn ModelStore>,
}

impl TrainingStrategy {
    pub fn new(
        engine: Arc<dyn MlEngine>,
        dataset_handler: Arc<dyn DatasetHandler>,
        model_store: Arc<dyn ModelStore>,
    ) -> Self {
        Self {
            engine,
            dataset_handler,
            model_store,
        }
    }

    /// 解析数据、训练并保存模型，返回模型ID
    async fn train(&self, request: &TrainingRequest, context: &RunnerContext) -> MlResult<String> {
        let data = resolve_input_data(self.dataset_handler.as_ref(), &request.input).await?;

        let engine = Arc::clone(&self.engine);
        let input = request.input.clone();
        let model = context
            .run_blocking(move || engine.train(&input, &data))
            .await?;

        let model_id = self.model_store.save_model(&model).await?;
        info!(
            function = %request.input.function_name,
            "模型训练完成, model_id: {}", model_id
        );
        Ok(model_id)
    }
}

#[async_trait]
impl TaskExecutionStrategy for TrainingStrategy {
    type Request = TrainingRequest;
    type Response = MlTaskResponse;

    fn action(&self) -> ActionName {
        ActionName::Train
    }

    async fn execute_locally(
        &self,
        request: TrainingRequest,
        context: Arc<RunnerContext>,
    ) -> MlResult<MlTaskResponse> {
        let input_type = request.input.input_dataset.as_ref().map(|d| d.input_type());
        let task = context
            .new_task(TaskType::Training, &request)
            .with_input_type(input_type);

        if request.is_async {
            let this = self.clone();
            let task_id = spawn_async_task(context, task, move |context| async move {
                this.train(&request, &context).await.map(Some)
            })
            .await?;
            return Ok(MlTaskResponse::new(MlOutput::Training {
                model_id: None,
                task_id: Some(task_id),
                status: TaskState::Created,
            }));
        }

        let task = context.start_task(task)?;
        let result = self.train(&request, &context).await;
        let model_id = context
            .finish_task(&task, result, |model_id| Some(model_id.clone()))
            .await?;

        Ok(MlTaskResponse::new(MlOutput::Training {
            model_id: Some(model_id),
            task_id: Some(task.task_id),
            status: TaskState::Completed,
        }))
    }
}
