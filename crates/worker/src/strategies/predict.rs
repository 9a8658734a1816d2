use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use mltask_core::models::{
    ActionName, MlInputDataset, MlOutput, MlTask, MlTaskRequest, MlTaskResponse,
    PredictionRequest, TaskState, TaskType,
};
use mltask_core::traits::{DatasetHandler, MlEngine, ModelDeployer, ModelStore};
use mltask_core::{MlResult, MlTaskError};

use crate::runner::{RunnerContext, TaskExecutionStrategy};

/// 预测任务
pub struct PredictStrategy {
    engine: Arc<dyn MlEngine>,
    dataset_handler: Arc<dyn DatasetHandler>,
    model_store: Arc<dyn ModelStore>,
    model_deployer: Arc<dyn ModelDeployer>,
}

impl PredictStrategy {
    pub fn new(
        engine: Arc<dyn MlEngine>,
        dataset_handler: Arc<dyn DatasetHandler>,
        model_store: Arc<dyn ModelStore>,
        model_deployer: Arc<dyn ModelDeployer>,
    ) -> Self {
        Self {
            engine,
            dataset_handler,
            model_store,
            model_deployer,
        }
    }

    async fn predict(
        &self,
        request: &PredictionRequest,
        task: &MlTask,
        context: &RunnerContext,
    ) -> MlResult<MlTaskResponse> {
        let model_id = request.model_id.as_deref().ok_or_else(|| {
            MlTaskError::InvalidRequest("model id is required for prediction".to_string())
        })?;
        let model = self
            .model_store
            .get_model(model_id)
            .await?
            .ok_or_else(|| MlTaskError::ModelNotFound {
                model_id: model_id.to_string(),
            })?;

        // 远程推理和文本输入由引擎直接读取，不需要转换成表格
        let data = match &request.input.input_dataset {
            Some(dataset @ (MlInputDataset::DataFrame { .. } | MlInputDataset::SearchQuery { .. })) => {
                Some(self.dataset_handler.resolve(dataset).await?)
            }
            _ => None,
        };

        let engine = Arc::clone(&self.engine);
        let input = request.input.clone();
        let engine_model = model.clone();
        let mut output = context
            .run_blocking(move || engine.predict(&input, data.as_ref(), &engine_model))
            .await?;

        if let Some(interface) = &model.interface {
            interface.validate_output(&output)?;
        }
        if let MlOutput::Prediction { task_id, .. } = &mut output {
            *task_id = Some(task.task_id.clone());
        }
        output.mark_status(TaskState::Completed);
        Ok(MlTaskResponse::new(output))
    }
}

#[async_trait]
impl TaskExecutionStrategy for PredictStrategy {
    type Request = PredictionRequest;
    type Response = MlTaskResponse;

    fn action(&self) -> ActionName {
        ActionName::Predict
    }

    /// 远程推理模型只能分派到已加载该模型的节点，未加载时按配置自动部署
    async fn candidate_nodes(
        &self,
        request: &PredictionRequest,
        context: &RunnerContext,
    ) -> MlResult<Option<Vec<String>>> {
        let function_name = request.function_name();
        let Some(model_id) = request.model_id.as_deref() else {
            return Ok(None);
        };
        if !function_name.is_remote() {
            return Ok(None);
        }

        let deployed = self.model_deployer.deployed_nodes(model_id).await?;
        if !deployed.is_empty() {
            return Ok(Some(deployed));
        }
        if !context.config.auto_deploy_enabled {
            return Err(MlTaskError::InvalidRequest(format!(
                "Model not ready yet. Please deploy model {model_id} first"
            )));
        }

        let eligible = context.dispatcher.eligible_nodes(function_name).await?;
        info!("模型 {} 尚未加载，自动部署到 {:?}", model_id, eligible);
        let deployed = self.model_deployer.deploy_model(model_id, &eligible).await?;
        if deployed.is_empty() {
            return Err(MlTaskError::DispatchFailed(format!(
                "模型 {model_id} 自动部署失败，没有节点加载成功"
            )));
        }
        Ok(Some(deployed))
    }

    async fn execute_locally(
        &self,
        request: PredictionRequest,
        context: Arc<RunnerContext>,
    ) -> MlResult<MlTaskResponse> {
        let input_type = request.input.input_dataset.as_ref().map(|d| d.input_type());
        let task = context
            .new_task(TaskType::Prediction, &request)
            .with_input_type(input_type);
        let task = context.start_task(task)?;

        let result = self.predict(&request, &task, &context).await;
        context.finish_task(&task, result, |_| None).await
    }
}
