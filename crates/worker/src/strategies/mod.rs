//! 各类任务的本地执行逻辑
//!
//! - `PredictStrategy`：使用已有模型预测，远程推理模型可自动部署
//! - `TrainingStrategy`：训练并保存模型，支持异步
//! - `TrainAndPredictStrategy`：训练后直接预测，不保存模型
//! - `ExecuteStrategy`：无状态的单次执行

pub mod execute;
pub mod predict;
pub mod train_and_predict;
pub mod training;

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Map};
use tracing::{error, warn};

use mltask_core::models::task::{ERROR_FIELD, STATE_FIELD};
use mltask_core::models::{DataFrame, MlInput, MlTask, TaskState};
use mltask_core::stats::ExecutingTaskGuard;
use mltask_core::traits::DatasetHandler;
use mltask_core::{MlResult, MlTaskError};

use crate::runner::RunnerContext;

pub use execute::ExecuteStrategy;
pub use predict::PredictStrategy;
pub use train_and_predict::TrainAndPredictStrategy;
pub use training::TrainingStrategy;

/// 训练类任务总是需要输入数据，搜索查询输入在这里解析为表格
pub(crate) async fn resolve_input_data(
    handler: &dyn DatasetHandler,
    input: &MlInput,
) -> MlResult<DataFrame> {
    let dataset = input
        .input_dataset
        .as_ref()
        .ok_or_else(|| MlTaskError::InvalidRequest("input data set is required".to_string()))?;
    handler.resolve(dataset).await
}

/// 创建持久化任务后在后台执行，返回任务ID作为确认
///
/// 任务创建失败直接返回错误，不会触发完成或失败处理。
pub(crate) async fn spawn_async_task<F, Fut>(
    context: Arc<RunnerContext>,
    task: MlTask,
    job: F,
) -> MlResult<String>
where
    F: FnOnce(Arc<RunnerContext>) -> Fut + Send + 'static,
    Fut: Future<Output = MlResult<Option<String>>> + Send + 'static,
{
    let task_id = context.task_manager.create_ml_task(&task).await?;
    let task = task.with_task_id(task_id.clone());

    tokio::spawn(async move {
        let _guard = ExecutingTaskGuard::new(Arc::clone(&context.stats));
        let task = match context.start_task(task.clone()) {
            Ok(task) => task,
            Err(e) => {
                mark_failed_directly(&context, &task.task_id, &e).await;
                return;
            }
        };
        if let Err(e) = context
            .task_manager
            .update_task_state_as_running(&task.task_id, true)
            .await
        {
            warn!(task_id = %task.task_id, "写入任务运行状态失败: {}", e);
        }

        let result = job(Arc::clone(&context)).await;
        // 结果已经由完成或失败处理写入持久化存储
        let _ = context
            .finish_task(&task, result, |model_id| model_id.clone())
            .await;
    });

    Ok(task_id)
}

/// 任务没能进入注册表时直接更新持久化记录
async fn mark_failed_directly(context: &RunnerContext, task_id: &str, err: &MlTaskError) {
    warn!(task_id = %task_id, "异步任务无法开始: {}", err);
    let mut fields = Map::new();
    fields.insert(STATE_FIELD.to_string(), json!(TaskState::Failed));
    fields.insert(ERROR_FIELD.to_string(), json!(err.to_string()));
    if let Err(e) = context
        .task_manager
        .update_ml_task_directly(task_id, fields)
        .await
    {
        error!(task_id = %task_id, "写入任务失败状态失败: {}", e);
    }
}
