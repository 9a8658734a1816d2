use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::models::{MlModel, MlTask};
use crate::MlResult;

/// 任务持久化存储
///
/// 写入失败通过返回值报告，核心不会自动重试。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 确保任务索引存在，返回索引是否可用
    async fn init_task_index(&self) -> MlResult<bool>;

    /// 写入新的任务文档，返回文档ID
    async fn index_task(&self, task: &MlTask) -> MlResult<String>;

    async fn get_task(&self, task_id: &str) -> MlResult<Option<MlTask>>;

    /// 局部更新，只写入给定字段
    async fn update_task(
        &self,
        task_id: &str,
        fields: &Map<String, Value>,
        retry_on_conflict: bool,
    ) -> MlResult<()>;
}

/// 模型持久化存储
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn save_model(&self, model: &MlModel) -> MlResult<String>;

    async fn get_model(&self, model_id: &str) -> MlResult<Option<MlModel>>;
}
