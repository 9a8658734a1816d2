use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

use mltask_core::models::MlModel;
use mltask_core::models::MlTask;
use mltask_core::traits::{ModelStore, TaskStore};
use mltask_core::{MlResult, MlTaskError};

/// 内存任务存储
///
/// 任务以 JSON 文档保存，局部更新按字段合并，适用于单进程部署和测试。
#[derive(Default)]
pub struct InMemoryTaskStore {
    documents: DashMap<String, Map<String, Value>>,
    index_ready: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// 读取原始文档
    pub fn document(&self, task_id: &str) -> Option<Map<String, Value>> {
        self.documents.get(task_id).map(|doc| doc.clone())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn init_task_index(&self) -> MlResult<bool> {
        if !self.index_ready.swap(true, Ordering::SeqCst) {
            info!("创建内存任务索引");
        }
        Ok(true)
    }

    async fn index_task(&self, task: &MlTask) -> MlResult<String> {
        if !self.index_ready.load(Ordering::SeqCst) {
            return Err(MlTaskError::Store("task index is not initialized".to_string()));
        }
        let document = match serde_json::to_value(task)? {
            Value::Object(map) => map,
            other => {
                return Err(MlTaskError::Serialization(format!(
                    "task document must be an object, got {other}"
                )))
            }
        };
        self.documents.insert(task.task_id.clone(), document);
        debug!(task_id = %task.task_id, "任务文档已写入");
        Ok(task.task_id.clone())
    }

    async fn get_task(&self, task_id: &str) -> MlResult<Option<MlTask>> {
        match self.document(task_id) {
            Some(document) => Ok(Some(serde_json::from_value(Value::Object(document))?)),
            None => Ok(None),
        }
    }

    async fn update_task(
        &self,
        task_id: &str,
        fields: &Map<String, Value>,
        _retry_on_conflict: bool,
    ) -> MlResult<()> {
        let mut document = self
            .documents
            .get_mut(task_id)
            .ok_or_else(|| MlTaskError::task_not_found(task_id))?;
        for (key, value) in fields {
            document.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// 内存模型存储
#[derive(Default)]
pub struct InMemoryModelStore {
    models: DashMap<String, MlModel>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册外部模型，例如远程推理模型
    pub fn register(&self, model: MlModel) -> String {
        let model_id = model.model_id.clone();
        self.models.insert(model_id.clone(), model);
        model_id
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn save_model(&self, model: &MlModel) -> MlResult<String> {
        Ok(self.register(model.clone()))
    }

    async fn get_model(&self, model_id: &str) -> MlResult<Option<MlModel>> {
        Ok(self.models.get(model_id).map(|model| model.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mltask_core::models::task::{MODEL_ID_FIELD, STATE_FIELD};
    use mltask_core::models::{FunctionName, TaskState, TaskType};
    use serde_json::json;

    #[tokio::test]
    async fn test_index_requires_initialization() {
        let store = InMemoryTaskStore::new();
        let task = MlTask::new(TaskType::Training, FunctionName::Kmeans, true);

        assert!(matches!(
            store.index_task(&task).await,
            Err(MlTaskError::Store(_))
        ));

        assert!(store.init_task_index().await.unwrap());
        assert_eq!(store.index_task(&task).await.unwrap(), task.task_id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_partial_update_merges_fields() {
        let store = InMemoryTaskStore::new();
        store.init_task_index().await.unwrap();
        let task = MlTask::new(TaskType::Training, FunctionName::Kmeans, true);
        store.index_task(&task).await.unwrap();

        let mut fields = Map::new();
        fields.insert(STATE_FIELD.to_string(), json!(TaskState::Completed));
        fields.insert(MODEL_ID_FIELD.to_string(), json!("model-1"));
        store.update_task(&task.task_id, &fields, true).await.unwrap();

        let stored = store.get_task(&task.task_id).await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Completed);
        assert_eq!(stored.model_id.as_deref(), Some("model-1"));
        assert_eq!(stored.function_name, FunctionName::Kmeans);
    }

    #[tokio::test]
    async fn test_update_missing_task() {
        let store = InMemoryTaskStore::new();
        let result = store.update_task("missing", &Map::new(), false).await;
        assert!(matches!(result, Err(MlTaskError::TaskNotFound { .. })));
    }

    #[tokio::test]
    async fn test_model_store() {
        let store = InMemoryModelStore::new();
        let model = MlModel::new("kmeans", FunctionName::Kmeans, Some("[]".to_string()));

        let model_id = store.save_model(&model).await.unwrap();

        assert_eq!(store.get_model(&model_id).await.unwrap(), Some(model));
        assert!(store.get_model("missing").await.unwrap().is_none());
    }
}
