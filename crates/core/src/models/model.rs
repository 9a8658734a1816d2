use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::output::ModelInterface;
use super::task::FunctionName;

/// 训练产出或注册的模型文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlModel {
    pub model_id: String,
    pub name: String,
    pub function_name: FunctionName,
    pub version: String,
    /// 序列化后的模型内容，远程模型为空
    pub content: Option<String>,
    pub interface: Option<ModelInterface>,
    pub created_time: DateTime<Utc>,
}

impl MlModel {
    pub fn new(name: impl Into<String>, function_name: FunctionName, content: Option<String>) -> Self {
        Self {
            model_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            function_name,
            version: "1".to_string(),
            content,
            interface: None,
            created_time: Utc::now(),
        }
    }

    pub fn with_interface(mut self, interface: ModelInterface) -> Self {
        self.interface = Some(interface);
        self
    }

    pub fn is_remote(&self) -> bool {
        self.function_name.is_remote()
    }
}
