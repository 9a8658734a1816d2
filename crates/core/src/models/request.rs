use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::dataset::MlInputDataset;
use super::task::FunctionName;

/// 由上游请求解析层构造的类型化任务请求
///
/// `dispatch_task` 为假表示请求已经由其他节点转发过来，本地直接执行，不再重新分派。
pub trait MlTaskRequest: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn function_name(&self) -> FunctionName;

    fn dispatch_task(&self) -> bool;

    /// 转发到远程节点前调用，远端收到后不会再次分派
    fn into_forwarded(self) -> Self;

    fn is_async(&self) -> bool {
        false
    }

    fn model_id(&self) -> Option<&str> {
        None
    }
}

/// 算法输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlInput {
    pub function_name: FunctionName,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub input_dataset: Option<MlInputDataset>,
}

impl MlInput {
    pub fn new(function_name: FunctionName, input_dataset: Option<MlInputDataset>) -> Self {
        Self {
            function_name,
            parameters: serde_json::Value::Null,
            input_dataset,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

fn default_dispatch() -> bool {
    true
}

/// 预测请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub model_id: Option<String>,
    pub input: MlInput,
    #[serde(default = "default_dispatch")]
    pub dispatch_task: bool,
}

impl PredictionRequest {
    pub fn new(model_id: Option<String>, input: MlInput) -> Self {
        Self {
            model_id,
            input,
            dispatch_task: true,
        }
    }
}

impl MlTaskRequest for PredictionRequest {
    fn function_name(&self) -> FunctionName {
        self.input.function_name
    }

    fn dispatch_task(&self) -> bool {
        self.dispatch_task
    }

    fn into_forwarded(mut self) -> Self {
        self.dispatch_task = false;
        self
    }

    fn model_id(&self) -> Option<&str> {
        self.model_id.as_deref()
    }
}

/// 训练请求，训练与训练后预测共用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRequest {
    pub input: MlInput,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default = "default_dispatch")]
    pub dispatch_task: bool,
}

impl TrainingRequest {
    pub fn new(input: MlInput, is_async: bool) -> Self {
        Self {
            input,
            is_async,
            dispatch_task: true,
        }
    }
}

impl MlTaskRequest for TrainingRequest {
    fn function_name(&self) -> FunctionName {
        self.input.function_name
    }

    fn dispatch_task(&self) -> bool {
        self.dispatch_task
    }

    fn into_forwarded(mut self) -> Self {
        self.dispatch_task = false;
        self
    }

    fn is_async(&self) -> bool {
        self.is_async
    }
}

/// 无状态执行请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub function_name: FunctionName,
    pub input: serde_json::Value,
    #[serde(default = "default_dispatch")]
    pub dispatch_task: bool,
}

impl ExecuteRequest {
    pub fn new(function_name: FunctionName, input: serde_json::Value) -> Self {
        Self {
            function_name,
            input,
            dispatch_task: true,
        }
    }
}

impl MlTaskRequest for ExecuteRequest {
    fn function_name(&self) -> FunctionName {
        self.function_name
    }

    fn dispatch_task(&self) -> bool {
        self.dispatch_task
    }

    fn into_forwarded(mut self) -> Self {
        self.dispatch_task = false;
        self
    }
}

/// 传输层动作名称，同时用作动作级统计的维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    Train,
    Predict,
    TrainAndPredict,
    Execute,
}

impl ActionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionName::Train => "train",
            ActionName::Predict => "predict",
            ActionName::TrainAndPredict => "train_and_predict",
            ActionName::Execute => "execute",
        }
    }

    /// 节点间转发使用的动作名
    pub fn transport_action(&self) -> String {
        format!("cluster:admin/mltask/{}", self.as_str())
    }
}

/// 节点间转发的请求信封，载荷为序列化后的原始请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRequest {
    pub action: ActionName,
    pub payload: serde_json::Value,
}

impl TransportRequest {
    pub fn new<R: MlTaskRequest>(action: ActionName, request: &R) -> serde_json::Result<Self> {
        Ok(Self {
            action,
            payload: serde_json::to_value(request)?,
        })
    }
}
