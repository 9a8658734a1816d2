use serde::{Deserialize, Serialize};

use super::dataset::DataFrame;
use super::task::{FunctionName, TaskState};
use crate::errors::{MlResult, MlTaskError};

/// 模型输出张量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTensor {
    pub name: String,
    pub shape: Vec<usize>,
    #[serde(default)]
    pub data: Vec<f32>,
}

/// 任务输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MlOutput {
    /// 训练结果；异步任务返回时 `model_id` 为空，只带任务ID
    Training {
        model_id: Option<String>,
        task_id: Option<String>,
        status: TaskState,
    },
    Prediction {
        task_id: Option<String>,
        status: TaskState,
        prediction_result: DataFrame,
    },
    ModelTensor {
        tensors: Vec<ModelTensor>,
    },
}

impl MlOutput {
    pub fn model_id(&self) -> Option<&str> {
        match self {
            MlOutput::Training { model_id, .. } => model_id.as_deref(),
            _ => None,
        }
    }

    /// 设置预测输出的完成状态
    pub fn mark_status(&mut self, state: TaskState) {
        match self {
            MlOutput::Training { status, .. } | MlOutput::Prediction { status, .. } => {
                *status = state
            }
            MlOutput::ModelTensor { .. } => {}
        }
    }
}

/// predict/train 类任务的响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlTaskResponse {
    pub output: MlOutput,
}

impl MlTaskResponse {
    pub fn new(output: MlOutput) -> Self {
        Self { output }
    }
}

/// execute 类任务的响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub function_name: FunctionName,
    pub output: serde_json::Value,
}

/// 输出张量声明，`None` 维度表示任意长度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<Option<usize>>,
}

/// 模型接口声明
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInterface {
    #[serde(default)]
    pub output: Vec<TensorSpec>,
}

impl ModelInterface {
    /// 按接口声明校验输出张量的名称和形状
    pub fn validate_output(&self, output: &MlOutput) -> MlResult<()> {
        if self.output.is_empty() {
            return Ok(());
        }
        let tensors = match output {
            MlOutput::ModelTensor { tensors } => tensors,
            _ => {
                return Err(MlTaskError::validation(
                    "output",
                    "model interface declares tensor output but model returned a non-tensor output",
                ))
            }
        };

        for declared in &self.output {
            let tensor = tensors
                .iter()
                .find(|t| t.name == declared.name)
                .ok_or_else(|| {
                    MlTaskError::validation(
                        format!("output.{}", declared.name),
                        "declared output tensor is missing",
                    )
                })?;

            if tensor.shape.len() != declared.shape.len() {
                return Err(MlTaskError::validation(
                    format!("output.{}", declared.name),
                    format!(
                        "expected rank {} but got shape {:?}",
                        declared.shape.len(),
                        tensor.shape
                    ),
                ));
            }
            let mismatch = declared
                .shape
                .iter()
                .zip(tensor.shape.iter())
                .position(|(expected, actual)| matches!(expected, Some(e) if e != actual));
            if let Some(dim) = mismatch {
                return Err(MlTaskError::validation(
                    format!("output.{}", declared.name),
                    format!(
                        "dimension {dim} expected {:?} but got shape {:?}",
                        declared.shape[dim], tensor.shape
                    ),
                ));
            }
        }
        Ok(())
    }
}
