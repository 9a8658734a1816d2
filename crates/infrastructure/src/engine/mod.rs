//! 本地执行引擎
//!
//! 提供少量纯 Rust 实现的算法，满足单机部署和集成测试：
//! `KMEANS` 与 `LINEAR_REGRESSION` 支持训练和预测，
//! `LOCAL_SAMPLE_CALCULATOR` 支持单次执行。

mod kmeans;
mod linear_regression;
mod sample_calculator;

use serde_json::Value;
use tracing::debug;

use mltask_core::models::{DataFrame, FunctionName, MlInput, MlModel, MlOutput, TaskState};
use mltask_core::traits::MlEngine;
use mltask_core::{MlResult, MlTaskError};

pub use kmeans::KMeans;
pub use linear_regression::LinearRegression;
pub use sample_calculator::SampleCalculator;

/// 训练产出的可序列化模型
pub(crate) trait TrainedModel: Sized {
    fn train(parameters: &Value, data: &DataFrame) -> MlResult<Self>;

    fn predict(&self, data: &DataFrame) -> MlResult<DataFrame>;

    fn to_content(&self) -> MlResult<String>;

    fn from_content(content: &str) -> MlResult<Self>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEngine;

impl LocalEngine {
    pub fn new() -> Self {
        Self
    }

    fn train_model<M: TrainedModel>(input: &MlInput, data: &DataFrame) -> MlResult<MlModel> {
        let model = M::train(&input.parameters, data)?;
        Ok(MlModel::new(
            input.function_name.as_str().to_lowercase(),
            input.function_name,
            Some(model.to_content()?),
        ))
    }

    fn predict_with<M: TrainedModel>(model: &MlModel, data: &DataFrame) -> MlResult<DataFrame> {
        let content = model.content.as_deref().ok_or_else(|| {
            MlTaskError::Engine(format!("model {} has no content", model.model_id))
        })?;
        M::from_content(content)?.predict(data)
    }
}

fn unsupported(function_name: FunctionName, operation: &str) -> MlTaskError {
    MlTaskError::InvalidRequest(format!(
        "function {function_name} is not supported for {operation}"
    ))
}

fn prediction(result: DataFrame) -> MlOutput {
    MlOutput::Prediction {
        task_id: None,
        status: TaskState::Running,
        prediction_result: result,
    }
}

impl MlEngine for LocalEngine {
    fn train(&self, input: &MlInput, data: &DataFrame) -> MlResult<MlModel> {
        if data.is_empty() {
            return Err(MlTaskError::InvalidRequest("Empty data frame".to_string()));
        }
        debug!(function = %input.function_name, "开始训练, 样本数 {}", data.size());
        match input.function_name {
            FunctionName::Kmeans => Self::train_model::<KMeans>(input, data),
            FunctionName::LinearRegression => Self::train_model::<LinearRegression>(input, data),
            other => Err(unsupported(other, "training")),
        }
    }

    fn predict(&self, input: &MlInput, data: Option<&DataFrame>, model: &MlModel) -> MlResult<MlOutput> {
        if model.function_name != input.function_name {
            return Err(MlTaskError::InvalidRequest(format!(
                "model {} was trained for {}, not {}",
                model.model_id, model.function_name, input.function_name
            )));
        }
        if model.is_remote() {
            return Err(MlTaskError::Engine(
                "remote inference connector is not configured on this node".to_string(),
            ));
        }
        let data = data
            .ok_or_else(|| MlTaskError::InvalidRequest("input data set is required".to_string()))?;
        let result = match model.function_name {
            FunctionName::Kmeans => Self::predict_with::<KMeans>(model, data)?,
            FunctionName::LinearRegression => Self::predict_with::<LinearRegression>(model, data)?,
            other => return Err(unsupported(other, "prediction")),
        };
        Ok(prediction(result))
    }

    fn train_and_predict(&self, input: &MlInput, data: &DataFrame) -> MlResult<MlOutput> {
        let result = match input.function_name {
            FunctionName::Kmeans => KMeans::train(&input.parameters, data)?.predict(data)?,
            FunctionName::LinearRegression => {
                LinearRegression::train(&input.parameters, data)?.predict(data)?
            }
            other => return Err(unsupported(other, "train and predict")),
        };
        Ok(prediction(result))
    }

    fn execute(&self, function_name: FunctionName, input: &Value) -> MlResult<Value> {
        match function_name {
            FunctionName::LocalSampleCalculator => SampleCalculator::execute(input),
            other => Err(unsupported(other, "execute")),
        }
    }
}

/// 把给定列转换为数值矩阵
pub(crate) fn numeric_matrix(data: &DataFrame, columns: &[usize]) -> MlResult<Vec<Vec<f64>>> {
    data.rows
        .iter()
        .enumerate()
        .map(|(row_index, row)| {
            columns
                .iter()
                .map(|&col| {
                    row.get(col).and_then(Value::as_f64).ok_or_else(|| {
                        MlTaskError::InvalidRequest(format!(
                            "column [{}] of row {} is not numeric",
                            data.columns.get(col).map(String::as_str).unwrap_or("?"),
                            row_index
                        ))
                    })
                })
                .collect()
        })
        .collect()
}

/// 按列名查找列下标
pub(crate) fn column_positions(data: &DataFrame, names: &[String]) -> MlResult<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            data.columns
                .iter()
                .position(|column| column == name)
                .ok_or_else(|| MlTaskError::InvalidRequest(format!("column [{name}] not found")))
        })
        .collect()
}
