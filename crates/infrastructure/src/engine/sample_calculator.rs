use serde::Deserialize;
use serde_json::{json, Value};

use mltask_core::{MlResult, MlTaskError};

/// 本地样例计算器，对一组数值做 sum、max 或 min
pub struct SampleCalculator;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    Sum,
    Max,
    Min,
}

#[derive(Debug, Deserialize)]
struct CalculatorInput {
    operation: Operation,
    input_data: Vec<f64>,
}

impl SampleCalculator {
    pub fn execute(input: &Value) -> MlResult<Value> {
        let input: CalculatorInput = serde_json::from_value(input.clone()).map_err(|e| {
            MlTaskError::InvalidRequest(format!("invalid sample calculator input: {e}"))
        })?;
        if input.input_data.is_empty() {
            return Err(MlTaskError::InvalidRequest("empty input data".to_string()));
        }

        let data = input.input_data.iter().copied();
        let result = match input.operation {
            Operation::Sum => data.sum(),
            Operation::Max => data.fold(f64::NEG_INFINITY, f64::max),
            Operation::Min => data.fold(f64::INFINITY, f64::min),
        };
        Ok(json!({ "result": result }))
    }
}
