use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use mltask_core::models::DataFrame;
use mltask_core::{MlResult, MlTaskError};

use super::{column_positions, numeric_matrix, TrainedModel};

/// 最小二乘线性回归，通过正规方程求解
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    pub features: Vec<String>,
    pub target: String,
    pub weights: Vec<f64>,
    pub bias: f64,
}

#[derive(Debug, Deserialize)]
struct LinearRegressionParams {
    target: String,
}

/// 高斯消元求解 `a * x = b`
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> MlResult<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(MlTaskError::Engine(
                "feature matrix is singular, check for duplicated or constant columns".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

impl TrainedModel for LinearRegression {
    fn train(parameters: &Value, data: &DataFrame) -> MlResult<Self> {
        let params: LinearRegressionParams = serde_json::from_value(parameters.clone())
            .map_err(|_| MlTaskError::InvalidRequest("target column is required".to_string()))?;
        let target_pos = column_positions(data, std::slice::from_ref(&params.target))?[0];
        let features: Vec<String> = data
            .columns
            .iter()
            .filter(|column| **column != params.target)
            .cloned()
            .collect();
        if features.is_empty() {
            return Err(MlTaskError::InvalidRequest(
                "at least one feature column is required".to_string(),
            ));
        }
        let feature_pos = column_positions(data, &features)?;
        let x = numeric_matrix(data, &feature_pos)?;
        let y: Vec<f64> = numeric_matrix(data, &[target_pos])?
            .into_iter()
            .map(|row| row[0])
            .collect();

        // 最后一维是截距
        let dims = features.len() + 1;
        let mut xtx = vec![vec![0.0; dims]; dims];
        let mut xty = vec![0.0; dims];
        for (row, target) in x.iter().zip(&y) {
            let augmented: Vec<f64> = row.iter().copied().chain(std::iter::once(1.0)).collect();
            for i in 0..dims {
                xty[i] += augmented[i] * target;
                for j in 0..dims {
                    xtx[i][j] += augmented[i] * augmented[j];
                }
            }
        }
        let mut solution = solve(xtx, xty)?;
        let bias = solution.pop().unwrap_or(0.0);

        Ok(LinearRegression {
            features,
            target: params.target,
            weights: solution,
            bias,
        })
    }

    fn predict(&self, data: &DataFrame) -> MlResult<DataFrame> {
        let positions = column_positions(data, &self.features)?;
        let rows = numeric_matrix(data, &positions)?
            .iter()
            .map(|row| {
                let value: f64 = row
                    .iter()
                    .zip(&self.weights)
                    .map(|(x, w)| x * w)
                    .sum::<f64>()
                    + self.bias;
                vec![json!(value)]
            })
            .collect();
        Ok(DataFrame::new(vec!["Prediction".to_string()], rows))
    }

    fn to_content(&self) -> MlResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn from_content(content: &str) -> MlResult<Self> {
        serde_json::from_str(content).map_err(|e| {
            MlTaskError::Engine(format!("invalid linear regression model content: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> DataFrame {
        DataFrame::new(
            vec!["x".to_string(), "y".to_string()],
            (0..5)
                .map(|i| vec![json!(i as f64), json!(2.0 * i as f64 + 1.0)])
                .collect(),
        )
    }

    #[test]
    fn test_fits_exact_line() {
        let model = LinearRegression::train(&json!({"target": "y"}), &line()).unwrap();

        assert_eq!(model.features, vec!["x".to_string()]);
        assert!((model.weights[0] - 2.0).abs() < 1e-9);
        assert!((model.bias - 1.0).abs() < 1e-9);

        let input = DataFrame::new(vec!["x".to_string()], vec![vec![json!(10.0)]]);
        let result = model.predict(&input).unwrap();
        let predicted = result.rows[0][0].as_f64().unwrap();
        assert!((predicted - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_target_is_required() {
        assert!(matches!(
            LinearRegression::train(&Value::Null, &line()),
            Err(MlTaskError::InvalidRequest(_))
        ));
        assert!(matches!(
            LinearRegression::train(&json!({"target": "z"}), &line()),
            Err(MlTaskError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_constant_feature_is_singular() {
        let data = DataFrame::new(
            vec!["x".to_string(), "y".to_string()],
            vec![vec![json!(1.0), json!(2.0)], vec![json!(1.0), json!(3.0)]],
        );
        assert!(matches!(
            LinearRegression::train(&json!({"target": "y"}), &data),
            Err(MlTaskError::Engine(_))
        ));
    }
}
