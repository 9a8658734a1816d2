use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use mltask_core::models::DataFrame;
use mltask_core::{MlResult, MlTaskError};

use super::{numeric_matrix, TrainedModel};

const DEFAULT_CENTROIDS: usize = 2;
const DEFAULT_ITERATIONS: usize = 10;

/// K-均值聚类，使用欧氏距离
///
/// 初始质心取前 k 个互不相同的样本，结果可复现。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeans {
    pub columns: Vec<String>,
    pub centroids: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct KMeansParams {
    centroids: usize,
    iterations: usize,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            centroids: DEFAULT_CENTROIDS,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

impl KMeans {
    fn nearest(&self, point: &[f64]) -> usize {
        self.centroids
            .iter()
            .enumerate()
            .map(|(i, centroid)| (i, squared_distance(point, centroid)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

impl TrainedModel for KMeans {
    fn train(parameters: &Value, data: &DataFrame) -> MlResult<Self> {
        let params: KMeansParams = if parameters.is_null() {
            KMeansParams::default()
        } else {
            serde_json::from_value(parameters.clone())?
        };
        if params.centroids == 0 {
            return Err(MlTaskError::InvalidRequest(
                "centroids should be positive".to_string(),
            ));
        }

        let all_columns: Vec<usize> = (0..data.columns.len()).collect();
        let points = numeric_matrix(data, &all_columns)?;

        let mut centroids: Vec<Vec<f64>> = Vec::with_capacity(params.centroids);
        for point in &points {
            if centroids.len() == params.centroids {
                break;
            }
            if !centroids.contains(point) {
                centroids.push(point.clone());
            }
        }
        let mut model = KMeans {
            columns: data.columns.clone(),
            centroids,
        };

        for _ in 0..params.iterations {
            let dims = model.columns.len();
            let mut sums = vec![vec![0.0; dims]; model.centroids.len()];
            let mut counts = vec![0usize; model.centroids.len()];
            for point in &points {
                let cluster = model.nearest(point);
                counts[cluster] += 1;
                for (sum, value) in sums[cluster].iter_mut().zip(point) {
                    *sum += value;
                }
            }

            let mut moved = false;
            for (cluster, centroid) in model.centroids.iter_mut().enumerate() {
                if counts[cluster] == 0 {
                    continue;
                }
                let updated: Vec<f64> = sums[cluster]
                    .iter()
                    .map(|sum| sum / counts[cluster] as f64)
                    .collect();
                if updated != *centroid {
                    moved = true;
                    *centroid = updated;
                }
            }
            if !moved {
                break;
            }
        }
        Ok(model)
    }

    fn predict(&self, data: &DataFrame) -> MlResult<DataFrame> {
        let positions = super::column_positions(data, &self.columns)?;
        let points = numeric_matrix(data, &positions)?;
        let rows = points
            .iter()
            .map(|point| vec![json!(self.nearest(point))])
            .collect();
        Ok(DataFrame::new(vec!["ClusterID".to_string()], rows))
    }

    fn to_content(&self) -> MlResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn from_content(content: &str) -> MlResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| MlTaskError::Engine(format!("invalid kmeans model content: {e}")))
    }
}
