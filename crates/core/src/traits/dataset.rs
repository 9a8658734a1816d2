use async_trait::async_trait;

use crate::models::{DataFrame, MlInputDataset};
use crate::{MlResult, MlTaskError};

/// 数据集解析协作者
#[async_trait]
pub trait DatasetHandler: Send + Sync {
    /// 执行搜索查询并把命中结果转换为表格
    async fn parse_search_query(
        &self,
        indices: &[String],
        query: &serde_json::Value,
    ) -> MlResult<DataFrame>;

    /// 把任意输入数据集解析为表格，内联表格直接返回
    async fn resolve(&self, dataset: &MlInputDataset) -> MlResult<DataFrame> {
        match dataset {
            MlInputDataset::DataFrame { data_frame } => Ok(data_frame.clone()),
            MlInputDataset::SearchQuery { indices, query } => {
                self.parse_search_query(indices, query).await
            }
            other => Err(MlTaskError::InvalidRequest(format!(
                "input type {:?} can't be converted to a data frame",
                other.input_type()
            ))),
        }
    }
}
