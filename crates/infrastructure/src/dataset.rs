use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use mltask_core::models::DataFrame;
use mltask_core::traits::DatasetHandler;
use mltask_core::{MlResult, MlTaskError};

const DEFAULT_QUERY_SIZE: usize = 10_000;

/// 内存数据集
///
/// 每个索引保存一张表格，搜索查询合并命中的索引，并支持按 `size` 截断和按列筛选。
#[derive(Default)]
pub struct InMemoryDatasetHandler {
    indices: DashMap<String, DataFrame>,
}

impl InMemoryDatasetHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_index(&self, index: impl Into<String>, data: DataFrame) {
        self.indices.insert(index.into(), data);
    }
}

#[async_trait]
impl DatasetHandler for InMemoryDatasetHandler {
    async fn parse_search_query(&self, indices: &[String], query: &Value) -> MlResult<DataFrame> {
        if indices.is_empty() {
            return Err(MlTaskError::InvalidRequest(
                "at least one index is required for search query input".to_string(),
            ));
        }
        let size = query
            .get("size")
            .and_then(Value::as_u64)
            .map(|size| size as usize)
            .unwrap_or(DEFAULT_QUERY_SIZE);
        let source_fields: Option<Vec<String>> = query
            .get("_source")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|field| field.as_str().map(str::to_string))
                    .collect()
            });

        let mut result: Option<DataFrame> = None;
        for index in indices {
            let data = self
                .indices
                .get(index)
                .map(|data| data.clone())
                .ok_or_else(|| MlTaskError::InvalidRequest(format!("no such index [{index}]")))?;
            let data = match &source_fields {
                Some(fields) => select_columns(&data, fields)?,
                None => data,
            };
            match result.as_mut() {
                None => result = Some(data),
                Some(merged) => {
                    if merged.columns != data.columns {
                        return Err(MlTaskError::InvalidRequest(format!(
                            "index [{index}] has different columns"
                        )));
                    }
                    merged.rows.extend(data.rows);
                }
            }
        }

        let mut data = result.unwrap_or_default();
        data.rows.truncate(size);
        if data.is_empty() {
            return Err(MlTaskError::InvalidRequest("No document found".to_string()));
        }
        debug!("搜索查询命中 {} 行", data.size());
        Ok(data)
    }
}

fn select_columns(data: &DataFrame, fields: &[String]) -> MlResult<DataFrame> {
    let positions = fields
        .iter()
        .map(|field| {
            data.columns
                .iter()
                .position(|column| column == field)
                .ok_or_else(|| MlTaskError::InvalidRequest(format!("unknown field [{field}]")))
        })
        .collect::<MlResult<Vec<_>>>()?;
    let rows = data
        .rows
        .iter()
        .map(|row| {
            positions
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Ok(DataFrame::new(fields.to_vec(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mltask_core::models::MlInputDataset;
    use serde_json::json;

    fn handler() -> InMemoryDatasetHandler {
        let handler = InMemoryDatasetHandler::new();
        handler.put_index(
            "iris",
            DataFrame::new(
                vec!["petal_length".to_string(), "petal_width".to_string()],
                vec![
                    vec![json!(1.4), json!(0.2)],
                    vec![json!(4.7), json!(1.4)],
                    vec![json!(6.0), json!(2.5)],
                ],
            ),
        );
        handler
    }

    #[tokio::test]
    async fn test_search_query_with_size_and_source() {
        let data = handler()
            .parse_search_query(
                &["iris".to_string()],
                &json!({"size": 2, "_source": ["petal_width"]}),
            )
            .await
            .unwrap();

        assert_eq!(data.columns, vec!["petal_width".to_string()]);
        assert_eq!(data.size(), 2);
        assert_eq!(data.rows[1][0], json!(1.4));
    }

    #[tokio::test]
    async fn test_unknown_index() {
        let result = handler()
            .parse_search_query(&["missing".to_string()], &json!({}))
            .await;
        assert!(matches!(result, Err(MlTaskError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_resolve_inline_data_frame() {
        let frame = DataFrame::new(vec!["x".to_string()], vec![vec![json!(1)]]);
        let resolved = handler()
            .resolve(&MlInputDataset::data_frame(frame.clone()))
            .await
            .unwrap();
        assert_eq!(resolved, frame);
    }

    #[tokio::test]
    async fn test_resolve_text_docs_is_rejected() {
        let result = handler()
            .resolve(&MlInputDataset::TextDocs {
                docs: vec!["hello".to_string()],
            })
            .await;
        assert!(matches!(result, Err(MlTaskError::InvalidRequest(_))));
    }
}
