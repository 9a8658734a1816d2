use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 输入数据集类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputDataType {
    DataFrame,
    SearchQuery,
    RemoteInference,
    TextDocs,
}

/// 表格数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl DataFrame {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// 任务输入数据集
///
/// `SearchQuery` 是声明式输入，执行前需要由 `DatasetHandler` 解析为 `DataFrame`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "input_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MlInputDataset {
    DataFrame {
        data_frame: DataFrame,
    },
    SearchQuery {
        indices: Vec<String>,
        query: serde_json::Value,
    },
    RemoteInference {
        parameters: HashMap<String, String>,
    },
    TextDocs {
        docs: Vec<String>,
    },
}

impl MlInputDataset {
    pub fn data_frame(data_frame: DataFrame) -> Self {
        MlInputDataset::DataFrame { data_frame }
    }

    pub fn input_type(&self) -> InputDataType {
        match self {
            MlInputDataset::DataFrame { .. } => InputDataType::DataFrame,
            MlInputDataset::SearchQuery { .. } => InputDataType::SearchQuery,
            MlInputDataset::RemoteInference { .. } => InputDataType::RemoteInference,
            MlInputDataset::TextDocs { .. } => InputDataType::TextDocs,
        }
    }
}
