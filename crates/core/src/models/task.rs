use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dataset::InputDataType;

pub const TASK_ID_FIELD: &str = "task_id";
pub const MODEL_ID_FIELD: &str = "model_id";
pub const TASK_TYPE_FIELD: &str = "task_type";
pub const FUNCTION_NAME_FIELD: &str = "function_name";
pub const STATE_FIELD: &str = "state";
pub const INPUT_TYPE_FIELD: &str = "input_type";
pub const PROGRESS_FIELD: &str = "progress";
pub const WORKER_NODE_FIELD: &str = "worker_node";
pub const CREATE_TIME_FIELD: &str = "create_time";
pub const LAST_UPDATE_TIME_FIELD: &str = "last_update_time";
pub const ERROR_FIELD: &str = "error";
pub const IS_ASYNC_TASK_FIELD: &str = "is_async";

/// 算法标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionName {
    LinearRegression,
    LogisticRegression,
    Kmeans,
    BatchRcf,
    FitRcf,
    RcfSummarize,
    AnomalyLocalization,
    MetricsCorrelation,
    LocalSampleCalculator,
    TextEmbedding,
    Remote,
    Agent,
}

impl FunctionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionName::LinearRegression => "LINEAR_REGRESSION",
            FunctionName::LogisticRegression => "LOGISTIC_REGRESSION",
            FunctionName::Kmeans => "KMEANS",
            FunctionName::BatchRcf => "BATCH_RCF",
            FunctionName::FitRcf => "FIT_RCF",
            FunctionName::RcfSummarize => "RCF_SUMMARIZE",
            FunctionName::AnomalyLocalization => "ANOMALY_LOCALIZATION",
            FunctionName::MetricsCorrelation => "METRICS_CORRELATION",
            FunctionName::LocalSampleCalculator => "LOCAL_SAMPLE_CALCULATOR",
            FunctionName::TextEmbedding => "TEXT_EMBEDDING",
            FunctionName::Remote => "REMOTE",
            FunctionName::Agent => "AGENT",
        }
    }

    /// 远程推理模型，由外部连接器提供服务
    pub fn is_remote(&self) -> bool {
        matches!(self, FunctionName::Remote)
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Training,
    Prediction,
    TrainingAndPrediction,
    Execution,
    Batch,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Training => "TRAINING",
            TaskType::Prediction => "PREDICTION",
            TaskType::TrainingAndPrediction => "TRAINING_AND_PREDICTION",
            TaskType::Execution => "EXECUTION",
            TaskType::Batch => "BATCH",
        };
        f.write_str(s)
    }
}

/// 任务状态
///
/// `Completed`、`Failed`、`Cancelled` 为终止状态，进入后不能再回到 `Created` 或 `Running`。
///
/// ```text
/// Created → Running → Completed
///    ↓         ↓
/// Cancelled  Failed / Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// 重复设置同一状态视为合法（幂等），终止状态之后不允许任何其他转换
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        if *self == next {
            return true;
        }
        match self {
            TaskState::Created => true,
            TaskState::Running => next != TaskState::Created,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "CREATED",
            TaskState::Running => "RUNNING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// 可追踪的机器学习任务
///
/// 由任务执行器在请求被接纳时创建，状态变更统一经过 `TaskManager`。
/// `is_async` 为真时调用方立即得到确认，最终结果写入持久化存储后再查询。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlTask {
    pub task_id: String,
    pub model_id: Option<String>,
    pub task_type: TaskType,
    pub function_name: FunctionName,
    pub state: TaskState,
    pub input_type: Option<InputDataType>,
    pub progress: Option<f32>,
    #[serde(rename = "worker_node", default)]
    pub worker_nodes: Vec<String>,
    /// 时间字段以毫秒时间戳存储，与局部更新写入的格式一致
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub create_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_update_time: DateTime<Utc>,
    pub error: Option<String>,
    pub is_async: bool,
}

impl MlTask {
    /// 创建新任务，任务ID在创建时生成
    pub fn new(task_type: TaskType, function_name: FunctionName, is_async: bool) -> Self {
        let now = Utc::now();
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            model_id: None,
            task_type,
            function_name,
            state: TaskState::Created,
            input_type: None,
            progress: None,
            worker_nodes: Vec::new(),
            create_time: now,
            last_update_time: now,
            error: None,
            is_async,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_model_id(mut self, model_id: Option<String>) -> Self {
        self.model_id = model_id;
        self
    }

    pub fn with_input_type(mut self, input_type: Option<InputDataType>) -> Self {
        self.input_type = input_type;
        self
    }

    pub fn with_worker_node(mut self, node_id: impl Into<String>) -> Self {
        self.worker_nodes.push(node_id.into());
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = state;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_never_reenter_running() {
        for terminal in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(TaskState::Running));
            assert!(!terminal.can_transition_to(TaskState::Created));
            assert!(terminal.can_transition_to(terminal));
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(TaskState::Created.can_transition_to(TaskState::Running));
        assert!(TaskState::Created.can_transition_to(TaskState::Failed));
        assert!(TaskState::Running.can_transition_to(TaskState::Completed));
        assert!(TaskState::Running.can_transition_to(TaskState::Cancelled));
        assert!(!TaskState::Running.can_transition_to(TaskState::Created));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Failed));
    }

    #[test]
    fn test_new_task_has_unique_id() {
        let t1 = MlTask::new(TaskType::Training, FunctionName::Kmeans, true);
        let t2 = MlTask::new(TaskType::Training, FunctionName::Kmeans, true);
        assert_ne!(t1.task_id, t2.task_id);
        assert_eq!(t1.state, TaskState::Created);
        assert!(t1.model_id.is_none());
    }

    #[test]
    fn test_task_serializes_with_store_field_names() {
        let task = MlTask::new(TaskType::Prediction, FunctionName::Kmeans, false)
            .with_worker_node("node-1");
        let value = serde_json::to_value(&task).expect("serialize task");

        assert_eq!(value[STATE_FIELD], "CREATED");
        assert_eq!(value[TASK_TYPE_FIELD], "PREDICTION");
        assert_eq!(value[FUNCTION_NAME_FIELD], "KMEANS");
        assert_eq!(value[WORKER_NODE_FIELD][0], "node-1");
        assert_eq!(value[IS_ASYNC_TASK_FIELD], false);
    }
}
