use thiserror::Error;

use crate::models::TaskState;

/// 机器学习任务运行时错误类型定义
///
/// 变体按调用方的处理方式区分：资源耗尽类错误可以稍后重试，
/// 注册表误用类错误表示上游存在编程错误，远程错误原样携带远端节点的失败。
#[derive(Debug, Error)]
pub enum MlTaskError {
    #[error("资源耗尽: {0}")]
    ResourceExhausted(String),

    #[error("超出限制: {0}")]
    LimitExceeded(String),

    #[error("任务未找到: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("重复的任务ID: {task_id}")]
    DuplicateTask { task_id: String },

    #[error("任务分派失败: {0}")]
    DispatchFailed(String),

    #[error("远程节点 {node_id} 执行失败: {source}")]
    RemoteExecution {
        node_id: String,
        #[source]
        source: Box<MlTaskError>,
    },

    #[error("输出校验失败 [{field}]: {message}")]
    Validation { field: String, message: String },

    #[error("无效的任务状态转换: {task_id} {from} -> {to}")]
    InvalidStateTransition {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("并发更新冲突: {0}")]
    ConcurrentUpdate(String),

    #[error("无效的请求: {0}")]
    InvalidRequest(String),

    #[error("模型未找到: {model_id}")]
    ModelNotFound { model_id: String },

    #[error("引擎执行错误: {0}")]
    Engine(String),

    #[error("持久化存储错误: {0}")]
    Store(String),

    #[error("传输错误: {0}")]
    Transport(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl MlTaskError {
    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn remote(node_id: impl Into<String>, source: MlTaskError) -> Self {
        Self::RemoteExecution {
            node_id: node_id.into(),
            source: Box::new(source),
        }
    }

    /// 剥离远程包装，返回最初产生的错误
    pub fn root_cause(&self) -> &MlTaskError {
        match self {
            Self::RemoteExecution { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// 熔断器打开或所有节点过载
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::ResourceExhausted(_) | Self::LimitExceeded(_)
        )
    }

    /// 调用方可以在稍后重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::ResourceExhausted(_)
                | Self::LimitExceeded(_)
                | Self::DispatchFailed(_)
                | Self::ConcurrentUpdate(_)
                | Self::Transport(_)
                | Self::Store(_)
        )
    }

    /// 注册表误用，说明上游破坏了不变量
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::TaskNotFound { .. }
                | Self::DuplicateTask { .. }
                | Self::InvalidStateTransition { .. }
        )
    }
}

impl From<serde_json::Error> for MlTaskError {
    fn from(err: serde_json::Error) -> Self {
        MlTaskError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MlTaskError {
    fn from(err: tokio::task::JoinError) -> Self {
        MlTaskError::Internal(format!("执行线程异常退出: {err}"))
    }
}

/// 统一的Result类型
pub type MlResult<T> = std::result::Result<T, MlTaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_keeps_root_cause() {
        let err = MlTaskError::remote(
            "node-2",
            MlTaskError::ResourceExhausted("Memory Circuit Breaker is open".to_string()),
        );

        assert!(err.is_resource_exhausted());
        assert!(err.is_retryable());
        assert!(matches!(err.root_cause(), MlTaskError::ResourceExhausted(_)));
        assert!(err.to_string().contains("node-2"));
    }

    #[test]
    fn test_registry_misuse_is_programming_error() {
        let err = MlTaskError::DuplicateTask {
            task_id: "t-1".to_string(),
        };
        assert!(err.is_programming_error());
        assert!(!err.is_retryable());

        let err = MlTaskError::task_not_found("t-2");
        assert!(err.is_programming_error());
        assert!(err.to_string().contains("t-2"));
    }

    #[test]
    fn test_validation_error_fields() {
        let err = MlTaskError::validation("output.embedding", "shape mismatch");
        match err {
            MlTaskError::Validation { field, message } => {
                assert_eq!(field, "output.embedding");
                assert_eq!(message, "shape mismatch");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
