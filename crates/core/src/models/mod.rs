//! # 数据模型
//!
//! 定义机器学习任务运行时的核心数据结构，包括任务、请求、数据集、输出和集群节点。
//!
//! ## 核心模型
//!
//! ### MlTask - 任务
//! 可追踪的工作单元，带有任务类型、算法标识和生命周期状态。
//!
//! ### 请求与响应
//! `PredictionRequest`、`TrainingRequest`、`ExecuteRequest` 由上游解析层构造，
//! 均实现 `MlTaskRequest`，可以序列化后转发到其他节点。
//!
//! ### NodeInfo / NodeStats - 集群节点
//! 节点角色决定任务资格，负载快照决定分派目标。
//!
//! ## 状态管理
//!
//! ```text
//! Created → Running → Completed
//!    ↓         ↓
//! Cancelled  Failed / Cancelled
//! ```
//!
//! 终止状态之后任务不会再回到 `Running`。

pub mod dataset;
pub mod model;
pub mod node;
pub mod output;
pub mod request;
pub mod task;

pub use dataset::{DataFrame, InputDataType, MlInputDataset};
pub use model::MlModel;
pub use node::{NodeInfo, NodeRole, NodeStats};
pub use output::{ExecuteResponse, MlOutput, MlTaskResponse, ModelInterface, ModelTensor, TensorSpec};
pub use request::{
    ActionName, ExecuteRequest, MlInput, MlTaskRequest, PredictionRequest, TrainingRequest,
    TransportRequest,
};
pub use task::{FunctionName, MlTask, TaskState, TaskType};
