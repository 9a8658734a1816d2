//! 任务注册与执行
//!
//! `TaskManager` 维护本节点的内存任务表并串行化同一任务的持久化写入；
//! `TaskRunner` 是所有任务类型共享的执行骨架，具体的本地执行逻辑由 `strategies` 提供。

pub mod handler;
pub mod node;
pub mod runner;
pub mod strategies;
pub mod task_manager;

pub use handler::TaskActionHandler;
pub use node::{MlTaskNode, NodeServices};
pub use runner::{RunnerContext, TaskExecutionStrategy, TaskRunner};
pub use strategies::{ExecuteStrategy, PredictStrategy, TrainAndPredictStrategy, TrainingStrategy};
pub use task_manager::{TaskCache, TaskManager, TASK_SEMAPHORE_TIMEOUT};
