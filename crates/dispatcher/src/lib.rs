//! 节点分派
//!
//! 根据节点角色确定合格节点，再根据实时负载快照和可配置的选择策略决定任务的执行节点。

pub mod node_dispatcher;
pub mod strategies;

pub use node_dispatcher::NodeDispatcher;
pub use strategies::{
    create_strategy, LeastLoadedStrategy, NodeCandidate, NodeSelectionStrategy,
    RoundRobinStrategy,
};
