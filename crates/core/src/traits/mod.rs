//! 外部协作者接口定义
//!
//! 运行时核心只通过这些窄接口访问外部系统：
//! - `MlEngine`：实际执行算法的机器学习引擎
//! - `DatasetHandler`：把声明式搜索输入解析为数据
//! - `TaskStore` / `ModelStore`：任务和模型的持久化存储
//! - `Transport` / `TransportHandler`：节点间请求转发
//! - `ClusterTopology` / `NodeStatsCollector` / `ResourceUsageProbe`：集群拓扑与负载
//! - `ModelDeployer`：远程推理模型的加载

pub mod cluster;
pub mod dataset;
pub mod engine;
pub mod store;
pub mod transport;

pub use cluster::*;
pub use dataset::*;
pub use engine::*;
pub use store::*;
pub use transport::*;
