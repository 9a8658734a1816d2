//! 运行时协作者的单进程实现
//!
//! 存储、传输、拓扑和数据集都保存在内存中，用于嵌入式部署和多节点集成测试。

pub mod cluster;
pub mod dataset;
pub mod deployer;
pub mod engine;
pub mod memory_store;
pub mod probe;
pub mod transport;

pub use cluster::{ClusterStatsCollector, StaticTopology};
pub use dataset::InMemoryDatasetHandler;
pub use deployer::InMemoryModelDeployer;
pub use engine::LocalEngine;
pub use memory_store::{InMemoryModelStore, InMemoryTaskStore};
pub use probe::{StaticResourceProbe, SystemResourceProbe};
pub use transport::LocalTransport;
