use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::{NodeInfo, NodeStats};
use crate::MlResult;

/// 集群拓扑发现
#[async_trait]
pub trait ClusterTopology: Send + Sync {
    fn local_node_id(&self) -> &str;

    /// 当前存活的节点及其角色
    async fn nodes(&self) -> MlResult<Vec<NodeInfo>>;
}

/// 集群负载统计查询
#[async_trait]
pub trait NodeStatsCollector: Send + Sync {
    /// 查询给定节点的负载快照，没有上报过的节点不出现在结果中
    async fn collect_node_stats(&self, node_ids: &[String]) -> MlResult<HashMap<String, NodeStats>>;
}

/// 本机资源使用探针，每次调用都重新读取
pub trait ResourceUsageProbe: Send + Sync {
    fn heap_usage_percent(&self) -> f64;

    fn free_disk_space_mb(&self) -> u64;
}

/// 远程推理模型的加载协作者
#[async_trait]
pub trait ModelDeployer: Send + Sync {
    /// 已经加载了该模型的节点
    async fn deployed_nodes(&self, model_id: &str) -> MlResult<Vec<String>>;

    /// 在目标节点上加载模型，返回加载成功的节点
    async fn deploy_model(&self, model_id: &str, target_nodes: &[String]) -> MlResult<Vec<String>>;
}
