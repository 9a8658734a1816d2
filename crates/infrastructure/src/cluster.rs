use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use mltask_core::models::{NodeInfo, NodeStats};
use mltask_core::traits::{ClusterTopology, NodeStatsCollector};
use mltask_core::{MlResult, MlStats};

/// 静态集群拓扑，节点列表来自配置，可以在运行时增删
pub struct StaticTopology {
    local_node_id: String,
    nodes: RwLock<Vec<NodeInfo>>,
}

impl StaticTopology {
    pub fn new(local_node_id: impl Into<String>, nodes: Vec<NodeInfo>) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            nodes: RwLock::new(nodes),
        }
    }

    /// 加入节点，同ID的节点会被替换
    pub fn join(&self, node: NodeInfo) {
        let mut nodes = self.nodes.write();
        nodes.retain(|existing| existing.id != node.id);
        info!("节点 {} 加入集群, 角色 {:?}", node.id, node.roles);
        nodes.push(node);
    }

    pub fn leave(&self, node_id: &str) {
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|node| node.id != node_id);
        if nodes.len() != before {
            info!("节点 {} 离开集群", node_id);
        }
    }
}

#[async_trait]
impl ClusterTopology for StaticTopology {
    fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    async fn nodes(&self) -> MlResult<Vec<NodeInfo>> {
        Ok(self.nodes.read().clone())
    }
}

/// 进程内集群的负载收集器
///
/// 各节点把自己的统计注册表登记进来，查询时读取每个节点的实时快照。
#[derive(Default)]
pub struct ClusterStatsCollector {
    registries: DashMap<String, Arc<MlStats>>,
}

impl ClusterStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, stats: Arc<MlStats>) {
        debug!("登记节点 {} 的统计注册表", stats.node_id());
        self.registries.insert(stats.node_id().to_string(), stats);
    }

    pub fn unregister(&self, node_id: &str) {
        self.registries.remove(node_id);
    }
}

#[async_trait]
impl NodeStatsCollector for ClusterStatsCollector {
    async fn collect_node_stats(&self, node_ids: &[String]) -> MlResult<HashMap<String, NodeStats>> {
        Ok(node_ids
            .iter()
            .filter_map(|node_id| {
                self.registries
                    .get(node_id)
                    .map(|stats| (node_id.clone(), stats.local_node_stats()))
            })
            .collect())
    }
}
