use std::sync::Arc;

use tracing::{debug, info, warn};

use mltask_core::models::{FunctionName, NodeRole};
use mltask_core::traits::{ClusterTopology, NodeStatsCollector};
use mltask_core::{DispatcherConfig, MlResult, MlTaskError};

use crate::strategies::{create_strategy, NodeCandidate, NodeSelectionStrategy};

/// 节点分派器
///
/// 根据集群拓扑和实时负载为任务选择执行节点。分派决策每次请求都重新计算，不做缓存。
pub struct NodeDispatcher {
    topology: Arc<dyn ClusterTopology>,
    stats: Arc<dyn NodeStatsCollector>,
    strategy: Arc<dyn NodeSelectionStrategy>,
    config: DispatcherConfig,
}

impl NodeDispatcher {
    pub fn new(
        topology: Arc<dyn ClusterTopology>,
        stats: Arc<dyn NodeStatsCollector>,
        strategy: Arc<dyn NodeSelectionStrategy>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            topology,
            stats,
            strategy,
            config,
        }
    }

    /// 按配置中的策略名称创建
    pub fn from_config(
        topology: Arc<dyn ClusterTopology>,
        stats: Arc<dyn NodeStatsCollector>,
        config: DispatcherConfig,
    ) -> MlResult<Self> {
        let strategy = create_strategy(&config.dispatch_strategy)?;
        info!("节点分派器使用 {} 策略", strategy.name());
        Ok(Self::new(topology, stats, strategy, config))
    }

    pub fn local_node_id(&self) -> &str {
        self.topology.local_node_id()
    }

    pub fn is_local(&self, node_id: &str) -> bool {
        node_id == self.topology.local_node_id()
    }

    /// 有机器学习节点时只使用机器学习节点，否则退回到数据节点
    pub async fn eligible_nodes(&self, function_name: FunctionName) -> MlResult<Vec<String>> {
        let nodes = self.topology.nodes().await.map_err(|e| {
            MlTaskError::DispatchFailed(format!("获取集群拓扑失败: {e}"))
        })?;

        let ml_nodes: Vec<String> = nodes
            .iter()
            .filter(|node| node.has_role(NodeRole::Ml))
            .map(|node| node.id.clone())
            .collect();
        if !ml_nodes.is_empty() {
            return Ok(ml_nodes);
        }

        if self.config.only_run_on_ml_node {
            return Err(MlTaskError::DispatchFailed(format!(
                "No eligible node found to execute this request. It's best practice to provision ML nodes to serve your models. function: {function_name}"
            )));
        }

        let data_nodes: Vec<String> = nodes
            .iter()
            .filter(|node| node.has_role(NodeRole::Data))
            .map(|node| node.id.clone())
            .collect();
        if data_nodes.is_empty() {
            return Err(MlTaskError::DispatchFailed(format!(
                "集群中没有可执行 {function_name} 的节点"
            )));
        }
        Ok(data_nodes)
    }

    /// 在合格节点中选择一个执行节点
    ///
    /// `candidate_nodes` 不为空时只在给定节点中选择（例如已经加载了模型的节点）。
    /// 全部节点超过堆内存阈值返回 `ResourceExhausted`，全部超过任务数阈值返回 `LimitExceeded`，
    /// 负载查询失败返回 `DispatchFailed`。
    pub async fn dispatch(
        &self,
        function_name: FunctionName,
        candidate_nodes: Option<&[String]>,
    ) -> MlResult<String> {
        let eligible = match candidate_nodes {
            Some(nodes) if !nodes.is_empty() => nodes.to_vec(),
            _ => self.eligible_nodes(function_name).await?,
        };

        let all_stats = self
            .stats
            .collect_node_stats(&eligible)
            .await
            .map_err(|e| MlTaskError::DispatchFailed(format!("获取节点负载失败: {e}")))?;
        if all_stats.is_empty() {
            return Err(MlTaskError::DispatchFailed(format!(
                "没有节点上报负载，候选节点: {eligible:?}"
            )));
        }

        let under_heap_limit: Vec<NodeCandidate> = all_stats
            .into_iter()
            .filter_map(|(node_id, stats)| {
                if stats.heap_usage_percent > self.config.max_heap_usage_percent {
                    debug!(
                        "节点 {} 堆内存 {:.1}% 超过阈值 {:.1}%，跳过",
                        node_id, stats.heap_usage_percent, self.config.max_heap_usage_percent
                    );
                    None
                } else {
                    Some(NodeCandidate::new(node_id, stats))
                }
            })
            .collect();
        if under_heap_limit.is_empty() {
            warn!("所有候选节点堆内存都超过阈值，拒绝 {} 任务", function_name);
            return Err(MlTaskError::ResourceExhausted(
                "Memory exceeds limitation, no eligible node available".to_string(),
            ));
        }

        let candidates: Vec<NodeCandidate> = under_heap_limit
            .into_iter()
            .filter(|candidate| {
                candidate.stats.executing_task_count < self.config.max_ml_tasks_per_node
            })
            .collect();
        if candidates.is_empty() {
            warn!("所有候选节点任务数都达到上限，拒绝 {} 任务", function_name);
            return Err(MlTaskError::LimitExceeded(format!(
                "All nodes have reached the max ML task limit of {}",
                self.config.max_ml_tasks_per_node
            )));
        }

        let selected = self
            .strategy
            .select_node(function_name, &candidates)
            .await?
            .ok_or_else(|| {
                MlTaskError::DispatchFailed(format!(
                    "{} 策略没有为 {} 选出节点",
                    self.strategy.name(),
                    function_name
                ))
            })?;

        debug!(
            function = %function_name,
            node_id = %selected,
            "任务分派到节点"
        );
        Ok(selected)
    }

    /// 简单分派：优先本节点，只有要求卸载时才做负载比较
    pub async fn dispatch_task(
        &self,
        function_name: FunctionName,
        offload: bool,
    ) -> MlResult<String> {
        if !offload {
            return Ok(self.local_node_id().to_string());
        }
        self.dispatch(function_name, None).await
    }
}
