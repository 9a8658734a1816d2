use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use mltask_core::models::{FunctionName, NodeStats};
use mltask_core::{MlResult, MlTaskError};

/// 通过阈值检查的候选节点
#[derive(Debug, Clone)]
pub struct NodeCandidate {
    pub node_id: String,
    pub stats: NodeStats,
}

impl NodeCandidate {
    pub fn new(node_id: impl Into<String>, stats: NodeStats) -> Self {
        Self {
            node_id: node_id.into(),
            stats,
        }
    }
}

/// 节点选择策略
///
/// 候选节点已经通过了堆内存和任务数阈值检查，策略只负责在其中挑选一个。
#[async_trait]
pub trait NodeSelectionStrategy: Send + Sync {
    async fn select_node(
        &self,
        function_name: FunctionName,
        candidates: &[NodeCandidate],
    ) -> MlResult<Option<String>>;

    fn name(&self) -> &str;
}

pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeSelectionStrategy for RoundRobinStrategy {
    async fn select_node(
        &self,
        function_name: FunctionName,
        candidates: &[NodeCandidate],
    ) -> MlResult<Option<String>> {
        if candidates.is_empty() {
            debug!("没有可用于 {} 的候选节点", function_name);
            return Ok(None);
        }
        // 统计结果来自哈希表，按节点ID排序保证轮询顺序稳定
        let mut node_ids: Vec<&str> = candidates.iter().map(|c| c.node_id.as_str()).collect();
        node_ids.sort_unstable();

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % node_ids.len();
        let selected = node_ids[index];

        debug!(
            "轮询策略为 {} 选择节点: {} (索引: {}/{})",
            function_name,
            selected,
            index,
            node_ids.len()
        );

        Ok(Some(selected.to_string()))
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

/// 最小负载策略：执行中任务数最少优先，其次堆内存使用率，最后按节点ID
pub struct LeastLoadedStrategy;

impl LeastLoadedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastLoadedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_load(a: &NodeCandidate, b: &NodeCandidate) -> CmpOrdering {
    a.stats
        .executing_task_count
        .cmp(&b.stats.executing_task_count)
        .then_with(|| {
            a.stats
                .heap_usage_percent
                .partial_cmp(&b.stats.heap_usage_percent)
                .unwrap_or(CmpOrdering::Equal)
        })
        .then_with(|| a.node_id.cmp(&b.node_id))
}

#[async_trait]
impl NodeSelectionStrategy for LeastLoadedStrategy {
    async fn select_node(
        &self,
        function_name: FunctionName,
        candidates: &[NodeCandidate],
    ) -> MlResult<Option<String>> {
        let Some(selected) = candidates.iter().min_by(|a, b| compare_load(a, b)) else {
            debug!("没有可用于 {} 的候选节点", function_name);
            return Ok(None);
        };

        debug!(
            "最小负载策略为 {} 选择节点: {} (执行中任务: {}, 堆内存: {:.1}%)",
            function_name,
            selected.node_id,
            selected.stats.executing_task_count,
            selected.stats.heap_usage_percent
        );

        Ok(Some(selected.node_id.clone()))
    }

    fn name(&self) -> &str {
        "LeastLoaded"
    }
}

/// 按配置名称创建策略
pub fn create_strategy(name: &str) -> MlResult<Arc<dyn NodeSelectionStrategy>> {
    match name {
        "round_robin" => Ok(Arc::new(RoundRobinStrategy::new())),
        "least_loaded" => Ok(Arc::new(LeastLoadedStrategy::new())),
        other => Err(MlTaskError::Configuration(format!(
            "无效的分派策略: {other}"
        ))),
    }
}
