use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{ActionName, FunctionName, NodeStats};
use crate::traits::{NodeStatsCollector, ResourceUsageProbe};
use crate::MlResult;

/// 节点级统计项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatKey {
    /// 正在执行的任务数，接纳时加一、每条退出路径上减一
    ExecutingTaskCount,
    TotalRequestCount,
    TotalFailureCount,
    CircuitBreakerTriggerCount,
}

impl NodeStatKey {
    pub const ALL: [NodeStatKey; 4] = [
        NodeStatKey::ExecutingTaskCount,
        NodeStatKey::TotalRequestCount,
        NodeStatKey::TotalFailureCount,
        NodeStatKey::CircuitBreakerTriggerCount,
    ];

    pub fn metric_name(&self) -> &'static str {
        match self {
            NodeStatKey::ExecutingTaskCount => "ml_node_executing_task_count",
            NodeStatKey::TotalRequestCount => "ml_node_total_request_count",
            NodeStatKey::TotalFailureCount => "ml_node_total_failure_count",
            NodeStatKey::CircuitBreakerTriggerCount => "ml_node_circuit_breaker_trigger_count",
        }
    }
}

/// 动作级统计项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatKey {
    RequestCount,
    FailureCount,
}

impl ActionStatKey {
    fn metric_name(&self) -> &'static str {
        match self {
            ActionStatKey::RequestCount => "ml_action_request_count",
            ActionStatKey::FailureCount => "ml_action_failure_count",
        }
    }
}

/// 统计注册表
///
/// 计数器全部是原子整数，读者不会阻塞写者。通过依赖注入传递，
/// 生命周期与节点服务一致，不是全局单例。
pub struct MlStats {
    node_id: String,
    node_stats: HashMap<NodeStatKey, AtomicI64>,
    action_stats: DashMap<(FunctionName, ActionName, ActionStatKey), Arc<AtomicI64>>,
    reported: DashMap<String, NodeStats>,
    probe: Arc<dyn ResourceUsageProbe>,
}

impl MlStats {
    pub fn new(node_id: impl Into<String>, probe: Arc<dyn ResourceUsageProbe>) -> Self {
        let node_stats = NodeStatKey::ALL
            .iter()
            .map(|key| (*key, AtomicI64::new(0)))
            .collect();
        Self {
            node_id: node_id.into(),
            node_stats,
            action_stats: DashMap::new(),
            reported: DashMap::new(),
            probe,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn counter(&self, key: NodeStatKey) -> &AtomicI64 {
        // 所有键在构造时已经插入
        &self.node_stats[&key]
    }

    pub fn increment(&self, key: NodeStatKey) -> i64 {
        let value = self.counter(key).fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!(key.metric_name()).set(value as f64);
        value
    }

    /// 减一，低于零时钳制为零；竞争的结束信号可能造成多减一次，记录日志但不报错
    pub fn decrement(&self, key: NodeStatKey) -> i64 {
        let result = self
            .counter(key)
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current > 0 {
                    Some(current - 1)
                } else {
                    None
                }
            });
        let value = match result {
            Ok(previous) => previous - 1,
            Err(current) => {
                warn!(
                    "统计项 {:?} 已经为 {}，忽略多余的减一操作",
                    key, current
                );
                current
            }
        };
        metrics::gauge!(key.metric_name()).set(value as f64);
        value
    }

    pub fn get_value(&self, key: NodeStatKey) -> i64 {
        self.counter(key).load(Ordering::SeqCst)
    }

    /// 动作级计数器，首次使用时创建
    pub fn increment_action(
        &self,
        function_name: FunctionName,
        action: ActionName,
        key: ActionStatKey,
    ) -> i64 {
        let counter = self
            .action_stats
            .entry((function_name, action, key))
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone();
        metrics::counter!(
            key.metric_name(),
            "function" => function_name.as_str(),
            "action" => action.as_str()
        )
        .increment(1);
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get_action_value(
        &self,
        function_name: FunctionName,
        action: ActionName,
        key: ActionStatKey,
    ) -> i64 {
        self.action_stats
            .get(&(function_name, action, key))
            .map(|counter| counter.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// 记录失败：节点级和动作级失败计数各加一
    pub fn record_failure(&self, function_name: FunctionName, action: ActionName) {
        self.increment(NodeStatKey::TotalFailureCount);
        self.increment_action(function_name, action, ActionStatKey::FailureCount);
    }

    /// 本节点的实时快照
    pub fn local_node_stats(&self) -> NodeStats {
        NodeStats {
            heap_usage_percent: self.probe.heap_usage_percent(),
            executing_task_count: self.get_value(NodeStatKey::ExecutingTaskCount),
            total_request_count: self.get_value(NodeStatKey::TotalRequestCount),
            total_failure_count: self.get_value(NodeStatKey::TotalFailureCount),
            reported_at: Utc::now(),
        }
    }

    /// 接收其他节点上报的负载快照
    pub fn record_node_stats(&self, node_id: impl Into<String>, stats: NodeStats) {
        let node_id = node_id.into();
        if node_id == self.node_id {
            return;
        }
        debug!(
            "节点 {} 上报负载: 堆内存 {:.1}%, 执行中任务 {}",
            node_id, stats.heap_usage_percent, stats.executing_task_count
        );
        self.reported.insert(node_id, stats);
    }

    pub fn remove_node_stats(&self, node_id: &str) {
        self.reported.remove(node_id);
    }

    /// 本节点实时快照加上所有已上报节点的快照
    pub fn get_all_node_stats(&self) -> HashMap<String, NodeStats> {
        let mut all: HashMap<String, NodeStats> = self
            .reported
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.insert(self.node_id.clone(), self.local_node_stats());
        all
    }
}

#[async_trait]
impl NodeStatsCollector for MlStats {
    async fn collect_node_stats(&self, node_ids: &[String]) -> MlResult<HashMap<String, NodeStats>> {
        let mut all = self.get_all_node_stats();
        all.retain(|node_id, _| node_ids.contains(node_id));
        Ok(all)
    }
}

/// 执行中任务计数守卫
///
/// 创建时加一，析构时减一，成功、失败、转发以及 future 被丢弃时都保证成对。
pub struct ExecutingTaskGuard {
    stats: Arc<MlStats>,
}

impl ExecutingTaskGuard {
    pub fn new(stats: Arc<MlStats>) -> Self {
        stats.increment(NodeStatKey::ExecutingTaskCount);
        Self { stats }
    }
}

impl Drop for ExecutingTaskGuard {
    fn drop(&mut self) {
        self.stats.decrement(NodeStatKey::ExecutingTaskCount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(f64);

    impl ResourceUsageProbe for FixedProbe {
        fn heap_usage_percent(&self) -> f64 {
            self.0
        }

        fn free_disk_space_mb(&self) -> u64 {
            u64::MAX
        }
    }

    fn stats() -> MlStats {
        MlStats::new("node-1", Arc::new(FixedProbe(42.0)))
    }

    #[test]
    fn test_increment_and_decrement() {
        let stats = stats();
        assert_eq!(stats.increment(NodeStatKey::ExecutingTaskCount), 1);
        assert_eq!(stats.increment(NodeStatKey::ExecutingTaskCount), 2);
        assert_eq!(stats.decrement(NodeStatKey::ExecutingTaskCount), 1);
        assert_eq!(stats.get_value(NodeStatKey::ExecutingTaskCount), 1);
    }

    #[test]
    fn test_decrement_below_zero_is_clamped() {
        let stats = stats();
        assert_eq!(stats.decrement(NodeStatKey::ExecutingTaskCount), 0);
        assert_eq!(stats.get_value(NodeStatKey::ExecutingTaskCount), 0);
    }

    #[test]
    fn test_action_counters_created_on_first_use() {
        let stats = stats();
        assert_eq!(
            stats.get_action_value(FunctionName::Kmeans, ActionName::Train, ActionStatKey::RequestCount),
            0
        );
        stats.increment_action(FunctionName::Kmeans, ActionName::Train, ActionStatKey::RequestCount);
        stats.increment_action(FunctionName::Kmeans, ActionName::Train, ActionStatKey::RequestCount);
        stats.record_failure(FunctionName::Kmeans, ActionName::Train);

        assert_eq!(
            stats.get_action_value(FunctionName::Kmeans, ActionName::Train, ActionStatKey::RequestCount),
            2
        );
        assert_eq!(
            stats.get_action_value(FunctionName::Kmeans, ActionName::Train, ActionStatKey::FailureCount),
            1
        );
        assert_eq!(stats.get_value(NodeStatKey::TotalFailureCount), 1);
    }

    #[test]
    fn test_all_node_stats_merges_local_and_reported() {
        let stats = stats();
        stats.increment(NodeStatKey::ExecutingTaskCount);
        stats.record_node_stats("node-2", NodeStats::new(91.0, 3));
        // 本节点的上报被忽略，始终使用实时值
        stats.record_node_stats("node-1", NodeStats::new(99.0, 50));

        let all = stats.get_all_node_stats();
        assert_eq!(all.len(), 2);
        assert_eq!(all["node-1"].heap_usage_percent, 42.0);
        assert_eq!(all["node-1"].executing_task_count, 1);
        assert_eq!(all["node-2"].executing_task_count, 3);

        stats.remove_node_stats("node-2");
        assert_eq!(stats.get_all_node_stats().len(), 1);
    }

    #[test]
    fn test_guard_balances_on_drop() {
        let stats = Arc::new(stats());
        {
            let _first = ExecutingTaskGuard::new(Arc::clone(&stats));
            let _second = ExecutingTaskGuard::new(Arc::clone(&stats));
            assert_eq!(stats.get_value(NodeStatKey::ExecutingTaskCount), 2);
        }
        assert_eq!(stats.get_value(NodeStatKey::ExecutingTaskCount), 0);
    }

    #[tokio::test]
    async fn test_collect_filters_requested_nodes() {
        let stats = stats();
        stats.record_node_stats("node-2", NodeStats::new(10.0, 0));
        stats.record_node_stats("node-3", NodeStats::new(10.0, 0));

        let collected = stats
            .collect_node_stats(&["node-1".to_string(), "node-3".to_string()])
            .await
            .unwrap();
        assert_eq!(collected.len(), 2);
        assert!(collected.contains_key("node-1"));
        assert!(!collected.contains_key("node-2"));
    }
}
