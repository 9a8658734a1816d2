use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 集群节点角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// 专用机器学习节点，集群中存在时优先承担任务
    Ml,
    Data,
    ClusterManager,
    Ingest,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeRole::Ml => "ml",
            NodeRole::Data => "data",
            NodeRole::ClusterManager => "cluster_manager",
            NodeRole::Ingest => "ingest",
        };
        f.write_str(s)
    }
}

/// 集群节点信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub roles: Vec<NodeRole>,
}

impl NodeInfo {
    pub fn new(id: impl Into<String>, roles: Vec<NodeRole>) -> Self {
        Self {
            id: id.into(),
            roles,
        }
    }

    pub fn has_role(&self, role: NodeRole) -> bool {
        self.roles.contains(&role)
    }
}

/// 节点负载快照，每次分派决策时刷新，不持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub heap_usage_percent: f64,
    pub executing_task_count: i64,
    #[serde(default)]
    pub total_request_count: i64,
    #[serde(default)]
    pub total_failure_count: i64,
    pub reported_at: DateTime<Utc>,
}

impl NodeStats {
    pub fn new(heap_usage_percent: f64, executing_task_count: i64) -> Self {
        Self {
            heap_usage_percent,
            executing_task_count,
            total_request_count: 0,
            total_failure_count: 0,
            reported_at: Utc::now(),
        }
    }
}
