use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};

use mltask_core::models::NodeInfo;
use mltask_core::traits::ResourceUsageProbe;
use mltask_core::{AppConfig, NodeStatKey};
use mltask_infrastructure::{
    ClusterStatsCollector, InMemoryDatasetHandler, InMemoryModelDeployer, InMemoryModelStore,
    InMemoryTaskStore, LocalEngine, LocalTransport, StaticTopology, SystemResourceProbe,
};
use mltask_worker::{MlTaskNode, NodeServices};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 只运行本节点，配置中的其他成员被忽略
    Single,
    /// 在同一进程内运行配置中的全部节点
    Embedded,
}

/// 节点进程
///
/// 所有节点共享内存存储和本地传输层，负载快照通过统一的收集器读取。
pub struct Application {
    nodes: Vec<Arc<MlTaskNode>>,
    transport: Arc<LocalTransport>,
    stats_interval: Duration,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode, stats_interval: Duration) -> Result<Self> {
        let members = match mode {
            AppMode::Single => {
                if !config.cluster.peers.is_empty() {
                    warn!(
                        "单节点模式忽略 {} 个集群成员配置",
                        config.cluster.peers.len()
                    );
                }
                vec![config.node.node_info()]
            }
            AppMode::Embedded => config.cluster_nodes(),
        };

        let transport = Arc::new(LocalTransport::new());
        let collector = Arc::new(ClusterStatsCollector::new());
        let task_store = Arc::new(InMemoryTaskStore::new());
        let model_store = Arc::new(InMemoryModelStore::new());
        let dataset_handler = Arc::new(InMemoryDatasetHandler::new());
        let probe: Arc<dyn ResourceUsageProbe> = Arc::new(SystemResourceProbe::new("."));

        let mut nodes = Vec::with_capacity(members.len());
        for member in &members {
            let node_config = member_config(&config, member);
            let topology = Arc::new(StaticTopology::new(member.id.clone(), members.clone()));
            let services = NodeServices {
                engine: Arc::new(LocalEngine::new()),
                dataset_handler: dataset_handler.clone(),
                task_store: task_store.clone(),
                model_store: model_store.clone(),
                model_deployer: Arc::new(InMemoryModelDeployer::new(
                    model_store.clone(),
                    topology.clone(),
                )),
                transport: transport.clone(),
                topology,
                probe: Arc::clone(&probe),
                stats_collector: Some(collector.clone()),
            };
            let node = Arc::new(
                MlTaskNode::build(&node_config, services)
                    .with_context(|| format!("初始化节点 {} 失败", member.id))?,
            );
            collector.register(node.stats().clone());
            transport.register(member.id.clone(), node.transport_handler());
            nodes.push(node);
        }

        info!("共启动 {} 个节点: {:?}", nodes.len(), members.iter().map(|m| &m.id).collect::<Vec<_>>());
        Ok(Self {
            nodes,
            transport,
            stats_interval,
        })
    }

    pub fn nodes(&self) -> &[Arc<MlTaskNode>] {
        &self.nodes
    }

    /// 定期输出各节点负载，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.stats_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.log_node_stats(),
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止节点");
                    break;
                }
            }
        }
        self.shutdown();
        Ok(())
    }

    fn log_node_stats(&self) {
        for node in &self.nodes {
            let stats = node.stats();
            info!(
                node_id = %node.node_id(),
                executing = stats.get_value(NodeStatKey::ExecutingTaskCount),
                requests = stats.get_value(NodeStatKey::TotalRequestCount),
                failures = stats.get_value(NodeStatKey::TotalFailureCount),
                breaker_trips = stats.get_value(NodeStatKey::CircuitBreakerTriggerCount),
                "节点负载"
            );
        }
    }

    pub fn shutdown(&self) {
        for node in &self.nodes {
            self.transport.unregister(node.node_id());
            node.shutdown();
        }
    }
}

/// 为集群成员生成节点配置，其余配置段与本节点共用
fn member_config(config: &AppConfig, member: &NodeInfo) -> AppConfig {
    let mut node_config = config.clone();
    node_config.node.id = member.id.clone();
    node_config.node.roles = member.roles.clone();
    node_config
}
