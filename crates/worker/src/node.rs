use std::sync::Arc;

use tracing::info;

use mltask_core::models::{
    ExecuteRequest, ExecuteResponse, MlTaskResponse, PredictionRequest, TrainingRequest,
};
use mltask_core::traits::{
    ClusterTopology, DatasetHandler, MlEngine, ModelDeployer, ModelStore, NodeStatsCollector,
    ResourceUsageProbe, TaskStore, Transport,
};
use mltask_core::{AppConfig, CircuitBreakerService, MlResult, MlStats};
use mltask_dispatcher::NodeDispatcher;

use crate::handler::TaskActionHandler;
use crate::runner::{RunnerContext, TaskRunner};
use crate::strategies::{ExecuteStrategy, PredictStrategy, TrainAndPredictStrategy, TrainingStrategy};
use crate::task_manager::TaskManager;

/// 节点依赖的外部协作者
pub struct NodeServices {
    pub engine: Arc<dyn MlEngine>,
    pub dataset_handler: Arc<dyn DatasetHandler>,
    pub task_store: Arc<dyn TaskStore>,
    pub model_store: Arc<dyn ModelStore>,
    pub model_deployer: Arc<dyn ModelDeployer>,
    pub transport: Arc<dyn Transport>,
    pub topology: Arc<dyn ClusterTopology>,
    pub probe: Arc<dyn ResourceUsageProbe>,
    /// 为空时只使用本节点统计注册表中的快照（本节点实时值加其他节点的上报）
    pub stats_collector: Option<Arc<dyn NodeStatsCollector>>,
}

/// 一个机器学习任务节点
///
/// 持有统计注册表、任务注册表、分派器和四类任务执行器，生命周期与节点服务一致。
pub struct MlTaskNode {
    stats: Arc<MlStats>,
    task_manager: Arc<TaskManager>,
    dispatcher: Arc<NodeDispatcher>,
    predict: Arc<TaskRunner<PredictStrategy>>,
    train: Arc<TaskRunner<TrainingStrategy>>,
    train_and_predict: Arc<TaskRunner<TrainAndPredictStrategy>>,
    execute: Arc<TaskRunner<ExecuteStrategy>>,
}

impl MlTaskNode {
    pub fn build(config: &AppConfig, services: NodeServices) -> MlResult<Self> {
        let node_id = services.topology.local_node_id().to_string();
        let stats = Arc::new(MlStats::new(node_id.clone(), Arc::clone(&services.probe)));
        let stats_collector = services
            .stats_collector
            .unwrap_or_else(|| Arc::clone(&stats) as Arc<dyn NodeStatsCollector>);

        let dispatcher = Arc::new(NodeDispatcher::from_config(
            Arc::clone(&services.topology),
            stats_collector,
            config.dispatcher.clone(),
        )?);
        let task_manager = Arc::new(TaskManager::with_semaphore_timeout(
            services.task_store,
            config.task.semaphore_timeout(),
        ));
        let circuit_breaker = Arc::new(CircuitBreakerService::from_config(
            &config.circuit_breaker,
            services.probe,
        ));
        let context = Arc::new(RunnerContext::new(
            Arc::clone(&task_manager),
            Arc::clone(&stats),
            Arc::clone(&dispatcher),
            config.task.clone(),
        ));

        let predict = Arc::new(TaskRunner::new(
            Arc::new(PredictStrategy::new(
                Arc::clone(&services.engine),
                Arc::clone(&services.dataset_handler),
                Arc::clone(&services.model_store),
                services.model_deployer,
            )),
            Arc::clone(&context),
            Arc::clone(&circuit_breaker),
            Arc::clone(&services.transport),
        ));
        let train = Arc::new(TaskRunner::new(
            Arc::new(TrainingStrategy::new(
                Arc::clone(&services.engine),
                Arc::clone(&services.dataset_handler),
                services.model_store,
            )),
            Arc::clone(&context),
            Arc::clone(&circuit_breaker),
            Arc::clone(&services.transport),
        ));
        let train_and_predict = Arc::new(TaskRunner::new(
            Arc::new(TrainAndPredictStrategy::new(
                Arc::clone(&services.engine),
                services.dataset_handler,
            )),
            Arc::clone(&context),
            Arc::clone(&circuit_breaker),
            Arc::clone(&services.transport),
        ));
        let execute = Arc::new(TaskRunner::new(
            Arc::new(ExecuteStrategy::new(services.engine)),
            context,
            circuit_breaker,
            services.transport,
        ));

        info!("节点 {} 初始化完成", node_id);
        Ok(Self {
            stats,
            task_manager,
            dispatcher,
            predict,
            train,
            train_and_predict,
            execute,
        })
    }

    pub fn node_id(&self) -> &str {
        self.stats.node_id()
    }

    pub fn stats(&self) -> &Arc<MlStats> {
        &self.stats
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_manager
    }

    pub fn dispatcher(&self) -> &Arc<NodeDispatcher> {
        &self.dispatcher
    }

    pub async fn predict(&self, request: PredictionRequest) -> MlResult<MlTaskResponse> {
        self.predict.run(request).await
    }

    pub async fn train(&self, request: TrainingRequest) -> MlResult<MlTaskResponse> {
        self.train.run(request).await
    }

    pub async fn train_and_predict(&self, request: TrainingRequest) -> MlResult<MlTaskResponse> {
        self.train_and_predict.run(request).await
    }

    pub async fn execute(&self, request: ExecuteRequest) -> MlResult<ExecuteResponse> {
        self.execute.run(request).await
    }

    /// 接收转发请求的处理器，需要注册到传输层
    pub fn transport_handler(&self) -> Arc<TaskActionHandler> {
        Arc::new(TaskActionHandler::new(
            Arc::clone(&self.predict),
            Arc::clone(&self.train),
            Arc::clone(&self.train_and_predict),
            Arc::clone(&self.execute),
        ))
    }

    /// 关闭时清空内存注册表，未完成的异步任务以持久化记录为准
    pub fn shutdown(&self) {
        let remaining = self.task_manager.all_task_ids().len();
        self.task_manager.clear();
        info!("节点 {} 已关闭，清理 {} 个内存任务", self.node_id(), remaining);
    }
}
