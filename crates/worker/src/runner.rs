use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use mltask_core::models::{ActionName, MlTask, MlTaskRequest, TaskType, TransportRequest};
use mltask_core::stats::{ActionStatKey, ExecutingTaskGuard, MlStats, NodeStatKey};
use mltask_core::traits::Transport;
use mltask_core::{CircuitBreakerService, MlResult, MlTaskError, TaskConfig};
use mltask_dispatcher::NodeDispatcher;

use crate::task_manager::TaskManager;

/// 各类任务执行器共享的运行环境
pub struct RunnerContext {
    pub task_manager: Arc<TaskManager>,
    pub stats: Arc<MlStats>,
    pub dispatcher: Arc<NodeDispatcher>,
    pub config: TaskConfig,
}

impl RunnerContext {
    pub fn new(
        task_manager: Arc<TaskManager>,
        stats: Arc<MlStats>,
        dispatcher: Arc<NodeDispatcher>,
        config: TaskConfig,
    ) -> Self {
        Self {
            task_manager,
            stats,
            dispatcher,
            config,
        }
    }

    pub fn local_node_id(&self) -> &str {
        self.dispatcher.local_node_id()
    }

    /// 新建在本节点执行的任务
    pub fn new_task(&self, task_type: TaskType, request: &impl MlTaskRequest) -> MlTask {
        MlTask::new(task_type, request.function_name(), request.is_async())
            .with_model_id(request.model_id().map(str::to_string))
            .with_worker_node(self.local_node_id())
    }

    /// 按运行任务数上限登记任务并置为 RUNNING
    pub fn start_task(&self, task: MlTask) -> MlResult<MlTask> {
        let task_id = task.task_id.clone();
        self.task_manager
            .check_limit_and_add_running_task(task, self.config.max_running_tasks)?;
        self.task_manager
            .get(&task_id)
            .ok_or_else(|| MlTaskError::task_not_found(task_id))
    }

    /// 在阻塞线程池上执行引擎计算，避免占用处理请求的异步线程
    pub async fn run_blocking<T, F>(&self, f: F) -> MlResult<T>
    where
        F: FnOnce() -> MlResult<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f).await?
    }

    /// 异步任务完成：写入 COMPLETED 和模型ID后从注册表移除，同步任务什么也不做
    pub async fn handle_async_ml_task_complete(&self, task: &MlTask, model_id: Option<&str>) {
        if !task.is_async {
            return;
        }
        match self
            .task_manager
            .complete_task(&task.task_id, model_id, true)
            .await
        {
            Ok(()) => info!(task_id = %task.task_id, "异步任务完成"),
            Err(e) => error!(task_id = %task.task_id, "写入异步任务完成状态失败: {}", e),
        }
        self.task_manager.remove(&task.task_id);
    }

    /// 异步任务失败：写入 FAILED 和错误信息，同步任务什么也不做
    pub async fn handle_async_ml_task_failure(&self, task: &MlTask, err: &MlTaskError) {
        if !task.is_async {
            return;
        }
        warn!(task_id = %task.task_id, "异步任务失败: {}", err);
        if let Err(e) = self
            .task_manager
            .update_task_error(&task.task_id, &err.to_string(), true)
            .await
        {
            error!(task_id = %task.task_id, "写入异步任务失败状态失败: {}", e);
        }
        if self.config.async_cleanup_on_failure {
            self.task_manager.remove(&task.task_id);
        }
    }

    /// 结束一个已登记的任务
    ///
    /// 异步任务走完成或失败处理；同步任务的结果直接交给调用方，只从注册表移除。
    pub async fn finish_task<T>(
        &self,
        task: &MlTask,
        result: MlResult<T>,
        model_id: impl FnOnce(&T) -> Option<String>,
    ) -> MlResult<T> {
        match &result {
            Ok(value) => {
                let model_id = model_id(value);
                self.handle_async_ml_task_complete(task, model_id.as_deref())
                    .await
            }
            Err(e) => self.handle_async_ml_task_failure(task, e).await,
        }
        if !task.is_async {
            self.task_manager.remove(&task.task_id);
        }
        result
    }
}

/// 具体任务类型的本地执行逻辑
///
/// 准入、分派、转发和统计由 `TaskRunner` 统一处理，实现只负责在本节点执行。
#[async_trait]
pub trait TaskExecutionStrategy: Send + Sync + 'static {
    type Request: MlTaskRequest;
    type Response: Serialize + DeserializeOwned + Send + 'static;

    fn action(&self) -> ActionName;

    /// 只在本节点执行，不做负载比较
    fn prefers_local(&self) -> bool {
        false
    }

    /// 限定分派范围，例如只在已经加载模型的节点中选择
    async fn candidate_nodes(
        &self,
        _request: &Self::Request,
        _context: &RunnerContext,
    ) -> MlResult<Option<Vec<String>>> {
        Ok(None)
    }

    async fn execute_locally(
        &self,
        request: Self::Request,
        context: Arc<RunnerContext>,
    ) -> MlResult<Self::Response>;
}

/// 通用任务执行器
///
/// 熔断检查 → 统计 → 分派 → 本地执行或转发 → 统计回收。
pub struct TaskRunner<S: TaskExecutionStrategy> {
    strategy: Arc<S>,
    context: Arc<RunnerContext>,
    circuit_breaker: Arc<CircuitBreakerService>,
    transport: Arc<dyn Transport>,
}

impl<S: TaskExecutionStrategy> TaskRunner<S> {
    pub fn new(
        strategy: Arc<S>,
        context: Arc<RunnerContext>,
        circuit_breaker: Arc<CircuitBreakerService>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            strategy,
            context,
            circuit_breaker,
            transport,
        }
    }

    pub fn context(&self) -> &Arc<RunnerContext> {
        &self.context
    }

    fn check_circuit_breaker(&self) -> MlResult<()> {
        if let Some(breaker) = self.circuit_breaker.check_open_breaker() {
            self.context
                .stats
                .increment(NodeStatKey::CircuitBreakerTriggerCount);
            return Err(MlTaskError::ResourceExhausted(format!(
                "{breaker} is open, please check your resources!"
            )));
        }
        Ok(())
    }

    /// 执行一个任务请求
    ///
    /// 其他节点转发来的请求（`dispatch_task` 为假）直接在本节点执行。
    pub async fn run(&self, request: S::Request) -> MlResult<S::Response> {
        self.check_circuit_breaker()?;

        let function_name = request.function_name();
        let action = self.strategy.action();
        let stats = &self.context.stats;

        if !request.dispatch_task() {
            debug!(function = %function_name, "在本节点执行转发来的 {} 请求", action.as_str());
            let _guard = ExecutingTaskGuard::new(Arc::clone(stats));
            return self
                .strategy
                .execute_locally(request, Arc::clone(&self.context))
                .await;
        }

        let _guard = ExecutingTaskGuard::new(Arc::clone(stats));
        stats.increment(NodeStatKey::TotalRequestCount);
        stats.increment_action(function_name, action, ActionStatKey::RequestCount);

        let result = self.dispatch_and_run(request).await;
        if let Err(e) = &result {
            stats.record_failure(function_name, action);
            debug!(function = %function_name, "{} 请求失败: {}", action.as_str(), e);
        }
        result
    }

    async fn dispatch_and_run(&self, request: S::Request) -> MlResult<S::Response> {
        let function_name = request.function_name();
        let dispatcher = &self.context.dispatcher;

        let node_id = if self.strategy.prefers_local() {
            dispatcher.dispatch_task(function_name, false).await?
        } else {
            let candidates = self
                .strategy
                .candidate_nodes(&request, &self.context)
                .await?;
            dispatcher
                .dispatch(function_name, candidates.as_deref())
                .await?
        };

        if dispatcher.is_local(&node_id) {
            debug!(function = %function_name, "在本节点执行 {} 请求", self.strategy.action().as_str());
            return self
                .strategy
                .execute_locally(request, Arc::clone(&self.context))
                .await;
        }
        self.forward(&node_id, request).await
    }

    /// 转发到远程节点，远端的失败原样包装后返回
    async fn forward(&self, node_id: &str, request: S::Request) -> MlResult<S::Response> {
        let action = self.strategy.action();
        let transport_request = TransportRequest::new(action, &request.into_forwarded())?;
        debug!(node_id = %node_id, "转发 {} 请求", action.transport_action());

        let response = self
            .transport
            .send_request(node_id, transport_request)
            .await
            .map_err(|e| {
                warn!(node_id = %node_id, "远程节点执行失败: {}", e);
                MlTaskError::remote(node_id, e)
            })?;
        Ok(serde_json::from_value(response)?)
    }
}
