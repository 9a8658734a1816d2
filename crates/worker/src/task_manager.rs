use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use mltask_core::models::task::{
    ERROR_FIELD, LAST_UPDATE_TIME_FIELD, MODEL_ID_FIELD, STATE_FIELD,
};
use mltask_core::models::{MlTask, TaskState, TaskType};
use mltask_core::traits::TaskStore;
use mltask_core::{MlResult, MlTaskError};

/// 默认的持久化写入许可等待时间
pub const TASK_SEMAPHORE_TIMEOUT: Duration = Duration::from_millis(5000);

/// 注册表中的任务条目
///
/// 只有异步任务带写入许可，保证同一任务的持久化写入不会交错。
pub struct TaskCache {
    task: RwLock<MlTask>,
    task_type: TaskType,
    /// 是否占用了所属类型的运行名额，释放只发生一次
    running_slot: AtomicBool,
    update_permit: Option<Arc<Semaphore>>,
    worker_nodes: Vec<String>,
    node_errors: DashMap<String, String>,
}

impl TaskCache {
    fn new(task: MlTask, worker_nodes: Option<Vec<String>>) -> Self {
        let update_permit = task.is_async.then(|| Arc::new(Semaphore::new(1)));
        let worker_nodes = worker_nodes.unwrap_or_else(|| task.worker_nodes.clone());
        Self {
            task_type: task.task_type,
            task: RwLock::new(task),
            running_slot: AtomicBool::new(false),
            update_permit,
            worker_nodes,
            node_errors: DashMap::new(),
        }
    }

    pub fn task(&self) -> MlTask {
        self.task.read().clone()
    }

    pub fn state(&self) -> TaskState {
        self.task.read().state
    }

    pub fn is_async(&self) -> bool {
        self.update_permit.is_some()
    }

    pub fn holds_running_slot(&self) -> bool {
        self.running_slot.load(Ordering::SeqCst)
    }

    pub fn worker_nodes(&self) -> &[String] {
        &self.worker_nodes
    }

    pub fn add_node_error(&self, node_id: impl Into<String>, error: impl Into<String>) {
        self.node_errors.insert(node_id.into(), error.into());
    }

    pub fn node_errors(&self) -> HashMap<String, String> {
        self.node_errors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// 在超时时间内获取写入许可，同步任务没有许可直接返回
    async fn acquire_update_permit(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> MlResult<Option<OwnedSemaphorePermit>> {
        let Some(semaphore) = &self.update_permit else {
            return Ok(None);
        };
        match tokio::time::timeout(timeout, Arc::clone(semaphore).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(Some(permit)),
            Ok(Err(_)) => Err(MlTaskError::Internal(format!(
                "任务 {task_id} 的写入许可已关闭"
            ))),
            Err(_) => {
                warn!("等待任务 {} 的写入许可超时", task_id);
                Err(MlTaskError::ConcurrentUpdate(
                    "Other updating request not finished yet".to_string(),
                ))
            }
        }
    }
}

/// 一次内存状态变更，只有真正变化的字段会进入持久化载荷
#[derive(Debug, Default)]
struct TaskUpdate {
    state: Option<TaskState>,
    error: Option<String>,
    model_id: Option<String>,
    /// 任务已经结束时整个变更作废
    skip_if_terminal: bool,
}

/// 任务注册表
///
/// 并发安全的内存任务表，负责任务准入、查询、状态变更、移除，以及串行化同一任务的持久化写入。
pub struct TaskManager {
    tasks: DashMap<String, Arc<TaskCache>>,
    running_tasks_count: Mutex<HashMap<TaskType, i64>>,
    store: Arc<dyn TaskStore>,
    semaphore_timeout: Duration,
}

impl TaskManager {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self::with_semaphore_timeout(store, TASK_SEMAPHORE_TIMEOUT)
    }

    pub fn with_semaphore_timeout(store: Arc<dyn TaskStore>, semaphore_timeout: Duration) -> Self {
        Self {
            tasks: DashMap::new(),
            running_tasks_count: Mutex::new(HashMap::new()),
            store,
            semaphore_timeout,
        }
    }

    pub fn semaphore_timeout(&self) -> Duration {
        self.semaphore_timeout
    }

    /// 加入任务，ID已存在时返回 `DuplicateTask`
    pub fn add(&self, task: MlTask) -> MlResult<()> {
        self.add_with_worker_nodes(task, None)
    }

    pub fn add_with_worker_nodes(
        &self,
        task: MlTask,
        worker_nodes: Option<Vec<String>>,
    ) -> MlResult<()> {
        self.insert_cache(TaskCache::new(task, worker_nodes))
    }

    fn insert_cache(&self, cache: TaskCache) -> MlResult<()> {
        let task_id = cache.task.read().task_id.clone();
        match self.tasks.entry(task_id) {
            Entry::Occupied(entry) => {
                warn!("重复的任务ID: {}", entry.key());
                Err(MlTaskError::DuplicateTask {
                    task_id: entry.key().clone(),
                })
            }
            Entry::Vacant(entry) => {
                debug!(
                    task_id = %entry.key(),
                    task_type = %cache.task_type,
                    "任务加入注册表"
                );
                entry.insert(Arc::new(cache));
                Ok(())
            }
        }
    }

    /// 幂等加入，已存在时不做任何事，返回是否新加入
    pub fn add_if_absent(&self, task: MlTask) -> bool {
        match self.tasks.entry(task.task_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(TaskCache::new(task, None)));
                true
            }
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<MlTask> {
        self.tasks.get(task_id).map(|cache| cache.task())
    }

    pub fn get_cache(&self, task_id: &str) -> Option<Arc<TaskCache>> {
        self.tasks.get(task_id).map(|cache| Arc::clone(cache.value()))
    }

    fn require_cache(&self, task_id: &str) -> MlResult<Arc<TaskCache>> {
        self.get_cache(task_id)
            .ok_or_else(|| MlTaskError::task_not_found(task_id))
    }

    pub fn worker_nodes(&self, task_id: &str) -> Option<Vec<String>> {
        self.tasks
            .get(task_id)
            .map(|cache| cache.worker_nodes().to_vec())
    }

    pub fn add_node_error(&self, task_id: &str, node_id: &str, error: &str) {
        debug!(
            "记录节点错误: task_id={}, node_id={}, error={}",
            task_id, node_id, error
        );
        if let Some(cache) = self.tasks.get(task_id) {
            cache.add_node_error(node_id, error);
        }
    }

    pub fn all_task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn contains_model(&self, model_id: &str) -> bool {
        self.tasks
            .iter()
            .any(|entry| entry.task.read().model_id.as_deref() == Some(model_id))
    }

    /// 当前状态恰好为 RUNNING 的任务数，时间点快照
    pub fn running_task_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| entry.state() == TaskState::Running)
            .count()
    }

    /// 按任务类型统计的运行计数，由 `check_limit_and_add_running_task` 维护
    pub fn running_task_count_of(&self, task_type: TaskType) -> i64 {
        self.running_tasks_count
            .lock()
            .get(&task_type)
            .copied()
            .unwrap_or(0)
            .max(0)
    }

    /// 检查同类型运行任务数上限，未超限时把任务置为 RUNNING（不存在则加入）
    pub fn check_limit_and_add_running_task(&self, mut task: MlTask, limit: usize) -> MlResult<()> {
        let mut counts = self.running_tasks_count.lock();
        let count = counts.entry(task.task_type).or_insert(0);
        if *count < 0 {
            *count = 0;
        }
        debug!(
            "任务 {} 当前 {} 类型运行任务数: {}",
            task.task_id, task.task_type, count
        );
        if *count >= limit as i64 {
            let message = "exceed max running task limit";
            warn!("{} for task {}", message, task.task_id);
            return Err(MlTaskError::LimitExceeded(message.to_string()));
        }

        match self.get_cache(&task.task_id) {
            Some(cache) => {
                let mut cached = cache.task.write();
                if !cached.state.can_transition_to(TaskState::Running) {
                    return Err(MlTaskError::InvalidStateTransition {
                        task_id: cached.task_id.clone(),
                        from: cached.state,
                        to: TaskState::Running,
                    });
                }
                cached.state = TaskState::Running;
                cached.last_update_time = Utc::now();
                if !cache.running_slot.swap(true, Ordering::SeqCst) {
                    *count += 1;
                }
            }
            None => {
                task.state = TaskState::Running;
                let cache = TaskCache::new(task, None);
                cache.running_slot.store(true, Ordering::SeqCst);
                self.insert_cache(cache)?;
                *count += 1;
            }
        }
        Ok(())
    }

    /// 归还任务占用的运行名额，没有占用或已经归还时什么也不做
    ///
    /// 名额标记只在持有计数锁时改变。调用时不能持有任务条目的锁，
    /// 加锁顺序与 `check_limit_and_add_running_task` 一致。
    fn release_running_slot(&self, cache: &TaskCache) {
        let mut counts = self.running_tasks_count.lock();
        if !cache.running_slot.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(count) = counts.get_mut(&cache.task_type) {
            *count = (*count - 1).max(0);
        }
    }

    /// 移除任务，ID不存在时什么也不做
    ///
    /// 仍占用运行名额的任务在移除时归还名额。
    pub fn remove(&self, task_id: &str) {
        let Some((_, cache)) = self.tasks.remove(task_id) else {
            return;
        };
        self.release_running_slot(&cache);
        debug!("任务 {} 已从注册表移除", task_id);
    }

    /// 清空注册表，只在关闭和重置时使用
    pub fn clear(&self) {
        self.tasks.clear();
        self.running_tasks_count.lock().clear();
    }

    /// 在内存中应用变更，返回真正发生变化的字段
    ///
    /// 同一状态重复设置不产生字段；终止状态下只接受同一终止状态，此时错误信息也不再改写。
    /// 进入终止状态时归还运行名额。
    fn apply_update(&self, cache: &TaskCache, update: TaskUpdate) -> MlResult<Map<String, Value>> {
        let fields = Self::apply_to_task(&mut cache.task.write(), update)?;
        let reached_terminal = fields
            .get(STATE_FIELD)
            .and_then(|state| serde_json::from_value::<TaskState>(state.clone()).ok())
            .is_some_and(|state| state.is_terminal());
        if reached_terminal {
            self.release_running_slot(cache);
        }
        Ok(fields)
    }

    fn apply_to_task(task: &mut MlTask, update: TaskUpdate) -> MlResult<Map<String, Value>> {
        let mut fields = Map::new();
        if update.skip_if_terminal && task.is_terminal() {
            debug!("任务 {} 已经处于 {}，变更忽略", task.task_id, task.state);
            return Ok(fields);
        }

        if let Some(state) = update.state {
            if task.state != state {
                if !task.state.can_transition_to(state) {
                    return Err(MlTaskError::InvalidStateTransition {
                        task_id: task.task_id.clone(),
                        from: task.state,
                        to: state,
                    });
                }
                task.state = state;
                fields.insert(STATE_FIELD.to_string(), json!(state));
            } else if task.is_terminal() {
                debug!("任务 {} 已经处于 {}，忽略重复的结束信号", task.task_id, state);
                return Ok(fields);
            }
        }

        if let Some(error) = update.error {
            if task.error.as_deref() != Some(error.as_str()) {
                fields.insert(ERROR_FIELD.to_string(), json!(error));
                task.error = Some(error);
            }
        }

        if let Some(model_id) = update.model_id {
            if task.model_id.as_deref() != Some(model_id.as_str()) {
                fields.insert(MODEL_ID_FIELD.to_string(), json!(model_id));
                task.model_id = Some(model_id);
            }
        }

        if !fields.is_empty() {
            task.last_update_time = Utc::now();
        }
        Ok(fields)
    }

    /// 应用变更并按需写入，返回内存状态是否发生变化
    ///
    /// 异步任务先取得写入许可再改内存，内存变更顺序与写入顺序一致。
    async fn update_and_persist(&self, task_id: &str, update: TaskUpdate, persist: bool) -> MlResult<bool> {
        let cache = self.require_cache(task_id)?;
        let _permit = if persist {
            cache
                .acquire_update_permit(task_id, self.semaphore_timeout)
                .await?
        } else {
            None
        };
        let fields = self.apply_update(&cache, update)?;
        if fields.is_empty() {
            return Ok(false);
        }
        if !persist {
            return Ok(true);
        }
        if !cache.is_async() {
            debug!("同步任务 {} 不写入持久化存储", task_id);
            return Ok(true);
        }
        self.store_update(task_id, fields).await?;
        Ok(true)
    }

    pub async fn update_task_state(&self, task_id: &str, state: TaskState, persist: bool) -> MlResult<()> {
        let update = TaskUpdate {
            state: Some(state),
            ..Default::default()
        };
        self.update_and_persist(task_id, update, persist).await?;
        Ok(())
    }

    /// 记录错误信息并把任务置为 FAILED
    pub async fn update_task_error(&self, task_id: &str, error: &str, persist: bool) -> MlResult<()> {
        self.update_task_state_and_error(task_id, Some(TaskState::Failed), Some(error), persist)
            .await
    }

    /// 合并更新状态和错误信息，最多产生一次持久化写入，载荷只包含变化的字段
    pub async fn update_task_state_and_error(
        &self,
        task_id: &str,
        state: Option<TaskState>,
        error: Option<&str>,
        persist: bool,
    ) -> MlResult<()> {
        let update = TaskUpdate {
            state,
            error: error.map(str::to_string),
            ..Default::default()
        };
        self.update_and_persist(task_id, update, persist).await?;
        Ok(())
    }

    /// 把任务置为 COMPLETED，有产出模型时一并写入模型ID
    pub async fn complete_task(&self, task_id: &str, model_id: Option<&str>, persist: bool) -> MlResult<()> {
        let update = TaskUpdate {
            state: Some(TaskState::Completed),
            model_id: model_id.map(str::to_string),
            ..Default::default()
        };
        self.update_and_persist(task_id, update, persist).await?;
        Ok(())
    }

    /// 把任务置为 RUNNING，异步任务总是写入 `{state: RUNNING}`
    ///
    /// 运行数上限检查只改内存状态，这里负责让持久化记录跟上。
    pub async fn update_task_state_as_running(&self, task_id: &str, is_async: bool) -> MlResult<()> {
        let cache = self.require_cache(task_id)?;
        let _permit = if is_async {
            cache
                .acquire_update_permit(task_id, self.semaphore_timeout)
                .await?
        } else {
            None
        };
        let update = TaskUpdate {
            state: Some(TaskState::Running),
            ..Default::default()
        };
        self.apply_update(&cache, update)?;
        if !is_async {
            return Ok(());
        }
        let mut fields = Map::new();
        fields.insert(STATE_FIELD.to_string(), json!(TaskState::Running));
        self.store_update(task_id, fields).await
    }

    /// 取消任务，已经结束的任务返回 false
    ///
    /// 是否已结束在任务条目的写锁内判断，与并发到达的完成信号不会交错。
    pub async fn cancel_task(&self, task_id: &str) -> MlResult<bool> {
        let cache = self.require_cache(task_id)?;
        let update = TaskUpdate {
            state: Some(TaskState::Cancelled),
            skip_if_terminal: true,
            ..Default::default()
        };
        let cancelled = self
            .update_and_persist(task_id, update, cache.is_async())
            .await?;
        if cancelled {
            info!("任务 {} 已取消", task_id);
        } else {
            debug!("任务 {} 已经结束，取消请求忽略", task_id);
        }
        Ok(cancelled)
    }

    /// 持久化写入给定字段
    ///
    /// `remove_from_cache` 为真时写入前先从注册表移除。字段为空视为调用方错误。
    pub async fn update_ml_task(
        &self,
        task_id: &str,
        fields: Map<String, Value>,
        timeout: Duration,
        remove_from_cache: bool,
    ) -> MlResult<()> {
        let cache = self.get_cache(task_id);
        if remove_from_cache {
            self.remove(task_id);
        }
        let cache = cache.ok_or_else(|| {
            MlTaskError::task_not_found(task_id)
        })?;
        self.write_task(task_id, &cache, fields, timeout).await
    }

    async fn write_task(
        &self,
        task_id: &str,
        cache: &TaskCache,
        fields: Map<String, Value>,
        timeout: Duration,
    ) -> MlResult<()> {
        if fields.is_empty() {
            return Err(MlTaskError::InvalidRequest(
                "Updated fields is null or empty".to_string(),
            ));
        }
        let _permit = cache.acquire_update_permit(task_id, timeout).await?;
        self.store_update(task_id, fields).await
    }

    /// 写入存储，调用方负责持有写入许可
    async fn store_update(&self, task_id: &str, fields: Map<String, Value>) -> MlResult<()> {
        let (content, retry_on_conflict) = stamp_update(fields);

        match self.store.update_task(task_id, &content, retry_on_conflict).await {
            Ok(()) => {
                debug!("任务 {} 持久化更新成功: {:?}", task_id, content.keys());
                Ok(())
            }
            Err(e) => {
                error!("任务 {} 持久化更新失败: {}", task_id, e);
                Err(e)
            }
        }
    }

    /// 绕过注册表和写入许可直接更新持久化存储
    pub async fn update_ml_task_directly(&self, task_id: &str, fields: Map<String, Value>) -> MlResult<()> {
        if task_id.is_empty() {
            return Err(MlTaskError::InvalidRequest(
                "Task ID is null or empty".to_string(),
            ));
        }
        if fields.is_empty() {
            return Err(MlTaskError::InvalidRequest(
                "Updated fields is null or empty".to_string(),
            ));
        }
        if let Some(state) = fields.get(STATE_FIELD) {
            if serde_json::from_value::<TaskState>(state.clone()).is_err() {
                return Err(MlTaskError::InvalidRequest("Invalid task state".to_string()));
            }
        }

        let (content, retry_on_conflict) = stamp_update(fields);
        self.store
            .update_task(task_id, &content, retry_on_conflict)
            .await
            .inspect_err(|e| error!("直接更新任务 {} 失败: {}", task_id, e))
    }

    /// 创建持久化任务文档，索引不可用或写入失败时返回错误
    pub async fn create_ml_task(&self, task: &MlTask) -> MlResult<String> {
        let index_ready = self.store.init_task_index().await.inspect_err(|e| {
            error!("初始化任务索引失败: {}", e);
        })?;
        if !index_ready {
            return Err(MlTaskError::Store(
                "No response to create ML task index".to_string(),
            ));
        }

        let task_id = self.store.index_task(task).await.inspect_err(|e| {
            error!(
                "创建 {} {} 任务失败: {}",
                task.function_name, task.task_type, e
            );
        })?;
        info!("任务创建成功, task_id: {}", task_id);
        Ok(task_id)
    }
}

/// 加上最后更新时间；终止状态写入允许存储在冲突时重试
fn stamp_update(fields: Map<String, Value>) -> (Map<String, Value>, bool) {
    let retry_on_conflict = fields
        .get(STATE_FIELD)
        .and_then(|state| serde_json::from_value::<TaskState>(state.clone()).ok())
        .is_some_and(|state| state.is_terminal());

    let mut content = fields;
    content.insert(
        LAST_UPDATE_TIME_FIELD.to_string(),
        json!(Utc::now().timestamp_millis()),
    );
    (content, retry_on_conflict)
}
