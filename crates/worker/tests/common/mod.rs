#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use mltask_core::models::{
    DataFrame, FunctionName, MlInput, MlModel, MlOutput, MlTask, ModelTensor, NodeInfo,
    NodeRole, NodeStats, TaskState, TransportRequest,
};
use mltask_core::traits::{
    ClusterTopology, DatasetHandler, MlEngine, ModelDeployer, ModelStore, NodeStatsCollector,
    ResourceUsageProbe, TaskStore, Transport,
};
use mltask_core::{AppConfig, MlResult, MlTaskError};
use mltask_worker::{MlTaskNode, NodeServices};

pub fn sample_frame() -> DataFrame {
    DataFrame::new(
        vec!["x".to_string(), "y".to_string()],
        vec![vec![json!(1.0), json!(2.0)], vec![json!(3.0), json!(4.0)]],
    )
}

#[derive(Default)]
pub struct MockEngine {
    pub train_calls: AtomicUsize,
    pub predict_calls: AtomicUsize,
    pub execute_calls: AtomicUsize,
    pub fail_with: Mutex<Option<String>>,
    pub predict_output: Mutex<Option<MlOutput>>,
    pub delay: Option<Duration>,
}

impl MockEngine {
    fn check_failure(&self) -> MlResult<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match self.fail_with.lock().unwrap().clone() {
            Some(message) => Err(MlTaskError::Engine(message)),
            None => Ok(()),
        }
    }

    pub fn fail(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn recover(&self) {
        *self.fail_with.lock().unwrap() = None;
    }

    pub fn set_predict_output(&self, output: MlOutput) {
        *self.predict_output.lock().unwrap() = Some(output);
    }
}

impl MlEngine for MockEngine {
    fn train(&self, input: &MlInput, _data: &DataFrame) -> MlResult<MlModel> {
        self.train_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(MlModel::new("trained", input.function_name, Some("weights".to_string())))
    }

    fn predict(
        &self,
        _input: &MlInput,
        data: Option<&DataFrame>,
        _model: &MlModel,
    ) -> MlResult<MlOutput> {
        self.predict_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        if let Some(output) = self.predict_output.lock().unwrap().clone() {
            return Ok(output);
        }
        Ok(MlOutput::Prediction {
            task_id: None,
            status: TaskState::Running,
            prediction_result: data.cloned().unwrap_or_default(),
        })
    }

    fn train_and_predict(&self, _input: &MlInput, data: &DataFrame) -> MlResult<MlOutput> {
        self.train_calls.fetch_add(1, Ordering::SeqCst);
        self.predict_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(MlOutput::Prediction {
            task_id: None,
            status: TaskState::Running,
            prediction_result: data.clone(),
        })
    }

    fn execute(&self, function_name: FunctionName, input: &Value) -> MlResult<Value> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(json!({ "function": function_name.as_str(), "echo": input }))
    }
}

pub struct MockDatasetHandler;

#[async_trait]
impl DatasetHandler for MockDatasetHandler {
    async fn parse_search_query(&self, indices: &[String], _query: &Value) -> MlResult<DataFrame> {
        if indices.is_empty() {
            return Err(MlTaskError::InvalidRequest("no index to search".to_string()));
        }
        Ok(sample_frame())
    }
}

#[derive(Default)]
pub struct MockTaskStore {
    pub indexed: Mutex<Vec<MlTask>>,
    pub updates: Mutex<Vec<(String, Map<String, Value>)>>,
    pub fail_index: bool,
}

impl MockTaskStore {
    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    pub fn updates_for(&self, task_id: &str) -> Vec<Map<String, Value>> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, fields)| fields.clone())
            .collect()
    }

    pub fn last_state(&self, task_id: &str) -> Option<TaskState> {
        self.updates_for(task_id)
            .iter()
            .rev()
            .find_map(|fields| fields.get("state").cloned())
            .and_then(|state| serde_json::from_value(state).ok())
    }
}

#[async_trait]
impl TaskStore for MockTaskStore {
    async fn init_task_index(&self) -> MlResult<bool> {
        Ok(true)
    }

    async fn index_task(&self, task: &MlTask) -> MlResult<String> {
        if self.fail_index {
            return Err(MlTaskError::Store("task index is read only".to_string()));
        }
        self.indexed.lock().unwrap().push(task.clone());
        Ok(task.task_id.clone())
    }

    async fn get_task(&self, task_id: &str) -> MlResult<Option<MlTask>> {
        Ok(self
            .indexed
            .lock()
            .unwrap()
            .iter()
            .find(|task| task.task_id == task_id)
            .cloned())
    }

    async fn update_task(
        &self,
        task_id: &str,
        fields: &Map<String, Value>,
        _retry_on_conflict: bool,
    ) -> MlResult<()> {
        self.updates
            .lock()
            .unwrap()
            .push((task_id.to_string(), fields.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockModelStore {
    pub models: Mutex<HashMap<String, MlModel>>,
}

impl MockModelStore {
    pub fn insert(&self, model: MlModel) {
        self.models
            .lock()
            .unwrap()
            .insert(model.model_id.clone(), model);
    }
}

#[async_trait]
impl ModelStore for MockModelStore {
    async fn save_model(&self, model: &MlModel) -> MlResult<String> {
        self.insert(model.clone());
        Ok(model.model_id.clone())
    }

    async fn get_model(&self, model_id: &str) -> MlResult<Option<MlModel>> {
        Ok(self.models.lock().unwrap().get(model_id).cloned())
    }
}

#[derive(Default)]
pub struct MockDeployer {
    pub deployed: Mutex<HashMap<String, Vec<String>>>,
    pub deploy_calls: AtomicUsize,
}

#[async_trait]
impl ModelDeployer for MockDeployer {
    async fn deployed_nodes(&self, model_id: &str) -> MlResult<Vec<String>> {
        Ok(self
            .deployed
            .lock()
            .unwrap()
            .get(model_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn deploy_model(&self, model_id: &str, target_nodes: &[String]) -> MlResult<Vec<String>> {
        self.deploy_calls.fetch_add(1, Ordering::SeqCst);
        self.deployed
            .lock()
            .unwrap()
            .insert(model_id.to_string(), target_nodes.to_vec());
        Ok(target_nodes.to_vec())
    }
}

/// 记录转发请求，按预设返回结果或失败
#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<(String, TransportRequest)>>,
    pub response: Mutex<Option<MlResult<Value>>>,
}

impl MockTransport {
    pub fn respond_with(&self, response: MlResult<Value>) {
        *self.response.lock().unwrap() = Some(response);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_request(&self, target_node: &str, request: TransportRequest) -> MlResult<Value> {
        self.sent
            .lock()
            .unwrap()
            .push((target_node.to_string(), request));
        self.response
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(MlTaskError::Transport(format!("node {target_node} is unreachable"))))
    }
}

pub struct StaticTopology {
    pub local: String,
    pub nodes: Vec<NodeInfo>,
}

#[async_trait]
impl ClusterTopology for StaticTopology {
    fn local_node_id(&self) -> &str {
        &self.local
    }

    async fn nodes(&self) -> MlResult<Vec<NodeInfo>> {
        Ok(self.nodes.clone())
    }
}

/// 堆内存按千分比存储，测试中可以随时调整
pub struct AdjustableProbe {
    heap_permille: AtomicU64,
}

impl AdjustableProbe {
    pub fn new(heap_percent: f64) -> Self {
        Self {
            heap_permille: AtomicU64::new((heap_percent * 10.0) as u64),
        }
    }

    pub fn set_heap(&self, heap_percent: f64) {
        self.heap_permille
            .store((heap_percent * 10.0) as u64, Ordering::SeqCst);
    }
}

impl ResourceUsageProbe for AdjustableProbe {
    fn heap_usage_percent(&self) -> f64 {
        self.heap_permille.load(Ordering::SeqCst) as f64 / 10.0
    }

    fn free_disk_space_mb(&self) -> u64 {
        100 * 1024
    }
}

/// 固定的集群负载
pub struct FixedStatsCollector {
    pub stats: Mutex<HashMap<String, NodeStats>>,
}

#[async_trait]
impl NodeStatsCollector for FixedStatsCollector {
    async fn collect_node_stats(&self, node_ids: &[String]) -> MlResult<HashMap<String, NodeStats>> {
        Ok(self
            .stats
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| node_ids.contains(id))
            .map(|(id, stats)| (id.clone(), stats.clone()))
            .collect())
    }
}

pub struct TestNode {
    pub node: MlTaskNode,
    pub engine: Arc<MockEngine>,
    pub task_store: Arc<MockTaskStore>,
    pub model_store: Arc<MockModelStore>,
    pub deployer: Arc<MockDeployer>,
    pub transport: Arc<MockTransport>,
    pub probe: Arc<AdjustableProbe>,
}

pub struct TestNodeBuilder {
    local: String,
    peers: Vec<(String, f64, i64)>,
    engine: MockEngine,
    task_store: MockTaskStore,
    config: AppConfig,
}

impl TestNodeBuilder {
    /// 本节点负载为空闲
    pub fn new(local: &str) -> Self {
        let mut config = AppConfig::default();
        config.node.id = local.to_string();
        Self {
            local: local.to_string(),
            peers: vec![(local.to_string(), 10.0, 0)],
            engine: MockEngine::default(),
            task_store: MockTaskStore::default(),
            config,
        }
    }

    pub fn local_load(mut self, heap: f64, executing: i64) -> Self {
        self.peers[0] = (self.local.clone(), heap, executing);
        self
    }

    pub fn peer(mut self, id: &str, heap: f64, executing: i64) -> Self {
        self.peers.push((id.to_string(), heap, executing));
        self
    }

    pub fn engine(mut self, engine: MockEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn task_store(mut self, task_store: MockTaskStore) -> Self {
        self.task_store = task_store;
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut AppConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> TestNode {
        let nodes = self
            .peers
            .iter()
            .map(|(id, _, _)| NodeInfo::new(id.clone(), vec![NodeRole::Ml]))
            .collect();
        let stats = self
            .peers
            .iter()
            .map(|(id, heap, executing)| (id.clone(), NodeStats::new(*heap, *executing)))
            .collect();

        let engine = Arc::new(self.engine);
        let task_store = Arc::new(self.task_store);
        let model_store = Arc::new(MockModelStore::default());
        let deployer = Arc::new(MockDeployer::default());
        let transport = Arc::new(MockTransport::default());
        let probe = Arc::new(AdjustableProbe::new(10.0));

        let services = NodeServices {
            engine: engine.clone(),
            dataset_handler: Arc::new(MockDatasetHandler),
            task_store: task_store.clone(),
            model_store: model_store.clone(),
            model_deployer: deployer.clone(),
            transport: transport.clone(),
            topology: Arc::new(StaticTopology {
                local: self.local.clone(),
                nodes,
            }),
            probe: probe.clone(),
            stats_collector: Some(Arc::new(FixedStatsCollector {
                stats: Mutex::new(stats),
            })),
        };
        let node = MlTaskNode::build(&self.config, services).expect("build test node");

        TestNode {
            node,
            engine,
            task_store,
            model_store,
            deployer,
            transport,
            probe,
        }
    }
}

/// 等待条件成立，超时则失败
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not met within timeout");
}

pub fn embedding_output(shape: Vec<usize>) -> MlOutput {
    MlOutput::ModelTensor {
        tensors: vec![ModelTensor {
            name: "sentence_embedding".to_string(),
            shape,
            data: vec![0.1; 4],
        }],
    }
}
