use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::models::{NodeInfo, NodeRole};
use crate::{MlResult, MlTaskError};

/// 配置段校验
pub trait ConfigValidator {
    fn validate(&self) -> MlResult<()>;
}

fn invalid(message: impl Into<String>) -> MlTaskError {
    MlTaskError::Configuration(message.into())
}

/// 本节点身份
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub id: String,
    pub roles: Vec<NodeRole>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: "mltask-node-1".to_string(),
            roles: vec![NodeRole::Ml, NodeRole::Data],
        }
    }
}

impl NodeConfig {
    pub fn node_info(&self) -> NodeInfo {
        NodeInfo::new(self.id.clone(), self.roles.clone())
    }
}

impl ConfigValidator for NodeConfig {
    fn validate(&self) -> MlResult<()> {
        if self.id.trim().is_empty() {
            return Err(invalid("节点ID不能为空"));
        }
        if self.roles.is_empty() {
            return Err(invalid(format!("节点 {} 至少需要一个角色", self.id)));
        }
        Ok(())
    }
}

/// 静态集群成员
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub peers: Vec<NodeInfo>,
}

impl ConfigValidator for ClusterConfig {
    fn validate(&self) -> MlResult<()> {
        for peer in &self.peers {
            if peer.id.trim().is_empty() {
                return Err(invalid("集群节点ID不能为空"));
            }
            if peer.roles.is_empty() {
                return Err(invalid(format!("集群节点 {} 至少需要一个角色", peer.id)));
            }
        }
        let mut ids: Vec<&str> = self.peers.iter().map(|peer| peer.id.as_str()).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(invalid("集群节点ID重复"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// "round_robin" 或 "least_loaded"
    pub dispatch_strategy: String,
    pub max_heap_usage_percent: f64,
    pub max_ml_tasks_per_node: i64,
    pub only_run_on_ml_node: bool,
}

impl DispatcherConfig {
    pub const VALID_STRATEGIES: [&'static str; 2] = ["round_robin", "least_loaded"];
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            dispatch_strategy: "round_robin".to_string(),
            max_heap_usage_percent: 85.0,
            max_ml_tasks_per_node: 10,
            only_run_on_ml_node: false,
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> MlResult<()> {
        if !Self::VALID_STRATEGIES.contains(&self.dispatch_strategy.as_str()) {
            return Err(invalid(format!(
                "无效的分派策略: {}，支持的策略: {:?}",
                self.dispatch_strategy,
                Self::VALID_STRATEGIES
            )));
        }
        if !(0.0..=100.0).contains(&self.max_heap_usage_percent) {
            return Err(invalid("堆内存阈值必须在0到100之间"));
        }
        if self.max_ml_tasks_per_node <= 0 {
            return Err(invalid("单节点最大任务数必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub memory_threshold_percent: f64,
    pub disk_free_space_threshold_mb: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            memory_threshold_percent: 85.0,
            disk_free_space_threshold_mb: 5 * 1024,
        }
    }
}

impl ConfigValidator for CircuitBreakerConfig {
    fn validate(&self) -> MlResult<()> {
        if !(0.0..=100.0).contains(&self.memory_threshold_percent) {
            return Err(invalid("内存熔断阈值必须在0到100之间"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// 单个任务持久化写入许可的等待时间
    pub semaphore_timeout_ms: u64,
    pub max_running_tasks: usize,
    pub auto_deploy_enabled: bool,
    /// 异步任务失败写入完成后是否从内存注册表移除
    pub async_cleanup_on_failure: bool,
}

impl TaskConfig {
    pub fn semaphore_timeout(&self) -> Duration {
        Duration::from_millis(self.semaphore_timeout_ms)
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            semaphore_timeout_ms: 5000,
            max_running_tasks: 10,
            auto_deploy_enabled: true,
            async_cleanup_on_failure: true,
        }
    }
}

impl ConfigValidator for TaskConfig {
    fn validate(&self) -> MlResult<()> {
        if self.semaphore_timeout_ms == 0 {
            return Err(invalid("任务写入许可超时时间必须大于0"));
        }
        if self.max_running_tasks == 0 {
            return Err(invalid("最大运行任务数必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" 或 "pretty"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ConfigValidator for LoggingConfig {
    fn validate(&self) -> MlResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(invalid(format!("无效的日志级别: {}", self.level)));
        }
        if !["json", "pretty"].contains(&self.format.as_str()) {
            return Err(invalid(format!("无效的日志格式: {}", self.format)));
        }
        Ok(())
    }
}

/// 节点配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub cluster: ClusterConfig,
    pub dispatcher: DispatcherConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub task: TaskConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 内置默认值
    /// 2. 配置文件（TOML格式），未指定时按默认路径查找
    /// 3. 环境变量覆盖（前缀 MLTASK_，嵌套字段用 `__` 分隔，例如 `MLTASK_TASK__MAX_RUNNING_TASKS`）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/mltask.toml",
                "mltask.toml",
                "/etc/mltask/config.toml",
            ];
            if let Some(path) = default_paths.iter().find(|path| Path::new(path).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("MLTASK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.node.validate().context("节点配置验证失败")?;
        self.cluster.validate().context("集群配置验证失败")?;
        self.dispatcher.validate().context("分派器配置验证失败")?;
        self.circuit_breaker
            .validate()
            .context("熔断器配置验证失败")?;
        self.task.validate().context("任务配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;
        Ok(())
    }

    /// 本节点加上静态集群成员，本节点ID出现在成员列表中时以成员列表为准
    pub fn cluster_nodes(&self) -> Vec<NodeInfo> {
        let mut nodes = self.cluster.peers.clone();
        if !nodes.iter().any(|node| node.id == self.node.id) {
            nodes.insert(0, self.node.node_info());
        }
        nodes
    }
}
