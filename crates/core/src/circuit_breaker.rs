use std::sync::Arc;

use tracing::warn;

use crate::config::CircuitBreakerConfig;
use crate::traits::ResourceUsageProbe;

/// 准入闸门
///
/// 每次准入都重新评估，不缓存上一次的结果。
pub trait CircuitBreaker: Send + Sync {
    fn name(&self) -> &str;

    fn is_open(&self) -> bool;
}

/// 内存熔断器：堆内存使用率超过阈值时打开
pub struct MemoryCircuitBreaker {
    probe: Arc<dyn ResourceUsageProbe>,
    threshold_percent: f64,
}

impl MemoryCircuitBreaker {
    pub const NAME: &'static str = "Memory Circuit Breaker";

    pub fn new(probe: Arc<dyn ResourceUsageProbe>, threshold_percent: f64) -> Self {
        Self {
            probe,
            threshold_percent,
        }
    }
}

impl CircuitBreaker for MemoryCircuitBreaker {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_open(&self) -> bool {
        self.probe.heap_usage_percent() > self.threshold_percent
    }
}

/// 磁盘熔断器：剩余空间低于阈值时打开
pub struct DiskCircuitBreaker {
    probe: Arc<dyn ResourceUsageProbe>,
    free_space_threshold_mb: u64,
}

impl DiskCircuitBreaker {
    pub const NAME: &'static str = "Disk Circuit Breaker";

    pub fn new(probe: Arc<dyn ResourceUsageProbe>, free_space_threshold_mb: u64) -> Self {
        Self {
            probe,
            free_space_threshold_mb,
        }
    }
}

impl CircuitBreaker for DiskCircuitBreaker {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_open(&self) -> bool {
        self.probe.free_disk_space_mb() < self.free_space_threshold_mb
    }
}

/// 熔断器集合
pub struct CircuitBreakerService {
    breakers: Vec<Box<dyn CircuitBreaker>>,
}

impl CircuitBreakerService {
    pub fn new(breakers: Vec<Box<dyn CircuitBreaker>>) -> Self {
        Self { breakers }
    }

    /// 按配置创建内存与磁盘熔断器
    pub fn from_config(config: &CircuitBreakerConfig, probe: Arc<dyn ResourceUsageProbe>) -> Self {
        Self::new(vec![
            Box::new(MemoryCircuitBreaker::new(
                Arc::clone(&probe),
                config.memory_threshold_percent,
            )),
            Box::new(DiskCircuitBreaker::new(
                probe,
                config.disk_free_space_threshold_mb,
            )),
        ])
    }

    /// 返回第一个打开的熔断器名称，全部关闭时返回 None
    pub fn check_open_breaker(&self) -> Option<String> {
        let open = self.breakers.iter().find(|breaker| breaker.is_open())?;
        warn!("{} 已打开，拒绝新任务", open.name());
        Some(open.name().to_string())
    }

    pub fn is_open(&self) -> bool {
        self.breakers.iter().any(|breaker| breaker.is_open())
    }
}
