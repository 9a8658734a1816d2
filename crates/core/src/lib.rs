pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod models;
pub mod stats;
pub mod traits;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerService, DiskCircuitBreaker, MemoryCircuitBreaker,
};
pub use config::{
    AppConfig, CircuitBreakerConfig, ClusterConfig, ConfigValidator, DispatcherConfig,
    LoggingConfig, NodeConfig, TaskConfig,
};
pub use errors::{MlResult, MlTaskError};
pub use stats::{ActionStatKey, ExecutingTaskGuard, MlStats, NodeStatKey};
pub use traits::*;
