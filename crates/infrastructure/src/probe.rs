use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use mltask_core::traits::ResourceUsageProbe;

/// 读取本机资源使用情况
///
/// 内存占比按进程常驻内存与系统总内存计算；磁盘剩余空间通过 statvfs 读取数据目录所在分区，
/// 每次调用都重新读取。
/// 读取失败时视为资源充足，不触发熔断。
pub struct SystemResourceProbe {
    data_path: PathBuf,
}

impl SystemResourceProbe {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
        }
    }

    #[cfg(target_os = "linux")]
    fn read_heap_usage() -> Option<f64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        let rss_kb = parse_kb_field(&status, "VmRSS:")?;
        let total_kb = parse_kb_field(&meminfo, "MemTotal:")?;
        if total_kb == 0 {
            return None;
        }
        Some(rss_kb as f64 * 100.0 / total_kb as f64)
    }

    #[cfg(not(target_os = "linux"))]
    fn read_heap_usage() -> Option<f64> {
        None
    }

    fn read_free_disk_mb(&self) -> Option<u64> {
        fs4::available_space(&self.data_path)
            .inspect_err(|e| debug!("statvfs {} 失败: {}", self.data_path.display(), e))
            .ok()
            .map(|bytes| bytes / (1024 * 1024))
    }
}

impl ResourceUsageProbe for SystemResourceProbe {
    fn heap_usage_percent(&self) -> f64 {
        Self::read_heap_usage().unwrap_or_else(|| {
            debug!("无法读取内存使用情况");
            0.0
        })
    }

    fn free_disk_space_mb(&self) -> u64 {
        self.read_free_disk_mb().unwrap_or_else(|| {
            debug!("无法读取 {} 的磁盘剩余空间", self.data_path.display());
            u64::MAX
        })
    }
}

fn parse_kb_field(content: &str, field: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with(field))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

/// 固定值探针，可在运行时调整，用于嵌入式部署和测试
pub struct StaticResourceProbe {
    heap_permille: AtomicU64,
    free_disk_mb: AtomicU64,
}

impl StaticResourceProbe {
    pub fn new(heap_usage_percent: f64, free_disk_mb: u64) -> Self {
        Self {
            heap_permille: AtomicU64::new(to_permille(heap_usage_percent)),
            free_disk_mb: AtomicU64::new(free_disk_mb),
        }
    }

    pub fn set_heap_usage(&self, heap_usage_percent: f64) {
        self.heap_permille
            .store(to_permille(heap_usage_percent), Ordering::SeqCst);
    }

    pub fn set_free_disk(&self, free_disk_mb: u64) {
        self.free_disk_mb.store(free_disk_mb, Ordering::SeqCst);
    }
}

fn to_permille(percent: f64) -> u64 {
    (percent.clamp(0.0, 100.0) * 10.0).round() as u64
}

impl ResourceUsageProbe for StaticResourceProbe {
    fn heap_usage_percent(&self) -> f64 {
        self.heap_permille.load(Ordering::SeqCst) as f64 / 10.0
    }

    fn free_disk_space_mb(&self) -> u64 {
        self.free_disk_mb.load(Ordering::SeqCst)
    }
}
