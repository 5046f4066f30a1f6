//! Host metric sources backed by procfs and sysfs
//!
//! Reads:
//! - thermal_zone0/temp for CPU temperature (millidegrees C)
//! - /proc/uptime for uptime
//! - /proc/loadavg for the 1/5/15 minute load averages
//! - /proc/meminfo for memory usage
//!
//! A backing file that does not exist means the sensor is not present and
//! yields [`Sample::Missing`]. Any other read or parse failure is transient.

use super::{MetricSource, SourceRegistry};
use crate::error::SourceError;
use crate::models::Sample;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

pub const CPU_TEMPERATURE: &str = "cpu_temperature";
pub const UPTIME: &str = "uptime";
pub const LOAD_AVERAGE: &str = "load_average";
pub const MEMORY_USAGE: &str = "memory_usage";

/// Register every built-in host source under its metric name
pub fn register_system_sources(
    registry: &mut SourceRegistry,
    proc_root: impl AsRef<Path>,
    sys_root: impl AsRef<Path>,
) {
    let proc_root = proc_root.as_ref();
    let sys_root = sys_root.as_ref();
    registry.register(CPU_TEMPERATURE, Arc::new(CpuTemperatureSource::with_sys_path(sys_root)));
    registry.register(UPTIME, Arc::new(UptimeSource::with_proc_path(proc_root)));
    registry.register(LOAD_AVERAGE, Arc::new(LoadAverageSource::with_proc_path(proc_root)));
    registry.register(MEMORY_USAGE, Arc::new(MemoryUsageSource::with_proc_path(proc_root)));
}

/// Read a file, mapping "not found" to `None`
async fn read_optional(path: &Path) -> Result<Option<String>, SourceError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SourceError::Io {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

fn parse_field(path: &Path, field: Option<&str>) -> Result<f64, SourceError> {
    let field = field.ok_or_else(|| SourceError::Parse {
        origin: path.display().to_string(),
        detail: "missing field".to_string(),
    })?;
    field.trim().parse::<f64>().map_err(|e| SourceError::Parse {
        origin: path.display().to_string(),
        detail: format!("'{}': {}", field, e),
    })
}

/// CPU temperature in degrees C
pub struct CpuTemperatureSource {
    path: PathBuf,
}

impl CpuTemperatureSource {
    pub fn new() -> Self {
        Self::with_sys_path("/sys")
    }

    /// Create source with custom sysfs root (for testing)
    pub fn with_sys_path(sys_root: impl AsRef<Path>) -> Self {
        Self {
            path: sys_root.as_ref().join("class/thermal/thermal_zone0/temp"),
        }
    }
}

impl Default for CpuTemperatureSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for CpuTemperatureSource {
    async fn read(&self) -> Result<Sample, SourceError> {
        let Some(content) = read_optional(&self.path).await? else {
            return Ok(Sample::Missing);
        };
        let millidegrees = parse_field(&self.path, Some(&content))?;
        Ok(Sample::scalar(millidegrees / 1000.0))
    }
}

/// System uptime in whole minutes
pub struct UptimeSource {
    path: PathBuf,
}

impl UptimeSource {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    pub fn with_proc_path(proc_root: impl AsRef<Path>) -> Self {
        Self {
            path: proc_root.as_ref().join("uptime"),
        }
    }
}

impl Default for UptimeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for UptimeSource {
    async fn read(&self) -> Result<Sample, SourceError> {
        let Some(content) = read_optional(&self.path).await? else {
            return Ok(Sample::Missing);
        };
        let seconds = parse_field(&self.path, content.split_whitespace().next())?;
        Ok(Sample::scalar((seconds / 60.0).floor()))
    }
}

/// Load averages as three channels: 1, 5 and 15 minutes
pub struct LoadAverageSource {
    path: PathBuf,
}

impl LoadAverageSource {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    pub fn with_proc_path(proc_root: impl AsRef<Path>) -> Self {
        Self {
            path: proc_root.as_ref().join("loadavg"),
        }
    }

    /// Parse /proc/loadavg contents
    pub fn parse_loadavg(path: &Path, content: &str) -> Result<Vec<f64>, SourceError> {
        let mut fields = content.split_whitespace();
        (0..3).map(|_| parse_field(path, fields.next())).collect()
    }
}

impl Default for LoadAverageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for LoadAverageSource {
    async fn read(&self) -> Result<Sample, SourceError> {
        let Some(content) = read_optional(&self.path).await? else {
            return Ok(Sample::Missing);
        };
        Ok(Sample::Values(Self::parse_loadavg(&self.path, &content)?))
    }
}

/// Memory in use as a percentage of MemTotal
pub struct MemoryUsageSource {
    path: PathBuf,
}

impl MemoryUsageSource {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    pub fn with_proc_path(proc_root: impl AsRef<Path>) -> Self {
        Self {
            path: proc_root.as_ref().join("meminfo"),
        }
    }

    /// Parse /proc/meminfo contents
    /// Returns used memory percentage
    pub fn parse_meminfo(path: &Path, content: &str) -> Result<f64, SourceError> {
        let mut total = None;
        let mut available = None;

        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                match parts[0] {
                    "MemTotal:" => total = Some(parse_field(path, Some(parts[1]))?),
                    "MemAvailable:" => available = Some(parse_field(path, Some(parts[1]))?),
                    _ => {}
                }
            }
        }

        match (total, available) {
            (Some(total), Some(available)) if total > 0.0 => {
                Ok((total - available) / total * 100.0)
            }
            _ => Err(SourceError::Parse {
                origin: path.display().to_string(),
                detail: "MemTotal/MemAvailable not found".to_string(),
            }),
        }
    }
}

impl Default for MemoryUsageSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for MemoryUsageSource {
    async fn read(&self) -> Result<Sample, SourceError> {
        let Some(content) = read_optional(&self.path).await? else {
            return Ok(Sample::Missing);
        };
        Ok(Sample::scalar(Self::parse_meminfo(&self.path, &content)?))
    }
}
