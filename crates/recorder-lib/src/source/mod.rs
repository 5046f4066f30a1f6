//! Metric sources
//!
//! A [`MetricSource`] yields one [`Sample`] per read: a value per channel,
//! or [`Sample::Missing`] when the hardware behind the metric is absent.
//! Sources are looked up by metric name through a [`SourceRegistry`] when
//! the engine builds its workers.

mod system;

#[cfg(test)]
pub(crate) mod testing;

pub use system::{
    register_system_sources, CpuTemperatureSource, LoadAverageSource, MemoryUsageSource,
    UptimeSource, CPU_TEMPERATURE, LOAD_AVERAGE, MEMORY_USAGE, UPTIME,
};

use crate::error::SourceError;
use crate::models::Sample;
use std::collections::HashMap;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Trait for anything that can be sampled
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Take one reading. Errors are transient: callers skip the cycle.
    async fn read(&self) -> Result<Sample, SourceError>;
}

/// Metric name -> source lookup
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn MetricSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the source for `metric`
    pub fn register(&mut self, metric: impl Into<String>, source: Arc<dyn MetricSource>) {
        let metric = metric.into();
        tracing::debug!(metric = %metric, "Registering metric source");
        self.sources.insert(metric, source);
    }

    pub fn get(&self, metric: &str) -> Option<Arc<dyn MetricSource>> {
        self.sources.get(metric).cloned()
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.sources.contains_key(metric)
    }

    /// Registered metric names, sorted
    pub fn metrics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Reject readings carrying NaN or infinite values
pub fn ensure_finite(sample: Sample) -> Result<Sample, SourceError> {
    if let Sample::Values(values) = &sample {
        if let Some(channel) = values.iter().position(|v| !v.is_finite()) {
            return Err(SourceError::NonFinite { channel });
        }
    }
    Ok(sample)
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedSource;
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let mut registry = SourceRegistry::new();
        assert!(registry.is_empty());

        registry.register("pressure", Arc::new(ScriptedSource::values(vec![vec![1000.0]])));
        registry.register("humidity", Arc::new(ScriptedSource::missing()));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("pressure"));
        assert!(registry.get("gas").is_none());
        assert_eq!(registry.metrics(), vec!["humidity", "pressure"]);
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite(Sample::Values(vec![1.0, 2.0])).is_ok());
        assert!(ensure_finite(Sample::Missing).is_ok());
        assert!(matches!(
            ensure_finite(Sample::Values(vec![1.0, f64::NAN])),
            Err(SourceError::NonFinite { channel: 1 })
        ));
    }
}
