//! Scripted sources for worker tests

use super::MetricSource;
use crate::error::SourceError;
use crate::models::Sample;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One scripted step
#[derive(Debug, Clone)]
pub enum Step {
    Values(Vec<f64>),
    Missing,
    Fail,
}

/// Replays a fixed script, then repeats the last step forever
pub struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    reads: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        let last = steps.last().cloned().unwrap_or(Step::Missing);
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(last),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn values(readings: Vec<Vec<f64>>) -> Self {
        Self::new(readings.into_iter().map(Step::Values).collect())
    }

    pub fn scalars(readings: &[f64]) -> Self {
        Self::new(readings.iter().map(|v| Step::Values(vec![*v])).collect())
    }

    pub fn missing() -> Self {
        Self::new(vec![Step::Missing])
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricSource for ScriptedSource {
    async fn read(&self) -> Result<Sample, SourceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut steps = self.steps.lock().unwrap();
            match steps.pop_front() {
                Some(step) => step,
                None => self.last.lock().unwrap().clone(),
            }
        };
        match step {
            Step::Values(values) => Ok(Sample::Values(values)),
            Step::Missing => Ok(Sample::Missing),
            Step::Fail => Err(SourceError::Other("scripted failure".to_string())),
        }
    }
}
