//! Per-execution statistics and the recorder they are reported to.

use std::collections::HashMap;
use std::io;
use std::sync::RwLock;
use std::time::Duration;

use millrace_core::ComponentId;

/// Statistics of one task execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationStats {
    component: ComponentId,
    processing_time: Duration,
    invocations: u32,
}

impl InvocationStats {
    pub fn new(component: ComponentId, processing_time: Duration, invocations: u32) -> Self {
        Self {
            component,
            processing_time,
            invocations,
        }
    }

    pub fn component(&self) -> &ComponentId {
        &self.component
    }

    pub fn processing_time(&self) -> Duration {
        self.processing_time
    }

    pub fn invocations(&self) -> u32 {
        self.invocations
    }
}

/// Repository of per-execution statistics.
///
/// A failed `record` degrades reporting only; the scheduler logs it and
/// carries on.
pub trait EventRecorder: Send + Sync {
    fn record(&self, stats: InvocationStats) -> io::Result<()>;
}

/// Aggregated statistics for one component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentStatistics {
    /// Task executions that ran at least once.
    pub executions: u64,
    /// Total invocations of the component's logic.
    pub invocations: u64,
    pub total_processing_time: Duration,
    /// Rolling mean processing time per execution.
    pub avg_processing_time: Duration,
}

impl ComponentStatistics {
    fn add(&mut self, stats: &InvocationStats) {
        self.executions += 1;
        self.invocations += u64::from(stats.invocations);
        self.total_processing_time += stats.processing_time;

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_processing_time = if self.executions == 1 {
            stats.processing_time
        } else {
            let prev_nanos = self.avg_processing_time.as_nanos() as f64;
            let cur_nanos = stats.processing_time.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / self.executions as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }
}

/// In-process recorder aggregating statistics per component.
#[derive(Debug, Default)]
pub struct InMemoryEventRecorder {
    by_component: RwLock<HashMap<ComponentId, ComponentStatistics>>,
}

impl InMemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate for one component, if it ever reported.
    pub fn snapshot(&self, component: &ComponentId) -> Option<ComponentStatistics> {
        self.by_component
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(component)
            .cloned()
    }

    pub fn snapshot_all(&self) -> HashMap<ComponentId, ComponentStatistics> {
        self.by_component
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EventRecorder for InMemoryEventRecorder {
    fn record(&self, stats: InvocationStats) -> io::Result<()> {
        self.by_component
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(stats.component.clone())
            .or_default()
            .add(&stats);
        Ok(())
    }
}
