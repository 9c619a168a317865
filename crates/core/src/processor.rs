//! Processor capability trait and the context handed to processing logic.

use std::sync::Arc;

use crate::clock::Clock;
use crate::component::{ComponentId, Connectable, Relationship};
use crate::error::TriggerError;
use crate::session::ProcessSessionFactory;

/// Processing logic of a processor component.
///
/// The lifecycle hooks are fixed callback slots. Each defaults to doing
/// nothing; implementations override only the ones they need. Hook errors
/// are logged by the scheduler and never stop a lifecycle transition.
pub trait Processor: Send + Sync {
    /// Perform one unit of work. Sessions come from `sessions`; in batch
    /// mode they share one underlying session that is committed by the
    /// scheduler after the batch.
    fn on_trigger(
        &self,
        context: &ProcessContext,
        sessions: &dyn ProcessSessionFactory,
    ) -> Result<(), TriggerError>;

    /// Called before the component is first submitted.
    fn on_scheduled(&self, _context: &ProcessContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the component stops being scheduled, while threads may
    /// still be running.
    fn on_unscheduled(&self, _context: &ProcessContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once per stop cycle, after the last running thread finished.
    fn on_stopped(&self, _context: &ProcessContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// View of the component handed to processing logic and hooks.
#[derive(Clone)]
pub struct ProcessContext {
    component: Arc<Connectable>,
    clock: Arc<dyn Clock>,
}

impl ProcessContext {
    pub fn new(component: Arc<Connectable>, clock: Arc<dyn Clock>) -> Self {
        Self { component, clock }
    }

    pub fn component_id(&self) -> &ComponentId {
        self.component.id()
    }

    pub fn component(&self) -> &Arc<Connectable> {
        &self.component
    }

    pub fn relationships(&self) -> &[Relationship] {
        self.component.relationships()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.component.property(key)
    }

    /// Ask the scheduler not to run this component again until its
    /// configured yield period has elapsed.
    pub fn yield_component(&self) {
        let period = self.component.settings().yield_period;
        self.component.yield_for(period, self.clock.now());
    }
}
