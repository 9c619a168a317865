//! Narrow interfaces to the parts of the engine the scheduler only queries.

use crate::component::{ComponentId, Relationship};

/// Read-only view of the flow graph around a component.
pub trait FlowTopology: Send + Sync {
    fn has_incoming_connection(&self, component: &ComponentId) -> bool;

    /// Whether at least one record is queued on any incoming connection.
    fn has_queued_input(&self, component: &ComponentId) -> bool;

    /// Whether every connection fed by `relationship` can accept more
    /// records (i.e. is not back-pressured).
    fn is_relationship_available(&self, component: &ComponentId, relationship: &Relationship)
        -> bool;
}

/// Cluster membership as seen by this node.
pub trait ClusterState: Send + Sync {
    fn is_clustered(&self) -> bool;
    fn is_primary(&self) -> bool;
}

/// A node that is not part of a cluster.
#[derive(Debug, Default, Clone, Copy)]
pub struct Standalone;

impl ClusterState for Standalone {
    fn is_clustered(&self) -> bool {
        false
    }

    fn is_primary(&self) -> bool {
        true
    }
}

/// Liveness signal to the surrounding engine.
pub trait Heartbeat: Send + Sync {
    fn heartbeat(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHeartbeat;

impl Heartbeat for NoopHeartbeat {
    fn heartbeat(&self) {}
}

/// Isolation boundary (e.g. a plugin loader) around component logic.
pub trait ExecutionScope: Send + Sync {
    fn acquire(&self, component: &ComponentId);
    fn release(&self, component: &ComponentId);
}

/// Runs component logic without any isolation boundary.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIsolation;

impl ExecutionScope for NoIsolation {
    fn acquire(&self, _component: &ComponentId) {}
    fn release(&self, _component: &ComponentId) {}
}

/// Holds an [`ExecutionScope`] for the lifetime of the guard.
///
/// Release happens in `Drop`, so it also runs while unwinding.
pub struct ScopeGuard<'a> {
    scope: &'a dyn ExecutionScope,
    component: &'a ComponentId,
}

impl<'a> ScopeGuard<'a> {
    pub fn enter(scope: &'a dyn ExecutionScope, component: &'a ComponentId) -> Self {
        scope.acquire(component);
        Self { scope, component }
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scope.release(self.component);
    }
}
