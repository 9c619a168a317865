use std::sync::Arc;

use millrace_core::{
    Clock, ClusterState, ExecutionScope, FlowTopology, Heartbeat, NoIsolation, NoopHeartbeat,
    SessionRepository, Standalone, SystemClock,
};

use crate::stats::{EventRecorder, InMemoryEventRecorder};

/// Engine collaborators the scheduler consults while running tasks.
#[derive(Clone)]
pub struct EngineServices {
    pub topology: Arc<dyn FlowTopology>,
    pub sessions: Arc<dyn SessionRepository>,
    pub cluster: Arc<dyn ClusterState>,
    pub heartbeat: Arc<dyn Heartbeat>,
    pub scope: Arc<dyn ExecutionScope>,
    pub recorder: Arc<dyn EventRecorder>,
    pub clock: Arc<dyn Clock>,
}

impl EngineServices {
    /// Services for a standalone node: no cluster, no isolation, system
    /// clock and an in-memory statistics recorder.
    pub fn standalone(
        topology: Arc<dyn FlowTopology>,
        sessions: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            topology,
            sessions,
            cluster: Arc::new(Standalone),
            heartbeat: Arc::new(NoopHeartbeat),
            scope: Arc::new(NoIsolation),
            recorder: Arc::new(InMemoryEventRecorder::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterState>) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Arc<dyn Heartbeat>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_scope(mut self, scope: Arc<dyn ExecutionScope>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
