pub mod clock;
pub mod collaborators;
pub mod component;
pub mod error;
pub mod processor;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    ClusterState, ExecutionScope, FlowTopology, Heartbeat, NoIsolation, NoopHeartbeat, ScopeGuard,
    Standalone,
};
pub use component::{
    ComponentId, ComponentKind, Connectable, ConnectableBuilder, PortDirection, Relationship,
    SchedulingSettings, SchedulingStrategy, DEFAULT_YIELD_PERIOD, TRANSFER_BATCH_SIZE,
};
pub use error::*;
pub use processor::{ProcessContext, Processor};
pub use session::{
    BatchingSessionFactory, FlowRecord, ProcessSession, ProcessSessionFactory, SessionRepository,
    StandardSessionFactory,
};
