//! Hand-written collaborators shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use millrace_core::{
    Clock, ClusterState, ComponentId, Connectable, ConnectableBuilder, ExecutionScope, FlowRecord,
    FlowTopology, Heartbeat, ManualClock, ProcessContext, ProcessSession, ProcessSessionFactory,
    Processor, Relationship, SessionError, SessionRepository, TriggerError,
};

use crate::schedule_state::ScheduleState;
use crate::services::EngineServices;
use crate::stats::{EventRecorder, InvocationStats};
use crate::task::ContinualRunTask;

pub(crate) const ADMIN_YIELD: Duration = Duration::from_secs(30);

// ── Topology ─────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct StubTopology {
    incoming: Mutex<HashSet<String>>,
    queued: Mutex<HashMap<String, usize>>,
    unavailable: Mutex<HashSet<(String, String)>>,
    all_unavailable: AtomicBool,
}

impl StubTopology {
    pub fn connect_input(&self, component: &str) {
        self.incoming.lock().unwrap().insert(component.to_string());
    }

    pub fn set_queued(&self, component: &str, count: usize) {
        self.queued.lock().unwrap().insert(component.to_string(), count);
    }

    pub fn set_unavailable(&self, component: &str, relationship: &str) {
        self.unavailable
            .lock()
            .unwrap()
            .insert((component.to_string(), relationship.to_string()));
    }

    pub fn set_available(&self, component: &str, relationship: &str) {
        self.unavailable
            .lock()
            .unwrap()
            .remove(&(component.to_string(), relationship.to_string()));
    }

    pub fn set_all_unavailable(&self, flag: bool) {
        self.all_unavailable.store(flag, Ordering::SeqCst);
    }
}

impl FlowTopology for StubTopology {
    fn has_incoming_connection(&self, component: &ComponentId) -> bool {
        self.incoming.lock().unwrap().contains(component.as_str())
    }

    fn has_queued_input(&self, component: &ComponentId) -> bool {
        self.queued
            .lock()
            .unwrap()
            .get(component.as_str())
            .is_some_and(|n| *n > 0)
    }

    fn is_relationship_available(&self, component: &ComponentId, relationship: &Relationship) -> bool {
        if self.all_unavailable.load(Ordering::SeqCst) {
            return false;
        }
        !self
            .unavailable
            .lock()
            .unwrap()
            .contains(&(component.to_string(), relationship.name().to_string()))
    }
}

// ── Cluster ──────────────────────────────────────────────────

pub(crate) struct StubCluster {
    clustered: bool,
    primary: bool,
}

impl StubCluster {
    pub fn primary() -> Self {
        Self { clustered: true, primary: true }
    }

    pub fn secondary() -> Self {
        Self { clustered: true, primary: false }
    }
}

impl ClusterState for StubCluster {
    fn is_clustered(&self) -> bool {
        self.clustered
    }

    fn is_primary(&self) -> bool {
        self.primary
    }
}

// ── Sessions ─────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct SessionCounters {
    pub opened: AtomicUsize,
    pub commits: AtomicUsize,
    pub transfers: AtomicUsize,
    pub fail_commits: AtomicBool,
}

#[derive(Default)]
pub(crate) struct RecordingRepository {
    pub counters: Arc<SessionCounters>,
}

impl RecordingRepository {
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst)
    }

    pub fn fail_commits(&self) {
        self.counters.fail_commits.store(true, Ordering::SeqCst);
    }
}

impl SessionRepository for RecordingRepository {
    fn open_session(&self, _component: &ComponentId) -> Box<dyn ProcessSession> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Box::new(RecordingSession {
            counters: Arc::clone(&self.counters),
        })
    }
}

struct RecordingSession {
    counters: Arc<SessionCounters>,
}

impl ProcessSession for RecordingSession {
    fn get(&mut self) -> Option<FlowRecord> {
        None
    }

    fn transfer(&mut self, _record: FlowRecord, _relationship: &Relationship) {
        self.counters.transfers.fetch_add(1, Ordering::SeqCst);
    }

    fn remove(&mut self, _record: FlowRecord) {}

    fn commit(&mut self) -> Result<(), SessionError> {
        if self.counters.fail_commits.load(Ordering::SeqCst) {
            return Err(SessionError::Commit("disk full".to_string()));
        }
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) {}
}

// ── Recorder, heartbeat, scope ───────────────────────────────

#[derive(Default)]
pub(crate) struct RecordingRecorder {
    pub records: Mutex<Vec<InvocationStats>>,
    pub fail: AtomicBool,
}

impl EventRecorder for RecordingRecorder {
    fn record(&self, stats: InvocationStats) -> io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "repository unavailable"));
        }
        self.records.lock().unwrap().push(stats);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct CountingHeartbeat {
    pub beats: AtomicUsize,
}

impl Heartbeat for CountingHeartbeat {
    fn heartbeat(&self) {
        self.beats.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct CountingScope {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl ExecutionScope for CountingScope {
    fn acquire(&self, _component: &ComponentId) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, _component: &ComponentId) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Processors ───────────────────────────────────────────────

type Behavior =
    Box<dyn Fn(&ProcessContext, &dyn ProcessSessionFactory) -> Result<(), TriggerError> + Send + Sync>;

/// Processor whose trigger runs a closure and which counts hook calls.
pub(crate) struct ScriptedProcessor {
    behavior: Behavior,
    scheduled_hook: Box<dyn Fn() + Send + Sync>,
    stopped_hook: Box<dyn Fn() + Send + Sync>,
    pub triggers: AtomicUsize,
    pub scheduled: AtomicUsize,
    pub unscheduled: AtomicUsize,
    pub stopped: AtomicUsize,
}

impl ScriptedProcessor {
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(&ProcessContext, &dyn ProcessSessionFactory) -> Result<(), TriggerError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            behavior: Box::new(behavior),
            scheduled_hook: Box::new(|| {}),
            stopped_hook: Box::new(|| {}),
            triggers: AtomicUsize::new(0),
            scheduled: AtomicUsize::new(0),
            unscheduled: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
        }
    }

    pub fn ok() -> Self {
        Self::new(|_, _| Ok(()))
    }

    /// Run `hook` inside `on_scheduled`, after it is counted.
    pub fn with_scheduled_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.scheduled_hook = Box::new(hook);
        self
    }

    /// Run `hook` inside `on_stopped`, before it is counted.
    pub fn with_stopped_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.stopped_hook = Box::new(hook);
        self
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }

    pub fn stopped_count(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Processor for ScriptedProcessor {
    fn on_trigger(
        &self,
        context: &ProcessContext,
        sessions: &dyn ProcessSessionFactory,
    ) -> Result<(), TriggerError> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        (self.behavior)(context, sessions)
    }

    fn on_scheduled(&self, _context: &ProcessContext) -> anyhow::Result<()> {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        (self.scheduled_hook)();
        Ok(())
    }

    fn on_unscheduled(&self, _context: &ProcessContext) -> anyhow::Result<()> {
        self.unscheduled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_stopped(&self, _context: &ProcessContext) -> anyhow::Result<()> {
        (self.stopped_hook)();
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn noop_processor(id: &str) -> ConnectableBuilder {
    Connectable::processor(id, Arc::new(ScriptedProcessor::ok()))
}

/// Blocks triggers until opened.
#[derive(Default)]
pub(crate) struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Gate {
    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

/// Processor whose every trigger waits for `gate`.
pub(crate) fn gated_processor(gate: &Arc<Gate>) -> Arc<ScriptedProcessor> {
    let gate = Arc::clone(gate);
    Arc::new(ScriptedProcessor::new(move |_, _| {
        gate.wait();
        Ok(())
    }))
}

pub(crate) fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

// ── Harness ──────────────────────────────────────────────────

pub(crate) struct Harness {
    pub clock: Arc<ManualClock>,
    pub topology: Arc<StubTopology>,
    pub sessions: Arc<RecordingRepository>,
    pub recorder: Arc<RecordingRecorder>,
    pub heartbeat: Arc<CountingHeartbeat>,
    pub scope: Arc<CountingScope>,
    pub services: EngineServices,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new());
        let topology = Arc::new(StubTopology::default());
        let sessions = Arc::new(RecordingRepository::default());
        let recorder = Arc::new(RecordingRecorder::default());
        let heartbeat = Arc::new(CountingHeartbeat::default());
        let scope = Arc::new(CountingScope::default());
        let services = EngineServices::standalone(topology.clone(), sessions.clone())
            .with_clock(clock.clone())
            .with_recorder(recorder.clone())
            .with_heartbeat(heartbeat.clone())
            .with_scope(scope.clone());
        Self {
            clock,
            topology,
            sessions,
            recorder,
            heartbeat,
            scope,
            services,
        }
    }

    pub fn with_cluster(mut self, cluster: StubCluster) -> Self {
        self.services = self.services.with_cluster(Arc::new(cluster));
        self
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// A scheduled task for `component` with its fresh state.
    pub fn task(&self, component: &Arc<Connectable>) -> (ContinualRunTask, Arc<ScheduleState>) {
        let state = Arc::new(ScheduleState::new());
        state.schedule();
        let task = ContinualRunTask::new(
            Arc::clone(component),
            Arc::clone(&state),
            self.services.clone(),
            ADMIN_YIELD,
        );
        (task, state)
    }

    pub fn recorded(&self) -> Vec<InvocationStats> {
        self.recorder.records.lock().unwrap().clone()
    }
}
