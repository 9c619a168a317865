//! Shared fixtures for the integration tests: an in-memory flow acting as
//! topology and record store, and a few processors.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use millrace_core::{
    ComponentId, FlowRecord, FlowTopology, ProcessContext, ProcessSession, ProcessSessionFactory,
    Processor, Relationship, SessionError, SessionRepository, TriggerError,
};
use millrace_scheduler::{EngineServices, InMemoryEventRecorder, ProcessScheduler, SchedulerConfig};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

// ── In-memory flow ───────────────────────────────────────────

type Output = (ComponentId, String);

#[derive(Default)]
struct FlowState {
    connected: HashSet<ComponentId>,
    queues: HashMap<ComponentId, VecDeque<FlowRecord>>,
    delivered: HashMap<Output, usize>,
    thresholds: HashMap<Output, usize>,
}

/// Input queues per component and delivery counters per output
/// relationship. A relationship is back-pressured once its delivered count
/// reaches its threshold.
#[derive(Default)]
pub struct InMemoryFlow {
    state: Arc<Mutex<FlowState>>,
}

impl InMemoryFlow {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect an upstream queue to `component` and fill it.
    pub fn enqueue(&self, component: &str, records: usize) {
        let mut state = self.state.lock().unwrap();
        let id = ComponentId::from(component);
        state.connected.insert(id.clone());
        let queue = state.queues.entry(id).or_default();
        for i in 0..records {
            queue.push_back(FlowRecord::new(format!("record-{i}")));
        }
    }

    pub fn queued(&self, component: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(&ComponentId::from(component))
            .map_or(0, VecDeque::len)
    }

    pub fn delivered(&self, component: &str, relationship: &str) -> usize {
        let key = (ComponentId::from(component), relationship.to_string());
        self.state.lock().unwrap().delivered.get(&key).copied().unwrap_or(0)
    }

    pub fn set_threshold(&self, component: &str, relationship: &str, limit: usize) {
        let key = (ComponentId::from(component), relationship.to_string());
        self.state.lock().unwrap().thresholds.insert(key, limit);
    }

    /// Services for a standalone node backed by this flow.
    pub fn services(self: &Arc<Self>, recorder: Arc<InMemoryEventRecorder>) -> EngineServices {
        EngineServices::standalone(self.clone(), self.clone()).with_recorder(recorder)
    }
}

impl FlowTopology for InMemoryFlow {
    fn has_incoming_connection(&self, component: &ComponentId) -> bool {
        self.state.lock().unwrap().connected.contains(component)
    }

    fn has_queued_input(&self, component: &ComponentId) -> bool {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(component)
            .is_some_and(|queue| !queue.is_empty())
    }

    fn is_relationship_available(&self, component: &ComponentId, relationship: &Relationship) -> bool {
        let state = self.state.lock().unwrap();
        let key = (component.clone(), relationship.name().to_string());
        match state.thresholds.get(&key) {
            Some(limit) => state.delivered.get(&key).copied().unwrap_or(0) < *limit,
            None => true,
        }
    }
}

impl SessionRepository for InMemoryFlow {
    fn open_session(&self, component: &ComponentId) -> Box<dyn ProcessSession> {
        Box::new(FlowSession {
            state: Arc::clone(&self.state),
            component: component.clone(),
            pulled: Vec::new(),
            staged: Vec::new(),
        })
    }
}

struct FlowSession {
    state: Arc<Mutex<FlowState>>,
    component: ComponentId,
    pulled: Vec<FlowRecord>,
    staged: Vec<String>,
}

impl ProcessSession for FlowSession {
    fn get(&mut self) -> Option<FlowRecord> {
        let record = self
            .state
            .lock()
            .unwrap()
            .queues
            .get_mut(&self.component)?
            .pop_front()?;
        self.pulled.push(record.clone());
        Some(record)
    }

    fn transfer(&mut self, _record: FlowRecord, relationship: &Relationship) {
        self.staged.push(relationship.name().to_string());
    }

    fn remove(&mut self, _record: FlowRecord) {}

    fn commit(&mut self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        for relationship in self.staged.drain(..) {
            *state
                .delivered
                .entry((self.component.clone(), relationship))
                .or_default() += 1;
        }
        self.pulled.clear();
        Ok(())
    }

    fn rollback(&mut self) {
        let mut state = self.state.lock().unwrap();
        let queue = state.queues.entry(self.component.clone()).or_default();
        for record in self.pulled.drain(..).rev() {
            queue.push_front(record);
        }
        self.staged.clear();
    }
}

// ── Processors ───────────────────────────────────────────────

/// Moves up to `per_invocation` queued records to "success" and counts
/// lifecycle calls.
pub struct RouteProcessor {
    per_invocation: usize,
    work: Duration,
    pub triggers: AtomicUsize,
    pub scheduled: AtomicUsize,
    pub unscheduled: AtomicUsize,
    pub stopped: AtomicUsize,
}

impl RouteProcessor {
    pub fn new(per_invocation: usize) -> Arc<Self> {
        Self::with_work(per_invocation, Duration::ZERO)
    }

    /// Sleeps `work` on every invocation.
    pub fn with_work(per_invocation: usize, work: Duration) -> Arc<Self> {
        Arc::new(Self {
            per_invocation,
            work,
            triggers: AtomicUsize::new(0),
            scheduled: AtomicUsize::new(0),
            unscheduled: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
        })
    }

    pub fn triggers(&self) -> usize {
        self.triggers.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Processor for RouteProcessor {
    fn on_trigger(
        &self,
        context: &ProcessContext,
        sessions: &dyn ProcessSessionFactory,
    ) -> Result<(), TriggerError> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        let success = &context.relationships()[0];
        let mut session = sessions.create_session();
        for _ in 0..self.per_invocation {
            match session.get() {
                Some(record) => session.transfer(record, success),
                None => break,
            }
        }
        session
            .commit()
            .map_err(|e| TriggerError::Unexpected(anyhow::Error::new(e)))
    }

    fn on_scheduled(&self, _context: &ProcessContext) -> anyhow::Result<()> {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_unscheduled(&self, _context: &ProcessContext) -> anyhow::Result<()> {
        self.unscheduled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_stopped(&self, _context: &ProcessContext) -> anyhow::Result<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails every invocation with an unexpected error.
#[derive(Default)]
pub struct BrokenProcessor {
    pub triggers: AtomicUsize,
}

impl Processor for BrokenProcessor {
    fn on_trigger(
        &self,
        _context: &ProcessContext,
        _sessions: &dyn ProcessSessionFactory,
    ) -> Result<(), TriggerError> {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        Err(TriggerError::Unexpected(anyhow::anyhow!("upstream service unreachable")))
    }
}

// ── Scheduler ────────────────────────────────────────────────

pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        timer_driven_threads: 4,
        event_driven_threads: 2,
        cron_driven_threads: 1,
        administrative_yield_millis: 30_000,
        tick_interval_millis: 2,
    }
}

pub struct TestFlow {
    pub flow: Arc<InMemoryFlow>,
    pub recorder: Arc<InMemoryEventRecorder>,
    pub scheduler: ProcessScheduler,
}

impl TestFlow {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        init_tracing();
        let flow = InMemoryFlow::new();
        let recorder = Arc::new(InMemoryEventRecorder::new());
        let scheduler = ProcessScheduler::new(config, flow.services(Arc::clone(&recorder))).unwrap();
        Self {
            flow,
            recorder,
            scheduler,
        }
    }
}

impl Drop for TestFlow {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}
