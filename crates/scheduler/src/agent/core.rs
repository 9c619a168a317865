use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use millrace_core::{ComponentId, Connectable, SchedulingStrategy};
use rayon::ThreadPool;
use tracing::{debug, error, info, trace, warn};

use crate::error::SchedulerError;
use crate::lifecycle::panic_message;
use crate::schedule_state::ScheduleState;
use crate::services::EngineServices;
use crate::task::ContinualRunTask;

use super::cadence::Cadence;

/// One scheduled activation: the reusable task plus its cadence.
struct Entry {
    task: Arc<ContinualRunTask>,
    cadence: Mutex<Cadence>,
    /// Tasks of this activation submitted and not yet finished.
    in_flight: AtomicUsize,
}

/// Releases a submission slot when the worker is done with it, even if the
/// task unwinds.
struct InFlightGuard {
    agent: Arc<AtomicUsize>,
    entry: Arc<Entry>,
}

impl InFlightGuard {
    fn acquire(agent: Arc<AtomicUsize>, entry: Arc<Entry>) -> Self {
        agent.fetch_add(1, Ordering::SeqCst);
        entry.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { agent, entry }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.entry.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.agent.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the worker pool of one scheduling strategy and submits the
/// [`ContinualRunTask`]s of its components on their cadence.
pub struct SchedulingAgent {
    strategy: SchedulingStrategy,
    services: EngineServices,
    administrative_yield: Duration,
    tick_interval: Duration,
    pool: RwLock<Arc<ThreadPool>>,
    max_threads: AtomicUsize,
    /// Tasks submitted to the pool and not yet finished.
    in_flight: Arc<AtomicUsize>,
    entries: RwLock<HashMap<ComponentId, Arc<Entry>>>,
    shutdown: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulingAgent {
    pub fn new(
        strategy: SchedulingStrategy,
        max_threads: usize,
        services: EngineServices,
        administrative_yield: Duration,
        tick_interval: Duration,
    ) -> Result<Arc<Self>, SchedulerError> {
        let pool = build_pool(strategy, max_threads)?;
        info!(%strategy, max_threads, "Scheduling agent created");
        Ok(Arc::new(Self {
            strategy,
            services,
            administrative_yield,
            tick_interval,
            pool: RwLock::new(Arc::new(pool)),
            max_threads: AtomicUsize::new(max_threads),
            in_flight: Arc::new(AtomicUsize::new(0)),
            entries: RwLock::new(HashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            driver: Mutex::new(None),
        }))
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    pub fn administrative_yield(&self) -> Duration {
        self.administrative_yield
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads.load(Ordering::SeqCst)
    }

    /// Tasks currently submitted to the pool.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_scheduled(&self, component: &ComponentId) -> bool {
        self.entries_read().contains_key(component)
    }

    pub fn scheduled_count(&self) -> usize {
        self.entries_read().len()
    }

    // ── Scheduling ───────────────────────────────────────────

    /// Start submitting tasks for `component`. Replaces any earlier
    /// activation of the same component.
    pub fn schedule(
        &self,
        component: Arc<Connectable>,
        state: Arc<ScheduleState>,
    ) -> Result<(), SchedulerError> {
        let cadence = Cadence::for_component(&component, self.services.clock.now(), Utc::now())?;
        let id = component.id().clone();
        let task = ContinualRunTask::new(
            component,
            state,
            self.services.clone(),
            self.administrative_yield,
        );
        let entry = Arc::new(Entry {
            task: Arc::new(task),
            cadence: Mutex::new(cadence),
            in_flight: AtomicUsize::new(0),
        });
        info!(strategy = %self.strategy, component = %id, "Scheduled component");
        self.entries_write().insert(id, entry);
        Ok(())
    }

    /// Stop submitting tasks for `component`. Tasks already submitted run
    /// to completion. Returns whether the component was scheduled here.
    pub fn unschedule(&self, component: &ComponentId) -> bool {
        let removed = self.entries_write().remove(component).is_some();
        if removed {
            info!(strategy = %self.strategy, component = %component, "Unscheduled component");
        }
        removed
    }

    /// Queue one event for an event-driven component.
    pub fn register_event(&self, component: &ComponentId) -> bool {
        let Some(entry) = self.entries_read().get(component).cloned() else {
            return false;
        };
        let mut cadence = entry.cadence.lock().unwrap_or_else(|e| e.into_inner());
        cadence.register_event()
    }

    /// Resize the worker pool.
    ///
    /// A new pool replaces the old one; tasks already running on the old
    /// pool finish there and its threads exit once idle.
    pub fn set_max_thread_count(&self, max_threads: usize) -> Result<(), SchedulerError> {
        if max_threads == 0 {
            return Err(SchedulerError::Config(format!(
                "{} thread count must be at least 1",
                self.strategy
            )));
        }
        let pool = Arc::new(build_pool(self.strategy, max_threads)?);
        let previous = {
            let mut current = self.pool.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, pool)
        };
        let was = self.max_threads.swap(max_threads, Ordering::SeqCst);
        info!(strategy = %self.strategy, from = was, to = max_threads, "Resized worker pool");
        drop(previous);
        Ok(())
    }

    // ── Ticking ──────────────────────────────────────────────

    /// Submit every due task. Returns the number submitted.
    pub fn tick(&self) -> usize {
        self.tick_at(self.services.clock.now(), Utc::now())
    }

    /// [`tick`](Self::tick) at an explicit point in time.
    pub fn tick_at(&self, now: Instant, wall: DateTime<Utc>) -> usize {
        let entries: Vec<Arc<Entry>> = self.entries_read().values().cloned().collect();
        let pool = self.pool.read().unwrap_or_else(|e| e.into_inner()).clone();
        let max_threads = self.max_threads();
        let mut submitted = 0;

        for entry in entries {
            let max_concurrent = entry.task.component().settings().max_concurrent_tasks.max(1);
            loop {
                if self.in_flight() >= max_threads {
                    trace!(strategy = %self.strategy, max_threads, "Worker pool saturated");
                    return submitted;
                }
                if entry.in_flight.load(Ordering::SeqCst) >= max_concurrent {
                    break;
                }
                {
                    let mut cadence = entry.cadence.lock().unwrap_or_else(|e| e.into_inner());
                    if !cadence.is_due(now, wall) {
                        break;
                    }
                    cadence.fired(now, wall);
                }
                self.submit(&pool, &entry);
                submitted += 1;
            }
        }

        submitted
    }

    fn submit(&self, pool: &ThreadPool, entry: &Arc<Entry>) {
        let guard = InFlightGuard::acquire(Arc::clone(&self.in_flight), Arc::clone(entry));
        let entry = Arc::clone(entry);
        let strategy = self.strategy;
        pool.spawn(move || {
            let _guard = guard;
            let task = &entry.task;
            match task.run() {
                Ok(outcome) => trace!(
                    %strategy,
                    component = %task.component().id(),
                    ?outcome,
                    "Task finished"
                ),
                Err(e) => error!(
                    %strategy,
                    component = %task.component().id(),
                    error = %e,
                    "Task execution failed"
                ),
            }
        });
    }

    // ── Driver ───────────────────────────────────────────────

    /// Spawn the driver thread that ticks every `tick_interval`. Calling
    /// it again while the driver runs has no effect.
    pub fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut driver = self.driver.lock().unwrap_or_else(|e| e.into_inner());
        if driver.is_some() {
            return Ok(());
        }
        self.shutdown.store(false, Ordering::SeqCst);

        let agent = Arc::downgrade(self);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.tick_interval;
        let strategy = self.strategy;
        let handle = thread::Builder::new()
            .name(format!("{strategy}-driver"))
            .spawn(move || drive(agent, shutdown, interval))
            .map_err(|source| SchedulerError::Spawn { strategy, source })?;
        *driver = Some(handle);
        info!(%strategy, ?interval, "Scheduling agent started");
        Ok(())
    }

    /// Stop the driver thread. Submitted tasks finish on the pool.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.thread().unpark();
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!(strategy = %self.strategy, "Driver thread panicked");
            }
        }
        info!(strategy = %self.strategy, in_flight = self.in_flight(), "Scheduling agent stopped");
    }

    fn entries_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ComponentId, Arc<Entry>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn entries_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ComponentId, Arc<Entry>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SchedulingAgent {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.driver.get_mut().unwrap_or_else(|e| e.into_inner()).as_ref() {
            handle.thread().unpark();
        }
    }
}

/// Driver loop: sleep one interval, then tick. Shutdown unparks the
/// thread so a long interval never delays it.
fn drive(agent: Weak<SchedulingAgent>, shutdown: Arc<AtomicBool>, interval: Duration) {
    loop {
        thread::park_timeout(interval);
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let Some(agent) = agent.upgrade() else {
            break;
        };
        let submitted = agent.tick();
        if submitted > 0 {
            debug!(strategy = %agent.strategy, submitted, "Submitted tasks");
        }
    }
}

fn build_pool(strategy: SchedulingStrategy, threads: usize) -> Result<ThreadPool, SchedulerError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("{strategy}-{i}"))
        .panic_handler(move |payload| {
            error!(%strategy, panic = %panic_message(payload.as_ref()), "Worker panicked");
        })
        .build()
        .map_err(|source| SchedulerError::ThreadPool { strategy, source })
}
