use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use millrace_core::{ComponentId, Connectable, ProcessContext, SchedulingStrategy};
use tracing::{debug, info, warn};

use crate::agent::SchedulingAgent;
use crate::config::SchedulerConfig;
use crate::cron::parse_schedule;
use crate::error::SchedulerError;
use crate::lifecycle::{self, LifecycleHook};
use crate::schedule_state::ScheduleState;
use crate::services::EngineServices;

/// A component the scheduler has seen, with the state shared by all of
/// its tasks across stop cycles.
struct Registration {
    component: Arc<Connectable>,
    state: Arc<ScheduleState>,
    /// Serializes start/stop of this component only. Held while its
    /// lifecycle hooks run, never by running tasks.
    transitions: Arc<Mutex<()>>,
}

/// Starts, stops and throttles components on one agent per scheduling
/// strategy.
pub struct ProcessScheduler {
    config: SchedulerConfig,
    services: EngineServices,
    timer_driven: Arc<SchedulingAgent>,
    event_driven: Arc<SchedulingAgent>,
    cron_driven: Arc<SchedulingAgent>,
    registrations: RwLock<HashMap<ComponentId, Registration>>,
}

impl ProcessScheduler {
    /// Build one agent per strategy and start their driver threads.
    pub fn new(config: SchedulerConfig, services: EngineServices) -> Result<Self, SchedulerError> {
        config.validate()?;
        let build = |strategy: SchedulingStrategy| {
            SchedulingAgent::new(
                strategy,
                config.threads_for(strategy),
                services.clone(),
                config.administrative_yield(),
                config.tick_interval(),
            )
        };
        let timer_driven = build(SchedulingStrategy::TimerDriven)?;
        let event_driven = build(SchedulingStrategy::EventDriven)?;
        let cron_driven = build(SchedulingStrategy::CronDriven)?;
        for agent in [&timer_driven, &event_driven, &cron_driven] {
            agent.start()?;
        }

        info!(
            timer_driven = config.timer_driven_threads,
            event_driven = config.event_driven_threads,
            cron_driven = config.cron_driven_threads,
            "Process scheduler ready"
        );
        Ok(Self {
            config,
            services,
            timer_driven,
            event_driven,
            cron_driven,
            registrations: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The agent running components of `strategy`.
    pub fn agent(&self, strategy: SchedulingStrategy) -> &Arc<SchedulingAgent> {
        match strategy {
            SchedulingStrategy::TimerDriven => &self.timer_driven,
            SchedulingStrategy::EventDriven => &self.event_driven,
            SchedulingStrategy::CronDriven => &self.cron_driven,
        }
    }

    fn agents(&self) -> [&Arc<SchedulingAgent>; 3] {
        [&self.timer_driven, &self.event_driven, &self.cron_driven]
    }

    // ── Lifecycle ────────────────────────────────────────────

    /// Begin periodic submission of `component` on its strategy's agent.
    ///
    /// No-op if it is already scheduled. Fails if it is disabled, if its
    /// previous stop cycle has not finished (threads still running or stop
    /// hooks not yet returned), or if its cron expression does not parse.
    pub fn start(&self, component: &Arc<Connectable>) -> Result<(), SchedulerError> {
        let id = component.id();
        let (state, transitions) = self.register(component);
        let _transition = transitions.lock().unwrap_or_else(|e| e.into_inner());

        if state.is_scheduled() {
            debug!(component = %id, "Component already scheduled");
            return Ok(());
        }
        if !component.is_enabled() {
            return Err(SchedulerError::invalid_state(id, "component is disabled"));
        }
        if state.is_stopping() {
            return Err(SchedulerError::invalid_state(
                id,
                "stop hooks of the previous run have not completed",
            ));
        }
        let active = state.active_thread_count();
        if active > 0 {
            return Err(SchedulerError::invalid_state(
                id,
                format!("{active} threads from the previous run are still active"),
            ));
        }

        let settings = component.settings();
        if settings.strategy == SchedulingStrategy::CronDriven {
            parse_schedule(id, settings.cron_expression.as_deref().unwrap_or_default())?;
        }

        let context = self.context(component);
        lifecycle::invoke_quietly(LifecycleHook::OnScheduled, &context, self.services.scope.as_ref());

        if !state.schedule() {
            return Err(SchedulerError::invalid_state(id, "previous run is still stopping"));
        }
        if let Err(e) = self
            .agent(settings.strategy)
            .schedule(Arc::clone(component), Arc::clone(&state))
        {
            state.abandon_schedule();
            warn!(component = %id, error = %e, "Failed to schedule component");
            return Err(e);
        }

        info!(component = %id, strategy = %settings.strategy, "Started component");
        Ok(())
    }

    /// Cancel future submissions of `component`. Running threads finish
    /// their current tick; the last of them fires the stop hooks, or this
    /// call does if none is running. Idempotent.
    pub fn stop(&self, component: &Arc<Connectable>) {
        let id = component.id();
        let Some((state, transitions)) = self.registration(id) else {
            debug!(component = %id, "Stop requested for unknown component");
            return;
        };
        let _transition = transitions.lock().unwrap_or_else(|e| e.into_inner());
        if !state.unschedule() {
            debug!(component = %id, "Component already stopped");
            return;
        }

        for agent in self.agents() {
            agent.unschedule(id);
        }

        let context = self.context(component);
        let scope = self.services.scope.as_ref();
        lifecycle::invoke_quietly(LifecycleHook::OnUnscheduled, &context, scope);

        let active = state.active_thread_count();
        if active == 0 && state.begin_stop_hooks() {
            lifecycle::complete_stop_cycle(&state, &context, &self.services);
        }
        info!(component = %id, active_threads = active, "Stopped component");
    }

    /// Allow the component to be started again. Does not start it.
    pub fn enable(&self, component: &Connectable) {
        component.set_enabled(true);
        info!(component = %component.id(), "Enabled component");
    }

    /// Refuse future starts. A running component keeps running.
    pub fn disable(&self, component: &Connectable) {
        component.set_enabled(false);
        info!(component = %component.id(), "Disabled component");
    }

    // ── Throttling ───────────────────────────────────────────

    /// Yield `component` for its agent's administrative-yield duration.
    pub fn yield_component(&self, component: &Connectable) {
        let duration = self
            .agent(component.settings().strategy)
            .administrative_yield();
        self.yield_component_for(component, duration);
    }

    /// Yield `component` for `duration`. Never shortens a longer yield.
    pub fn yield_component_for(&self, component: &Connectable, duration: Duration) {
        component.yield_for(duration, self.services.clock.now());
        debug!(component = %component.id(), ?duration, "Yielded component");
    }

    /// Resize the worker pool of `strategy` while tasks keep running.
    pub fn set_max_thread_count(
        &self,
        strategy: SchedulingStrategy,
        max_threads: usize,
    ) -> Result<(), SchedulerError> {
        self.agent(strategy).set_max_thread_count(max_threads)
    }

    /// Queue one extra submission of an event-driven component. Components
    /// on other strategies ignore events.
    pub fn register_event(&self, component: &ComponentId) -> Result<(), SchedulerError> {
        if self.state(component).is_none() {
            return Err(SchedulerError::UnknownComponent(component.clone()));
        }
        if !self.event_driven.register_event(component) {
            debug!(component = %component, "Ignoring event for component not scheduled event-driven");
        }
        Ok(())
    }

    // ── Introspection ────────────────────────────────────────

    /// Threads currently inside a task for `component`. Includes threads
    /// that claimed a slot and then found the component ineligible, so a
    /// brief non-zero count does not mean `on_trigger` ran.
    pub fn active_thread_count(&self, component: &ComponentId) -> usize {
        self.state(component)
            .map(|state| state.active_thread_count())
            .unwrap_or(0)
    }

    pub fn is_scheduled(&self, component: &ComponentId) -> bool {
        self.state(component)
            .is_some_and(|state| state.is_scheduled())
    }

    /// Stop every scheduled component, then the agents' driver threads.
    /// Tasks already submitted finish on the pools.
    pub fn shutdown(&self) {
        let scheduled: Vec<Arc<Connectable>> = self
            .registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|registration| registration.state.is_scheduled())
            .map(|registration| Arc::clone(&registration.component))
            .collect();
        info!(scheduled = scheduled.len(), "Process scheduler shutting down");

        for component in &scheduled {
            self.stop(component);
        }
        for agent in self.agents() {
            agent.shutdown();
        }
    }

    // ── Internals ────────────────────────────────────────────

    fn state(&self, component: &ComponentId) -> Option<Arc<ScheduleState>> {
        self.registration(component).map(|(state, _)| state)
    }

    fn registration(&self, component: &ComponentId) -> Option<(Arc<ScheduleState>, Arc<Mutex<()>>)> {
        self.registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(component)
            .map(|registration| {
                (
                    Arc::clone(&registration.state),
                    Arc::clone(&registration.transitions),
                )
            })
    }

    /// Record `component` and return its state and transition lock,
    /// creating them on first sight.
    fn register(&self, component: &Arc<Connectable>) -> (Arc<ScheduleState>, Arc<Mutex<()>>) {
        let mut registrations = self.registrations.write().unwrap_or_else(|e| e.into_inner());
        let registration = registrations
            .entry(component.id().clone())
            .or_insert_with(|| Registration {
                component: Arc::clone(component),
                state: Arc::new(ScheduleState::new()),
                transitions: Arc::new(Mutex::new(())),
            });
        registration.component = Arc::clone(component);
        (
            Arc::clone(&registration.state),
            Arc::clone(&registration.transitions),
        )
    }

    fn context(&self, component: &Arc<Connectable>) -> ProcessContext {
        ProcessContext::new(Arc::clone(component), Arc::clone(&self.services.clock))
    }
}
