//! The unit of work a worker thread runs on every scheduling tick.
//!
//! One [`ContinualRunTask`] is built per scheduling activation of a
//! component and reused for every tick. Each run:
//! 1. claims an active thread and evaluates the eligibility pipeline,
//!    returning early if ineligible;
//! 2. invokes the component once (single mode) or repeatedly within its
//!    run-duration budget on one shared session (batch mode);
//! 3. contains any failure of the component's logic;
//! 4. finalizes: batch commit, last-thread stop hooks, counter decrement
//!    and statistics, on every exit path.


use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use millrace_core::{
    BatchingSessionFactory, Connectable, ProcessContext, ProcessSessionFactory, ScopeGuard,
    StandardSessionFactory, TriggerError,
};
use tracing::{debug, error, trace, warn};

use crate::eligibility::{self, Ineligible, Pass};
use crate::error::SchedulerError;
use crate::lifecycle::{self, panic_message};
use crate::schedule_state::ScheduleState;
use crate::services::EngineServices;
use crate::stats::InvocationStats;

/// Why the invocation loop of one execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Single mode: one invocation per tick.
    SingleInvocation,
    /// Batch mode: the run-duration budget was used up.
    BudgetExhausted,
    /// Batch mode: a re-check found the component ineligible.
    NoLongerEligible(Ineligible),
    /// The logic reported an expected processing error.
    ProcessingError,
    /// The logic failed unexpectedly and the component was yielded.
    UnexpectedFailure,
}

/// Result of one task execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Not eligible; nothing ran and no statistics were emitted.
    Skipped(Ineligible),
    Completed {
        invocations: u32,
        processing_time: Duration,
        exit: LoopExit,
    },
}

pub struct ContinualRunTask {
    component: Arc<Connectable>,
    state: Arc<ScheduleState>,
    services: EngineServices,
    context: ProcessContext,
    administrative_yield: Duration,
}

impl ContinualRunTask {
    pub fn new(
        component: Arc<Connectable>,
        state: Arc<ScheduleState>,
        services: EngineServices,
        administrative_yield: Duration,
    ) -> Self {
        let context = ProcessContext::new(Arc::clone(&component), Arc::clone(&services.clock));
        Self {
            component,
            state,
            services,
            context,
            administrative_yield,
        }
    }

    pub fn component(&self) -> &Arc<Connectable> {
        &self.component
    }

    pub fn schedule_state(&self) -> &Arc<ScheduleState> {
        &self.state
    }

    /// Execute one tick.
    ///
    /// Failures of the component's logic are contained here. Only a failed
    /// commit of a batched session is returned as an error, and only after
    /// finalization has completed.
    pub fn run(&self) -> Result<TaskOutcome, SchedulerError> {
        let id = self.component.id();

        // Claim the thread before reading the phase: a concurrent stop
        // either observes this thread or is observed by it.
        self.state.increment_active_thread_count();
        let eligible = if self.state.is_scheduled() {
            let now = self.services.clock.now();
            eligibility::evaluate(&self.component, &self.services, now, Pass::Initial)
        } else {
            Err(Ineligible::Unscheduled)
        };
        if let Err(reason) = eligible {
            trace!(component = %id, %reason, "component not eligible");
            self.finish_thread();
            return Ok(TaskOutcome::Skipped(reason));
        }

        let settings = self.component.settings();
        let budget = settings.run_duration;
        let batch = settings.high_throughput_supported && !budget.is_zero();

        let batching = batch
            .then(|| BatchingSessionFactory::new(self.services.sessions.open_session(id)));
        let standard;
        let sessions: &dyn ProcessSessionFactory = match &batching {
            Some(factory) => factory,
            None => {
                standard = StandardSessionFactory::new(Arc::clone(&self.services.sessions), id.clone());
                &standard
            }
        };

        let started = self.services.clock.now();
        let mut invocations = 0u32;
        let exit = {
            let _scope = ScopeGuard::enter(self.services.scope.as_ref(), id);
            self.invoke_loop(sessions, batch, started, budget, &mut invocations)
        };

        let committed = match &batching {
            Some(factory) => factory.commit(),
            None => Ok(()),
        };
        let processing_time = self.services.clock.now().saturating_duration_since(started);
        self.finish_thread();
        self.report(processing_time, invocations);

        if let Err(source) = committed {
            error!(component = %id, invocations, error = %source, "failed to commit batched session");
            return Err(SchedulerError::Commit {
                component: id.clone(),
                source,
            });
        }

        debug!(component = %id, invocations, ?processing_time, ?exit, "execution finished");
        Ok(TaskOutcome::Completed {
            invocations,
            processing_time,
            exit,
        })
    }

    fn invoke_loop(
        &self,
        sessions: &dyn ProcessSessionFactory,
        batch: bool,
        started: Instant,
        budget: Duration,
        invocations: &mut u32,
    ) -> LoopExit {
        loop {
            if let Err(failure) = self.invoke_once(sessions) {
                return self.contain(failure);
            }
            *invocations += 1;

            if !batch {
                return LoopExit::SingleInvocation;
            }

            let now = self.services.clock.now();
            if now.saturating_duration_since(started) >= budget {
                return LoopExit::BudgetExhausted;
            }
            if !self.state.is_scheduled() {
                return LoopExit::NoLongerEligible(Ineligible::Unscheduled);
            }
            if let Err(reason) =
                eligibility::evaluate(&self.component, &self.services, now, Pass::WithinBatch)
            {
                return LoopExit::NoLongerEligible(reason);
            }
        }
    }

    fn invoke_once(&self, sessions: &dyn ProcessSessionFactory) -> Result<(), TriggerError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.component.trigger(&self.context, sessions))) {
            Ok(result) => result,
            Err(payload) => Err(TriggerError::Unexpected(anyhow::anyhow!(
                "panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    fn contain(&self, failure: TriggerError) -> LoopExit {
        let id = self.component.id();
        match failure {
            TriggerError::Process(reason) => {
                warn!(component = %id, error = %reason, "failed to process session");
                LoopExit::ProcessingError
            }
            TriggerError::Unexpected(e) => {
                error!(
                    component = %id,
                    kind = self.component.kind().label(),
                    error = %e,
                    "component failed to process session"
                );
                warn!(
                    component = %id,
                    yield_for = ?self.administrative_yield,
                    "administratively yielding component due to uncaught failure"
                );
                self.component
                    .yield_for(self.administrative_yield, self.services.clock.now());
                LoopExit::UnexpectedFailure
            }
        }
    }

    /// Release this thread. The thread that observes itself as the last one
    /// of a stopping component claims and fires the stop hooks, unless
    /// `stop` already did. The component stays in a stopping phase until
    /// the hooks return, so it cannot be restarted meanwhile.
    fn finish_thread(&self) {
        let previous = self.state.decrement_active_thread_count();
        if previous == 1 && self.state.begin_stop_hooks() {
            debug!(component = %self.component.id(), "last thread finished; invoking stop hooks");
            lifecycle::complete_stop_cycle(&self.state, &self.context, &self.services);
        }
    }

    fn report(&self, processing_time: Duration, invocations: u32) {
        let id = self.component.id();
        let stats = InvocationStats::new(id.clone(), processing_time, invocations);
        if let Err(e) = self.services.recorder.record(stats) {
            error!(
                component = %id,
                error = %e,
                "unable to record invocation statistics; statistics may be inaccurate"
            );
        }
    }
}
