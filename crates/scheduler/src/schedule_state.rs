use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Where a component is in its start/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not scheduled and no stop hooks owed.
    Stopped,
    /// Scheduled. Stop hooks are owed once the component is stopped.
    Scheduled,
    /// Unscheduled; the stop hooks have not been claimed yet.
    Stopping,
    /// Unscheduled; one caller is running the stop hooks.
    FiringStopHooks,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Phase::Scheduled,
            2 => Phase::Stopping,
            3 => Phase::FiringStopHooks,
            _ => Phase::Stopped,
        }
    }
}

/// Shared runtime record of one schedulable component.
///
/// All tasks running for the component share one instance. Every field is
/// an atomic so no lock is held around component logic. `SeqCst` is used
/// throughout: the last thread decrements the counter before trying to
/// claim the stop hooks, while `stop` enters [`Phase::Stopping`] before
/// reading the counter, and both sides must observe each other.
///
/// The phase is a single atomic so that claiming the stop hooks and
/// starting the next cycle can never interleave. A thread left over from
/// an earlier cycle cannot claim hooks once the component is scheduled
/// again, and a new cycle cannot start while hooks are still owed or
/// running.
#[derive(Debug, Default)]
pub struct ScheduleState {
    active_threads: AtomicUsize,
    phase: AtomicU8,
}

impl ScheduleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Threads currently inside a task execution for this component,
    /// including threads still evaluating eligibility that may end up not
    /// invoking the component at all. A task claims its thread before it
    /// reads the phase, which is what lets `stop` and the last thread agree
    /// on who fires the stop hooks.
    pub fn active_thread_count(&self) -> usize {
        self.active_threads.load(Ordering::SeqCst)
    }

    /// Returns the count after the increment.
    pub fn increment_active_thread_count(&self) -> usize {
        self.active_threads.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement and return the count observed immediately before.
    ///
    /// A return value of 1 means the caller was the last active thread.
    /// Never underflows.
    pub fn decrement_active_thread_count(&self) -> usize {
        match self
            .active_threads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(previous) => previous,
            Err(_) => 0,
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_scheduled(&self) -> bool {
        self.phase() == Phase::Scheduled
    }

    /// Whether the last stop cycle still owes or is running its stop hooks.
    pub fn is_stopping(&self) -> bool {
        matches!(self.phase(), Phase::Stopping | Phase::FiringStopHooks)
    }

    /// `Stopped` to `Scheduled`. Fails in any other phase.
    pub fn schedule(&self) -> bool {
        self.transition(Phase::Stopped, Phase::Scheduled)
    }

    /// `Scheduled` to `Stopping`, opening the stop cycle. Fails if the
    /// component was not scheduled.
    pub fn unschedule(&self) -> bool {
        self.transition(Phase::Scheduled, Phase::Stopping)
    }

    /// Undo a [`schedule`](Self::schedule) that never reached an agent. No
    /// stop hooks are owed.
    pub fn abandon_schedule(&self) -> bool {
        self.transition(Phase::Scheduled, Phase::Stopped)
    }

    /// Claim the stop hooks of the open stop cycle. Returns `true` for
    /// exactly one caller per cycle, who must call
    /// [`end_stop_hooks`](Self::end_stop_hooks) once they have run.
    pub fn begin_stop_hooks(&self) -> bool {
        self.transition(Phase::Stopping, Phase::FiringStopHooks)
    }

    /// Close the stop cycle after its hooks returned.
    pub fn end_stop_hooks(&self) {
        self.transition(Phase::FiringStopHooks, Phase::Stopped);
    }

    fn transition(&self, from: Phase, to: Phase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
