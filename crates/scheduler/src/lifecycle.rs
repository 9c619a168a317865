//! Quiet invocation of component lifecycle hooks.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use millrace_core::{ExecutionScope, ProcessContext, ScopeGuard};
use tracing::{debug, error, warn};

use crate::schedule_state::ScheduleState;
use crate::services::EngineServices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleHook {
    OnScheduled,
    OnUnscheduled,
    OnStopped,
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleHook::OnScheduled => write!(f, "on_scheduled"),
            LifecycleHook::OnUnscheduled => write!(f, "on_unscheduled"),
            LifecycleHook::OnStopped => write!(f, "on_stopped"),
        }
    }
}

/// Invoke `hook` on the component behind `context`, inside `scope`.
///
/// Ports and funnels have no hooks. Errors and panics are logged and never
/// propagated.
pub fn invoke_quietly(hook: LifecycleHook, context: &ProcessContext, scope: &dyn ExecutionScope) {
    let Some(logic) = context.component().processor_logic() else {
        return;
    };
    let id = context.component_id();
    let _scope = ScopeGuard::enter(scope, id);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match hook {
        LifecycleHook::OnScheduled => logic.on_scheduled(context),
        LifecycleHook::OnUnscheduled => logic.on_unscheduled(context),
        LifecycleHook::OnStopped => logic.on_stopped(context),
    }));

    match outcome {
        Ok(Ok(())) => debug!(component = %id, %hook, "lifecycle hook completed"),
        Ok(Err(e)) => warn!(component = %id, %hook, error = %e, "lifecycle hook failed"),
        Err(payload) => error!(
            component = %id,
            %hook,
            panic = %panic_message(payload.as_ref()),
            "lifecycle hook panicked"
        ),
    }
}

/// Run the on-stopped hooks and the heartbeat for a stop cycle the caller
/// claimed with [`ScheduleState::begin_stop_hooks`], then close the cycle.
/// The component cannot be started again before this returns.
pub(crate) fn complete_stop_cycle(
    state: &ScheduleState,
    context: &ProcessContext,
    services: &EngineServices,
) {
    invoke_quietly(LifecycleHook::OnStopped, context, services.scope.as_ref());
    services.heartbeat.heartbeat();
    state.end_stop_hooks();
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
