//! The eligibility pipeline deciding whether a component may run now.
//!
//! Checks short-circuit in order of increasing cost: yield, cluster role,
//! queued input, back-pressure.

use std::fmt;
use std::time::Instant;

use millrace_core::Connectable;

use crate::availability::RelationshipAvailabilityOracle;
use crate::services::EngineServices;

/// Why a component was not eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    /// No longer scheduled; the execution was cancelled cooperatively.
    Unscheduled,
    /// Yield expiration has not passed yet.
    Yielded,
    /// Isolated component on a clustered node that is not primary.
    NotPrimaryNode,
    /// Nothing queued upstream and the component does not run empty.
    NoQueuedInput,
    /// Too few output relationships can accept records.
    BackPressure,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Ineligible::Unscheduled => "unscheduled",
            Ineligible::Yielded => "yielded",
            Ineligible::NotPrimaryNode => "isolated and not primary node",
            Ineligible::NoQueuedInput => "no queued input",
            Ineligible::BackPressure => "back-pressure",
        };
        f.write_str(reason)
    }
}

/// Which evaluation of a task execution is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// First evaluation of a tick: all four checks.
    Initial,
    /// Re-check before another invocation of a batch. The cluster role is
    /// taken as stable for the duration of one tick and is not re-read.
    WithinBatch,
}

/// Run the pipeline for `component` at `now`.
pub fn evaluate(
    component: &Connectable,
    services: &EngineServices,
    now: Instant,
    pass: Pass,
) -> Result<(), Ineligible> {
    let settings = component.settings();

    if component.is_yielded(now) {
        return Err(Ineligible::Yielded);
    }

    if pass == Pass::Initial
        && settings.isolated
        && services.cluster.is_clustered()
        && !services.cluster.is_primary()
    {
        return Err(Ineligible::NotPrimaryNode);
    }

    let id = component.id();
    let has_input = settings.trigger_when_empty
        || !services.topology.has_incoming_connection(id)
        || services.topology.has_queued_input(id);
    if !has_input {
        return Err(Ineligible::NoQueuedInput);
    }

    if !component.relationships().is_empty() {
        let required = RelationshipAvailabilityOracle::required_count(component);
        let oracle = RelationshipAvailabilityOracle::new(services.topology.as_ref(), component);
        if !oracle.is_satisfied(required) {
            return Err(Ineligible::BackPressure);
        }
    }

    Ok(())
}
