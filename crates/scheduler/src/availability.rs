use millrace_core::{Connectable, FlowTopology};

/// Answers whether enough of a component's output relationships can accept
/// more records.
///
/// Holds no state of its own: downstream queues can change between two
/// invocations of a batch, so every check queries the topology again.
pub struct RelationshipAvailabilityOracle<'a> {
    topology: &'a dyn FlowTopology,
    component: &'a Connectable,
}

impl<'a> RelationshipAvailabilityOracle<'a> {
    pub fn new(topology: &'a dyn FlowTopology, component: &'a Connectable) -> Self {
        Self {
            topology,
            component,
        }
    }

    /// Number of available relationships a component needs to be triggered:
    /// one if any destination suffices, otherwise all of them.
    pub fn required_count(component: &Connectable) -> usize {
        if component.settings().trigger_when_any_destination_available {
            1
        } else {
            component.relationships().len()
        }
    }

    /// Whether at least `required` relationships are not back-pressured.
    pub fn is_satisfied(&self, required: usize) -> bool {
        if required == 0 {
            return true;
        }
        let id = self.component.id();
        let mut available = 0;
        for relationship in self.component.relationships() {
            if self.topology.is_relationship_available(id, relationship) {
                available += 1;
                if available >= required {
                    return true;
                }
            }
        }
        false
    }
}
