//! Schedulable components: processors, ports and funnels.
//!
//! A [`Connectable`] is owned by the flow configuration store and only
//! referenced (via `Arc`) by the scheduler. Its scheduling settings may be
//! changed live; the scheduler reads a fresh snapshot on every task execution.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::TriggerError;
use crate::processor::{ProcessContext, Processor};
use crate::session::ProcessSessionFactory;

/// Maximum number of records a port or funnel moves per invocation.
pub const TRANSFER_BATCH_SIZE: usize = 100;

/// Default period a component yields for when its logic yields itself.
pub const DEFAULT_YIELD_PERIOD: Duration = Duration::from_secs(1);

// ── Identity ─────────────────────────────────────────────────

/// Stable identifier of a component within the flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A named output route from a component to downstream queues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    name: String,
}

impl Relationship {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The single unnamed relationship used by ports and funnels.
    pub fn anonymous() -> Self {
        Self {
            name: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str("<anonymous>")
        } else {
            f.write_str(&self.name)
        }
    }
}

// ── Scheduling settings ──────────────────────────────────────

/// Cadence policy governing when a component is resubmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    /// Fixed period between submissions.
    TimerDriven,
    /// Submitted once per registered event.
    EventDriven,
    /// Submitted on the ticks of a cron expression.
    CronDriven,
}

impl SchedulingStrategy {
    pub const ALL: [SchedulingStrategy; 3] = [
        SchedulingStrategy::TimerDriven,
        SchedulingStrategy::EventDriven,
        SchedulingStrategy::CronDriven,
    ];
}

impl fmt::Display for SchedulingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingStrategy::TimerDriven => write!(f, "timer-driven"),
            SchedulingStrategy::EventDriven => write!(f, "event-driven"),
            SchedulingStrategy::CronDriven => write!(f, "cron-driven"),
        }
    }
}

/// Mutable scheduling configuration of a component.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingSettings {
    pub strategy: SchedulingStrategy,
    /// Minimum time between timer-driven submissions. Zero runs on every pass.
    pub scheduling_period: Duration,
    /// Cron expression for cron-driven components (5 or 6 fields).
    pub cron_expression: Option<String>,
    /// Upper bound on simultaneously submitted tasks for this component.
    pub max_concurrent_tasks: usize,
    /// Time budget of one batch. Zero means a single invocation per tick.
    pub run_duration: Duration,
    /// How long the component yields when its own logic asks to yield.
    pub yield_period: Duration,
    /// Runs only on the primary node when clustered.
    pub isolated: bool,
    pub trigger_when_empty: bool,
    pub trigger_when_any_destination_available: bool,
    pub high_throughput_supported: bool,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            strategy: SchedulingStrategy::TimerDriven,
            scheduling_period: Duration::ZERO,
            cron_expression: None,
            max_concurrent_tasks: 1,
            run_duration: Duration::ZERO,
            yield_period: DEFAULT_YIELD_PERIOD,
            isolated: false,
            trigger_when_empty: false,
            trigger_when_any_destination_available: false,
            high_throughput_supported: false,
        }
    }
}

// ── Component kinds ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

/// The closed set of schedulable component kinds.
#[derive(Clone)]
pub enum ComponentKind {
    /// User-supplied processing logic with lifecycle hooks.
    Processor(Arc<dyn Processor>),
    /// Moves records across a process-group boundary.
    Port(PortDirection),
    /// Merges several connections into one.
    Funnel,
}

impl ComponentKind {
    pub fn label(&self) -> &'static str {
        match self {
            ComponentKind::Processor(_) => "processor",
            ComponentKind::Port(PortDirection::Input) => "input-port",
            ComponentKind::Port(PortDirection::Output) => "output-port",
            ComponentKind::Funnel => "funnel",
        }
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Connectable ──────────────────────────────────────────────

/// A schedulable dataflow unit.
pub struct Connectable {
    id: ComponentId,
    name: String,
    kind: ComponentKind,
    relationships: Vec<Relationship>,
    properties: HashMap<String, String>,
    settings: RwLock<SchedulingSettings>,
    enabled: AtomicBool,
    yield_expiration: Mutex<Option<Instant>>,
}

impl fmt::Debug for Connectable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connectable")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("relationships", &self.relationships)
            .finish_non_exhaustive()
    }
}

impl Connectable {
    /// Start building a processor around the given logic.
    pub fn processor(id: impl Into<ComponentId>, logic: Arc<dyn Processor>) -> ConnectableBuilder {
        ConnectableBuilder::new(id.into(), ComponentKind::Processor(logic))
    }

    pub fn port(id: impl Into<ComponentId>, direction: PortDirection) -> ConnectableBuilder {
        ConnectableBuilder::new(id.into(), ComponentKind::Port(direction))
    }

    pub fn funnel(id: impl Into<ComponentId>) -> ConnectableBuilder {
        ConnectableBuilder::new(id.into(), ComponentKind::Funnel)
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    /// Output relationships in declaration order.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Snapshot of the current scheduling settings.
    pub fn settings(&self) -> SchedulingSettings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Apply a configuration change. Ports and funnels keep their fixed flags.
    pub fn update_settings(&self, change: impl FnOnce(&mut SchedulingSettings)) {
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
        change(&mut settings);
        pin_fixed_flags(&self.kind, &mut settings);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn yield_expiration(&self) -> Option<Instant> {
        *self.yield_expiration.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the component is still yielded at `now`.
    pub fn is_yielded(&self, now: Instant) -> bool {
        matches!(self.yield_expiration(), Some(expiration) if expiration >= now)
    }

    /// Suppress eligibility until `deadline`. Never shortens an existing yield.
    pub fn yield_until(&self, deadline: Instant) {
        let mut expiration = self.yield_expiration.lock().unwrap_or_else(|e| e.into_inner());
        *expiration = Some(match *expiration {
            Some(current) if current > deadline => current,
            _ => deadline,
        });
    }

    pub fn yield_for(&self, period: Duration, now: Instant) {
        self.yield_until(now + period);
    }

    /// Processing logic for processors; `None` for ports and funnels.
    pub fn processor_logic(&self) -> Option<&Arc<dyn Processor>> {
        match &self.kind {
            ComponentKind::Processor(logic) => Some(logic),
            _ => None,
        }
    }

    /// Run the component's logic once.
    pub fn trigger(
        &self,
        context: &ProcessContext,
        sessions: &dyn ProcessSessionFactory,
    ) -> Result<(), TriggerError> {
        match &self.kind {
            ComponentKind::Processor(logic) => logic.on_trigger(context, sessions),
            ComponentKind::Port(_) | ComponentKind::Funnel => {
                pass_through(sessions, &self.relationships[0])
            }
        }
    }
}

/// Built-in logic of ports and funnels: move queued records downstream.
fn pass_through(
    sessions: &dyn ProcessSessionFactory,
    relationship: &Relationship,
) -> Result<(), TriggerError> {
    let mut session = sessions.create_session();
    let mut moved = 0;
    while moved < TRANSFER_BATCH_SIZE {
        match session.get() {
            Some(record) => {
                session.transfer(record, relationship);
                moved += 1;
            }
            None => break,
        }
    }

    if moved == 0 {
        session.rollback();
        return Ok(());
    }
    session
        .commit()
        .map_err(|e| TriggerError::Unexpected(anyhow::Error::new(e)))
}

fn pin_fixed_flags(kind: &ComponentKind, settings: &mut SchedulingSettings) {
    if matches!(kind, ComponentKind::Processor(_)) {
        return;
    }
    settings.isolated = false;
    settings.trigger_when_empty = false;
    settings.trigger_when_any_destination_available = false;
    settings.high_throughput_supported = false;
    settings.run_duration = Duration::ZERO;
}

// ── Builder ──────────────────────────────────────────────────

/// Fluent builder for [`Connectable`].
///
/// # Example
/// ```ignore
/// let proc = Connectable::processor("split", Arc::new(SplitRecords))
///     .relationships(["success", "failure"])
///     .run_duration(Duration::from_millis(25))
///     .high_throughput_supported(true)
///     .build();
/// ```
pub struct ConnectableBuilder {
    id: ComponentId,
    name: Option<String>,
    kind: ComponentKind,
    relationships: Vec<Relationship>,
    properties: HashMap<String, String>,
    settings: SchedulingSettings,
    enabled: bool,
}

impl ConnectableBuilder {
    fn new(id: ComponentId, kind: ComponentKind) -> Self {
        Self {
            id,
            name: None,
            kind,
            relationships: Vec::new(),
            properties: HashMap::new(),
            settings: SchedulingSettings::default(),
            enabled: true,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare output relationships (processors only; ports and funnels
    /// always have the single anonymous relationship).
    pub fn relationships<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relationships = names.into_iter().map(Relationship::new).collect();
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn strategy(mut self, strategy: SchedulingStrategy) -> Self {
        self.settings.strategy = strategy;
        self
    }

    pub fn scheduling_period(mut self, period: Duration) -> Self {
        self.settings.scheduling_period = period;
        self
    }

    /// Switch to cron-driven scheduling with the given expression.
    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        self.settings.strategy = SchedulingStrategy::CronDriven;
        self.settings.cron_expression = Some(expression.into());
        self
    }

    pub fn max_concurrent_tasks(mut self, n: usize) -> Self {
        self.settings.max_concurrent_tasks = n.max(1);
        self
    }

    pub fn run_duration(mut self, budget: Duration) -> Self {
        self.settings.run_duration = budget;
        self
    }

    pub fn yield_period(mut self, period: Duration) -> Self {
        self.settings.yield_period = period;
        self
    }

    pub fn isolated(mut self, isolated: bool) -> Self {
        self.settings.isolated = isolated;
        self
    }

    pub fn trigger_when_empty(mut self, flag: bool) -> Self {
        self.settings.trigger_when_empty = flag;
        self
    }

    pub fn trigger_when_any_destination_available(mut self, flag: bool) -> Self {
        self.settings.trigger_when_any_destination_available = flag;
        self
    }

    pub fn high_throughput_supported(mut self, flag: bool) -> Self {
        self.settings.high_throughput_supported = flag;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn build(self) -> Arc<Connectable> {
        let mut settings = self.settings;
        pin_fixed_flags(&self.kind, &mut settings);

        let relationships = match self.kind {
            ComponentKind::Processor(_) => self.relationships,
            ComponentKind::Port(_) | ComponentKind::Funnel => vec![Relationship::anonymous()],
        };

        Arc::new(Connectable {
            name: self.name.unwrap_or_else(|| self.id.to_string()),
            id: self.id,
            kind: self.kind,
            relationships,
            properties: self.properties,
            settings: RwLock::new(settings),
            enabled: AtomicBool::new(self.enabled),
            yield_expiration: Mutex::new(None),
        })
    }
}
