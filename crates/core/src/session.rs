//! Process sessions and the factories that hand them to processing logic.
//!
//! Record storage lives behind [`SessionRepository`]; the scheduler only
//! opens sessions and, in batch mode, commits the shared one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::component::{ComponentId, Relationship};
use crate::error::SessionError;

/// A unit of in-flight data.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    pub id: Uuid,
    pub attributes: HashMap<String, String>,
    pub content: Vec<u8>,
}

impl FlowRecord {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            attributes: HashMap::new(),
            content: content.into(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Transactional access to a component's queued records.
pub trait ProcessSession: Send {
    /// Take the next queued input record, if any.
    fn get(&mut self) -> Option<FlowRecord>;

    /// Route a record to one of the component's relationships.
    fn transfer(&mut self, record: FlowRecord, relationship: &Relationship);

    /// Drop a record from the flow.
    fn remove(&mut self, record: FlowRecord);

    fn commit(&mut self) -> Result<(), SessionError>;

    fn rollback(&mut self);
}

/// Hands out sessions to processing logic.
pub trait ProcessSessionFactory: Send + Sync {
    fn create_session(&self) -> Box<dyn ProcessSession>;
}

/// Collaborator owning record storage.
pub trait SessionRepository: Send + Sync {
    fn open_session(&self, component: &ComponentId) -> Box<dyn ProcessSession>;
}

/// Factory that opens an independent session per request.
pub struct StandardSessionFactory {
    repository: Arc<dyn SessionRepository>,
    component: ComponentId,
}

impl StandardSessionFactory {
    pub fn new(repository: Arc<dyn SessionRepository>, component: ComponentId) -> Self {
        Self {
            repository,
            component,
        }
    }
}

impl ProcessSessionFactory for StandardSessionFactory {
    fn create_session(&self) -> Box<dyn ProcessSession> {
        self.repository.open_session(&self.component)
    }
}

type SharedSession = Arc<Mutex<Box<dyn ProcessSession>>>;

/// Factory whose sessions all delegate to one underlying session.
///
/// `commit` on a handed-out session is deferred: the owner commits the
/// underlying session once via [`commit`](BatchingSessionFactory::commit).
pub struct BatchingSessionFactory {
    session: SharedSession,
}

impl BatchingSessionFactory {
    pub fn new(session: Box<dyn ProcessSession>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    /// Commit everything done through this factory's sessions.
    pub fn commit(&self) -> Result<(), SessionError> {
        self.session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .commit()
    }
}

impl ProcessSessionFactory for BatchingSessionFactory {
    fn create_session(&self) -> Box<dyn ProcessSession> {
        Box::new(BatchedSession {
            inner: Arc::clone(&self.session),
        })
    }
}

struct BatchedSession {
    inner: SharedSession,
}

impl BatchedSession {
    fn with<R>(&self, f: impl FnOnce(&mut Box<dyn ProcessSession>) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }
}

impl ProcessSession for BatchedSession {
    fn get(&mut self) -> Option<FlowRecord> {
        self.with(|s| s.get())
    }

    fn transfer(&mut self, record: FlowRecord, relationship: &Relationship) {
        self.with(|s| s.transfer(record, relationship))
    }

    fn remove(&mut self, record: FlowRecord) {
        self.with(|s| s.remove(record))
    }

    fn commit(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    fn rollback(&mut self) {
        self.with(|s| s.rollback())
    }
}
