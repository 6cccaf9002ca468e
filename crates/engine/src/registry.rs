use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::session::LettrageSession;

/// Identifies one reconciliation session: a tenant and one statement import.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub tenant_id: String,
    pub import_id: String,
}

impl SessionKey {
    pub fn new(tenant_id: impl Into<String>, import_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            import_id: import_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.import_id)
    }
}

pub type SharedSession = Arc<tokio::sync::Mutex<LettrageSession>>;

/// Sessions of a concurrent host. Mutations of one session are serialized by
/// its own mutex; different sessions never contend.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionKey, SharedSession>>,
    event_throttle: Duration,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_throttle(event_throttle: Duration) -> Self {
        Self {
            sessions: Mutex::default(),
            event_throttle,
        }
    }

    pub fn get_or_create(&self, key: &SessionKey) -> SharedSession {
        let mut sessions = self.lock();
        let session = sessions.entry(key.clone()).or_insert_with(|| {
            tracing::debug!(session = %key, "opening reconciliation session");
            Arc::new(tokio::sync::Mutex::new(
                LettrageSession::default()
                    .with_scope(key.to_string())
                    .with_event_throttle(self.event_throttle),
            ))
        });
        Arc::clone(session)
    }

    pub fn get(&self, key: &SessionKey) -> Option<SharedSession> {
        self.lock().get(key).cloned()
    }

    /// Discards a session; holders of its handle keep a usable copy.
    pub fn remove(&self, key: &SessionKey) -> Option<SharedSession> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, SharedSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
