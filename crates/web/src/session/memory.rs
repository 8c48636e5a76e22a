use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::session::{BasicSession, Session, SessionState, SessionStorage, generate_session_id};

struct Entry<S> {
    session: S,
    last_access: Instant,
}

/// Keeps sessions in a map guarded by a mutex.
///
/// With an idle timeout, a session not looked up for that long expires: the next
/// lookup reports [`SessionState::TimedOut`] once and forgets it. Creating a session
/// sweeps every expired entry, so abandoned sessions do not pile up.
pub struct MemorySessionStorage<S = BasicSession> {
    sessions: Mutex<HashMap<String, Entry<S>>>,
    idle_timeout: Option<Duration>,
}

impl<S> fmt::Debug for MemorySessionStorage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySessionStorage")
            .field("sessions", &self.sessions.lock().len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl<S> Default for MemorySessionStorage<S> {
    fn default() -> Self {
        Self { sessions: Mutex::new(HashMap::new()), idle_timeout: None }
    }
}

impl<S: Session> MemorySessionStorage<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), idle_timeout: Some(idle_timeout) }
    }

    fn is_expired(&self, entry: &Entry<S>, now: Instant) -> bool {
        self.idle_timeout.is_some_and(|timeout| now.duration_since(entry.last_access) >= timeout)
    }

    /// Drops every expired session, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        if self.idle_timeout.is_none() {
            return 0;
        }
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, entry| !self.is_expired(entry, now));
        let swept = before - sessions.len();
        if swept > 0 {
            trace!(swept, "expired sessions removed");
        }
        swept
    }

    /// Looks a session up, refreshing its idle clock. Expired entries are removed.
    fn lookup(&self, id: &str) -> Result<S, SessionState> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.get_mut(id) else {
            return Err(SessionState::NotFound);
        };
        if self.is_expired(entry, now) {
            sessions.remove(id);
            trace!(session = id, "session expired");
            return Err(SessionState::TimedOut);
        }
        entry.last_access = now;
        Ok(entry.session.clone())
    }
}

impl<S: Session> SessionStorage for MemorySessionStorage<S> {
    type Session = S;

    fn create_session(&self) -> String {
        self.sweep_expired();
        let id = generate_session_id();
        let entry = Entry { session: S::with_id(id.clone()), last_access: Instant::now() };
        self.sessions.lock().insert(id.clone(), entry);
        trace!(session = %id, "session created");
        id
    }

    fn get_session(&self, id: &str) -> Option<S> {
        self.lookup(id).ok()
    }

    fn set_session(&self, id: &str, session: S) -> bool {
        match self.sessions.lock().get_mut(id) {
            Some(entry) => {
                entry.session = session;
                entry.last_access = Instant::now();
                true
            }
            None => false,
        }
    }

    fn delete_session(&self, id: &str) {
        self.sessions.lock().remove(id);
    }

    fn clear(&self) {
        self.sessions.lock().clear();
    }

    fn size(&self) -> usize {
        self.sessions.lock().len()
    }

    fn session_state(&self, id: Option<&str>) -> SessionState {
        match id {
            None => SessionState::NoSession,
            Some(id) => self.lookup(id).map_or_else(|state| state, |_| SessionState::Live),
        }
    }
}
