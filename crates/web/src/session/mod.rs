//! Cookie based sessions and the authorization middleware.
//!
//! - [`SessionStorage`]: where sessions live, keyed by opaque ids
//! - [`MemorySessionStorage`]: an in-process storage with optional idle expiry
//! - [`Authorizer`]: decides whether a request without a live session may start one,
//!   [`BasicAuthorizer`] implements HTTP Basic authentication
//! - [`SessionControl`]: the middleware run before each matched route handler

mod authorizer;
mod control;
mod memory;

pub use authorizer::{AuthResult, Authorizer, BasicAuthorizer};
pub use control::{Conditioner, DEFAULT_SESSION_COOKIE, SessionControl, SessionGuard};
pub use memory::MemorySessionStorage;

use std::collections::HashMap;

use uuid::Uuid;

/// Outcome of looking up the session a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Live,
    /// The cookie names a session the storage does not know.
    NotFound,
    /// The request carries no session cookie.
    NoSession,
    /// The session existed but expired.
    TimedOut,
}

/// A new session id, a random v4 uuid drawn from the OS generator.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

pub trait Session: Clone + Send + Sync + 'static {
    fn with_id(id: String) -> Self;

    fn id(&self) -> &str;
}

/// A session carrying string attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicSession {
    id: String,
    attributes: HashMap<String, String>,
}

impl BasicSession {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.attributes.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.attributes.remove(key)
    }
}

impl Session for BasicSession {
    fn with_id(id: String) -> Self {
        Self { id, attributes: HashMap::new() }
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Storage of sessions keyed by id.
///
/// Implementations synchronize internally, every method takes `&self`. Ids returned
/// by [`SessionStorage::create_session`] must not be predictable, never use counters.
pub trait SessionStorage: Send + Sync + 'static {
    type Session: Session;

    fn create_session(&self) -> String;

    fn get_session(&self, id: &str) -> Option<Self::Session>;

    /// Replaces a stored session, returns false if `id` is unknown.
    fn set_session(&self, id: &str, session: Self::Session) -> bool;

    fn delete_session(&self, id: &str);

    fn clear(&self);

    fn size(&self) -> usize;

    /// Classifies the session id sent by a client, `None` when there was no cookie.
    fn session_state(&self, id: Option<&str>) -> SessionState {
        match id {
            None => SessionState::NoSession,
            Some(id) if self.get_session(id).is_some() => SessionState::Live,
            Some(_) => SessionState::NotFound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_uuids() {
        let ids: HashSet<_> = (0..64).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 64);
        assert!(ids.iter().all(|id| Uuid::parse_str(id).is_ok()));
    }

    #[test]
    fn basic_session_attributes() {
        let mut session = BasicSession::with_id("abc".to_owned());
        session.insert("user", "ferris");
        assert_eq!(session.id(), "abc");
        assert_eq!(session.get("user"), Some("ferris"));
        assert_eq!(session.remove("user").as_deref(), Some("ferris"));
        assert_eq!(session.get("user"), None);
    }
}
