//! Pending-state stores.
//!
//! Between `get_auth_url` and `complete_user_auth` the handoff keeps one
//! [`PendingRecord`] per attempt: the state token and the marshaled provider
//! session. A store puts it when the attempt begins and takes it, exactly
//! once, when the callback arrives.
//!
//! Two implementations ship:
//!
//! - [`CookieStateStore`]: the whole record travels in the transport cookie,
//!   sealed by the secure codec. No server state.
//! - [`ServerStateStore`]: the record stays on the server, keyed by a random
//!   session id; only the signed id travels in the cookie.
//!
//! Either way the transport cookie is expired on the response of every
//! completion attempt that presented one, whatever the outcome.

pub mod cookie;
mod expiring;
#[cfg(feature = "redis")]
pub mod redis;
pub mod server;

pub use self::cookie::CookieStateStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisRecordBackend;
pub use self::server::{MemoryRecordBackend, RecordBackend, ServerStateStore};

use crate::error::Result;
use crate::request::AuthRequest;
use crate::response::CookieSink;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// One in-flight login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRecord {
    state: String,
    session: String,
}

impl PendingRecord {
    /// Pair a state token with a marshaled provider session.
    #[must_use]
    pub fn new(state: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            session: session.into(),
        }
    }

    /// State token issued when the attempt began.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Marshaled provider session.
    #[must_use]
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Consume the record into `(state, session)`.
    #[must_use]
    pub fn into_parts(self) -> (String, String) {
        (self.state, self.session)
    }

    /// Flatten to `state ‖ session`, the cookie transport encoding.
    #[must_use]
    pub fn to_plaintext(&self) -> String {
        let mut plain = String::with_capacity(self.state.len() + self.session.len());
        plain.push_str(&self.state);
        plain.push_str(&self.session);
        plain
    }

    /// Split a `state ‖ session` plaintext at `state_len` bytes.
    ///
    /// A plaintext that cannot hold a full state yields an empty state and
    /// the whole plaintext as session; the orchestrator then refuses it as a
    /// state mismatch.
    #[must_use]
    pub fn from_plaintext(plain: &str, state_len: usize) -> Self {
        if plain.len() < state_len || !plain.is_char_boundary(state_len) {
            return Self::new(String::new(), plain);
        }
        let (state, session) = plain.split_at(state_len);
        Self::new(state, session)
    }
}

/// Capability to hold one pending record per browser between redirects.
pub trait PendingStateStore: Send + Sync + 'static {
    /// Persist `record` for the browser behind `request`.
    ///
    /// Writes the transport cookie to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be sealed or stored.
    fn put<K: CookieSink + Send>(
        &self,
        request: &AuthRequest,
        record: PendingRecord,
        sink: &mut K,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove and return the record for the browser behind `request`.
    ///
    /// A record is returned at most once. If the request presented a
    /// transport cookie, an expiring cookie is written to `sink` before any
    /// verification.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoMatchingSession`](crate::AuthError::NoMatchingSession)
    /// if no record can be produced for the request, or
    /// [`AuthError::Storage`](crate::AuthError::Storage) if the backend failed.
    fn take<K: CookieSink + Send>(
        &self,
        request: &AuthRequest,
        sink: &mut K,
    ) -> impl Future<Output = Result<PendingRecord>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_splits_at_state_length() {
        let record = PendingRecord::new("0123456789abcdef", r#"{"AuthURL":"x"}"#);
        let back = PendingRecord::from_plaintext(&record.to_plaintext(), 16);
        assert_eq!(back, record);
    }

    #[test]
    fn empty_session_is_preserved() {
        let back = PendingRecord::from_plaintext("0123456789abcdef", 16);
        assert_eq!(back.state(), "0123456789abcdef");
        assert_eq!(back.session(), "");
    }

    #[test]
    fn short_plaintext_yields_empty_state() {
        let back = PendingRecord::from_plaintext("short", 16);
        assert_eq!(back.state(), "");
        assert_eq!(back.session(), "short");
    }

    #[test]
    fn split_inside_a_character_yields_empty_state() {
        let plain = format!("{}é{}", "a".repeat(15), "rest");
        let back = PendingRecord::from_plaintext(&plain, 16);
        assert_eq!(back.state(), "");
    }
}
