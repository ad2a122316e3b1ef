//! Pending state carried entirely in the transport cookie.

use super::expiring::ExpiringMap;
use super::{PendingRecord, PendingStateStore};
use crate::clock::{Clock, SystemClock};
use crate::codec::{CodecChain, MAX_CLOCK_SKEW_SECS};
use crate::config::{CookieOptions, HandoffConfig, DEFAULT_MAX_PENDING, DEFAULT_PENDING_TTL_SECS};
use crate::error::{AuthError, Result, SessionMiss};
use crate::request::AuthRequest;
use crate::response::CookieSink;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Stateless pending-state store.
///
/// The record is sealed with the codec chain and set as the transport
/// cookie. On take the cookie is expired, decoded, and its digest recorded
/// in a replay ledger so the same cookie value completes at most once per
/// process. The ledger holds at most `max_pending` digests; once full,
/// completions fail with [`AuthError::Storage`] until entries age out.
#[derive(Clone)]
pub struct CookieStateStore {
    codec: Arc<CodecChain>,
    options: CookieOptions,
    state_len: usize,
    ledger: Arc<ReplayLedger>,
}

impl CookieStateStore {
    /// Create a store over `codec` with the default ledger cap.
    #[must_use]
    pub fn new(codec: CodecChain, options: CookieOptions, state_len: usize) -> Self {
        Self::with_clock(codec, options, state_len, DEFAULT_MAX_PENDING, Arc::new(SystemClock))
    }

    /// Create a store whose replay ledger holds up to `max_pending` digests
    /// and reads time from `clock`.
    ///
    /// Digests are kept for the codec's maximum token age, or the default
    /// pending lifetime when the codec does not expire tokens.
    #[must_use]
    pub fn with_clock(
        codec: CodecChain,
        options: CookieOptions,
        state_len: usize,
        max_pending: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let retention = codec
            .max_age()
            .unwrap_or_else(|| Duration::seconds(DEFAULT_PENDING_TTL_SECS))
            + Duration::seconds(MAX_CLOCK_SKEW_SECS);

        Self {
            codec: Arc::new(codec),
            options,
            state_len,
            ledger: Arc::new(ReplayLedger::new(retention, max_pending, clock)),
        }
    }

    /// Build the store described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the configuration is invalid
    /// or a key pair is unusable.
    pub fn from_config(config: &HandoffConfig) -> Result<Self> {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    /// Build the store described by `config`, reading time from `clock`.
    ///
    /// Cookies are accepted for [`HandoffConfig::pending_lifetime`].
    ///
    /// # Errors
    ///
    /// See [`CookieStateStore::from_config`].
    pub fn from_config_with_clock(config: &HandoffConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let codec = CodecChain::from_pairs(
            config.keys.pairs(),
            Some(config.pending_lifetime()),
            config.token_max_length,
            Arc::clone(&clock),
        )
        .map_err(|e| AuthError::Configuration(e.to_string()))?;

        Ok(Self::with_clock(
            codec,
            config.cookie.clone(),
            config.state_len,
            config.max_pending,
            clock,
        ))
    }

    /// Transport cookie attributes.
    #[must_use]
    pub const fn options(&self) -> &CookieOptions {
        &self.options
    }
}

impl fmt::Debug for CookieStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieStateStore")
            .field("cookie", &self.options.name)
            .field("state_len", &self.state_len)
            .field("keys", &self.codec.len())
            .finish_non_exhaustive()
    }
}

impl PendingStateStore for CookieStateStore {
    async fn put<K: CookieSink + Send>(
        &self,
        _request: &AuthRequest,
        record: PendingRecord,
        sink: &mut K,
    ) -> Result<()> {
        let token = self
            .codec
            .encode(&self.options.name, &record.to_plaintext())
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to seal pending state");
                AuthError::Configuration(format!("cannot seal pending state: {e}"))
            })?;

        sink.set_cookie(self.options.cookie(token));
        Ok(())
    }

    async fn take<K: CookieSink + Send>(
        &self,
        request: &AuthRequest,
        sink: &mut K,
    ) -> Result<PendingRecord> {
        let Some(value) = request.cookie(&self.options.name) else {
            return Err(AuthError::no_session(SessionMiss::CookieAbsent));
        };

        sink.set_cookie(self.options.expired());

        if value.is_empty() {
            return Err(AuthError::no_session(SessionMiss::CookieEmpty));
        }

        let plain = self
            .codec
            .decode(&self.options.name, &value)
            .map_err(|e| AuthError::no_session(SessionMiss::Codec(e)))?;

        if !self.ledger.consume(&value)? {
            return Err(AuthError::no_session(SessionMiss::Replayed));
        }

        Ok(PendingRecord::from_plaintext(&plain, self.state_len))
    }
}

/// Digests of consumed cookie values, kept until the token could no longer
/// pass the codec age check anyway.
struct ReplayLedger {
    seen: Mutex<ExpiringMap<[u8; 32], ()>>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl ReplayLedger {
    fn new(retention: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            seen: Mutex::new(ExpiringMap::new(capacity)),
            retention,
            clock,
        }
    }

    /// Record `value` as consumed. Returns `false` if it already was.
    fn consume(&self, value: &str) -> Result<bool> {
        let digest: [u8; 32] = Sha256::digest(value.as_bytes()).into();
        let now = self.clock.now();

        let mut seen = self.lock()?;
        if seen.contains(&digest, now) {
            return Ok(false);
        }

        seen.insert(digest, (), now + self.retention, now).map_err(|_| {
            tracing::warn!(capacity = seen.capacity(), "Replay ledger at capacity");
            AuthError::Storage("replay ledger is full".to_string())
        })?;
        Ok(true)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ExpiringMap<[u8; 32], ()>>> {
        self.seen
            .lock()
            .map_err(|_| AuthError::Storage("replay ledger lock poisoned".to_string()))
    }
}
