//! Pending state held on the server, keyed by a signed session id.
//!
//! The transport cookie carries only a codec-sealed random id. The record
//! itself lives in a [`RecordBackend`] with a TTL and is removed atomically
//! on take, so single use holds across every node sharing the backend.

use super::expiring::ExpiringMap;
use super::{PendingRecord, PendingStateStore};
use crate::clock::{Clock, SystemClock};
use crate::codec::CodecChain;
use crate::config::{CookieOptions, HandoffConfig, DEFAULT_MAX_PENDING};
use crate::error::{AuthError, Result, SessionMiss};
use crate::request::AuthRequest;
use crate::response::CookieSink;
use crate::token::generate_session_id;
use chrono::Duration;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Storage for server-held pending records.
pub trait RecordBackend: Send + Sync + 'static {
    /// Store `record` under `id` for `ttl`, replacing any previous record.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the backend fails.
    fn insert(
        &self,
        id: &str,
        record: &PendingRecord,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Atomically remove and return the live record under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the backend fails.
    fn take(&self, id: &str) -> impl Future<Output = Result<Option<PendingRecord>>> + Send;
}

/// Server-side pending-state store.
pub struct ServerStateStore<B> {
    codec: Arc<CodecChain>,
    options: CookieOptions,
    backend: B,
    ttl: Duration,
}

impl<B: RecordBackend> ServerStateStore<B> {
    /// Create a store over `backend`. Records live for `ttl`.
    #[must_use]
    pub fn new(codec: CodecChain, options: CookieOptions, backend: B, ttl: Duration) -> Self {
        Self {
            codec: Arc::new(codec),
            options,
            backend,
            ttl,
        }
    }

    /// Build the store described by `config` over `backend`.
    ///
    /// The record TTL and the id cookie's maximum age both come from
    /// [`HandoffConfig::pending_lifetime`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the configuration is invalid
    /// or a key pair is unusable.
    pub fn from_config(config: &HandoffConfig, backend: B) -> Result<Self> {
        Self::from_config_with_clock(config, backend, Arc::new(SystemClock))
    }

    /// Build the store described by `config`, reading time from `clock`.
    ///
    /// # Errors
    ///
    /// See [`ServerStateStore::from_config`].
    pub fn from_config_with_clock(
        config: &HandoffConfig,
        backend: B,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let codec = CodecChain::from_pairs(
            config.keys.pairs(),
            Some(config.pending_lifetime()),
            config.token_max_length,
            clock,
        )
        .map_err(|e| AuthError::Configuration(e.to_string()))?;

        Ok(Self::new(
            codec,
            config.cookie.clone(),
            backend,
            config.pending_lifetime(),
        ))
    }

    /// The record backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    fn session_id(&self, request: &AuthRequest) -> std::result::Result<String, SessionMiss> {
        let value = request
            .cookie(&self.options.name)
            .ok_or(SessionMiss::CookieAbsent)?;
        if value.is_empty() {
            return Err(SessionMiss::CookieEmpty);
        }
        Ok(self.codec.decode(&self.options.name, &value)?)
    }
}

impl<B> fmt::Debug for ServerStateStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerStateStore")
            .field("cookie", &self.options.name)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<B: RecordBackend> PendingStateStore for ServerStateStore<B> {
    async fn put<K: CookieSink + Send>(
        &self,
        request: &AuthRequest,
        record: PendingRecord,
        sink: &mut K,
    ) -> Result<()> {
        // A browser restarting a login keeps its id; the old record is replaced.
        let id = self
            .session_id(request)
            .unwrap_or_else(|_| generate_session_id());

        self.backend.insert(&id, &record, self.ttl).await?;

        let token = self.codec.encode(&self.options.name, &id).map_err(|e| {
            tracing::error!(error = %e, "Failed to seal session id");
            AuthError::Configuration(format!("cannot seal session id: {e}"))
        })?;

        sink.set_cookie(self.options.cookie(token));
        Ok(())
    }

    async fn take<K: CookieSink + Send>(
        &self,
        request: &AuthRequest,
        sink: &mut K,
    ) -> Result<PendingRecord> {
        if request.cookie(&self.options.name).is_some() {
            sink.set_cookie(self.options.expired());
        }

        let id = self.session_id(request).map_err(AuthError::no_session)?;

        self.backend
            .take(&id)
            .await?
            .ok_or(AuthError::no_session(SessionMiss::RecordAbsent))
    }
}

type RecordMap = ExpiringMap<String, PendingRecord>;

/// In-process record backend.
///
/// Suitable for a single node; records vanish on restart. Holds at most
/// [`DEFAULT_MAX_PENDING`] records unless built with
/// [`MemoryRecordBackend::with_capacity`]; a new attempt beyond that fails
/// with [`AuthError::Storage`].
#[derive(Clone)]
pub struct MemoryRecordBackend {
    records: Arc<Mutex<RecordMap>>,
    clock: Arc<dyn Clock>,
}

impl MemoryRecordBackend {
    /// Create an empty backend on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty backend reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(Mutex::new(ExpiringMap::new(DEFAULT_MAX_PENDING))),
            clock,
        }
    }

    /// Hold at most `capacity` records. Replaces any records already held.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.records = Arc::new(Mutex::new(ExpiringMap::new(capacity)));
        self
    }

    /// Number of live records.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        let now = self.clock.now();
        Ok(self.lock()?.live_len(now))
    }

    /// Returns `true` if no live record is held.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RecordMap>> {
        self.records
            .lock()
            .map_err(|_| AuthError::Storage("pending record lock poisoned".to_string()))
    }
}

impl Default for MemoryRecordBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryRecordBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRecordBackend").finish_non_exhaustive()
    }
}

impl RecordBackend for MemoryRecordBackend {
    async fn insert(&self, id: &str, record: &PendingRecord, ttl: Duration) -> Result<()> {
        let now = self.clock.now();
        let mut records = self.lock()?;
        records
            .insert(id.to_string(), record.clone(), now + ttl, now)
            .map_err(|_| {
                tracing::warn!(capacity = records.capacity(), "Pending record store at capacity");
                AuthError::Storage("pending record store is full".to_string())
            })
    }

    async fn take(&self, id: &str) -> Result<Option<PendingRecord>> {
        let now = self.clock.now();
        Ok(self.lock()?.take(&id.to_string(), now))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::KeyPair;
    use crate::config::SecretKeys;
    use crate::mocks::MockClock;
    use crate::response::ResponseCookies;

    fn config() -> HandoffConfig {
        HandoffConfig::new(SecretKeys::new(KeyPair::new(vec![3u8; 64])))
    }

    fn store_with(clock: &MockClock) -> ServerStateStore<MemoryRecordBackend> {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        ServerStateStore::from_config_with_clock(
            &config().with_token_max_age(Duration::minutes(10)),
            MemoryRecordBackend::with_clock(Arc::clone(&clock)),
            clock,
        )
        .unwrap()
    }

    fn record(state: &str) -> PendingRecord {
        PendingRecord::new(state, "{}")
    }

    async fn put(
        store: &ServerStateStore<MemoryRecordBackend>,
        request: &AuthRequest,
        state: &str,
    ) -> String {
        let mut cookies = ResponseCookies::new();
        store.put(request, record(state), &mut cookies).await.unwrap();
        cookies.get("_handoff").unwrap().value().to_string()
    }

    #[tokio::test]
    async fn record_is_taken_once() {
        let store = store_with(&MockClock::new());
        let token = put(&store, &AuthRequest::default(), "s1").await;
        let request = AuthRequest::default().with_cookie("_handoff", &token);

        let mut cookies = ResponseCookies::new();
        assert_eq!(store.take(&request, &mut cookies).await.unwrap(), record("s1"));
        assert_eq!(cookies.get("_handoff").map(|c| c.value()), Some(""));

        let err = store
            .take(&request, &mut ResponseCookies::new())
            .await
            .unwrap_err();
        assert_eq!(err.session_miss(), Some(&SessionMiss::RecordAbsent));
    }

    #[tokio::test]
    async fn restarting_a_login_reuses_the_id() {
        let store = store_with(&MockClock::new());
        let first = put(&store, &AuthRequest::default(), "s1").await;

        let again = AuthRequest::default().with_cookie("_handoff", &first);
        put(&store, &again, "s2").await;

        assert_eq!(store.backend().len().unwrap(), 1);
        let taken = store.take(&again, &mut ResponseCookies::new()).await.unwrap();
        assert_eq!(taken.state(), "s2");
    }

    #[tokio::test]
    async fn expired_record_is_absent() {
        let clock = MockClock::new();
        let store = ServerStateStore::new(
            CodecChain::from_pairs(
                config().keys.pairs(),
                None,
                crate::codec::DEFAULT_MAX_LENGTH,
                Arc::new(clock.clone()),
            )
            .unwrap(),
            CookieOptions::default(),
            MemoryRecordBackend::with_clock(Arc::new(clock.clone())),
            Duration::minutes(1),
        );

        let token = put_any(&store).await;
        clock.advance(Duration::minutes(2));

        let request = AuthRequest::default().with_cookie("_handoff", &token);
        let err = store
            .take(&request, &mut ResponseCookies::new())
            .await
            .unwrap_err();
        assert_eq!(err.session_miss(), Some(&SessionMiss::RecordAbsent));
    }

    async fn put_any(store: &ServerStateStore<MemoryRecordBackend>) -> String {
        put(store, &AuthRequest::default(), "s").await
    }

    #[tokio::test]
    async fn forged_id_is_rejected_before_lookup() {
        let store = store_with(&MockClock::new());
        put(&store, &AuthRequest::default(), "s1").await;

        let mut cookies = ResponseCookies::new();
        let request = AuthRequest::default().with_cookie("_handoff", "guessed-id");
        let err = store.take(&request, &mut cookies).await.unwrap_err();

        assert!(matches!(err.session_miss(), Some(SessionMiss::Codec(_))));
        assert_eq!(cookies.len(), 1);
        assert_eq!(store.backend().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn records_default_to_the_pending_ttl() {
        let clock = MockClock::new();
        let store = ServerStateStore::from_config_with_clock(
            &config(),
            MemoryRecordBackend::with_clock(Arc::new(clock.clone())),
            Arc::new(clock.clone()),
        )
        .unwrap();

        let token = put_any(&store).await;
        clock.advance(Duration::minutes(16));
        assert!(store.backend().is_empty().unwrap());

        let request = AuthRequest::default().with_cookie("_handoff", &token);
        let err = store
            .take(&request, &mut ResponseCookies::new())
            .await
            .unwrap_err();
        assert!(matches!(err.session_miss(), Some(SessionMiss::Codec(_))));
    }

    #[tokio::test]
    async fn memory_backend_is_bounded() {
        let clock = MockClock::new();
        let backend = MemoryRecordBackend::with_clock(Arc::new(clock.clone())).with_capacity(8);

        for i in 0..8 {
            backend
                .insert(&format!("id-{i}"), &record("s"), Duration::minutes(1))
                .await
                .unwrap();
        }
        let err = backend
            .insert("one-more", &record("s"), Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Storage(_)));

        // Replacing a held id still works at capacity.
        backend.insert("id-0", &record("s2"), Duration::minutes(1)).await.unwrap();

        clock.advance(Duration::minutes(2));
        for i in 0..1_000 {
            backend
                .insert(&format!("late-{i}"), &record("s"), Duration::seconds(1))
                .await
                .unwrap();
            clock.advance(Duration::seconds(1));
        }
        assert!(backend.records.lock().unwrap().len() <= 8);
    }

    #[tokio::test]
    async fn missing_cookie_writes_nothing() {
        let store = store_with(&MockClock::new());
        let mut cookies = ResponseCookies::new();
        let err = store
            .take(&AuthRequest::default(), &mut cookies)
            .await
            .unwrap_err();

        assert_eq!(err.session_miss(), Some(&SessionMiss::CookieAbsent));
        assert!(cookies.is_empty());
    }
}
