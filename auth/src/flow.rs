//! The login handoff orchestrator.
//!
//! [`Handoff`] drives the two ends of a third-party login:
//!
//! ```text
//! get_auth_url:       resolve → state → begin_auth → auth_url → store.put
//! complete_user_auth: resolve → store.take → state check → unmarshal
//!                     → authorize → fetch_user
//! ```
//!
//! Neither operation retries. A failed attempt is terminal; the browser
//! starts over from `get_auth_url`.

use crate::config::HandoffConfig;
use crate::error::{AuthError, Result};
use crate::provider::ProviderRegistry;
use crate::request::AuthRequest;
use crate::response::CookieSink;
use crate::store::{CookieStateStore, PendingRecord, PendingStateStore};
use crate::token::generate_state;
use crate::user::UserProfile;
use http::StatusCode;
use std::collections::HashSet;

/// Redirect to the provider's authorization page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Target URL.
    pub location: String,
    /// Redirect status.
    pub status: StatusCode,
}

impl Redirect {
    /// `307 Temporary Redirect` to `location`.
    #[must_use]
    pub fn temporary(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            status: StatusCode::TEMPORARY_REDIRECT,
        }
    }
}

/// Login handoff orchestrator.
///
/// Immutable after construction; share it behind an `Arc`.
#[derive(Debug)]
pub struct Handoff<S> {
    registry: ProviderRegistry,
    store: S,
    state_unsupported: HashSet<String>,
    state_len: usize,
}

impl Handoff<CookieStateStore> {
    /// Orchestrator over a [`CookieStateStore`] built from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if `config` is invalid.
    pub fn with_cookie_store(registry: ProviderRegistry, config: &HandoffConfig) -> Result<Self> {
        let store = CookieStateStore::from_config(config)?;
        Self::new(registry, store, config)
    }
}

impl<S: PendingStateStore> Handoff<S> {
    /// Orchestrator over `store`, with state-check settings from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if `config` is invalid.
    pub fn new(registry: ProviderRegistry, store: S, config: &HandoffConfig) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            tracing::warn!("Login handoff created with no providers registered");
        }

        Ok(Self {
            registry,
            store,
            state_unsupported: config.state_unsupported.clone(),
            state_len: config.state_len,
        })
    }

    /// Registered providers.
    #[must_use]
    pub const fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Pending-state store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Begin a login with `provider_name` and return the URL to send the
    /// user to.
    ///
    /// The pending record is written to `sink` (or the server-held store)
    /// before returning, replacing any earlier attempt from the same browser.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownProvider`] if the name is not registered
    /// - [`AuthError::ProviderBegin`] if the provider cannot start the attempt
    ///   or build its URL
    /// - [`AuthError::Configuration`] / [`AuthError::Storage`] from the store
    pub async fn get_auth_url<K: CookieSink + Send>(
        &self,
        provider_name: &str,
        request: &AuthRequest,
        sink: &mut K,
    ) -> Result<String> {
        let provider = self.registry.resolve(provider_name)?;
        let state = generate_state(self.state_len);

        let session = provider
            .begin_auth(&state)
            .await
            .map_err(|source| begin_failed(provider_name, source))?;

        let url = session
            .auth_url()
            .map_err(|source| begin_failed(provider_name, source))?;

        self.store
            .put(request, PendingRecord::new(state, session.marshal()), sink)
            .await?;

        tracing::info!(provider = %provider_name, "Began login");
        Ok(url)
    }

    /// [`Handoff::get_auth_url`] packaged as a `307` redirect.
    ///
    /// # Errors
    ///
    /// See [`Handoff::get_auth_url`].
    pub async fn begin_auth<K: CookieSink + Send>(
        &self,
        provider_name: &str,
        request: &AuthRequest,
        sink: &mut K,
    ) -> Result<Redirect> {
        self.get_auth_url(provider_name, request, sink)
            .await
            .map(Redirect::temporary)
    }

    /// Complete a login from the provider's callback request.
    ///
    /// The pending record is consumed whatever the outcome, and the
    /// transport cookie is expired on `sink` if the request carried one.
    /// The state check happens before any provider call.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnknownProvider`] if the name is not registered
    /// - [`AuthError::NoMatchingSession`] if no pending record can be taken
    /// - [`AuthError::StateMismatch`] if the callback state does not match
    /// - [`AuthError::SessionUnmarshal`] if the stored session is unreadable
    /// - [`AuthError::ProviderAuthorize`] / [`AuthError::ProviderFetch`] if
    ///   the provider fails
    pub async fn complete_user_auth<K: CookieSink + Send>(
        &self,
        provider_name: &str,
        request: &AuthRequest,
        sink: &mut K,
    ) -> Result<UserProfile> {
        let provider = match self.registry.resolve(provider_name) {
            Ok(provider) => provider,
            Err(err) => {
                // The attempt ends here, so its pending record goes with it.
                let _ = self.store.take(request, sink).await;
                return Err(err);
            }
        };

        let record = self
            .store
            .take(request, sink)
            .await
            .inspect_err(|e| log_take_failure(provider_name, e))?;

        self.verify_state(provider_name, record.state(), request.state_param())?;

        let mut session = provider
            .unmarshal_session(record.session())
            .map_err(|source| {
                tracing::error!(
                    provider = %provider_name,
                    error = %source,
                    "Stored session is unreadable"
                );
                AuthError::SessionUnmarshal {
                    provider: provider_name.to_string(),
                    source,
                }
            })?;

        session.authorize(request.params()).await.map_err(|source| {
            tracing::error!(
                provider = %provider_name,
                error = %source,
                "Provider authorization failed"
            );
            AuthError::ProviderAuthorize {
                provider: provider_name.to_string(),
                source,
            }
        })?;

        let user = provider.fetch_user(&session).await.map_err(|source| {
            tracing::error!(provider = %provider_name, error = %source, "Fetching user failed");
            AuthError::ProviderFetch {
                provider: provider_name.to_string(),
                source,
            }
        })?;

        tracing::info!(provider = %provider_name, "Completed login");
        Ok(user)
    }

    fn verify_state(
        &self,
        provider_name: &str,
        stored: &str,
        returned: Option<&str>,
    ) -> Result<()> {
        let mismatch = || {
            tracing::warn!(provider = %provider_name, "State mismatch on login callback");
            AuthError::StateMismatch {
                provider: provider_name.to_string(),
            }
        };

        // Even exempt providers must present a well-formed record.
        if stored.len() < self.state_len {
            return Err(mismatch());
        }
        if self.state_unsupported.contains(provider_name) {
            return Ok(());
        }
        if returned != Some(stored) {
            return Err(mismatch());
        }
        Ok(())
    }
}

fn log_take_failure(provider_name: &str, err: &AuthError) {
    match err.session_miss() {
        Some(miss) if err.is_security_issue() => {
            tracing::warn!(provider = %provider_name, cause = %miss, "Rejected login callback");
        }
        Some(miss) => {
            tracing::debug!(
                provider = %provider_name,
                cause = %miss,
                "No pending login for callback"
            );
        }
        None => {
            tracing::error!(provider = %provider_name, error = %err, "Pending-state store failed");
        }
    }
}

fn begin_failed(provider_name: &str, source: crate::error::ProviderError) -> AuthError {
    tracing::error!(provider = %provider_name, error = %source, "Provider failed to begin login");
    AuthError::ProviderBegin {
        provider: provider_name.to_string(),
        source,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec::KeyPair;
    use crate::config::SecretKeys;
    use crate::error::SessionMiss;
    use crate::mocks::{MockFailure, MockProvider, MOCK_AUTH_URL, MOCK_EMAIL};
    use crate::response::ResponseCookies;

    fn config() -> HandoffConfig {
        HandoffConfig::new(SecretKeys::new(KeyPair::new(vec![5u8; 64])))
    }

    fn handoff(provider: MockProvider) -> Handoff<CookieStateStore> {
        Handoff::with_cookie_store(ProviderRegistry::new().with_provider(provider), &config())
            .unwrap()
    }

    async fn begin(handoff: &Handoff<CookieStateStore>, name: &str) -> (String, String) {
        let mut cookies = ResponseCookies::new();
        let url = handoff
            .get_auth_url(name, &AuthRequest::default(), &mut cookies)
            .await
            .unwrap();
        (url, cookies.get("_handoff").unwrap().value().to_string())
    }

    fn callback(cookie: &str, state: &str) -> AuthRequest {
        AuthRequest::default()
            .with_cookie("_handoff", cookie)
            .with_query(&format!("state={state}&code=abc"))
    }

    #[tokio::test]
    async fn full_login_returns_the_user() {
        let provider = MockProvider::new();
        let handoff = handoff(provider.clone());

        let (url, cookie) = begin(&handoff, "mock").await;
        assert_eq!(url, MOCK_AUTH_URL);
        let state = provider.last_state().unwrap();
        assert_eq!(state.len(), 16);

        let mut cookies = ResponseCookies::new();
        let user = handoff
            .complete_user_auth("mock", &callback(&cookie, &state), &mut cookies)
            .await
            .unwrap();

        assert_eq!(user.email, MOCK_EMAIL);
        assert_eq!(cookies.get("_handoff").map(|c| c.value()), Some(""));
    }

    #[tokio::test]
    async fn begin_auth_redirects_with_307() {
        let handoff = handoff(MockProvider::new());
        let redirect = handoff
            .begin_auth("mock", &AuthRequest::default(), &mut ResponseCookies::new())
            .await
            .unwrap();
        assert_eq!(redirect, Redirect::temporary(MOCK_AUTH_URL));
        assert_eq!(redirect.status, StatusCode::TEMPORARY_REDIRECT);
    }

    #[tokio::test]
    async fn unknown_provider_writes_no_cookie() {
        let handoff = handoff(MockProvider::new());
        let mut cookies = ResponseCookies::new();
        let err = handoff
            .get_auth_url("github", &AuthRequest::default(), &mut cookies)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::UnknownProvider { .. }));
        assert!(cookies.is_empty());
    }

    #[tokio::test]
    async fn begin_failures_write_no_cookie() {
        for phase in [MockFailure::Begin, MockFailure::AuthUrl] {
            let handoff = handoff(MockProvider::new().failing_at(phase));
            let mut cookies = ResponseCookies::new();
            let err = handoff
                .get_auth_url("mock", &AuthRequest::default(), &mut cookies)
                .await
                .unwrap_err();

            assert!(matches!(err, AuthError::ProviderBegin { .. }), "{phase:?}");
            assert!(cookies.is_empty());
        }
    }

    #[tokio::test]
    async fn wrong_state_stops_before_provider_calls() {
        let provider = MockProvider::new();
        let handoff = handoff(provider.clone());
        let (_, cookie) = begin(&handoff, "mock").await;

        let request = callback(&cookie, "AAAAAAAAAAAAAAAA");
        let err = handoff
            .complete_user_auth("mock", &request, &mut ResponseCookies::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::StateMismatch { .. }));
        assert_eq!(provider.authorize_calls(), 0);
        assert_eq!(provider.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn state_prefix_is_a_mismatch() {
        let provider = MockProvider::new();
        let handoff = handoff(provider.clone());
        let (_, cookie) = begin(&handoff, "mock").await;
        let state = provider.last_state().unwrap();

        let request = callback(&cookie, &state[..8]);
        let err = handoff
            .complete_user_auth("mock", &request, &mut ResponseCookies::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch { .. }));
    }

    #[tokio::test]
    async fn exempt_provider_skips_state_check() {
        let provider = MockProvider::named("twitter");
        let handoff = handoff(provider.clone());
        let (_, cookie) = begin(&handoff, "twitter").await;

        let request = AuthRequest::default()
            .with_cookie("_handoff", &cookie)
            .with_query("oauth_token=t&oauth_verifier=v");
        let user = handoff
            .complete_user_auth("twitter", &request, &mut ResponseCookies::new())
            .await
            .unwrap();
        assert_eq!(user.provider, "twitter");
    }

    #[tokio::test]
    async fn callback_to_unknown_provider_burns_the_cookie() {
        let provider = MockProvider::new();
        let handoff = handoff(provider.clone());
        let (_, cookie) = begin(&handoff, "mock").await;
        let request = callback(&cookie, &provider.last_state().unwrap());

        let mut cookies = ResponseCookies::new();
        let err = handoff
            .complete_user_auth("github", &request, &mut cookies)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownProvider { .. }));
        assert_eq!(cookies.get("_handoff").map(|c| c.value()), Some(""));

        let err = handoff
            .complete_user_auth("mock", &request, &mut ResponseCookies::new())
            .await
            .unwrap_err();
        assert_eq!(err.session_miss(), Some(&SessionMiss::Replayed));
        assert_eq!(provider.authorize_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_provider_without_cookie_writes_nothing() {
        let handoff = handoff(MockProvider::new());
        let mut cookies = ResponseCookies::new();
        let err = handoff
            .complete_user_auth("github", &AuthRequest::default(), &mut cookies)
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::UnknownProvider { .. }));
        assert!(cookies.is_empty());
    }

    #[tokio::test]
    async fn missing_cookie_is_no_matching_session() {
        let handoff = handoff(MockProvider::new());
        let err = handoff
            .complete_user_auth("mock", &AuthRequest::default(), &mut ResponseCookies::new())
            .await
            .unwrap_err();

        assert_eq!(err.session_miss(), Some(&SessionMiss::CookieAbsent));
        assert_eq!(err.to_string(), crate::error::NO_MATCHING_SESSION);
    }

    #[tokio::test]
    async fn provider_failures_map_to_their_phase() {
        for phase in [MockFailure::Authorize, MockFailure::Fetch] {
            let provider = MockProvider::new().failing_at(phase);
            let handoff = handoff(provider.clone());
            let (_, cookie) = begin(&handoff, "mock").await;
            let state = provider.last_state().unwrap();

            let request = callback(&cookie, &state);
            let err = handoff
                .complete_user_auth("mock", &request, &mut ResponseCookies::new())
                .await
                .unwrap_err();

            match phase {
                MockFailure::Authorize => {
                    assert!(matches!(err, AuthError::ProviderAuthorize { .. }), "{err}");
                }
                _ => assert!(matches!(err, AuthError::ProviderFetch { .. }), "{err}"),
            }
        }
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let err = Handoff::with_cookie_store(ProviderRegistry::new(), &config().with_state_len(10))
            .unwrap_err();
        assert!(matches!(err, AuthError::Configuration(_)));
    }
}
