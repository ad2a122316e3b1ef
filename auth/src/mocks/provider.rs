//! Mock identity provider.
//!
//! Behaves like a stateless `OAuth2` provider without any network: the
//! session marshals to JSON, authorization always yields the same token,
//! and the user is fixed. Individual phases can be made to fail.

use crate::provider::{Provider, ProviderResult, ProviderSession};
use crate::request::CallbackParams;
use crate::user::UserProfile;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Default mock provider name.
pub const MOCK_PROVIDER: &str = "mock";
/// Default authorization URL.
pub const MOCK_AUTH_URL: &str = "http://example.com/auth/";
/// Access token issued on authorization.
pub const MOCK_ACCESS_TOKEN: &str = "mokken";
/// Email of the mock user.
pub const MOCK_EMAIL: &str = "mocker@example.com";
/// Name of the mock user.
pub const MOCK_NAME: &str = "mock'n'role";
/// Nickname of the mock user.
pub const MOCK_NICK_NAME: &str = "mocker";

/// Phase at which a [`MockProvider`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// `begin_auth` fails.
    Begin,
    /// The session cannot produce its URL.
    AuthUrl,
    /// `authorize` fails.
    Authorize,
    /// `fetch_user` fails.
    Fetch,
}

/// Mock provider.
///
/// Clones share call counters and the last state seen.
#[derive(Debug, Clone)]
pub struct MockProvider {
    name: String,
    auth_url: String,
    failure: Option<MockFailure>,
    last_state: Arc<Mutex<Option<String>>>,
    begin_calls: Arc<AtomicUsize>,
    authorize_calls: Arc<AtomicUsize>,
    fetch_calls: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Mock provider named `mock`.
    #[must_use]
    pub fn new() -> Self {
        Self::named(MOCK_PROVIDER)
    }

    /// Mock provider registered under `name`.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auth_url: MOCK_AUTH_URL.to_string(),
            failure: None,
            last_state: Arc::new(Mutex::new(None)),
            begin_calls: Arc::new(AtomicUsize::new(0)),
            authorize_calls: Arc::new(AtomicUsize::new(0)),
            fetch_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Issue sessions pointing at `url`.
    #[must_use]
    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = url.into();
        self
    }

    /// Fail at `phase`.
    #[must_use]
    pub const fn failing_at(mut self, phase: MockFailure) -> Self {
        self.failure = Some(phase);
        self
    }

    /// State passed to the most recent `begin_auth`.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn last_state(&self) -> Option<String> {
        self.last_state.lock().unwrap().clone()
    }

    /// Number of `begin_auth` calls.
    #[must_use]
    pub fn begin_calls(&self) -> usize {
        self.begin_calls.load(Ordering::SeqCst)
    }

    /// Number of `authorize` calls.
    #[must_use]
    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_user` calls.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn fails_at(&self, phase: MockFailure) -> bool {
        self.failure == Some(phase)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Mock session, marshaled as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockSession {
    /// Authorization URL.
    #[serde(rename = "AuthURL")]
    pub auth_url: String,

    /// Token set by `authorize`.
    #[serde(rename = "AccessToken", default)]
    pub access_token: String,

    #[serde(skip)]
    fail_auth_url: bool,
}

impl Provider for MockProvider {
    type Session = MockSession;

    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn begin_auth(&self, state: &str) -> ProviderResult<MockSession> {
        self.begin_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_state.lock().unwrap() = Some(state.to_string());

        if self.fails_at(MockFailure::Begin) {
            anyhow::bail!("mock provider refused to begin");
        }

        Ok(MockSession {
            auth_url: self.auth_url.clone(),
            access_token: String::new(),
            fail_auth_url: self.fails_at(MockFailure::AuthUrl),
        })
    }

    fn unmarshal_session(&self, data: &str) -> ProviderResult<MockSession> {
        Ok(serde_json::from_str(data)?)
    }

    async fn fetch_user(&self, session: &MockSession) -> ProviderResult<UserProfile> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if self.fails_at(MockFailure::Fetch) {
            anyhow::bail!("mock provider is unavailable");
        }
        if session.access_token.is_empty() {
            anyhow::bail!("cannot fetch user without an access token");
        }

        Ok(UserProfile {
            name: MOCK_NAME.to_string(),
            email: MOCK_EMAIL.to_string(),
            nick_name: MOCK_NICK_NAME.to_string(),
            access_token: session.access_token.clone(),
            ..UserProfile::for_provider(self.name.clone())
        })
    }
}

impl ProviderSession<MockProvider> for MockSession {
    fn auth_url(&self) -> ProviderResult<String> {
        if self.fail_auth_url {
            anyhow::bail!("mock session has no URL");
        }
        Ok(self.auth_url.clone())
    }

    #[allow(clippy::unwrap_used)] // Test mock: serializing two strings cannot fail
    fn marshal(&self) -> String {
        serde_json::to_string(self).unwrap()
    }

    async fn authorize(
        &mut self,
        provider: &MockProvider,
        _params: &CallbackParams,
    ) -> ProviderResult<String> {
        provider.authorize_calls.fetch_add(1, Ordering::SeqCst);

        if provider.fails_at(MockFailure::Authorize) {
            anyhow::bail!("mock provider rejected the code");
        }

        self.access_token = MOCK_ACCESS_TOKEN.to_string();
        Ok(self.access_token.clone())
    }
}
