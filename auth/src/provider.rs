//! Identity provider capabilities and the provider registry.
//!
//! The concrete OAuth/OAuth2 protocols live outside this crate. They plug in
//! by implementing two traits:
//!
//! - [`Provider`]: begins authentication, restores sessions, fetches users.
//! - [`ProviderSession`]: the in-flight protocol state of one attempt
//!   (request token, verifier, nothing at all for stateless flows).
//!
//! The [`ProviderRegistry`] maps names to type-erased [`ProviderHandle`]s so
//! one orchestrator can drive providers with different session types.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = ProviderRegistry::new()
//!     .with_provider(GitHub::new(client_id, secret, callback_url))
//!     .with_provider(Twitter::new(key, secret, callback_url));
//!
//! let provider = registry.resolve("github")?;
//! ```

use crate::error::{AuthError, ProviderError, Result};
use crate::request::CallbackParams;
use crate::user::UserProfile;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Result type for provider implementations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// An identity provider integration.
pub trait Provider: Send + Sync + 'static {
    /// In-flight protocol state for this provider.
    type Session: ProviderSession<Self>;

    /// Registry name (the `{provider}` path segment).
    fn name(&self) -> &str;

    /// Start an authentication attempt bound to `state`.
    ///
    /// `OAuth` 1.0a providers obtain their request token here, so this may
    /// perform network I/O.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the attempt cannot be started.
    fn begin_auth(
        &self,
        state: &str,
    ) -> impl Future<Output = ProviderResult<Self::Session>> + Send;

    /// Restore a session from [`ProviderSession::marshal`] output.
    ///
    /// # Errors
    ///
    /// Returns a provider error if `data` is malformed.
    fn unmarshal_session(&self, data: &str) -> ProviderResult<Self::Session>;

    /// Fetch the profile of the user the authorized `session` belongs to.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the request fails or the response is
    /// malformed.
    fn fetch_user(
        &self,
        session: &Self::Session,
    ) -> impl Future<Output = ProviderResult<UserProfile>> + Send;
}

/// In-flight protocol state of one authentication attempt.
///
/// `P` is the provider the session belongs to.
pub trait ProviderSession<P: ?Sized>: Send + Sync + 'static {
    /// URL to send the user to.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the URL cannot be built.
    fn auth_url(&self) -> ProviderResult<String>;

    /// Serialize for transport across the redirect.
    fn marshal(&self) -> String;

    /// Complete authorization with the callback parameters, returning the
    /// access token. This is where the provider's token exchange happens.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the exchange fails.
    fn authorize(
        &mut self,
        provider: &P,
        params: &CallbackParams,
    ) -> impl Future<Output = ProviderResult<String>> + Send;
}

// ═══════════════════════════════════════════════════════════════════════
// Type erasure
// ═══════════════════════════════════════════════════════════════════════

trait ErasedProvider: Send + Sync {
    fn name(&self) -> &str;

    fn begin_auth<'a>(&'a self, state: &'a str) -> BoxFuture<'a, ProviderResult<SessionHandle>>;

    fn unmarshal_session(&self, data: &str) -> ProviderResult<SessionHandle>;
}

trait ErasedSession: Send + Sync {
    fn provider_name(&self) -> &str;

    fn auth_url(&self) -> ProviderResult<String>;

    fn marshal(&self) -> String;

    fn authorize<'a>(
        &'a mut self,
        params: &'a CallbackParams,
    ) -> BoxFuture<'a, ProviderResult<String>>;

    fn fetch_user(&self) -> BoxFuture<'_, ProviderResult<UserProfile>>;
}

struct Typed<P>(Arc<P>);

struct TypedSession<P: Provider> {
    provider: Arc<P>,
    session: P::Session,
}

impl<P: Provider> ErasedProvider for Typed<P> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn begin_auth<'a>(&'a self, state: &'a str) -> BoxFuture<'a, ProviderResult<SessionHandle>> {
        async move {
            let session = self.0.begin_auth(state).await?;
            Ok(SessionHandle::wrap(Arc::clone(&self.0), session))
        }
        .boxed()
    }

    fn unmarshal_session(&self, data: &str) -> ProviderResult<SessionHandle> {
        let session = self.0.unmarshal_session(data)?;
        Ok(SessionHandle::wrap(Arc::clone(&self.0), session))
    }
}

impl<P: Provider> ErasedSession for TypedSession<P> {
    fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn auth_url(&self) -> ProviderResult<String> {
        self.session.auth_url()
    }

    fn marshal(&self) -> String {
        self.session.marshal()
    }

    fn authorize<'a>(
        &'a mut self,
        params: &'a CallbackParams,
    ) -> BoxFuture<'a, ProviderResult<String>> {
        let Self { provider, session } = self;
        session.authorize(&**provider, params).boxed()
    }

    fn fetch_user(&self) -> BoxFuture<'_, ProviderResult<UserProfile>> {
        self.provider.fetch_user(&self.session).boxed()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Public handles
// ═══════════════════════════════════════════════════════════════════════

/// A registered provider of any concrete type.
#[derive(Clone)]
pub struct ProviderHandle {
    inner: Arc<dyn ErasedProvider>,
}

impl ProviderHandle {
    /// Wrap a concrete provider.
    #[must_use]
    pub fn new<P: Provider>(provider: P) -> Self {
        Self::from_arc(Arc::new(provider))
    }

    /// Wrap a shared concrete provider.
    #[must_use]
    pub fn from_arc<P: Provider>(provider: Arc<P>) -> Self {
        Self {
            inner: Arc::new(Typed(provider)),
        }
    }

    /// Registry name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// See [`Provider::begin_auth`].
    ///
    /// # Errors
    ///
    /// Passes through the provider error.
    pub async fn begin_auth(&self, state: &str) -> ProviderResult<SessionHandle> {
        self.inner.begin_auth(state).await
    }

    /// See [`Provider::unmarshal_session`].
    ///
    /// # Errors
    ///
    /// Passes through the provider error.
    pub fn unmarshal_session(&self, data: &str) -> ProviderResult<SessionHandle> {
        self.inner.unmarshal_session(data)
    }

    /// See [`Provider::fetch_user`].
    ///
    /// # Errors
    ///
    /// Returns an error if `session` was created by a different provider,
    /// otherwise passes through the provider error.
    pub async fn fetch_user(&self, session: &SessionHandle) -> ProviderResult<UserProfile> {
        if session.provider_name() != self.name() {
            anyhow::bail!(
                "session belongs to {}, not {}",
                session.provider_name(),
                self.name()
            );
        }
        session.inner.fetch_user().await
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("name", &self.name())
            .finish()
    }
}

/// A provider session of any concrete type, bound to its provider.
pub struct SessionHandle {
    inner: Box<dyn ErasedSession>,
}

impl SessionHandle {
    fn wrap<P: Provider>(provider: Arc<P>, session: P::Session) -> Self {
        Self {
            inner: Box::new(TypedSession { provider, session }),
        }
    }

    /// Name of the provider that created this session.
    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    /// See [`ProviderSession::auth_url`].
    ///
    /// # Errors
    ///
    /// Passes through the provider error.
    pub fn auth_url(&self) -> ProviderResult<String> {
        self.inner.auth_url()
    }

    /// See [`ProviderSession::marshal`].
    #[must_use]
    pub fn marshal(&self) -> String {
        self.inner.marshal()
    }

    /// See [`ProviderSession::authorize`]. The session's own provider is
    /// passed to the implementation.
    ///
    /// # Errors
    ///
    /// Passes through the provider error.
    pub async fn authorize(&mut self, params: &CallbackParams) -> ProviderResult<String> {
        self.inner.authorize(params).await
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("provider", &self.provider_name())
            .finish_non_exhaustive()
    }
}

/// Name-to-provider mapping.
///
/// Constructed once and handed to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderHandle>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under its name, replacing any previous one.
    #[must_use]
    pub fn with_provider<P: Provider>(mut self, provider: P) -> Self {
        self.register(provider);
        self
    }

    /// Register `provider` under its name, replacing any previous one.
    pub fn register<P: Provider>(&mut self, provider: P) {
        self.insert(ProviderHandle::new(provider));
    }

    /// Register an already wrapped provider.
    pub fn insert(&mut self, handle: ProviderHandle) {
        let name = handle.name().to_string();
        if self.providers.insert(name.clone(), handle).is_some() {
            tracing::debug!(provider = %name, "Replaced registered provider");
        }
    }

    /// Look up a provider by name.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownProvider`] if `name` is not registered.
    pub fn resolve(&self, name: &str) -> Result<ProviderHandle> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::UnknownProvider {
                provider: name.to_string(),
            })
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns `true` if no provider is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{MockProvider, MOCK_AUTH_URL, MOCK_PROVIDER};

    #[test]
    fn unknown_provider_is_reported() {
        let registry = ProviderRegistry::new().with_provider(MockProvider::new());
        let err = registry.resolve("github").unwrap_err();
        assert!(matches!(err, AuthError::UnknownProvider { ref provider } if provider == "github"));
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let registry = ProviderRegistry::new()
            .with_provider(MockProvider::new())
            .with_provider(MockProvider::new().with_auth_url("http://other.example/"))
            .with_provider(MockProvider::named("second"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec![MOCK_PROVIDER, "second"]);
        assert!(registry.contains("second"));
    }

    #[tokio::test]
    async fn erased_handles_drive_the_typed_provider() {
        let registry = ProviderRegistry::new().with_provider(MockProvider::new());
        let provider = registry.resolve(MOCK_PROVIDER).unwrap();

        let session = provider.begin_auth("state").await.unwrap();
        assert_eq!(session.provider_name(), MOCK_PROVIDER);
        assert_eq!(session.auth_url().unwrap(), MOCK_AUTH_URL);

        let mut restored = provider.unmarshal_session(&session.marshal()).unwrap();
        let token = restored.authorize(&CallbackParams::default()).await.unwrap();
        assert_eq!(token, "mokken");

        let user = provider.fetch_user(&restored).await.unwrap();
        assert_eq!(user.provider, MOCK_PROVIDER);
    }

    #[tokio::test]
    async fn foreign_session_is_rejected() {
        let registry = ProviderRegistry::new()
            .with_provider(MockProvider::new())
            .with_provider(MockProvider::named("other"));

        let session = registry
            .resolve("other")
            .unwrap()
            .begin_auth("state")
            .await
            .unwrap();

        let mock = registry.resolve(MOCK_PROVIDER).unwrap();
        assert!(mock.fetch_user(&session).await.is_err());
    }
}
