//! Error types for the login handoff.
//!
//! Three layers of error live here:
//!
//! - [`CodecError`]: why the secure codec refused a token. Internal only.
//! - [`SessionMiss`]: why no pending record could be taken for a request.
//!   Internal only; every variant surfaces to clients as the same
//!   [`AuthError::NoMatchingSession`].
//! - [`AuthError`]: the terminal outcome of a begin or complete attempt.

use thiserror::Error;

/// Result type alias for handoff operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Opaque error returned by provider and session implementations.
///
/// Carried unchanged inside the provider-phase variants of [`AuthError`].
pub type ProviderError = anyhow::Error;

/// Message shared by every flavour of [`AuthError::NoMatchingSession`].
pub const NO_MATCHING_SESSION: &str = "could not find a matching session for this request";

/// Failure modes of the secure codec.
///
/// Decoding fails closed: any of these means the token carried no usable
/// plaintext at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The authentication tag did not verify under any configured key.
    #[error("token authentication failed")]
    MacMismatch,

    /// The token is not structurally a codec token.
    #[error("token is malformed")]
    Malformed,

    /// The token is older than the configured maximum age.
    #[error("token has expired")]
    Expired,

    /// The token claims a creation time in the future.
    #[error("token timestamp is in the future")]
    TimestampInFuture,

    /// The token exceeds the configured maximum length.
    #[error("token exceeds {max} bytes")]
    TooLong {
        /// Configured maximum length in bytes
        max: usize,
    },

    /// Authenticated decryption failed.
    #[error("token decryption failed")]
    Decryption,

    /// Encryption failed while issuing a token.
    #[error("token encryption failed")]
    Encryption,

    /// No key pair is configured.
    #[error("no codec keys configured")]
    NoKeys,

    /// A configured key has an unusable length.
    #[error("invalid codec key: {0}")]
    InvalidKey(String),
}

impl CodecError {
    /// Returns `true` if the failure points at a forged or altered token
    /// rather than a stale or truncated one.
    #[must_use]
    pub const fn is_tampering(&self) -> bool {
        matches!(self, Self::MacMismatch | Self::Decryption)
    }
}

/// Why a pending record could not be taken for a request.
///
/// Operators see this in logs and through [`AuthError::session_miss`];
/// clients only ever see [`NO_MATCHING_SESSION`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionMiss {
    /// The request carried no transport cookie.
    #[error("transport cookie absent")]
    CookieAbsent,

    /// The transport cookie was present with an empty value.
    #[error("transport cookie empty")]
    CookieEmpty,

    /// The transport cookie was rejected by the codec.
    #[error("transport cookie rejected: {0}")]
    Codec(#[from] CodecError),

    /// The cookie decoded, but no server-side record exists for it.
    #[error("no pending record for session id")]
    RecordAbsent,

    /// The cookie was already consumed by an earlier completion.
    #[error("transport cookie already consumed")]
    Replayed,
}

/// Terminal outcome of a failed begin or complete attempt.
///
/// None of these are retried by the handoff itself. The only recovery path
/// is the caller starting over from `get_auth_url`.
#[derive(Debug, Error)]
pub enum AuthError {
    // ═══════════════════════════════════════════════════════════
    // Request Errors (400-class)
    // ═══════════════════════════════════════════════════════════

    /// No provider is registered under the requested name.
    #[error("no provider registered for {provider:?}")]
    UnknownProvider {
        /// Requested provider name
        provider: String,
    },

    /// The pending record is absent, expired, consumed or corrupt.
    #[error("{}", NO_MATCHING_SESSION)]
    NoMatchingSession {
        /// Internal cause, never shown to clients
        miss: SessionMiss,
    },

    /// The callback state does not match the pending record.
    #[error("state parameter does not match the pending authentication")]
    StateMismatch {
        /// Provider the callback was addressed to
        provider: String,
    },

    /// The stored serialized session could not be restored.
    #[error("could not restore the {provider} session: {source}")]
    SessionUnmarshal {
        /// Provider that rejected the data
        provider: String,
        /// Provider error
        source: ProviderError,
    },

    // ═══════════════════════════════════════════════════════════
    // Upstream Errors (502-class)
    // ═══════════════════════════════════════════════════════════

    /// The provider failed to begin authentication or build its URL.
    #[error("{provider} failed to begin authentication: {source}")]
    ProviderBegin {
        /// Provider name
        provider: String,
        /// Provider error
        source: ProviderError,
    },

    /// The provider failed to authorize the callback.
    #[error("{provider} failed to authorize: {source}")]
    ProviderAuthorize {
        /// Provider name
        provider: String,
        /// Provider error
        source: ProviderError,
    },

    /// The provider failed to return a user profile.
    #[error("{provider} failed to fetch the user: {source}")]
    ProviderFetch {
        /// Provider name
        provider: String,
        /// Provider error
        source: ProviderError,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors (500-class)
    // ═══════════════════════════════════════════════════════════

    /// Configuration is unusable.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The server-held pending-state backend failed.
    #[error("pending-state storage failed: {0}")]
    Storage(String),
}

impl AuthError {
    /// Build a [`AuthError::NoMatchingSession`] from its internal cause.
    #[must_use]
    pub const fn no_session(miss: SessionMiss) -> Self {
        Self::NoMatchingSession { miss }
    }

    /// Internal cause of a [`AuthError::NoMatchingSession`], if this is one.
    #[must_use]
    pub const fn session_miss(&self) -> Option<&SessionMiss> {
        match self {
            Self::NoMatchingSession { miss } => Some(miss),
            _ => None,
        }
    }

    /// Provider the error is attributed to, when there is one.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::UnknownProvider { provider }
            | Self::StateMismatch { provider }
            | Self::SessionUnmarshal { provider, .. }
            | Self::ProviderBegin { provider, .. }
            | Self::ProviderAuthorize { provider, .. }
            | Self::ProviderFetch { provider, .. } => Some(provider),
            Self::NoMatchingSession { .. } | Self::Configuration(_) | Self::Storage(_) => None,
        }
    }

    /// Returns `true` if this error is caused by the inbound request.
    ///
    /// # Examples
    ///
    /// ```
    /// # use handoff_auth::{AuthError, SessionMiss};
    /// assert!(AuthError::no_session(SessionMiss::CookieAbsent).is_user_error());
    /// assert!(!AuthError::Storage("down".into()).is_user_error());
    /// ```
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownProvider { .. }
                | Self::NoMatchingSession { .. }
                | Self::StateMismatch { .. }
                | Self::SessionUnmarshal { .. }
        )
    }

    /// Returns `true` if this error came from the identity provider.
    #[must_use]
    pub const fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            Self::ProviderBegin { .. } | Self::ProviderAuthorize { .. } | Self::ProviderFetch { .. }
        )
    }

    /// Returns `true` if this error indicates a possible attack.
    ///
    /// # Examples
    ///
    /// ```
    /// # use handoff_auth::{AuthError, CodecError, SessionMiss};
    /// let forged = SessionMiss::Codec(CodecError::MacMismatch);
    /// assert!(AuthError::no_session(forged).is_security_issue());
    /// assert!(!AuthError::no_session(SessionMiss::CookieAbsent).is_security_issue());
    /// ```
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        match self {
            Self::StateMismatch { .. } => true,
            Self::NoMatchingSession { miss } => match miss {
                SessionMiss::Replayed => true,
                SessionMiss::Codec(codec) => codec.is_tampering(),
                _ => false,
            },
            _ => false,
        }
    }

    /// Message safe to show to the end user.
    ///
    /// Provider and storage details stay in logs.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::UnknownProvider { .. } => "unknown identity provider",
            Self::NoMatchingSession { .. } => NO_MATCHING_SESSION,
            Self::StateMismatch { .. } => "state parameter does not match",
            Self::SessionUnmarshal { .. } => "pending authentication is unreadable",
            Self::ProviderBegin { .. } => "identity provider could not start authentication",
            Self::ProviderAuthorize { .. } => "identity provider rejected the authorization",
            Self::ProviderFetch { .. } => "identity provider did not return the user",
            Self::Configuration(_) | Self::Storage(_) => "internal error",
        }
    }
}
