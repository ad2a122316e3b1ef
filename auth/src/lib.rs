//! # Handoff Auth
//!
//! The session-transport core of a third-party login: it carries a state
//! token and a provider session across the redirect to the identity
//! provider and back, through a client that is not trusted.
//!
//! ## Features
//!
//! - **Tamper-evident**: pending state is sealed with HMAC-SHA256 and,
//!   optionally, AES-256-GCM ([`codec`])
//! - **Single use**: a pending record completes at most once ([`store`])
//! - **CSRF-safe**: the callback state must match before any provider call
//! - **Provider-agnostic**: protocols plug in through [`Provider`]
//! - **Key rotation**: tokens issued under a previous key stay valid
//!
//! ## Flow
//!
//! ```text
//! GET /auth/{provider}          → Handoff::get_auth_url → Set-Cookie + redirect
//! GET /auth/{provider}/callback → Handoff::complete_user_auth → UserProfile
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use handoff_auth::{AuthRequest, Handoff, HandoffConfig, ProviderRegistry};
//!
//! let config = HandoffConfig::from_env()?;
//! let registry = ProviderRegistry::new().with_provider(github);
//! let handoff = Handoff::with_cookie_store(registry, &config)?;
//!
//! // Begin
//! let mut headers = http::HeaderMap::new();
//! let url = handoff.get_auth_url("github", &request, &mut headers).await?;
//!
//! // Callback
//! let user = handoff.complete_user_auth("github", &callback, &mut headers).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod flow;
pub mod provider;
pub mod request;
pub mod response;
pub mod store;
pub mod token;
pub mod user;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use codec::{CodecChain, KeyPair, SecureCodec};
pub use config::{CookieOptions, HandoffConfig, SecretKeys};
pub use error::{AuthError, CodecError, ProviderError, Result, SessionMiss};
pub use flow::{Handoff, Redirect};
pub use provider::{Provider, ProviderHandle, ProviderRegistry, ProviderResult, ProviderSession};
pub use request::{AuthRequest, CallbackParams};
pub use response::{CookieSink, ResponseCookies};
pub use store::{CookieStateStore, PendingRecord, PendingStateStore, ServerStateStore};
pub use user::UserProfile;
