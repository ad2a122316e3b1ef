//! Axum integration for the login handoff.
//!
//! Mounts the two legs of a third-party login on an Axum router:
//!
//! ```text
//! GET /auth/{provider}           begin: Set-Cookie, 307 to the provider
//! GET /auth/{provider}/callback  complete: expire cookie, JSON profile
//! ```
//!
//! Handlers translate between Axum and the framework-free
//! [`handoff_auth::Handoff`]: the request becomes an
//! [`AuthRequest`](handoff_auth::AuthRequest), the response `HeaderMap` is
//! the cookie sink, and [`AuthError`](handoff_auth::AuthError) maps onto
//! [`AppError`].
//!
//! # Example
//!
//! ```ignore
//! use handoff_web::{auth_router, HandoffState};
//!
//! let handoff = Handoff::with_cookie_store(registry, &HandoffConfig::from_env()?)?;
//! let app = auth_router(HandoffState::new(handoff));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::AppError;
pub use extractors::{CorrelationId, HandoffRequest};
pub use middleware::{correlation_id_layer, CorrelationIdExt, CORRELATION_ID_HEADER};
pub use router::auth_router;
pub use state::HandoffState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
