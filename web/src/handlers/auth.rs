//! Login handlers.
//!
//! ```text
//! GET /auth/{provider}           → 307 to the provider + Set-Cookie
//! GET /auth/{provider}/callback  → 200 JSON profile, expiring Set-Cookie
//! ```
//!
//! Every response of the callback carries whatever cookies the handoff
//! wrote, including error and timeout responses, so the transport cookie
//! is always cleared once it has been presented.

use crate::error::AppError;
use crate::extractors::{CorrelationId, HandoffRequest};
use crate::state::HandoffState;
use axum::{
    extract::{Path, State},
    http::{header::LOCATION, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use handoff_auth::PendingStateStore;

/// Begin a login and redirect to the provider.
///
/// # Endpoint
///
/// ```text
/// GET /auth/{provider}
/// ```
pub async fn begin_auth<S: PendingStateStore>(
    State(state): State<HandoffState<S>>,
    Path(provider): Path<String>,
    correlation_id: CorrelationId,
    HandoffRequest(request): HandoffRequest,
) -> Response {
    let mut headers = HeaderMap::new();

    // A timeout while a server-held record is being written can leave that
    // record without a cookie pointing at it. It expires with the pending TTL.
    let outcome = tokio::time::timeout(
        state.timeout,
        state.handoff.begin_auth(&provider, &request, &mut headers),
    )
    .await;

    let redirect = match outcome {
        Ok(Ok(redirect)) => redirect,
        Ok(Err(e)) => return AppError::from(e).into_response(),
        Err(_) => {
            tracing::warn!(
                correlation_id = %correlation_id.0,
                provider = %provider,
                "Begin timed out"
            );
            return AppError::timeout("Login could not be started in time").into_response();
        }
    };

    let Ok(location) = HeaderValue::from_str(&redirect.location) else {
        tracing::error!(provider = %provider, "Provider returned an unusable redirect URL");
        return AppError::bad_gateway("identity provider could not start authentication")
            .into_response();
    };
    headers.insert(LOCATION, location);

    (redirect.status, headers).into_response()
}

/// Complete a login from the provider's callback.
///
/// # Endpoint
///
/// ```text
/// GET /auth/{provider}/callback?state=...&code=...
/// ```
///
/// # Response
///
/// The [`UserProfile`](handoff_auth::UserProfile) as JSON.
pub async fn complete_auth<S: PendingStateStore>(
    State(state): State<HandoffState<S>>,
    Path(provider): Path<String>,
    correlation_id: CorrelationId,
    HandoffRequest(request): HandoffRequest,
) -> Response {
    let mut headers = HeaderMap::new();

    // Dropping the future on timeout cancels any provider call in flight.
    let outcome = tokio::time::timeout(
        state.timeout,
        state
            .handoff
            .complete_user_auth(&provider, &request, &mut headers),
    )
    .await;

    match outcome {
        Ok(Ok(user)) => (headers, Json(user)).into_response(),
        Ok(Err(e)) => {
            tracing::debug!(
                correlation_id = %correlation_id.0,
                provider = %provider,
                error = %e,
                "Login failed"
            );
            (headers, AppError::from(e)).into_response()
        }
        Err(_) => {
            tracing::warn!(
                correlation_id = %correlation_id.0,
                provider = %provider,
                "Callback timed out"
            );
            (headers, AppError::timeout("Login did not complete in time")).into_response()
        }
    }
}
