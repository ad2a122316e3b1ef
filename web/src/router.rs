//! Router for the login endpoints.

use crate::handlers::{begin_auth, complete_auth, health_check};
use crate::middleware::correlation_id_layer;
use crate::state::HandoffState;
use axum::{extract::Request, routing::get, Router};
use handoff_auth::PendingStateStore;
use tower_http::trace::TraceLayer;

/// Build the login router.
///
/// # Routes
///
/// - `GET /auth/:provider` - Begin a login
/// - `GET /auth/:provider/callback` - Complete a login
/// - `GET /health` - Liveness
///
/// # Example
///
/// ```ignore
/// let app = auth_router(HandoffState::new(handoff));
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
/// axum::serve(listener, app).await?;
/// ```
pub fn auth_router<S: PendingStateStore>(state: HandoffState<S>) -> Router {
    Router::new()
        .route("/auth/:provider", get(begin_auth::<S>))
        .route("/auth/:provider/callback", get(complete_auth::<S>))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            // Path only: callback queries carry the state and the code.
            tracing::debug_span!("request", method = %req.method(), path = %req.uri().path())
        }))
        .layer(correlation_id_layer())
        .with_state(state)
}
