//! An identity provider that lives inside the demo server.
//!
//! `GET /loopback/authorize` plays the provider's consent page: it sends
//! the browser straight back to the callback with a fixed code, echoing
//! the state. Everything else behaves like a small `OAuth2` provider.

use axum::{extract::Query, http::StatusCode, response::Redirect, routing::get, Router};
use handoff_auth::{CallbackParams, Provider, ProviderResult, ProviderSession, UserProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Registry name of the loopback provider.
pub const LOOPBACK: &str = "loopback";

const AUTHORIZATION_CODE: &str = "loopback-code";

/// The loopback provider.
#[derive(Debug, Clone)]
pub struct LoopbackProvider {
    base_url: String,
}

impl LoopbackProvider {
    /// Provider whose consent page is served under `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Loopback session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopbackSession {
    auth_url: String,
    #[serde(default)]
    access_token: Option<String>,
}

impl Provider for LoopbackProvider {
    type Session = LoopbackSession;

    fn name(&self) -> &str {
        LOOPBACK
    }

    async fn begin_auth(&self, state: &str) -> ProviderResult<LoopbackSession> {
        let query = serde_urlencoded::to_string([("state", state)])?;
        Ok(LoopbackSession {
            auth_url: format!("{}/loopback/authorize?{query}", self.base_url),
            access_token: None,
        })
    }

    fn unmarshal_session(&self, data: &str) -> ProviderResult<LoopbackSession> {
        Ok(serde_json::from_str(data)?)
    }

    async fn fetch_user(&self, session: &LoopbackSession) -> ProviderResult<UserProfile> {
        let Some(token) = &session.access_token else {
            anyhow::bail!("session is not authorized");
        };

        Ok(UserProfile {
            name: "Loopback User".to_string(),
            email: "user@loopback.test".to_string(),
            nick_name: "loopback".to_string(),
            user_id: "1".to_string(),
            access_token: token.clone(),
            ..UserProfile::for_provider(LOOPBACK)
        })
    }
}

impl ProviderSession<LoopbackProvider> for LoopbackSession {
    fn auth_url(&self) -> ProviderResult<String> {
        Ok(self.auth_url.clone())
    }

    fn marshal(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    async fn authorize(
        &mut self,
        _provider: &LoopbackProvider,
        params: &CallbackParams,
    ) -> ProviderResult<String> {
        match params.get("code") {
            Some(AUTHORIZATION_CODE) => {
                let token = format!("loopback-token-{}", params.len());
                self.access_token = Some(token.clone());
                Ok(token)
            }
            Some(_) => anyhow::bail!("unknown authorization code"),
            None => anyhow::bail!("callback carried no authorization code"),
        }
    }
}

/// Routes of the loopback consent page.
pub fn routes() -> Router {
    Router::new().route("/loopback/authorize", get(authorize))
}

#[allow(clippy::unused_async)]
async fn authorize(
    Query(query): Query<HashMap<String, String>>,
) -> Result<Redirect, StatusCode> {
    let state = query.get("state").map(String::as_str).unwrap_or_default();
    let callback = serde_urlencoded::to_string([("state", state), ("code", AUTHORIZATION_CODE)])
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(Redirect::to(&format!("/auth/{LOOPBACK}/callback?{callback}")))
}
