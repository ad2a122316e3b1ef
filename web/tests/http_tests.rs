//! End-to-end tests of the login endpoints through the Axum router.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use axum_test::TestServer;
use handoff_auth::mocks::{MockFailure, MockProvider, MOCK_AUTH_URL, MOCK_EMAIL};
use handoff_auth::{
    CallbackParams, Handoff, HandoffConfig, KeyPair, Provider, ProviderRegistry, ProviderResult,
    ProviderSession, SecretKeys, UserProfile,
};
use handoff_web::{auth_router, HandoffState, CORRELATION_ID_HEADER};
use serde_json::Value;
use std::time::Duration;

fn config() -> HandoffConfig {
    HandoffConfig::new(SecretKeys::new(
        KeyPair::new(vec![11u8; 64]).with_block_key(vec![12u8; 32]),
    ))
}

fn server_with(
    registry: ProviderRegistry,
    config: &HandoffConfig,
    timeout: Duration,
) -> TestServer {
    let handoff = Handoff::with_cookie_store(registry, config).unwrap();
    TestServer::new(auth_router(HandoffState::new(handoff).with_timeout(timeout))).unwrap()
}

fn server(provider: MockProvider) -> TestServer {
    server_with(
        ProviderRegistry::new().with_provider(provider),
        &config(),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn begin_redirects_and_sets_cookie() {
    let server = server(MockProvider::new());

    let response = server.get("/auth/mock").await;

    response.assert_status(StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.header("location"), MOCK_AUTH_URL);
    let cookie = response.cookie("_handoff");
    assert!(!cookie.value().is_empty());
    assert_eq!(cookie.http_only(), Some(true));
    assert_eq!(cookie.path(), Some("/"));
}

#[tokio::test]
async fn callback_returns_profile_and_clears_cookie() {
    let provider = MockProvider::new();
    let server = server(provider.clone());

    let cookie = server.get("/auth/mock").await.cookie("_handoff");
    let state = provider.last_state().unwrap();

    let response = server
        .get("/auth/mock/callback")
        .add_query_param("state", &state)
        .add_query_param("code", "abc")
        .add_cookie(cookie)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["email"], MOCK_EMAIL);
    assert_eq!(body["provider"], "mock");
    assert_eq!(response.cookie("_handoff").value(), "");
}

#[tokio::test]
async fn replayed_callback_is_rejected() {
    let provider = MockProvider::new();
    let server = server(provider.clone());

    let cookie = server.get("/auth/mock").await.cookie("_handoff");
    let state = provider.last_state().unwrap();

    server
        .get("/auth/mock/callback")
        .add_query_param("state", &state)
        .add_cookie(cookie.clone())
        .await
        .assert_status_ok();

    let replay = server
        .get("/auth/mock/callback")
        .add_query_param("state", &state)
        .add_cookie(cookie)
        .await;

    replay.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = replay.json();
    assert_eq!(body["code"], "NO_MATCHING_SESSION");
    assert_eq!(provider.fetch_calls(), 1);
}

#[tokio::test]
async fn state_mismatch_clears_cookie_without_calling_provider() {
    let provider = MockProvider::new();
    let server = server(provider.clone());

    let cookie = server.get("/auth/mock").await.cookie("_handoff");

    let response = server
        .get("/auth/mock/callback")
        .add_query_param("state", "AAAAAAAAAAAAAAAA")
        .add_cookie(cookie)
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "STATE_MISMATCH");
    assert_eq!(response.cookie("_handoff").value(), "");
    assert_eq!(provider.authorize_calls(), 0);
}

#[tokio::test]
async fn callback_without_cookie_is_generic() {
    let server = server(MockProvider::new());

    let response = server
        .get("/auth/mock/callback")
        .add_query_param("state", "x")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["message"], handoff_auth::error::NO_MATCHING_SESSION);
}

#[tokio::test]
async fn unknown_provider_is_bad_request() {
    let server = server(MockProvider::new());

    let response = server.get("/auth/nope").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "UNKNOWN_PROVIDER");
}

#[tokio::test]
async fn provider_failure_is_bad_gateway() {
    let provider = MockProvider::new().failing_at(MockFailure::Authorize);
    let server = server(provider.clone());

    let cookie = server.get("/auth/mock").await.cookie("_handoff");
    let state = provider.last_state().unwrap();

    let response = server
        .get("/auth/mock/callback")
        .add_query_param("state", &state)
        .add_cookie(cookie)
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(response.cookie("_handoff").value(), "");
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let server = server(MockProvider::new());

    let response = server.get("/health").await;

    response.assert_status_ok();
    response.assert_text("ok");
    assert!(!response.header(CORRELATION_ID_HEADER).is_empty());
}

/// Provider whose user endpoint never answers in time.
#[derive(Debug, Clone)]
struct SlowProvider;

#[derive(Debug)]
struct SlowSession;

impl Provider for SlowProvider {
    type Session = SlowSession;

    fn name(&self) -> &str {
        "slow"
    }

    async fn begin_auth(&self, _state: &str) -> ProviderResult<SlowSession> {
        Ok(SlowSession)
    }

    fn unmarshal_session(&self, _data: &str) -> ProviderResult<SlowSession> {
        Ok(SlowSession)
    }

    async fn fetch_user(&self, _session: &SlowSession) -> ProviderResult<UserProfile> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(UserProfile::for_provider("slow"))
    }
}

impl ProviderSession<SlowProvider> for SlowSession {
    fn auth_url(&self) -> ProviderResult<String> {
        Ok("http://slow.example/auth".to_string())
    }

    fn marshal(&self) -> String {
        String::new()
    }

    async fn authorize(
        &mut self,
        _provider: &SlowProvider,
        _params: &CallbackParams,
    ) -> ProviderResult<String> {
        Ok("token".to_string())
    }
}

#[tokio::test]
async fn slow_provider_times_out_and_cookie_is_still_cleared() {
    let server = server_with(
        ProviderRegistry::new().with_provider(SlowProvider),
        &config().exempt_from_state_check("slow"),
        Duration::from_millis(100),
    );

    let begin = server.get("/auth/slow").await;
    begin.assert_status(StatusCode::TEMPORARY_REDIRECT);
    let cookie = begin.cookie("_handoff");

    let response = server.get("/auth/slow/callback").add_cookie(cookie).await;

    response.assert_status(StatusCode::REQUEST_TIMEOUT);
    assert_eq!(response.cookie("_handoff").value(), "");
}
