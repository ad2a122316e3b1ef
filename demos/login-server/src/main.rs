//! Login server with a loopback identity provider.
//!
//! # Usage
//!
//! ```bash
//! HANDOFF_COOKIE_AUTH=base64:... cargo run --bin login-server
//! ```
//!
//! Then open `http://localhost:3000/auth/loopback` in a browser.
//!
//! # Environment
//!
//! - `HANDOFF_COOKIE_AUTH` / `HANDOFF_COOKIE_ENCRYPT` - codec keys (generated if absent)
//! - `HANDOFF_LISTEN` - bind address (default `127.0.0.1:3000`)
//! - `HANDOFF_BASE_URL` - public URL of this server (default `http://{HANDOFF_LISTEN}`)
//! - `HANDOFF_STORE` - `cookie` (default) or `server`
//! - `REDIS_URL` - with `--features redis` and `HANDOFF_STORE=server`, keep records in Redis
//! - `RUST_LOG` - log filter (default `info`)

mod loopback;

use handoff_auth::store::MemoryRecordBackend;
use handoff_auth::{Handoff, HandoffConfig, PendingStateStore, ProviderRegistry, ServerStateStore};
use handoff_web::{auth_router, HandoffState};
use loopback::LoopbackProvider;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LISTEN: &str = "127.0.0.1:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let listen = std::env::var("HANDOFF_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN.to_string());
    let base_url =
        std::env::var("HANDOFF_BASE_URL").unwrap_or_else(|_| format!("http://{listen}"));

    let config = HandoffConfig::from_env()?;
    let registry = ProviderRegistry::new().with_provider(LoopbackProvider::new(base_url.clone()));

    match std::env::var("HANDOFF_STORE").as_deref() {
        Ok("server") => {
            #[cfg(feature = "redis")]
            if let Ok(redis_url) = std::env::var("REDIS_URL") {
                info!("Using Redis pending-state store");
                let backend = handoff_auth::store::RedisRecordBackend::new(&redis_url).await?;
                let store = ServerStateStore::from_config(&config, backend)?;
                return serve(Handoff::new(registry, store, &config)?, &listen, &base_url).await;
            }

            info!("Using in-memory pending-state store");
            let backend = MemoryRecordBackend::new().with_capacity(config.max_pending);
            let store = ServerStateStore::from_config(&config, backend)?;
            serve(Handoff::new(registry, store, &config)?, &listen, &base_url).await
        }
        _ => {
            info!("Using cookie pending-state store");
            serve(Handoff::with_cookie_store(registry, &config)?, &listen, &base_url).await
        }
    }
}

async fn serve<S: PendingStateStore>(
    handoff: Handoff<S>,
    listen: &str,
    base_url: &str,
) -> anyhow::Result<()> {
    let app = auth_router(HandoffState::new(handoff)).merge(loopback::routes());

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(address = %listen, "Login server listening");
    info!("Start a login at {base_url}/auth/{}", loopback::LOOPBACK);

    axum::serve(listener, app).await?;
    Ok(())
}
