//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request's correlation id
//! - `HandoffRequest`: the request as the handoff sees it (headers + query)

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use handoff_auth::AuthRequest;
use uuid::Uuid;

use crate::middleware::CORRELATION_ID_HEADER;

/// Correlation ID for request tracing.
///
/// Taken from the correlation middleware when installed, otherwise from the
/// `X-Correlation-ID` header, otherwise freshly generated.
///
/// # Example
///
/// ```ignore
/// async fn handler(correlation_id: CorrelationId) -> String {
///     format!("Request ID: {}", correlation_id.0)
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Headers and callback query of the inbound request.
///
/// Never rejects: an unparseable query yields no parameters, which the
/// handoff then refuses on its own terms.
#[derive(Debug, Clone)]
pub struct HandoffRequest(pub AuthRequest);

#[async_trait]
impl<S> FromRequestParts<S> for HandoffRequest
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(AuthRequest::from_parts(parts)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn correlation_id_from_header() {
        let id = Uuid::new_v4();
        let (mut parts, ()) = Request::builder()
            .header(CORRELATION_ID_HEADER, id.to_string())
            .body(())
            .unwrap()
            .into_parts();

        let CorrelationId(extracted) = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(extracted, id);
    }

    #[tokio::test]
    async fn handoff_request_carries_query_and_cookies() {
        let (mut parts, ()) = Request::builder()
            .uri("/auth/mock/callback?state=abc&code=1")
            .header("cookie", "_handoff=token")
            .body(())
            .unwrap()
            .into_parts();

        let HandoffRequest(request) = HandoffRequest::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(request.state_param(), Some("abc"));
        assert_eq!(request.cookie("_handoff").as_deref(), Some("token"));
    }
}
