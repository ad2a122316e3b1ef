//! Inbound side of the HTTP boundary.
//!
//! The handoff never sees a framework request type. Adapters convert their
//! request into an [`AuthRequest`]: the headers (for cookies) and the parsed
//! query string (for the provider's callback parameters).

use cookie::Cookie;
use http::{header::COOKIE, HeaderMap, HeaderValue};

/// Query parameters of a callback request, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pairs: Vec<(String, String)>,
}

impl CallbackParams {
    /// Parse a raw query string (without the leading `?`).
    ///
    /// A query that is not valid `application/x-www-form-urlencoded` yields
    /// no parameters.
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let pairs = serde_urlencoded::from_str::<Vec<(String, String)>>(query).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Ignoring unparseable callback query");
            Vec::new()
        });
        Self { pairs }
    }

    /// Build from explicit pairs.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// First value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `key`.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over all pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns `true` if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// What the handoff needs to know about an inbound request.
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    headers: HeaderMap,
    params: CallbackParams,
}

impl AuthRequest {
    /// Create from headers and parsed query parameters.
    #[must_use]
    pub const fn new(headers: HeaderMap, params: CallbackParams) -> Self {
        Self { headers, params }
    }

    /// Create from the parts of an `http` request.
    #[must_use]
    pub fn from_parts(parts: &http::request::Parts) -> Self {
        Self {
            headers: parts.headers.clone(),
            params: CallbackParams::parse(parts.uri.query().unwrap_or_default()),
        }
    }

    /// Create from an `http` request, ignoring its body.
    #[must_use]
    pub fn from_request<B>(request: &http::Request<B>) -> Self {
        Self {
            headers: request.headers().clone(),
            params: CallbackParams::parse(request.uri().query().unwrap_or_default()),
        }
    }

    /// Replace the query parameters with those parsed from `query`.
    #[must_use]
    pub fn with_query(mut self, query: &str) -> Self {
        self.params = CallbackParams::parse(query);
        self
    }

    /// Append a `Cookie` header carrying `name=value`.
    ///
    /// Values that are not valid header text are dropped.
    #[must_use]
    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        match HeaderValue::from_str(&format!("{name}={value}")) {
            Ok(header) => {
                self.headers.append(COOKIE, header);
            }
            Err(_) => tracing::debug!(cookie = name, "Dropping cookie with invalid header value"),
        }
        self
    }

    /// Request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Callback query parameters.
    #[must_use]
    pub const fn params(&self) -> &CallbackParams {
        &self.params
    }

    /// The `state` query parameter returned by the provider.
    #[must_use]
    pub fn state_param(&self) -> Option<&str> {
        self.params.get("state")
    }

    /// Value of the first cookie named `name` across all `Cookie` headers.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(std::result::Result::ok)
            .find(|cookie| cookie.name() == name)
            .map(|cookie| cookie.value().to_string())
    }
}
