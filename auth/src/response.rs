//! Outbound side of the HTTP boundary.
//!
//! The handoff writes cookies through a [`CookieSink`]; adapters either hand
//! in the response `HeaderMap` directly or collect into [`ResponseCookies`].

use cookie::Cookie;
use http::{header::SET_COOKIE, HeaderMap, HeaderValue};

/// Capability to set cookies on the outgoing response.
pub trait CookieSink {
    /// Queue `cookie` as a `Set-Cookie` header.
    fn set_cookie(&mut self, cookie: Cookie<'static>);
}

impl CookieSink for HeaderMap {
    fn set_cookie(&mut self, cookie: Cookie<'static>) {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                self.append(SET_COOKIE, value);
            }
            Err(e) => {
                tracing::error!(
                    cookie = cookie.name(),
                    error = %e,
                    "Cookie is not a valid header value"
                );
            }
        }
    }
}

/// Cookies collected for a response.
#[derive(Debug, Clone, Default)]
pub struct ResponseCookies {
    cookies: Vec<Cookie<'static>>,
}

impl ResponseCookies {
    /// Create an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cookies: Vec::new(),
        }
    }

    /// Last cookie set under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Cookie<'static>> {
        self.cookies.iter().rev().find(|c| c.name() == name)
    }

    /// Iterate in the order the cookies were set.
    pub fn iter(&self) -> impl Iterator<Item = &Cookie<'static>> {
        self.cookies.iter()
    }

    /// Number of cookies set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Returns `true` if nothing was set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Write every cookie into `headers` as `Set-Cookie`.
    pub fn apply_to(&self, headers: &mut HeaderMap) {
        for cookie in &self.cookies {
            headers.set_cookie(cookie.clone());
        }
    }
}

impl CookieSink for ResponseCookies {
    fn set_cookie(&mut self, cookie: Cookie<'static>) {
        self.cookies.push(cookie);
    }
}
