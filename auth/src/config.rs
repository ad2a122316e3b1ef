//! Handoff configuration.
//!
//! Configuration is built once at process start and handed to the stores
//! and the orchestrator; nothing here is global or mutated afterwards.

use crate::codec::{KeyPair, DEFAULT_MAX_AGE_SECS, DEFAULT_MAX_LENGTH};
use crate::error::{AuthError, Result};
use crate::token::DEFAULT_STATE_LEN;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Duration;
use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use cookie::Cookie;
use std::collections::HashSet;

pub use cookie::SameSite;

/// Environment variable holding the current authentication key.
pub const ENV_AUTH_KEY: &str = "HANDOFF_COOKIE_AUTH";
/// Environment variable holding the current encryption key.
pub const ENV_ENCRYPT_KEY: &str = "HANDOFF_COOKIE_ENCRYPT";
/// Environment variable holding the previous authentication key.
pub const ENV_PREVIOUS_AUTH_KEY: &str = "HANDOFF_COOKIE_AUTH_PREVIOUS";
/// Environment variable holding the previous encryption key.
pub const ENV_PREVIOUS_ENCRYPT_KEY: &str = "HANDOFF_COOKIE_ENCRYPT_PREVIOUS";

/// Default transport cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "_handoff";

/// Default lifetime of a pending login: 15 minutes.
pub const DEFAULT_PENDING_TTL_SECS: i64 = 15 * 60;

/// Default cap on pending logins (or consumed cookies) held in memory.
pub const DEFAULT_MAX_PENDING: usize = 100_000;

/// Providers whose protocols cannot echo a state parameter.
pub const DEFAULT_STATE_UNSUPPORTED: [&str; 2] = ["twitter", "lastfm"];

/// Codec key material, newest pair first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKeys {
    pairs: Vec<KeyPair>,
}

impl SecretKeys {
    /// Keys with a single current pair.
    #[must_use]
    pub fn new(current: KeyPair) -> Self {
        Self {
            pairs: vec![current],
        }
    }

    /// Randomly generated authentication key, no encryption.
    ///
    /// Pending logins do not survive a restart under generated keys.
    #[must_use]
    pub fn generated() -> Self {
        Self::new(KeyPair::generate())
    }

    /// Accept tokens issued under an older pair.
    #[must_use]
    pub fn with_previous(mut self, previous: KeyPair) -> Self {
        self.pairs.push(previous);
        self
    }

    /// All pairs, newest first.
    #[must_use]
    pub fn pairs(&self) -> &[KeyPair] {
        &self.pairs
    }

    /// Load keys from the process environment.
    ///
    /// See [`SecretKeys::from_lookup`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if a `base64:` value does not
    /// decode or an encryption key is set without its authentication key.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load keys through `lookup`.
    ///
    /// Reads [`ENV_AUTH_KEY`], [`ENV_ENCRYPT_KEY`], [`ENV_PREVIOUS_AUTH_KEY`]
    /// and [`ENV_PREVIOUS_ENCRYPT_KEY`]. Values are raw bytes unless prefixed
    /// with `base64:`. Without an authentication key a random one is
    /// generated.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if a `base64:` value does not
    /// decode or an encryption key is set without its authentication key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| -> Result<Option<Vec<u8>>> {
            lookup(name)
                .filter(|value| !value.is_empty())
                .map(|value| decode_key(name, &value))
                .transpose()
        };

        let current = match (read(ENV_AUTH_KEY)?, read(ENV_ENCRYPT_KEY)?) {
            (Some(hash), block) => pair(hash, block),
            (None, Some(_)) => {
                return Err(AuthError::Configuration(format!(
                    "{ENV_ENCRYPT_KEY} is set without {ENV_AUTH_KEY}"
                )));
            }
            (None, None) => {
                tracing::warn!(
                    "{ENV_AUTH_KEY} not set; generated a random key, \
                     pending logins will not survive a restart"
                );
                KeyPair::generate()
            }
        };

        let mut keys = Self::new(current);
        match (read(ENV_PREVIOUS_AUTH_KEY)?, read(ENV_PREVIOUS_ENCRYPT_KEY)?) {
            (Some(hash), block) => keys = keys.with_previous(pair(hash, block)),
            (None, Some(_)) => {
                return Err(AuthError::Configuration(format!(
                    "{ENV_PREVIOUS_ENCRYPT_KEY} is set without {ENV_PREVIOUS_AUTH_KEY}"
                )));
            }
            (None, None) => {}
        }

        Ok(keys)
    }
}

fn pair(hash: Vec<u8>, block: Option<Vec<u8>>) -> KeyPair {
    match block {
        Some(block) => KeyPair::new(hash).with_block_key(block),
        None => KeyPair::new(hash),
    }
}

fn decode_key(name: &str, value: &str) -> Result<Vec<u8>> {
    match value.strip_prefix("base64:") {
        Some(encoded) => STANDARD
            .decode(encoded.trim())
            .map_err(|e| AuthError::Configuration(format!("{name} is not valid base64: {e}"))),
        None => Ok(value.as_bytes().to_vec()),
    }
}

/// Attributes of the transport cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    /// Cookie name.
    pub name: String,

    /// Cookie path.
    ///
    /// Default: `/`
    pub path: String,

    /// Cookie domain. `None` leaves it host-only.
    pub domain: Option<String>,

    /// Lifetime in seconds.
    ///
    /// - `0`: session cookie, no `Max-Age` attribute
    /// - `> 0`: `Max-Age` and `Expires` set
    /// - `< 0`: delete now (`Max-Age=0`, `Expires` in 1970)
    pub max_age: i64,

    /// Send only over HTTPS.
    pub secure: bool,

    /// Hide from scripts.
    ///
    /// Default: `true`
    pub http_only: bool,

    /// `SameSite` policy. `Lax` is the strictest that survives the
    /// provider's top-level redirect back.
    ///
    /// Default: `Lax`
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    /// Options for a cookie called `name` with default attributes.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set the lifetime in seconds (see [`CookieOptions::max_age`]).
    #[must_use]
    pub const fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    /// Set the `Secure` flag.
    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the `HttpOnly` flag.
    #[must_use]
    pub const fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Set the `SameSite` policy.
    #[must_use]
    pub const fn with_same_site(mut self, same_site: Option<SameSite>) -> Self {
        self.same_site = same_site;
        self
    }

    /// Build the cookie carrying `value`.
    #[must_use]
    pub fn cookie(&self, value: String) -> Cookie<'static> {
        self.build(value, self.max_age)
    }

    /// Build the cookie that deletes this one on the client.
    #[must_use]
    pub fn expired(&self) -> Cookie<'static> {
        self.build(String::new(), -1)
    }

    fn build(&self, value: String, max_age: i64) -> Cookie<'static> {
        let mut builder = Cookie::build((self.name.clone(), value))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only);

        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(same_site) = self.same_site {
            builder = builder.same_site(same_site);
        }

        match max_age {
            0 => {}
            age if age < 0 => {
                builder = builder
                    .max_age(CookieDuration::ZERO)
                    .expires(OffsetDateTime::UNIX_EPOCH + CookieDuration::seconds(1));
            }
            age => {
                builder = builder
                    .max_age(CookieDuration::seconds(age))
                    .expires(OffsetDateTime::now_utc() + CookieDuration::seconds(age));
            }
        }

        builder.build()
    }
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            path: "/".to_string(),
            domain: None,
            max_age: 0,
            secure: false,
            http_only: true,
            same_site: Some(SameSite::Lax),
        }
    }
}

/// Complete handoff configuration.
#[derive(Debug, Clone)]
pub struct HandoffConfig {
    /// Codec key material.
    pub keys: SecretKeys,

    /// Transport cookie attributes.
    pub cookie: CookieOptions,

    /// Providers exempt from state matching. The pending record must
    /// still exist for them.
    pub state_unsupported: HashSet<String>,

    /// Encoded state token length in characters.
    ///
    /// Default: 16 (12 random bytes)
    pub state_len: usize,

    /// Upper bound on the age of any codec token.
    ///
    /// Default: 30 days
    pub token_max_age: Duration,

    /// How long a begun login may wait for its callback.
    ///
    /// Bounds the transport cookie's token age, server-held record TTL and
    /// replay-ledger retention. Capped by `token_max_age`.
    ///
    /// Default: 15 minutes
    pub pending_ttl: Duration,

    /// Maximum entries in the in-memory record backend and the replay
    /// ledger. Further logins are refused until entries expire.
    ///
    /// Default: 100 000
    pub max_pending: usize,

    /// Maximum encoded token length in bytes.
    ///
    /// Default: 4096
    pub token_max_length: usize,
}

impl HandoffConfig {
    /// Configuration with the given keys and default everything else.
    #[must_use]
    pub fn new(keys: SecretKeys) -> Self {
        Self {
            keys,
            cookie: CookieOptions::default(),
            state_unsupported: DEFAULT_STATE_UNSUPPORTED
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
            state_len: DEFAULT_STATE_LEN,
            token_max_age: Duration::seconds(DEFAULT_MAX_AGE_SECS),
            pending_ttl: Duration::seconds(DEFAULT_PENDING_TTL_SECS),
            max_pending: DEFAULT_MAX_PENDING,
            token_max_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// Configuration with keys from the process environment.
    ///
    /// # Errors
    ///
    /// See [`SecretKeys::from_env`].
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(SecretKeys::from_env()?))
    }

    /// Set the cookie attributes.
    #[must_use]
    pub fn with_cookie(mut self, cookie: CookieOptions) -> Self {
        self.cookie = cookie;
        self
    }

    /// Replace the state-unsupported provider set.
    #[must_use]
    pub fn with_state_unsupported<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state_unsupported = providers.into_iter().map(Into::into).collect();
        self
    }

    /// Add one provider to the state-unsupported set.
    #[must_use]
    pub fn exempt_from_state_check(mut self, provider: impl Into<String>) -> Self {
        self.state_unsupported.insert(provider.into());
        self
    }

    /// Set the encoded state length.
    #[must_use]
    pub const fn with_state_len(mut self, state_len: usize) -> Self {
        self.state_len = state_len;
        self
    }

    /// Set the token maximum age.
    #[must_use]
    pub const fn with_token_max_age(mut self, max_age: Duration) -> Self {
        self.token_max_age = max_age;
        self
    }

    /// Set the pending-login lifetime.
    #[must_use]
    pub const fn with_pending_ttl(mut self, ttl: Duration) -> Self {
        self.pending_ttl = ttl;
        self
    }

    /// Set the in-memory entry cap.
    #[must_use]
    pub const fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    /// Effective lifetime of a pending login: the shorter of `pending_ttl`
    /// and `token_max_age`.
    #[must_use]
    pub fn pending_lifetime(&self) -> Duration {
        self.pending_ttl.min(self.token_max_age)
    }

    /// Set the token maximum length.
    #[must_use]
    pub const fn with_token_max_length(mut self, max_length: usize) -> Self {
        self.token_max_length = max_length;
        self
    }

    /// Whether `provider` skips state matching.
    #[must_use]
    pub fn is_state_unsupported(&self, provider: &str) -> bool {
        self.state_unsupported.contains(provider)
    }

    /// Check invariants the stores rely on.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the state length is not a
    /// positive multiple of 4, a lifetime or the entry cap is not positive,
    /// or the cookie name is empty.
    pub fn validate(&self) -> Result<()> {
        if self.state_len == 0 || self.state_len % 4 != 0 {
            return Err(AuthError::Configuration(format!(
                "state length must be a positive multiple of 4, got {}",
                self.state_len
            )));
        }
        if self.token_max_age <= Duration::zero() {
            return Err(AuthError::Configuration(
                "token max age must be positive".to_string(),
            ));
        }
        if self.pending_ttl <= Duration::zero() {
            return Err(AuthError::Configuration(
                "pending ttl must be positive".to_string(),
            ));
        }
        if self.max_pending == 0 {
            return Err(AuthError::Configuration(
                "max pending must be positive".to_string(),
            ));
        }
        if self.cookie.name.is_empty() {
            return Err(AuthError::Configuration(
                "cookie name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self::new(SecretKeys::generated())
    }
}
