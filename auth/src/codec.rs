//! Secure codec for values that travel through an untrusted client.
//!
//! A token binds a value to a logical name and a creation time, optionally
//! encrypts it, and authenticates the whole with HMAC-SHA256:
//!
//! ```text
//! payload = nonce ‖ AES-256-GCM(value, aad = name)     (encryption key set)
//!         = value                                      (otherwise)
//! tag     = HMAC-SHA256(hash_key, "name|timestamp|b64(payload)")
//! token   = b64url("timestamp|b64(payload)|b64(tag)")
//! ```
//!
//! Decoding fails closed. A token either yields the exact plaintext it was
//! issued with, or a [`CodecError`].
//!
//! # Key rotation
//!
//! [`CodecChain`] holds one codec per key pair, newest first. Tokens are
//! issued with the first pair and accepted under any of them, so a rotated
//! key keeps in-flight logins valid until the old pair is removed.

use crate::clock::{Clock, SystemClock};
use crate::error::CodecError;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Duration;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Required encryption key length (AES-256).
pub const BLOCK_KEY_LEN: usize = 32;

/// Length of a generated authentication key.
pub const GENERATED_HASH_KEY_LEN: usize = 64;

/// Default token lifetime: 30 days.
pub const DEFAULT_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

/// Default upper bound on encoded token length (a browser cookie budget).
pub const DEFAULT_MAX_LENGTH: usize = 4096;

/// Tolerated forward clock drift between issuing and verifying nodes.
pub(crate) const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Generate `len` bytes of key material from the OS CSPRNG.
#[must_use]
pub fn generate_random_key(len: usize) -> Vec<u8> {
    let mut key = vec![0u8; len];
    OsRng.fill_bytes(&mut key);
    key
}

/// One authentication key and an optional encryption key.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    hash_key: Vec<u8>,
    block_key: Option<Vec<u8>>,
}

impl KeyPair {
    /// Create a pair with an authentication key only (sign, don't encrypt).
    #[must_use]
    pub fn new(hash_key: impl Into<Vec<u8>>) -> Self {
        Self {
            hash_key: hash_key.into(),
            block_key: None,
        }
    }

    /// Add an encryption key. Must be [`BLOCK_KEY_LEN`] bytes.
    #[must_use]
    pub fn with_block_key(mut self, block_key: impl Into<Vec<u8>>) -> Self {
        self.block_key = Some(block_key.into());
        self
    }

    /// Generate a random authentication key.
    ///
    /// Tokens issued under a generated key cannot be verified after the
    /// process restarts.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(generate_random_key(GENERATED_HASH_KEY_LEN))
    }

    /// Authentication key.
    #[must_use]
    pub fn hash_key(&self) -> &[u8] {
        &self.hash_key
    }

    /// Encryption key, if any.
    #[must_use]
    pub fn block_key(&self) -> Option<&[u8]> {
        self.block_key.as_deref()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("hash_key", &format_args!("[{} bytes]", self.hash_key.len()))
            .field(
                "block_key",
                &self.block_key.as_ref().map(|k| format!("[{} bytes]", k.len())),
            )
            .finish()
    }
}

/// Codec for a single key pair.
#[derive(Clone)]
pub struct SecureCodec {
    hash_key: Vec<u8>,
    cipher: Option<Aes256Gcm>,
    max_age: Option<Duration>,
    max_length: usize,
    clock: Arc<dyn Clock>,
}

impl SecureCodec {
    /// Create a codec for `keys` with the default age and length limits.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidKey`] if the authentication key is
    /// empty or the encryption key is not [`BLOCK_KEY_LEN`] bytes.
    pub fn new(keys: &KeyPair) -> Result<Self, CodecError> {
        if keys.hash_key.is_empty() {
            return Err(CodecError::InvalidKey(
                "authentication key must not be empty".to_string(),
            ));
        }

        let cipher = match keys.block_key() {
            Some(key) if key.len() != BLOCK_KEY_LEN => {
                return Err(CodecError::InvalidKey(format!(
                    "encryption key must be {BLOCK_KEY_LEN} bytes, got {}",
                    key.len()
                )));
            }
            Some(key) => Some(
                Aes256Gcm::new_from_slice(key)
                    .map_err(|e| CodecError::InvalidKey(e.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            hash_key: keys.hash_key.clone(),
            cipher,
            max_age: Some(Duration::seconds(DEFAULT_MAX_AGE_SECS)),
            max_length: DEFAULT_MAX_LENGTH,
            clock: Arc::new(SystemClock),
        })
    }

    /// Set the maximum token age. `None` disables expiry.
    #[must_use]
    pub const fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the maximum encoded token length.
    #[must_use]
    pub const fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Whether payloads are encrypted as well as authenticated.
    #[must_use]
    pub const fn is_encrypting(&self) -> bool {
        self.cipher.is_some()
    }

    /// Maximum token age, if expiry is enforced.
    #[must_use]
    pub const fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Encode `value` under the logical `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encryption`] if encryption fails and
    /// [`CodecError::TooLong`] if the token would exceed the length limit.
    pub fn encode(&self, name: &str, value: &str) -> Result<String, CodecError> {
        let payload = match &self.cipher {
            Some(cipher) => encrypt(cipher, name, value.as_bytes())?,
            None => value.as_bytes().to_vec(),
        };
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let timestamp = self.clock.now().timestamp().to_string();
        let tag = URL_SAFE_NO_PAD.encode(self.sign(name, &timestamp, &payload)?);

        let token = URL_SAFE_NO_PAD.encode(format!("{timestamp}|{payload}|{tag}"));
        if token.len() > self.max_length {
            return Err(CodecError::TooLong {
                max: self.max_length,
            });
        }

        Ok(token)
    }

    /// Decode a token issued for `name`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the token is oversized, malformed,
    /// fails authentication, is outside its validity window, or fails
    /// decryption. No plaintext is returned in any of these cases.
    pub fn decode(&self, name: &str, token: &str) -> Result<String, CodecError> {
        if token.len() > self.max_length {
            return Err(CodecError::TooLong {
                max: self.max_length,
            });
        }

        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CodecError::Malformed)?;
        let body = String::from_utf8(raw).map_err(|_| CodecError::Malformed)?;

        let mut parts = body.splitn(3, '|');
        let (Some(timestamp), Some(payload), Some(tag)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CodecError::Malformed);
        };

        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| CodecError::Malformed)?;
        let expected = self.sign(name, timestamp, payload)?;
        if !constant_time_eq::constant_time_eq(&expected, &tag) {
            return Err(CodecError::MacMismatch);
        }

        let issued_at: i64 = timestamp.parse().map_err(|_| CodecError::Malformed)?;
        self.check_age(issued_at)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| CodecError::Malformed)?;
        let plaintext = match &self.cipher {
            Some(cipher) => decrypt(cipher, name, &payload)?,
            None => payload,
        };

        String::from_utf8(plaintext).map_err(|_| CodecError::Malformed)
    }

    fn sign(&self, name: &str, timestamp: &str, payload: &str) -> Result<Vec<u8>, CodecError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.hash_key)
            .map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(timestamp.as_bytes());
        mac.update(b"|");
        mac.update(payload.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn check_age(&self, issued_at: i64) -> Result<(), CodecError> {
        let now = self.clock.now().timestamp();

        if issued_at > now.saturating_add(MAX_CLOCK_SKEW_SECS) {
            return Err(CodecError::TimestampInFuture);
        }

        if let Some(max_age) = self.max_age {
            if issued_at < now.saturating_sub(max_age.num_seconds()) {
                return Err(CodecError::Expired);
            }
        }

        Ok(())
    }
}

impl fmt::Debug for SecureCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureCodec")
            .field("encrypting", &self.is_encrypting())
            .field("max_age", &self.max_age)
            .field("max_length", &self.max_length)
            .finish_non_exhaustive()
    }
}

fn encrypt(cipher: &Aes256Gcm, name: &str, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: name.as_bytes(),
            },
        )
        .map_err(|_| CodecError::Encryption)?;

    // Format: [nonce (12 bytes)][ciphertext + tag]
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt(cipher: &Aes256Gcm, name: &str, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if data.len() < NONCE_LEN {
        return Err(CodecError::Malformed);
    }

    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: name.as_bytes(),
            },
        )
        .map_err(|_| CodecError::Decryption)
}

/// Ordered set of codecs supporting key rotation.
///
/// The first codec issues, every codec verifies.
#[derive(Debug, Clone)]
pub struct CodecChain {
    codecs: Vec<SecureCodec>,
}

impl CodecChain {
    /// Build a chain from codecs, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NoKeys`] if `codecs` is empty.
    pub fn new(codecs: Vec<SecureCodec>) -> Result<Self, CodecError> {
        if codecs.is_empty() {
            return Err(CodecError::NoKeys);
        }
        Ok(Self { codecs })
    }

    /// Build a chain from key pairs, newest first, with shared limits.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NoKeys`] for an empty slice and
    /// [`CodecError::InvalidKey`] for an unusable pair.
    pub fn from_pairs(
        pairs: &[KeyPair],
        max_age: Option<Duration>,
        max_length: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CodecError> {
        let codecs = pairs
            .iter()
            .map(|pair| {
                SecureCodec::new(pair).map(|codec| {
                    codec
                        .with_max_age(max_age)
                        .with_max_length(max_length)
                        .with_clock(Arc::clone(&clock))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(codecs)
    }

    /// Number of key pairs in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// Always `false`; a chain holds at least one codec.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Maximum token age of the issuing codec.
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.codecs.first().and_then(SecureCodec::max_age)
    }

    /// Encode with the newest key pair.
    ///
    /// # Errors
    ///
    /// See [`SecureCodec::encode`].
    pub fn encode(&self, name: &str, value: &str) -> Result<String, CodecError> {
        let codec = self.codecs.first().ok_or(CodecError::NoKeys)?;
        codec.encode(name, value)
    }

    /// Decode with the first key pair that accepts the token.
    ///
    /// When every pair rejects it, an authentication failure is reported
    /// only if no pair got past authentication; otherwise the more specific
    /// error (such as expiry under an older key) wins.
    ///
    /// # Errors
    ///
    /// See [`SecureCodec::decode`].
    pub fn decode(&self, name: &str, token: &str) -> Result<String, CodecError> {
        let mut failure = CodecError::NoKeys;

        for codec in &self.codecs {
            match codec.decode(name, token) {
                Ok(value) => return Ok(value),
                Err(CodecError::MacMismatch) if failure != CodecError::NoKeys => {}
                Err(err) => failure = err,
            }
        }

        Err(failure)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::MockClock;

    fn hash_key(seed: u8) -> Vec<u8> {
        vec![seed; 32]
    }

    fn signing_codec() -> SecureCodec {
        SecureCodec::new(&KeyPair::new(hash_key(1))).unwrap()
    }

    fn encrypting_codec() -> SecureCodec {
        SecureCodec::new(&KeyPair::new(hash_key(1)).with_block_key(vec![9u8; 32])).unwrap()
    }

    #[test]
    fn signed_token_round_trips() {
        let codec = signing_codec();
        let token = codec.encode("_handoff", "state{\"a\":1}").unwrap();
        assert_eq!(codec.decode("_handoff", &token).unwrap(), "state{\"a\":1}");
    }

    #[test]
    fn encrypted_token_hides_plaintext() {
        let codec = encrypting_codec();
        assert!(codec.is_encrypting());

        let token = codec.encode("_handoff", "super-secret-verifier").unwrap();
        let raw = String::from_utf8(URL_SAFE_NO_PAD.decode(&token).unwrap()).unwrap();
        assert!(!raw.contains("super-secret-verifier"));

        let signed_only = signing_codec().encode("_handoff", "super-secret-verifier").unwrap();
        let raw = String::from_utf8(URL_SAFE_NO_PAD.decode(&signed_only).unwrap()).unwrap();
        let payload = raw.split('|').nth(1).unwrap();
        assert_eq!(
            URL_SAFE_NO_PAD.decode(payload).unwrap(),
            b"super-secret-verifier"
        );

        assert_eq!(
            codec.decode("_handoff", &token).unwrap(),
            "super-secret-verifier"
        );
    }

    #[test]
    fn token_is_bound_to_its_name() {
        let codec = encrypting_codec();
        let token = codec.encode("_handoff", "value").unwrap();
        assert_eq!(
            codec.decode("other", &token),
            Err(CodecError::MacMismatch)
        );
    }

    #[test]
    fn wrong_key_is_rejected() {
        let token = signing_codec().encode("n", "value").unwrap();
        let other = SecureCodec::new(&KeyPair::new(hash_key(2))).unwrap();
        assert_eq!(other.decode("n", &token), Err(CodecError::MacMismatch));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = signing_codec();
        assert_eq!(codec.decode("n", "broken value"), Err(CodecError::Malformed));
        assert_eq!(codec.decode("n", ""), Err(CodecError::Malformed));
        let two_parts = URL_SAFE_NO_PAD.encode("123|abc");
        assert_eq!(codec.decode("n", &two_parts), Err(CodecError::Malformed));
    }

    #[test]
    fn expired_token_is_rejected() {
        let clock = MockClock::new();
        let codec = signing_codec()
            .with_max_age(Some(Duration::minutes(10)))
            .with_clock(Arc::new(clock.clone()));

        let token = codec.encode("n", "value").unwrap();
        clock.advance(Duration::minutes(9));
        assert_eq!(codec.decode("n", &token).unwrap(), "value");

        clock.advance(Duration::minutes(2));
        assert_eq!(codec.decode("n", &token), Err(CodecError::Expired));
    }

    #[test]
    fn expiry_can_be_disabled() {
        let clock = MockClock::new();
        let codec = signing_codec()
            .with_max_age(None)
            .with_clock(Arc::new(clock.clone()));

        let token = codec.encode("n", "value").unwrap();
        clock.advance(Duration::days(365));
        assert_eq!(codec.decode("n", &token).unwrap(), "value");
    }

    #[test]
    fn future_token_is_rejected() {
        let clock = MockClock::new();
        let codec = signing_codec().with_clock(Arc::new(clock.clone()));

        clock.advance(Duration::hours(1));
        let token = codec.encode("n", "value").unwrap();
        clock.advance(Duration::hours(-1));

        assert_eq!(codec.decode("n", &token), Err(CodecError::TimestampInFuture));
    }

    #[test]
    fn length_limit_applies_both_ways() {
        let codec = signing_codec().with_max_length(64);
        assert_eq!(
            codec.encode("n", &"x".repeat(100)),
            Err(CodecError::TooLong { max: 64 })
        );
        assert_eq!(
            codec.decode("n", &"A".repeat(65)),
            Err(CodecError::TooLong { max: 64 })
        );
    }

    #[test]
    fn invalid_keys_are_rejected() {
        assert!(matches!(
            SecureCodec::new(&KeyPair::new(Vec::new())),
            Err(CodecError::InvalidKey(_))
        ));
        assert!(matches!(
            SecureCodec::new(&KeyPair::new(hash_key(1)).with_block_key(vec![0u8; 16])),
            Err(CodecError::InvalidKey(_))
        ));
    }

    #[test]
    fn chain_issues_with_newest_and_accepts_previous() {
        let old = KeyPair::new(hash_key(1));
        let new = KeyPair::new(hash_key(2));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let before =
            CodecChain::from_pairs(&[old.clone()], None, DEFAULT_MAX_LENGTH, Arc::clone(&clock))
                .unwrap();
        let token = before.encode("n", "in-flight").unwrap();

        let rotated = CodecChain::from_pairs(
            &[new.clone(), old],
            None,
            DEFAULT_MAX_LENGTH,
            Arc::clone(&clock),
        )
        .unwrap();
        assert_eq!(rotated.len(), 2);
        assert_eq!(rotated.decode("n", &token).unwrap(), "in-flight");

        let fresh = rotated.encode("n", "fresh").unwrap();
        let new_only = CodecChain::from_pairs(&[new], None, DEFAULT_MAX_LENGTH, clock).unwrap();
        assert_eq!(new_only.decode("n", &fresh).unwrap(), "fresh");
        assert_eq!(new_only.decode("n", &token), Err(CodecError::MacMismatch));
    }

    #[test]
    fn chain_reports_expiry_under_old_key() {
        let clock = MockClock::new();
        let old = KeyPair::new(hash_key(1));
        let new = KeyPair::new(hash_key(2));
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());

        let max_age = Some(Duration::minutes(5));
        let before =
            CodecChain::from_pairs(&[old.clone()], max_age, DEFAULT_MAX_LENGTH, Arc::clone(&shared))
                .unwrap();
        let token = before.encode("n", "value").unwrap();
        clock.advance(Duration::minutes(6));

        let rotated =
            CodecChain::from_pairs(&[new, old], max_age, DEFAULT_MAX_LENGTH, shared).unwrap();
        assert_eq!(rotated.decode("n", &token), Err(CodecError::Expired));
    }

    #[test]
    fn empty_chain_is_rejected() {
        assert_eq!(CodecChain::new(Vec::new()).unwrap_err(), CodecError::NoKeys);
    }

    #[test]
    fn debug_output_redacts_keys() {
        let pair = KeyPair::new(b"very-secret-authentication-key!!".to_vec());
        let rendered = format!("{pair:?}");
        assert!(rendered.contains("[32 bytes]"));
        assert!(!rendered.contains("very-secret"));
    }

    #[test]
    fn generated_keys_differ() {
        assert_eq!(generate_random_key(32).len(), 32);
        assert_ne!(KeyPair::generate(), KeyPair::generate());
    }
}
