//! Random identifiers: the per-attempt state token and server-held session ids.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

/// Default encoded state length: 16 characters, 12 random bytes.
pub const DEFAULT_STATE_LEN: usize = 16;

/// Random bytes in a server-held session id (256 bits).
const SESSION_ID_BYTES: usize = 32;

/// Generate a state token of exactly `encoded_len` URL-safe characters.
///
/// `encoded_len` must be a positive multiple of 4 so that the encoding
/// carries no padding; the configuration layer validates this. The token
/// holds `encoded_len * 3 / 4` bytes from the OS CSPRNG.
///
/// # Examples
///
/// ```
/// use handoff_auth::token::generate_state;
///
/// let state = generate_state(16);
/// assert_eq!(state.len(), 16);
/// assert!(state.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
/// ```
#[must_use]
pub fn generate_state(encoded_len: usize) -> String {
    random_url_safe(encoded_len * 3 / 4)
}

/// Generate an opaque id for a server-held pending record.
#[must_use]
pub fn generate_session_id() -> String {
    random_url_safe(SESSION_ID_BYTES)
}

fn random_url_safe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
