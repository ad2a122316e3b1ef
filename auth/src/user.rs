//! Provider-agnostic user profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The result of a completed login.
///
/// Produced only after the callback passed verification and the provider
/// authorized it. Never persisted by the handoff.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Name of the provider that authenticated the user.
    pub provider: String,

    /// Display name.
    pub name: String,

    /// Email address.
    pub email: String,

    /// Handle or screen name.
    pub nick_name: String,

    /// Free-form location.
    pub location: String,

    /// Avatar image URL.
    pub avatar_url: String,

    /// Profile description.
    pub description: String,

    /// User id at the provider.
    pub user_id: String,

    /// Access token issued by the provider.
    pub access_token: String,

    /// Token secret (`OAuth` 1.0a providers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_secret: Option<String>,

    /// Refresh token, if the provider issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Access token expiry, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Unmodified profile document from the provider.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub raw_data: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    /// Empty profile attributed to `provider`.
    #[must_use]
    pub fn for_provider(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Self::default()
        }
    }
}
