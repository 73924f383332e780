use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens are considered expired slightly before their actual deadline so a
/// request started just under the wire does not carry a dead token.
const EXPIRY_LEEWAY_SECS: i64 = 30;

/// Raw token-endpoint response, as returned by a code or refresh exchange.
///
/// Provider-specific fields (`id_token`, granted scopes, ...) are preserved in
/// `extra` so nothing is lost between the wire and the token file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_in: Option<u64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// The persisted form of an access token.
///
/// The relative `expires_in` from the wire is pinned to an absolute
/// `expires_at` at receipt time, which is what makes expiry checks meaningful
/// after a round-trip through the token file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl AccessToken {
    /// Pins a wire response to the moment it was issued.
    pub fn from_response(response: TokenResponse, issued_at: DateTime<Utc>) -> Self {
        let expires_at = response
            .expires_in
            .map(|secs| issued_at + Duration::seconds(secs as i64));
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            token_type: response.token_type,
            scope: response.scope,
            expires_at,
            extra: response.extra,
        }
    }

    /// Whether the token should no longer be used as-is.
    ///
    /// A token without an expiry indicator counts as expired: a credential we
    /// cannot date is refreshed, not trusted.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - Duration::seconds(EXPIRY_LEEWAY_SECS) <= now,
            None => true,
        }
    }
}
