use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of the last successful authentication for an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_id_token: Option<IdTokenClaims>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_access_token: Option<AccessTokenClaims>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<DateTime<Utc>>,
    /// Creation time, serialized as epoch milliseconds.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl LoginState {
    pub fn new(
        access_token: Option<String>,
        id_token: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token,
            id_token,
            parsed_id_token: None,
            parsed_access_token: None,
            expire_at: None,
            timestamp,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expire_at {
            Some(ts) => Utc::now() >= ts,
            None => false,
        }
    }
}

/// Login state returned by the redirect callback, with the caller's echoed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginStateWithCustomState {
    #[serde(flatten)]
    pub login_state: LoginState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_state: Option<serde_json::Value>,
}

/// In-flight redirect login, written before the page navigates away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginTransaction {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_state: Option<serde_json::Value>,
}

/// Standard ID token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Standard access token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub jti: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub scope: String,
    pub iss: String,
    pub aud: String,
}
