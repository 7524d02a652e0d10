use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by login flows, response handling and storage.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("PKCE code flow requires a secure random source and SHA-256 digest; serve the page over https or enable implicit mode")]
    CryptoUnavailable,
    #[error("another authorization is pending")]
    PendingAuthorization,
    #[error("page is cross-origin isolated; cross-window messaging is unavailable")]
    CrossOriginIsolated,
    #[error("failed to open login popup")]
    PopupBlocked,
    #[error("failed to mount login frame: {0}")]
    FrameUnavailable(String),
    #[error("authorization listener cleared before a response arrived")]
    ListenerCleared,
    #[error("authorization server returned no result")]
    NoAuthorizationResult,
    #[error("authorization failed: error={error}, error_description={}", .description.as_deref().unwrap_or(""))]
    AuthorizationFailed {
        error: String,
        description: Option<String>,
    },
    #[error("authorization state mismatch")]
    StateMismatch,
    #[error("invalid callback URL: {0}")]
    InvalidCallback(String),
    #[error("login transaction not found; check that transaction storage is available")]
    SessionLost,
    #[error("authorization response missing code parameter")]
    MissingAuthorizationCode,
    #[error("authorization response missing required tokens")]
    InvalidTokenResponse,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint error {status}: {body}")]
    TokenEndpoint { status: StatusCode, body: String },
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
