use std::fmt;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::auth::{ImplicitResponseType, RedirectResponseMode};

pub const DEFAULT_SCOPE: &str = "openid profile";
pub const DEFAULT_POPUP_WIDTH: u32 = 800;
pub const DEFAULT_POPUP_HEIGHT: u32 = 600;
pub const DEFAULT_IFRAME_WIDTH: u32 = 600;
pub const DEFAULT_IFRAME_HEIGHT: u32 = 800;
pub const DEFAULT_SILENT_TIMEOUT_MS: u64 = 5000;

/// Canonical origin of the authorization server, e.g. `https://example.authing.cn`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain(String);

impl Domain {
    /// Canonicalize a user-supplied domain. A bare host is assumed to be `https`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidDomain(raw.to_owned()));
        }
        let with_scheme = if trimmed.contains("://") {
            trimmed.to_owned()
        } else {
            format!("https://{trimmed}")
        };
        let url =
            Url::parse(&with_scheme).map_err(|_| ConfigError::InvalidDomain(raw.to_owned()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::InvalidDomain(raw.to_owned()));
        }
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(ConfigError::DomainHasPath(raw.to_owned()));
        }
        Ok(Self(url.origin().ascii_serialization()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Absolute URL of an endpoint hosted on this domain.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}{path}", self.0))
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Domain::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Options recognized by [`SpaAuth`](crate::auth::SpaAuth).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOptions {
    pub domain: Domain,
    pub app_id: String,
    pub redirect_uri: Url,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub redirect_to_original_uri: bool,
    #[serde(default)]
    pub redirect_response_mode: RedirectResponseMode,
    #[serde(default)]
    pub use_implicit_mode: bool,
    #[serde(default)]
    pub implicit_response_type: ImplicitResponseType,
    #[serde(default = "default_popup_width")]
    pub popup_width: u32,
    #[serde(default = "default_popup_height")]
    pub popup_height: u32,
    #[serde(default = "default_iframe_width")]
    pub iframe_width: u32,
    #[serde(default = "default_iframe_height")]
    pub iframe_height: u32,
    #[serde(default = "default_silent_timeout_ms")]
    pub silent_timeout_ms: u64,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_owned()
}

fn default_popup_width() -> u32 {
    DEFAULT_POPUP_WIDTH
}

fn default_popup_height() -> u32 {
    DEFAULT_POPUP_HEIGHT
}

fn default_iframe_width() -> u32 {
    DEFAULT_IFRAME_WIDTH
}

fn default_iframe_height() -> u32 {
    DEFAULT_IFRAME_HEIGHT
}

fn default_silent_timeout_ms() -> u64 {
    DEFAULT_SILENT_TIMEOUT_MS
}

impl AuthOptions {
    pub fn new<S: Into<String>>(domain: &str, app_id: S, redirect_uri: &str) -> Result<Self, ConfigError> {
        let redirect_uri = Url::parse(redirect_uri)
            .map_err(|err| ConfigError::InvalidRedirectUri(format!("{redirect_uri}: {err}")))?;
        Ok(Self {
            domain: Domain::parse(domain)?,
            app_id: app_id.into(),
            redirect_uri,
            scope: default_scope(),
            redirect_to_original_uri: false,
            redirect_response_mode: RedirectResponseMode::default(),
            use_implicit_mode: false,
            implicit_response_type: ImplicitResponseType::default(),
            popup_width: DEFAULT_POPUP_WIDTH,
            popup_height: DEFAULT_POPUP_HEIGHT,
            iframe_width: DEFAULT_IFRAME_WIDTH,
            iframe_height: DEFAULT_IFRAME_HEIGHT,
            silent_timeout_ms: DEFAULT_SILENT_TIMEOUT_MS,
        })
    }

    /// Load options from a JSON document using the camelCase option names.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(ConfigError::Parse)
    }

    pub fn with_scope<S: Into<String>>(mut self, scope: S) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_implicit_mode(mut self, response_type: ImplicitResponseType) -> Self {
        self.use_implicit_mode = true;
        self.implicit_response_type = response_type;
        self
    }

    pub fn with_redirect_response_mode(mut self, mode: RedirectResponseMode) -> Self {
        self.redirect_response_mode = mode;
        self
    }

    pub fn with_redirect_to_original_uri(mut self, enabled: bool) -> Self {
        self.redirect_to_original_uri = enabled;
        self
    }

    pub fn with_popup_size(mut self, width: u32, height: u32) -> Self {
        self.popup_width = width;
        self.popup_height = height;
        self
    }

    pub fn with_iframe_size(mut self, width: u32, height: u32) -> Self {
        self.iframe_width = width;
        self.iframe_height = height;
        self
    }

    pub fn with_silent_timeout(mut self, timeout: Duration) -> Self {
        self.silent_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn silent_timeout(&self) -> Duration {
        Duration::from_millis(self.silent_timeout_ms)
    }
}

/// Resolves the per-user directory backing durable storage.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent data directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs =
            ProjectDirs::from("app", "spa-auth", "spa-auth").ok_or(ConfigError::MissingProjectDirs)?;
        Self::from_root(dirs.data_dir().to_path_buf())
    }

    /// Use an explicit directory, creating it if needed.
    pub fn from_root(root: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&root).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding the value stored under `key`.
    pub fn entry_file(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(key.as_bytes())))
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Errors raised while validating options or preparing storage directories.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid authorization domain '{0}'")]
    InvalidDomain(String),
    #[error("authorization domain '{0}' must not contain a path, query or fragment")]
    DomainHasPath(String),
    #[error("invalid redirect URI {0}")]
    InvalidRedirectUri(String),
    #[error("unable to determine data directory for spa-auth")]
    MissingProjectDirs,
    #[error("failed to create data directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid options document: {0}")]
    Parse(#[source] serde_json::Error),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}
