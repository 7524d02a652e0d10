//! OpenID Connect login engine for single-page applications.
//!
//! [`auth::SpaAuth`] drives silent, popup, embedded-frame and redirect logins
//! against an authorization server, using either the PKCE code flow or the
//! implicit flow, and caches the resulting login state.

pub mod auth;
pub mod config;

pub use auth::{AuthError, SpaAuth};
pub use config::AuthOptions;
