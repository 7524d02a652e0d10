use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::config::{AuthOptions, Domain};

use super::pkce::ChallengeMethod;
use super::{utils, AuthError, PkcePair, ResponseMode};

pub const AUTHORIZATION_PATH: &str = "/oidc/auth";
pub const TOKEN_PATH: &str = "/oidc/token";

const DEFAULT_USER_AGENT: &str = "spa-auth/0.1.0";

/// `prompt` values sent to the authorization endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Never show UI; fail with `login_required` instead.
    None,
    /// Ask the user to log in again even with an active session.
    Login,
}

impl Prompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prompt::None => "none",
            Prompt::Login => "login",
        }
    }
}

/// Parameters of one authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub redirect_uri: String,
    pub response_mode: ResponseMode,
    pub response_type: String,
    pub client_id: String,
    pub state: String,
    pub nonce: String,
    pub scope: String,
    pub prompt: Option<Prompt>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<ChallengeMethod>,
}

impl AuthorizationRequest {
    /// Fresh request with newly generated `state` and `nonce`.
    pub fn new(options: &AuthOptions, redirect_uri: &str, response_mode: ResponseMode) -> Self {
        let response_type = if options.use_implicit_mode {
            options.implicit_response_type.as_str()
        } else {
            "code"
        };
        Self {
            redirect_uri: redirect_uri.to_owned(),
            response_mode,
            response_type: response_type.to_owned(),
            client_id: options.app_id.clone(),
            state: utils::random_state(utils::STATE_LEN),
            nonce: utils::random_state(utils::STATE_LEN),
            scope: options.scope.clone(),
            prompt: None,
            code_challenge: None,
            code_challenge_method: None,
        }
    }

    pub fn with_prompt(mut self, prompt: Option<Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_pkce(mut self, pkce: &PkcePair) -> Self {
        self.code_challenge = Some(pkce.challenge().to_owned());
        self.code_challenge_method = Some(pkce.method());
        self
    }
}

/// Raw token endpoint payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Talks to the authorization server's OIDC endpoints.
#[derive(Debug, Clone)]
pub struct OidcClient {
    http: Client,
    domain: Domain,
    client_id: String,
}

impl OidcClient {
    pub fn new(domain: Domain, client_id: impl Into<String>) -> Result<Self, AuthError> {
        let http = Client::builder().user_agent(DEFAULT_USER_AGENT).build()?;
        Ok(Self {
            http,
            domain,
            client_id: client_id.into(),
        })
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn authorization_url(&self, request: &AuthorizationRequest) -> Result<Url, AuthError> {
        let mut url = self.domain.endpoint(AUTHORIZATION_PATH)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("redirect_uri", &request.redirect_uri);
            pairs.append_pair("response_mode", request.response_mode.as_str());
            pairs.append_pair("response_type", &request.response_type);
            pairs.append_pair("client_id", &request.client_id);
            pairs.append_pair("state", &request.state);
            pairs.append_pair("nonce", &request.nonce);
            pairs.append_pair("scope", &request.scope);
            if let Some(prompt) = request.prompt {
                pairs.append_pair("prompt", prompt.as_str());
            }
            if let Some(challenge) = &request.code_challenge {
                pairs.append_pair("code_challenge", challenge);
                let method = request.code_challenge_method.unwrap_or_default();
                pairs.append_pair("code_challenge_method", method.as_str());
            }
        }
        Ok(url)
    }

    /// Exchange an authorization code for tokens. Failures are not retried.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http
            .post(self.domain.endpoint(TOKEN_PATH)?)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint { status, body });
        }
        Ok(response.json().await?)
    }
}
