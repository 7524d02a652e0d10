use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use crate::config::AuthOptions;

use super::channel::{AuthorizationGrant, ListenerSlot, OidcResponse};
use super::host::{FrameParent, FrameRequest, MountedFrame, PopupHandle};
use super::oauth::{AuthorizationRequest, OidcClient, Prompt};
use super::utils::{callback_params, login_state_key, transaction_key};
use super::{
    AccessTokenClaims, AuthError, FileStore, HostEnvironment, IdTokenClaims, KeyValueStore,
    LoginState, LoginStateWithCustomState, LoginTransaction, MemoryStore, NullStore, PkcePair,
    ResponseMode,
};

pub const POPUP_WINDOW_NAME: &str = "spa-auth-login-window";
const POPUP_POLL_INTERVAL: StdDuration = StdDuration::from_millis(500);
// Lets a message that races the close event still win.
const POPUP_CLOSE_GRACE: StdDuration = StdDuration::from_millis(500);

#[derive(Debug, Clone, Default)]
pub struct LoginStateOptions {
    /// Skip the stored state and ask the authorization server.
    pub ignore_cache: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RedirectLoginOptions {
    /// Page to return to after the callback, absolute or relative to the current
    /// location; defaults to the current location.
    pub original_uri: Option<String>,
    /// Prompt for credentials even when a session exists.
    pub forced: bool,
    /// Opaque payload echoed back by `handle_redirect_callback`.
    pub custom_state: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct InteractiveLoginOptions {
    pub forced: bool,
}

type LoginStateStore = Arc<dyn KeyValueStore<LoginState>>;
type TransactionStore = Arc<dyn KeyValueStore<LoginTransaction>>;

/// Coordinates the login flows, response validation and login state persistence.
pub struct SpaAuth {
    options: AuthOptions,
    oidc: OidcClient,
    host: Arc<dyn HostEnvironment>,
    login_states: LoginStateStore,
    transactions: TransactionStore,
    listeners: Arc<ListenerSlot>,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl SpaAuth {
    /// Build with stores chosen from the host's storage capabilities.
    pub fn new(options: AuthOptions, host: Arc<dyn HostEnvironment>) -> Result<Self, AuthError> {
        let login_states: LoginStateStore = if host.durable_storage_available() {
            match FileStore::<LoginState>::with_default_locator() {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    tracing::warn!(%err, "durable storage unavailable; login state will not survive restarts");
                    Arc::new(MemoryStore::<LoginState>::new())
                }
            }
        } else {
            tracing::warn!("durable storage unavailable; login state will not survive restarts");
            Arc::new(MemoryStore::<LoginState>::new())
        };

        let transactions: TransactionStore = if host.session_storage_available() {
            Arc::new(MemoryStore::<LoginTransaction>::new())
        } else {
            if !options.use_implicit_mode {
                tracing::warn!("session storage unavailable; redirect login requires a custom transaction store or implicit mode");
            }
            Arc::new(NullStore)
        };

        Self::with_stores(options, host, login_states, transactions)
    }

    pub fn with_stores(
        options: AuthOptions,
        host: Arc<dyn HostEnvironment>,
        login_states: LoginStateStore,
        transactions: TransactionStore,
    ) -> Result<Self, AuthError> {
        if !options.use_implicit_mode && !host.secure_crypto_available() {
            return Err(AuthError::CryptoUnavailable);
        }
        let oidc = OidcClient::new(options.domain.clone(), options.app_id.clone())?;
        Ok(Self {
            options,
            oidc,
            host,
            login_states,
            transactions,
            listeners: ListenerSlot::new(),
            last_timestamp: Mutex::new(None),
        })
    }

    pub fn options(&self) -> &AuthOptions {
        &self.options
    }

    /// Whether a silent, popup or frame login is waiting for its response.
    pub fn is_authorization_pending(&self) -> bool {
        self.listeners.is_pending()
    }

    /// Stored login state, falling back to a silent request in a hidden frame.
    ///
    /// Timeouts, `login_required` and other server errors resolve to `None`.
    pub async fn get_login_state(
        &self,
        options: LoginStateOptions,
    ) -> Result<Option<LoginState>, AuthError> {
        if !options.ignore_cache {
            if let Some(state) = self.login_states.get(&self.login_state_key()).await? {
                return Ok(Some(state));
            }
        }

        let guard = self.listeners.acquire()?;
        if self.host.cross_origin_isolated() {
            tracing::warn!("page is cross-origin isolated; cannot fetch login state silently");
            return Ok(None);
        }

        let redirect_uri = self.host.location().to_string();
        let (request, verifier) =
            self.prepare_request(Some(Prompt::None), &redirect_uri, ResponseMode::WebMessage);
        let mut listener = guard.listen(self.host.as_ref(), self.oidc.domain().as_str());
        let url = self.oidc.authorization_url(&request)?;
        let frame = MountedFrame::new(self.host.mount_frame(FrameRequest::hidden(url))?);

        let outcome =
            tokio::time::timeout(self.options.silent_timeout(), listener.next_response()).await;
        drop(listener);
        drop(frame);

        let response = match outcome {
            Ok(Err(AuthError::ListenerCleared)) => {
                tracing::warn!("silent login listener cleared before a response arrived");
                return Ok(None);
            }
            Ok(response) => response?,
            Err(_) => {
                tracing::warn!("timed out waiting for silent login response");
                return Ok(None);
            }
        };

        match response.verify_state(&request.state)? {
            OidcResponse::Failure(failure) => {
                if failure.is_login_required() {
                    tracing::info!("user is not logged in");
                } else {
                    tracing::warn!(
                        error = %failure.error,
                        error_description = failure.description.as_deref().unwrap_or(""),
                        "authorization server rejected silent login"
                    );
                }
                Ok(None)
            }
            OidcResponse::Success(grant) => self
                .handle_successful_response(grant, &redirect_uri, verifier)
                .await
                .map(Some),
        }
    }

    /// Persist a transaction, then navigate the page to the authorization endpoint.
    pub async fn login_with_redirect(&self, options: RedirectLoginOptions) -> Result<(), AuthError> {
        let prompt = options.forced.then_some(Prompt::Login);
        let (request, code_verifier) = self.prepare_request(
            prompt,
            self.options.redirect_uri.as_str(),
            self.options.redirect_response_mode.into(),
        );

        let original_uri = if self.options.redirect_to_original_uri {
            let location = self.host.location();
            let resolved = match options.original_uri {
                Some(uri) => location.join(&uri)?,
                None => location,
            };
            Some(resolved.to_string())
        } else {
            None
        };
        let transaction = LoginTransaction {
            state: request.state.clone(),
            code_verifier,
            original_uri,
            custom_state: options.custom_state,
        };
        let url = self.oidc.authorization_url(&request)?;

        // Must land before navigation; nothing runs after the page unloads.
        self.transactions
            .put(&self.transaction_key(&request.state), &transaction)
            .await?;
        self.host.replace_location(&url);
        Ok(())
    }

    /// Whether the current URL carries an authorization response. No side effects.
    pub fn is_redirect_callback(&self) -> bool {
        let Some(params) = self.callback_params() else {
            return false;
        };
        if non_empty(&params, "error").is_some() {
            return true;
        }
        if self.options.use_implicit_mode {
            non_empty(&params, "access_token").is_some() || non_empty(&params, "id_token").is_some()
        } else {
            non_empty(&params, "code").is_some()
        }
    }

    /// Complete a redirect login from the parameters in the current URL.
    pub async fn handle_redirect_callback(&self) -> Result<LoginStateWithCustomState, AuthError> {
        let params = self
            .callback_params()
            .ok_or_else(|| AuthError::InvalidCallback("no authorization parameters".into()))?;

        if let Some(error) = non_empty(&params, "error") {
            return Err(AuthError::AuthorizationFailed {
                error: error.to_owned(),
                description: params.get("error_description").cloned(),
            });
        }

        let state = non_empty(&params, "state")
            .ok_or_else(|| AuthError::InvalidCallback("missing state".into()))?;
        let key = self.transaction_key(state);
        let transaction = self.transactions.get(&key).await?;
        if transaction.is_some() {
            self.transactions.delete(&key).await?;
        }

        let (original_uri, custom_state, code_verifier) = match transaction {
            Some(tx) if tx.state != state => return Err(AuthError::StateMismatch),
            Some(tx) => (tx.original_uri, tx.custom_state, tx.code_verifier),
            None if !self.options.use_implicit_mode => return Err(AuthError::SessionLost),
            None => (None, None, None),
        };

        let login_state = if self.options.use_implicit_mode {
            let access_token = non_empty(&params, "access_token").map(str::to_owned);
            let id_token = non_empty(&params, "id_token").map(str::to_owned);
            self.require_implicit_tokens(&access_token, &id_token)?;
            self.save_login_state(access_token, id_token).await?
        } else {
            let code = non_empty(&params, "code").ok_or(AuthError::MissingAuthorizationCode)?;
            let verifier = code_verifier.ok_or(AuthError::SessionLost)?;
            self.exchange_token(code, self.options.redirect_uri.as_str(), &verifier)
                .await?
        };

        if self.options.redirect_to_original_uri {
            if let Some(uri) = original_uri {
                // Login already succeeded; a bad return address only skips navigation.
                match self.host.location().join(&uri) {
                    Ok(url) => self.host.replace_location(&url),
                    Err(err) => {
                        tracing::warn!(%err, original_uri = %uri, "cannot return to original URI");
                    }
                }
            }
        }

        Ok(LoginStateWithCustomState {
            login_state,
            custom_state,
        })
    }

    /// Log in inside a popup window. Returns `None` when the user closes it.
    pub async fn login_with_popup(
        &self,
        options: InteractiveLoginOptions,
    ) -> Result<Option<LoginState>, AuthError> {
        let guard = self.listeners.acquire()?;
        if self.host.cross_origin_isolated() {
            return Err(AuthError::CrossOriginIsolated);
        }

        let redirect_uri = self.host.location().to_string();
        let (request, verifier) = self.prepare_request(
            options.forced.then_some(Prompt::Login),
            &redirect_uri,
            ResponseMode::WebMessage,
        );
        let mut listener = guard.listen(self.host.as_ref(), self.oidc.domain().as_str());
        let url = self.oidc.authorization_url(&request)?;
        let features = format!(
            "popup,width={},height={}",
            self.options.popup_width, self.options.popup_height
        );
        let popup = self
            .host
            .open_popup(&url, POPUP_WINDOW_NAME, &features)
            .ok_or(AuthError::PopupBlocked)?;

        let outcome = tokio::select! {
            response = listener.next_response() => Some(response),
            _ = wait_for_close(popup.as_ref()) => None,
        };
        drop(listener);

        let Some(response) = outcome else {
            tracing::info!("login popup closed by user");
            return Ok(None);
        };

        match response?.verify_state(&request.state)? {
            OidcResponse::Failure(failure) => Err(failure.into_error()),
            OidcResponse::Success(grant) => self
                .handle_successful_response(grant, &redirect_uri, verifier)
                .await
                .map(Some),
        }
    }

    /// Log in inside a frame attached to the host element `container`.
    ///
    /// If the frame is torn down outside this call, run
    /// [`clear_message_listener`](Self::clear_message_listener) to end the wait.
    pub async fn login_with_iframe(
        &self,
        container: &str,
        options: InteractiveLoginOptions,
    ) -> Result<LoginState, AuthError> {
        let guard = self.listeners.acquire()?;
        if self.host.cross_origin_isolated() {
            return Err(AuthError::CrossOriginIsolated);
        }

        let redirect_uri = self.host.location().to_string();
        let (request, verifier) = self.prepare_request(
            options.forced.then_some(Prompt::Login),
            &redirect_uri,
            ResponseMode::WebMessage,
        );
        let mut listener = guard.listen(self.host.as_ref(), self.oidc.domain().as_str());
        let url = self.oidc.authorization_url(&request)?;
        let frame = MountedFrame::new(self.host.mount_frame(FrameRequest::visible(
            FrameParent::Element(container.to_owned()),
            url,
            self.options.iframe_width,
            self.options.iframe_height,
        ))?);

        let response = listener.next_response().await;
        drop(listener);
        drop(frame);

        match response?.verify_state(&request.state)? {
            OidcResponse::Failure(failure) => Err(failure.into_error()),
            OidcResponse::Success(grant) => {
                self.handle_successful_response(grant, &redirect_uri, verifier)
                    .await
            }
        }
    }

    /// Drop the pending message listener, if any. Returns whether one was active.
    pub fn clear_message_listener(&self) -> bool {
        self.listeners.clear()
    }

    pub fn parse_id_token(&self, _id_token: &str) -> Result<IdTokenClaims, AuthError> {
        Err(AuthError::Unsupported("ID token parsing"))
    }

    pub fn parse_access_token(&self, _access_token: &str) -> Result<AccessTokenClaims, AuthError> {
        Err(AuthError::Unsupported("access token parsing"))
    }

    fn prepare_request(
        &self,
        prompt: Option<Prompt>,
        redirect_uri: &str,
        response_mode: ResponseMode,
    ) -> (AuthorizationRequest, Option<String>) {
        let request =
            AuthorizationRequest::new(&self.options, redirect_uri, response_mode).with_prompt(prompt);
        if self.options.use_implicit_mode {
            return (request, None);
        }
        let pkce = PkcePair::generate();
        (request.with_pkce(&pkce), Some(pkce.into_verifier()))
    }

    async fn handle_successful_response(
        &self,
        grant: AuthorizationGrant,
        redirect_uri: &str,
        code_verifier: Option<String>,
    ) -> Result<LoginState, AuthError> {
        if self.options.use_implicit_mode {
            self.require_implicit_tokens(&grant.access_token, &grant.id_token)?;
            return self
                .save_login_state(grant.access_token, grant.id_token)
                .await;
        }

        let code = grant.code.ok_or(AuthError::MissingAuthorizationCode)?;
        let verifier = code_verifier.ok_or(AuthError::SessionLost)?;
        self.exchange_token(&code, redirect_uri, &verifier).await
    }

    fn require_implicit_tokens(
        &self,
        access_token: &Option<String>,
        id_token: &Option<String>,
    ) -> Result<(), AuthError> {
        let response_type = self.options.implicit_response_type;
        if (response_type.requires_access_token() && access_token.is_none())
            || (response_type.requires_id_token() && id_token.is_none())
        {
            return Err(AuthError::InvalidTokenResponse);
        }
        Ok(())
    }

    async fn exchange_token(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<LoginState, AuthError> {
        let tokens = self
            .oidc
            .exchange_code(code, code_verifier, redirect_uri)
            .await?;
        self.save_login_state(tokens.access_token, tokens.id_token)
            .await
    }

    async fn save_login_state(
        &self,
        access_token: Option<String>,
        id_token: Option<String>,
    ) -> Result<LoginState, AuthError> {
        let state = LoginState::new(access_token, id_token, self.next_timestamp());
        self.login_states
            .put(&self.login_state_key(), &state)
            .await?;
        Ok(state)
    }

    /// Millisecond timestamp, strictly greater than any issued before by this instance.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self
            .last_timestamp
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Utc::now();
        let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let next = match *last {
            Some(previous) if now <= previous => previous + Duration::milliseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }

    fn callback_params(&self) -> Option<HashMap<String, String>> {
        callback_params(
            &self.host.location(),
            self.options.redirect_response_mode.into(),
        )
    }

    fn login_state_key(&self) -> String {
        login_state_key(&self.options.app_id)
    }

    fn transaction_key(&self, state: &str) -> String {
        transaction_key(&self.options.app_id, state)
    }
}

fn non_empty<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

async fn wait_for_close(popup: &dyn PopupHandle) {
    loop {
        tokio::time::sleep(POPUP_POLL_INTERVAL).await;
        if popup.is_closed() {
            break;
        }
    }
    tokio::time::sleep(POPUP_CLOSE_GRACE).await;
}
