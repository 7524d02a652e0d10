//! Cross-window delivery of authorization responses.
//!
//! At most one listener may be registered per [`ListenerSlot`]. The slot is
//! held by a [`ListenerGuard`] and released when the guard drops, so every
//! exit path of a login flow frees it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;

use super::{AuthError, HostEnvironment, WindowMessage};

pub const AUTHORIZATION_RESPONSE_TYPE: &str = "authorization_response";

/// Successful authorization response, normalized from the server's snake_case fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub code: Option<String>,
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationFailure {
    pub error: String,
    pub description: Option<String>,
    pub state: Option<String>,
}

impl AuthorizationFailure {
    pub fn is_login_required(&self) -> bool {
        self.error == "login_required"
    }

    pub fn into_error(self) -> AuthError {
        AuthError::AuthorizationFailed {
            error: self.error,
            description: self.description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OidcResponse {
    Success(AuthorizationGrant),
    Failure(AuthorizationFailure),
}

impl OidcResponse {
    pub fn state(&self) -> Option<&str> {
        match self {
            OidcResponse::Success(grant) => grant.state.as_deref(),
            OidcResponse::Failure(failure) => failure.state.as_deref(),
        }
    }

    /// Reject responses whose `state` differs from the one sent.
    pub fn verify_state(self, expected: &str) -> Result<Self, AuthError> {
        if self.state() != Some(expected) {
            return Err(AuthError::StateMismatch);
        }
        Ok(self)
    }

    fn from_payload(response: &Value) -> Result<Self, AuthError> {
        let object = response.as_object().ok_or(AuthError::NoAuthorizationResult)?;
        let field = |name: &str| object.get(name).and_then(Value::as_str).map(str::to_owned);

        if let Some(error) = field("error").filter(|error| !error.is_empty()) {
            return Ok(OidcResponse::Failure(AuthorizationFailure {
                error,
                description: field("error_description"),
                state: field("state"),
            }));
        }

        Ok(OidcResponse::Success(AuthorizationGrant {
            code: field("code"),
            access_token: field("access_token"),
            id_token: field("id_token"),
            refresh_token: field("refresh_token"),
            state: field("state"),
        }))
    }
}

struct ActiveListener {
    id: u64,
    // Dropping the sender wakes the waiting listener.
    _cancel: oneshot::Sender<()>,
}

/// Capacity-one lock protecting the response channel.
#[derive(Default)]
pub struct ListenerSlot {
    active: Mutex<Option<ActiveListener>>,
    next_id: AtomicU64,
}

impl ListenerSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveListener>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the slot, failing immediately if another authorization is pending.
    pub fn acquire(self: &Arc<Self>) -> Result<ListenerGuard, AuthError> {
        let mut active = self.lock();
        if active.is_some() {
            return Err(AuthError::PendingAuthorization);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();
        *active = Some(ActiveListener {
            id,
            _cancel: cancel,
        });
        tracing::debug!(listener = id, "authorization listener acquired");
        Ok(ListenerGuard {
            slot: Arc::clone(self),
            id,
            cancelled,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.lock().is_some()
    }

    /// Release the slot from outside the flow, cancelling any pending wait.
    pub fn clear(&self) -> bool {
        let cleared = self.lock().take();
        if let Some(listener) = &cleared {
            tracing::debug!(listener = listener.id, "authorization listener cleared");
        }
        cleared.is_some()
    }

    fn release(&self, id: u64) {
        let mut active = self.lock();
        if active.as_ref().map(|listener| listener.id) == Some(id) {
            *active = None;
            tracing::debug!(listener = id, "authorization listener released");
        }
    }
}

/// Ownership of the listener slot; releases it on drop.
pub struct ListenerGuard {
    slot: Arc<ListenerSlot>,
    id: u64,
    cancelled: oneshot::Receiver<()>,
}

impl ListenerGuard {
    /// Register the window message handler for responses from `origin`.
    pub fn listen(self, host: &dyn HostEnvironment, origin: &str) -> ResponseListener {
        ResponseListener {
            messages: Some(host.listen_messages()),
            origin: origin.to_owned(),
            guard: self,
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.slot.release(self.id);
    }
}

/// Waits for the single authorization response of one login attempt.
pub struct ResponseListener {
    guard: ListenerGuard,
    messages: Option<UnboundedReceiver<WindowMessage>>,
    origin: String,
}

impl ResponseListener {
    pub async fn next_response(&mut self) -> Result<OidcResponse, AuthError> {
        let Some(messages) = self.messages.as_mut() else {
            return Err(AuthError::ListenerCleared);
        };
        loop {
            let message = tokio::select! {
                _ = &mut self.guard.cancelled => None,
                message = messages.recv() => message,
            };
            let Some(message) = message else {
                self.messages = None;
                return Err(AuthError::ListenerCleared);
            };
            if let Some(result) = accept_message(&message, &self.origin) {
                // Deregister before handing the response out; duplicates are never seen.
                self.messages = None;
                return result;
            }
        }
    }
}

fn accept_message(message: &WindowMessage, origin: &str) -> Option<Result<OidcResponse, AuthError>> {
    if message.origin != origin {
        tracing::debug!(origin = %message.origin, "ignoring message from foreign origin");
        return None;
    }
    if message.data.get("type").and_then(Value::as_str) != Some(AUTHORIZATION_RESPONSE_TYPE) {
        tracing::debug!("ignoring message that is not an authorization response");
        return None;
    }
    match message.data.get("response") {
        None | Some(Value::Null) => Some(Err(AuthError::NoAuthorizationResult)),
        Some(response) => Some(OidcResponse::from_payload(response)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::host::fake::{authorization_message, FakeHost};
    use serde_json::json;

    const ORIGIN: &str = "https://auth.example.com";

    #[test]
    fn second_acquire_fails_until_release() {
        let slot = ListenerSlot::new();
        let guard = slot.acquire().unwrap();
        assert!(matches!(slot.acquire(), Err(AuthError::PendingAuthorization)));
        drop(guard);
        assert!(!slot.is_pending());
        slot.acquire().unwrap();
    }

    #[test]
    fn stale_guard_does_not_release_newer_listener() {
        let slot = ListenerSlot::new();
        let stale = slot.acquire().unwrap();
        assert!(slot.clear());
        let current = slot.acquire().unwrap();
        drop(stale);
        assert!(slot.is_pending());
        drop(current);
        assert!(!slot.is_pending());
    }

    #[tokio::test]
    async fn filters_foreign_origin_and_type() {
        let host = FakeHost::new("https://spa.example.com/");
        let slot = ListenerSlot::new();
        let mut listener = slot.acquire().unwrap().listen(&host, ORIGIN);

        host.post_message(authorization_message(
            "https://evil.example.com",
            json!({"code": "stolen", "state": "s"}),
        ));
        host.post_message(WindowMessage {
            origin: ORIGIN.into(),
            data: json!({"type": "something_else"}),
        });
        host.post_message(authorization_message(
            ORIGIN,
            json!({"code": "c", "state": "s", "access_token": "A"}),
        ));

        let response = listener.next_response().await.unwrap();
        assert_eq!(
            response,
            OidcResponse::Success(AuthorizationGrant {
                code: Some("c".into()),
                access_token: Some("A".into()),
                state: Some("s".into()),
                ..Default::default()
            })
        );
        assert_eq!(host.active_listeners(), 0);
    }

    #[tokio::test]
    async fn error_fields_propagate_verbatim() {
        let host = FakeHost::new("https://spa.example.com/");
        let slot = ListenerSlot::new();
        let mut listener = slot.acquire().unwrap().listen(&host, ORIGIN);
        host.post_message(authorization_message(
            ORIGIN,
            json!({"error": "access_denied", "error_description": "nope", "state": "s"}),
        ));
        match listener.next_response().await.unwrap() {
            OidcResponse::Failure(failure) => {
                assert_eq!(failure.error, "access_denied");
                assert_eq!(failure.description.as_deref(), Some("nope"));
                assert!(!failure.is_login_required());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_payload_is_an_error() {
        let host = FakeHost::new("https://spa.example.com/");
        let slot = ListenerSlot::new();
        let mut listener = slot.acquire().unwrap().listen(&host, ORIGIN);
        host.post_message(WindowMessage {
            origin: ORIGIN.into(),
            data: json!({"type": AUTHORIZATION_RESPONSE_TYPE}),
        });
        assert!(matches!(
            listener.next_response().await,
            Err(AuthError::NoAuthorizationResult)
        ));
    }

    #[tokio::test]
    async fn clear_cancels_pending_wait() {
        let host = FakeHost::new("https://spa.example.com/");
        let slot = ListenerSlot::new();
        let mut listener = slot.acquire().unwrap().listen(&host, ORIGIN);
        assert!(slot.clear());
        assert!(matches!(
            listener.next_response().await,
            Err(AuthError::ListenerCleared)
        ));
    }

    #[test]
    fn state_verification() {
        let response = OidcResponse::Failure(AuthorizationFailure {
            error: "login_required".into(),
            description: None,
            state: Some("expected".into()),
        });
        assert!(response.clone().verify_state("expected").is_ok());
        assert!(matches!(
            response.verify_state("other"),
            Err(AuthError::StateMismatch)
        ));
        let stateless = OidcResponse::Success(AuthorizationGrant::default());
        assert!(matches!(
            stateless.verify_state("expected"),
            Err(AuthError::StateMismatch)
        ));
    }
}
