mod channel;
mod error;
mod flow;
mod host;
mod oauth;
mod orchestrator;
mod pkce;
mod session;
mod store;
mod utils;

pub use channel::{
    AuthorizationFailure, AuthorizationGrant, ListenerGuard, ListenerSlot, OidcResponse,
    ResponseListener, AUTHORIZATION_RESPONSE_TYPE,
};
pub use error::AuthError;
pub use flow::{ImplicitResponseType, InvalidFlowValue, RedirectResponseMode, ResponseMode};
pub use host::{
    FrameHandle, FrameParent, FrameRequest, HostEnvironment, MountedFrame, PopupHandle,
    WindowMessage,
};
pub use oauth::{AuthorizationRequest, OidcClient, Prompt, TokenResponse};
pub use orchestrator::{
    InteractiveLoginOptions, LoginStateOptions, RedirectLoginOptions, SpaAuth, POPUP_WINDOW_NAME,
};
pub use pkce::{ChallengeMethod, PkcePair};
pub use session::{
    AccessTokenClaims, IdTokenClaims, LoginState, LoginStateWithCustomState, LoginTransaction,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, NullStore};
pub use utils::{login_state_key, random_state, transaction_key};
