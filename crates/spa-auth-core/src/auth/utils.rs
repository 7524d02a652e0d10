use std::collections::HashMap;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use url::Url;

use super::ResponseMode;

pub const SDK_IDENTIFIER: &str = "spa-auth";
pub const STORAGE_VERSION: &str = "1";

/// Length of generated `state` and `nonce` values.
pub const STATE_LEN: usize = 16;

pub fn random_state(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn login_state_key(app_id: &str) -> String {
    format!("{SDK_IDENTIFIER}:{STORAGE_VERSION}:login-state:{app_id}")
}

pub fn transaction_key(app_id: &str, state: &str) -> String {
    format!("{SDK_IDENTIFIER}:{STORAGE_VERSION}:transaction:{app_id}:{state}")
}

/// Flatten the fragment or query of `url` into a key/value map.
///
/// Returns `None` when the selected component is absent or empty.
pub fn callback_params(url: &Url, mode: ResponseMode) -> Option<HashMap<String, String>> {
    let source = match mode {
        ResponseMode::Fragment => url.fragment(),
        ResponseMode::Query => url.query(),
        ResponseMode::WebMessage => None,
    }?;
    if source.is_empty() {
        return None;
    }
    Some(
        url::form_urlencoded::parse(source.as_bytes())
            .into_owned()
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_state_is_alphanumeric() {
        let state = random_state(STATE_LEN);
        assert_eq!(state.len(), STATE_LEN);
        assert!(state.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(state, random_state(STATE_LEN));
    }

    #[test]
    fn storage_keys_are_namespaced() {
        assert_eq!(login_state_key("app"), "spa-auth:1:login-state:app");
        assert_eq!(
            transaction_key("app", "abc"),
            "spa-auth:1:transaction:app:abc"
        );
    }

    #[test]
    fn callback_params_reads_selected_component() {
        let url = Url::parse("https://spa.example.com/cb?code=q#code=f&state=a%20b").unwrap();
        let fragment = callback_params(&url, ResponseMode::Fragment).unwrap();
        assert_eq!(fragment.get("code").map(String::as_str), Some("f"));
        assert_eq!(fragment.get("state").map(String::as_str), Some("a b"));
        let query = callback_params(&url, ResponseMode::Query).unwrap();
        assert_eq!(query.get("code").map(String::as_str), Some("q"));
    }

    #[test]
    fn callback_params_absent() {
        let url = Url::parse("https://spa.example.com/cb#").unwrap();
        assert!(callback_params(&url, ResponseMode::Fragment).is_none());
        assert!(callback_params(&url, ResponseMode::Query).is_none());
    }
}
