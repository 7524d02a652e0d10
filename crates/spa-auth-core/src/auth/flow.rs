use serde::{Deserialize, Serialize};

/// Where the authorization server places its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Fragment,
    Query,
    /// Delivered to the opener/parent window by cross-window messaging.
    WebMessage,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::Fragment => "fragment",
            ResponseMode::Query => "query",
            ResponseMode::WebMessage => "web_message",
        }
    }
}

/// Response modes usable with a full-page redirect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectResponseMode {
    #[default]
    Fragment,
    Query,
}

impl From<RedirectResponseMode> for ResponseMode {
    fn from(mode: RedirectResponseMode) -> Self {
        match mode {
            RedirectResponseMode::Fragment => ResponseMode::Fragment,
            RedirectResponseMode::Query => ResponseMode::Query,
        }
    }
}

/// `response_type` values accepted in implicit mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImplicitResponseType {
    #[serde(rename = "token")]
    Token,
    #[serde(rename = "id_token")]
    IdToken,
    #[default]
    #[serde(rename = "token id_token")]
    TokenIdToken,
}

impl ImplicitResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImplicitResponseType::Token => "token",
            ImplicitResponseType::IdToken => "id_token",
            ImplicitResponseType::TokenIdToken => "token id_token",
        }
    }

    pub fn requires_access_token(&self) -> bool {
        matches!(
            self,
            ImplicitResponseType::Token | ImplicitResponseType::TokenIdToken
        )
    }

    pub fn requires_id_token(&self) -> bool {
        matches!(
            self,
            ImplicitResponseType::IdToken | ImplicitResponseType::TokenIdToken
        )
    }
}

impl std::str::FromStr for RedirectResponseMode {
    type Err = InvalidFlowValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fragment" | "hash" => Ok(RedirectResponseMode::Fragment),
            "query" | "search" => Ok(RedirectResponseMode::Query),
            other => Err(InvalidFlowValue(other.to_owned())),
        }
    }
}

impl std::str::FromStr for ImplicitResponseType {
    type Err = InvalidFlowValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<&str> = s.split_whitespace().collect();
        parts.sort_unstable();
        match parts.as_slice() {
            ["token"] => Ok(ImplicitResponseType::Token),
            ["id_token"] => Ok(ImplicitResponseType::IdToken),
            ["id_token", "token"] => Ok(ImplicitResponseType::TokenIdToken),
            _ => Err(InvalidFlowValue(s.to_owned())),
        }
    }
}

impl std::fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for RedirectResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", ResponseMode::from(*self))
    }
}

impl std::fmt::Display for ImplicitResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported when parsing an unsupported response mode or response type.
#[derive(Debug, thiserror::Error)]
#[error("unsupported flow value '{0}'")]
pub struct InvalidFlowValue(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_response_types() {
        assert_eq!(
            "token".parse::<ImplicitResponseType>().unwrap(),
            ImplicitResponseType::Token
        );
        assert_eq!(
            "id_token".parse::<ImplicitResponseType>().unwrap(),
            ImplicitResponseType::IdToken
        );
        assert_eq!(
            "id_token token".parse::<ImplicitResponseType>().unwrap(),
            ImplicitResponseType::TokenIdToken
        );
        assert!("code".parse::<ImplicitResponseType>().is_err());
    }

    #[test]
    fn id_token_only_does_not_require_access_token() {
        assert!(!ImplicitResponseType::IdToken.requires_access_token());
        assert!(ImplicitResponseType::IdToken.requires_id_token());
        assert!(ImplicitResponseType::Token.requires_access_token());
        assert!(!ImplicitResponseType::Token.requires_id_token());
    }

    #[test]
    fn redirect_modes() {
        assert_eq!(
            "Query".parse::<RedirectResponseMode>().unwrap(),
            RedirectResponseMode::Query
        );
        assert_eq!(RedirectResponseMode::Fragment.to_string(), "fragment");
        let err = "form_post".parse::<RedirectResponseMode>().unwrap_err();
        assert_eq!(err.0, "form_post");
    }
}
