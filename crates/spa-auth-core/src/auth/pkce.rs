//! Proof Key for Code Exchange (RFC 7636) material for one authorization request.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

const VERIFIER_ENTROPY_BYTES: usize = 32;

/// How the challenge is derived from the verifier. `plain` is never offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChallengeMethod {
    #[default]
    S256,
}

impl ChallengeMethod {
    /// Value of the `code_challenge_method` parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeMethod::S256 => "S256",
        }
    }

    pub fn derive(self, verifier: &str) -> String {
        match self {
            ChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
        }
    }
}

/// Verifier kept by the client and the challenge sent with the authorization request.
#[derive(Debug, Clone)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
    method: ChallengeMethod,
}

impl PkcePair {
    pub fn generate() -> Self {
        let mut entropy = [0u8; VERIFIER_ENTROPY_BYTES];
        rand::thread_rng().fill_bytes(&mut entropy);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(entropy))
    }

    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let method = ChallengeMethod::default();
        Self {
            challenge: method.derive(&verifier),
            verifier,
            method,
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn method(&self) -> ChallengeMethod {
        self.method
    }

    /// Keep only the verifier, which is all the token exchange needs.
    pub fn into_verifier(self) -> String {
        self.verifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_verifier_uses_unreserved_alphabet() {
        let pair = PkcePair::generate();
        // 32 bytes of entropy encode to 43 characters.
        assert_eq!(pair.verifier().len(), 43);
        assert!(pair
            .verifier()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(pair.method().as_str(), "S256");
        assert_ne!(pair.verifier(), PkcePair::generate().verifier());
    }

    #[test]
    fn known_verifier_yields_known_challenge() {
        let pair = PkcePair::from_verifier("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(pair.challenge(), "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
        assert_eq!(
            pair.into_verifier(),
            "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"
        );
    }
}
