//! PKCE (RFC 7636) and state generation

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// Code challenge method advertised in authorization requests
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Generate a random state parameter for CSRF binding.
///
/// 32 random bytes, base64url without padding (43 chars). Carries no payload.
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Generate a PKCE code verifier.
///
/// 32 random bytes encode to 43 unreserved characters, the RFC 7636 minimum.
#[must_use]
pub fn generate_code_verifier() -> String {
    let verifier_bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(verifier_bytes)
}

/// Derive the S256 code challenge for a verifier
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_unreserved(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
    }

    #[test]
    fn challenge_matches_rfc7636_appendix_b() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            generate_code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn challenge_is_deterministic() {
        let verifier = generate_code_verifier();
        assert_eq!(
            generate_code_challenge(&verifier),
            generate_code_challenge(&verifier)
        );
    }

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let verifier = generate_code_verifier();
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(generate_code_challenge(&verifier), expected);
    }

    #[test]
    fn verifier_within_rfc7636_bounds() {
        for _ in 0..10 {
            let verifier = generate_code_verifier();
            assert!((43..=128).contains(&verifier.len()));
            assert!(verifier.chars().all(is_unreserved), "bad char in {verifier}");
        }
    }

    #[test]
    fn verifiers_are_unique() {
        assert_ne!(generate_code_verifier(), generate_code_verifier());
    }

    #[test]
    fn state_is_base64url_safe() {
        for _ in 0..10 {
            let state = generate_state();
            assert!(!state.contains('+'));
            assert!(!state.contains('/'));
            assert!(!state.contains('='));
            assert_eq!(state.len(), 43);
        }
    }

    #[test]
    fn states_are_unique() {
        assert_ne!(generate_state(), generate_state());
    }
}
