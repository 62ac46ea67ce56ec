//! State token and PKCE (RFC 7636) generation
//!
//! State tokens and code verifiers come straight from the OS-seeded CSPRNG and
//! are encoded as URL-safe base64 without padding, so they can be placed in a
//! query string without escaping. The S256 challenge is what the provider
//! receives in the authorization URL; the verifier is only revealed at token
//! exchange time.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Only challenge method this crate issues.
pub const CHALLENGE_METHOD: &str = "S256";

/// Random bytes behind a state token (256 bits).
const STATE_BYTES: usize = 32;

/// Random bytes behind a code verifier. 64 bytes encode to 86 characters,
/// inside the 43..=128 range RFC 7636 allows.
const VERIFIER_BYTES: usize = 64;

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(bytes.as_mut_slice());
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Generate an opaque state token (43 characters).
pub fn generate_state() -> String {
    random_token(STATE_BYTES)
}

/// Generate a PKCE code verifier (86 characters).
pub fn generate_verifier() -> String {
    random_token(VERIFIER_BYTES)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}
