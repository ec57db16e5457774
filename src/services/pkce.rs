// PKCE (RFC 7636) helpers for the OAuth authorization-code flow.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

/// Random bytes behind each verifier (43 base64url characters).
const VERIFIER_BYTES: usize = 32;

/// A code verifier and its S256 challenge.
pub struct PkcePair {
    pub verifier: Zeroizing<String>,
    pub challenge: String,
}

/// Generates a fresh verifier/challenge pair.
pub fn generate() -> Result<PkcePair, ring::error::Unspecified> {
    let rng = SystemRandom::new();
    let mut bytes = Zeroizing::new([0u8; VERIFIER_BYTES]);
    rng.fill(&mut bytes[..])?;
    let verifier = Zeroizing::new(URL_SAFE_NO_PAD.encode(&bytes[..]));
    let challenge = challenge_for(&verifier);
    Ok(PkcePair { verifier, challenge })
}

/// Computes `BASE64URL(SHA256(verifier))`.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(digest(&SHA256, verifier.as_bytes()).as_ref())
}
