//! Session passphrase: bearer token claim → SHA-256 → XOR with embedded constants
//!
//! `EMBEDDED_SECONDARY` is a placeholder, not the delivery service's value.
//! Passphrases derived here are self-consistent (client and simulated server
//! agree) but will not match what the live service expects until it is
//! replaced with the real constant.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use folio_core::{FolioError, FolioResult};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// JWT claim carrying the per-session secret
pub const SESSION_CLAIM: &str = "sub";

/// First embedded constant. On its own it is the service's public passphrase.
const EMBEDDED_PRIMARY: [u8; 36] = [
    0x45, 0x5a, 0x2c, 0x78, 0x34, 0x57, 0x74, 0x51, 0x10, 0x1b, 0x68, 0x52, 0x7f, 0x7f, 0x52, 0x0c,
    0x64, 0x44, 0x52, 0x73, 0x2a, 0x33, 0x37, 0x0f, 0x76, 0x00, 0x5e, 0x02, 0x0e, 0x2d, 0x41, 0x58,
    0x11, 0x56, 0x09, 0x0a,
];

/// Second embedded constant (placeholder value)
const EMBEDDED_SECONDARY: [u8; 20] = [
    0x1f, 0x3a, 0x5c, 0x7e, 0x92, 0xb4, 0xd6, 0xf8, 0x01, 0x13, 0x35, 0x57, 0x79, 0xbb, 0xdd, 0xff,
    0x02, 0x46, 0x8a, 0xce,
];

/// Passphrase fed to the envelope KDF. Zeroized on drop.
#[derive(Clone)]
pub struct Passphrase {
    bytes: Vec<u8>,
}

impl Passphrase {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The static passphrase used for envelopes that are not bound to a session.
    pub fn public() -> Self {
        Self::from_bytes(EMBEDDED_PRIMARY.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for Passphrase {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passphrase")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive the session passphrase from a bearer token.
///
/// The token signature is NOT verified: the token only carries the claim,
/// and nothing here makes an authorization decision on it.
pub fn derive_passphrase(bearer_token: &str) -> FolioResult<Passphrase> {
    let claim = session_claim(bearer_token)?;

    // UTF-16 code units truncated to their low byte
    let folded: Vec<u8> = claim.encode_utf16().map(|unit| unit as u8).collect();
    let digest = Sha256::digest(&folded);

    let mut star = xor_cycle(&EMBEDDED_PRIMARY, &EMBEDDED_SECONDARY);
    let passphrase = Passphrase::from_bytes(xor_cycle(&star, &digest));
    star.zeroize();
    Ok(passphrase)
}

/// Extract [`SESSION_CLAIM`] from the token payload without verifying the signature.
fn session_claim(token: &str) -> FolioResult<String> {
    let parts: Vec<&str> = token.trim().split('.').collect();
    if parts.len() != 3 {
        return Err(FolioError::Token(format!(
            "expected 3 dot-separated parts, got {}",
            parts.len()
        )));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| FolioError::Token(format!("payload base64 decode: {e}")))?;

    let claims: serde_json::Value = serde_json::from_slice(&payload)
        .map_err(|e| FolioError::Token(format!("payload JSON parse: {e}")))?;

    claims
        .get(SESSION_CLAIM)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| FolioError::Token(format!("missing string claim `{SESSION_CLAIM}`")))
}

/// Position-wise XOR; the shorter operand is repeated to the longer one's length.
pub fn xor_cycle(a: &[u8], b: &[u8]) -> Vec<u8> {
    if a.is_empty() {
        return b.to_vec();
    }
    if b.is_empty() {
        return a.to_vec();
    }
    let len = a.len().max(b.len());
    (0..len).map(|i| a[i % a.len()] ^ b[i % b.len()]).collect()
}
