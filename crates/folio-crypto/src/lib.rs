//! folio-crypto: message envelope encryption for the page delivery protocol
//!
//! Every `loadPage` request travels as an OpenSSL-compatible envelope:
//! ```text
//! base64( "Salted__" || salt (8 bytes) || AES-256-CBC(PKCS#7(plaintext)) )
//! key || iv = EVP_BytesToKey(MD5, passphrase, salt)
//! ```
//!
//! The passphrase is bound to the session: it is derived from the bearer
//! token's `sub` claim mixed with two embedded constants (see [`passphrase`]).

pub mod cipher;
pub mod passphrase;

pub use cipher::{
    decrypt, decrypt_to_string, derive_key, encrypt, encrypt_with_salt, KeyMaterial,
};
pub use passphrase::{derive_passphrase, Passphrase};

/// AES-256 key length in bytes
pub const KEY_LEN: usize = 32;

/// CBC initialisation vector length in bytes
pub const IV_LEN: usize = 16;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Envelope salt length in bytes
pub const SALT_LEN: usize = 8;

/// Marker that opens every envelope, ahead of the salt
pub const MAGIC_PREFIX: &[u8; 8] = b"Salted__";
