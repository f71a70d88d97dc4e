//! OpenSSL-compatible salted AES-256-CBC envelopes
//!
//! Envelope format (base64 standard alphabet on the wire):
//! ```text
//! [8 bytes: "Salted__"][8 bytes: random salt][N*16 bytes: AES-256-CBC ciphertext, PKCS#7]
//! ```

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use folio_core::{FolioError, FolioResult};
use md5::{Digest, Md5};
use rand::RngCore;
use zeroize::Zeroize;

use crate::passphrase::Passphrase;
use crate::{BLOCK_SIZE, IV_LEN, KEY_LEN, MAGIC_PREFIX, SALT_LEN};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Key and IV for one envelope. Zeroized on drop.
pub struct KeyMaterial {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl KeyMaterial {
    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

/// EVP_BytesToKey with MD5 and a single iteration.
///
/// `D0 = md5(passphrase || salt)`, `Dn = md5(D(n-1) || passphrase || salt)`;
/// the concatenation is split into key then iv.
pub fn derive_key(passphrase: &[u8], salt: &[u8]) -> KeyMaterial {
    let mut material = Vec::with_capacity(KEY_LEN + IV_LEN + 16);
    let mut block: Vec<u8> = Vec::new();

    while material.len() < KEY_LEN + IV_LEN {
        let mut hasher = Md5::new();
        hasher.update(&block);
        hasher.update(passphrase);
        hasher.update(salt);
        block = hasher.finalize().to_vec();
        material.extend_from_slice(&block);
    }

    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&material[..KEY_LEN]);
    iv.copy_from_slice(&material[KEY_LEN..KEY_LEN + IV_LEN]);
    material.zeroize();
    block.zeroize();

    KeyMaterial { key, iv }
}

/// Encrypt `plaintext` under a fresh random salt and return the base64 envelope.
pub fn encrypt(passphrase: &Passphrase, plaintext: &[u8]) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    encrypt_with_salt(passphrase, plaintext, &salt)
}

/// Encrypt with a caller-chosen salt. Only useful for reproducible output;
/// [`encrypt`] is the normal entry point.
pub fn encrypt_with_salt(passphrase: &Passphrase, plaintext: &[u8], salt: &[u8; SALT_LEN]) -> String {
    let material = derive_key(passphrase.as_bytes(), salt);
    let ciphertext = Aes256CbcEnc::new(material.key().into(), material.iv().into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut envelope = Vec::with_capacity(MAGIC_PREFIX.len() + SALT_LEN + ciphertext.len());
    envelope.extend_from_slice(MAGIC_PREFIX);
    envelope.extend_from_slice(salt);
    envelope.extend_from_slice(&ciphertext);
    STANDARD.encode(envelope)
}

/// Decrypt a base64 envelope.
///
/// The first 8 decoded bytes are the magic marker and are not checked.
pub fn decrypt(passphrase: &Passphrase, envelope: &str) -> FolioResult<Vec<u8>> {
    let raw = STANDARD
        .decode(envelope.trim())
        .map_err(|e| FolioError::Decryption(format!("envelope base64 decode: {e}")))?;

    let header_len = MAGIC_PREFIX.len() + SALT_LEN;
    if raw.len() < header_len + BLOCK_SIZE {
        return Err(FolioError::Decryption(format!(
            "envelope too short: {} bytes (minimum {})",
            raw.len(),
            header_len + BLOCK_SIZE
        )));
    }

    let salt = &raw[MAGIC_PREFIX.len()..header_len];
    let ciphertext = &raw[header_len..];
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(FolioError::Decryption(format!(
            "ciphertext length {} is not a multiple of {BLOCK_SIZE}",
            ciphertext.len()
        )));
    }

    let material = derive_key(passphrase.as_bytes(), salt);
    Aes256CbcDec::new(material.key().into(), material.iv().into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| FolioError::Decryption("invalid padding: wrong passphrase or corrupted data".into()))
}

/// [`decrypt`] followed by UTF-8 validation.
pub fn decrypt_to_string(passphrase: &Passphrase, envelope: &str) -> FolioResult<String> {
    let plaintext = decrypt(passphrase, envelope)?;
    String::from_utf8(plaintext)
        .map_err(|e| FolioError::Decryption(format!("plaintext is not UTF-8: {e}")))
}
