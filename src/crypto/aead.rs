//! AES-256-GCM envelope.
//!
//! Wire format: `[nonce(12)][tag(16)][ciphertext(N)]`, no length prefix. A
//! fresh random nonce is drawn for every call to [`seal`].

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use rand::RngCore;

use crate::error::{Result, SyncError};

/// Nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Smallest well-formed envelope (empty plaintext).
pub const MIN_SEALED_LEN: usize = NONCE_LEN + TAG_LEN;

/// Encrypt `plaintext` under a 256-bit `key`.
pub fn seal(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SyncError::encryption(format!("invalid key: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce_bytes), b"", &mut buffer)
        .map_err(|_| SyncError::encryption("encryption failed"))?;

    let mut sealed = Vec::with_capacity(MIN_SEALED_LEN + buffer.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&tag);
    sealed.extend_from_slice(&buffer);
    Ok(sealed)
}

/// Decrypt an envelope produced by [`seal`].
///
/// Input shorter than nonce + tag is rejected before any verification. A tag
/// mismatch always yields [`SyncError::Authentication`] with no detail.
pub fn open(sealed: &[u8], key: &[u8; 32]) -> Result<Vec<u8>> {
    if sealed.len() < MIN_SEALED_LEN {
        return Err(SyncError::encryption(format!(
            "sealed data too short ({} bytes, need at least {})",
            sealed.len(),
            MIN_SEALED_LEN
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SyncError::encryption(format!("invalid key: {}", e)))?;

    let (nonce_bytes, rest) = sealed.split_at(NONCE_LEN);
    let (tag_bytes, ciphertext) = rest.split_at(TAG_LEN);

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce_bytes),
            b"",
            &mut buffer,
            Tag::from_slice(tag_bytes),
        )
        .map_err(|_| SyncError::Authentication)?;

    Ok(buffer)
}
