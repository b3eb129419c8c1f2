//! Credential cipher.
//!
//! AES-256-GCM with a fresh random 96-bit nonce per message. The sealed
//! output is `nonce || ciphertext || tag`, encoded as URL-safe base64.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

use crate::errors::{AppError, AppResult};

/// Required key length in bytes.
pub const KEY_LEN: usize = 32;

/// A 32-byte symmetric key.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Wraps raw key bytes. Anything other than exactly 32 bytes is rejected.
    pub fn from_bytes(bytes: &[u8]) -> AppResult<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            AppError::InvalidEncryptionKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Decodes a standard base64 key.
    pub fn from_base64(encoded: &str) -> AppResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| AppError::InvalidEncryptionKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    fn aead_key(&self) -> AppResult<LessSafeKey> {
        let unbound = UnboundKey::new(&AES_256_GCM, &self.0)
            .map_err(|_| AppError::InvalidEncryptionKey("rejected by AES-256-GCM".into()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Seals `plaintext` under `key`.
pub fn encrypt(plaintext: &str, key: &EncryptionKey) -> AppResult<String> {
    let sealing_key = key.aead_key()?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| AppError::Internal("system random source unavailable".into()))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.as_bytes().to_vec();
    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| AppError::Internal("encryption failed".into()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&in_out);
    Ok(URL_SAFE.encode(sealed))
}

/// Opens a value produced by [`encrypt`].
///
/// # Errors
/// `DecryptFailed` on bad base64, input shorter than a nonce, authentication
/// failure, or non-UTF-8 plaintext.
pub fn decrypt(ciphertext: &str, key: &EncryptionKey) -> AppResult<String> {
    let opening_key = key.aead_key()?;

    let data = URL_SAFE
        .decode(ciphertext)
        .map_err(|_| AppError::DecryptFailed)?;
    if data.len() < NONCE_LEN {
        return Err(AppError::DecryptFailed);
    }

    let (nonce_bytes, sealed) = data.split_at(NONCE_LEN);
    let nonce =
        Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| AppError::DecryptFailed)?;
    let mut in_out = sealed.to_vec();
    let plaintext = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| AppError::DecryptFailed)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| AppError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EncryptionKey {
        EncryptionKey::from_bytes(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let key = key();
        for text in [
            "",
            "postgres://u:p@localhost:5432/db?sslmode=disable",
            "日本語 ünïcödé",
        ] {
            let sealed = encrypt(text, &key).unwrap();
            assert_eq!(decrypt(&sealed, &key).unwrap(), text);
        }
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let key = key();
        assert_ne!(encrypt("same", &key).unwrap(), encrypt("same", &key).unwrap());
    }

    #[test]
    fn test_flipped_byte_fails_authentication() {
        let key = key();
        let sealed = encrypt("secret", &key).unwrap();
        let mut raw = URL_SAFE.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = URL_SAFE.encode(raw);
        assert!(matches!(decrypt(&tampered, &key), Err(AppError::DecryptFailed)));
    }

    #[test]
    fn test_flipped_nonce_byte_fails() {
        let key = key();
        let mut raw = URL_SAFE.decode(encrypt("secret", &key).unwrap()).unwrap();
        raw[0] ^= 0x80;
        assert!(matches!(
            decrypt(&URL_SAFE.encode(raw), &key),
            Err(AppError::DecryptFailed)
        ));
    }

    #[test]
    fn test_undersized_input() {
        let short = URL_SAFE.encode([1u8; NONCE_LEN - 1]);
        assert!(matches!(decrypt(&short, &key()), Err(AppError::DecryptFailed)));
        assert!(matches!(decrypt("", &key()), Err(AppError::DecryptFailed)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt("secret", &key()).unwrap();
        let other = EncryptionKey::from_bytes(&[8u8; KEY_LEN]).unwrap();
        assert!(matches!(decrypt(&sealed, &other), Err(AppError::DecryptFailed)));
    }

    #[test]
    fn test_key_length_enforced() {
        assert!(EncryptionKey::from_bytes(&[0u8; 31]).is_err());
        assert!(EncryptionKey::from_bytes(&[0u8; 33]).is_err());
        assert!(EncryptionKey::from_base64("not base64!").is_err());
    }
}
