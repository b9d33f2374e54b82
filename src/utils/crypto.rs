//! Symmetric encryption for restricted wish fields.
//!
//! Ciphertext layout: base64(nonce || sealed bytes || tag), AES-256-GCM with a
//! random 96-bit nonce per value. The key is the SHA-256 digest of the
//! configured secret.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ring::aead::{self, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::AppError;

const TAG_LEN: usize = 16;

pub struct Cipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl Cipher {
    pub fn new(secret: &str) -> Result<Self, AppError> {
        if secret.is_empty() {
            return Err(AppError::InternalServerError(
                "Encryption secret must not be empty".to_string(),
            ));
        }
        let key_bytes = digest::digest(&digest::SHA256, secret.as_bytes());
        let unbound = UnboundKey::new(&aead::AES_256_GCM, key_bytes.as_ref())
            .map_err(|_| AppError::InternalServerError("Failed to create AES key".to_string()))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypts a string and returns the base64 encoded nonce + ciphertext.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| AppError::InternalServerError("Nonce generation failed".to_string()))?;

        let mut buffer = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut buffer,
            )
            .map_err(|_| AppError::InternalServerError("Encryption failed".to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&buffer);
        Ok(BASE64.encode(sealed))
    }

    /// Decrypts a value produced by [`Cipher::encrypt`].
    ///
    /// Values that are not valid ciphertext (for example rows written before
    /// encryption was introduced) are returned unchanged.
    pub fn decrypt(&self, ciphertext: &str) -> String {
        self.try_decrypt(ciphertext)
            .unwrap_or_else(|| ciphertext.to_string())
    }

    pub fn try_decrypt(&self, ciphertext: &str) -> Option<String> {
        let sealed = BASE64.decode(ciphertext).ok()?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return None;
        }

        let (nonce_bytes, encrypted) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes).ok()?;
        let mut buffer = encrypted.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .ok()?;

        String::from_utf8(plaintext.to_vec()).ok()
    }
}

/// Hex encoded SHA-256 of a file body, used as its content-addressed name.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, bytes).as_ref())
}
