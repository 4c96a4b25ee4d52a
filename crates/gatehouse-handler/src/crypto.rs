//! Symmetric cipher shared by service tokens, the Basic bridge and `encrypt()`.
//!
//! [`AesGcmCipher`] derives an AES-256 key from the configured `key` with
//! SHA-256 and emits `base64(nonce ‖ ciphertext ‖ tag)`.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use gatehouse_rules::Encryptor;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

use crate::error::{HandlerError, HandlerResult};

/// Symmetric encryption collaborator.
pub trait Cipher: Send + Sync {
    /// Encrypt `plaintext` into a printable token.
    fn encrypt(&self, plaintext: &str) -> HandlerResult<String>;

    /// Decrypt a token produced by [`Cipher::encrypt`].
    fn decrypt(&self, token: &str) -> HandlerResult<String>;
}

/// AES-256-GCM with a SHA-256 derived key.
pub struct AesGcmCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl AesGcmCipher {
    /// Cipher keyed by `secret`.
    pub fn new(secret: &str) -> HandlerResult<Self> {
        let digest = Sha256::digest(secret.as_bytes());
        let key = UnboundKey::new(&AES_256_GCM, digest.as_slice())
            .map_err(|_| HandlerError::cipher("invalid key length"))?;
        Ok(Self {
            key: LessSafeKey::new(key),
            rng: SystemRandom::new(),
        })
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> HandlerResult<String> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| HandlerError::cipher("random source unavailable"))?;

        let mut buffer = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut buffer,
            )
            .map_err(|_| HandlerError::cipher("encryption failed"))?;

        let mut token = Vec::with_capacity(NONCE_LEN + buffer.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&buffer);
        Ok(STANDARD.encode(token))
    }

    fn decrypt(&self, token: &str) -> HandlerResult<String> {
        let raw = STANDARD
            .decode(token.trim())
            .map_err(|e| HandlerError::cipher(format!("invalid token encoding: {e}")))?;
        if raw.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(HandlerError::cipher("token too short"));
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| HandlerError::cipher("invalid nonce"))?;
        let mut buffer = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut buffer)
            .map_err(|_| HandlerError::cipher("token authentication failed"))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| HandlerError::cipher("plaintext is not UTF-8"))
    }
}

/// Exposes a [`Cipher`] to rule expressions as `encrypt()`.
pub struct CipherEncryptor(pub Arc<dyn Cipher>);

impl Encryptor for CipherEncryptor {
    fn encrypt(&self, plaintext: &str) -> Result<String, String> {
        self.0.encrypt(plaintext).map_err(|e| e.to_string())
    }
}
