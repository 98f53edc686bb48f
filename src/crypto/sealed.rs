//! Hybrid-encrypted envelopes for pairwise seeds.
//!
//! Each outbound message gets a fresh `ChaCha20-Poly1305` session key. The
//! session key is wrapped for the recipient with a `C25519` sealed box and
//! the payload is encrypted under the session key in detached mode, which
//! yields the four opaque byte strings carried on the wire: wrapped key,
//! nonce, tag, ciphertext.

use serde::{Deserialize, Serialize};
use sodiumoxide::crypto::{aead::chacha20poly1305_ietf as aead, sealedbox};
use thiserror::Error;

use super::{KeyPair, PublicKey};

/// Number of bytes of the symmetric session key.
pub const SESSION_KEY_BYTES: usize = aead::KEYBYTES;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum CryptoError {
    #[error("failed to unwrap the session key")]
    Unwrap,

    #[error("the session key is malformed")]
    MalformedKey,

    #[error("the nonce or tag is malformed")]
    MalformedBundle,

    #[error("authenticated decryption failed")]
    Aead,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
/// A hybrid-encrypted payload, opaque to everyone but its recipient.
pub struct SealedBundle {
    wrapped_key: Vec<u8>,
    nonce: Vec<u8>,
    tag: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl SealedBundle {
    /// Encrypt `plaintext` for the holder of the secret key matching
    /// `recipient_pk`.
    ///
    /// A fresh session key and nonce are drawn for every call, so sealing
    /// the same plaintext twice never produces the same bundle.
    pub fn seal(recipient_pk: &PublicKey, plaintext: &[u8]) -> Self {
        let key = aead::gen_key();
        let nonce = aead::Nonce::from_slice(&sodiumoxide::randombytes::randombytes(
            aead::NONCEBYTES,
        ))
        .expect("randombytes always yields the correct nonce length");
        let wrapped_key = sealedbox::seal(key.as_ref(), recipient_pk.as_box_key());
        let mut ciphertext = plaintext.to_vec();
        let tag = aead::seal_detached(&mut ciphertext, None, &nonce, &key);
        Self {
            wrapped_key,
            nonce: nonce.as_ref().to_vec(),
            tag: tag.as_ref().to_vec(),
            ciphertext,
        }
    }

    /// Decrypt the bundle with the recipient's key pair.
    ///
    /// # Errors
    /// Fails with [`CryptoError`] if the wrapped session key cannot be
    /// recovered or if tag verification rejects the ciphertext.
    pub fn open(&self, keys: &KeyPair) -> Result<Vec<u8>, CryptoError> {
        let key_bytes = sealedbox::open(
            &self.wrapped_key,
            keys.public.as_box_key(),
            keys.secret.as_box_key(),
        )
        .or(Err(CryptoError::Unwrap))?;
        let key = aead::Key::from_slice(&key_bytes).ok_or(CryptoError::MalformedKey)?;
        let nonce = aead::Nonce::from_slice(&self.nonce).ok_or(CryptoError::MalformedBundle)?;
        let tag = aead::Tag::from_slice(&self.tag).ok_or(CryptoError::MalformedBundle)?;
        let mut plaintext = self.ciphertext.clone();
        aead::open_detached(&mut plaintext, None, &tag, &nonce, &key)
            .or(Err(CryptoError::Aead))?;
        Ok(plaintext)
    }
}
