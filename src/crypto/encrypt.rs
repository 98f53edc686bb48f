//! Asymmetric key pairs for the seed exchange.
//!
//! A client generates one `C25519` pair per run and publishes the public
//! half through the coordinator. Peers never encrypt payloads directly under
//! this key; it only wraps the per-message session key of a
//! [`SealedBundle`](crate::crypto::SealedBundle).

use derive_more::{AsMut, AsRef, From};
use serde::{Deserialize, Serialize};
use sodiumoxide::crypto::box_;

use super::ByteObject;

/// Generates a new random `C25519` key pair for the seed exchange.
pub fn generate_encrypt_key_pair() -> (PublicKey, SecretKey) {
    let (pk, sk) = box_::gen_keypair();
    (PublicKey(pk), SecretKey(sk))
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let (public, secret) = generate_encrypt_key_pair();
        Self { public, secret }
    }
}

#[derive(
    AsRef,
    AsMut,
    From,
    Serialize,
    Deserialize,
    Hash,
    Eq,
    Ord,
    PartialEq,
    Copy,
    Clone,
    PartialOrd,
    Debug,
)]
/// A `C25519` public key. Its serialized form is the opaque 32-byte string
/// that travels in `public_key` and `public_key_broadcast` frames.
pub struct PublicKey(box_::PublicKey);

impl ByteObject for PublicKey {
    fn zeroed() -> Self {
        Self(box_::PublicKey([0_u8; box_::PUBLICKEYBYTES]))
    }

    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        box_::PublicKey::from_slice(bytes).map(Self)
    }
}

impl PublicKey {
    /// Length in bytes of this public key.
    pub const LENGTH: usize = box_::PUBLICKEYBYTES;

    pub(crate) fn as_box_key(&self) -> &box_::PublicKey {
        &self.0
    }
}

#[derive(AsRef, AsMut, From, Serialize, Deserialize, Eq, PartialEq, Clone, Debug)]
/// A `C25519` secret key. Never leaves the client that generated it.
///
/// When this goes out of scope, its contents will be zeroed out.
pub struct SecretKey(box_::SecretKey);

impl SecretKey {
    /// Length in bytes of this secret key.
    pub const LENGTH: usize = box_::SECRETKEYBYTES;

    /// Computes the corresponding public key for this secret key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }

    pub(crate) fn as_box_key(&self) -> &box_::SecretKey {
        &self.0
    }
}

impl ByteObject for SecretKey {
    fn zeroed() -> Self {
        Self(box_::SecretKey([0_u8; box_::SECRETKEYBYTES]))
    }

    fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        box_::SecretKey::from_slice(bytes).map(Self)
    }
}
