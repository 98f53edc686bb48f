//! Wrappers around the `sodiumoxide` primitives used by the protocol.
//!
//! [`KeyPair`] is the long-term asymmetric identity of a client within a
//! session; [`SealedBundle`] is the hybrid-encrypted envelope that carries a
//! pairwise seed through the coordinator without disclosing it to the
//! coordinator.

mod encrypt;
mod sealed;

pub use self::{
    encrypt::{generate_encrypt_key_pair, KeyPair, PublicKey, SecretKey},
    sealed::{CryptoError, SealedBundle, SESSION_KEY_BYTES},
};

pub trait ByteObject: Sized {
    /// Create a new object with all the bytes initialized to `0`.
    fn zeroed() -> Self;

    /// Get the object byte representation.
    fn as_slice(&self) -> &[u8];

    /// Create an object from the given buffer. This function will fail and
    /// return `None` if the length of the byte-slice isn't equal to the
    /// length of the object.
    fn from_slice(bytes: &[u8]) -> Option<Self>;

    /// Create an object from the given buffer.
    ///
    /// # Panic
    ///
    /// This function will panic if the length of the byte-slice isn't equal
    /// to the length of the object.
    fn from_slice_unchecked(bytes: &[u8]) -> Self {
        Self::from_slice(bytes).unwrap()
    }
}
