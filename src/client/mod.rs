//! The client: one participant instance driving one connection.
//!
//! [`Participant`] is the synchronous protocol core: it owns the key pair
//! and the seed bookkeeping, and turns coordinator frames into the
//! responses the protocol requires. [`Client`] wraps it with the framed TCP
//! connection and the phase sequencing:
//!
//! ```text
//! Connecting --(init_base_param)-------> KeyExchange
//! KeyExchange --(public_key_broadcast)-> SeedExchange
//! SeedExchange --(perturbations)-------> Submitting
//! Submitting --(aggregation_result)----> done
//! ```
//!
//! `message` frames are informational and never advance the state machine;
//! any other frame received out of phase is logged and dropped.

mod client;
mod participant;

use thiserror::Error;

pub use self::{client::Client, participant::Participant};

use crate::{
    crypto::CryptoError,
    mask::SeedParseError,
    message::DecodeError,
    ClientId,
    InitError,
};

#[derive(Debug, Error)]
/// A client-side failure. Crypto and seed errors abort the run: a client
/// that cannot read one of its peer seeds can no longer produce a correct
/// masked value.
pub enum ClientError {
    #[error("failed to initialise participant: {0}")]
    Init(#[from] InitError),

    #[error("no session base received yet")]
    NoBase,

    #[error("the broadcast key directory does not contain this client")]
    NotInDirectory,

    #[error("no seed was exchanged with peer {0}")]
    MissingSeed(ClientId),

    #[error("failed to decrypt a peer seed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("malformed peer seed: {0}")]
    Seed(#[from] SeedParseError),

    #[error("transport failure: {0}")]
    Transport(#[from] DecodeError),

    #[error("connection closed before the aggregation result arrived")]
    ConnectionClosed,

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
