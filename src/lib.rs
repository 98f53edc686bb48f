//! # secagg: coordinator-mediated secure vector aggregation
//!
//! A set of `N` clients jointly computes the element-wise modular sum of
//! their private vectors. No individual vector is revealed to the
//! coordinator or to the other clients: each unordered pair of clients
//! agrees on additive masks that cancel out in the final sum, and the
//! pairwise seeds travel through the coordinator only in hybrid-encrypted
//! form, so an honest-but-curious coordinator that does not collude with
//! clients learns nothing beyond the aggregate.
//!
//! The protocol runs in four rounds over one TCP connection per client:
//!
//! 1. every client sends its public encryption key; the coordinator
//!    broadcasts the full key directory once all `N` have arrived,
//! 2. every client draws one random seed per peer, encrypts it for that
//!    peer and submits the bundle set; the coordinator scatters the
//!    bundles to their recipients,
//! 3. every client derives its scalar mask from the exchanged seeds and
//!    submits its masked vector,
//! 4. the coordinator sums the masked vectors, reduces them modulo the
//!    session base and broadcasts the aggregate, then resets for the next
//!    session.
//!
//! The crate ships two binaries, `coordinator` and `client`, both
//! configured through a TOML file (see [`settings`]).

use std::{collections::HashMap, net::SocketAddr};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod client;
pub mod coordinator;
pub mod crypto;
pub mod mask;
pub mod message;
pub mod settings;

use self::crypto::{PublicKey, SealedBundle};

#[derive(Error, Debug)]
#[error("initialization failed: insufficient system entropy to generate secrets")]
/// An error related to insufficient system entropy for secrets at program startup.
pub struct InitError;

/// The identity of a participant within one session.
///
/// Assigned by the coordinator from the transport endpoint of the client's
/// connection, so it is stable and unique for the lifetime of a session.
#[derive(
    Display, Debug, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct ClientId(String);

impl From<SocketAddr> for ClientId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl ClientId {
    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The directory of client public keys assembled during key exchange. Broadcast
/// to every client once it holds all `N` entries.
pub type KeyDict = HashMap<ClientId, PublicKey>;

/// A set of encrypted seed bundles keyed by a client id.
///
/// Sent by a client, the key is the bundle's recipient; relayed by the
/// coordinator, the key is the bundle's creator. The coordinator cannot open
/// the bundles either way.
pub type BundleDict = HashMap<ClientId, SealedBundle>;
