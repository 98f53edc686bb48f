//! The coordinator: admission, round barriers, relay and aggregation.
//!
//! # Overview
//!
//! The coordinator admits exactly `N` connections per session and drives the
//! protocol through its rounds:
//!
//! ```text
//! AwaitingConnections --(N connected)--------> AwaitingKeys
//! AwaitingKeys        --(N public keys)------> AwaitingPerturbations
//! AwaitingPerturbations --(N bundle sets)----> AwaitingValues
//! AwaitingValues      --(N masked vectors)---> broadcast + reset
//! ```
//!
//! Public keys may already arrive while connections are still being
//! admitted, so `public_key` frames are accepted in the first two phases.
//! Each barrier is crossed exactly once, by whichever connection task files
//! the last missing piece; that task also queues the resulting broadcast or
//! scatter. Everything a client sends in the wrong phase is logged and
//! dropped without closing the connection.
//!
//! The coordinator never opens a seed bundle: `perturbations` payloads are
//! relayed as opaque ciphertext between the clients that can actually read
//! them.
//!
//! # Known limitation
//!
//! There are no per-round timeouts and no dropout recovery. A client that
//! disconnects before submitting its masked vector leaves the session
//! waiting forever; the remaining clients observe the missing
//! `aggregation_result` frame as the only failure signal. Restarting the
//! coordinator process is the recovery path.

mod service;
mod session;

pub use self::{
    service::{bind_and_serve, serve, Coordinator, TURNED_AWAY},
    session::{
        Command,
        ConnectionHandle,
        Phase,
        ProtocolError,
        Session,
        SessionFull,
        SessionParams,
    },
};
