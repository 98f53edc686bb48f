//! Per-session protocol state.
//!
//! A [`Session`] value holds everything the coordinator knows about one run
//! of the protocol. It is driven by one method per inbound frame kind; each
//! method enforces the phase rules and, when a round barrier is crossed,
//! queues the resulting outbound frames on the affected connections. All
//! methods are synchronous: outbound frames go through unbounded queues, so
//! a session method never suspends while the state is borrowed.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::{
    crypto::PublicKey,
    message::Message,
    BundleDict,
    ClientId,
    KeyDict,
};

/// The immutable parameters of one session.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SessionParams {
    /// The exact number of participants.
    pub threshold: usize,
    /// The modular base for all value and mask arithmetic.
    pub base: u64,
    /// The length of every client vector.
    pub vector_length: usize,
}

/// The discrete round state of a session.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Phase {
    AwaitingConnections,
    AwaitingKeys,
    AwaitingPerturbations,
    AwaitingValues,
}

/// An instruction for the connection task owning the other end of the
/// queue.
#[derive(Debug)]
pub enum Command {
    /// Write this frame to the client.
    Deliver(Message),
    /// Flush and close the connection.
    Hangup,
}

/// The sending half of a connection's outbound queue.
pub type ConnectionHandle = UnboundedSender<Command>;

#[derive(Debug, Error, Eq, PartialEq)]
#[error("enough clients have already connected")]
/// Returned to the admission path when the session already holds its
/// threshold of connections.
pub struct SessionFull;

#[derive(Debug, Error, Eq, PartialEq)]
/// A frame that cannot be applied to the session in its current state. The
/// frame is dropped and the session continues; the connection stays open.
pub enum ProtocolError {
    #[error("`{tag}` frame not accepted in phase {phase:?}")]
    WrongPhase { tag: &'static str, phase: Phase },

    #[error("a public key for this client was already recorded")]
    DuplicateKey,

    #[error("seed bundle addressed to unknown recipient {0}")]
    UnknownRecipient(ClientId),

    #[error("value vector has length {actual}, expected {expected}")]
    ValueLength { actual: usize, expected: usize },

    #[error("unexpected `{0}` frame from a client")]
    UnexpectedFrame(&'static str),
}

/// The coordinator-side state of one protocol run.
pub struct Session {
    params: SessionParams,
    phase: Phase,
    /// Outbound queues of the admitted connections.
    connections: HashMap<ClientId, ConnectionHandle>,
    /// Key directory assembled during key exchange.
    public_keys: KeyDict,
    /// `perturbations[recipient][creator]`: the sealed seed bundles waiting
    /// to be scattered to their recipients.
    perturbations: HashMap<ClientId, BundleDict>,
    received_perturbation_count: usize,
    /// Running element-wise sum of the submitted vectors. 128-bit slots so
    /// `threshold * (base - 1)` cannot overflow before the final reduction.
    agg: Vec<u128>,
    received_value_count: usize,
}

impl Session {
    pub fn new(params: SessionParams) -> Self {
        Self {
            phase: Phase::AwaitingConnections,
            connections: HashMap::new(),
            public_keys: HashMap::new(),
            perturbations: HashMap::new(),
            received_perturbation_count: 0,
            agg: vec![0; params.vector_length],
            received_value_count: 0,
            params,
        }
    }

    pub fn params(&self) -> SessionParams {
        self.params
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True when the session holds no trace of any client, i.e. the
    /// observable state of a freshly created session.
    pub fn is_pristine(&self) -> bool {
        self.phase == Phase::AwaitingConnections
            && self.connections.is_empty()
            && self.public_keys.is_empty()
            && self.perturbations.is_empty()
            && self.received_perturbation_count == 0
            && self.received_value_count == 0
            && self.agg.iter().all(|slot| *slot == 0)
    }

    /// Admits a connection, or rejects it without touching any session
    /// state. Admission closes for good once the threshold was reached,
    /// even if a client leaves afterwards.
    pub fn admit(&mut self, id: ClientId, handle: ConnectionHandle) -> Result<(), SessionFull> {
        if self.phase != Phase::AwaitingConnections
            || self.connections.len() >= self.params.threshold
        {
            return Err(SessionFull);
        }
        deliver(
            &handle,
            Message::InitBaseParam {
                base: self.params.base,
            },
        );
        self.connections.insert(id, handle);
        if self.connections.len() == self.params.threshold {
            self.phase = Phase::AwaitingKeys;
        }
        Ok(())
    }

    /// Removes a closed connection. Nothing else is rolled back: a client
    /// that leaves mid-session leaves the session stuck by design.
    pub fn remove_connection(&mut self, id: &ClientId) {
        self.connections.remove(id);
    }

    /// Records a client's public key; crossing the threshold broadcasts the
    /// completed directory and opens the seed-exchange round.
    pub fn handle_public_key(
        &mut self,
        id: &ClientId,
        public_key: PublicKey,
    ) -> Result<(), ProtocolError> {
        if !matches!(self.phase, Phase::AwaitingConnections | Phase::AwaitingKeys) {
            return Err(ProtocolError::WrongPhase {
                tag: "public_key",
                phase: self.phase,
            });
        }
        if self.public_keys.contains_key(id) {
            return Err(ProtocolError::DuplicateKey);
        }
        self.public_keys.insert(id.clone(), public_key);
        info!(client = %id, keys = self.public_keys.len(), "recorded public key");

        if self.public_keys.len() == self.params.threshold {
            for peer in self.public_keys.keys() {
                self.perturbations.insert(peer.clone(), BundleDict::new());
            }
            self.phase = Phase::AwaitingPerturbations;
            info!("key directory complete, broadcasting it");
            self.broadcast(Message::PublicKeyBroadcast {
                public_keys: self.public_keys.clone(),
            });
        }
        Ok(())
    }

    /// Files a client's sealed seed bundles under their recipients; once
    /// every client has submitted, each recipient is sent its row and the
    /// value round opens.
    pub fn handle_perturbations(
        &mut self,
        id: &ClientId,
        bundles: BundleDict,
    ) -> Result<(), ProtocolError> {
        if self.phase != Phase::AwaitingPerturbations {
            return Err(ProtocolError::WrongPhase {
                tag: "perturbations",
                phase: self.phase,
            });
        }
        // reject the whole frame before filing anything from it
        for recipient in bundles.keys() {
            if !self.perturbations.contains_key(recipient) {
                return Err(ProtocolError::UnknownRecipient(recipient.clone()));
            }
        }
        for (recipient, bundle) in bundles {
            if let Some(row) = self.perturbations.get_mut(&recipient) {
                row.insert(id.clone(), bundle);
            }
        }
        self.received_perturbation_count += 1;
        info!(
            client = %id,
            submitted = self.received_perturbation_count,
            "filed seed bundles"
        );

        if self.received_perturbation_count == self.params.threshold {
            self.phase = Phase::AwaitingValues;
            info!("all seed bundles received, scattering them to their recipients");
            for (recipient, row) in &self.perturbations {
                match self.connections.get(recipient) {
                    Some(handle) => deliver(
                        handle,
                        Message::Perturbations {
                            perturbations: row.clone(),
                        },
                    ),
                    None => warn!(client = %recipient, "recipient is gone, its row is undeliverable"),
                }
            }
        }
        Ok(())
    }

    /// Adds a masked vector into the aggregate. The final submission
    /// reduces the aggregate modulo the base, broadcasts it and hangs up
    /// every connection; the caller then discards this session.
    pub fn handle_value(
        &mut self,
        id: &ClientId,
        value: Vec<u64>,
    ) -> Result<Option<Vec<u64>>, ProtocolError> {
        if self.phase != Phase::AwaitingValues {
            return Err(ProtocolError::WrongPhase {
                tag: "value",
                phase: self.phase,
            });
        }
        if value.len() != self.params.vector_length {
            return Err(ProtocolError::ValueLength {
                actual: value.len(),
                expected: self.params.vector_length,
            });
        }
        for (slot, masked) in self.agg.iter_mut().zip(&value) {
            *slot += u128::from(*masked);
        }
        self.received_value_count += 1;
        info!(client = %id, submitted = self.received_value_count, "added masked vector");

        if self.received_value_count < self.params.threshold {
            return Ok(None);
        }
        let base = u128::from(self.params.base);
        let aggregate: Vec<u64> = self.agg.iter().map(|slot| (slot % base) as u64).collect();
        self.broadcast(Message::AggregationResult {
            aggregation_result: aggregate.clone(),
        });
        self.hangup_all();
        Ok(Some(aggregate))
    }

    /// Queues the identical frame on every connection. Delivery order
    /// across connections is unspecified.
    fn broadcast(&self, message: Message) {
        for handle in self.connections.values() {
            deliver(handle, message.clone());
        }
    }

    /// Queues a close on every connection. The connection tasks deregister
    /// themselves as they wind down.
    fn hangup_all(&self) {
        for handle in self.connections.values() {
            let _ = handle.send(Command::Hangup);
        }
    }
}

fn deliver(handle: &ConnectionHandle, message: Message) {
    // a closed queue means the client is already gone; its handler task
    // removes the connection on its own exit path
    let _ = handle.send(Command::Deliver(message));
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    use crate::crypto::{ByteObject, SealedBundle};

    use super::*;

    const PARAMS: SessionParams = SessionParams {
        threshold: 2,
        base: 100,
        vector_length: 1,
    };

    fn test_key(fill: u8) -> PublicKey {
        PublicKey::from_slice_unchecked(&[fill; PublicKey::LENGTH])
    }

    fn test_bundle() -> SealedBundle {
        sodiumoxide::init().unwrap();
        SealedBundle::seal(&crate::crypto::KeyPair::generate().public, b"17")
    }

    fn admit_all(session: &mut Session, ids: &[ClientId]) -> Vec<UnboundedReceiver<Command>> {
        ids.iter()
            .map(|id| {
                let (tx, rx) = unbounded_channel();
                session.admit(id.clone(), tx).unwrap();
                rx
            })
            .collect()
    }

    fn next_message(rx: &mut UnboundedReceiver<Command>) -> Message {
        match rx.try_recv().unwrap() {
            Command::Deliver(message) => message,
            Command::Hangup => panic!("expected a frame, got a hangup"),
        }
    }

    #[test]
    fn test_admission_cap() {
        let mut session = Session::new(PARAMS);
        let ids = [ClientId::from("10.0.0.1:1"), ClientId::from("10.0.0.2:2")];
        let mut queues = admit_all(&mut session, &ids);

        assert_eq!(session.phase(), Phase::AwaitingKeys);
        for rx in &mut queues {
            assert_eq!(next_message(rx), Message::InitBaseParam { base: 100 });
        }

        // the third connection is turned away without touching the session
        let (tx, _rx) = unbounded_channel();
        assert_eq!(
            session.admit(ClientId::from("10.0.0.3:3"), tx),
            Err(SessionFull)
        );
        assert_eq!(session.connections.len(), 2);
    }

    #[test]
    fn test_key_barrier_broadcasts_directory() {
        let mut session = Session::new(PARAMS);
        let ids = [ClientId::from("10.0.0.1:1"), ClientId::from("10.0.0.2:2")];
        let mut queues = admit_all(&mut session, &ids);

        session.handle_public_key(&ids[0], test_key(1)).unwrap();
        assert_eq!(session.phase(), Phase::AwaitingKeys);
        session.handle_public_key(&ids[1], test_key(2)).unwrap();
        assert_eq!(session.phase(), Phase::AwaitingPerturbations);

        for rx in &mut queues {
            let _init = next_message(rx);
            match next_message(rx) {
                Message::PublicKeyBroadcast { public_keys } => {
                    assert_eq!(public_keys.len(), 2);
                    assert_eq!(public_keys[&ids[0]], test_key(1));
                    assert_eq!(public_keys[&ids[1]], test_key(2));
                }
                other => panic!("expected a key broadcast, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_duplicate_public_key_is_dropped() {
        let mut session = Session::new(PARAMS);
        let ids = [ClientId::from("10.0.0.1:1"), ClientId::from("10.0.0.2:2")];
        let _queues = admit_all(&mut session, &ids);

        session.handle_public_key(&ids[0], test_key(1)).unwrap();
        assert_eq!(
            session.handle_public_key(&ids[0], test_key(9)),
            Err(ProtocolError::DuplicateKey)
        );
        // the original key survives and the barrier did not fire
        assert_eq!(session.public_keys[&ids[0]], test_key(1));
        assert_eq!(session.phase(), Phase::AwaitingKeys);
    }

    #[test]
    fn test_perturbation_scatter() {
        let mut session = Session::new(PARAMS);
        let ids = [ClientId::from("10.0.0.1:1"), ClientId::from("10.0.0.2:2")];
        let mut queues = admit_all(&mut session, &ids);
        session.handle_public_key(&ids[0], test_key(1)).unwrap();
        session.handle_public_key(&ids[1], test_key(2)).unwrap();

        let mut from_first = BundleDict::new();
        from_first.insert(ids[1].clone(), test_bundle());
        session.handle_perturbations(&ids[0], from_first).unwrap();
        assert_eq!(session.phase(), Phase::AwaitingPerturbations);

        let mut from_second = BundleDict::new();
        from_second.insert(ids[0].clone(), test_bundle());
        session.handle_perturbations(&ids[1], from_second).unwrap();
        assert_eq!(session.phase(), Phase::AwaitingValues);

        // each client receives exactly the bundles created for it, keyed by
        // their creators
        for (idx, rx) in queues.iter_mut().enumerate() {
            let _init = next_message(rx);
            let _broadcast = next_message(rx);
            match next_message(rx) {
                Message::Perturbations { perturbations } => {
                    assert_eq!(perturbations.len(), 1);
                    assert!(perturbations.contains_key(&ids[1 - idx]));
                }
                other => panic!("expected a perturbations row, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unknown_recipient_rejects_whole_frame() {
        let mut session = Session::new(PARAMS);
        let ids = [ClientId::from("10.0.0.1:1"), ClientId::from("10.0.0.2:2")];
        let _queues = admit_all(&mut session, &ids);
        session.handle_public_key(&ids[0], test_key(1)).unwrap();
        session.handle_public_key(&ids[1], test_key(2)).unwrap();

        let stranger = ClientId::from("10.9.9.9:9");
        let mut bundles = BundleDict::new();
        bundles.insert(ids[1].clone(), test_bundle());
        bundles.insert(stranger.clone(), test_bundle());
        assert_eq!(
            session.handle_perturbations(&ids[0], bundles),
            Err(ProtocolError::UnknownRecipient(stranger))
        );
        // nothing was filed and the counter did not move
        assert!(session.perturbations[&ids[1]].is_empty());
        assert_eq!(session.received_perturbation_count, 0);
    }

    #[test]
    fn test_wrong_phase_frames_are_dropped() {
        let mut session = Session::new(PARAMS);
        let ids = [ClientId::from("10.0.0.1:1"), ClientId::from("10.0.0.2:2")];
        let _queues = admit_all(&mut session, &ids);

        assert!(matches!(
            session.handle_perturbations(&ids[0], BundleDict::new()),
            Err(ProtocolError::WrongPhase { tag: "perturbations", .. })
        ));
        assert!(matches!(
            session.handle_value(&ids[0], vec![1]),
            Err(ProtocolError::WrongPhase { tag: "value", .. })
        ));
        assert_eq!(session.phase(), Phase::AwaitingKeys);
    }

    fn run_to_value_phase(session: &mut Session, ids: &[ClientId]) -> Vec<UnboundedReceiver<Command>> {
        let queues = admit_all(session, ids);
        for (idx, id) in ids.iter().enumerate() {
            session.handle_public_key(id, test_key(idx as u8)).unwrap();
        }
        for id in ids {
            let mut bundles = BundleDict::new();
            for peer in ids.iter().filter(|peer| *peer != id) {
                bundles.insert(peer.clone(), test_bundle());
            }
            session.handle_perturbations(id, bundles).unwrap();
        }
        queues
    }

    #[test]
    fn test_value_length_mismatch_is_dropped() {
        let mut session = Session::new(PARAMS);
        let ids = [ClientId::from("10.0.0.1:1"), ClientId::from("10.0.0.2:2")];
        let _queues = run_to_value_phase(&mut session, &ids);

        assert_eq!(
            session.handle_value(&ids[0], vec![1, 2]),
            Err(ProtocolError::ValueLength {
                actual: 2,
                expected: 1
            })
        );
        assert_eq!(session.received_value_count, 0);
    }

    #[test]
    fn test_value_barrier_broadcasts_reduced_aggregate() {
        let mut session = Session::new(PARAMS);
        let ids = [ClientId::from("10.0.0.1:1"), ClientId::from("10.0.0.2:2")];
        let mut queues = run_to_value_phase(&mut session, &ids);

        assert_eq!(session.handle_value(&ids[0], vec![93]).unwrap(), None);
        // 93 + 82 = 175 = 75 (mod 100)
        assert_eq!(
            session.handle_value(&ids[1], vec![82]).unwrap(),
            Some(vec![75])
        );

        for rx in &mut queues {
            let mut saw_result = false;
            loop {
                match rx.try_recv().unwrap() {
                    Command::Deliver(Message::AggregationResult { aggregation_result }) => {
                        assert_eq!(aggregation_result, vec![75]);
                        saw_result = true;
                    }
                    Command::Deliver(_) => continue,
                    Command::Hangup => break,
                }
            }
            // the result precedes the hangup on every connection
            assert!(saw_result);
        }
    }
}
