//! The synchronous protocol core of a client.

use std::collections::HashMap;

use rand::thread_rng;

use crate::{
    crypto::{KeyPair, PublicKey, SealedBundle},
    mask,
    BundleDict,
    ClientId,
    InitError,
    KeyDict,
};

use super::ClientError;

/// A participant in one protocol run: the key pair, the session base once
/// received, and the seeds exchanged with every peer.
pub struct Participant {
    keys: KeyPair,
    base: Option<u64>,
    /// Seeds this participant drew, keyed by the peer they were sealed for.
    outgoing_seeds: HashMap<ClientId, u64>,
    /// Seeds the peers drew for this participant, keyed by their creator.
    incoming_seeds: HashMap<ClientId, u64>,
}

impl Participant {
    /// Create a participant with a fresh key pair.
    ///
    /// # Errors
    /// Fails if there is insufficient system entropy to generate secrets.
    pub fn new() -> Result<Self, InitError> {
        // crucial: init must be called before anything else in this module
        sodiumoxide::init().or(Err(InitError))?;
        Ok(Self {
            keys: KeyPair::generate(),
            base: None,
            outgoing_seeds: HashMap::new(),
            incoming_seeds: HashMap::new(),
        })
    }

    /// The public key this participant publishes through the coordinator.
    pub fn public_key(&self) -> PublicKey {
        self.keys.public
    }

    /// Stores the session base announced by the coordinator.
    pub fn set_base(&mut self, base: u64) {
        self.base = Some(base);
    }

    /// Draws one fresh seed per peer in the broadcast directory and seals
    /// it under that peer's key.
    ///
    /// The directory must contain this participant's own entry; its seeds
    /// are remembered for the mask computation.
    pub fn prepare_perturbations(
        &mut self,
        own_id: &ClientId,
        directory: &KeyDict,
    ) -> Result<BundleDict, ClientError> {
        let base = self.base.ok_or(ClientError::NoBase)?;
        if !directory.contains_key(own_id) {
            return Err(ClientError::NotInDirectory);
        }
        let mut rng = thread_rng();
        let mut bundles = BundleDict::new();
        for (peer, peer_pk) in directory {
            if peer == own_id {
                continue;
            }
            let seed = mask::draw_seed(&mut rng, base);
            self.outgoing_seeds.insert(peer.clone(), seed);
            bundles.insert(
                peer.clone(),
                SealedBundle::seal(peer_pk, &mask::encode_seed(seed)),
            );
        }
        Ok(bundles)
    }

    /// Opens the relayed peer bundles, derives the scalar mask and returns
    /// the masked private vector.
    ///
    /// # Errors
    /// Fails if a bundle cannot be decrypted or parsed, or if any peer this
    /// participant drew a seed for did not send one back; either way this
    /// client cannot submit a correct masked value and must abort.
    pub fn masked_value(
        &mut self,
        own_id: &ClientId,
        values: &[u64],
        inbound: &BundleDict,
    ) -> Result<Vec<u64>, ClientError> {
        let base = self.base.ok_or(ClientError::NoBase)?;
        for (peer, bundle) in inbound {
            if peer == own_id {
                continue;
            }
            let payload = bundle.open(&self.keys)?;
            let seed = mask::decode_seed(&payload, base)?;
            self.incoming_seeds.insert(peer.clone(), seed);
        }
        let pairs = self
            .outgoing_seeds
            .iter()
            .map(|(peer, outbound)| {
                self.incoming_seeds
                    .get(peer)
                    .map(|inbound| (*outbound, *inbound))
                    .ok_or_else(|| ClientError::MissingSeed(peer.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mask = mask::scalar_mask(pairs, base);
        Ok(mask::mask_vector(values, mask, base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs the seed exchange between `vectors.len()` participants entirely
    /// in memory and returns their masked vectors.
    fn exchange(base: u64, vectors: &[Vec<u64>]) -> Vec<Vec<u64>> {
        let ids: Vec<ClientId> = (0..vectors.len())
            .map(|idx| ClientId::from(format!("10.0.0.{}:4242", idx).as_str()))
            .collect();
        let mut participants: Vec<Participant> = ids
            .iter()
            .map(|_| {
                let mut participant = Participant::new().unwrap();
                participant.set_base(base);
                participant
            })
            .collect();

        let directory: KeyDict = ids
            .iter()
            .zip(&participants)
            .map(|(id, participant)| (id.clone(), participant.public_key()))
            .collect();

        let outbound: Vec<BundleDict> = participants
            .iter_mut()
            .zip(&ids)
            .map(|(participant, id)| participant.prepare_perturbations(id, &directory).unwrap())
            .collect();

        participants
            .iter_mut()
            .zip(&ids)
            .enumerate()
            .map(|(idx, (participant, id))| {
                let inbound: BundleDict = outbound
                    .iter()
                    .enumerate()
                    .filter(|(creator, _)| *creator != idx)
                    .map(|(creator, bundles)| (ids[creator].clone(), bundles[id].clone()))
                    .collect();
                participant.masked_value(id, &vectors[idx], &inbound).unwrap()
            })
            .collect()
    }

    fn modular_sum(vectors: &[Vec<u64>], base: u64) -> Vec<u64> {
        let length = vectors[0].len();
        (0..length)
            .map(|idx| {
                (vectors
                    .iter()
                    .map(|vector| u128::from(vector[idx]))
                    .sum::<u128>()
                    % u128::from(base)) as u64
            })
            .collect()
    }

    #[test]
    fn test_masks_cancel_in_the_aggregate() {
        let base = 1 << 20;
        let vectors: Vec<Vec<u64>> = vec![
            vec![1, 1_000_000, 0, 524_287],
            vec![17, 42, 99, 1],
            vec![1_048_575, 0, 3, 3],
            vec![7, 7, 7, 7],
            vec![123, 456, 789, 12],
        ];
        let masked = exchange(base, &vectors);
        assert_eq!(modular_sum(&masked, base), modular_sum(&vectors, base));
    }

    #[test]
    fn test_masked_vectors_hide_the_plaintext() {
        // with base 2^20 a zero mask appears with probability 2^-20 per
        // client, so requiring N-1 masked vectors to differ is safe
        let base = 1 << 20;
        let vectors: Vec<Vec<u64>> = (0..5_u64)
            .map(|idx| vec![idx, idx + 1, idx + 2, idx + 3])
            .collect();
        let masked = exchange(base, &vectors);
        let unchanged = masked
            .iter()
            .zip(&vectors)
            .filter(|(masked, plain)| masked == plain)
            .count();
        assert!(unchanged <= 1);
    }

    #[test]
    fn test_two_participants_small_base() {
        let masked = exchange(10, &[vec![7], vec![6]]);
        let sum: u64 = masked.iter().map(|vector| vector[0]).sum();
        assert_eq!(sum % 10, 3);
        assert!(masked.iter().all(|vector| vector[0] < 10));
    }

    #[test]
    fn test_base_must_be_set_first() {
        let mut participant = Participant::new().unwrap();
        let own_id = ClientId::from("10.0.0.1:1");
        let directory: KeyDict = vec![(own_id.clone(), participant.public_key())]
            .into_iter()
            .collect();
        assert!(matches!(
            participant.prepare_perturbations(&own_id, &directory),
            Err(ClientError::NoBase)
        ));
    }

    #[test]
    fn test_directory_must_contain_self() {
        let mut participant = Participant::new().unwrap();
        participant.set_base(100);
        let other = Participant::new().unwrap();
        let directory: KeyDict = vec![(ClientId::from("10.0.0.2:2"), other.public_key())]
            .into_iter()
            .collect();
        assert!(matches!(
            participant.prepare_perturbations(&ClientId::from("10.0.0.1:1"), &directory),
            Err(ClientError::NotInDirectory)
        ));
    }

    #[test]
    fn test_foreign_bundle_aborts_the_run() {
        let own_id = ClientId::from("10.0.0.1:1");
        let peer_id = ClientId::from("10.0.0.2:2");
        let mut participant = Participant::new().unwrap();
        participant.set_base(100);
        let mut peer = Participant::new().unwrap();
        peer.set_base(100);

        let directory: KeyDict = vec![
            (own_id.clone(), participant.public_key()),
            (peer_id.clone(), peer.public_key()),
        ]
        .into_iter()
        .collect();
        participant.prepare_perturbations(&own_id, &directory).unwrap();

        // a bundle sealed for somebody else entirely
        let stranger = Participant::new().unwrap();
        let mut inbound = BundleDict::new();
        inbound.insert(
            peer_id,
            SealedBundle::seal(&stranger.public_key(), &mask::encode_seed(17)),
        );
        assert!(matches!(
            participant.masked_value(&own_id, &[1], &inbound),
            Err(ClientError::Crypto(_))
        ));
    }

    #[test]
    fn test_missing_peer_seed_aborts_the_run() {
        let own_id = ClientId::from("10.0.0.1:1");
        let peer_id = ClientId::from("10.0.0.2:2");
        let mut participant = Participant::new().unwrap();
        participant.set_base(100);
        let peer = Participant::new().unwrap();

        let directory: KeyDict = vec![
            (own_id.clone(), participant.public_key()),
            (peer_id.clone(), peer.public_key()),
        ]
        .into_iter()
        .collect();
        participant.prepare_perturbations(&own_id, &directory).unwrap();

        // the peer never sent its seed back
        assert!(matches!(
            participant.masked_value(&own_id, &[1], &BundleDict::new()),
            Err(ClientError::MissingSeed(id)) if id == peer_id
        ));
    }
}
