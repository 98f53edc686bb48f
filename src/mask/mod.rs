//! Pairwise seeds and zero-sum masking.
//!
//! For each ordered pair of distinct participants `(u, v)`, `u` draws a
//! uniform seed `s_uv` in `[0, base)`. After the seed exchange, `u` holds
//! its own outbound seeds and the inbound seeds its peers drew for it, and
//! folds them into the scalar mask `m_u = Σ (s_uv − s_vu) mod base`. Every
//! pair contributes `s_uv − s_vu` to one mask and `s_vu − s_uv` to the
//! other, so the masks vanish in the modular sum of all submitted vectors.
//!
//! The mask is a single scalar applied to every coordinate. Drawing one
//! seed per coordinate would additionally hide cross-coordinate structure,
//! at `L` times the seed-exchange volume; the cancellation property does
//! not depend on it.

use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
#[error("a seed payload is not a decimal integer")]
/// A peer's decrypted seed payload failed to parse.
pub struct SeedParseError;

/// Draws a uniform random seed in `[0, base)`.
pub fn draw_seed<R: Rng>(rng: &mut R, base: u64) -> u64 {
    rng.gen_range(0..base)
}

/// Encodes a seed as the ASCII decimal payload of a seed bundle.
pub fn encode_seed(seed: u64) -> Vec<u8> {
    seed.to_string().into_bytes()
}

/// Parses a decrypted seed payload and reduces it modulo `base`.
pub fn decode_seed(payload: &[u8], base: u64) -> Result<u64, SeedParseError> {
    std::str::from_utf8(payload)
        .or(Err(SeedParseError))?
        .parse::<u64>()
        .or(Err(SeedParseError))
        .map(|seed| seed % base)
}

/// Folds `(outbound, inbound)` seed pairs into the scalar mask
/// `Σ (s_out − s_in) mod base`.
///
/// The subtraction is lifted by `base` per pair and accumulated in 128 bits,
/// so no intermediate value wraps for any `u64` base.
pub fn scalar_mask<I>(pairs: I, base: u64) -> u64
where
    I: IntoIterator<Item = (u64, u64)>,
{
    let base = u128::from(base);
    pairs
        .into_iter()
        .fold(0_u128, |mask, (outbound, inbound)| {
            (mask + (u128::from(outbound) + base - u128::from(inbound)) % base) % base
        }) as u64
}

/// Applies the scalar mask to every coordinate modulo `base`.
pub fn mask_vector(values: &[u64], mask: u64, base: u64) -> Vec<u64> {
    values
        .iter()
        .map(|value| ((u128::from(*value) + u128::from(mask)) % u128::from(base)) as u64)
        .collect()
}
