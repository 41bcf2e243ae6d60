//! Random seeds for sampler nodes.
//!
//! Seeds come from a caller-owned generator so that runs can be replayed
//! by seeding it explicitly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draw a non-negative seed in `[0, i64::MAX]`.
///
/// Takes the absolute value of a signed 64-bit draw, which is what
/// existing workflows were tuned against. The distribution is biased
/// (zero has half the weight of every other value) and `i64::MIN`
/// saturates to `i64::MAX`.
pub fn generate_seed<R: Rng + ?Sized>(rng: &mut R) -> i64 {
    rng.random::<i64>().saturating_abs()
}

/// An owned seed source.
#[derive(Debug, Clone)]
pub struct SeedGenerator {
    rng: StdRng,
}

impl SeedGenerator {
    /// Seeded from operating-system entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic sequence for a given seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next_seed(&mut self) -> i64 {
        generate_seed(&mut self.rng)
    }
}

impl Default for SeedGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}
