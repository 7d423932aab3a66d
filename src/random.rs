//! This module wraps the "rand" crate behind the small interface needed by
//! the event selectors that resample events

use crate::numeric::Float;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

// Select random number generation engine in use
#[cfg(feature = "f32")]
type Engine = rand_xoshiro::Xoshiro128Plus;
#[cfg(not(feature = "f32"))]
type Engine = rand_xoshiro::Xoshiro256Plus;

/// Default seed, which makes resampling reproducible from one run to the next
pub const DEFAULT_SEED: u64 = 12345;

/// Seeded random number generator
#[derive(Clone)]
pub struct RandomGenerator {
    rng: Engine,
}
//
impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}
//
impl RandomGenerator {
    /// Spawn a new random number generator with the default seed
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Spawn a new random number generator with a custom seed
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Engine::seed_from_u64(seed),
        }
    }

    /// Generate a random floating-point number between 0 and 1
    pub fn random(&mut self) -> Float {
        self.rng.gen()
    }

    /// Generate a normally distributed number (zero mean, unit variance)
    pub fn gaussian(&mut self) -> Float {
        StandardNormal.sample(&mut self.rng)
    }
}
