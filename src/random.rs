//! Seedable randomness for fallback frequencies and simulated noise.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::FrequencyRange;

/// Source of the uniformly random in-range values used whenever a real
/// detection is unavailable (timeouts, silence, analyser failures).
pub struct FallbackGenerator {
    rng: StdRng,
}

impl FallbackGenerator {
    /// Deterministic generator for tests and reproducible CLI runs
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Uniform value in `[0, 1)`
    pub fn unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// `round(u * (max - min) + min)` for a uniform `u` in `[0, 1)`
    ///
    /// Always within `[range.min_hz, range.max_hz]`.
    pub fn in_range(&mut self, range: FrequencyRange) -> u32 {
        let value = (self.unit() * range.span() as f64 + range.min_hz as f64).round() as u32;
        value.clamp(range.min_hz, range.max_hz)
    }

    /// Uniform integer in `[0, upper)`; returns 0 when `upper` is 0
    pub fn below(&mut self, upper: u32) -> u32 {
        if upper == 0 {
            0
        } else {
            self.rng.gen_range(0..upper)
        }
    }

    /// Independent generator seeded from this one
    ///
    /// Keeps spawned tasks reproducible when the parent is seeded.
    pub fn fork(&mut self) -> Self {
        Self::seeded(self.rng.gen::<u64>())
    }
}

impl Default for FallbackGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}
