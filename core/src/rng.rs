//! Deterministic random number generation for demo data.
//!
//! RULE: Demo seeding never calls a platform RNG. Every table gets its own
//! stream derived from (seed XOR slot), so adding a table never changes
//! the rows generated for existing ones.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG stream for one demo table.
pub struct DemoRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl DemoRng {
    pub fn new(seed: u64, slot: DemoSlot) -> Self {
        let derived = seed ^ (slot as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            name: slot.name(),
            inner: Pcg64Mcg::seed_from_u64(derived),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n). `n == 0` yields 0.
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        self.inner.next_u64() % n
    }

    /// Bernoulli trial: true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Uniform in [lo, hi).
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Normal sample (Box-Muller).
    pub fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
        mean + std_dev * z
    }
}

/// Stable stream slots.
/// NEVER reorder or remove entries, only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum DemoSlot {
    Vitals = 0,
    Features = 1,
    Weights = 2,
    Priority = 3,
}

impl DemoSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vitals => "vitals",
            Self::Features => "features",
            Self::Weights => "weights",
            Self::Priority => "priority",
        }
    }
}
