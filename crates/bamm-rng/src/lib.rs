#![forbid(unsafe_code)]

//! Concrete [`RandomSource`] backend for BAMM, built on `rand`/`rand_distr`.
//! This crate holds no domain logic, only the RNG plumbing.

use bamm_traits::RandomSource;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// A `RandomSource` backed by `rand`'s `SmallRng`.
///
/// `SmallRng` is not a cryptographic RNG, which is the right tradeoff here:
/// the sampler needs a fast, reproducible stream of draws, not
/// unpredictability against an adversary.
pub struct BammRng {
    inner: rand::rngs::SmallRng,
}

impl BammRng {
    /// Seed deterministically. Two `BammRng`s built from the same seed
    /// produce bit-identical draw sequences.
    pub fn seed_from_u64(seed: u64) -> Self {
        Self {
            inner: rand::rngs::SmallRng::seed_from_u64(seed),
        }
    }

    /// Seed from the operating system's entropy source. Used when the
    /// control file requests `seed = -1`.
    pub fn from_entropy() -> Self {
        Self {
            inner: rand::rngs::SmallRng::from_entropy(),
        }
    }
}

impl RandomSource for BammRng {
    fn uniform(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    fn uniform_range(&mut self, lo: f64, hi: f64) -> f64 {
        self.inner.gen_range(lo..hi)
    }

    fn exponential(&mut self, rate: f64) -> f64 {
        // rand_distr::Exp is parameterised by rate (lambda), matching the
        // `exponentialRv(rate)` convention of the original source.
        let dist = rand_distr::Exp::new(rate).expect("exponential rate must be > 0");
        dist.sample(&mut self.inner)
    }

    fn normal(&mut self, mean: f64, sd: f64) -> f64 {
        if sd == 0.0 {
            return mean;
        }
        let dist = Normal::new(mean, sd).expect("normal sd must be >= 0");
        dist.sample(&mut self.inner)
    }

    fn sample_index(&mut self, n: usize) -> usize {
        assert!(n > 0, "sample_index called with n == 0");
        self.inner.gen_range(0..n)
    }

    fn ln_exponential_pdf(&self, rate: f64, x: f64) -> f64 {
        if x < 0.0 || rate <= 0.0 {
            return f64::NEG_INFINITY;
        }
        rate.ln() - rate * x
    }

    fn ln_normal_pdf(&self, mean: f64, sd: f64, x: f64) -> f64 {
        if sd <= 0.0 {
            return if x == mean { f64::INFINITY } else { f64::NEG_INFINITY };
        }
        let z = (x - mean) / sd;
        -0.5 * z * z - sd.ln() - 0.5 * (2.0 * PI).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_streams_are_reproducible() {
        let mut a = BammRng::seed_from_u64(42);
        let mut b = BammRng::seed_from_u64(42);
        for _ in 0..50 {
            assert_eq!(a.uniform(), b.uniform());
            assert_eq!(a.exponential(2.0), b.exponential(2.0));
            assert_eq!(a.normal(0.0, 1.0), b.normal(0.0, 1.0));
        }
    }

    #[test]
    fn ln_exponential_pdf_matches_definition() {
        let r = BammRng::seed_from_u64(1);
        let got = r.ln_exponential_pdf(2.0, 1.0);
        let expected = (2.0_f64).ln() - 2.0 * 1.0;
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn ln_normal_pdf_matches_definition() {
        let r = BammRng::seed_from_u64(1);
        let got = r.ln_normal_pdf(0.0, 2.0, 1.0);
        let z: f64 = 0.5;
        let expected = -0.5 * z * z - (2.0_f64).ln() - 0.5 * (2.0 * std::f64::consts::PI).ln();
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn sample_index_stays_in_range() {
        let mut r = BammRng::seed_from_u64(7);
        for _ in 0..200 {
            let i = r.sample_index(5);
            assert!(i < 5);
        }
    }
}
