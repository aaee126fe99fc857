#![no_std]
#![forbid(unsafe_code)]

//! Trait-only seam between [`bamm-core`](https://docs.rs/bamm-core) and the
//! scalar random number generator it is built against. `bamm-core` never
//! constructs randomness itself; it is generic over (or holds a `&mut dyn`
//! of) an implementor of [`RandomSource`], so any reproducible RNG backend
//! can be plugged in. `bamm-rng` provides the concrete backend used by the
//! CLI.

/// Scalar draws and log-densities needed by the rjMCMC proposal kernels.
///
/// Implementors are expected to be reproducible given a fixed seed: the
/// same sequence of calls against two instances seeded identically must
/// produce bit-identical draws, since chain reproducibility depends on it.
pub trait RandomSource {
    /// Draw from Uniform(0, 1).
    fn uniform(&mut self) -> f64;

    /// Draw from Uniform(lo, hi).
    fn uniform_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.uniform()
    }

    /// Draw from Exponential(rate).
    fn exponential(&mut self, rate: f64) -> f64;

    /// Draw from Normal(mean, sd).
    fn normal(&mut self, mean: f64, sd: f64) -> f64;

    /// Draw a uniformly distributed index in `[0, n)`. Panics if `n == 0`.
    fn sample_index(&mut self, n: usize) -> usize;

    /// log-density of Exponential(rate) at `x`.
    fn ln_exponential_pdf(&self, rate: f64, x: f64) -> f64;

    /// log-density of Normal(mean, sd) at `x`.
    fn ln_normal_pdf(&self, mean: f64, sd: f64, x: f64) -> f64;
}
