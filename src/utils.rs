//! Utility functions and traits.

use rand::prelude::*;

use std::{any::Any, fmt, ops::AddAssign};

/// Utility trait that helps getting runtime information about types implementing it.
pub trait Object {
    fn as_any(&self) -> &dyn Any;
}

/// Runtime type-checking utility.
pub fn is_of_type<T: 'static>(x: &dyn Object) -> bool {
    x.as_any().is::<T>()
}

impl Object for f32 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Object for f64 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Integer division rounding towards positive infinity.
pub const fn ceil_div(n: usize, d: usize) -> usize {
    (n + d - 1) / d
}

/// Rounds `n` up to the next multiple of `granularity`.
pub const fn round_up(n: usize, granularity: usize) -> usize {
    ceil_div(n, granularity) * granularity
}

/// Scalars that can be passed to OpenCL kernels.
#[cfg(feature = "opencl")]
pub trait ClScalar: ocl::OclPrm {}

#[cfg(feature = "opencl")]
impl<T: ocl::OclPrm> ClScalar for T {}

/// Scalars that can be passed to OpenCL kernels (no bound without the `opencl` feature).
#[cfg(not(feature = "opencl"))]
pub trait ClScalar {}

#[cfg(not(feature = "opencl"))]
impl<T> ClScalar for T {}

/// Utility trait that generalizes floating-point types in HARP and implements common
/// functionnalities needed by the kernel and driver functions.
///
/// Device memory stores every scalar as a 64-bit word so that global buffers can be mutated
/// atomically; `to_word`/`from_word` are the (lossless) conversions to and from that word.
pub trait HarpFloat:
    num::Float
    + Default
    + AddAssign
    + Send
    + Sync
    + fmt::Debug
    + fmt::Display
    + Object
    + ClScalar
    + 'static
{
    /// Converts an `f64` constant into `Self`, rounding if needed.
    fn from_f64(x: f64) -> Self;
    /// Converts an index into `Self`.
    fn from_usize(x: usize) -> Self;
    /// Raw bit pattern widened to a device word.
    fn to_word(self) -> u64;
    /// Inverse of [`HarpFloat::to_word`].
    fn from_word(word: u64) -> Self;
    /// Produces a random vector of type `T` and length `n`, filled with values in the range
    /// [0.0, 100.0).
    fn rand_vector(n: usize, seed: Option<u64>) -> Vec<Self>;
}

impl HarpFloat for f32 {
    fn from_f64(x: f64) -> Self {
        x as f32
    }

    fn from_usize(x: usize) -> Self {
        x as f32
    }

    fn to_word(self) -> u64 {
        u64::from(self.to_bits())
    }

    fn from_word(word: u64) -> Self {
        f32::from_bits(word as u32)
    }

    fn rand_vector(n: usize, seed: Option<u64>) -> Vec<Self> {
        let seed = seed.unwrap_or(0);
        let mut rng = rand::rngs::SmallRng::seed_from_u64(seed);
        let between = rand::distributions::Uniform::new(0.0_f32, 100.0_f32);
        (0..n).map(|_| between.sample(&mut rng)).collect()
    }
}

impl HarpFloat for f64 {
    fn from_f64(x: f64) -> Self {
        x
    }

    fn from_usize(x: usize) -> Self {
        x as f64
    }

    fn to_word(self) -> u64 {
        self.to_bits()
    }

    fn from_word(word: u64) -> Self {
        f64::from_bits(word)
    }

    fn rand_vector(n: usize, seed: Option<u64>) -> Vec<Self> {
        let seed = seed.unwrap_or(0);
        let mut rng = rand::rngs::SmallRng::seed_from_u64(seed);
        let between = rand::distributions::Uniform::new(0.0_f64, 100.0_f64);
        (0..n).map(|_| between.sample(&mut rng)).collect()
    }
}

/// Produces a random `n x n` distance matrix (row-major) with non-negative weights in
/// [0.0, 100.0) and a zero diagonal.
pub fn rand_distance_matrix<T: HarpFloat>(n: usize, seed: Option<u64>) -> Vec<T> {
    let mut m = T::rand_vector(n * n, seed);
    for i in 0..n {
        m[i * n + i] = T::zero();
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_round_trip_bit_patterns() {
        for x in [0.0_f64, -0.0, 1.5, f64::INFINITY, f64::MIN_POSITIVE] {
            assert_eq!(f64::from_word(x.to_word()).to_bits(), x.to_bits());
        }
        assert_eq!(f32::from_word(3.25_f32.to_word()), 3.25);
    }

    #[test]
    fn distance_matrix_has_zero_diagonal() {
        let m = rand_distance_matrix::<f64>(7, Some(42));
        assert_eq!(m.len(), 49);
        for i in 0..7 {
            assert_eq!(m[i * 7 + i], 0.0);
        }
        assert!(m.iter().all(|&w| (0.0..100.0).contains(&w)));
    }

    #[test]
    fn ceil_div_and_round_up() {
        assert_eq!(ceil_div(0, 256), 0);
        assert_eq!(ceil_div(1, 256), 1);
        assert_eq!(ceil_div(512, 256), 2);
        assert_eq!(round_up(300, 256), 512);
        assert_eq!(round_up(256, 256), 256);
    }
}
