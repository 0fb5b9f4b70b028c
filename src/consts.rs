//! Crate-level constants.

/// Default number of meta repetitions performed when benchmarking a kernel.
pub const META_REPETITIONS: u8 = 31;

/// Default number of tight loop repetitions performed when benchmarking a kernel.
pub const TIGHT_LOOP_REPETITIONS: u16 = 1;

/// Candidate thread-block sizes swept by the device tunings, in tuning order.
///
/// Entries without a compiled kernel instance (see [`crate::kernels::device`]) are reported as
/// configuration errors.
pub const GPU_BLOCK_SIZES: [usize; 5] = [64, 128, 256, 512, 1024];

/// Tile extent along the `j` (column) axis of the Floyd-Warshall kernels. The `i` extent is the
/// block size divided by this value.
pub const J_BLOCK_SIZE: usize = 32;

/// Initial value of the π accumulator.
pub const PI_INIT: f64 = 0.0;

/// Default number of integration steps for the π reduction.
pub const DEFAULT_PI_LENGTH: usize = 1_000_000;
