//! Command-Line Interface related code.
//!
//! This module handles the parsing of CLI arguments using the [`clap`][1] crate.
//! It defines the availables runtime options and subcommands.
//!
//! [1]: https://crates.io/crates/clap

use crate::{consts, device::DeviceProps, tuning::VariantId};

use clap::{Parser, Subcommand, ValueEnum};

use std::path::PathBuf;

/// Micro-benchmarks of data-parallel kernels on an accelerator.
///
/// Profiles alternative implementations (variants) of the same kernel across thread-block
/// tunings on a simulated GPU, alongside serial and parallel host baselines.
#[derive(Clone, Debug, Parser)]
pub struct CliArgs {
    /// Number of meta-repetitions for the benchmark.
    #[arg(
        short,
        long,
        value_name = "META_REPS",
        default_value_t = consts::META_REPETITIONS,
        value_parser = clap::value_parser!(u8).range(2..u8::MAX.into()),
    )]
    pub meta_repetitions: u8,

    /// Number of repetitions of the tight loop.
    #[arg(
        short,
        long,
        value_name = "TIGHT_REPS",
        default_value_t = consts::TIGHT_LOOP_REPETITIONS,
        value_parser = clap::value_parser!(u16).range(1..u16::MAX.into()),
    )]
    pub tight_loop_repetitions: u16,

    /// Kernel command to run.
    #[command(subcommand)]
    pub kernel: KernelCmd,

    /// Output file, defaults to `stdout` if unspecified.
    #[arg(short, long)]
    pub output_file: Option<PathBuf>,

    /// Seed for the random number generator (RNG).
    #[arg(short, long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Block sizes allowed in the device tunings, all candidates if unspecified.
    #[arg(short, long, value_name = "BLOCK_SIZE", num_args = 1..)]
    pub block_sizes: Vec<usize>,

    /// Device variants to profile, every variant the kernel implements if unspecified.
    #[arg(short, long, value_enum, num_args = 1..)]
    pub variants: Vec<VariantId>,

    /// Floating-point precision of the kernels.
    #[arg(short, long, value_enum, default_value_t = Precision::Double)]
    pub precision: Precision,

    /// Simulated device to run the device variants on.
    #[arg(short, long, value_enum, default_value_t = DevicePreset::V100)]
    pub device: DevicePreset,

    /// Also profile the OpenCL kernels on the first available OpenCL device (requires the
    /// `opencl` feature).
    #[arg(long)]
    pub opencl: bool,
}

/// List of available kernels to profile.
#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum KernelCmd {
    /// Midpoint-rule integration of 4 / (1 + x^2) over [0, 1], a block-parallel sum reduction
    PiReduce {
        /// Numbers of integration steps.
        #[arg(
            short,
            long,
            num_args = 1..,
            default_values_t = [consts::DEFAULT_PI_LENGTH],
        )]
        lengths: Vec<usize>,
    },
    /// All-pairs shortest paths (Floyd-Warshall), one ordered launch per intermediate vertex
    FloydWarshall {
        /// Number of vertices of the graphs.
        #[arg(
            short,
            long,
            required = true,
            num_args = 1..,
        )]
        sizes: Vec<usize>,
    },
}

/// Floating-point formats (see IEEE 754).
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Precision {
    Single,
    Double,
}

/// Simulated device presets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DevicePreset {
    V100,
    A100,
    Mi250x,
    Tiny,
}

impl DevicePreset {
    pub fn props(&self) -> DeviceProps {
        match self {
            Self::V100 => DeviceProps::v100(),
            Self::A100 => DeviceProps::a100(),
            Self::Mi250x => DeviceProps::mi250x(),
            Self::Tiny => DeviceProps::tiny(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_profile_every_variant_in_double_precision() {
        let args = CliArgs::try_parse_from(["harp-bench", "pi-reduce"]).unwrap();
        assert_eq!(args.meta_repetitions, consts::META_REPETITIONS);
        assert!(args.variants.is_empty());
        assert!(args.block_sizes.is_empty());
        assert_eq!(args.precision, Precision::Double);
        assert_eq!(
            args.kernel,
            KernelCmd::PiReduce {
                lengths: vec![consts::DEFAULT_PI_LENGTH]
            }
        );
    }

    #[test]
    fn tuning_options_are_parsed() {
        let args = CliArgs::try_parse_from([
            "harp-bench",
            "--block-sizes",
            "128",
            "512",
            "--variants",
            "base",
            "library",
            "--precision",
            "single",
            "--device",
            "tiny",
            "floyd-warshall",
            "--sizes",
            "64",
            "100",
        ])
        .unwrap();
        assert_eq!(args.block_sizes, vec![128, 512]);
        assert_eq!(args.variants, vec![VariantId::Base, VariantId::Library]);
        assert_eq!(args.device.props(), DeviceProps::tiny());
        assert_eq!(
            args.kernel,
            KernelCmd::FloydWarshall {
                sizes: vec![64, 100]
            }
        );
        assert!(CliArgs::try_parse_from(["harp-bench", "floyd-warshall"]).is_err());
        assert!(CliArgs::try_parse_from(["harp-bench", "-m", "1", "pi-reduce"]).is_err());
    }
}
