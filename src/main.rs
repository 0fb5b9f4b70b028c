//! HARP-Bench - kernel micro-benchmarks on an accelerator
//!
//! # About
//! HARP-Bench measures the throughput of alternative implementations ("variants") of the same
//! data-parallel kernel across alternative internal tunings (thread-block size, occupancy-aware
//! grid sizing). Device kernels run on a software accelerator with the programming model of CUDA
//! and OpenCL devices (grids of blocks, block-local scratch memory, barriers, atomics, in-order
//! streams), so the benchmarks and their tests run on any machine.
//!
//! Currently, HARP-Bench can profile the following kernels:
//! - PI_REDUCE: midpoint-rule integration of `4 / (1 + x^2)` over `[0, 1]`, a block-parallel sum
//!   reduction combined across blocks with atomics;
//! - POLYBENCH_FLOYD_WARSHALL: all-pairs shortest paths, one ordered kernel launch per
//!   intermediate vertex.
//!
//! Each kernel has up to three device variants:
//! - `Base_Device`: hand-written kernel;
//! - `Lambda_Device`: generic kernel running a per-element function;
//! - `Library_Device`: loop nest expressed through the portability layer ([`portable`]).
//!
//! Profiling can be done on both single-precision and double-precision floating-point formats (see
//! [IEEE 754][1]).
//!
//! # Quickstart
//! ## Build
//! As any Rust-based project, HARP-Bench is built and run with `cargo`:
//! ```sh
//! cargo build --release
//! ```
//!
//! Profiling the OpenCL versions of the kernels on real hardware requires an [OpenCL 2.0+][2]
//! library and the `opencl` feature:
//! ```sh
//! cargo build --release --features opencl
//! ```
//!
//! ## Example run
//! To profile Floyd-Warshall on multiple graph sizes with the 128 and 256 block sizes only:
//! ```sh
//! cargo run --release -- --block-sizes 128 256 floyd-warshall --sizes 256 512 1024
//! ```
//!
//! Logging is controlled with the `RUST_LOG` environment variable, e.g. `RUST_LOG=debug` to see
//! the launch configurations of every tuning.
//!
//! [1]: https://en.wikipedia.org/wiki/IEEE_754
//! [2]: https://www.khronos.org/opencl/

pub mod cli;
pub mod consts;
pub mod device;
pub mod drivers;
pub mod error;
pub mod kernels;
pub mod perf_report;
pub mod portable;
pub mod timer;
pub mod tuning;
pub mod utils;

use crate::cli::{CliArgs, KernelCmd, Precision};

use clap::Parser;

use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();
    let args = CliArgs::parse();

    let outcome = match args.kernel {
        KernelCmd::PiReduce { .. } => match args.precision {
            Precision::Single => drivers::pi_reduce::<f32>(args),
            Precision::Double => drivers::pi_reduce::<f64>(args),
        },
        KernelCmd::FloydWarshall { .. } => match args.precision {
            Precision::Single => drivers::floyd_warshall::<f32>(args),
            Precision::Double => drivers::floyd_warshall::<f64>(args),
        },
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
