//! Kernel drivers.
//!
//! This module provides the API for appropriately initializing and profiling the kernels, as well
//! as post-processing the results. It acts as a layer abstracting over the kernel's target: either
//! the host (CPU) or the device.
//!
//! # High-level approach for kernel profiling
//! ## 1. Data initialization
//! The problem (integration steps, distance matrix) is created once per problem size and shared,
//! read-only, by every host and device variant. Device variants copy it into buffers they own for
//! the duration of a single run.
//!
//! ## 2. Performance evaluation
//! Device variants are swept over their tunings (see [`crate::tuning`]): every tuning is run in a
//! "meta repetitions loop", and every run brackets `tight_loop_repetitions` repetitions of the
//! kernel with the timer (see [`crate::consts`] for the defaults and [`crate::cli`] for overriding
//! them from the command-line).
//!
//! ## 3. Post-processing
//! This step consists in extracting performance metrics from the recorded execution times of the
//! kernel and information about the manipulated data, such as computational performance (in
//! GFLOP/s), memory bandwidth (in GiB/s) or arithmetic intensity (in FLOPs/Byte).
//!
//! The resulting metrics are then outputted to `stdout`, or a file if specified (see
//! [`crate::cli`] for specifying an output file from the command-line). Diagnostics go to
//! `stderr`.

mod device;
mod host;
#[cfg(feature = "opencl")]
mod opencl;

use crate::{
    cli::{CliArgs, KernelCmd},
    consts::GPU_BLOCK_SIZES,
    device::Device,
    error::HarpError,
    kernels,
    perf_report::{HostKernelVariant, KernelKind, PerfReport},
    tuning::{BlockSizeFilter, Dispatcher, VariantId},
    utils::HarpFloat,
};
use device::{FloydWarshallBench, FwProblem, PiProblem, PiReduceBench};

use std::{
    fs::OpenOptions,
    io::{stderr, stdout, Write},
};

/// Host variants profiled for every problem size.
const HOST_VARIANTS: [HostKernelVariant; 2] =
    [HostKernelVariant::SeqNaive, HostKernelVariant::ParIter];

/// Reports gathered for one kernel, written out even when profiling stops on a fatal error.
struct Reports {
    host: Vec<PerfReport<HostKernelVariant>>,
    device: Vec<PerfReport<VariantId>>,
}

impl Reports {
    fn new() -> Self {
        Self {
            host: Vec::new(),
            device: Vec::new(),
        }
    }

    /// Writes the reports to the output file, or `stdout`, then hands `outcome` back.
    fn finish(self, args: &CliArgs, outcome: Result<(), HarpError>) -> Result<(), HarpError> {
        if let Err(err) = &outcome {
            log::error!("stopping after a fatal error: {err}");
        }

        let mut output: Box<dyn Write> = match args.output_file {
            Some(ref name) => Box::new(
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(name)?,
            ),
            None => Box::new(stdout()),
        };

        PerfReport::<()>::print_csv_header(&mut output)?;
        for report in self.host {
            writeln!(output, "{report}")?;
        }
        for report in self.device {
            writeln!(output, "{report}")?;
        }
        output.flush()?;
        outcome
    }
}

/// Driver function responsible for initializing the data for the π reduction and forwarding it to
/// the dedicated target drivers. It gathers the results for each benchmarked kernel variant and
/// generates an output summary.
pub fn pi_reduce<T: HarpFloat>(args: CliArgs) -> Result<(), HarpError> {
    let mut reports = Reports::new();
    let outcome = profile_pi_reduce::<T>(&args, &mut reports);
    warn_without_opencl(&args);
    reports.finish(&args, outcome)
}

fn profile_pi_reduce<T: HarpFloat>(
    args: &CliArgs,
    reports: &mut Reports,
) -> Result<(), HarpError> {
    let lengths = match &args.kernel {
        KernelCmd::PiReduce { lengths } => lengths,
        _ => unreachable!(),
    };

    let device = Device::new(args.device.props());
    log::info!("device variants run on {}", device.props().name);
    let filter = BlockSizeFilter::new(args.block_sizes.clone());
    let dispatcher = Dispatcher::new(&GPU_BLOCK_SIZES, &filter);
    let run_reps = usize::from(args.tight_loop_repetitions);

    for &iend in lengths {
        eprint!("Number of steps: {iend}\r");
        let problem = PiProblem::<T>::new(iend);
        let PiProblem { dx, pi_init, .. } = problem;
        let reference = kernels::host::par_pi_reduce(iend, dx, pi_init);

        for variant in HOST_VARIANTS {
            reports.host.push(host::pi_reduce(
                iend,
                dx,
                pi_init,
                args.meta_repetitions,
                args.tight_loop_repetitions,
                variant,
            ));
        }

        let mut bench = PiReduceBench::new(&device, problem, run_reps);
        device::profile::<T, _, _>(
            &mut bench,
            &dispatcher,
            &args.variants,
            KernelKind::PiReduce,
            args.meta_repetitions,
            run_reps,
            |b| b.pi().map_or(false, |pi| close_to(pi, reference)),
            &mut reports.device,
            &mut stderr(),
        )?;

        #[cfg(feature = "opencl")]
        if args.opencl {
            opencl::pi_reduce(&problem, &filter, args, &mut reports.device)?;
        }
    }
    Ok(())
}

/// Driver function responsible for initializing the data for Floyd-Warshall and forwarding it to
/// the dedicated target drivers. It gathers the results for each benchmarked kernel variant and
/// generates an output summary.
pub fn floyd_warshall<T: HarpFloat>(args: CliArgs) -> Result<(), HarpError> {
    let mut reports = Reports::new();
    let outcome = profile_floyd_warshall::<T>(&args, &mut reports);
    warn_without_opencl(&args);
    reports.finish(&args, outcome)
}

fn profile_floyd_warshall<T: HarpFloat>(
    args: &CliArgs,
    reports: &mut Reports,
) -> Result<(), HarpError> {
    let sizes = match &args.kernel {
        KernelCmd::FloydWarshall { sizes } => sizes,
        _ => unreachable!(),
    };

    let device = Device::new(args.device.props());
    log::info!("device variants run on {}", device.props().name);
    let filter = BlockSizeFilter::new(args.block_sizes.clone());
    let dispatcher = Dispatcher::new(&GPU_BLOCK_SIZES, &filter);
    let run_reps = usize::from(args.tight_loop_repetitions);

    for &n in sizes {
        eprint!("Number of vertices: {n}\r");
        let problem = FwProblem::<T>::new(n, args.seed);
        let mut reference = problem.pin.clone();
        kernels::host::par_floyd_warshall(n, &mut reference);

        for variant in HOST_VARIANTS {
            reports.host.push(host::floyd_warshall(
                n,
                &problem.pin,
                args.meta_repetitions,
                args.tight_loop_repetitions,
                variant,
            ));
        }

        #[cfg(feature = "opencl")]
        if args.opencl {
            opencl::floyd_warshall(&problem, &filter, args, &mut reports.device)?;
        }

        let mut bench = FloydWarshallBench::new(&device, problem, run_reps);
        device::profile::<T, _, _>(
            &mut bench,
            &dispatcher,
            &args.variants,
            KernelKind::FloydWarshall,
            args.meta_repetitions,
            run_reps,
            |b| b.output() == reference.as_slice(),
            &mut reports.device,
            &mut stderr(),
        )?;
    }
    Ok(())
}

/// Relative comparison of a device reduction against the host one, loose enough for the
/// summation order to differ.
fn close_to<T: HarpFloat>(value: T, reference: T) -> bool {
    let tol = T::epsilon().sqrt() * T::from_f64(16.0);
    (value - reference).abs() <= tol * reference.abs().max(T::one())
}

#[cfg(feature = "opencl")]
fn warn_without_opencl(_: &CliArgs) {}

#[cfg(not(feature = "opencl"))]
fn warn_without_opencl(args: &CliArgs) {
    if args.opencl {
        log::warn!("`--opencl` ignored: built without the `opencl` feature");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reductions_are_compared_relative_to_their_magnitude() {
        assert!(close_to(std::f64::consts::PI + 1e-9, std::f64::consts::PI));
        assert!(!close_to(3.2_f64, std::f64::consts::PI));
        assert!(close_to(3.141_6_f32, std::f32::consts::PI));
        assert!(close_to(0.0_f64, 0.0));
    }
}
