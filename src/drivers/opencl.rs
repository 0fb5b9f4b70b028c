//! OpenCL device drivers.
//!
//! Profiles the OpenCL C versions of the kernels on the first OpenCL device of the first
//! platform, through [`ocl`][1]. Work-group sizes sweep the same candidate block sizes as the
//! simulated device and the grid arithmetic is the same; each work-group size is reported as its
//! own `opencl_block_*` tuning of the base variant.
//!
//! [1]: https://crates.io/crates/ocl

use super::device::{FwProblem, PiProblem};
use crate::{
    cli::CliArgs,
    consts::{GPU_BLOCK_SIZES, J_BLOCK_SIZE},
    error::HarpError,
    kernels::opencl::*,
    perf_report::{KernelKind, PerfReport, TargetKind},
    tuning::{BlockSizeFilter, VariantId},
    utils::{ceil_div, is_of_type, round_up, HarpFloat},
};

use ocl::ProQue;

use std::time::Instant;

/// Candidate work-group sizes the OpenCL device accepts.
fn work_group_sizes(
    pro_que: &ProQue,
    filter: &BlockSizeFilter,
) -> Result<Vec<usize>, HarpError> {
    let limit = pro_que.device().max_wg_size()?;
    Ok(GPU_BLOCK_SIZES
        .into_iter()
        .filter(|&bs| filter.is_valid(bs))
        .filter(|&bs| {
            if bs > limit {
                log::warn!("OpenCL: work-group size {bs} exceeds the device limit of {limit}");
            }
            bs <= limit
        })
        .collect())
}

/// OpenCL device driver for the π reduction.
pub fn pi_reduce<T: HarpFloat>(
    problem: &PiProblem<T>,
    filter: &BlockSizeFilter,
    args: &CliArgs,
    reports: &mut Vec<PerfReport<VariantId>>,
) -> Result<(), HarpError> {
    let PiProblem { iend, dx, pi_init } = *problem;
    let kernel_info = match is_of_type::<f32>(&dx) {
        true => &CL_SPI_REDUCE,
        false => &CL_DPI_REDUCE,
    };

    // Create OpenCL program-queue object
    let pro_que = ProQue::builder().src(kernel_info.source()).dims(1).build()?;
    let dpi = pro_que.buffer_builder::<T>().len(1).fill_val(pi_init).build()?;

    for bs in work_group_sizes(&pro_que, filter)? {
        let groups = ceil_div(iend, bs);
        let kernel = pro_que
            .kernel_builder(kernel_info.name())
            .global_work_size(groups.max(1) * bs)
            .local_work_size(bs)
            .arg(dx)
            .arg(&dpi)
            .arg(pi_init)
            .arg(iend as u64)
            .arg_local::<T>(bs)
            .build()?;

        let mut pi = vec![T::zero()];
        let mut durations = Vec::with_capacity(args.meta_repetitions.into());
        for _ in 0..durations.capacity() {
            let dur = Instant::now();
            for _ in 0..args.tight_loop_repetitions {
                dpi.write(&[pi_init][..]).enq()?;
                // An empty domain launches no work-group.
                if groups > 0 {
                    unsafe {
                        kernel.enq()?;
                    }
                }
                dpi.read(&mut pi).enq()?;
            }
            durations.push((dur.elapsed() / args.tight_loop_repetitions.into()).as_secs_f64());
        }
        log::debug!(
            "OpenCL {} block_{bs}: pi = {}",
            kernel_info.name(),
            T::from_f64(4.0) * pi[0]
        );

        reports.push(PerfReport::new::<T>(
            TargetKind::Device,
            KernelKind::PiReduce,
            VariantId::Base,
            format!("opencl_block_{bs}"),
            iend,
            &mut durations,
        ));
    }
    Ok(())
}

/// OpenCL device driver for Floyd-Warshall.
pub fn floyd_warshall<T: HarpFloat>(
    problem: &FwProblem<T>,
    filter: &BlockSizeFilter,
    args: &CliArgs,
    reports: &mut Vec<PerfReport<VariantId>>,
) -> Result<(), HarpError> {
    let n = problem.n;
    if n == 0 {
        return Ok(());
    }
    let kernel_info = match is_of_type::<f32>(&problem.pin[0]) {
        true => &CL_SFLOYD_WARSHALL,
        false => &CL_DFLOYD_WARSHALL,
    };

    // Create OpenCL program-queue object
    let pro_que = ProQue::builder()
        .src(kernel_info.source())
        .dims(n * n)
        .build()?;

    for bs in work_group_sizes(&pro_que, filter)? {
        if bs < J_BLOCK_SIZE {
            continue;
        }
        let i_block = bs / J_BLOCK_SIZE;

        // Create device matrix, relaxed in place
        let d = pro_que
            .buffer_builder::<T>()
            .len(n * n)
            .copy_host_slice(&problem.pin)
            .build()?;

        // Declare OpenCL kernel object
        let kernel = pro_que
            .kernel_builder(kernel_info.name())
            .global_work_size([round_up(n, J_BLOCK_SIZE), round_up(n, i_block)])
            .local_work_size([J_BLOCK_SIZE, i_block])
            .arg(&d)
            .arg(&d)
            .arg_named("k", 0_u64)
            .arg(n as u64)
            .build()?;

        let mut durations = Vec::with_capacity(args.meta_repetitions.into());
        for _ in 0..durations.capacity() {
            let dur = Instant::now();
            for _ in 0..args.tight_loop_repetitions {
                for k in 0..n {
                    kernel.set_arg("k", k as u64)?;
                    unsafe {
                        kernel.enq()?;
                    }
                }
                pro_que.queue().finish()?;
            }
            durations.push((dur.elapsed() / args.tight_loop_repetitions.into()).as_secs_f64());
        }

        reports.push(PerfReport::new::<T>(
            TargetKind::Device,
            KernelKind::FloydWarshall,
            VariantId::Base,
            format!("opencl_block_{bs}"),
            n,
            &mut durations,
        ));
    }
    Ok(())
}
