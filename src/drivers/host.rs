//! Host kernel drivers.
//!
//! This module implements the driver functions responsible for profiling the chosen kernels on the
//! host (CPU).

use crate::{
    kernels::host,
    perf_report::{HostKernelVariant, KernelKind, PerfReport, TargetKind},
    utils::HarpFloat,
};

use std::time::Instant;

/// Host driver for the π reduction.
///
/// This function selects the correct host kernel given `variant` and profiles it.
pub fn pi_reduce<T: HarpFloat>(
    iend: usize,
    dx: T,
    pi_init: T,
    meta_reps: u8,
    tight_reps: u16,
    variant: HostKernelVariant,
) -> PerfReport<HostKernelVariant> {
    // Match on given kernel variant
    let kernel = match variant {
        HostKernelVariant::SeqNaive => host::pi_reduce::<T>,
        HostKernelVariant::ParIter => host::par_pi_reduce::<T>,
    };

    // Measure execution time of kernel
    let mut durations = Vec::with_capacity(meta_reps.into());
    for _ in 0..durations.capacity() {
        let dur = Instant::now();
        for _ in 0..tight_reps {
            let _ = std::hint::black_box(kernel(iend, dx, pi_init));
        }
        durations.push((dur.elapsed() / tight_reps.into()).as_secs_f64());
    }

    PerfReport::new::<T>(
        TargetKind::Host,
        KernelKind::PiReduce,
        variant,
        "-",
        iend,
        &mut durations,
    )
}

/// Host driver for Floyd-Warshall.
///
/// Every meta repetition relaxes a fresh copy of `pin`, the copy is not timed.
pub fn floyd_warshall<T: HarpFloat>(
    n: usize,
    pin: &[T],
    meta_reps: u8,
    tight_reps: u16,
    variant: HostKernelVariant,
) -> PerfReport<HostKernelVariant> {
    // Match on given kernel variant
    let kernel = match variant {
        HostKernelVariant::SeqNaive => host::floyd_warshall::<T>,
        HostKernelVariant::ParIter => host::par_floyd_warshall::<T>,
    };

    // Measure execution time of kernel
    let mut durations = Vec::with_capacity(meta_reps.into());
    for _ in 0..durations.capacity() {
        let mut m = pin.to_vec();
        let dur = Instant::now();
        for _ in 0..tight_reps {
            kernel(n, &mut m);
        }
        durations.push((dur.elapsed() / tight_reps.into()).as_secs_f64());
    }

    PerfReport::new::<T>(
        TargetKind::Host,
        KernelKind::FloydWarshall,
        variant,
        "-",
        n,
        &mut durations,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_drivers_time_every_meta_repetition() {
        let report = pi_reduce(1000, 1e-3_f64, 0.0, 3, 2, HostKernelVariant::ParIter);
        assert!(report
            .to_string()
            .starts_with("host,pi_reduce,Parallel w/ iterators,-,double,1000,"));

        let pin = crate::utils::rand_distance_matrix::<f32>(8, Some(1));
        let report = floyd_warshall(8, &pin, 2, 1, HostKernelVariant::SeqNaive);
        assert!(report.to_string().starts_with("host,floyd_warshall,Sequential naive,-,single,8,"));
    }
}
