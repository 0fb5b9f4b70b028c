//! Performance report related structures and functions.
//!
//! This module defines all the necessary data structures and functions needed to generate
//! performance reports out of the recorded execution times of the benchmarked kernels.

use crate::{
    tuning::VariantId,
    utils::{is_of_type, HarpFloat},
};

use statistical::{mean, standard_deviation};

use std::{fmt, io::Write, mem::size_of};

/// Enum defining the target of kernel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TargetKind {
    Host,
    Device,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// List of implemented kernels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KernelKind {
    PiReduce,
    FloydWarshall,
}

impl KernelKind {
    /// Bytes moved and floating-point operations performed by one repetition of the kernel.
    fn footprint(&self, elem_size: usize, n: usize) -> (usize, usize) {
        match self {
            // Read and write of the accumulator; 6 FLOPs per integration step.
            Self::PiReduce => (2 * elem_size, 6 * n),
            // One read and one write per relaxed cell, for each of the `n` steps.
            Self::FloydWarshall => (2 * elem_size * n * n * n, n * n * n),
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PiReduce => write!(f, "pi_reduce"),
            Self::FloydWarshall => write!(f, "floyd_warshall"),
        }
    }
}

/// Marker trait for kernel variants (i.e. implementations).
pub trait KernelVariant: fmt::Display {}

/// Host-specific possible kernel implementations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HostKernelVariant {
    SeqNaive,
    ParIter,
}

impl KernelVariant for HostKernelVariant {}

impl fmt::Display for HostKernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SeqNaive => write!(f, "Sequential naive"),
            Self::ParIter => write!(f, "Parallel w/ iterators"),
        }
    }
}

impl KernelVariant for VariantId {}

/// Performance information and statistics of a benchmark.
pub struct PerfReport<V> {
    /// Target platform: either `Host` or `Device`.
    target: TargetKind,
    /// Benchmarked kernel.
    kernel: KernelKind,
    /// Implementation variant of the kernel.
    variant: V,
    /// Tuning the variant ran with, `-` for host kernels.
    tuning: String,
    /// Floating-point precision: `single` or `double`.
    precision: &'static str,
    /// Number of elements per dimension.
    nb_elems_per_dim: usize,
    /// Size in bytes.
    nb_bytes: usize,
    /// Number of floating-point operations.
    nb_flops: usize,
    /// Minimum recorded runtime in milliseconds.
    min_time: f64,
    /// Median recorded runtime in milliseconds.
    median_time: f64,
    /// Maximum recorded runtime in milliseconds.
    max_time: f64,
    /// Average runtime in milliseconds.
    avg_time: f64,
    /// Runtime standard deviation.
    stddev_time: f64,
    /// Arithmetic intensity in FLOPs/byte.
    arithmetic_intensity: f64,
    /// Memory bandwidth in GiB/s.
    memory_bandwidth: f64,
    /// Computational performance in GFLOP/s.
    computational_performance: f64,
}

impl<V> PerfReport<V> {
    pub fn print_csv_header(output: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            output,
            "target,kernel,variant,tuning,precision,elems_per_dim,Bytes,FLOPs,min_runtime,median_runtime,max_runtime,avg_runtime,stddev,FLOPs/Byte,GiB/s,GFLOP/s"
        )
    }
}

impl<V> PerfReport<V>
where
    V: KernelVariant,
{
    /// Creates a new `PerfReport` given a target, a kernel, its variant and tuning, the number of
    /// elements per dimension and the recorded execution times (in seconds). The element type `T`
    /// sets the precision and the data footprint.
    pub fn new<T: HarpFloat>(
        target: TargetKind,
        kernel: KernelKind,
        variant: V,
        tuning: impl Into<String>,
        nb_elems_per_dim: usize,
        durations: &mut [f64],
    ) -> Self {
        // Sort durations to avoid having to do two passes to get both min and max elements
        durations.sort_by(f64::total_cmp);

        let min_time = durations.first().copied().unwrap_or(f64::NAN) * 1e3;
        let median_time = durations
            .get(durations.len() / 2)
            .copied()
            .unwrap_or(f64::NAN)
            * 1e3;
        let max_time = durations.last().copied().unwrap_or(f64::NAN) * 1e3;
        let avg_time = mean(durations);
        let stddev_time = standard_deviation(durations, Some(avg_time));

        let precision = match is_of_type::<f32>(&T::zero()) {
            true => "single",
            false => "double",
        };
        let (nb_bytes, nb_flops) = kernel.footprint(size_of::<T>(), nb_elems_per_dim);

        let memory_bandwidth = nb_bytes as f64 / 1024_f64.powi(3) / avg_time;
        let arithmetic_intensity = nb_flops as f64 / nb_bytes as f64;
        let computational_performance = nb_flops as f64 / (1024_f64.powi(3) * avg_time);

        let avg_time = avg_time * 1e3;

        Self {
            target,
            kernel,
            variant,
            tuning: tuning.into(),
            precision,
            nb_elems_per_dim,
            nb_bytes,
            nb_flops,
            min_time,
            median_time,
            max_time,
            avg_time,
            stddev_time,
            memory_bandwidth,
            arithmetic_intensity,
            computational_performance,
        }
    }
}

impl<V> fmt::Display for PerfReport<V>
where
    V: KernelVariant,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{},{},{},{:18.15},{:18.15},{:18.15},{:18.15},{},{},{},{}",
            self.target,
            self.kernel,
            self.variant,
            self.tuning,
            self.precision,
            self.nb_elems_per_dim,
            self.nb_bytes,
            self.nb_flops,
            self.min_time,
            self.median_time,
            self.max_time,
            self.avg_time,
            self.stddev_time,
            self.arithmetic_intensity,
            self.memory_bandwidth,
            self.computational_performance,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_row_matches_the_header() {
        let mut durations = vec![0.003, 0.001, 0.002];
        let report = PerfReport::new::<f32>(
            TargetKind::Device,
            KernelKind::FloydWarshall,
            VariantId::Lambda,
            "block_256",
            10,
            &mut durations,
        );
        assert_eq!(durations, vec![0.001, 0.002, 0.003]);

        let mut header = Vec::new();
        PerfReport::<VariantId>::print_csv_header(&mut header).unwrap();
        let header = String::from_utf8(header).unwrap();
        let row = report.to_string();
        assert_eq!(header.trim_end().split(',').count(), row.split(',').count());
        assert!(row.starts_with(
            "device,floyd_warshall,Lambda_Device,block_256,single,10,8000,1000,"
        ));
    }

    #[test]
    fn pi_footprint_counts_the_accumulator_only() {
        let mut durations = vec![0.5, 0.5];
        let report = PerfReport::new::<f64>(
            TargetKind::Host,
            KernelKind::PiReduce,
            HostKernelVariant::ParIter,
            "-",
            1000,
            &mut durations,
        );
        assert_eq!((report.nb_bytes, report.nb_flops), (16, 6000));
        assert_eq!(report.precision, "double");
        assert_eq!(report.median_time, 500.0);
    }
}
