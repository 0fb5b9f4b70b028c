//! Device kernel drivers.
//!
//! This module implements the benchmarks run on the accelerator. Each benchmark owns its problem
//! and exposes its variants and tunings to the [`Dispatcher`]; [`profile`] sweeps them and turns
//! the recorded timings into performance reports.
//!
//! Every run creates its own stream and device buffers and releases them before returning, so no
//! device state is shared between two variants or two tunings.

use crate::{
    consts::PI_INIT,
    device::{Device, Kernel, LaunchConfig, SharedMem},
    error::{ConfigError, HarpError},
    kernels::device::{
        floyd_warshall_chain, floyd_warshall_lam_chain, relax, with_block_size, with_tile_shape,
        PiReduce,
    },
    perf_report::{KernelKind, PerfReport, TargetKind},
    portable::{forall_reduce, kernel_seq_outer, GridPolicy, ReduceSum},
    timer::Timer,
    tuning::{DeviceBenchmark, Dispatcher, GridStrategy, Tuning, VariantId},
    utils::HarpFloat,
};

use std::{io::Write, sync::Arc};

/// Size of a benchmark problem as reported in the performance reports.
pub trait ProblemSize {
    fn actual_problem_size(&self) -> usize;
}

/// Midpoint-rule integration of `4 / (1 + x^2)` over `[0, 1]` in `iend` steps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PiProblem<T> {
    pub iend: usize,
    pub dx: T,
    pub pi_init: T,
}

impl<T: HarpFloat> PiProblem<T> {
    pub fn new(iend: usize) -> Self {
        Self {
            iend,
            dx: T::one() / T::from_usize(iend.max(1)),
            pi_init: T::from_f64(PI_INIT),
        }
    }
}

impl<T> ProblemSize for PiProblem<T> {
    fn actual_problem_size(&self) -> usize {
        self.iend
    }
}

/// All-pairs shortest paths over a row-major `n x n` distance matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct FwProblem<T> {
    pub n: usize,
    pub pin: Vec<T>,
}

impl<T: HarpFloat> FwProblem<T> {
    pub fn new(n: usize, seed: Option<u64>) -> Self {
        Self {
            n,
            pin: crate::utils::rand_distance_matrix(n, seed),
        }
    }
}

impl<T> ProblemSize for FwProblem<T> {
    fn actual_problem_size(&self) -> usize {
        self.n
    }
}

/// Rejects block sizes the device cannot run before anything is allocated.
fn check_block_size(
    device: &Device,
    kernel: &'static str,
    block_size: usize,
) -> Result<(), ConfigError> {
    let limit = device.props().max_threads_per_block;
    if block_size > limit {
        return Err(ConfigError::BlockSizeAboveLimit {
            kernel,
            block_size,
            limit,
        });
    }
    Ok(())
}

/// Block-parallel π reduction.
pub struct PiReduceBench<'d, T> {
    device: &'d Device,
    problem: PiProblem<T>,
    run_reps: usize,
    pi: Option<T>,
}

impl<'d, T: HarpFloat> PiReduceBench<'d, T> {
    pub fn new(device: &'d Device, problem: PiProblem<T>, run_reps: usize) -> Self {
        Self {
            device,
            problem,
            run_reps,
            pi: None,
        }
    }

    /// π estimate of the last completed repetition.
    pub fn pi(&self) -> Option<T> {
        self.pi
    }

    fn run_base<const B: usize>(
        &mut self,
        strategy: GridStrategy,
        timer: &mut Timer,
    ) -> Result<(), HarpError> {
        let PiProblem { iend, dx, pi_init } = self.problem;
        let stream = self.device.create_stream();
        let dpi = self.device.alloc_data::<T>(1)?;

        let kernel = Arc::new(PiReduce::<T, B> {
            dx,
            dpi: dpi.as_device_ptr(),
            pi_init,
            iend,
        });
        let shmem = SharedMem::<T, B>::BYTES;
        let cap = match strategy {
            GridStrategy::Block => None,
            GridStrategy::OccupancyCapped => Some(self.device.occupancy_max_blocks(
                &kernel.attributes(),
                B,
                shmem,
            )?),
        };
        let config = LaunchConfig::linear(iend, B, shmem).with_grid_cap(cap);
        log::debug!("{}: {config}", Self::NAME);

        timer.start_timer();
        for _ in 0..self.run_reps {
            stream.copy_from_host(&dpi, &[pi_init])?;
            stream.launch(&kernel, config)?;
            let mut pi = [T::zero()];
            stream.copy_to_host(&dpi, &mut pi)?;
            self.pi = Some(T::from_f64(4.0) * pi[0]);
        }
        timer.stop_timer();

        self.device.dealloc_data(dpi);
        Ok(())
    }

    fn run_library<const B: usize>(
        &mut self,
        strategy: GridStrategy,
        timer: &mut Timer,
    ) -> Result<(), HarpError> {
        let PiProblem { iend, dx, pi_init } = self.problem;
        let stream = self.device.create_stream();
        let policy = match strategy {
            GridStrategy::Block => GridPolicy::Exact,
            GridStrategy::OccupancyCapped => GridPolicy::OccupancyCalc,
        };
        let half = T::from_f64(0.5);

        timer.start_timer();
        for _ in 0..self.run_reps {
            let pi = ReduceSum::new(self.device, &stream, pi_init)?;
            forall_reduce::<T, _, B>(self.device, &stream, policy, 0..iend, &pi, move |i| {
                let x = (T::from_usize(i) + half) * dx;
                dx / (T::one() + x * x)
            })?;
            self.pi = Some(T::from_f64(4.0) * pi.get(&stream)?);
        }
        timer.stop_timer();

        Ok(())
    }
}

impl<'d, T> ProblemSize for PiReduceBench<'d, T> {
    fn actual_problem_size(&self) -> usize {
        self.problem.actual_problem_size()
    }
}

impl<'d, T: HarpFloat> DeviceBenchmark for PiReduceBench<'d, T> {
    const NAME: &'static str = "PI_REDUCE";

    fn variants(&self) -> &'static [VariantId] {
        &[VariantId::Base, VariantId::Library]
    }

    fn strategies(&self) -> &'static [GridStrategy] {
        &[GridStrategy::Block, GridStrategy::OccupancyCapped]
    }

    fn run_variant(
        &mut self,
        variant: VariantId,
        tuning: Tuning,
        timer: &mut Timer,
    ) -> Result<(), HarpError> {
        check_block_size(self.device, Self::NAME, tuning.block_size)?;
        let ran = match variant {
            VariantId::Base => with_block_size!(tuning.block_size, B => {
                self.run_base::<B>(tuning.strategy, timer)
            }),
            VariantId::Library => with_block_size!(tuning.block_size, B => {
                self.run_library::<B>(tuning.strategy, timer)
            }),
            VariantId::Lambda => {
                return Err(ConfigError::UnknownVariant {
                    kernel: Self::NAME,
                    variant: variant.to_string(),
                }
                .into())
            }
        };
        ran.unwrap_or_else(|| {
            Err(ConfigError::UnsupportedBlockSize {
                kernel: Self::NAME,
                block_size: tuning.block_size,
            }
            .into())
        })
    }
}

/// Floyd-Warshall all-pairs shortest paths, one launch per intermediate vertex.
pub struct FloydWarshallBench<'d, T> {
    device: &'d Device,
    problem: FwProblem<T>,
    run_reps: usize,
    pout: Vec<T>,
}

impl<'d, T: HarpFloat> FloydWarshallBench<'d, T> {
    pub fn new(device: &'d Device, problem: FwProblem<T>, run_reps: usize) -> Self {
        let pout = vec![T::zero(); problem.pin.len()];
        Self {
            device,
            problem,
            run_reps,
            pout,
        }
    }

    /// Matrix copied back from the device by the last run.
    pub fn output(&self) -> &[T] {
        &self.pout
    }

    fn run_impl<const J: usize, const I: usize>(
        &mut self,
        variant: VariantId,
        timer: &mut Timer,
    ) -> Result<(), HarpError> {
        let n = self.problem.n;
        let stream = self.device.create_stream();
        let d = self.device.alloc_data::<T>(n * n)?;
        stream.copy_from_host(&d, &self.problem.pin)?;
        stream.synchronize()?;
        log::debug!("{}: {}", Self::NAME, LaunchConfig::tiled(n, n, J, I));

        // The matrix is relaxed in place: `pout` and `pin` are the same buffer.
        let p = d.as_device_ptr();
        timer.start_timer();
        for _ in 0..self.run_reps {
            match variant {
                VariantId::Base => floyd_warshall_chain::<T, J, I>(&stream, &p, &p, n)?,
                VariantId::Lambda => floyd_warshall_lam_chain::<T, J, I>(&stream, &p, &p, n)?,
                VariantId::Library => {
                    let p = p.clone();
                    kernel_seq_outer::<_, J, I>(&stream, n, n, n, move |k, i, j| {
                        relax(&p, &p, k, n, i, j)
                    })?
                }
            }
            stream.synchronize()?;
        }
        timer.stop_timer();
        log::debug!("{}: {} launches", Self::NAME, stream.launch_count());

        stream.copy_to_host(&d, &mut self.pout)?;
        self.device.dealloc_data(d);
        Ok(())
    }
}

impl<'d, T> ProblemSize for FloydWarshallBench<'d, T> {
    fn actual_problem_size(&self) -> usize {
        self.problem.actual_problem_size()
    }
}

impl<'d, T: HarpFloat> DeviceBenchmark for FloydWarshallBench<'d, T> {
    const NAME: &'static str = "POLYBENCH_FLOYD_WARSHALL";

    fn variants(&self) -> &'static [VariantId] {
        &[VariantId::Base, VariantId::Lambda, VariantId::Library]
    }

    fn strategies(&self) -> &'static [GridStrategy] {
        &[GridStrategy::Block]
    }

    fn run_variant(
        &mut self,
        variant: VariantId,
        tuning: Tuning,
        timer: &mut Timer,
    ) -> Result<(), HarpError> {
        check_block_size(self.device, Self::NAME, tuning.block_size)?;
        with_tile_shape!(tuning.block_size, J, I => self.run_impl::<J, I>(variant, timer))
            .unwrap_or_else(|| {
                Err(ConfigError::UnsupportedBlockSize {
                    kernel: Self::NAME,
                    block_size: tuning.block_size,
                }
                .into())
            })
    }
}

/// Profiles every tuning of `variants` on `bench` and appends one report per tuning that ran.
///
/// An empty `variants` list profiles every variant the kernel implements. Each tuning runs
/// `meta_reps` times; each run brackets `run_reps` repetitions with the timer. After every tuning
/// that ran, `verify` checks the benchmark's result against the host reference and a mismatch is
/// logged. Configuration errors are written to `diag` and skip the tuning; any other error is
/// returned right away, leaving the reports gathered so far in `reports`.
#[allow(clippy::too_many_arguments)]
pub fn profile<T, B, V>(
    bench: &mut B,
    dispatcher: &Dispatcher,
    variants: &[VariantId],
    kernel: KernelKind,
    meta_reps: u8,
    run_reps: usize,
    verify: V,
    reports: &mut Vec<PerfReport<VariantId>>,
    diag: &mut dyn Write,
) -> Result<(), HarpError>
where
    T: HarpFloat,
    B: DeviceBenchmark + ProblemSize,
    V: Fn(&B) -> bool,
{
    let size = bench.actual_problem_size();
    let variants = match variants {
        [] => bench.variants(),
        requested => requested,
    };
    for &variant in variants {
        let names = dispatcher.tuning_names(bench, variant);
        if names.is_empty() {
            // Nothing to time: lets the dispatcher report an unknown variant.
            dispatcher.dispatch(bench, variant, 0, &mut Timer::new(), diag)?;
            continue;
        }

        for (t, name) in names.iter().enumerate() {
            log::info!("{} size {size}: {variant} {name}", B::NAME);
            let mut timer = Timer::new();
            let mut durations = Vec::with_capacity(meta_reps.into());
            for _ in 0..meta_reps {
                if dispatcher.dispatch(bench, variant, t, &mut timer, diag)?.is_none() {
                    break;
                }
                if let Some(elapsed) = timer.elapsed() {
                    durations.push(elapsed.as_secs_f64() / run_reps.max(1) as f64);
                }
            }
            if durations.is_empty() {
                continue;
            }
            if !verify(bench) {
                log::warn!(
                    "{} size {size}: {variant} {name} differs from the host reference",
                    B::NAME
                );
            }
            reports.push(PerfReport::new::<T>(
                TargetKind::Device,
                kernel,
                variant,
                name.as_str(),
                size,
                &mut durations,
            ));
        }
    }
    Ok(())
}
