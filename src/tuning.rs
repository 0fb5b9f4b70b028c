//! Variant and tuning dispatch.
//!
//! A benchmark exposes a set of variants (implementations of the same kernel) and, per variant, a
//! set of tunings: one per valid candidate block size and grid strategy. Tunings are addressed by
//! a dense index `t` assigned by walking the candidate block sizes in list order and, within one
//! block size, the benchmark's grid strategies in declaration order. Names registered through
//! [`Dispatcher::tuning_names`] follow the exact same walk, so `names[t]` always describes what
//! `dispatch(variant, t)` runs.

use crate::{
    error::{ConfigError, HarpError},
    timer::Timer,
};

use clap::ValueEnum;

use std::{fmt, io::Write};

/// Device implementation strategies of a kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum)]
pub enum VariantId {
    /// Hand-written kernel.
    Base,
    /// Generic kernel parameterized by a per-element function.
    Lambda,
    /// Loop nest expressed through the portability layer.
    Library,
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base => write!(f, "Base_Device"),
            Self::Lambda => write!(f, "Lambda_Device"),
            Self::Library => write!(f, "Library_Device"),
        }
    }
}

/// How the grid of a launch is sized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GridStrategy {
    /// One thread per element.
    Block,
    /// One thread per element, capped by the occupancy advisor.
    OccupancyCapped,
}

/// One tuning of a variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Tuning {
    pub block_size: usize,
    pub strategy: GridStrategy,
}

impl fmt::Display for Tuning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.strategy {
            GridStrategy::Block => write!(f, "block_{}", self.block_size),
            GridStrategy::OccupancyCapped => write!(f, "occgs_{}", self.block_size),
        }
    }
}

/// Caller-supplied predicate on block sizes. An empty allow-list (the default) accepts every
/// block size.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockSizeFilter {
    allowed: Vec<usize>,
}

impl BlockSizeFilter {
    pub fn new(allowed: Vec<usize>) -> Self {
        Self { allowed }
    }

    pub fn is_valid(&self, block_size: usize) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&block_size)
    }
}

/// A kernel benchmark runnable on the device.
pub trait DeviceBenchmark {
    /// Kernel name used in diagnostics.
    const NAME: &'static str;

    /// Variants the kernel implements.
    fn variants(&self) -> &'static [VariantId];

    /// Grid strategies each candidate block size expands into.
    fn strategies(&self) -> &'static [GridStrategy];

    /// Runs the timed repetitions of `variant` with `tuning`, bracketing them with `timer`.
    fn run_variant(
        &mut self,
        variant: VariantId,
        tuning: Tuning,
        timer: &mut Timer,
    ) -> Result<(), HarpError>;
}

/// Enumerates tunings over a fixed candidate list and runs the selected one.
pub struct Dispatcher<'a> {
    candidates: &'a [usize],
    filter: &'a BlockSizeFilter,
}

impl<'a> Dispatcher<'a> {
    pub fn new(candidates: &'a [usize], filter: &'a BlockSizeFilter) -> Self {
        Self { candidates, filter }
    }

    fn tunings(&self, strategies: &'static [GridStrategy]) -> impl Iterator<Item = Tuning> + 'a {
        let filter = self.filter;
        self.candidates
            .iter()
            .copied()
            .filter(move |&bs| filter.is_valid(bs))
            .flat_map(move |block_size| {
                strategies.iter().map(move |&strategy| Tuning {
                    block_size,
                    strategy,
                })
            })
    }

    /// Tuning names of `variant`, in tuning-index order. Unknown variants have none.
    pub fn tuning_names<B: DeviceBenchmark>(&self, bench: &B, variant: VariantId) -> Vec<String> {
        if !bench.variants().contains(&variant) {
            return Vec::new();
        }
        self.tunings(bench.strategies())
            .map(|tuning| tuning.to_string())
            .collect()
    }

    /// Runs `variant` with the tuning at `tuning_index`.
    ///
    /// Returns the tuning that ran, or `None` when nothing ran: unknown variant, out-of-range
    /// index, or a configuration error. Configuration errors are written to `out`; launch,
    /// synchronization and allocation errors are returned.
    pub fn dispatch<B: DeviceBenchmark>(
        &self,
        bench: &mut B,
        variant: VariantId,
        tuning_index: usize,
        timer: &mut Timer,
        out: &mut dyn Write,
    ) -> Result<Option<Tuning>, HarpError> {
        if !bench.variants().contains(&variant) {
            report(
                out,
                &ConfigError::UnknownVariant {
                    kernel: B::NAME,
                    variant: variant.to_string(),
                }
                .into(),
            );
            return Ok(None);
        }

        let mut t = 0;
        for tuning in self.tunings(bench.strategies()) {
            if t == tuning_index {
                return match bench.run_variant(variant, tuning, timer) {
                    Ok(()) => Ok(Some(tuning)),
                    Err(err) if !err.is_fatal() => {
                        report(out, &err);
                        Ok(None)
                    }
                    Err(err) => Err(err),
                };
            }
            t += 1;
        }
        Ok(None)
    }
}

fn report(out: &mut dyn Write, err: &HarpError) {
    log::warn!("{err}");
    if let Err(io) = writeln!(out, "\n  {err}") {
        log::warn!("failed to report configuration error: {io}");
    }
}
