//! Thread-block execution model.
//!
//! Threads of a block run in lockstep phases: [`BlockCtx::for_each_thread`] executes one phase
//! for every thread of the block, and [`BlockCtx::sync_threads`] is the rendezvous separating two
//! phases. A value written to shared memory by any thread in one phase is visible to every thread
//! in the following phase, never earlier.

use super::launch::{BlockSize, Dim3, GridSize, LaunchConfig};
use crate::{error::DeviceFault, utils::HarpFloat};

use std::{
    mem::size_of,
    ops::{Index, IndexMut},
};

/// Static resource usage of a kernel entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelAttributes {
    /// Entry point name.
    pub name: &'static str,
    /// Registers used by each thread.
    pub regs_per_thread: usize,
    /// Shared memory declared statically by the kernel, in bytes.
    pub static_shared_mem_bytes: usize,
    /// Launch bounds: largest block the kernel was compiled for.
    pub max_threads_per_block: usize,
}

/// A device kernel: the code run by every block of a launch.
pub trait Kernel: Send + Sync + 'static {
    fn attributes(&self) -> KernelAttributes;

    /// Runs all the threads of one block.
    fn run_block(&self, ctx: &mut BlockCtx) -> Result<(), DeviceFault>;
}

/// Block-local scratch memory whose length is the compile-time block size.
pub struct SharedMem<T, const N: usize> {
    data: [T; N],
}

impl<T: HarpFloat, const N: usize> SharedMem<T, N> {
    pub const BYTES: usize = N * size_of::<T>();
}

impl<T, const N: usize> Index<usize> for SharedMem<T, N> {
    type Output = T;

    fn index(&self, idx: usize) -> &T {
        &self.data[idx]
    }
}

impl<T, const N: usize> IndexMut<usize> for SharedMem<T, N> {
    fn index_mut(&mut self, idx: usize) -> &mut T {
        &mut self.data[idx]
    }
}

/// Execution context of one block.
pub struct BlockCtx {
    block_idx: Dim3,
    block_dim: BlockSize,
    grid_dim: GridSize,
    dynamic_shared_mem: usize,
    barriers: usize,
}

impl BlockCtx {
    pub fn new(config: &LaunchConfig, block_idx: Dim3) -> Self {
        Self {
            block_idx,
            block_dim: config.block,
            grid_dim: config.grid,
            dynamic_shared_mem: config.shared_mem_bytes,
            barriers: 0,
        }
    }

    pub fn block_idx(&self) -> Dim3 {
        self.block_idx
    }

    pub fn grid_dim(&self) -> GridSize {
        self.grid_dim
    }

    pub fn num_threads(&self) -> usize {
        self.block_dim.size()
    }

    /// Number of barriers this block has passed so far.
    pub fn barriers(&self) -> usize {
        self.barriers
    }

    /// Carves a scratch array of `N` elements out of the block's dynamic shared memory.
    pub fn shared<T: HarpFloat, const N: usize>(&self) -> Result<SharedMem<T, N>, DeviceFault> {
        let required = SharedMem::<T, N>::BYTES;
        if required > self.dynamic_shared_mem {
            return Err(DeviceFault::SharedMemOverflow {
                required,
                available: self.dynamic_shared_mem,
            });
        }
        Ok(SharedMem {
            data: [T::default(); N],
        })
    }

    /// Runs one phase of the block: `body` is called once per thread index, x fastest.
    pub fn for_each_thread<F>(&self, mut body: F) -> Result<(), DeviceFault>
    where
        F: FnMut(Dim3) -> Result<(), DeviceFault>,
    {
        (0..self.num_threads()).try_for_each(|t| body(self.block_dim.unflatten(t)))
    }

    /// Block-wide barrier: every thread has finished the current phase.
    pub fn sync_threads(&mut self) {
        self.barriers += 1;
    }
}

/// In-block tree reduction of `smem` into `smem[0]`.
///
/// The active thread count halves at every step (`N/2`, `N/4`, ..., 1) and a barrier follows each
/// step, so a thread only ever reads a neighbor value written in a previous phase. `N` must be a
/// power of two.
pub fn block_tree_reduce<T: HarpFloat, const N: usize>(
    ctx: &mut BlockCtx,
    smem: &mut SharedMem<T, N>,
) -> Result<(), DeviceFault> {
    let mut active = N / 2;
    while active > 0 {
        ctx.for_each_thread(|tid| {
            if tid.x < active {
                let rhs = smem[tid.x + active];
                smem[tid.x] += rhs;
            }
            Ok(())
        })?;
        ctx.sync_threads();
        active /= 2;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_reduce_sums_every_slot_with_one_barrier_per_step() {
        let cfg = LaunchConfig::linear(256, 256, SharedMem::<f64, 256>::BYTES);
        let mut ctx = BlockCtx::new(&cfg, Dim3::ZERO);
        let mut smem = ctx.shared::<f64, 256>().unwrap();
        ctx.for_each_thread(|tid| {
            smem[tid.x] = tid.x as f64;
            Ok(())
        })
        .unwrap();
        ctx.sync_threads();

        block_tree_reduce(&mut ctx, &mut smem).unwrap();

        assert_eq!(smem[0], (0..256).sum::<usize>() as f64);
        // One barrier after seeding, then log2(256) halving steps.
        assert_eq!(ctx.barriers(), 1 + 8);
    }

    #[test]
    fn shared_memory_must_be_allocated_by_the_launch() {
        let cfg = LaunchConfig::linear(128, 128, 128 * size_of::<f32>() - 1);
        let ctx = BlockCtx::new(&cfg, Dim3::ZERO);
        let err = ctx.shared::<f32, 128>().err().unwrap();
        assert_eq!(
            err,
            DeviceFault::SharedMemOverflow {
                required: 512,
                available: 511
            }
        );
    }

    #[test]
    fn threads_visit_two_dimensional_blocks_row_by_row() {
        let cfg = LaunchConfig::tiled(4, 4, 2, 2);
        let ctx = BlockCtx::new(&cfg, Dim3::xyz(1, 0, 0));
        let mut seen = Vec::new();
        ctx.for_each_thread(|tid| {
            seen.push((tid.x, tid.y));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
        assert_eq!(ctx.grid_dim(), GridSize::xy(2, 2));
    }
}
