//! Portability layer.
//!
//! Kernels written against this module are plain loop bodies over index ranges; the layer owns
//! the mapping onto the device: grid sizing, block scratch memory, reductions and the ordering of
//! sequential loop dimensions. It is the library-expressed counterpart of the hand-written kernels
//! in [`crate::kernels::device`].
//!
//! - [`forall_reduce`] runs a one-dimensional loop whose iterations each contribute a value to a
//!   [`ReduceSum`].
//! - [`kernel_seq_outer`] runs a three-dimensional loop nest whose outermost dimension is
//!   sequential and whose two inner dimensions are mapped onto a tiled grid.

use crate::{
    device::{
        block_tree_reduce, BlockCtx, Device, DeviceBuffer, DevicePtr, Kernel, KernelAttributes,
        LaunchConfig, SharedMem, Stream,
    },
    error::{DeviceFault, HarpError, LaunchError, SyncError},
    utils::HarpFloat,
};

use std::{ops::Range, sync::Arc};

/// How the grid of a one-dimensional loop is sized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridPolicy {
    /// One thread per iteration.
    Exact,
    /// One thread per iteration, clamped to the number of blocks the device keeps resident.
    OccupancyCalc,
}

/// Sum reduction variable living on the device.
///
/// Contributions start from zero on the device; the initial value is added once, on the host,
/// when the result is read back.
pub struct ReduceSum<T> {
    init: T,
    acc: DeviceBuffer<T>,
}

impl<T: HarpFloat> ReduceSum<T> {
    pub fn new(device: &Device, stream: &Stream, init: T) -> Result<Self, HarpError> {
        let acc = device.alloc_data::<T>(1)?;
        stream.copy_from_host(&acc, &[T::zero()])?;
        Ok(Self { init, acc })
    }

    /// Waits for every contribution and returns `init + sum`.
    pub fn get(&self, stream: &Stream) -> Result<T, SyncError> {
        let mut sum = [T::zero()];
        stream.copy_to_host(&self.acc, &mut sum)?;
        Ok(self.init + sum[0])
    }
}

struct ForallReduce<T, F, const B: usize> {
    range: Range<usize>,
    acc: DevicePtr<T>,
    body: F,
}

impl<T, F, const B: usize> Kernel for ForallReduce<T, F, B>
where
    T: HarpFloat,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    fn attributes(&self) -> KernelAttributes {
        KernelAttributes {
            name: "forall_reduce",
            regs_per_thread: 32,
            static_shared_mem_bytes: 0,
            max_threads_per_block: B,
        }
    }

    fn run_block(&self, ctx: &mut BlockCtx) -> Result<(), DeviceFault> {
        let mut partial = ctx.shared::<T, B>()?;
        let stride = ctx.grid_dim().x * B;
        let first = self.range.start + ctx.block_idx().x * B;

        ctx.for_each_thread(|tid| {
            let mut sum = T::zero();
            let mut i = first + tid.x;
            while i < self.range.end {
                sum += (self.body)(i);
                i += stride;
            }
            partial[tid.x] = sum;
            Ok(())
        })?;
        ctx.sync_threads();

        block_tree_reduce(ctx, &mut partial)?;

        ctx.for_each_thread(|tid| {
            if tid.x == 0 {
                self.acc.atomic_add(0, partial[0])?;
            }
            Ok(())
        })
    }
}

/// Runs `body` for every index of `range` on blocks of `B` threads and adds the returned values
/// into `sum`. The call returns once the launch is enqueued.
pub fn forall_reduce<T, F, const B: usize>(
    device: &Device,
    stream: &Stream,
    policy: GridPolicy,
    range: Range<usize>,
    sum: &ReduceSum<T>,
    body: F,
) -> Result<(), LaunchError>
where
    T: HarpFloat,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let len = range.len();
    let kernel = Arc::new(ForallReduce::<T, F, B> {
        range,
        acc: sum.acc.as_device_ptr(),
        body,
    });
    let shmem = SharedMem::<T, B>::BYTES;
    let cap = match policy {
        GridPolicy::Exact => None,
        GridPolicy::OccupancyCalc => {
            Some(device.occupancy_max_blocks(&kernel.attributes(), B, shmem)?)
        }
    };
    let config = LaunchConfig::linear(len, B, shmem).with_grid_cap(cap);
    log::debug!("forall_reduce<{B}> over {len} iterations: {config}");
    stream.launch(&kernel, config)
}

struct TiledStep<F, const J: usize, const I: usize> {
    k: usize,
    rows: usize,
    cols: usize,
    body: Arc<F>,
}

impl<F, const J: usize, const I: usize> Kernel for TiledStep<F, J, I>
where
    F: Fn(usize, usize, usize) -> Result<(), DeviceFault> + Send + Sync + 'static,
{
    fn attributes(&self) -> KernelAttributes {
        KernelAttributes {
            name: "kernel_seq_outer",
            regs_per_thread: 24,
            static_shared_mem_bytes: 0,
            max_threads_per_block: J * I,
        }
    }

    fn run_block(&self, ctx: &mut BlockCtx) -> Result<(), DeviceFault> {
        let (row0, col0) = (ctx.block_idx().y * I, ctx.block_idx().x * J);
        ctx.for_each_thread(|tid| {
            let (i, j) = (row0 + tid.y, col0 + tid.x);
            if i < self.rows && j < self.cols {
                (self.body)(self.k, i, j)?;
            }
            Ok(())
        })
    }
}

/// Runs `body(k, i, j)` over `0..k_len x 0..i_len x 0..j_len`.
///
/// `k` is a sequential dimension: all `(i, j)` of step `k` complete before any `(i, j)` of step
/// `k + 1` starts. Each step is one launch of `J x I` tiles, `j` along x and `i` along y, queued
/// in order on `stream`.
pub fn kernel_seq_outer<F, const J: usize, const I: usize>(
    stream: &Stream,
    k_len: usize,
    i_len: usize,
    j_len: usize,
    body: F,
) -> Result<(), LaunchError>
where
    F: Fn(usize, usize, usize) -> Result<(), DeviceFault> + Send + Sync + 'static,
{
    let body = Arc::new(body);
    let config = LaunchConfig::tiled(i_len, j_len, J, I);
    for k in 0..k_len {
        let step = Arc::new(TiledStep::<F, J, I> {
            k,
            rows: i_len,
            cols: j_len,
            body: Arc::clone(&body),
        });
        stream.launch(&step, config)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::DeviceProps, kernels::device::relax, kernels::host};

    #[test]
    fn reduce_sum_counts_the_initial_value_once() {
        let device = Device::new(DeviceProps::v100());
        let stream = device.create_stream();
        let sum = ReduceSum::new(&device, &stream, 10.0_f64).unwrap();
        forall_reduce::<_, _, 128>(&device, &stream, GridPolicy::Exact, 0..1000, &sum, |i| {
            i as f64
        })
        .unwrap();
        assert_eq!(sum.get(&stream).unwrap(), 10.0 + 499_500.0);
    }

    #[test]
    fn occupancy_policy_gives_the_same_sum() {
        let device = Device::new(DeviceProps::tiny());
        let stream = device.create_stream();
        let exact = ReduceSum::new(&device, &stream, 0.0_f64).unwrap();
        let occ = ReduceSum::new(&device, &stream, 0.0_f64).unwrap();
        let body = |i: usize| 1.0 / (1.0 + i as f64);
        forall_reduce::<_, _, 256>(&device, &stream, GridPolicy::Exact, 0..50_000, &exact, body)
            .unwrap();
        forall_reduce::<_, _, 256>(
            &device,
            &stream,
            GridPolicy::OccupancyCalc,
            0..50_000,
            &occ,
            body,
        )
        .unwrap();
        let (a, b) = (exact.get(&stream).unwrap(), occ.get(&stream).unwrap());
        assert!((a - b).abs() / a < 1e-12);
    }

    #[test]
    fn empty_range_reduces_to_the_initial_value() {
        let device = Device::new(DeviceProps::v100());
        let stream = device.create_stream();
        let sum = ReduceSum::new(&device, &stream, 3.5_f32).unwrap();
        forall_reduce::<_, _, 64>(&device, &stream, GridPolicy::OccupancyCalc, 5..5, &sum, |_| {
            1.0_f32
        })
        .unwrap();
        assert_eq!(sum.get(&stream).unwrap(), 3.5);
    }

    #[test]
    fn sequential_outer_dimension_orders_the_steps() {
        let n = 33;
        let input = crate::utils::rand_distance_matrix::<f64>(n, Some(11));
        let device = Device::new(DeviceProps::v100());
        let stream = device.create_stream();
        let m = device.alloc_data::<f64>(n * n).unwrap();
        stream.copy_from_host(&m, &input).unwrap();

        let p = m.as_device_ptr();
        kernel_seq_outer::<_, 32, 4>(&stream, n, n, n, move |k, i, j| relax(&p, &p, k, n, i, j))
            .unwrap();
        assert_eq!(stream.launch_count(), n);

        let mut out = vec![0.0; n * n];
        stream.copy_to_host(&m, &mut out).unwrap();
        let mut expected = input;
        host::floyd_warshall(n, &mut expected);
        assert_eq!(out, expected);
    }
}
