//! Device kernel implementations.
//!
//! Kernels are compiled for a fixed block size: the block size is a const generic parameter that
//! sizes the block scratch memory and sets the kernel's launch bounds. [`with_block_size!`] is the
//! dispatch table from a runtime block size to the matching monomorphized instance.

use crate::{
    device::{
        block_tree_reduce, BlockCtx, Dim3, DevicePtr, Kernel, KernelAttributes, LaunchConfig,
        Stream,
    },
    error::{DeviceFault, LaunchError},
    utils::HarpFloat,
};

use std::sync::Arc;

/// Evaluates `$body` with the const `$b` bound to `$block_size`, or yields `None` when no kernel
/// instance exists for that block size.
macro_rules! with_block_size {
    ($block_size:expr, $b:ident => $body:expr) => {
        match $block_size {
            32 => {
                const $b: usize = 32;
                Some($body)
            }
            64 => {
                const $b: usize = 64;
                Some($body)
            }
            128 => {
                const $b: usize = 128;
                Some($body)
            }
            256 => {
                const $b: usize = 256;
                Some($body)
            }
            512 => {
                const $b: usize = 512;
                Some($body)
            }
            1024 => {
                const $b: usize = 1024;
                Some($body)
            }
            _ => None,
        }
    };
}
pub(crate) use with_block_size;

/// Evaluates `$body` with the consts `$j` and `$i` bound to the tile extents of a two-dimensional
/// block of `$block_size` threads: [`J_BLOCK_SIZE`] along `j`, the rest along `i`.
///
/// [`J_BLOCK_SIZE`]: crate::consts::J_BLOCK_SIZE
macro_rules! with_tile_shape {
    ($block_size:expr, $j:ident, $i:ident => $body:expr) => {
        match $block_size {
            32 => {
                const $j: usize = $crate::consts::J_BLOCK_SIZE;
                const $i: usize = 32 / $j;
                Some($body)
            }
            64 => {
                const $j: usize = $crate::consts::J_BLOCK_SIZE;
                const $i: usize = 64 / $j;
                Some($body)
            }
            128 => {
                const $j: usize = $crate::consts::J_BLOCK_SIZE;
                const $i: usize = 128 / $j;
                Some($body)
            }
            256 => {
                const $j: usize = $crate::consts::J_BLOCK_SIZE;
                const $i: usize = 256 / $j;
                Some($body)
            }
            512 => {
                const $j: usize = $crate::consts::J_BLOCK_SIZE;
                const $i: usize = 512 / $j;
                Some($body)
            }
            1024 => {
                const $j: usize = $crate::consts::J_BLOCK_SIZE;
                const $i: usize = 1024 / $j;
                Some($body)
            }
            _ => None,
        }
    };
}
pub(crate) use with_tile_shape;

/// Hand-written π reduction: midpoint-rule integration of `4 / (1 + x^2)` over `[0, 1]`.
///
/// Every thread seeds its partial sum with `pi_init`, accumulates `dx / (1 + x_i^2)` over a
/// grid-stride loop, the block tree-reduces the partial sums in scratch memory and thread 0 adds
/// the block total to `dpi` atomically. The initial value is thus counted once per launched
/// thread, on top of the value `dpi` was reset to.
pub struct PiReduce<T, const B: usize> {
    pub dx: T,
    pub dpi: DevicePtr<T>,
    pub pi_init: T,
    pub iend: usize,
}

impl<T: HarpFloat, const B: usize> Kernel for PiReduce<T, B> {
    fn attributes(&self) -> KernelAttributes {
        KernelAttributes {
            name: "pi_reduce",
            regs_per_thread: 24,
            static_shared_mem_bytes: 0,
            max_threads_per_block: B,
        }
    }

    fn run_block(&self, ctx: &mut BlockCtx) -> Result<(), DeviceFault> {
        let mut ppi = ctx.shared::<T, B>()?;
        let stride = ctx.grid_dim().x * B;
        let first = ctx.block_idx().x * B;
        let half = T::from_f64(0.5);

        ctx.for_each_thread(|tid| {
            ppi[tid.x] = self.pi_init;
            let mut i = first + tid.x;
            while i < self.iend {
                let x = (T::from_usize(i) + half) * self.dx;
                ppi[tid.x] += self.dx / (T::one() + x * x);
                i += stride;
            }
            Ok(())
        })?;
        ctx.sync_threads();

        block_tree_reduce(ctx, &mut ppi)?;

        // Blocks finish in any order: a plain load-add-store on `dpi` would lose updates.
        ctx.for_each_thread(|tid| {
            if tid.x == 0 {
                self.dpi.atomic_add(0, ppi[0])?;
            }
            Ok(())
        })
    }
}

/// Floyd-Warshall relaxation of cell `(i, j)` through vertex `k`.
#[inline]
pub fn relax<T: HarpFloat>(
    pout: &DevicePtr<T>,
    pin: &DevicePtr<T>,
    k: usize,
    n: usize,
    i: usize,
    j: usize,
) -> Result<(), DeviceFault> {
    let direct = pin.load(j + i * n)?;
    let through_k = pin.load(k + i * n)? + pin.load(j + k * n)?;
    pout.store(j + i * n, if direct < through_k { direct } else { through_k })
}

/// Global `(i, j)` coordinates of a thread in a `J x I` tiled launch.
#[inline]
fn tile_coords<const J: usize, const I: usize>(ctx: &BlockCtx, tid: Dim3) -> (usize, usize) {
    (
        ctx.block_idx().y * I + tid.y,
        ctx.block_idx().x * J + tid.x,
    )
}

/// Hand-written Floyd-Warshall step `k` over an `n x n` matrix, `J x I` tiles.
pub struct FloydWarshall<T, const J: usize, const I: usize> {
    pub pout: DevicePtr<T>,
    pub pin: DevicePtr<T>,
    pub k: usize,
    pub n: usize,
}

impl<T: HarpFloat, const J: usize, const I: usize> Kernel for FloydWarshall<T, J, I> {
    fn attributes(&self) -> KernelAttributes {
        KernelAttributes {
            name: "floyd_warshall",
            regs_per_thread: 16,
            static_shared_mem_bytes: 0,
            max_threads_per_block: J * I,
        }
    }

    fn run_block(&self, ctx: &mut BlockCtx) -> Result<(), DeviceFault> {
        ctx.for_each_thread(|tid| {
            let (i, j) = tile_coords::<J, I>(ctx, tid);
            if i < self.n && j < self.n {
                relax(&self.pout, &self.pin, self.k, self.n, i, j)?;
            }
            Ok(())
        })
    }
}

/// Tiled two-dimensional kernel running a caller-supplied body on every in-bounds `(i, j)`.
pub struct FloydWarshallLam<F, const J: usize, const I: usize> {
    pub n: usize,
    pub body: F,
}

impl<F, const J: usize, const I: usize> Kernel for FloydWarshallLam<F, J, I>
where
    F: Fn(usize, usize) -> Result<(), DeviceFault> + Send + Sync + 'static,
{
    fn attributes(&self) -> KernelAttributes {
        KernelAttributes {
            name: "floyd_warshall_lam",
            regs_per_thread: 20,
            static_shared_mem_bytes: 0,
            max_threads_per_block: J * I,
        }
    }

    fn run_block(&self, ctx: &mut BlockCtx) -> Result<(), DeviceFault> {
        ctx.for_each_thread(|tid| {
            let (i, j) = tile_coords::<J, I>(ctx, tid);
            if i < self.n && j < self.n {
                (self.body)(i, j)?;
            }
            Ok(())
        })
    }
}

/// Enqueues the `n` steps of Floyd-Warshall on `stream`, one [`FloydWarshall`] launch per `k`,
/// reading `pin` and writing `pout`.
pub fn floyd_warshall_chain<T: HarpFloat, const J: usize, const I: usize>(
    stream: &Stream,
    pout: &DevicePtr<T>,
    pin: &DevicePtr<T>,
    n: usize,
) -> Result<(), LaunchError> {
    let config = LaunchConfig::tiled(n, n, J, I);
    for k in 0..n {
        let step = Arc::new(FloydWarshall::<T, J, I> {
            pout: pout.clone(),
            pin: pin.clone(),
            k,
            n,
        });
        stream.launch(&step, config)?;
    }
    Ok(())
}

/// Same as [`floyd_warshall_chain`] with [`FloydWarshallLam`] launches running [`relax`].
pub fn floyd_warshall_lam_chain<T: HarpFloat, const J: usize, const I: usize>(
    stream: &Stream,
    pout: &DevicePtr<T>,
    pin: &DevicePtr<T>,
    n: usize,
) -> Result<(), LaunchError> {
    let config = LaunchConfig::tiled(n, n, J, I);
    for k in 0..n {
        let (pout, pin) = (pout.clone(), pin.clone());
        let step = Arc::new(FloydWarshallLam::<_, J, I> {
            n,
            body: move |i, j| relax(&pout, &pin, k, n, i, j),
        });
        stream.launch(&step, config)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consts::J_BLOCK_SIZE,
        device::{Device, DeviceProps, SharedMem},
        kernels::host,
    };

    /// Block sizes for which the dispatch tables have an instance.
    const COMPILED_BLOCK_SIZES: [usize; 6] = [32, 64, 128, 256, 512, 1024];

    fn run_pi<const B: usize>(
        device: &Device,
        iend: usize,
        pi_init: f64,
        grid_cap: Option<usize>,
    ) -> f64 {
        let stream = device.create_stream();
        let dpi = device.alloc_data::<f64>(1).unwrap();
        stream.copy_from_host(&dpi, &[pi_init]).unwrap();
        let kernel = Arc::new(PiReduce::<f64, B> {
            dx: 1.0 / iend.max(1) as f64,
            dpi: dpi.as_device_ptr(),
            pi_init,
            iend,
        });
        let cfg =
            LaunchConfig::linear(iend, B, SharedMem::<f64, B>::BYTES).with_grid_cap(grid_cap);
        stream.launch(&kernel, cfg).unwrap();
        let mut pi = [0.0];
        stream.copy_to_host(&dpi, &mut pi).unwrap();
        pi[0]
    }

    #[test]
    fn pi_reduce_matches_the_midpoint_sum() {
        let device = Device::new(DeviceProps::v100());
        let iend = 100_000;
        let expected = host::pi_reduce::<f64>(iend, 1.0 / iend as f64, 0.0);
        let sum = run_pi::<256>(&device, iend, 0.0, None);
        assert!((4.0 * sum - expected).abs() < 1e-10);
        assert!((4.0 * sum - std::f64::consts::PI).abs() < 1e-8);
    }

    #[test]
    fn empty_domain_leaves_the_initial_value() {
        let device = Device::new(DeviceProps::v100());
        assert_eq!(run_pi::<128>(&device, 0, 0.25, None), 0.25);
    }

    #[test]
    fn initial_value_is_counted_once_per_thread() {
        let device = Device::new(DeviceProps::v100());
        // 1000 elements, 4 blocks of 256 threads: 1024 seeded partial sums plus the reset value.
        let iend = 1000;
        let pi_init = 1.0;
        let sum = run_pi::<256>(&device, iend, pi_init, None);
        let integral = host::pi_reduce::<f64>(iend, 1.0 / iend as f64, 0.0) / 4.0;
        assert!((sum - (integral + 1025.0)).abs() < 1e-9);
    }

    #[test]
    fn occupancy_capped_grid_strides_over_the_domain() {
        let device = Device::new(DeviceProps::v100());
        let iend = 1 << 18;
        let full = run_pi::<512>(&device, iend, 0.0, None);
        let capped = run_pi::<512>(&device, iend, 0.0, Some(7));
        assert!((full - capped).abs() / full < 1e-12);
    }

    #[test]
    fn dispatch_table_covers_compiled_sizes_only() {
        for bs in COMPILED_BLOCK_SIZES {
            assert_eq!(with_block_size!(bs, B => B), Some(bs));
        }
        assert_eq!(with_block_size!(48usize, B => B), None);
        assert_eq!(with_block_size!(2048usize, B => B), None);
    }

    #[test]
    fn tile_shapes_split_the_block_along_i() {
        for bs in COMPILED_BLOCK_SIZES {
            assert_eq!(
                with_tile_shape!(bs, J, I => (J, I)),
                Some((J_BLOCK_SIZE, bs / J_BLOCK_SIZE))
            );
        }
        assert_eq!(with_tile_shape!(16usize, J, I => J * I), None);
    }

    #[test]
    fn compiled_and_functional_relaxations_agree() {
        let n = 45;
        let input = crate::utils::rand_distance_matrix::<f64>(n, Some(3));
        let device = Device::new(DeviceProps::v100());
        let stream = device.create_stream();

        let a = device.alloc_data::<f64>(n * n).unwrap();
        let b = device.alloc_data::<f64>(n * n).unwrap();
        stream.copy_from_host(&a, &input).unwrap();
        stream.copy_from_host(&b, &input).unwrap();
        let (pa, pb) = (a.as_device_ptr(), b.as_device_ptr());
        floyd_warshall_chain::<f64, 32, 2>(&stream, &pa, &pa, n).unwrap();
        floyd_warshall_lam_chain::<f64, 32, 2>(&stream, &pb, &pb, n).unwrap();
        assert_eq!(stream.launch_count(), 2 * n);

        let mut out_a = vec![0.0; n * n];
        let mut out_b = vec![0.0; n * n];
        stream.copy_to_host(&a, &mut out_a).unwrap();
        stream.copy_to_host(&b, &mut out_b).unwrap();

        let mut expected = input.clone();
        host::floyd_warshall(n, &mut expected);
        assert_eq!(out_a, expected);
        assert_eq!(out_b, expected);
    }

    #[test]
    fn steps_that_miss_earlier_writes_lose_paths() {
        // 0 -> 1 -> 2 -> 3, unit weights: the path 0 -> 3 needs intermediates 1 and 2.
        let inf = f64::INFINITY;
        #[rustfmt::skip]
        let input = vec![
            0.0, 1.0, inf, inf,
            inf, 0.0, 1.0, inf,
            inf, inf, 0.0, 1.0,
            inf, inf, inf, 0.0,
        ];
        let device = Device::new(DeviceProps::v100());
        let stream = device.create_stream();
        let snapshot = device.alloc_data::<f64>(16).unwrap();
        let out = device.alloc_data::<f64>(16).unwrap();
        stream.copy_from_host(&snapshot, &input).unwrap();
        stream.copy_from_host(&out, &input).unwrap();

        // Every step reads the unrelaxed snapshot instead of the previous step's output.
        let (pout, pin) = (out.as_device_ptr(), snapshot.as_device_ptr());
        floyd_warshall_chain::<f64, 32, 1>(&stream, &pout, &pin, 4).unwrap();
        let mut stale = vec![0.0; 16];
        stream.copy_to_host(&out, &mut stale).unwrap();

        let mut expected = input.clone();
        host::floyd_warshall(4, &mut expected);
        assert_eq!(expected[3], 3.0);
        assert_eq!(stale[3], inf);
        assert_ne!(stale, expected);
    }
}
