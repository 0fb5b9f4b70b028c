//! Occupancy advisor.
//!
//! Computes how many blocks of a kernel can be simultaneously resident on the device, given the
//! kernel's register and static shared-memory usage, a block size and a dynamic shared-memory
//! footprint. The number of resident blocks per multiprocessor is the minimum of the limits
//! imposed by block slots, thread (warp) slots, registers and shared memory.

use super::{block::KernelAttributes, DeviceProps};
use crate::{
    error::LaunchError,
    utils::{ceil_div, round_up},
};

fn min_assign(lhs: &mut usize, rhs: usize) {
    if rhs < *lhs {
        *lhs = rhs;
    }
}

/// Maximum number of blocks of the kernel resident on a single multiprocessor.
pub fn max_active_blocks_per_sm(
    props: &DeviceProps,
    attrs: &KernelAttributes,
    block_size: usize,
    dynamic_shared_mem: usize,
) -> usize {
    if block_size == 0
        || block_size > props.max_threads_per_block
        || block_size > attrs.max_threads_per_block
    {
        return 0;
    }

    let mut blocks_per_sm = props.max_blocks_per_sm;

    let warps_per_block = ceil_div(block_size, props.warp_size);
    min_assign(
        &mut blocks_per_sm,
        props.max_warps_per_sm() / warps_per_block,
    );

    if attrs.regs_per_thread > 0 {
        let regs_per_warp = round_up(attrs.regs_per_thread * props.warp_size, props.reg_alloc_unit);
        if regs_per_warp * warps_per_block > props.regs_per_block {
            return 0;
        }
        min_assign(
            &mut blocks_per_sm,
            (props.regs_per_sm / regs_per_warp) / warps_per_block,
        );
    }

    let shared_mem = attrs.static_shared_mem_bytes + dynamic_shared_mem;
    if shared_mem > props.shared_mem_per_block {
        return 0;
    }
    if shared_mem > 0 {
        let per_block = round_up(shared_mem, props.shared_mem_alloc_unit);
        min_assign(&mut blocks_per_sm, props.shared_mem_per_sm / per_block);
    }

    blocks_per_sm
}

/// Largest grid size that keeps every block of the kernel resident at once.
///
/// Fails when not even one block fits, since a launch with that footprint cannot run.
pub fn max_blocks(
    props: &DeviceProps,
    attrs: &KernelAttributes,
    block_size: usize,
    dynamic_shared_mem: usize,
) -> Result<usize, LaunchError> {
    let per_sm = max_active_blocks_per_sm(props, attrs, block_size, dynamic_shared_mem);
    if per_sm == 0 {
        return Err(LaunchError::NoResidentBlocks {
            kernel: attrs.name,
            block_size,
            shared_mem_bytes: dynamic_shared_mem,
        });
    }
    Ok(per_sm * props.num_sms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::LaunchConfig;

    use proptest::prelude::*;

    fn attrs(regs_per_thread: usize) -> KernelAttributes {
        KernelAttributes {
            name: "occupancy",
            regs_per_thread,
            static_shared_mem_bytes: 0,
            max_threads_per_block: 1024,
        }
    }

    #[test]
    fn thread_slots_bound_large_blocks() {
        let props = DeviceProps::v100();
        // 2048 threads per SM: two blocks of 1024 threads, 80 SMs.
        assert_eq!(max_blocks(&props, &attrs(16), 1024, 0), Ok(160));
    }

    #[test]
    fn block_slots_bound_small_blocks() {
        let props = DeviceProps::v100();
        assert_eq!(max_active_blocks_per_sm(&props, &attrs(16), 32, 0), 32);
    }

    #[test]
    fn registers_bound_heavy_kernels() {
        let props = DeviceProps::v100();
        // 128 regs * 32 lanes = 4096 regs per warp, 8 warps per block: 65536 / 4096 / 8 = 2.
        assert_eq!(max_active_blocks_per_sm(&props, &attrs(128), 256, 0), 2);
    }

    #[test]
    fn shared_memory_bounds_scratch_heavy_kernels() {
        let props = DeviceProps::v100();
        // 32 KiB per block out of 96 KiB per SM.
        assert_eq!(
            max_active_blocks_per_sm(&props, &attrs(16), 256, 32 * 1024),
            3
        );
    }

    #[test]
    fn unfit_kernel_has_no_resident_blocks() {
        let props = DeviceProps::tiny();
        let err = max_blocks(&props, &attrs(16), 256, props.shared_mem_per_block + 8).unwrap_err();
        assert!(matches!(err, LaunchError::NoResidentBlocks { .. }));
        assert_eq!(max_active_blocks_per_sm(&props, &attrs(16), 2048, 0), 0);
    }

    proptest! {
        #[test]
        fn capped_grid_never_exceeds_naive_grid(
            len in 0usize..10_000_000,
            block_pow in 5u32..11,
            regs in 0usize..96,
            smem in 0usize..49_152,
        ) {
            let props = DeviceProps::v100();
            let block_size = 1usize << block_pow;
            let naive = ceil_div(len, block_size);
            if let Ok(cap) = max_blocks(&props, &attrs(regs), block_size, smem) {
                prop_assert!(cap > 0);
                prop_assert!(cap <= props.num_sms * props.max_blocks_per_sm);
                let capped = LaunchConfig::linear(len, block_size, smem).with_grid_cap(Some(cap));
                prop_assert!(capped.grid.x <= naive);
                prop_assert!(capped.grid.x <= cap);
                prop_assert_eq!(capped.block, LaunchConfig::linear(len, block_size, smem).block);
            }
        }
    }
}
