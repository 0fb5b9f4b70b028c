//! Software accelerator.
//!
//! This module provides the device the benchmarked kernels run on: a simulated GPU executing on
//! the host with the same programming model as CUDA or OpenCL devices. Kernels are launched over a
//! grid of thread blocks on an in-order [`Stream`], blocks run concurrently on the [`rayon`][1]
//! thread pool, threads of a block cooperate through block-local scratch memory and barriers, and
//! global memory lives in [`DeviceBuffer`]s allocated and released through the [`Device`].
//!
//! The device is described by its [`DeviceProps`] which bound launch configurations and drive the
//! [`occupancy`] advisor.
//!
//! [1]: https://crates.io/crates/rayon

pub mod block;
pub mod launch;
pub mod memory;
pub mod occupancy;
pub mod stream;

pub use block::{block_tree_reduce, BlockCtx, Kernel, KernelAttributes, SharedMem};
pub use launch::{Dim3, LaunchConfig};
pub use memory::{DeviceBuffer, DevicePtr};
pub use stream::Stream;

use crate::{error::AllocError, error::LaunchError, utils::HarpFloat};
use memory::MemoryUsage;

use std::sync::{atomic::Ordering, Arc};

/// Hardware limits of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceProps {
    /// Marketing name of the device.
    pub name: &'static str,
    /// Number of streaming multiprocessors (compute units).
    pub num_sms: usize,
    /// Number of threads scheduled together.
    pub warp_size: usize,
    pub max_threads_per_block: usize,
    pub max_threads_per_sm: usize,
    pub max_blocks_per_sm: usize,
    pub max_block_dims: Dim3,
    pub max_grid_dims: Dim3,
    pub regs_per_sm: usize,
    pub regs_per_block: usize,
    /// Registers are allocated per warp in multiples of this value.
    pub reg_alloc_unit: usize,
    pub shared_mem_per_sm: usize,
    pub shared_mem_per_block: usize,
    /// Shared memory is allocated per block in multiples of this value.
    pub shared_mem_alloc_unit: usize,
    /// Global memory size in bytes.
    pub global_mem_bytes: usize,
}

impl DeviceProps {
    /// NVIDIA Tesla V100 (compute capability 7.0).
    pub const fn v100() -> Self {
        Self {
            name: "Tesla V100",
            num_sms: 80,
            warp_size: 32,
            max_threads_per_block: 1024,
            max_threads_per_sm: 2048,
            max_blocks_per_sm: 32,
            max_block_dims: Dim3::xyz(1024, 1024, 64),
            max_grid_dims: Dim3::xyz(2_147_483_647, 65_535, 65_535),
            regs_per_sm: 65_536,
            regs_per_block: 65_536,
            reg_alloc_unit: 256,
            shared_mem_per_sm: 96 * 1024,
            shared_mem_per_block: 48 * 1024,
            shared_mem_alloc_unit: 256,
            global_mem_bytes: 16 << 30,
        }
    }

    /// NVIDIA A100 (compute capability 8.0).
    pub const fn a100() -> Self {
        Self {
            name: "A100",
            num_sms: 108,
            max_threads_per_sm: 2048,
            shared_mem_per_sm: 164 * 1024,
            shared_mem_alloc_unit: 128,
            global_mem_bytes: 40 << 30,
            ..Self::v100()
        }
    }

    /// AMD Instinct MI250X, one graphics compute die.
    pub const fn mi250x() -> Self {
        Self {
            name: "Instinct MI250X",
            num_sms: 110,
            warp_size: 64,
            max_threads_per_sm: 2560,
            max_blocks_per_sm: 32,
            regs_per_sm: 131_072,
            regs_per_block: 131_072,
            reg_alloc_unit: 512,
            shared_mem_per_sm: 64 * 1024,
            shared_mem_per_block: 64 * 1024,
            global_mem_bytes: 64 << 30,
            ..Self::v100()
        }
    }

    /// Small device with tight limits, handy to exercise resource errors.
    pub const fn tiny() -> Self {
        Self {
            name: "tiny",
            num_sms: 2,
            warp_size: 32,
            max_threads_per_block: 256,
            max_threads_per_sm: 512,
            max_blocks_per_sm: 4,
            max_block_dims: Dim3::xyz(256, 256, 64),
            max_grid_dims: Dim3::xyz(65_535, 65_535, 65_535),
            regs_per_sm: 16_384,
            regs_per_block: 16_384,
            reg_alloc_unit: 256,
            shared_mem_per_sm: 8 * 1024,
            shared_mem_per_block: 4 * 1024,
            shared_mem_alloc_unit: 256,
            global_mem_bytes: 64 << 20,
        }
    }

    pub const fn max_warps_per_sm(&self) -> usize {
        self.max_threads_per_sm / self.warp_size
    }
}

/// Handle on the accelerator: memory allocation, streams and occupancy queries.
pub struct Device {
    props: DeviceProps,
    usage: Arc<MemoryUsage>,
}

impl Device {
    pub fn new(props: DeviceProps) -> Self {
        Self {
            props,
            usage: Arc::default(),
        }
    }

    pub fn props(&self) -> &DeviceProps {
        &self.props
    }

    /// Creates a new in-order stream on this device.
    pub fn create_stream(&self) -> Stream {
        Stream::new(self.props)
    }

    /// Allocates a zero-initialized device buffer of `len` elements.
    pub fn alloc_data<T: HarpFloat>(&self, len: usize) -> Result<DeviceBuffer<T>, AllocError> {
        let requested = DeviceBuffer::<T>::bytes_for(len);
        let available = self
            .props
            .global_mem_bytes
            .saturating_sub(self.allocated_bytes());
        if requested > available {
            return Err(AllocError::OutOfMemory {
                requested,
                available,
            });
        }
        Ok(DeviceBuffer::zeroed(len, Arc::clone(&self.usage)))
    }

    /// Releases a device buffer.
    pub fn dealloc_data<T>(&self, buffer: DeviceBuffer<T>) {
        drop(buffer);
        log::trace!(
            "{} buffers ({} bytes) still allocated",
            self.live_allocations(),
            self.allocated_bytes()
        );
    }

    /// Number of buffers currently allocated.
    pub fn live_allocations(&self) -> usize {
        self.usage.live.load(Ordering::Relaxed)
    }

    /// Bytes of device memory currently allocated.
    pub fn allocated_bytes(&self) -> usize {
        self.usage.bytes.load(Ordering::Relaxed)
    }

    /// Maximum number of simultaneously resident blocks of a kernel, see
    /// [`occupancy::max_blocks`].
    pub fn occupancy_max_blocks(
        &self,
        attrs: &KernelAttributes,
        block_size: usize,
        dynamic_shared_mem: usize,
    ) -> Result<usize, LaunchError> {
        occupancy::max_blocks(&self.props, attrs, block_size, dynamic_shared_mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_tracked_until_released() {
        let device = Device::new(DeviceProps::tiny());
        let a = device.alloc_data::<f64>(1024).unwrap();
        let b = device.alloc_data::<f32>(16).unwrap();
        assert_eq!(device.live_allocations(), 2);
        assert_eq!(device.allocated_bytes(), 1024 * 8 + 16 * 4);
        device.dealloc_data(a);
        device.dealloc_data(b);
        assert_eq!(device.live_allocations(), 0);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn allocation_beyond_global_memory_fails() {
        let device = Device::new(DeviceProps::tiny());
        let _held = device.alloc_data::<f64>(4 << 20).unwrap();
        let err = device.alloc_data::<f64>(5 << 20).err().unwrap();
        assert_eq!(
            err,
            AllocError::OutOfMemory {
                requested: 40 << 20,
                available: 32 << 20
            }
        );
    }
}
