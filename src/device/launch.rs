//! Kernel launch descriptors.
//!
//! A [`LaunchConfig`] is the grid configuration of a single launch: grid shape, block shape and
//! dynamic shared-memory footprint. It is derived fresh for every launch from the problem size
//! and the tuning, then checked against the device limits and the kernel's attributes before the
//! launch is enqueued.

use super::{block::KernelAttributes, DeviceProps};
use crate::{
    error::LaunchError,
    utils::{ceil_div, round_up},
};

use std::fmt;

/// Three-dimensional extent of a grid or of a thread block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dim3 {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

/// Number of blocks along each dimension of a grid.
pub type GridSize = Dim3;

/// Number of threads along each dimension of a block.
pub type BlockSize = Dim3;

impl Dim3 {
    /// Origin of a grid or block, the index of its first element.
    pub const ZERO: Self = Self::xyz(0, 0, 0);

    pub const fn x(x: usize) -> Self {
        Self { x, y: 1, z: 1 }
    }

    pub const fn xy(x: usize, y: usize) -> Self {
        Self { x, y, z: 1 }
    }

    pub const fn xyz(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Total number of elements covered by this extent.
    pub const fn size(&self) -> usize {
        self.x * self.y * self.z
    }

    /// Converts a linear index (x fastest) into coordinates within this extent.
    pub const fn unflatten(&self, idx: usize) -> Dim3 {
        Dim3 {
            x: idx % self.x,
            y: (idx / self.x) % self.y,
            z: idx / (self.x * self.y),
        }
    }

    fn fits_within(&self, limit: Dim3) -> bool {
        self.x <= limit.x && self.y <= limit.y && self.z <= limit.z
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Grid configuration of one kernel launch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid: GridSize,
    pub block: BlockSize,
    /// Dynamic shared memory per block, in bytes.
    pub shared_mem_bytes: usize,
}

impl LaunchConfig {
    pub const fn new(grid: GridSize, block: BlockSize, shared_mem_bytes: usize) -> Self {
        Self {
            grid,
            block,
            shared_mem_bytes,
        }
    }

    /// One-dimensional launch covering `len` elements with one thread per element.
    ///
    /// An empty domain yields an empty grid, which the device accepts as a launch without work.
    pub fn linear(len: usize, block_size: usize, shared_mem_bytes: usize) -> Self {
        Self::new(
            GridSize::x(ceil_div(len, block_size.max(1))),
            BlockSize::x(block_size),
            shared_mem_bytes,
        )
    }

    /// Two-dimensional launch covering a `rows x cols` domain with `j_block x i_block` tiles,
    /// `j` running along x (columns) and `i` along y (rows).
    pub fn tiled(rows: usize, cols: usize, j_block: usize, i_block: usize) -> Self {
        Self::new(
            GridSize::xy(ceil_div(cols, j_block.max(1)), ceil_div(rows, i_block.max(1))),
            BlockSize::xy(j_block, i_block),
            0,
        )
    }

    /// Clamps the number of blocks along x to `cap`, if any.
    pub fn with_grid_cap(mut self, cap: Option<usize>) -> Self {
        if let Some(cap) = cap {
            self.grid.x = self.grid.x.min(cap);
        }
        self
    }

    /// Total number of device threads of the launch.
    pub const fn total_threads(&self) -> usize {
        self.grid.size() * self.block.size()
    }

    /// Checks the configuration against the device limits and the kernel's resource usage.
    pub fn validate(
        &self,
        props: &DeviceProps,
        attrs: &KernelAttributes,
    ) -> Result<(), LaunchError> {
        let kernel = attrs.name;
        let threads = self.block.size();

        if threads == 0 {
            return Err(LaunchError::InvalidConfiguration {
                kernel,
                reason: format!("empty block {}", self.block),
            });
        }
        let thread_limit = props.max_threads_per_block.min(attrs.max_threads_per_block);
        if threads > thread_limit {
            return Err(LaunchError::TooManyThreads {
                kernel,
                requested: threads,
                limit: thread_limit,
            });
        }
        if !self.block.fits_within(props.max_block_dims) {
            return Err(LaunchError::InvalidConfiguration {
                kernel,
                reason: format!(
                    "block {} exceeds maximum block dimensions {}",
                    self.block, props.max_block_dims
                ),
            });
        }
        if !self.grid.fits_within(props.max_grid_dims) {
            return Err(LaunchError::InvalidConfiguration {
                kernel,
                reason: format!(
                    "grid {} exceeds maximum grid dimensions {}",
                    self.grid, props.max_grid_dims
                ),
            });
        }

        let smem = attrs.static_shared_mem_bytes + self.shared_mem_bytes;
        if smem > props.shared_mem_per_block {
            return Err(LaunchError::SharedMemExceeded {
                kernel,
                requested: smem,
                limit: props.shared_mem_per_block,
            });
        }

        let warps = ceil_div(threads, props.warp_size);
        let regs = round_up(attrs.regs_per_thread * props.warp_size, props.reg_alloc_unit) * warps;
        if regs > props.regs_per_block {
            return Err(LaunchError::TooManyRegisters {
                kernel,
                requested: regs,
                limit: props.regs_per_block,
            });
        }

        Ok(())
    }
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "grid={} block={} smem={}B",
            self.grid, self.block, self.shared_mem_bytes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs() -> KernelAttributes {
        KernelAttributes {
            name: "test",
            regs_per_thread: 32,
            static_shared_mem_bytes: 0,
            max_threads_per_block: 1024,
        }
    }

    #[test]
    fn linear_grid_is_ceiling_of_length() {
        let cfg = LaunchConfig::linear(1000, 256, 2048);
        assert_eq!(cfg.grid, GridSize::x(4));
        assert_eq!(cfg.block, BlockSize::x(256));
        assert_eq!(cfg.total_threads(), 1024);

        let empty = LaunchConfig::linear(0, 256, 2048);
        assert_eq!(empty.grid.size(), 0);
        assert!(empty.validate(&DeviceProps::v100(), &attrs()).is_ok());
    }

    #[test]
    fn tiles_run_independently_along_each_axis() {
        let cfg = LaunchConfig::tiled(100, 70, 32, 8);
        assert_eq!(cfg.block, BlockSize::xy(32, 8));
        assert_eq!(cfg.grid, GridSize::xy(3, 13));
    }

    #[test]
    fn grid_cap_only_shrinks() {
        let cfg = LaunchConfig::linear(1 << 20, 256, 0);
        assert_eq!(cfg.with_grid_cap(Some(160)).grid.x, 160);
        assert_eq!(cfg.with_grid_cap(Some(1 << 30)).grid.x, 4096);
        assert_eq!(cfg.with_grid_cap(None).grid.x, 4096);
    }

    #[test]
    fn oversized_blocks_are_rejected() {
        let props = DeviceProps::v100();
        let err = LaunchConfig::linear(4096, 2048, 0)
            .validate(&props, &attrs())
            .unwrap_err();
        assert!(matches!(err, LaunchError::TooManyThreads { limit: 1024, .. }));

        let bounded = KernelAttributes {
            max_threads_per_block: 256,
            ..attrs()
        };
        let err = LaunchConfig::linear(4096, 512, 0)
            .validate(&props, &bounded)
            .unwrap_err();
        assert!(matches!(err, LaunchError::TooManyThreads { limit: 256, .. }));

        let err = LaunchConfig::linear(4096, 512, 0)
            .validate(&DeviceProps::tiny(), &attrs())
            .unwrap_err();
        assert!(matches!(err, LaunchError::TooManyThreads { requested: 512, .. }));
    }

    #[test]
    fn blocks_within_the_thread_limit_still_respect_each_dimension() {
        let props = DeviceProps::v100();
        let cfg = LaunchConfig::new(GridSize::x(1), BlockSize::xyz(1, 1, 128), 0);
        let err = cfg.validate(&props, &attrs()).unwrap_err();
        assert!(matches!(err, LaunchError::InvalidConfiguration { .. }));
    }

    #[test]
    fn first_block_of_any_grid_is_the_origin() {
        for grid in [GridSize::x(7), GridSize::xy(3, 5), GridSize::xyz(2, 2, 2)] {
            assert_eq!(grid.unflatten(0), Dim3::ZERO);
        }
        assert_ne!(Dim3::x(0), Dim3::ZERO);
    }

    #[test]
    fn shared_memory_over_limit_is_rejected() {
        let props = DeviceProps::v100();
        let err = LaunchConfig::linear(4096, 256, props.shared_mem_per_block + 1)
            .validate(&props, &attrs())
            .unwrap_err();
        assert!(matches!(err, LaunchError::SharedMemExceeded { .. }));
    }

    #[test]
    fn register_pressure_is_rejected() {
        let props = DeviceProps::v100();
        let greedy = KernelAttributes {
            regs_per_thread: 255,
            ..attrs()
        };
        let err = LaunchConfig::linear(4096, 1024, 0)
            .validate(&props, &greedy)
            .unwrap_err();
        assert!(matches!(err, LaunchError::TooManyRegisters { .. }));
    }

    #[test]
    fn unflatten_is_x_fastest() {
        let extent = Dim3::xyz(4, 3, 2);
        assert_eq!(extent.unflatten(0), Dim3::xyz(0, 0, 0));
        assert_eq!(extent.unflatten(5), Dim3::xyz(1, 1, 0));
        assert_eq!(extent.unflatten(23), Dim3::xyz(3, 2, 1));
    }
}
