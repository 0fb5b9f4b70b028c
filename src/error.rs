//! Error types.
//!
//! Errors are split by the point at which they surface:
//! - [`ConfigError`]: rejected before anything is enqueued, reported and skipped;
//! - [`LaunchError`]: the device refuses a launch configuration, detected right after enqueue;
//! - [`SyncError`]: a device-side fault observed at a blocking synchronization point;
//! - [`AllocError`]: device memory exhaustion.
//!
//! Failing to write the performance reports is a [`HarpError::Report`].
//!
//! Everything but a configuration error is fatal for the kernel being benchmarked.

use thiserror::Error;

/// Rejection of a kernel launch configuration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LaunchError {
    #[error("invalid launch configuration for `{kernel}`: {reason}")]
    InvalidConfiguration {
        kernel: &'static str,
        reason: String,
    },
    #[error("`{kernel}` launched with {requested} threads per block, limit is {limit}")]
    TooManyThreads {
        kernel: &'static str,
        requested: usize,
        limit: usize,
    },
    #[error("`{kernel}` requests {requested} bytes of shared memory per block, limit is {limit}")]
    SharedMemExceeded {
        kernel: &'static str,
        requested: usize,
        limit: usize,
    },
    #[error("`{kernel}` needs {requested} registers per block, limit is {limit}")]
    TooManyRegisters {
        kernel: &'static str,
        requested: usize,
        limit: usize,
    },
    #[error("no block of `{kernel}` can be resident with {block_size} threads and {shared_mem_bytes} bytes of shared memory")]
    NoResidentBlocks {
        kernel: &'static str,
        block_size: usize,
        shared_mem_bytes: usize,
    },
    #[error("stream is closed")]
    StreamClosed,
}

/// Fault raised by a kernel while executing on the device.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeviceFault {
    #[error("illegal address: index {index} out of bounds for buffer of length {len}")]
    IllegalAddress { index: usize, len: usize },
    #[error("shared memory overflow: {required} bytes required, {available} bytes allocated")]
    SharedMemOverflow { required: usize, available: usize },
}

/// Error surfaced at a blocking synchronization point.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("device fault: {0}")]
    Fault(#[from] DeviceFault),
    #[error("device worker terminated unexpectedly")]
    WorkerLost,
}

/// Device memory allocation failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("out of device memory: {requested} bytes requested, {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },
}

/// Benchmark configuration errors. These are diagnostic only.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{kernel} : Unknown Device variant id = {variant}")]
    UnknownVariant {
        kernel: &'static str,
        variant: String,
    },
    #[error("{kernel} : block size {block_size} exceeds the device limit of {limit}")]
    BlockSizeAboveLimit {
        kernel: &'static str,
        block_size: usize,
        limit: usize,
    },
    #[error("{kernel} : no compiled kernel instance for block size {block_size}")]
    UnsupportedBlockSize {
        kernel: &'static str,
        block_size: usize,
    },
}

/// Umbrella error type of the benchmark drivers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HarpError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("launch error: {0}")]
    Launch(#[from] LaunchError),
    #[error("synchronization error: {0}")]
    Sync(#[from] SyncError),
    #[error("allocation error: {0}")]
    Alloc(#[from] AllocError),
    #[error("failed to write reports: {0}")]
    Report(String),
}

impl HarpError {
    /// Whether the error must abort the benchmarking of the current kernel.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

impl From<DeviceFault> for HarpError {
    fn from(fault: DeviceFault) -> Self {
        Self::Sync(SyncError::Fault(fault))
    }
}

impl From<std::io::Error> for HarpError {
    fn from(err: std::io::Error) -> Self {
        Self::Report(err.to_string())
    }
}

#[cfg(feature = "opencl")]
impl From<ocl::Error> for HarpError {
    fn from(err: ocl::Error) -> Self {
        Self::Launch(LaunchError::InvalidConfiguration {
            kernel: "opencl",
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_config_errors_are_recoverable() {
        let config: HarpError = ConfigError::UnsupportedBlockSize {
            kernel: "PI_REDUCE",
            block_size: 48,
        }
        .into();
        assert!(!config.is_fatal());

        let launch: HarpError = LaunchError::StreamClosed.into();
        assert!(launch.is_fatal());

        let fault: HarpError = DeviceFault::IllegalAddress { index: 9, len: 9 }.into();
        assert!(fault.is_fatal());
        assert!(matches!(fault, HarpError::Sync(SyncError::Fault(_))));
    }

    #[test]
    fn unknown_variant_message() {
        let err = ConfigError::UnknownVariant {
            kernel: "PI_REDUCE",
            variant: "Lambda_Device".into(),
        };
        assert_eq!(
            err.to_string(),
            "PI_REDUCE : Unknown Device variant id = Lambda_Device"
        );
    }
}
