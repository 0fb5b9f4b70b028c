//! Kernel implementations.
//!
//! This modules contains the actual implementation of the host and device kernels. Device
//! kernels written by hand live in [`device`]; the same computations expressed through the
//! portability layer are in [`crate::portable`]. With the `opencl` feature, `opencl` holds the
//! OpenCL C sources of both kernels.

pub mod device;
pub mod host;
#[cfg(feature = "opencl")]
pub mod opencl;
