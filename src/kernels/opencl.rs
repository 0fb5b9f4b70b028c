//! OpenCL kernel sources.

/// Represents an OpenCL kernel.
///
/// OpenCL kernels cannot be written in Rust: they are written in OpenCL C and the source code is
/// imported as raw text, compiled by the OpenCL runtime when the program is built.
pub struct DeviceKernel {
    kernel_name: &'static str,
    kernel_source: &'static str,
}

impl DeviceKernel {
    /// Creates a `DeviceKernel` from a kernel name (actual name of the kernel function in the
    /// source code) and a kernel source code (generally a file's contents).
    pub const fn new(kernel_name: &'static str, kernel_source: &'static str) -> Self {
        Self {
            kernel_name,
            kernel_source,
        }
    }

    /// Returns the function name of the given kernel.
    pub fn name(&self) -> &'static str {
        self.kernel_name
    }

    /// Returns the source code for the given kernel.
    pub fn source(&self) -> &'static str {
        self.kernel_source
    }
}

/// Name and source code of the single-precision π reduction.
pub static CL_SPI_REDUCE: DeviceKernel = DeviceKernel::new(
    "spi_reduce",
    include_str!("../../kernels/opencl/spi_reduce.cl"),
);

/// Name and source code of the double-precision π reduction.
pub static CL_DPI_REDUCE: DeviceKernel = DeviceKernel::new(
    "dpi_reduce",
    include_str!("../../kernels/opencl/dpi_reduce.cl"),
);

/// Name and source code of the single-precision Floyd-Warshall step.
pub static CL_SFLOYD_WARSHALL: DeviceKernel = DeviceKernel::new(
    "sfloyd_warshall",
    include_str!("../../kernels/opencl/sfloyd_warshall.cl"),
);

/// Name and source code of the double-precision Floyd-Warshall step.
pub static CL_DFLOYD_WARSHALL: DeviceKernel = DeviceKernel::new(
    "dfloyd_warshall",
    include_str!("../../kernels/opencl/dfloyd_warshall.cl"),
);
