//! Program Build and Kernel Launch
//!
//! Loads a compute binary (SPIR-V IL) into a program, builds it for the
//! context's device, looks up kernels by name, binds arguments in
//! declaration order and enqueues ND-range launches. The build log is
//! captured on failure.

use std::ffi::{c_void, CString};
use std::ptr;

use crate::error::{Result, ScsanError};

use super::context::{get_driver, ClContext};
use super::memory::ClBuffer;
use super::sys::{cl_kernel, cl_program, ClDriver, CL_PROGRAM_BUILD_LOG, CL_SUCCESS};

/// A built device program with RAII cleanup
pub struct ClProgram {
    program: cl_program,
}

// SAFETY: program handles are valid across threads for lookup
unsafe impl Send for ClProgram {}
unsafe impl Sync for ClProgram {}

impl ClProgram {
    /// Create a program from SPIR-V IL bytes and build it
    ///
    /// # Errors
    ///
    /// Returns `Err(ScsanError::ProgramBuild)` with the device build log if
    /// compilation fails.
    pub fn from_il(ctx: &ClContext, il: &[u8]) -> Result<Self> {
        let driver = get_driver()?;

        let mut errcode = 0;
        // SAFETY: il points to `il.len()` readable bytes
        let program = unsafe {
            (driver.clCreateProgramWithIL)(
                ctx.raw(),
                il.as_ptr().cast(),
                il.len(),
                &mut errcode,
            )
        };
        ClDriver::check(errcode, "clCreateProgramWithIL")?;

        let device = ctx.device();
        // SAFETY: program and device are valid handles
        let result = unsafe {
            (driver.clBuildProgram)(
                program,
                1,
                &device,
                ptr::null(),
                ptr::null(),
                ptr::null_mut(),
            )
        };
        if result != CL_SUCCESS {
            let log = build_log(driver, program, ctx);
            // SAFETY: program is valid and owned here
            unsafe {
                let _ = (driver.clReleaseProgram)(program);
            }
            return Err(ScsanError::ProgramBuild(log));
        }

        Ok(Self { program })
    }

    /// Look up a kernel by its name in the binary
    ///
    /// # Errors
    ///
    /// Returns `Err(ScsanError::KernelNotFound)` if the name does not
    /// resolve.
    pub fn kernel(&self, name: &str) -> Result<ClKernel> {
        let driver = get_driver()?;
        let c_name =
            CString::new(name).map_err(|_| ScsanError::KernelNotFound(name.to_string()))?;

        let mut errcode = 0;
        // SAFETY: program is valid, c_name is null-terminated
        let kernel =
            unsafe { (driver.clCreateKernel)(self.program, c_name.as_ptr(), &mut errcode) };
        if errcode != CL_SUCCESS {
            return Err(ScsanError::KernelNotFound(name.to_string()));
        }

        Ok(ClKernel { kernel })
    }
}

impl Drop for ClProgram {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: program is valid from the constructor
            unsafe {
                let _ = (driver.clReleaseProgram)(self.program);
            }
        }
    }
}

fn build_log(driver: &ClDriver, program: cl_program, ctx: &ClContext) -> String {
    let mut size = 0usize;
    // SAFETY: size is a valid pointer
    let result = unsafe {
        (driver.clGetProgramBuildInfo)(
            program,
            ctx.device(),
            CL_PROGRAM_BUILD_LOG,
            0,
            ptr::null_mut(),
            &mut size,
        )
    };
    if result != CL_SUCCESS || size == 0 {
        return "build log unavailable".to_string();
    }

    let mut log = vec![0u8; size];
    // SAFETY: log has room for `size` bytes
    let result = unsafe {
        (driver.clGetProgramBuildInfo)(
            program,
            ctx.device(),
            CL_PROGRAM_BUILD_LOG,
            size,
            log.as_mut_ptr().cast(),
            ptr::null_mut(),
        )
    };
    if result != CL_SUCCESS {
        return "build log unavailable".to_string();
    }
    String::from_utf8_lossy(&log)
        .trim_end_matches('\0')
        .to_string()
}

/// A kernel handle with RAII cleanup
pub struct ClKernel {
    kernel: cl_kernel,
}

// SAFETY: kernel handles are externally synchronized by the wrappers
unsafe impl Send for ClKernel {}

impl ClKernel {
    /// Bind a device buffer at `index` (declaration order)
    pub fn bind_buffer<T: Copy>(&self, index: u32, buffer: &ClBuffer<T>) -> Result<()> {
        let driver = get_driver()?;
        let mem = buffer.raw();
        // SAFETY: kernel is valid; arg value is a cl_mem by-value
        let result = unsafe {
            (driver.clSetKernelArg)(
                self.kernel,
                index,
                std::mem::size_of_val(&mem),
                &mem as *const _ as *const c_void,
            )
        };
        ClDriver::check(result, "clSetKernelArg")
    }

    /// Bind a 64-bit scalar at `index` (declaration order)
    pub fn bind_scalar_u64(&self, index: u32, value: u64) -> Result<()> {
        let driver = get_driver()?;
        // SAFETY: kernel is valid; arg value is a u64 by-value
        let result = unsafe {
            (driver.clSetKernelArg)(
                self.kernel,
                index,
                std::mem::size_of::<u64>(),
                &value as *const _ as *const c_void,
            )
        };
        ClDriver::check(result, "clSetKernelArg")
    }

    /// Bind a 32-bit scalar at `index` (declaration order)
    pub fn bind_scalar_u32(&self, index: u32, value: u32) -> Result<()> {
        let driver = get_driver()?;
        // SAFETY: kernel is valid; arg value is a u32 by-value
        let result = unsafe {
            (driver.clSetKernelArg)(
                self.kernel,
                index,
                std::mem::size_of::<u32>(),
                &value as *const _ as *const c_void,
            )
        };
        ClDriver::check(result, "clSetKernelArg")
    }

    /// Enqueue a 1-D launch and wait for it to finish
    pub fn launch(&self, ctx: &ClContext, global_size: usize, local_size: usize) -> Result<()> {
        if local_size == 0 || global_size == 0 || global_size % local_size != 0 {
            return Err(ScsanError::Launch(format!(
                "global size {} is not a positive multiple of local size {}",
                global_size, local_size
            )));
        }
        let driver = get_driver()?;
        // SAFETY: all handles are valid; sizes point to single usize values
        let result = unsafe {
            (driver.clEnqueueNDRangeKernel)(
                ctx.queue(),
                self.kernel,
                1,
                ptr::null(),
                &global_size,
                &local_size,
                0,
                ptr::null(),
                ptr::null_mut(),
            )
        };
        ClDriver::check(result, "clEnqueueNDRangeKernel")?;
        ctx.finish()
    }
}

impl Drop for ClKernel {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: kernel is valid from the constructor
            unsafe {
                let _ = (driver.clReleaseKernel)(self.kernel);
            }
        }
    }
}
