//! Minimal OpenCL FFI Bindings
//!
//! Hand-written FFI for the ~18 OpenCL entry points we actually need.
//! Dynamic loading via libOpenCL.so/OpenCL.dll; no link-time dependency on
//! a vendor SDK.
//!
//! # Safety
//!
//! All function pointers in this module are unsafe to call. Safe wrappers
//! live in the sibling modules (context.rs, program.rs, memory.rs).

use std::ffi::c_void;
use std::os::raw::{c_char, c_int, c_uint};

use crate::error::{Result, ScsanError};

// ============================================================================
// OpenCL Type Definitions (from CL/cl.h)
// ============================================================================

/// OpenCL error code
pub type cl_int = c_int;
/// OpenCL unsigned scalar
pub type cl_uint = c_uint;
/// OpenCL 64-bit bitfield
pub type cl_bitfield = u64;
/// Platform handle (opaque pointer)
pub type cl_platform_id = *mut c_void;
/// Device handle (opaque pointer)
pub type cl_device_id = *mut c_void;
/// Context handle (opaque pointer)
pub type cl_context = *mut c_void;
/// Command-queue handle (opaque pointer)
pub type cl_command_queue = *mut c_void;
/// Program handle (opaque pointer)
pub type cl_program = *mut c_void;
/// Kernel handle (opaque pointer)
pub type cl_kernel = *mut c_void;
/// Memory-object handle (opaque pointer)
pub type cl_mem = *mut c_void;

// ============================================================================
// OpenCL Constants (subset we use)
// ============================================================================

/// Success
pub const CL_SUCCESS: cl_int = 0;
/// Blocking-operation flag
pub const CL_TRUE: cl_uint = 1;
/// GPU device type
pub const CL_DEVICE_TYPE_GPU: cl_bitfield = 1 << 2;
/// Read-write buffer
pub const CL_MEM_READ_WRITE: cl_bitfield = 1 << 0;
/// Write-only buffer
pub const CL_MEM_WRITE_ONLY: cl_bitfield = 1 << 1;
/// Read-only buffer
pub const CL_MEM_READ_ONLY: cl_bitfield = 1 << 2;
/// Copy initial contents from the host pointer
pub const CL_MEM_COPY_HOST_PTR: cl_bitfield = 1 << 5;
/// Build-log query for clGetProgramBuildInfo
pub const CL_PROGRAM_BUILD_LOG: cl_uint = 0x1183;

// ============================================================================
// OpenCL Function Pointers
// ============================================================================

/// Dynamically loaded OpenCL entry points
///
/// All function pointers are loaded at runtime from libOpenCL.so (Linux),
/// OpenCL.dll (Windows) or the OpenCL framework (macOS).
#[allow(non_snake_case)]
pub struct ClDriver {
    /// clGetPlatformIDs - enumerate platforms
    pub clGetPlatformIDs: unsafe extern "C" fn(
        num_entries: cl_uint,
        platforms: *mut cl_platform_id,
        num_platforms: *mut cl_uint,
    ) -> cl_int,
    /// clGetDeviceIDs - enumerate devices of a platform
    pub clGetDeviceIDs: unsafe extern "C" fn(
        platform: cl_platform_id,
        device_type: cl_bitfield,
        num_entries: cl_uint,
        devices: *mut cl_device_id,
        num_devices: *mut cl_uint,
    ) -> cl_int,
    /// clCreateContext - create a context over devices
    pub clCreateContext: unsafe extern "C" fn(
        properties: *const isize,
        num_devices: cl_uint,
        devices: *const cl_device_id,
        pfn_notify: *const c_void,
        user_data: *mut c_void,
        errcode_ret: *mut cl_int,
    ) -> cl_context,
    /// clCreateCommandQueueWithProperties - create an in-order queue
    pub clCreateCommandQueueWithProperties: unsafe extern "C" fn(
        context: cl_context,
        device: cl_device_id,
        properties: *const cl_bitfield,
        errcode_ret: *mut cl_int,
    ) -> cl_command_queue,
    /// clCreateProgramWithIL - create a program from SPIR-V IL
    pub clCreateProgramWithIL: unsafe extern "C" fn(
        context: cl_context,
        il: *const c_void,
        length: usize,
        errcode_ret: *mut cl_int,
    ) -> cl_program,
    /// clBuildProgram - build for the context's devices
    pub clBuildProgram: unsafe extern "C" fn(
        program: cl_program,
        num_devices: cl_uint,
        device_list: *const cl_device_id,
        options: *const c_char,
        pfn_notify: *const c_void,
        user_data: *mut c_void,
    ) -> cl_int,
    /// clGetProgramBuildInfo - retrieve the build log
    pub clGetProgramBuildInfo: unsafe extern "C" fn(
        program: cl_program,
        device: cl_device_id,
        param_name: cl_uint,
        param_value_size: usize,
        param_value: *mut c_void,
        param_value_size_ret: *mut usize,
    ) -> cl_int,
    /// clCreateKernel - look up a kernel by name
    pub clCreateKernel: unsafe extern "C" fn(
        program: cl_program,
        kernel_name: *const c_char,
        errcode_ret: *mut cl_int,
    ) -> cl_kernel,
    /// clCreateBuffer - allocate a device buffer
    pub clCreateBuffer: unsafe extern "C" fn(
        context: cl_context,
        flags: cl_bitfield,
        size: usize,
        host_ptr: *mut c_void,
        errcode_ret: *mut cl_int,
    ) -> cl_mem,
    /// clSetKernelArg - bind one argument by declaration index
    pub clSetKernelArg: unsafe extern "C" fn(
        kernel: cl_kernel,
        arg_index: cl_uint,
        arg_size: usize,
        arg_value: *const c_void,
    ) -> cl_int,
    /// clEnqueueNDRangeKernel - launch
    pub clEnqueueNDRangeKernel: unsafe extern "C" fn(
        queue: cl_command_queue,
        kernel: cl_kernel,
        work_dim: cl_uint,
        global_offset: *const usize,
        global_size: *const usize,
        local_size: *const usize,
        num_events: cl_uint,
        wait_list: *const c_void,
        event: *mut c_void,
    ) -> cl_int,
    /// clEnqueueReadBuffer - read a buffer back to the host
    pub clEnqueueReadBuffer: unsafe extern "C" fn(
        queue: cl_command_queue,
        buffer: cl_mem,
        blocking: cl_uint,
        offset: usize,
        size: usize,
        ptr: *mut c_void,
        num_events: cl_uint,
        wait_list: *const c_void,
        event: *mut c_void,
    ) -> cl_int,
    /// clFinish - drain the queue
    pub clFinish: unsafe extern "C" fn(queue: cl_command_queue) -> cl_int,
    /// clReleaseKernel
    pub clReleaseKernel: unsafe extern "C" fn(kernel: cl_kernel) -> cl_int,
    /// clReleaseProgram
    pub clReleaseProgram: unsafe extern "C" fn(program: cl_program) -> cl_int,
    /// clReleaseCommandQueue
    pub clReleaseCommandQueue: unsafe extern "C" fn(queue: cl_command_queue) -> cl_int,
    /// clReleaseContext
    pub clReleaseContext: unsafe extern "C" fn(context: cl_context) -> cl_int,
    /// clReleaseMemObject
    pub clReleaseMemObject: unsafe extern "C" fn(mem: cl_mem) -> cl_int,
}

impl ClDriver {
    /// Map an OpenCL result to `Result`, tagging the failing call
    pub fn check(result: cl_int, call: &'static str) -> Result<()> {
        if result == CL_SUCCESS {
            Ok(())
        } else {
            Err(ScsanError::Cl { call, code: result })
        }
    }
}

// ============================================================================
// Dynamic Loading
// ============================================================================

mod loading {
    use super::*;
    use libloading::{Library, Symbol};
    use std::sync::OnceLock;

    /// Global driver instance (loaded once)
    static DRIVER: OnceLock<Option<ClDriver>> = OnceLock::new();

    /// Library handle (must outlive function pointers)
    static LIBRARY: OnceLock<Option<Library>> = OnceLock::new();

    impl ClDriver {
        /// Load the OpenCL runtime dynamically
        ///
        /// Returns `None` if no OpenCL library is installed. This is not an
        /// error; it is expected on machines without GPU drivers.
        #[must_use]
        pub fn load() -> Option<&'static Self> {
            let _ = LIBRARY.get_or_init(|| {
                #[cfg(target_os = "linux")]
                let lib_names = ["libOpenCL.so.1", "libOpenCL.so"];
                #[cfg(target_os = "windows")]
                let lib_names = ["OpenCL.dll"];
                #[cfg(target_os = "macos")]
                let lib_names =
                    ["/System/Library/Frameworks/OpenCL.framework/OpenCL"];

                for name in lib_names {
                    // SAFETY: loading a well-known system library
                    if let Ok(lib) = unsafe { Library::new(name) } {
                        return Some(lib);
                    }
                }
                None
            });

            DRIVER
                .get_or_init(|| {
                    let lib = LIBRARY.get()?.as_ref()?;
                    Self::load_from_library(lib)
                })
                .as_ref()
        }

        /// Load function pointers from the library
        #[allow(clippy::type_complexity)]
        fn load_from_library(lib: &Library) -> Option<Self> {
            // SAFETY: all symbols are standard OpenCL entry points
            unsafe {
                macro_rules! load_sym {
                    ($name:ident, $ty:ty) => {{
                        let sym: Symbol<'_, $ty> = lib.get(stringify!($name).as_bytes()).ok()?;
                        *sym
                    }};
                }

                type FnGetPlatformIDs =
                    unsafe extern "C" fn(cl_uint, *mut cl_platform_id, *mut cl_uint) -> cl_int;
                type FnGetDeviceIDs = unsafe extern "C" fn(
                    cl_platform_id,
                    cl_bitfield,
                    cl_uint,
                    *mut cl_device_id,
                    *mut cl_uint,
                ) -> cl_int;
                type FnCreateContext = unsafe extern "C" fn(
                    *const isize,
                    cl_uint,
                    *const cl_device_id,
                    *const c_void,
                    *mut c_void,
                    *mut cl_int,
                ) -> cl_context;
                type FnCreateQueue = unsafe extern "C" fn(
                    cl_context,
                    cl_device_id,
                    *const cl_bitfield,
                    *mut cl_int,
                ) -> cl_command_queue;
                type FnCreateProgramWithIL = unsafe extern "C" fn(
                    cl_context,
                    *const c_void,
                    usize,
                    *mut cl_int,
                ) -> cl_program;
                type FnBuildProgram = unsafe extern "C" fn(
                    cl_program,
                    cl_uint,
                    *const cl_device_id,
                    *const c_char,
                    *const c_void,
                    *mut c_void,
                ) -> cl_int;
                type FnGetProgramBuildInfo = unsafe extern "C" fn(
                    cl_program,
                    cl_device_id,
                    cl_uint,
                    usize,
                    *mut c_void,
                    *mut usize,
                ) -> cl_int;
                type FnCreateKernel =
                    unsafe extern "C" fn(cl_program, *const c_char, *mut cl_int) -> cl_kernel;
                type FnCreateBuffer = unsafe extern "C" fn(
                    cl_context,
                    cl_bitfield,
                    usize,
                    *mut c_void,
                    *mut cl_int,
                ) -> cl_mem;
                type FnSetKernelArg =
                    unsafe extern "C" fn(cl_kernel, cl_uint, usize, *const c_void) -> cl_int;
                type FnEnqueueNDRangeKernel = unsafe extern "C" fn(
                    cl_command_queue,
                    cl_kernel,
                    cl_uint,
                    *const usize,
                    *const usize,
                    *const usize,
                    cl_uint,
                    *const c_void,
                    *mut c_void,
                ) -> cl_int;
                type FnEnqueueReadBuffer = unsafe extern "C" fn(
                    cl_command_queue,
                    cl_mem,
                    cl_uint,
                    usize,
                    usize,
                    *mut c_void,
                    cl_uint,
                    *const c_void,
                    *mut c_void,
                ) -> cl_int;
                type FnFinish = unsafe extern "C" fn(cl_command_queue) -> cl_int;
                type FnReleaseKernel = unsafe extern "C" fn(cl_kernel) -> cl_int;
                type FnReleaseProgram = unsafe extern "C" fn(cl_program) -> cl_int;
                type FnReleaseQueue = unsafe extern "C" fn(cl_command_queue) -> cl_int;
                type FnReleaseContext = unsafe extern "C" fn(cl_context) -> cl_int;
                type FnReleaseMemObject = unsafe extern "C" fn(cl_mem) -> cl_int;

                Some(ClDriver {
                    clGetPlatformIDs: load_sym!(clGetPlatformIDs, FnGetPlatformIDs),
                    clGetDeviceIDs: load_sym!(clGetDeviceIDs, FnGetDeviceIDs),
                    clCreateContext: load_sym!(clCreateContext, FnCreateContext),
                    clCreateCommandQueueWithProperties: load_sym!(
                        clCreateCommandQueueWithProperties,
                        FnCreateQueue
                    ),
                    clCreateProgramWithIL: load_sym!(
                        clCreateProgramWithIL,
                        FnCreateProgramWithIL
                    ),
                    clBuildProgram: load_sym!(clBuildProgram, FnBuildProgram),
                    clGetProgramBuildInfo: load_sym!(
                        clGetProgramBuildInfo,
                        FnGetProgramBuildInfo
                    ),
                    clCreateKernel: load_sym!(clCreateKernel, FnCreateKernel),
                    clCreateBuffer: load_sym!(clCreateBuffer, FnCreateBuffer),
                    clSetKernelArg: load_sym!(clSetKernelArg, FnSetKernelArg),
                    clEnqueueNDRangeKernel: load_sym!(
                        clEnqueueNDRangeKernel,
                        FnEnqueueNDRangeKernel
                    ),
                    clEnqueueReadBuffer: load_sym!(clEnqueueReadBuffer, FnEnqueueReadBuffer),
                    clFinish: load_sym!(clFinish, FnFinish),
                    clReleaseKernel: load_sym!(clReleaseKernel, FnReleaseKernel),
                    clReleaseProgram: load_sym!(clReleaseProgram, FnReleaseProgram),
                    clReleaseCommandQueue: load_sym!(clReleaseCommandQueue, FnReleaseQueue),
                    clReleaseContext: load_sym!(clReleaseContext, FnReleaseContext),
                    clReleaseMemObject: load_sym!(clReleaseMemObject, FnReleaseMemObject),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_success() {
        assert!(ClDriver::check(CL_SUCCESS, "clFinish").is_ok());
    }

    #[test]
    fn test_check_failure_tags_call() {
        let err = ClDriver::check(-5, "clEnqueueReadBuffer").unwrap_err();
        assert!(err.to_string().contains("clEnqueueReadBuffer"));
        assert!(err.to_string().contains("-5"));
    }
}
