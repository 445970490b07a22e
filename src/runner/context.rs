//! OpenCL Context Management
//!
//! Safe RAII wrapper over platform/device enumeration, context creation and
//! the in-order command queue. The first platform is used; the GPU device
//! is selected by ordinal, mirroring the single-platform shape of the
//! launchers this instrumentation ships with.

use std::ptr;

use crate::error::{Result, ScsanError};

use super::sys::{
    cl_command_queue, cl_context, cl_device_id, cl_platform_id, ClDriver, CL_DEVICE_TYPE_GPU,
    CL_SUCCESS,
};

/// Get the OpenCL driver
///
/// # Errors
///
/// Returns `Err(ScsanError::OpenClNotAvailable)` if no OpenCL runtime is
/// installed.
pub fn get_driver() -> Result<&'static ClDriver> {
    ClDriver::load()
        .ok_or_else(|| ScsanError::OpenClNotAvailable("OpenCL runtime not found".to_string()))
}

/// Check if an OpenCL runtime with at least one platform is available
#[must_use]
pub fn opencl_available() -> bool {
    let Ok(driver) = get_driver() else {
        return false;
    };
    let mut count = 0;
    // SAFETY: count is a valid pointer
    let result = unsafe { (driver.clGetPlatformIDs)(0, ptr::null_mut(), &mut count) };
    result == CL_SUCCESS && count > 0
}

/// Number of GPU devices on the first platform (0 without OpenCL)
#[must_use]
pub fn device_count() -> usize {
    let Ok(driver) = get_driver() else {
        return 0;
    };
    let Ok(platform) = first_platform(driver) else {
        return 0;
    };
    let mut count = 0;
    // SAFETY: platform is valid, count is a valid pointer
    let result = unsafe {
        (driver.clGetDeviceIDs)(platform, CL_DEVICE_TYPE_GPU, 0, ptr::null_mut(), &mut count)
    };
    if result == CL_SUCCESS {
        count as usize
    } else {
        0
    }
}

fn first_platform(driver: &ClDriver) -> Result<cl_platform_id> {
    let mut count = 0;
    // SAFETY: count is a valid pointer
    let result = unsafe { (driver.clGetPlatformIDs)(0, ptr::null_mut(), &mut count) };
    ClDriver::check(result, "clGetPlatformIDs")?;
    if count == 0 {
        return Err(ScsanError::NoPlatform);
    }

    let mut platform: cl_platform_id = ptr::null_mut();
    // SAFETY: requesting exactly one entry into a valid slot
    let result = unsafe { (driver.clGetPlatformIDs)(1, &mut platform, ptr::null_mut()) };
    ClDriver::check(result, "clGetPlatformIDs")?;
    Ok(platform)
}

/// OpenCL context and queue with RAII cleanup
///
/// # Example
///
/// ```ignore
/// let ctx = ClContext::new(0)?; // first GPU
/// ```
pub struct ClContext {
    device: cl_device_id,
    context: cl_context,
    queue: cl_command_queue,
}

// SAFETY: OpenCL handles are valid across threads for the operations the
// wrappers expose
unsafe impl Send for ClContext {}
unsafe impl Sync for ClContext {}

impl ClContext {
    /// Create a context and in-order queue for the GPU at `device_ordinal`
    /// on the first platform
    ///
    /// # Errors
    ///
    /// Returns `Err(ScsanError::NoPlatform)` without a platform,
    /// `Err(ScsanError::DeviceNotFound)` for a bad ordinal, and
    /// `Err(ScsanError::Cl)` for any failing OpenCL call.
    pub fn new(device_ordinal: usize) -> Result<Self> {
        let driver = get_driver()?;
        let platform = first_platform(driver)?;

        let mut count = 0;
        // SAFETY: platform is valid, count is a valid pointer
        let result = unsafe {
            (driver.clGetDeviceIDs)(platform, CL_DEVICE_TYPE_GPU, 0, ptr::null_mut(), &mut count)
        };
        ClDriver::check(result, "clGetDeviceIDs")?;
        if device_ordinal >= count as usize {
            return Err(ScsanError::DeviceNotFound(device_ordinal, count as usize));
        }

        let mut devices: Vec<cl_device_id> = vec![ptr::null_mut(); count as usize];
        // SAFETY: devices has room for `count` entries
        let result = unsafe {
            (driver.clGetDeviceIDs)(
                platform,
                CL_DEVICE_TYPE_GPU,
                count,
                devices.as_mut_ptr(),
                ptr::null_mut(),
            )
        };
        ClDriver::check(result, "clGetDeviceIDs")?;
        let device = devices[device_ordinal];

        let mut errcode = 0;
        // SAFETY: device is a valid handle from clGetDeviceIDs
        let context = unsafe {
            (driver.clCreateContext)(
                ptr::null(),
                1,
                &device,
                ptr::null(),
                ptr::null_mut(),
                &mut errcode,
            )
        };
        ClDriver::check(errcode, "clCreateContext")?;

        // SAFETY: context is valid from clCreateContext
        let queue = unsafe {
            (driver.clCreateCommandQueueWithProperties)(context, device, ptr::null(), &mut errcode)
        };
        if errcode != CL_SUCCESS {
            // SAFETY: context is valid and owned here
            unsafe {
                let _ = (driver.clReleaseContext)(context);
            }
            return Err(ScsanError::Cl {
                call: "clCreateCommandQueueWithProperties",
                code: errcode,
            });
        }

        Ok(Self {
            device,
            context,
            queue,
        })
    }

    /// Raw device handle
    ///
    /// # Safety
    ///
    /// The handle is only valid while this `ClContext` is alive.
    #[must_use]
    pub fn device(&self) -> cl_device_id {
        self.device
    }

    /// Raw context handle
    ///
    /// # Safety
    ///
    /// The handle is only valid while this `ClContext` is alive.
    #[must_use]
    pub fn raw(&self) -> cl_context {
        self.context
    }

    /// Raw queue handle
    ///
    /// # Safety
    ///
    /// The handle is only valid while this `ClContext` is alive.
    #[must_use]
    pub fn queue(&self) -> cl_command_queue {
        self.queue
    }

    /// Block until every enqueued command has finished
    pub fn finish(&self) -> Result<()> {
        let driver = get_driver()?;
        // SAFETY: queue is valid from the constructor
        let result = unsafe { (driver.clFinish)(self.queue) };
        ClDriver::check(result, "clFinish")
    }
}

impl Drop for ClContext {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: handles are valid from the constructor
            unsafe {
                let _ = (driver.clReleaseCommandQueue)(self.queue);
                let _ = (driver.clReleaseContext)(self.context);
            }
        }
    }
}
