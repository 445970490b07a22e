//! Device Buffers and Host Transfer
//!
//! RAII wrapper for OpenCL memory objects with typed host upload and
//! readback.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr;

use crate::error::{Result, ScsanError};

use super::context::{get_driver, ClContext};
use super::sys::{
    cl_mem, ClDriver, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_WRITE, CL_SUCCESS, CL_TRUE,
};

/// A device buffer of `len` elements of `T`, released on drop
pub struct ClBuffer<T: Copy> {
    mem: cl_mem,
    len: usize,
    _marker: PhantomData<T>,
}

// SAFETY: cl_mem handles are valid across threads; the queue serializes use
unsafe impl<T: Copy> Send for ClBuffer<T> {}
unsafe impl<T: Copy> Sync for ClBuffer<T> {}

impl<T: Copy> ClBuffer<T> {
    /// Allocate a zero-length-checked buffer initialized from host data
    pub fn from_host(ctx: &ClContext, data: &[T]) -> Result<Self> {
        if data.is_empty() {
            return Err(ScsanError::Launch("empty buffer".to_string()));
        }
        let driver = get_driver()?;
        let size = std::mem::size_of_val(data);

        let mut errcode = 0;
        // SAFETY: data lives across the call; COPY_HOST_PTR snapshots it
        let mem = unsafe {
            (driver.clCreateBuffer)(
                ctx.raw(),
                CL_MEM_READ_WRITE | CL_MEM_COPY_HOST_PTR,
                size,
                data.as_ptr() as *mut c_void,
                &mut errcode,
            )
        };
        if errcode != CL_SUCCESS {
            return Err(ScsanError::Cl {
                call: "clCreateBuffer",
                code: errcode,
            });
        }

        Ok(Self {
            mem,
            len: data.len(),
            _marker: PhantomData,
        })
    }

    /// Element count
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty (never true for a constructed buffer)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw memory-object handle
    ///
    /// # Safety
    ///
    /// The handle is only valid while this `ClBuffer` is alive.
    #[must_use]
    pub fn raw(&self) -> cl_mem {
        self.mem
    }

    /// Blocking read of the whole buffer into `out`
    ///
    /// # Errors
    ///
    /// Returns `Err(ScsanError::Launch)` if `out` has the wrong length, and
    /// `Err(ScsanError::Cl)` if the read fails.
    pub fn read_to_host(&self, ctx: &ClContext, out: &mut [T]) -> Result<()> {
        if out.len() != self.len {
            return Err(ScsanError::Launch(format!(
                "readback size mismatch: buffer has {} elements, host slice {}",
                self.len,
                out.len()
            )));
        }
        let driver = get_driver()?;
        let size = std::mem::size_of_val(out);
        // SAFETY: out has room for `size` bytes; the read is blocking
        let result = unsafe {
            (driver.clEnqueueReadBuffer)(
                ctx.queue(),
                self.mem,
                CL_TRUE,
                0,
                size,
                out.as_mut_ptr().cast(),
                0,
                ptr::null(),
                ptr::null_mut(),
            )
        };
        ClDriver::check(result, "clEnqueueReadBuffer")
    }
}

impl<T: Copy> Drop for ClBuffer<T> {
    fn drop(&mut self) {
        if let Ok(driver) = get_driver() {
            // SAFETY: mem is valid from the constructor
            unsafe {
                let _ = (driver.clReleaseMemObject)(self.mem);
            }
        }
    }
}
