//! OpenCL Host Launcher (Minimal FFI)
//!
//! Host-side plumbing that loads an instrumented compute binary onto a real
//! device: platform and device enumeration, context and queue creation,
//! program build from IL, kernel lookup, buffer transfer, and ND-range
//! launch. Only enabled with the `opencl` feature.
//!
//! ## Design Philosophy
//!
//! **Own the Stack**: hand-written FFI for the ~18 OpenCL entry points we
//! need. No vendor SDK at build time; the runtime library is loaded
//! dynamically, and its absence is a reported condition, not a crash.
//!
//! - **Minimal FFI**: only bind what we need (sys.rs)
//! - **Safe wrappers**: all raw calls isolated behind RAII types
//! - **Declaration-order binding**: kernel arguments bind by index, the
//!   same order the argument-pair analyzer assumes
//!
//! ## Example
//!
//! ```ignore
//! use scsan::runner::{ClContext, ClBuffer, ClProgram};
//!
//! let ctx = ClContext::new(0)?;
//! let program = ClProgram::from_il(&ctx, &il_bytes)?;
//! let kernel = program.kernel("f")?;
//!
//! let out = ClBuffer::from_host(&ctx, &vec![0u32; 256])?;
//! kernel.bind_buffer(0, &out)?;
//! kernel.bind_scalar_u64(1, 256)?;
//! kernel.launch(&ctx, 256, 64)?;
//!
//! let mut host = vec![0u32; 256];
//! out.read_to_host(&ctx, &mut host)?;
//! ```

// FFI layer - uses FFI-specific patterns that trigger clippy lints
// (borrow_as_ptr, ptr_as_ptr, cast_sign_loss are normal for CL bindings)
#[cfg(feature = "opencl")]
#[allow(
    non_camel_case_types,
    clippy::borrow_as_ptr,
    clippy::ptr_as_ptr,
    clippy::cast_sign_loss,
    clippy::wildcard_imports
)]
pub mod sys;

#[cfg(feature = "opencl")]
#[allow(clippy::borrow_as_ptr, clippy::ptr_as_ptr)]
mod context;
#[cfg(feature = "opencl")]
#[allow(clippy::borrow_as_ptr, clippy::ptr_as_ptr)]
mod memory;
#[cfg(feature = "opencl")]
#[allow(clippy::borrow_as_ptr, clippy::ptr_as_ptr)]
mod program;

#[cfg(feature = "opencl")]
pub use context::{device_count, opencl_available, ClContext};
#[cfg(feature = "opencl")]
pub use memory::ClBuffer;
#[cfg(feature = "opencl")]
pub use program::{ClKernel, ClProgram};

/// Check if an OpenCL runtime is available
///
/// Returns `true` only when the OpenCL library loads and at least one
/// platform is present.
#[cfg(not(feature = "opencl"))]
#[must_use]
pub fn opencl_available() -> bool {
    false
}

/// Get the number of GPU devices on the first platform
///
/// Returns 0 if OpenCL is not available.
#[cfg(not(feature = "opencl"))]
#[must_use]
pub fn device_count() -> usize {
    0
}
