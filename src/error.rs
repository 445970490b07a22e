//! Error types for scsan operations
//!
//! Covers structural misuse of the IR API, pass-pipeline lookup failures,
//! the OpenCL launcher's failure taxonomy, and the host-side emulator.
//!
//! Per-site instrumentation problems are never errors: the pass skips the
//! site with a diagnostic and keeps going.

use thiserror::Error;

/// Result type alias for scsan operations
pub type Result<T> = std::result::Result<T, ScsanError>;

/// Errors that can occur during IR manipulation, pass execution, or launch
#[derive(Error, Debug)]
pub enum ScsanError {
    /// The function violates a structural IR invariant
    #[error("malformed function '{function}': {reason}")]
    MalformedFunction {
        /// Name of the offending kernel
        function: String,
        /// What went wrong
        reason: String,
    },

    /// A pass name was not found in the registry
    #[error("unknown pass: {0}")]
    UnknownPass(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// OpenCL runtime could not be loaded
    #[error("OpenCL not available: {0}")]
    OpenClNotAvailable(String),

    /// No OpenCL platform was found on the host
    #[error("no OpenCL platform found")]
    NoPlatform,

    /// The requested device ordinal does not exist
    #[error("OpenCL device {0} not found (available: {1})")]
    DeviceNotFound(usize, usize),

    /// A raw OpenCL call returned a failure code
    #[error("OpenCL call {call} failed (code: {code})")]
    Cl {
        /// Name of the OpenCL entry point
        call: &'static str,
        /// The OpenCL error code
        code: i32,
    },

    /// Device program compilation failed
    #[error("program build failed: {0}")]
    ProgramBuild(String),

    /// Kernel name lookup failed after a successful build
    #[error("kernel '{0}' not found in program")]
    KernelNotFound(String),

    /// Kernel launch failed
    #[error("kernel launch failed: {0}")]
    Launch(String),

    /// The host-side emulator hit an unsupported or inconsistent state
    #[error("emulation error: {0}")]
    Emulation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_function_error() {
        let err = ScsanError::MalformedFunction {
            function: "k".to_string(),
            reason: "block bb3 has no terminator".to_string(),
        };
        assert!(err.to_string().contains("k"));
        assert!(err.to_string().contains("bb3"));
    }

    #[test]
    fn test_unknown_pass_error() {
        let err = ScsanError::UnknownPass("no-such-pass".to_string());
        assert!(err.to_string().contains("no-such-pass"));
    }

    #[test]
    fn test_cl_error() {
        let err = ScsanError::Cl {
            call: "clGetPlatformIDs",
            code: -1001,
        };
        assert!(err.to_string().contains("clGetPlatformIDs"));
        assert!(err.to_string().contains("-1001"));
    }

    #[test]
    fn test_device_not_found_error() {
        let err = ScsanError::DeviceNotFound(3, 1);
        assert!(err.to_string().contains("device 3"));
        assert!(err.to_string().contains("available: 1"));
    }

    #[test]
    fn test_program_build_error() {
        let err = ScsanError::ProgramBuild("unresolved symbol".to_string());
        assert!(err.to_string().contains("build failed"));
    }

    #[test]
    fn test_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ScsanError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_emulation_error_display() {
        let err = ScsanError::Emulation("store through scalar".to_string());
        assert!(err.to_string().contains("store through scalar"));
    }
}
