//! End-to-End Test Support
//!
//! In-crate infrastructure for exercising instrumented modules without a
//! GPU. The [`Emulator`] runs kernels of the compute IR deterministically
//! on the host and records every sanitizer-runtime report into a
//! [`LaunchOutcome`], so violation scenarios are ordinary assertions.

pub mod emulator;

pub use emulator::{Emulator, KernelArg, LaunchConfig, LaunchOutcome};
