//! Target Gate
//!
//! Decides whether a module is a SPIR-V compute binary the sanitizer should
//! touch. Non-matching modules are preserved unchanged, with no diagnostics
//! beyond a single debug event.

use crate::ir::{Module, Triple};

/// Architecture prefix that identifies supported GPU-IR modules
pub const GPU_ARCH_PREFIX: &str = "spirv";

/// Whether the sanitizer should run on `module`
#[must_use]
pub fn should_run(module: &Module) -> bool {
    if module.target_triple.is_empty() {
        return false;
    }
    Triple::parse(&module.target_triple)
        .arch()
        .starts_with(GPU_ARCH_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spirv64_runs() {
        assert!(should_run(&Module::new("spirv64-unknown-unknown")));
    }

    #[test]
    fn test_spirv32_runs() {
        assert!(should_run(&Module::new("spirv32-unknown-unknown")));
    }

    #[test]
    fn test_bare_spirv_runs() {
        assert!(should_run(&Module::new("spirv")));
    }

    #[test]
    fn test_host_triple_skips() {
        assert!(!should_run(&Module::new("x86_64-pc-linux")));
        assert!(!should_run(&Module::new("aarch64-unknown-linux-gnu")));
    }

    #[test]
    fn test_empty_triple_skips() {
        assert!(!should_run(&Module::new("")));
    }

    #[test]
    fn test_prefix_must_be_on_arch() {
        // "spirv" appearing in a later component does not qualify.
        assert!(!should_run(&Module::new("x86_64-spirv-unknown")));
    }
}
