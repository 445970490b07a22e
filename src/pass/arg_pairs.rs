//! Argument-Pair Analyzer
//!
//! Discovers `(buffer, length)` argument pairs from the kernel's parameter
//! list by the positional heuristic of the host ABI: each buffer pointer is
//! followed, after any interleaved pointers, by its element count as a
//! 64-bit scalar. The scan is a small state machine:
//!
//! - on a pointer parameter, remember (or replace) its index;
//! - on a 64-bit integer parameter, emit a link for the remembered pointer
//!   and forget it;
//! - anything else leaves the state untouched.
//!
//! This is the sole source of truth about buffer lengths. It is
//! deterministic and depends only on the parameter-type sequence.

use tracing::debug;

use crate::ir::Function;

/// An assertion that argument `length` holds the element count of the
/// buffer argument `buffer` at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthLink {
    /// Index of the buffer pointer argument
    pub buffer: usize,
    /// Index of the 64-bit length argument
    pub length: usize,
}

/// Scan a kernel's parameters for length links
#[must_use]
pub fn find_length_links(func: &Function) -> Vec<LengthLink> {
    let mut links = Vec::new();
    let mut pending: Option<usize> = None;

    for (index, param) in func.params().iter().enumerate() {
        if param.ty.is_pointer() {
            pending = Some(index);
        } else if param.ty.int_width() == Some(64) {
            if let Some(buffer) = pending.take() {
                links.push(LengthLink {
                    buffer,
                    length: index,
                });
            }
        }
    }

    if links.is_empty() {
        debug!(target: "scsan", "no length links found in '{}'", func.name());
    } else {
        for link in &links {
            debug!(
                target: "scsan",
                "length link in '{}': buffer arg {} <- length arg {}",
                func.name(),
                link.buffer,
                link.length
            );
        }
    }

    links
}

/// The link whose buffer argument is `buffer`, if any
#[must_use]
pub fn link_for(links: &[LengthLink], buffer: usize) -> Option<LengthLink> {
    links.iter().copied().find(|l| l.buffer == buffer)
}
