//! Shadow-Array Synthesizer and Kernel-Entry Prologue
//!
//! For each qualifying work-group-local array `X`, materializes a sibling
//! `X.shadow` of equal element count holding 64-bit slot-owner tokens, and
//! injects a `libscsan_shadow_memset(&X.shadow, N, 0)` call at the kernel
//! entry so every slot starts at the empty sentinel.
//!
//! A global qualifies when it lives in the work-group-local address space,
//! is not constant, is not externally initialized, and has a statically
//! sized array type. Arrays the synthesizer itself produced are never
//! treated as originals, which keeps a second run of the pass from
//! shadowing its own shadows.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::ir::{
    AddressSpace, Function, GlobalId, GlobalVariable, Initializer, Instruction, Linkage, Module,
    Type, Value,
};

use super::runtime::RuntimeHooks;

/// Suffix appended to an original's name to form its shadow's name
pub const SHADOW_SUFFIX: &str = ".shadow";

/// A pair of module-scope variables: the user's array and its shadow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowLink {
    /// The user's work-group-local array
    pub original: GlobalId,
    /// The slot-owner token array
    pub shadow: GlobalId,
}

fn qualifies(var: &GlobalVariable) -> bool {
    var.address_space == AddressSpace::Local
        && !var.is_constant
        && !var.externally_initialized
        && var.ty.is_array()
        && !looks_like_shadow(var)
}

fn looks_like_shadow(var: &GlobalVariable) -> bool {
    match &var.name {
        Some(name) => name.ends_with(SHADOW_SUFFIX),
        None => {
            var.ty.array_elem() == Some(&Type::Int(64))
                && var.linkage == Linkage::Internal
                && var.align == Some(8)
                && var.initializer == Initializer::Undef
        }
    }
}

fn is_shadow_shape(var: &GlobalVariable, len: u64) -> bool {
    var.address_space == AddressSpace::Local
        && var.ty.array_elem() == Some(&Type::Int(64))
        && var.ty.array_len() == Some(len)
}

fn new_shadow(name: Option<String>, len: u64) -> GlobalVariable {
    GlobalVariable {
        name,
        ty: Type::array(Type::Int(64), len),
        address_space: AddressSpace::Local,
        is_constant: false,
        externally_initialized: false,
        linkage: Linkage::Internal,
        align: Some(8),
        initializer: Initializer::Undef,
    }
}

/// Scan the module's globals and get-or-create a shadow for each qualifying
/// work-group-local array
pub fn synthesize(module: &mut Module) -> Vec<ShadowLink> {
    let mut links = Vec::new();
    let mut claimed: HashSet<GlobalId> = HashSet::new();

    let candidates: Vec<GlobalId> = module
        .global_ids()
        .filter(|&g| qualifies(module.global(g)))
        .collect();

    for original in candidates {
        let Some(len) = module.global(original).ty.array_len() else {
            continue;
        };
        let name = module.global(original).name.clone();
        debug!(
            target: "scsan",
            "found local array buffer {} ({} elements)",
            name.as_deref().unwrap_or("<anon>"),
            len
        );

        let shadow = match &name {
            Some(base) => {
                let shadow_name = format!("{}{}", base, SHADOW_SUFFIX);
                if let Some(existing) = module.find_global(&shadow_name) {
                    if !is_shadow_shape(module.global(existing), len) {
                        warn!(
                            target: "scsan",
                            "global '{}' already exists with an incompatible type; \
                             stores to '{}' will not be checked",
                            shadow_name,
                            base
                        );
                        continue;
                    }
                    existing
                } else {
                    module.add_global(new_shadow(Some(shadow_name), len))
                }
            }
            None => {
                let reusable = module.global_ids().find(|&g| {
                    g != original
                        && !claimed.contains(&g)
                        && module.global(g).name.is_none()
                        && is_shadow_shape(module.global(g), len)
                });
                match reusable {
                    Some(existing) => existing,
                    None => module.add_global(new_shadow(None, len)),
                }
            }
        };

        claimed.insert(shadow);
        links.push(ShadowLink { original, shadow });
    }

    links
}

/// Inject the shadow zero-initialization calls at the entry of `func`.
/// Calls already present are not duplicated.
pub fn insert_prologue(
    func: &mut Function,
    module: &Module,
    links: &[ShadowLink],
    hooks: RuntimeHooks,
) {
    let entry = func.entry();
    let mut pos = 0;
    for link in links {
        let Some(len) = module.global(link.shadow).ty.array_len() else {
            continue;
        };

        let present = func.block(entry).insts().iter().any(|&i| {
            matches!(
                func.inst(i),
                Instruction::Call { callee, args }
                    if *callee == hooks.shadow_memset
                        && args.first() == Some(&Value::Global(link.shadow))
            )
        });
        if present {
            continue;
        }

        func.insert_inst(
            entry,
            pos,
            Instruction::Call {
                callee: hooks.shadow_memset,
                args: vec![
                    Value::Global(link.shadow),
                    Value::const_u64(len),
                    Value::const_u64(0),
                ],
            },
        );
        pos += 1;
    }
}

/// The link whose original is `global`, if any
#[must_use]
pub fn link_for(links: &[ShadowLink], global: GlobalId) -> Option<ShadowLink> {
    links.iter().copied().find(|l| l.original == global)
}
