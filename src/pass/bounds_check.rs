//! Bounds-Check Rewriter
//!
//! Splits a block at a buffer-indexing instruction and inserts a guard
//! diamond: the true edge proceeds into the original code, the false edge
//! calls `libscsan_report_index_out_of_bounds` and returns.
//!
//! A site is an indexing instruction with exactly one integer index whose
//! base resolves to a kernel pointer parameter - directly, through a load of
//! a pointer parameter, or through a reload of a stack slot whose single
//! store stored the parameter. The resolved parameter must carry a length
//! link; anything else is skipped with a diagnostic.

use tracing::{debug, warn};

use crate::error::{Result, ScsanError};
use crate::ir::{
    BlockId, Function, IcmpPred, InstId, Instruction, Module, Terminator, Value,
};

use super::arg_pairs::{self, LengthLink};
use super::runtime::RuntimeHooks;

/// A recognized bounds-check site
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoundsSite {
    /// The indexing instruction to guard
    pub inst: InstId,
    /// The buffer/length pair it indexes
    pub link: LengthLink,
}

/// Resolve the base operand of an indexing instruction to a kernel
/// parameter index, through the accepted forms.
fn resolve_base_param(func: &Function, base: Value) -> Option<usize> {
    match base {
        Value::Argument(i) => Some(i),
        Value::Inst(load_id) => {
            let Instruction::Load { ptr, .. } = func.inst(load_id) else {
                return None;
            };
            match *ptr {
                Value::Argument(i) => Some(i),
                Value::Inst(slot) if matches!(func.inst(slot), Instruction::Alloca { .. }) => {
                    let stores = func.stores_to(Value::Inst(slot));
                    if stores.len() != 1 {
                        debug!(
                            target: "scsan",
                            "skipping index in '{}': stack slot has {} stores",
                            func.name(),
                            stores.len()
                        );
                        return None;
                    }
                    match func.inst(stores[0]) {
                        Instruction::Store {
                            value: Value::Argument(i),
                            ..
                        } => Some(*i),
                        _ => {
                            debug!(
                                target: "scsan",
                                "skipping index in '{}': stack slot holds a non-argument",
                                func.name()
                            );
                            None
                        }
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Whether the site is already dominated by one of the pass's own guards:
/// a conditional branch into this block testing `index <u length`.
fn is_guarded(func: &Function, block: BlockId, index: Value, length: usize) -> bool {
    func.block_ids().any(|b| {
        let Some(Terminator::CondBr {
            cond: Value::Inst(c),
            then_dest,
            ..
        }) = func.block(b).terminator()
        else {
            return false;
        };
        *then_dest == block
            && matches!(
                func.inst(*c),
                Instruction::Icmp {
                    pred: IcmpPred::Ult,
                    lhs,
                    rhs,
                } if *lhs == index && *rhs == Value::Argument(length)
            )
    })
}

/// Recognize `inst` as a bounds-check site, or explain why not
pub(crate) fn find_site(
    func: &Function,
    module: &Module,
    links: &[LengthLink],
    block: BlockId,
    inst_id: InstId,
) -> Option<BoundsSite> {
    let Instruction::Index { base, indices } = func.inst(inst_id) else {
        return None;
    };

    if indices.len() != 1 {
        warn!(
            target: "scsan",
            "skipping index with unexpected operand count in '{}'",
            func.name()
        );
        return None;
    }
    let index = indices[0];

    let Some(buffer) = resolve_base_param(func, *base) else {
        debug!(
            target: "scsan",
            "skipping index in '{}': base does not resolve to a parameter",
            func.name()
        );
        return None;
    };

    if !func.param_ty(buffer).is_some_and(|t| t.is_pointer()) {
        debug!(
            target: "scsan",
            "skipping index in '{}': argument {} is not a pointer",
            func.name(),
            buffer
        );
        return None;
    }

    if !func.value_type(module, index).is_integer() {
        warn!(
            target: "scsan",
            "skipping index in '{}': non-integer index operand",
            func.name()
        );
        return None;
    }

    let Some(link) = arg_pairs::link_for(links, buffer) else {
        warn!(
            target: "scsan",
            "index on unlinked buffer argument {} in '{}'",
            buffer,
            func.name()
        );
        return None;
    };

    if is_guarded(func, block, index, link.length) {
        debug!(
            target: "scsan",
            "index in '{}' already dominated by a bounds guard",
            func.name()
        );
        return None;
    }

    Some(BoundsSite {
        inst: inst_id,
        link,
    })
}

/// Split the block at the site and insert the guard diamond. Returns the
/// continuation block holding the original tail.
pub(crate) fn rewrite(
    func: &mut Function,
    hooks: RuntimeHooks,
    block: BlockId,
    site: BoundsSite,
) -> Result<BlockId> {
    let index = match func.inst(site.inst) {
        Instruction::Index { indices, .. } => indices[0],
        _ => {
            return Err(ScsanError::MalformedFunction {
                function: func.name().to_string(),
                reason: "bounds site is not an indexing instruction".to_string(),
            })
        }
    };

    let then_block = func.split_block_at(block, site.inst)?;

    let cond = func.push_inst(
        block,
        Instruction::Icmp {
            pred: IcmpPred::Ult,
            lhs: index,
            rhs: Value::Argument(site.link.length),
        },
    );

    let else_block = func.add_block();
    func.push_inst(
        else_block,
        Instruction::Call {
            callee: hooks.report_index_out_of_bounds,
            args: vec![],
        },
    );
    func.set_terminator(else_block, Terminator::RetVoid);

    func.set_terminator(
        block,
        Terminator::CondBr {
            cond: Value::Inst(cond),
            then_dest: then_block,
            else_dest: else_block,
        },
    );

    debug!(
        target: "scsan",
        "instrumented bounds check in '{}': buffer arg {} against length arg {}",
        func.name(),
        site.link.buffer,
        site.link.length
    );

    Ok(then_block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AddressSpace, KernelBuilder, Type};
    use crate::pass::arg_pairs::find_length_links;
    use crate::pass::runtime;

    fn ptr() -> Type {
        Type::Pointer(AddressSpace::Global)
    }

    fn store_gid_module() -> (Module, usize) {
        let mut m = Module::new("spirv64-unknown-unknown");
        let idx = KernelBuilder::new("f")
            .param(ptr())
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let gid = b.get_global_id(0);
                let slot = b.index(Value::Argument(0), gid);
                b.store(slot, gid);
                b.ret_void();
            });
        (m, idx)
    }

    fn first_index_inst(func: &Function) -> InstId {
        func.block(func.entry())
            .insts()
            .iter()
            .copied()
            .find(|&i| matches!(func.inst(i), Instruction::Index { .. }))
            .unwrap()
    }

    #[test]
    fn test_find_site_direct_argument() {
        let (m, idx) = store_gid_module();
        let func = &m.kernels[idx];
        let links = find_length_links(func);
        let site = first_index_inst(func);

        let found = find_site(func, &m, &links, func.entry(), site);
        assert!(found.is_some());
        assert_eq!(found.unwrap().link.length, 1);
    }

    #[test]
    fn test_find_site_through_stack_slot() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let idx = KernelBuilder::new("f")
            .param(ptr())
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let slot = b.alloca(ptr());
                b.store(slot, Value::Argument(0));
                let gid = b.get_global_id(0);
                let base = b.load(ptr(), slot);
                let elem = b.index(base, gid);
                b.store(elem, gid);
                b.ret_void();
            });

        let func = &m.kernels[idx];
        let links = find_length_links(func);
        let site = func
            .block(func.entry())
            .insts()
            .iter()
            .copied()
            .filter(|&i| matches!(func.inst(i), Instruction::Index { .. }))
            .next_back()
            .unwrap();

        assert!(find_site(func, &m, &links, func.entry(), site).is_some());
    }

    #[test]
    fn test_find_site_through_pointer_parameter_load() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let idx = KernelBuilder::new("f")
            .param(ptr())
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let gid = b.get_global_id(0);
                let base = b.load(ptr(), Value::Argument(0));
                let elem = b.index(base, gid);
                b.store(elem, gid);
                b.ret_void();
            });

        let func = &m.kernels[idx];
        let links = find_length_links(func);
        let site = func
            .block(func.entry())
            .insts()
            .iter()
            .copied()
            .filter(|&i| matches!(func.inst(i), Instruction::Index { .. }))
            .next_back()
            .unwrap();

        assert!(find_site(func, &m, &links, func.entry(), site).is_some());
    }

    #[test]
    fn test_unlinked_buffer_is_skipped() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let idx = KernelBuilder::new("g")
            .param(ptr())
            .param(ptr())
            .build(&mut m, |b| {
                let gid = b.get_global_id(0);
                let slot = b.index(Value::Argument(0), gid);
                b.store(slot, gid);
                b.ret_void();
            });

        let func = &m.kernels[idx];
        let links = find_length_links(func);
        let site = first_index_inst(func);

        assert!(find_site(func, &m, &links, func.entry(), site).is_none());
    }

    #[test]
    fn test_multi_index_is_skipped() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let g = m.add_global(crate::ir::GlobalVariable::work_group_array(
            "a",
            Type::Int(32),
            8,
        ));
        let idx = KernelBuilder::new("f")
            .param(ptr())
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let gid = b.get_global_id(0);
                let slot = b.index_array(g, gid);
                b.store(slot, gid);
                b.ret_void();
            });

        let func = &m.kernels[idx];
        let links = find_length_links(func);
        let site = first_index_inst(func);

        assert!(find_site(func, &m, &links, func.entry(), site).is_none());
    }

    #[test]
    fn test_rewrite_builds_diamond() {
        let (mut m, idx) = store_gid_module();
        let hooks = runtime::declare(&mut m);
        let mut kernels = std::mem::take(&mut m.kernels);
        let func = &mut kernels[idx];
        let links = find_length_links(func);
        let site_inst = first_index_inst(func);
        let entry = func.entry();

        let site = find_site(func, &m, &links, entry, site_inst).unwrap();
        let cont = rewrite(func, hooks, entry, site).unwrap();

        // The guard block ends in a conditional branch into the
        // continuation; the continuation starts with the index instruction.
        match func.block(entry).terminator() {
            Some(Terminator::CondBr {
                cond: Value::Inst(c),
                then_dest,
                else_dest,
            }) => {
                assert_eq!(*then_dest, cont);
                assert!(matches!(
                    func.inst(*c),
                    Instruction::Icmp {
                        pred: IcmpPred::Ult,
                        rhs: Value::Argument(1),
                        ..
                    }
                ));
                // The else block reports then returns.
                let else_insts = func.block(*else_dest).insts();
                assert!(matches!(
                    func.inst(else_insts[0]),
                    Instruction::Call { callee, .. }
                        if *callee == hooks.report_index_out_of_bounds
                ));
                assert_eq!(
                    func.block(*else_dest).terminator(),
                    Some(&Terminator::RetVoid)
                );
            }
            other => panic!("expected conditional branch, got {:?}", other),
        }
        assert_eq!(func.block(cont).insts()[0], site_inst);
        assert_eq!(func.block(cont).terminator(), Some(&Terminator::RetVoid));

        // The guarded site is no longer recognized.
        assert!(find_site(func, &m, &links, cont, site_inst).is_none());

        m.kernels = kernels;
    }
}
