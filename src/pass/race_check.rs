//! Race-Check Rewriter
//!
//! Splits a block at a work-group-local store and inserts the two-phase
//! atomic claim protocol. Each shadow slot holds a 64-bit token: `0` means
//! no writer yet, any other value `v` means the work-item with local id
//! `v - 1` claims the slot.
//!
//! Phase A exchanges the slot with this work-item's token; seeing `0`
//! (freshly claimed) or its own token (already owned) proceeds. Phase B
//! exchanges a second time and requires its own token back, which closes
//! the window where another writer claimed the slot between the phases.
//! Either failure lands in the conflict block, which reports the previous
//! writer's local id (`saved - 1`) and returns. Two atomic operations and
//! two comparisons on the happy path, no loops.

use tracing::debug;

use crate::error::Result;
use crate::ir::{
    AddressSpace, BinOp, BlockId, Function, IcmpPred, InstId, Instruction, Module, Terminator,
    Type, Value,
};

use super::runtime::{RuntimeHooks, ATOMIC_EXCHANGE};
use super::shadow::{self, ShadowLink};

/// A recognized race-check site
#[derive(Debug, Clone, Copy)]
pub(crate) struct RaceSite {
    /// The store to guard
    pub store: InstId,
    /// The slot index (last index operand of the store's address)
    pub index: Value,
    /// The array being written and its shadow
    pub link: ShadowLink,
}

/// Whether the store is already dominated by the pass's own re-confirmation
/// branch: a conditional branch into this block whose condition compares an
/// atomic exchange on the linked shadow against the work-item's token.
fn is_guarded(func: &Function, module: &Module, block: BlockId, link: ShadowLink) -> bool {
    func.block_ids().any(|b| {
        let Some(Terminator::CondBr {
            cond: Value::Inst(c),
            then_dest,
            ..
        }) = func.block(b).terminator()
        else {
            return false;
        };
        if *then_dest != block {
            return false;
        }
        let Instruction::Icmp {
            pred: IcmpPred::Eq,
            lhs: Value::Inst(x),
            ..
        } = func.inst(*c)
        else {
            return false;
        };
        let Instruction::Call { callee, args } = func.inst(*x) else {
            return false;
        };
        if module.decl(*callee).name != ATOMIC_EXCHANGE {
            return false;
        }
        let Some(Value::Inst(cast)) = args.first() else {
            return false;
        };
        let Instruction::AddrSpaceCast {
            value: Value::Inst(sp),
            ..
        } = func.inst(*cast)
        else {
            return false;
        };
        matches!(
            func.inst(*sp),
            Instruction::Index {
                base: Value::Global(g),
                ..
            } if *g == link.shadow
        )
    })
}

/// Recognize `inst` as a race-check site, or explain why not
pub(crate) fn find_site(
    func: &Function,
    module: &Module,
    shadows: &[ShadowLink],
    block: BlockId,
    inst_id: InstId,
) -> Option<RaceSite> {
    let Instruction::Store { ptr, .. } = func.inst(inst_id) else {
        return None;
    };

    if func.value_type(module, *ptr).address_space() != Some(AddressSpace::Local) {
        debug!(
            target: "scsan",
            "skipping store to non-local memory in '{}'",
            func.name()
        );
        return None;
    }

    let Value::Inst(addr) = *ptr else {
        debug!(
            target: "scsan",
            "skipping local store with non-indexed pointer in '{}'",
            func.name()
        );
        return None;
    };
    let Instruction::Index { base, indices } = func.inst(addr) else {
        debug!(
            target: "scsan",
            "skipping local store with non-indexed pointer in '{}'",
            func.name()
        );
        return None;
    };

    let Value::Global(original) = *base else {
        debug!(
            target: "scsan",
            "skipping local store whose base is not a module array in '{}'",
            func.name()
        );
        return None;
    };

    let Some(link) = shadow::link_for(shadows, original) else {
        debug!(
            target: "scsan",
            "skipping store with unlinked shadow variable in '{}'",
            func.name()
        );
        return None;
    };

    let index = *indices.last()?;

    if is_guarded(func, module, block, link) {
        debug!(
            target: "scsan",
            "store in '{}' already dominated by a conflict guard",
            func.name()
        );
        return None;
    }

    Some(RaceSite {
        store: inst_id,
        index,
        link,
    })
}

/// Split the block at the store and insert the two-phase protocol. Returns
/// the continuation block holding the original store and tail.
pub(crate) fn rewrite(
    func: &mut Function,
    hooks: RuntimeHooks,
    block: BlockId,
    site: RaceSite,
) -> Result<BlockId> {
    let continuation = func.split_block_at(block, site.store)?;

    // Phase A: claim the slot with this work-item's token.
    let shadow_ptr = func.push_inst(
        block,
        Instruction::Index {
            base: Value::Global(site.link.shadow),
            indices: vec![Value::const_u64(0), site.index],
        },
    );
    let lid = func.push_inst(
        block,
        Instruction::Call {
            callee: hooks.get_local_id,
            args: vec![Value::const_u32(0)],
        },
    );
    let token = func.push_inst(
        block,
        Instruction::Binary {
            op: BinOp::Add,
            lhs: Value::Inst(lid),
            rhs: Value::const_u64(1),
        },
    );
    let cast = func.push_inst(
        block,
        Instruction::AddrSpaceCast {
            value: Value::Inst(shadow_ptr),
            target: AddressSpace::Generic,
        },
    );
    let prev = func.push_inst(
        block,
        Instruction::Call {
            callee: hooks.atomic_exchange,
            args: vec![Value::Inst(cast), Value::Inst(token)],
        },
    );
    let saved = func.push_inst(
        block,
        Instruction::Alloca {
            ty: Type::Int(64),
        },
    );
    func.push_inst(
        block,
        Instruction::Store {
            ptr: Value::Inst(saved),
            value: Value::Inst(prev),
        },
    );
    let owned = func.push_inst(
        block,
        Instruction::Icmp {
            pred: IcmpPred::Eq,
            lhs: Value::Inst(prev),
            rhs: Value::Inst(token),
        },
    );
    let fresh = func.push_inst(
        block,
        Instruction::Icmp {
            pred: IcmpPred::Eq,
            lhs: Value::Inst(prev),
            rhs: Value::const_u64(0),
        },
    );
    let proceed = func.push_inst(
        block,
        Instruction::Binary {
            op: BinOp::Or,
            lhs: Value::Inst(owned),
            rhs: Value::Inst(fresh),
        },
    );

    let confirm_block = func.add_block();
    let conflict_block = func.add_block();
    func.set_terminator(
        block,
        Terminator::CondBr {
            cond: Value::Inst(proceed),
            then_dest: confirm_block,
            else_dest: conflict_block,
        },
    );

    // Phase B: exchange again; only seeing our own token back proves no
    // other writer appeared in between.
    let lid2 = func.push_inst(
        confirm_block,
        Instruction::Call {
            callee: hooks.get_local_id,
            args: vec![Value::const_u32(0)],
        },
    );
    let token2 = func.push_inst(
        confirm_block,
        Instruction::Binary {
            op: BinOp::Add,
            lhs: Value::Inst(lid2),
            rhs: Value::const_u64(1),
        },
    );
    let cast2 = func.push_inst(
        confirm_block,
        Instruction::AddrSpaceCast {
            value: Value::Inst(shadow_ptr),
            target: AddressSpace::Generic,
        },
    );
    let prev2 = func.push_inst(
        confirm_block,
        Instruction::Call {
            callee: hooks.atomic_exchange,
            args: vec![Value::Inst(cast2), Value::Inst(token2)],
        },
    );
    func.push_inst(
        confirm_block,
        Instruction::Store {
            ptr: Value::Inst(saved),
            value: Value::Inst(prev2),
        },
    );
    let confirmed = func.push_inst(
        confirm_block,
        Instruction::Icmp {
            pred: IcmpPred::Eq,
            lhs: Value::Inst(prev2),
            rhs: Value::Inst(token2),
        },
    );
    func.set_terminator(
        confirm_block,
        Terminator::CondBr {
            cond: Value::Inst(confirmed),
            then_dest: continuation,
            else_dest: conflict_block,
        },
    );

    // Conflict: report the colliding writer's local id and return.
    let loaded = func.push_inst(
        conflict_block,
        Instruction::Load {
            ty: Type::Int(64),
            ptr: Value::Inst(saved),
        },
    );
    let prev_lid = func.push_inst(
        conflict_block,
        Instruction::Binary {
            op: BinOp::Sub,
            lhs: Value::Inst(loaded),
            rhs: Value::const_u64(1),
        },
    );
    func.push_inst(
        conflict_block,
        Instruction::Call {
            callee: hooks.report_local_memory_conflict,
            args: vec![Value::Inst(prev_lid)],
        },
    );
    func.set_terminator(conflict_block, Terminator::RetVoid);

    debug!(
        target: "scsan",
        "instrumented local-memory conflict check in '{}'",
        func.name()
    );

    Ok(continuation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GlobalVariable, KernelBuilder};
    use crate::pass::{runtime, shadow::synthesize};

    fn local_store_module() -> (Module, crate::ir::GlobalId) {
        let mut m = Module::new("spirv64-unknown-unknown");
        let g = m.add_global(GlobalVariable::work_group_array("a", Type::Int(32), 64));
        KernelBuilder::new("k").build(&mut m, |b| {
            let lid = b.get_local_id(0);
            let slot = b.index_array(g, lid);
            b.store(slot, lid);
            b.ret_void();
        });
        (m, g)
    }

    fn store_inst(func: &Function, block: BlockId) -> InstId {
        func.block(block)
            .insts()
            .iter()
            .copied()
            .find(|&i| matches!(func.inst(i), Instruction::Store { .. }))
            .unwrap()
    }

    #[test]
    fn test_find_site_linked_local_store() {
        let (mut m, g) = local_store_module();
        let shadows = synthesize(&mut m);
        let func = &m.kernels[0];
        let site = store_inst(func, func.entry());

        let found = find_site(func, &m, &shadows, func.entry(), site).unwrap();
        assert_eq!(found.link.original, g);
        assert_eq!(found.store, site);
    }

    #[test]
    fn test_global_store_is_not_a_site() {
        let mut m = Module::new("spirv64-unknown-unknown");
        KernelBuilder::new("k")
            .param(Type::Pointer(AddressSpace::Global))
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let gid = b.get_global_id(0);
                let slot = b.index(Value::Argument(0), gid);
                b.store(slot, gid);
                b.ret_void();
            });
        let shadows = synthesize(&mut m);
        let func = &m.kernels[0];
        let site = store_inst(func, func.entry());

        assert!(find_site(func, &m, &shadows, func.entry(), site).is_none());
    }

    #[test]
    fn test_unlinked_original_is_skipped() {
        let (mut m, _) = local_store_module();
        // No synthesize: no links.
        let func = &m.kernels[0];
        let site = store_inst(func, func.entry());
        assert!(find_site(func, &m, &[], func.entry(), site).is_none());
    }

    #[test]
    fn test_rewrite_builds_two_phase_protocol() {
        let (mut m, _) = local_store_module();
        let hooks = runtime::declare(&mut m);
        let shadows = synthesize(&mut m);
        let mut kernels = std::mem::take(&mut m.kernels);
        let func = &mut kernels[0];
        let entry = func.entry();
        let site_inst = store_inst(func, entry);

        let site = find_site(func, &m, &shadows, entry, site_inst).unwrap();
        let cont = rewrite(func, hooks, entry, site).unwrap();

        // Entry ends in the phase-A branch.
        let Some(&Terminator::CondBr {
            then_dest: confirm,
            else_dest: conflict,
            ..
        }) = func.block(entry).terminator()
        else {
            panic!("entry must end in a conditional branch");
        };

        // Phase B re-exchanges and branches to the continuation or the
        // same conflict block.
        let Some(&Terminator::CondBr {
            then_dest,
            else_dest,
            ..
        }) = func.block(confirm).terminator()
        else {
            panic!("confirm block must end in a conditional branch");
        };
        assert_eq!(then_dest, cont);
        assert_eq!(else_dest, conflict);

        // Two atomic exchanges in total.
        let exchanges = func
            .block(entry)
            .insts()
            .iter()
            .chain(func.block(confirm).insts())
            .filter(|&&i| {
                matches!(
                    func.inst(i),
                    Instruction::Call { callee, .. } if *callee == hooks.atomic_exchange
                )
            })
            .count();
        assert_eq!(exchanges, 2);

        // The conflict block reports prev - 1 and returns.
        let conflict_insts = func.block(conflict).insts();
        assert!(matches!(
            func.inst(conflict_insts[0]),
            Instruction::Load { ty: Type::Int(64), .. }
        ));
        assert!(matches!(
            func.inst(conflict_insts[1]),
            Instruction::Binary { op: BinOp::Sub, .. }
        ));
        assert!(matches!(
            func.inst(conflict_insts[2]),
            Instruction::Call { callee, .. }
                if *callee == hooks.report_local_memory_conflict
        ));
        assert_eq!(
            func.block(conflict).terminator(),
            Some(&Terminator::RetVoid)
        );

        // The continuation starts with the original store.
        assert_eq!(func.block(cont).insts()[0], site_inst);

        // The guarded store is no longer recognized.
        assert!(find_site(func, &m, &shadows, cont, site_inst).is_none());

        m.kernels = kernels;
    }
}
