//! Block-Traversal Driver
//!
//! Walks a kernel's blocks from the entry, selects the first eligible site
//! of each visited block, performs one rewrite, and continues into the
//! returned continuation block. A skip set keyed by instruction id keeps
//! overlapping visits from re-instrumenting a handled site, and a visited
//! set keyed by block id bounds the walk on arbitrary control flow,
//! including loops.

use std::collections::HashSet;

use tracing::warn;

use crate::ir::{BlockId, Function, InstId, Module};

use super::arg_pairs::LengthLink;
use super::bounds_check::{self, BoundsSite};
use super::race_check::{self, RaceSite};
use super::runtime::RuntimeHooks;
use super::shadow::ShadowLink;

enum Site {
    Bounds(BoundsSite),
    Race(RaceSite),
}

fn push_successors(func: &Function, block: BlockId, worklist: &mut Vec<BlockId>) {
    if let Some(t) = func.block(block).terminator() {
        for s in t.successors() {
            worklist.push(s);
        }
    }
}

/// Instrument every reachable site of one kernel
pub(crate) fn instrument_function(
    func: &mut Function,
    module: &Module,
    links: &[LengthLink],
    shadows: &[ShadowLink],
    hooks: RuntimeHooks,
) {
    let mut skip: HashSet<InstId> = HashSet::new();
    let mut visited: HashSet<BlockId> = HashSet::new();
    let mut worklist = vec![func.entry()];

    while let Some(block) = worklist.pop() {
        if !visited.insert(block) {
            continue;
        }

        let mut selected = None;
        let insts: Vec<InstId> = func.block(block).insts().to_vec();
        for inst in insts {
            if skip.contains(&inst) {
                continue;
            }
            if let Some(site) = bounds_check::find_site(func, module, links, block, inst) {
                skip.insert(inst);
                selected = Some(Site::Bounds(site));
                break;
            }
            if let Some(site) = race_check::find_site(func, module, shadows, block, inst) {
                skip.insert(inst);
                selected = Some(Site::Race(site));
                break;
            }
        }

        let rewritten = match selected {
            Some(Site::Bounds(site)) => bounds_check::rewrite(func, hooks, block, site),
            Some(Site::Race(site)) => race_check::rewrite(func, hooks, block, site),
            None => {
                push_successors(func, block, &mut worklist);
                continue;
            }
        };

        match rewritten {
            Ok(continuation) => worklist.push(continuation),
            Err(e) => {
                warn!(
                    target: "scsan",
                    "failed to instrument site in '{}': {}",
                    func.name(),
                    e
                );
                push_successors(func, block, &mut worklist);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        emit, AddressSpace, GlobalVariable, IcmpPred, Instruction, KernelBuilder, Terminator,
        Type, Value,
    };
    use crate::pass::arg_pairs::find_length_links;
    use crate::pass::{runtime, shadow};

    fn instrument(module: &mut Module, kernel: usize) {
        let hooks = runtime::declare(module);
        let shadows = shadow::synthesize(module);
        let mut kernels = std::mem::take(&mut module.kernels);
        let func = &mut kernels[kernel];
        let links = find_length_links(func);
        instrument_function(func, module, &links, &shadows, hooks);
        module.kernels = kernels;
    }

    fn count_calls(module: &Module, func: &Function, name: &str) -> usize {
        func.inst_ids()
            .filter(|&i| {
                matches!(
                    func.inst(i),
                    Instruction::Call { callee, .. }
                        if module.decl(*callee).name == name
                )
            })
            .count()
    }

    #[test]
    fn test_two_sites_in_one_block_both_instrumented() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let idx = KernelBuilder::new("f")
            .param(Type::Pointer(AddressSpace::Global))
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let gid = b.get_global_id(0);
                let a = b.index(Value::Argument(0), gid);
                b.store(a, gid);
                let next = b.add(gid, Value::const_u64(1));
                let c = b.index(Value::Argument(0), next);
                b.store(c, gid);
                b.ret_void();
            });

        instrument(&mut m, idx);
        let func = &m.kernels[idx];

        assert!(emit::validate(func).is_ok());
        // Each site got its own guard diamond.
        assert_eq!(
            count_calls(&m, func, runtime::REPORT_INDEX_OUT_OF_BOUNDS),
            2
        );
    }

    #[test]
    fn test_sites_behind_branches_are_found() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let idx = KernelBuilder::new("f")
            .param(Type::Pointer(AddressSpace::Global))
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let gid = b.get_global_id(0);
                let cond = b.icmp(IcmpPred::Ult, gid, Value::const_u64(4));
                let low = b.new_block();
                let high = b.new_block();
                b.cond_br(cond, low, high);

                b.switch_to(low);
                let a = b.index(Value::Argument(0), gid);
                b.store(a, gid);
                b.ret_void();

                b.switch_to(high);
                let c = b.index(Value::Argument(0), gid);
                b.store(c, gid);
                b.ret_void();
            });

        instrument(&mut m, idx);
        let func = &m.kernels[idx];

        assert!(emit::validate(func).is_ok());
        assert_eq!(
            count_calls(&m, func, runtime::REPORT_INDEX_OUT_OF_BOUNDS),
            2
        );
    }

    #[test]
    fn test_loop_terminates_and_instruments_body() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let idx = KernelBuilder::new("f")
            .param(Type::Pointer(AddressSpace::Global))
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let header = b.new_block();
                let exit = b.new_block();
                b.br(header);

                b.switch_to(header);
                let gid = b.get_global_id(0);
                let a = b.index(Value::Argument(0), gid);
                b.store(a, gid);
                let done = b.icmp(IcmpPred::Uge, gid, Value::Argument(1));
                b.cond_br(done, exit, header);

                b.switch_to(exit);
                b.ret_void();
            });

        instrument(&mut m, idx);
        let func = &m.kernels[idx];

        assert!(emit::validate(func).is_ok());
        assert_eq!(
            count_calls(&m, func, runtime::REPORT_INDEX_OUT_OF_BOUNDS),
            1
        );
    }

    #[test]
    fn test_mixed_bounds_and_race_sites() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let g = m.add_global(GlobalVariable::work_group_array("a", Type::Int(32), 64));
        let idx = KernelBuilder::new("f")
            .param(Type::Pointer(AddressSpace::Global))
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let gid = b.get_global_id(0);
                let lid = b.get_local_id(0);
                let slot = b.index_array(g, lid);
                b.store(slot, gid);
                let out = b.index(Value::Argument(0), gid);
                b.store(out, gid);
                b.ret_void();
            });

        instrument(&mut m, idx);
        let func = &m.kernels[idx];

        assert!(emit::validate(func).is_ok());
        assert_eq!(
            count_calls(&m, func, runtime::REPORT_INDEX_OUT_OF_BOUNDS),
            1
        );
        assert_eq!(
            count_calls(&m, func, runtime::REPORT_LOCAL_MEMORY_CONFLICT),
            1
        );
        assert_eq!(count_calls(&m, func, runtime::ATOMIC_EXCHANGE), 2);
    }

    #[test]
    fn test_no_existing_instruction_deleted() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let idx = KernelBuilder::new("f")
            .param(Type::Pointer(AddressSpace::Global))
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let gid = b.get_global_id(0);
                let a = b.index(Value::Argument(0), gid);
                b.store(a, gid);
                b.ret_void();
            });

        let before: Vec<Instruction> = {
            let f = &m.kernels[idx];
            f.inst_ids().map(|id| f.inst(id).clone()).collect()
        };

        instrument(&mut m, idx);
        let func = &m.kernels[idx];

        for (inst, id) in before.iter().zip(func.inst_ids()) {
            assert_eq!(func.inst(id), inst);
        }
    }

    #[test]
    fn test_instrumented_kernel_keeps_single_terminators() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let g = m.add_global(GlobalVariable::work_group_array("a", Type::Int(32), 64));
        let idx = KernelBuilder::new("f")
            .param(Type::Pointer(AddressSpace::Global))
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let lid = b.get_local_id(0);
                let slot = b.index_array(g, lid);
                b.store(slot, lid);
                b.ret_void();
            });

        instrument(&mut m, idx);
        let func = &m.kernels[idx];

        for b in func.block_ids() {
            assert!(func.block(b).terminator().is_some());
        }
        assert!(matches!(
            func.block(func.entry()).terminator(),
            Some(Terminator::CondBr { .. })
        ));
    }
}
