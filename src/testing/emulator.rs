//! Deterministic Work-Group Emulator
//!
//! Executes kernels of the compute IR on the host so instrumented modules
//! can be exercised end-to-end without a GPU. Work-items run sequentially
//! in id order within each work-group; for the conflict protocol that
//! sequential order *is* the total order of exchanges on a slot, which is
//! exactly the ordering the runtime guarantees per §atomics, so a conflict
//! witnessed here is a conflict the device would witness too.
//!
//! The emulator models:
//!
//! - global buffers bound by declaration order, one 64-bit word per element
//! - work-group-local arrays, instantiated per work-group and zeroed
//! - per-work-item stack slots
//! - the work-item id builtins, the 64-bit atomic exchange, and the three
//!   `libscsan_*` hooks (reports are recorded into the launch outcome; the
//!   protocol's own `ret void` then ends the work-item)
//!
//! Out-of-range raw buffer writes are dropped and counted instead of
//! wrapping, so a launch outcome can also assert that no stray store was
//! executed.

use std::collections::HashMap;

use crate::error::{Result, ScsanError};
use crate::ir::{
    AddressSpace, BinOp, Function, GlobalId, IcmpPred, InstId, Instruction, Module, Terminator,
    Value, GET_GLOBAL_ID, GET_LOCAL_ID,
};
use crate::pass::runtime::{
    ATOMIC_EXCHANGE, REPORT_INDEX_OUT_OF_BOUNDS, REPORT_LOCAL_MEMORY_CONFLICT, SHADOW_MEMSET,
};

/// Ceiling on executed terminators per work-item, so a malformed loop
/// fails instead of hanging the test suite
const MAX_BLOCK_TRANSFERS: usize = 1 << 20;

/// One bound kernel argument
#[derive(Debug, Clone)]
pub enum KernelArg {
    /// A device buffer, one 64-bit word per element
    Buffer(Vec<u64>),
    /// A scalar argument
    Scalar(u64),
}

/// Launch geometry: a 1-D global range cut into equal work-groups
#[derive(Debug, Clone, Copy)]
pub struct LaunchConfig {
    /// Total number of work-items
    pub global_size: usize,
    /// Work-items per work-group
    pub local_size: usize,
}

impl LaunchConfig {
    /// A launch configuration; the global size must be a positive multiple
    /// of the local size
    pub fn new(global_size: usize, local_size: usize) -> Result<Self> {
        if local_size == 0 || global_size == 0 || global_size % local_size != 0 {
            return Err(ScsanError::Launch(format!(
                "global size {} is not a positive multiple of local size {}",
                global_size, local_size
            )));
        }
        Ok(Self {
            global_size,
            local_size,
        })
    }
}

/// What a launch did: final buffer contents and every runtime report
#[derive(Debug, Clone, Default)]
pub struct LaunchOutcome {
    /// Final contents of each buffer argument (`None` for scalars)
    pub buffers: Vec<Option<Vec<u64>>>,
    /// Global ids of work-items that reported an out-of-bounds index
    pub out_of_bounds: Vec<u64>,
    /// Payloads of every conflict report (the colliding writer's local id)
    pub conflicts: Vec<u64>,
    /// Out-of-range raw buffer writes that were dropped
    pub wild_writes: usize,
}

/// A pointer value during emulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ptr {
    /// A whole buffer argument
    Buffer {
        arg: usize,
    },
    /// One element of a buffer argument
    BufferElem {
        arg: usize,
        index: u64,
    },
    /// A whole work-group-local array
    LocalBase {
        global: GlobalId,
    },
    /// One element of a work-group-local array
    LocalElem {
        global: GlobalId,
        index: u64,
    },
    /// A per-work-item stack slot
    Slot {
        inst: InstId,
    },
}

/// A runtime value during emulation
#[derive(Debug, Clone, Copy, PartialEq)]
enum Val {
    Int(u64),
    Ptr(Ptr),
    Unit,
}

impl Val {
    fn as_int(self) -> Result<u64> {
        match self {
            Self::Int(v) => Ok(v),
            other => Err(ScsanError::Emulation(format!(
                "expected an integer, got {:?}",
                other
            ))),
        }
    }

    fn as_ptr(self) -> Result<Ptr> {
        match self {
            Self::Ptr(p) => Ok(p),
            other => Err(ScsanError::Emulation(format!(
                "expected a pointer, got {:?}",
                other
            ))),
        }
    }
}

/// Mutable state of one executing work-item plus its work-group's memory
struct ItemState<'a> {
    gid: u64,
    lid: u64,
    buffers: &'a mut Vec<Option<Vec<u64>>>,
    scalars: &'a [Option<u64>],
    locals: &'a mut HashMap<GlobalId, Vec<u64>>,
    outcome: &'a mut LaunchOutcome,
    regs: HashMap<InstId, Val>,
    slots: HashMap<InstId, Val>,
}

/// Host-side executor over one module
#[derive(Debug, Clone, Copy)]
pub struct Emulator<'m> {
    module: &'m Module,
}

impl<'m> Emulator<'m> {
    /// An emulator over `module`
    #[must_use]
    pub const fn new(module: &'m Module) -> Self {
        Self { module }
    }

    /// Launch `kernel` over the given geometry with arguments bound in
    /// declaration order
    pub fn launch(
        &self,
        kernel: &str,
        config: LaunchConfig,
        args: &[KernelArg],
    ) -> Result<LaunchOutcome> {
        let func = self
            .module
            .kernel(kernel)
            .ok_or_else(|| ScsanError::KernelNotFound(kernel.to_string()))?;
        if args.len() != func.params().len() {
            return Err(ScsanError::Launch(format!(
                "kernel '{}' takes {} arguments, {} bound",
                kernel,
                func.params().len(),
                args.len()
            )));
        }

        let mut buffers: Vec<Option<Vec<u64>>> = Vec::new();
        let mut scalars: Vec<Option<u64>> = Vec::new();
        for arg in args {
            match arg {
                KernelArg::Buffer(data) => {
                    buffers.push(Some(data.clone()));
                    scalars.push(None);
                }
                KernelArg::Scalar(v) => {
                    buffers.push(None);
                    scalars.push(Some(*v));
                }
            }
        }

        let mut outcome = LaunchOutcome::default();

        for group in 0..config.global_size / config.local_size {
            let mut locals = self.fresh_local_memory();
            for lid in 0..config.local_size {
                let gid = (group * config.local_size + lid) as u64;
                let mut state = ItemState {
                    gid,
                    lid: lid as u64,
                    buffers: &mut buffers,
                    scalars: &scalars,
                    locals: &mut locals,
                    outcome: &mut outcome,
                    regs: HashMap::new(),
                    slots: HashMap::new(),
                };
                run_item(self.module, func, &mut state)?;
            }
        }

        outcome.buffers = buffers;
        Ok(outcome)
    }

    /// One zeroed instance of every work-group-local array. Local memory is
    /// not persistent across dispatches; undefined initial contents emulate
    /// as zero.
    fn fresh_local_memory(&self) -> HashMap<GlobalId, Vec<u64>> {
        self.module
            .global_ids()
            .filter(|&g| self.module.global(g).address_space == AddressSpace::Local)
            .filter_map(|g| {
                self.module
                    .global(g)
                    .ty
                    .array_len()
                    .map(|len| (g, vec![0u64; len as usize]))
            })
            .collect()
    }
}

fn run_item(module: &Module, func: &Function, state: &mut ItemState<'_>) -> Result<()> {
    let mut block = func.entry();
    let mut transfers = 0usize;

    loop {
        for &inst in func.block(block).insts() {
            exec(module, state, inst, func.inst(inst))?;
        }

        match func.block(block).terminator() {
            Some(Terminator::Br { dest }) => block = *dest,
            Some(Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            }) => {
                block = if eval(module, state, *cond)?.as_int()? != 0 {
                    *then_dest
                } else {
                    *else_dest
                };
            }
            Some(Terminator::RetVoid) => return Ok(()),
            None => {
                return Err(ScsanError::Emulation(format!(
                    "work-item {} reached an unterminated block in '{}'",
                    state.gid,
                    func.name()
                )))
            }
        }

        transfers += 1;
        if transfers > MAX_BLOCK_TRANSFERS {
            return Err(ScsanError::Emulation(format!(
                "work-item {} exceeded the block-transfer limit in '{}'",
                state.gid,
                func.name()
            )));
        }
    }
}

fn eval(module: &Module, state: &ItemState<'_>, value: Value) -> Result<Val> {
    match value {
        Value::ConstInt { value, .. } => Ok(Val::Int(value)),
        Value::Argument(i) => match state.scalars[i] {
            Some(v) => Ok(Val::Int(v)),
            None => Ok(Val::Ptr(Ptr::Buffer { arg: i })),
        },
        Value::Global(g) => {
            if module.global(g).address_space == AddressSpace::Local {
                Ok(Val::Ptr(Ptr::LocalBase { global: g }))
            } else {
                Err(ScsanError::Emulation(
                    "only work-group-local globals are emulated".to_string(),
                ))
            }
        }
        Value::Inst(id) => state.regs.get(&id).copied().ok_or_else(|| {
            ScsanError::Emulation(format!("use of %{} before definition", id.index()))
        }),
    }
}

fn local_slot<'a>(
    locals: &'a mut HashMap<GlobalId, Vec<u64>>,
    global: GlobalId,
    index: u64,
) -> Result<&'a mut u64> {
    locals
        .get_mut(&global)
        .and_then(|mem| mem.get_mut(index as usize))
        .ok_or_else(|| {
            ScsanError::Emulation(format!("local slot {} out of range", index))
        })
}

fn exec(module: &Module, state: &mut ItemState<'_>, id: InstId, inst: &Instruction) -> Result<()> {
    let result = match inst {
        Instruction::Index { base, indices } => {
            let base = eval(module, state, *base)?.as_ptr()?;
            let last = indices.last().ok_or_else(|| {
                ScsanError::Emulation("indexing with no index operands".to_string())
            })?;
            let index = eval(module, state, *last)?.as_int()?;
            match base {
                Ptr::Buffer { arg } => Val::Ptr(Ptr::BufferElem { arg, index }),
                Ptr::LocalBase { global } => Val::Ptr(Ptr::LocalElem { global, index }),
                other => {
                    return Err(ScsanError::Emulation(format!(
                        "indexing through {:?} is not emulated",
                        other
                    )))
                }
            }
        }
        Instruction::Load { ptr, .. } => match eval(module, state, *ptr)?.as_ptr()? {
            Ptr::Slot { inst } => *state.slots.get(&inst).ok_or_else(|| {
                ScsanError::Emulation("load from a dead stack slot".to_string())
            })?,
            Ptr::BufferElem { arg, index } => {
                let data = state.buffers[arg].as_ref().ok_or_else(|| {
                    ScsanError::Emulation("load through a scalar argument".to_string())
                })?;
                Val::Int(*data.get(index as usize).ok_or_else(|| {
                    ScsanError::Emulation(format!("buffer read at {} out of range", index))
                })?)
            }
            Ptr::LocalElem { global, index } => {
                Val::Int(*local_slot(state.locals, global, index)?)
            }
            other => {
                return Err(ScsanError::Emulation(format!(
                    "load through {:?} is not emulated",
                    other
                )))
            }
        },
        Instruction::Store { ptr, value } => {
            let v = eval(module, state, *value)?;
            match eval(module, state, *ptr)?.as_ptr()? {
                Ptr::Slot { inst } => {
                    state.slots.insert(inst, v);
                }
                Ptr::BufferElem { arg, index } => {
                    let word = v.as_int()?;
                    let data = state.buffers[arg].as_mut().ok_or_else(|| {
                        ScsanError::Emulation("store through a scalar argument".to_string())
                    })?;
                    match data.get_mut(index as usize) {
                        Some(slot) => *slot = word,
                        None => state.outcome.wild_writes += 1,
                    }
                }
                Ptr::LocalElem { global, index } => {
                    let word = v.as_int()?;
                    match local_slot(state.locals, global, index) {
                        Ok(slot) => *slot = word,
                        Err(_) => state.outcome.wild_writes += 1,
                    }
                }
                other => {
                    return Err(ScsanError::Emulation(format!(
                        "store through {:?} is not emulated",
                        other
                    )))
                }
            }
            Val::Unit
        }
        Instruction::Alloca { .. } => {
            state.slots.insert(id, Val::Int(0));
            Val::Ptr(Ptr::Slot { inst: id })
        }
        Instruction::AddrSpaceCast { value, .. } => eval(module, state, *value)?,
        Instruction::Binary { op, lhs, rhs } => {
            let a = eval(module, state, *lhs)?.as_int()?;
            let b = eval(module, state, *rhs)?.as_int()?;
            Val::Int(match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::And => a & b,
                BinOp::Or => a | b,
                BinOp::Xor => a ^ b,
            })
        }
        Instruction::Icmp { pred, lhs, rhs } => {
            let a = eval(module, state, *lhs)?.as_int()?;
            let b = eval(module, state, *rhs)?.as_int()?;
            let holds = match pred {
                IcmpPred::Eq => a == b,
                IcmpPred::Ne => a != b,
                IcmpPred::Ult => a < b,
                IcmpPred::Ule => a <= b,
                IcmpPred::Ugt => a > b,
                IcmpPred::Uge => a >= b,
            };
            Val::Int(u64::from(holds))
        }
        Instruction::Call { callee, args } => {
            let name = module.decl(*callee).name.clone();
            call_builtin(module, state, &name, args)?
        }
    };

    state.regs.insert(id, result);
    Ok(())
}

fn call_builtin(
    module: &Module,
    state: &mut ItemState<'_>,
    name: &str,
    args: &[Value],
) -> Result<Val> {
    match name {
        GET_GLOBAL_ID => {
            let dim = eval(module, state, args[0])?.as_int()?;
            Ok(Val::Int(if dim == 0 { state.gid } else { 0 }))
        }
        GET_LOCAL_ID => {
            let dim = eval(module, state, args[0])?.as_int()?;
            Ok(Val::Int(if dim == 0 { state.lid } else { 0 }))
        }
        ATOMIC_EXCHANGE => {
            let ptr = eval(module, state, args[0])?.as_ptr()?;
            let new = eval(module, state, args[1])?.as_int()?;
            let Ptr::LocalElem { global, index } = ptr else {
                return Err(ScsanError::Emulation(
                    "atomic exchange outside work-group-local memory".to_string(),
                ));
            };
            let slot = local_slot(state.locals, global, index)?;
            let old = *slot;
            *slot = new;
            Ok(Val::Int(old))
        }
        SHADOW_MEMSET => {
            let ptr = eval(module, state, args[0])?.as_ptr()?;
            let count = eval(module, state, args[1])?.as_int()?;
            let fill = eval(module, state, args[2])?.as_int()?;
            let Ptr::LocalBase { global } = ptr else {
                return Err(ScsanError::Emulation(
                    "shadow memset outside work-group-local memory".to_string(),
                ));
            };
            // The hook is called by every work-item; the runtime fills the
            // array once per work-group. Local id 0 stands in for that here.
            if state.lid == 0 {
                let mem = state.locals.get_mut(&global).ok_or_else(|| {
                    ScsanError::Emulation("shadow memset on unknown array".to_string())
                })?;
                for slot in mem.iter_mut().take(count as usize) {
                    *slot = fill;
                }
            }
            Ok(Val::Unit)
        }
        REPORT_INDEX_OUT_OF_BOUNDS => {
            state.outcome.out_of_bounds.push(state.gid);
            Ok(Val::Unit)
        }
        REPORT_LOCAL_MEMORY_CONFLICT => {
            let prev = eval(module, state, args[0])?.as_int()?;
            state.outcome.conflicts.push(prev);
            Ok(Val::Unit)
        }
        other => Err(ScsanError::Emulation(format!(
            "call to undeclared runtime symbol '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AddressSpace, GlobalVariable, KernelBuilder, Type};
    use crate::pass::SpirvComputeSanitizer;

    fn store_gid_module() -> Module {
        let mut m = Module::new("spirv64-unknown-unknown");
        KernelBuilder::new("f")
            .param(Type::Pointer(AddressSpace::Global))
            .param(Type::Int(64))
            .build(&mut m, |b| {
                let gid = b.get_global_id(0);
                let slot = b.index(Value::Argument(0), gid);
                b.store(slot, gid);
                b.ret_void();
            });
        m
    }

    #[test]
    fn test_uninstrumented_kernel_runs() {
        let m = store_gid_module();
        let outcome = Emulator::new(&m)
            .launch(
                "f",
                LaunchConfig::new(8, 8).unwrap(),
                &[KernelArg::Buffer(vec![0; 8]), KernelArg::Scalar(8)],
            )
            .unwrap();

        assert_eq!(
            outcome.buffers[0].as_deref().unwrap(),
            &[0, 1, 2, 3, 4, 5, 6, 7]
        );
        assert!(outcome.out_of_bounds.is_empty());
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_instrumented_kernel_reports_violations() {
        let mut m = store_gid_module();
        SpirvComputeSanitizer::new().run(&mut m);

        let outcome = Emulator::new(&m)
            .launch(
                "f",
                LaunchConfig::new(8, 8).unwrap(),
                &[KernelArg::Buffer(vec![0; 8]), KernelArg::Scalar(4)],
            )
            .unwrap();

        assert_eq!(outcome.out_of_bounds, vec![4, 5, 6, 7]);
        // The guarded tail never executed for the reporting work-items.
        assert_eq!(
            outcome.buffers[0].as_deref().unwrap(),
            &[0, 1, 2, 3, 0, 0, 0, 0]
        );
        assert_eq!(outcome.wild_writes, 0);
    }

    #[test]
    fn test_conflict_protocol_witnesses_race() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let g = m.add_global(GlobalVariable::work_group_array("a", Type::Int(32), 64));
        KernelBuilder::new("k").build(&mut m, |b| {
            let lid = b.get_local_id(0);
            let slot = b.index_array(g, Value::const_u64(0));
            b.store(slot, lid);
            b.ret_void();
        });
        SpirvComputeSanitizer::new().run(&mut m);

        let outcome = Emulator::new(&m)
            .launch("k", LaunchConfig::new(4, 4).unwrap(), &[])
            .unwrap();

        assert!(!outcome.conflicts.is_empty());
        for prev in &outcome.conflicts {
            assert!(*prev < 4);
        }
    }

    #[test]
    fn test_distinct_slots_do_not_conflict() {
        let mut m = Module::new("spirv64-unknown-unknown");
        let g = m.add_global(GlobalVariable::work_group_array("a", Type::Int(32), 64));
        KernelBuilder::new("k").build(&mut m, |b| {
            let lid = b.get_local_id(0);
            let slot = b.index_array(g, lid);
            b.store(slot, lid);
            b.ret_void();
        });
        SpirvComputeSanitizer::new().run(&mut m);

        let outcome = Emulator::new(&m)
            .launch("k", LaunchConfig::new(64, 64).unwrap(), &[])
            .unwrap();

        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_launch_validates_geometry() {
        assert!(LaunchConfig::new(8, 3).is_err());
        assert!(LaunchConfig::new(0, 1).is_err());
        assert!(LaunchConfig::new(8, 0).is_err());
        assert!(LaunchConfig::new(8, 4).is_ok());
    }

    #[test]
    fn test_launch_rejects_wrong_arity() {
        let m = store_gid_module();
        let err = Emulator::new(&m).launch(
            "f",
            LaunchConfig::new(1, 1).unwrap(),
            &[KernelArg::Scalar(0)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_kernel() {
        let m = store_gid_module();
        assert!(matches!(
            Emulator::new(&m).launch("nope", LaunchConfig::new(1, 1).unwrap(), &[]),
            Err(ScsanError::KernelNotFound(_))
        ));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::ir::{GlobalVariable, KernelBuilder, Type};
    use crate::pass::SpirvComputeSanitizer;
    use proptest::prelude::*;

    fn local_writer(slot: Option<u64>) -> Module {
        let mut m = Module::new("spirv64-unknown-unknown");
        let g = m.add_global(GlobalVariable::work_group_array("a", Type::Int(32), 64));
        KernelBuilder::new("k").build(&mut m, |b| {
            let lid = b.get_local_id(0);
            let idx = slot.map_or(lid, Value::const_u64);
            let addr = b.index_array(g, idx);
            b.store(addr, lid);
            b.ret_void();
        });
        SpirvComputeSanitizer::new().run(&mut m);
        m
    }

    proptest! {
        /// Work-items writing their own slots never conflict, whatever the
        /// group size.
        #[test]
        fn distinct_slots_never_conflict(local_size in 1usize..=64) {
            let m = local_writer(None);
            let outcome = Emulator::new(&m)
                .launch("k", LaunchConfig::new(local_size, local_size).unwrap(), &[])
                .unwrap();
            prop_assert!(outcome.conflicts.is_empty());
        }

        /// Two or more work-items hammering one slot always get witnessed.
        #[test]
        fn shared_slot_always_witnessed(
            local_size in 2usize..=64,
            slot in 0u64..64,
        ) {
            let m = local_writer(Some(slot));
            let outcome = Emulator::new(&m)
                .launch("k", LaunchConfig::new(local_size, local_size).unwrap(), &[])
                .unwrap();
            prop_assert!(!outcome.conflicts.is_empty());
            for prev in &outcome.conflicts {
                prop_assert!(*prev < local_size as u64);
            }
        }
    }
}
