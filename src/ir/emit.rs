//! Textual IR Emission and Structural Validation
//!
//! The emitter produces a deterministic textual form of a module, used by
//! diagnostics and by tests that compare modules for equality. `validate`
//! checks the block-structure invariants the sanitizer promises to
//! preserve: one terminator per block, no unreachable-without-predecessor
//! blocks, well-formed branch targets.

use std::fmt::Write as _;

use super::function::Function;
use super::inst::{Instruction, Terminator, Value};
use super::module::{Initializer, Linkage, Module};
use super::types::Type;

/// Emit the textual form of a module
#[must_use]
pub fn emit(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "target triple = \"{}\"", module.target_triple);

    if !module.globals.is_empty() {
        out.push('\n');
    }
    for (i, g) in module.globals.iter().enumerate() {
        let name = g
            .name
            .clone()
            .unwrap_or_else(|| i.to_string());
        let linkage = match g.linkage {
            Linkage::External => "",
            Linkage::Internal => "internal ",
        };
        let kind = if g.is_constant { "constant" } else { "global" };
        let init = match g.initializer {
            Initializer::Undef => "undef",
            Initializer::Zero => "zeroinitializer",
        };
        let _ = write!(
            out,
            "@{} = {}addrspace({}) {} {} {}",
            name,
            linkage,
            g.address_space.number(),
            kind,
            g.ty,
            init
        );
        if g.externally_initialized {
            out.push_str(", externally_initialized");
        }
        if let Some(a) = g.align {
            let _ = write!(out, ", align {}", a);
        }
        out.push('\n');
    }

    if !module.declarations.is_empty() {
        out.push('\n');
    }
    for d in &module.declarations {
        let params = d
            .params
            .iter()
            .map(|p| {
                if d.params_noundef {
                    format!("{} noundef", p)
                } else {
                    p.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(
            out,
            "declare {} {} @{}({})",
            d.calling_conv.mnemonic(),
            d.ret,
            d.name,
            params
        );
        if d.convergent {
            out.push_str(" convergent");
        }
        if d.unnamed_addr_local {
            out.push_str(" local_unnamed_addr");
        }
        out.push('\n');
    }

    for k in &module.kernels {
        out.push('\n');
        out.push_str(&emit_function(module, k));
    }
    out
}

/// Emit the textual form of one kernel
#[must_use]
pub fn emit_function(module: &Module, func: &Function) -> String {
    let mut out = String::new();
    let params = func
        .params()
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{} %arg{}", p.ty, i))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "define spir_func void @{}({}) {{", func.name(), params);

    for b in func.block_ids() {
        let _ = writeln!(out, "bb{}:", b.index());
        for &i in func.block(b).insts() {
            let _ = writeln!(out, "  {}", fmt_inst(module, func, i.index(), func.inst(i)));
        }
        match func.block(b).terminator() {
            Some(Terminator::Br { dest }) => {
                let _ = writeln!(out, "  br label %bb{}", dest.index());
            }
            Some(Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            }) => {
                let _ = writeln!(
                    out,
                    "  br i1 {}, label %bb{}, label %bb{}",
                    fmt_raw(module, *cond),
                    then_dest.index(),
                    else_dest.index()
                );
            }
            Some(Terminator::RetVoid) => {
                let _ = writeln!(out, "  ret void");
            }
            None => {
                let _ = writeln!(out, "  <no terminator>");
            }
        }
    }
    out.push_str("}\n");
    out
}

fn fmt_typed(module: &Module, func: &Function, v: Value) -> String {
    format!("{} {}", func.value_type(module, v), fmt_raw(module, v))
}

fn fmt_raw(module: &Module, v: Value) -> String {
    match v {
        Value::Argument(i) => format!("%arg{}", i),
        Value::Inst(id) => format!("%{}", id.index()),
        Value::ConstInt { value, .. } => value.to_string(),
        Value::Global(g) => match &module.global(g).name {
            Some(n) => format!("@{}", n),
            None => format!("@{}", g.index()),
        },
    }
}

fn fmt_inst(module: &Module, func: &Function, id: usize, inst: &Instruction) -> String {
    match inst {
        Instruction::Index { base, indices } => {
            let idxs = indices
                .iter()
                .map(|v| fmt_typed(module, func, *v))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "%{} = elemptr {}, {}",
                id,
                fmt_typed(module, func, *base),
                idxs
            )
        }
        Instruction::Load { ty, ptr } => {
            format!("%{} = load {}, {}", id, ty, fmt_typed(module, func, *ptr))
        }
        Instruction::Store { ptr, value } => format!(
            "store {}, {}",
            fmt_typed(module, func, *value),
            fmt_typed(module, func, *ptr)
        ),
        Instruction::Alloca { ty } => format!("%{} = alloca {}", id, ty),
        Instruction::Call { callee, args } => {
            let d = module.decl(*callee);
            let rendered = args
                .iter()
                .map(|v| fmt_typed(module, func, *v))
                .collect::<Vec<_>>()
                .join(", ");
            if d.ret == Type::Void {
                format!("call void @{}({})", d.name, rendered)
            } else {
                format!("%{} = call {} @{}({})", id, d.ret, d.name, rendered)
            }
        }
        Instruction::AddrSpaceCast { value, target } => format!(
            "%{} = addrspacecast {} to ptr addrspace({})",
            id,
            fmt_typed(module, func, *value),
            target.number()
        ),
        Instruction::Binary { op, lhs, rhs } => format!(
            "%{} = {} {}, {}",
            id,
            op.mnemonic(),
            fmt_typed(module, func, *lhs),
            fmt_raw(module, *rhs)
        ),
        Instruction::Icmp { pred, lhs, rhs } => format!(
            "%{} = icmp {} {}, {}",
            id,
            pred.mnemonic(),
            fmt_typed(module, func, *lhs),
            fmt_raw(module, *rhs)
        ),
    }
}

/// Check the block-structure invariants of one kernel
pub fn validate(func: &Function) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let mut seen = std::collections::HashSet::new();
    for b in func.block_ids() {
        if func.block(b).terminator().is_none() {
            errors.push(format!("block bb{} has no terminator", b.index()));
        }
        for &i in func.block(b).insts() {
            if !seen.insert(i) {
                errors.push(format!(
                    "instruction %{} appears in more than one block",
                    i.index()
                ));
            }
            if i.index() >= func.inst_count() {
                errors.push(format!("instruction %{} does not exist", i.index()));
            }
        }
        if let Some(t) = func.block(b).terminator() {
            for s in t.successors() {
                if s.index() >= func.block_count() {
                    errors.push(format!(
                        "block bb{} branches to nonexistent bb{}",
                        b.index(),
                        s.index()
                    ));
                }
            }
        }
    }

    for b in func.block_ids() {
        if b != func.entry() && func.predecessors(b).is_empty() {
            errors.push(format!("block bb{} has no predecessors", b.index()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Check the block-structure invariants of every kernel in a module
pub fn validate_module(module: &Module) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    for k in &module.kernels {
        if let Err(es) = validate(k) {
            for e in es {
                errors.push(format!("{}: {}", k.name(), e));
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::KernelBuilder;
    use crate::ir::module::GlobalVariable;
    use crate::ir::types::AddressSpace;
    use crate::ir::Value;

    fn sample_module() -> Module {
        let mut m = Module::new("spirv64-unknown-unknown");
        m.add_global(GlobalVariable::work_group_array("a", Type::Int(32), 64));
        KernelBuilder::new("k")
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
    fn test_emit_contains_triple_and_global() {
        let m = sample_module();
        let text = emit(&m);
        assert!(text.contains("target triple = \"spirv64-unknown-unknown\""));
        assert!(text.contains("@a = internal addrspace(3) global [64 x i32] undef"));
    }

    #[test]
    fn test_emit_contains_kernel_body() {
        let m = sample_module();
        let text = emit(&m);
        assert!(text.contains("define spir_func void @k(ptr addrspace(1) %arg0, i64 %arg1)"));
        assert!(text.contains("call i64 @_Z13get_global_idj(i32 0)"));
        assert!(text.contains("elemptr"));
        assert!(text.contains("ret void"));
    }

    #[test]
    fn test_emit_is_deterministic() {
        let a = emit(&sample_module());
        let b = emit(&sample_module());
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate_ok() {
        let m = sample_module();
        assert!(validate(&m.kernels[0]).is_ok());
        assert!(validate_module(&m).is_ok());
    }

    #[test]
    fn test_validate_missing_terminator() {
        let mut f = Function::new("k", vec![]);
        let _ = f.add_block();
        let result = validate(&f);
        let errors = result.unwrap_err();
        assert!(errors.iter().any(|e| e.contains("no terminator")));
        // The added block is also unreachable.
        assert!(errors.iter().any(|e| e.contains("no predecessors")));
    }
}
