//! Kernel Construction API
//!
//! Builder-pattern construction of kernels, used by tests and by host tools
//! that assemble modules programmatically.
//!
//! ## Example
//!
//! ```rust
//! use scsan::ir::{AddressSpace, KernelBuilder, Module, Type, Value};
//!
//! let mut module = Module::new("spirv64-unknown-unknown");
//! KernelBuilder::new("copy")
//!     .param(Type::Pointer(AddressSpace::Global))
//!     .param(Type::Pointer(AddressSpace::Global))
//!     .param(Type::Int(64))
//!     .build(&mut module, |b| {
//!         let gid = b.get_global_id(0);
//!         let src = b.index(Value::Argument(0), gid);
//!         let v = b.load(Type::Int(32), src);
//!         let dst = b.index(Value::Argument(1), gid);
//!         b.store(dst, v);
//!         b.ret_void();
//!     });
//! ```

use super::inst::{BinOp, BlockId, DeclId, IcmpPred, Instruction, Terminator, Value};
use super::function::Function;
use super::module::{CallingConv, FunctionDecl, Module};
use super::types::Type;
use crate::ir::GlobalId;

/// Mangled name of the work-item global-id builtin
pub const GET_GLOBAL_ID: &str = "_Z13get_global_idj";

/// Mangled name of the work-item local-id builtin
pub const GET_LOCAL_ID: &str = "_Z12get_local_idj";

/// Builder for one kernel function
#[derive(Debug, Clone)]
pub struct KernelBuilder {
    name: String,
    params: Vec<Type>,
}

impl KernelBuilder {
    /// Start a kernel with the given name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter
    #[must_use]
    pub fn param(mut self, ty: Type) -> Self {
        self.params.push(ty);
        self
    }

    /// Build the kernel body and append the kernel to `module`, returning
    /// its index
    pub fn build(
        self,
        module: &mut Module,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> usize {
        let func = Function::new(self.name, self.params);
        let current = func.entry();
        let mut b = BodyBuilder {
            module,
            func,
            current,
        };
        body(&mut b);
        let BodyBuilder { module, func, .. } = b;
        module.add_kernel(func)
    }
}

/// Positioned builder over one kernel body
#[derive(Debug)]
pub struct BodyBuilder<'m> {
    module: &'m mut Module,
    func: Function,
    current: BlockId,
}

impl BodyBuilder<'_> {
    /// The block instructions are currently appended to
    #[must_use]
    pub const fn block(&self) -> BlockId {
        self.current
    }

    /// Create a fresh, empty block
    pub fn new_block(&mut self) -> BlockId {
        self.func.add_block()
    }

    /// Move the insertion point to `block`
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Declare (or look up) an external function
    pub fn declare(&mut self, decl: FunctionDecl) -> DeclId {
        self.module.get_or_insert_declaration(decl)
    }

    /// Call an external declaration
    pub fn call(&mut self, callee: DeclId, args: Vec<Value>) -> Value {
        Value::Inst(
            self.func
                .push_inst(self.current, Instruction::Call { callee, args }),
        )
    }

    /// Current work-item global id in `dim`
    pub fn get_global_id(&mut self, dim: u32) -> Value {
        let decl = self.declare(work_item_id_decl(GET_GLOBAL_ID));
        self.call(decl, vec![Value::const_u32(dim)])
    }

    /// Current work-item local id in `dim`
    pub fn get_local_id(&mut self, dim: u32) -> Value {
        let decl = self.declare(work_item_id_decl(GET_LOCAL_ID));
        self.call(decl, vec![Value::const_u32(dim)])
    }

    /// Address of element `idx` of the buffer at `base`
    pub fn index(&mut self, base: Value, idx: Value) -> Value {
        Value::Inst(self.func.push_inst(
            self.current,
            Instruction::Index {
                base,
                indices: vec![idx],
            },
        ))
    }

    /// Address of element `idx` of a module-scope array
    pub fn index_array(&mut self, array: GlobalId, idx: Value) -> Value {
        Value::Inst(self.func.push_inst(
            self.current,
            Instruction::Index {
                base: Value::Global(array),
                indices: vec![Value::const_u64(0), idx],
            },
        ))
    }

    /// Load a value of type `ty` from `ptr`
    pub fn load(&mut self, ty: Type, ptr: Value) -> Value {
        Value::Inst(
            self.func
                .push_inst(self.current, Instruction::Load { ty, ptr }),
        )
    }

    /// Store `value` through `ptr`
    pub fn store(&mut self, ptr: Value, value: Value) {
        self.func
            .push_inst(self.current, Instruction::Store { ptr, value });
    }

    /// A fresh stack slot of type `ty`
    pub fn alloca(&mut self, ty: Type) -> Value {
        Value::Inst(self.func.push_inst(self.current, Instruction::Alloca { ty }))
    }

    /// Integer binary operation
    pub fn binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> Value {
        Value::Inst(
            self.func
                .push_inst(self.current, Instruction::Binary { op, lhs, rhs }),
        )
    }

    /// Wrapping addition
    pub fn add(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinOp::Add, lhs, rhs)
    }

    /// Wrapping subtraction
    pub fn sub(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinOp::Sub, lhs, rhs)
    }

    /// Integer comparison
    pub fn icmp(&mut self, pred: IcmpPred, lhs: Value, rhs: Value) -> Value {
        Value::Inst(
            self.func
                .push_inst(self.current, Instruction::Icmp { pred, lhs, rhs }),
        )
    }

    /// Unconditional branch
    pub fn br(&mut self, dest: BlockId) {
        self.func.set_terminator(self.current, Terminator::Br { dest });
    }

    /// Conditional branch
    pub fn cond_br(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) {
        self.func.set_terminator(
            self.current,
            Terminator::CondBr {
                cond,
                then_dest,
                else_dest,
            },
        );
    }

    /// Void return
    pub fn ret_void(&mut self) {
        self.func.set_terminator(self.current, Terminator::RetVoid);
    }
}

fn work_item_id_decl(name: &str) -> FunctionDecl {
    FunctionDecl {
        name: name.to_string(),
        params: vec![Type::Int(32)],
        ret: Type::Int(64),
        calling_conv: CallingConv::SpirFunc,
        convergent: false,
        unnamed_addr_local: false,
        params_noundef: false,
    }
}
