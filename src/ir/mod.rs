//! Portable Compute IR
//!
//! A small, block-structured IR for GPU compute kernels - the form the
//! sanitizer pass analyzes and rewrites. Pure Rust, no LLVM linkage.
//!
//! ## Architecture
//!
//! ```text
//! KernelBuilder -> Module (globals, declarations, kernels) -> pass -> emit
//! ```
//!
//! ## Example
//!
//! ```rust
//! use scsan::ir::{AddressSpace, KernelBuilder, Module, Type, Value};
//!
//! let mut module = Module::new("spirv64-unknown-unknown");
//! KernelBuilder::new("store_gid")
//!     .param(Type::Pointer(AddressSpace::Global))
//!     .param(Type::Int(64))
//!     .build(&mut module, |b| {
//!         let gid = b.get_global_id(0);
//!         let slot = b.index(Value::Argument(0), gid);
//!         b.store(slot, gid);
//!         b.ret_void();
//!     });
//!
//! assert!(module.ir().contains("define spir_func void @store_gid"));
//! ```

pub mod builder;
pub mod emit;
mod function;
mod inst;
mod module;
mod triple;
mod types;

pub use builder::{BodyBuilder, KernelBuilder, GET_GLOBAL_ID, GET_LOCAL_ID};
pub use function::{BasicBlock, Function, Parameter};
pub use inst::{
    BinOp, BlockId, DeclId, GlobalId, IcmpPred, InstId, Instruction, Terminator, Value,
};
pub use module::{CallingConv, FunctionDecl, GlobalVariable, Initializer, Linkage, Module};
pub use triple::Triple;
pub use types::{AddressSpace, Type};
