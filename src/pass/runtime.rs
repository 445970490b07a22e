//! Runtime-Symbol Declarator
//!
//! Declares the sanitizer-runtime entry points and the device builtins the
//! instrumentation calls. The symbol names are a bit-exact contract with the
//! `libscsan` device runtime; the work-item id builtins and the atomic
//! exchange carry the Itanium manglings the OpenCL toolchain gives them.

use crate::ir::{
    AddressSpace, CallingConv, DeclId, FunctionDecl, Module, Type, GET_GLOBAL_ID, GET_LOCAL_ID,
};

/// Reporter called on a failed bounds check
pub const REPORT_INDEX_OUT_OF_BOUNDS: &str = "libscsan_report_index_out_of_bounds";

/// Reporter called on a detected local-memory conflict; the argument is the
/// previous writer's local id
pub const REPORT_LOCAL_MEMORY_CONFLICT: &str = "libscsan_report_local_memory_conflict";

/// Initializer that fills one shadow array with a value
pub const SHADOW_MEMSET: &str = "libscsan_shadow_memset";

/// Mangled name of the 64-bit atomic exchange on a generic pointer
pub const ATOMIC_EXCHANGE: &str = "_Z15atomic_exchangePU3AS4VU7_Atomicmm";

/// Declaration ids of everything the instrumentation calls
#[derive(Debug, Clone, Copy)]
pub struct RuntimeHooks {
    /// `libscsan_report_index_out_of_bounds() -> void`
    pub report_index_out_of_bounds: DeclId,
    /// `libscsan_report_local_memory_conflict(u64) -> void`
    pub report_local_memory_conflict: DeclId,
    /// `libscsan_shadow_memset(u64 addrspace(3)*, u64, u64) -> void`
    pub shadow_memset: DeclId,
    /// `get_local_id(u32) -> u64`
    pub get_local_id: DeclId,
    /// `atomic_exchange(u64 addrspace(4)*, u64) -> u64`
    pub atomic_exchange: DeclId,
}

fn sanitizer_decl(name: &str, params: Vec<Type>, ret: Type) -> FunctionDecl {
    FunctionDecl {
        name: name.to_string(),
        params,
        ret,
        calling_conv: CallingConv::SpirFunc,
        convergent: true,
        unnamed_addr_local: true,
        params_noundef: true,
    }
}

fn builtin_decl(name: &str, params: Vec<Type>, ret: Type) -> FunctionDecl {
    FunctionDecl {
        name: name.to_string(),
        params,
        ret,
        calling_conv: CallingConv::SpirFunc,
        convergent: false,
        unnamed_addr_local: false,
        params_noundef: false,
    }
}

/// Declare every runtime entry point in `module`, get-or-insert. Safe to
/// call more than once; redeclaration returns the existing ids.
pub fn declare(module: &mut Module) -> RuntimeHooks {
    let report_index_out_of_bounds = module.get_or_insert_declaration(sanitizer_decl(
        REPORT_INDEX_OUT_OF_BOUNDS,
        vec![],
        Type::Void,
    ));
    let report_local_memory_conflict = module.get_or_insert_declaration(sanitizer_decl(
        REPORT_LOCAL_MEMORY_CONFLICT,
        vec![Type::Int(64)],
        Type::Void,
    ));
    let shadow_memset = module.get_or_insert_declaration(sanitizer_decl(
        SHADOW_MEMSET,
        vec![
            Type::Pointer(AddressSpace::Local),
            Type::Int(64),
            Type::Int(64),
        ],
        Type::Void,
    ));
    let get_local_id = module.get_or_insert_declaration(builtin_decl(
        GET_LOCAL_ID,
        vec![Type::Int(32)],
        Type::Int(64),
    ));
    let atomic_exchange = module.get_or_insert_declaration(builtin_decl(
        ATOMIC_EXCHANGE,
        vec![Type::Pointer(AddressSpace::Generic), Type::Int(64)],
        Type::Int(64),
    ));

    RuntimeHooks {
        report_index_out_of_bounds,
        report_local_memory_conflict,
        shadow_memset,
        get_local_id,
        atomic_exchange,
    }
}
