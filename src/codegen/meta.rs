//! Lowers a `MetaDecl`'s body — a tree of `MetaContribution`s, `MetaIf`
//! branches and `MetaCalculation` side effects — into an *emitter*
//! function: native code that, when the executor calls it, drives the
//! three host callbacks (`contribute`/`reduce`/`introduce`) to build a new
//! `MetaUnit`'s flat layout at JIT-execution time.
//!
//! The node argument each callback receives is not a raw pointer: it's the
//! contributed node's arena index (see [`crate::ast::NodeId::arena_index`]),
//! since the executor — not the generated code — owns the `Ast` the index
//! is resolved against. `emitter_signature` models the opaque `ctx`
//! likewise, as a host-side table index rather than a real pointer.

use std::collections::HashMap;

use cranelift_codegen::ir::{types, AbiParam, InstBuilder, Signature, Value};
use cranelift_frontend::{FunctionBuilder, Variable};
use cranelift_module::Module;

use crate::ast::{BinOp, Node, NodeId};
use crate::codegen::{emitter_signature, int_abi_param, ActiveSet, Backend};
use crate::context::CompilerContext;
use crate::error::{error, ErrorReported};
use crate::executor::IntroduceDepth;
use crate::resolve::DefId;

const INT: cranelift_codegen::ir::Type = types::I32;
const HANDLE: cranelift_codegen::ir::Type = types::I64;

fn contribute_signature(call_conv: cranelift_codegen::isa::CallConv) -> Signature {
    let mut sig = Signature::new(call_conv);
    sig.params.push(AbiParam::new(HANDLE)); // ctx
    sig.params.push(AbiParam::new(HANDLE)); // node index
    sig
}

fn reduce_signature(call_conv: cranelift_codegen::isa::CallConv) -> Signature {
    let mut sig = Signature::new(call_conv);
    sig.params.push(AbiParam::new(HANDLE)); // ctx
    sig
}

fn introduce_signature(call_conv: cranelift_codegen::isa::CallConv) -> Signature {
    let mut sig = Signature::new(call_conv);
    sig.params.push(AbiParam::new(HANDLE)); // ctx
    sig.params.push(AbiParam::new(HANDLE)); // name symbol, as a raw u32 widened to i64
    sig.params.push(int_abi_param()); // value
    sig.params.push(int_abi_param()); // depth: IntroduceDepth as i32
    sig
}

/// Declares the emitter function for one instantiation of `meta_decl` (a
/// `MetaDecl` node) with `arg_values` bound to its parameters, plus the
/// three host-callback imports it needs, then generates its body.
///
/// Meta arguments are restricted to integer-literal expressions (enforced
/// in `crate::sema`), so their values are known at the call site rather
/// than only at JIT-execution time; they're baked into the emitter as
/// constants instead of threaded through the calling convention. This
/// means a distinct emitter is generated per distinct `arg_values` tuple —
/// the executor's instantiation cache is what keeps that from happening
/// twice for the same tuple.
pub fn codegen_emitter(
    ctx: &mut CompilerContext,
    backend: &mut Backend,
    active: &mut ActiveSet,
    meta_decl: NodeId,
    arg_values: &[i32],
) -> Result<cranelift_module::FuncId, ErrorReported> {
    let guard = match active.enter(meta_decl) {
        Some(g) => g,
        None => {
            let (span, name) = match ctx.ast.get(meta_decl) {
                Node::MetaDecl(d) => (d.name.span, ctx.interner.resolve(d.name.value).to_owned()),
                _ => (crate::pos::Span::default(), String::new()),
            };
            return Err(error!(ctx.diagnostics, InstantiationCycle { span, name }));
        }
    };

    let decl = match ctx.ast.get(meta_decl) {
        Node::MetaDecl(d) => d.clone(),
        _ => panic!("codegen_emitter called on a non-MetaDecl node"),
    };
    let arg_suffix = arg_values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("_");
    let name = format!("{}$emit${}${}", ctx.interner.resolve(decl.name.value), meta_decl.arena_index(), arg_suffix);
    let call_conv = backend.call_conv();
    let sig = emitter_signature(call_conv);
    let func_id = backend
        .module
        .declare_function(&name, cranelift_module::Linkage::Export, &sig)
        .map_err(|e| crate::error::bug!(ctx.diagnostics, decl.name.span, "failed to declare emitter `{}`: {}", name, e))?;

    let contribute_id = backend
        .module
        .declare_function("metac_contribute", cranelift_module::Linkage::Import, &contribute_signature(call_conv))
        .map_err(|e| crate::error::bug!(ctx.diagnostics, decl.name.span, "failed to import contribute callback: {}", e))?;
    let reduce_id = backend
        .module
        .declare_function("metac_reduce", cranelift_module::Linkage::Import, &reduce_signature(call_conv))
        .map_err(|e| crate::error::bug!(ctx.diagnostics, decl.name.span, "failed to import reduce callback: {}", e))?;
    let introduce_id = backend
        .module
        .declare_function("metac_introduce", cranelift_module::Linkage::Import, &introduce_signature(call_conv))
        .map_err(|e| crate::error::bug!(ctx.diagnostics, decl.name.span, "failed to import introduce callback: {}", e))?;

    backend.ctx.func.signature = sig;
    backend.ctx.func.name = cranelift_codegen::ir::UserFuncName::user(0, func_id.as_u32());

    {
        let mut builder = FunctionBuilder::new(&mut backend.ctx.func, &mut backend.builder_context);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let ctx_handle = builder.block_params(entry)[0];

        let mut locals: HashMap<DefId, Variable> = HashMap::new();
        let mut next_var = 0u32;
        if let Node::ArgumentDeclList(list) = ctx.ast.get(decl.args).clone() {
            for (i, arg) in list.args.iter().enumerate() {
                if let Node::NamedArgumentDecl(a) = ctx.ast.get(*arg).clone() {
                    if let Some(def) = a.def_id {
                        let var = Variable::new(next_var as usize);
                        next_var += 1;
                        builder.declare_var(var, INT);
                        let value = arg_values.get(i).copied().unwrap_or(0);
                        let konst = builder.ins().iconst(INT, value as i64);
                        builder.def_var(var, konst);
                        locals.insert(def, var);
                    }
                }
            }
        }

        let contribute_ref = backend.module.declare_func_in_func(contribute_id, builder.func);
        let reduce_ref = backend.module.declare_func_in_func(reduce_id, builder.func);
        let introduce_ref = backend.module.declare_func_in_func(introduce_id, builder.func);

        let mut lowerer = MetaLowering {
            ctx,
            builder: &mut builder,
            ctx_handle,
            contribute_ref,
            reduce_ref,
            introduce_ref,
            locals,
            next_var,
        };
        // The meta decl's own parameters (`n`, `a`, ...) are only bound as
        // emitter-local Cranelift variables above; contributed bodies still
        // reference them by name (a plain `DeclRefExpr`, unresolved while
        // the body is a template), so re-resolving them once this
        // instantiation's `MetaUnit` is structured needs a binding with
        // that same name to be visible there too. Introduce one ahead of
        // contributing anything, exactly as a `meta-calculation` exports
        // its own locals.
        lowerer.introduce_own_parameters(decl.args)?;
        lowerer.codegen_children_contribution(decl.body)?;
        lowerer.builder.ins().return_(&[]);
        builder.finalize();
    }

    backend
        .module
        .define_function(func_id, &mut backend.ctx)
        .map_err(|e| crate::error::bug!(ctx.diagnostics, decl.name.span, "failed to define emitter `{}`: {}", name, e))?;
    backend.module.clear_context(&mut backend.ctx);

    drop(guard);
    Ok(func_id)
}

struct MetaLowering<'a, 'b> {
    ctx: &'a mut CompilerContext,
    builder: &'a mut FunctionBuilder<'b>,
    ctx_handle: Value,
    contribute_ref: cranelift_codegen::ir::FuncRef,
    reduce_ref: cranelift_codegen::ir::FuncRef,
    introduce_ref: cranelift_codegen::ir::FuncRef,
    locals: HashMap<DefId, Variable>,
    next_var: u32,
}

impl<'a, 'b> MetaLowering<'a, 'b> {
    fn fresh_var(&mut self) -> Variable {
        let var = Variable::new(self.next_var as usize);
        self.next_var += 1;
        self.builder.declare_var(var, INT);
        var
    }

    /// Emits a `contribute(ctx, node_index)` call for a single template
    /// node, followed by a `reduce(ctx)` call if the node's arity is
    /// variadic (matches [`crate::ast::Node::requires_reduce_marker`], the
    /// same rule the flat layout writer uses).
    fn create_contribute_node(&mut self, node: NodeId) {
        let idx = self.builder.ins().iconst(HANDLE, node.arena_index() as i64);
        self.builder.ins().call(self.contribute_ref, &[self.ctx_handle, idx]);
        if self.ctx.ast.get(node).requires_reduce_marker() {
            self.builder.ins().call(self.reduce_ref, &[self.ctx_handle]);
        }
    }

    /// Contributes every child of the `MetaContribution` at `node`, then
    /// closes its variadic sibling list with one `reduce(ctx)` call —
    /// `node` is always a `MetaContribution` in practice (a `MetaDecl`
    /// body or a `MetaIf` branch); the fallback exists only so a stray
    /// single-node body doesn't panic.
    fn codegen_children_contribution(&mut self, node: NodeId) -> Result<(), ErrorReported> {
        match self.ctx.ast.get(node).clone() {
            Node::MetaContribution(c) => {
                for child in c.children {
                    self.codegen_meta(child)?;
                }
                self.builder.ins().call(self.reduce_ref, &[self.ctx_handle]);
            }
            _ => self.create_contribute_node(node),
        }
        Ok(())
    }

    /// Drives the callbacks for one node of the meta body: a plain
    /// declaration contributes itself, `MetaIf` picks a branch at
    /// JIT-execution time, and `MetaCalculation` runs its wrapped
    /// statement for side effects before exporting its bindings.
    fn codegen_meta(&mut self, node: NodeId) -> Result<(), ErrorReported> {
        match self.ctx.ast.get(node).clone() {
            Node::MetaContribution(c) => {
                for child in c.children {
                    self.codegen_meta(child)?;
                }
            }
            Node::MetaIfStmt(s) => {
                let cond = self.lower_expr(s.cond)?;
                let then_block = self.builder.create_block();
                let merge_block = self.builder.create_block();
                match s.else_branch {
                    Some(else_branch) => {
                        let else_block = self.builder.create_block();
                        self.builder.ins().brif(cond, then_block, &[], else_block, &[]);
                        self.builder.switch_to_block(then_block);
                        self.builder.seal_block(then_block);
                        self.codegen_children_contribution(s.then_branch)?;
                        self.builder.ins().jump(merge_block, &[]);

                        self.builder.switch_to_block(else_block);
                        self.builder.seal_block(else_block);
                        self.codegen_children_contribution(else_branch)?;
                        self.builder.ins().jump(merge_block, &[]);
                    }
                    None => {
                        self.builder.ins().brif(cond, then_block, &[], merge_block, &[]);
                        self.builder.switch_to_block(then_block);
                        self.builder.seal_block(then_block);
                        self.codegen_children_contribution(s.then_branch)?;
                        self.builder.ins().jump(merge_block, &[]);
                    }
                }
                self.builder.switch_to_block(merge_block);
                self.builder.seal_block(merge_block);
            }
            Node::MetaCalculationStmt(s) => {
                self.lower_ordinary_stmt(s.stmt)?;
                for decl in s.exported_decls {
                    self.create_introduce_node(decl)?;
                }
            }
            _ => self.create_contribute_node(node),
        }
        Ok(())
    }

    fn create_introduce_node(&mut self, decl: NodeId) -> Result<(), ErrorReported> {
        let (name_symbol, def) = match self.ctx.ast.get(decl).clone() {
            Node::DeclStmt(s) => (s.name.value, s.def_id.expect("exported decls are always bound")),
            _ => return Ok(()),
        };
        let value = self.builder.use_var(self.locals[&def]);
        // A `meta-calculation` inside a `MetaDecl`'s own contribution always
        // exports to the unit being built, never into a function body the
        // emitter is still assembling — `meta calc` nested directly inside
        // an ordinary function's body is lowered by
        // `crate::codegen::function` instead, which never calls `introduce`
        // at all (see its `MetaCalculationStmt` arm).
        self.introduce_binding(name_symbol, value, IntroduceDepth::TopLevel);
        Ok(())
    }

    /// Re-exports every named parameter of the meta decl under its own
    /// name, so a `DeclRefExpr` contributed as-is from the template body
    /// (left unresolved while the body was still a template) finds a
    /// binding once the instantiation's `MetaUnit` is structured.
    fn introduce_own_parameters(&mut self, args_list: NodeId) -> Result<(), ErrorReported> {
        if let Node::ArgumentDeclList(list) = self.ctx.ast.get(args_list).clone() {
            for arg in list.args {
                if let Node::NamedArgumentDecl(a) = self.ctx.ast.get(arg).clone() {
                    if let Some(def) = a.def_id {
                        let value = self.builder.use_var(self.locals[&def]);
                        self.introduce_binding(a.name.value, value, IntroduceDepth::TopLevel);
                    }
                }
            }
        }
        Ok(())
    }

    fn introduce_binding(&mut self, name_symbol: crate::ident::Symbol, value: Value, depth: IntroduceDepth) {
        let name_handle = self.builder.ins().iconst(HANDLE, u32::from(name_symbol) as i64);
        let depth_val = self.builder.ins().iconst(INT, depth as i64);
        self.builder.ins().call(self.introduce_ref, &[self.ctx_handle, name_handle, value, depth_val]);
    }

    /// Lowers the ordinary statement a `MetaCalculation` wraps — the same
    /// subset `crate::codegen::function` handles, since it executes with
    /// normal value semantics at JIT-execution time; only its *purpose*
    /// (populating bindings later read by `introduce`) is meta-specific.
    fn lower_ordinary_stmt(&mut self, id: NodeId) -> Result<(), ErrorReported> {
        match self.ctx.ast.get(id).clone() {
            Node::CompoundStmt(s) => for stmt in s.stmts { self.lower_ordinary_stmt(stmt)?; },
            Node::UnscopedCompoundStmt(s) => for stmt in s.stmts { self.lower_ordinary_stmt(stmt)?; },
            Node::ExpressionStmt(s) => { self.lower_expr(s.expr)?; }
            Node::DeclStmt(s) => {
                let val = self.lower_expr(s.init)?;
                let def = s.def_id.expect("the reader assigns a DefId to every DeclStmt");
                let var = self.fresh_var();
                self.builder.def_var(var, val);
                self.locals.insert(def, var);
            }
            _ => {}
        }
        Ok(())
    }

    fn lower_expr(&mut self, id: NodeId) -> Result<Value, ErrorReported> {
        Ok(match self.ctx.ast.get(id).clone() {
            Node::IntegerLiteralExpr(e) => self.builder.ins().iconst(INT, e.value as i64),
            Node::BooleanLiteralExpr(e) => self.builder.ins().iconst(INT, e.value as i64),
            Node::DeclRefExpr(e) => {
                let target = e.resolved.expect("resolved by the reader");
                let def = match self.ctx.ast.get(target) {
                    Node::NamedArgumentDecl(a) => a.def_id.expect("meta arguments are bound"),
                    Node::DeclStmt(s) => s.def_id.expect("calculation locals are bound"),
                    _ => unreachable!("semantic check rejects other targets inside meta code"),
                };
                self.builder.use_var(self.locals[&def])
            }
            Node::BinaryOperatorExpr(e) => {
                if e.op.value == BinOp::Assign {
                    let val = self.lower_expr(e.rhs)?;
                    if let Node::DeclRefExpr(lhs) = self.ctx.ast.get(e.lhs).clone() {
                        let target = lhs.resolved.expect("resolved by the reader");
                        let def = match self.ctx.ast.get(target) {
                            Node::NamedArgumentDecl(a) => a.def_id.expect("meta arguments are bound"),
                            Node::DeclStmt(s) => s.def_id.expect("calculation locals are bound"),
                            _ => unreachable!(),
                        };
                        self.builder.def_var(self.locals[&def], val);
                    }
                    val
                } else {
                    let lhs = self.lower_expr(e.lhs)?;
                    let rhs = self.lower_expr(e.rhs)?;
                    lower_arith(self.builder, e.op.value, lhs, rhs)
                }
            }
            Node::ErroneousExpr(_) => self.builder.ins().iconst(INT, 0),
            _ => unreachable!("not a meta-calculation expression"),
        })
    }
}

fn lower_arith(builder: &mut FunctionBuilder, op: BinOp, lhs: Value, rhs: Value) -> Value {
    use cranelift_codegen::ir::condcodes::IntCC;
    if op.is_comparison() {
        let cc = match op {
            BinOp::Eq => IntCC::Equal,
            BinOp::Ne => IntCC::NotEqual,
            BinOp::Lt => IntCC::SignedLessThan,
            BinOp::Le => IntCC::SignedLessThanOrEqual,
            BinOp::Gt => IntCC::SignedGreaterThan,
            _ => unreachable!(),
        };
        let bit = builder.ins().icmp(cc, lhs, rhs);
        builder.ins().uextend(INT, bit)
    } else {
        match op {
            BinOp::Add => builder.ins().iadd(lhs, rhs),
            BinOp::Sub => builder.ins().isub(lhs, rhs),
            BinOp::Mul => builder.ins().imul(lhs, rhs),
            BinOp::Div => builder.ins().sdiv(lhs, rhs),
            BinOp::Rem => builder.ins().srem(lhs, rhs),
            BinOp::Assign => unreachable!(),
            _ => unreachable!(),
        }
    }
}
