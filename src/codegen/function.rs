//! Lowers `FunctionDecl`s to native Cranelift IR.
//!
//! Every value (booleans included) has the single runtime width, 32-bit
//! signed integer; comparisons produce an `icmp` result and are widened to
//! that width with `uextend`. `if` lowers to the canonical diamond:
//! condition block, then-block, optional else-block, and a merge block that
//! is *omitted* when both arms end in a terminator (both branches return).

use std::collections::HashMap;

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{types, InstBuilder, Value};
use cranelift_frontend::{FunctionBuilder, Variable};
use cranelift_module::Module;

use crate::ast::{self, Ast, BinOp, Node, NodeId};
use crate::codegen::{function_signature, ActiveSet, Backend};
use crate::context::CompilerContext;
use crate::error::ErrorReported;
use crate::resolve::DefId;

const INT: cranelift_codegen::ir::Type = types::I32;

/// Registers `func`'s signature with the module, without generating a body.
/// Idempotent: returns the cached id on repeat calls. Called ahead of body
/// generation for every reachable function so that forward and mutually
/// recursive calls always have a `FuncId` to import, independent of
/// generation order.
pub fn declare_function(
    ctx: &mut CompilerContext,
    backend: &mut Backend,
    func_to_id: &mut HashMap<NodeId, cranelift_module::FuncId>,
    func: NodeId,
) -> Result<cranelift_module::FuncId, ErrorReported> {
    if let Some(&id) = func_to_id.get(&func) {
        return Ok(id);
    }
    let decl = match ctx.ast.get(func) {
        Node::FunctionDecl(d) => d.clone(),
        _ => panic!("declare_function called on a non-FunctionDecl node"),
    };
    let arg_count = match ctx.ast.get(decl.args) {
        Node::ArgumentDeclList(l) => l.args.len(),
        _ => 0,
    };
    let name = ctx.interner.resolve(decl.name.value).to_owned();
    let sig = function_signature(backend.call_conv(), arg_count, decl.return_arg.is_some());
    let func_id = backend
        .module
        .declare_function(&name, cranelift_module::Linkage::Export, &sig)
        .map_err(|e| crate::error::bug!(ctx.diagnostics, decl.name.span, "failed to declare function `{}`: {}", name, e))?;
    func_to_id.insert(func, func_id);
    Ok(func_id)
}

/// Generates `func`'s body into `backend`'s module. `func` must already
/// have an entry in `func_to_id` (see [`declare_function`]); every function
/// it calls must too, since calls are resolved by lookup rather than
/// on-demand codegen. Guards against self-referential codegen with
/// `active`, though ordinary recursive *calls* are fine — they lower to an
/// ordinary `call` instruction, not nested codegen.
pub fn codegen_function(
    ctx: &mut CompilerContext,
    backend: &mut Backend,
    active: &mut ActiveSet,
    func_to_id: &HashMap<NodeId, cranelift_module::FuncId>,
    func: NodeId,
) -> Result<(), ErrorReported> {
    let guard = match active.enter(func) {
        Some(g) => g,
        None => {
            let span = decl_span(&ctx.ast, func);
            return Err(crate::error::bug!(ctx.diagnostics, span, "function codegen re-entered while already active"));
        }
    };

    let decl = match ctx.ast.get(func) {
        Node::FunctionDecl(d) => d.clone(),
        _ => panic!("codegen_function called on a non-FunctionDecl node"),
    };
    let func_id = func_to_id[&func];
    let sig = function_signature(backend.call_conv(), arg_count_of(&ctx.ast, decl.args), decl.return_arg.is_some());

    backend.ctx.func.signature = sig;
    backend.ctx.func.name = cranelift_codegen::ir::UserFuncName::user(0, func_id.as_u32());

    {
        let mut builder = FunctionBuilder::new(&mut backend.ctx.func, &mut backend.builder_context);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);

        let mut locals: HashMap<DefId, Variable> = HashMap::new();
        let mut next_var = 0u32;

        if let Node::ArgumentDeclList(list) = ctx.ast.get(decl.args).clone() {
            for (i, arg) in list.args.iter().enumerate() {
                if let Node::NamedArgumentDecl(a) = ctx.ast.get(*arg).clone() {
                    if let Some(def) = a.def_id {
                        let var = Variable::new(next_var as usize);
                        next_var += 1;
                        builder.declare_var(var, INT);
                        let param = builder.block_params(entry)[i];
                        builder.def_var(var, param);
                        locals.insert(def, var);
                    }
                }
            }
        }

        let mut lowerer = FunctionLowering {
            ctx,
            module: &mut backend.module,
            builder: &mut builder,
            func_to_id,
            locals,
            next_var,
            callee_refs: HashMap::new(),
        };
        lowerer.lower_stmt(decl.body)?;

        if !lowerer.builder.is_filled() {
            if decl.return_arg.is_some() {
                let zero = lowerer.builder.ins().iconst(INT, 0);
                lowerer.builder.ins().return_(&[zero]);
            } else {
                lowerer.builder.ins().return_(&[]);
            }
        }
        builder.finalize();
    }

    backend
        .module
        .define_function(func_id, &mut backend.ctx)
        .map_err(|e| crate::error::bug!(ctx.diagnostics, decl.name.span, "failed to define function `{}`: {}", ctx.interner.resolve(decl.name.value), e))?;
    backend.module.clear_context(&mut backend.ctx);

    drop(guard);
    Ok(())
}

fn arg_count_of(ast: &Ast, args_list: NodeId) -> usize {
    match ast.get(args_list) {
        Node::ArgumentDeclList(l) => l.args.len(),
        _ => 0,
    }
}

fn decl_span(ast: &Ast, id: NodeId) -> crate::pos::Span {
    match ast.get(id) {
        Node::FunctionDecl(d) => d.name.span,
        Node::MetaDecl(d) => d.name.span,
        Node::GlobalConstantDecl(d) => d.name.span,
        _ => crate::pos::Span::default(),
    }
}

struct FunctionLowering<'a, 'b> {
    ctx: &'a mut CompilerContext,
    module: &'a mut cranelift_jit::JITModule,
    builder: &'a mut FunctionBuilder<'b>,
    func_to_id: &'a HashMap<NodeId, cranelift_module::FuncId>,
    locals: HashMap<DefId, Variable>,
    next_var: u32,
    callee_refs: HashMap<NodeId, cranelift_codegen::ir::FuncRef>,
}

impl<'a, 'b> FunctionLowering<'a, 'b> {
    fn fresh_var(&mut self) -> Variable {
        let var = Variable::new(self.next_var as usize);
        self.next_var += 1;
        self.builder.declare_var(var, INT);
        var
    }

    fn var_for(&self, target: NodeId) -> Variable {
        let def = def_id_of(self.ctx, target);
        self.locals[&def]
    }

    fn lower_stmt(&mut self, id: NodeId) -> Result<(), ErrorReported> {
        match self.ctx.ast.get(id).clone() {
            Node::CompoundStmt(s) => {
                for stmt in s.stmts {
                    self.lower_stmt(stmt)?;
                }
            }
            Node::UnscopedCompoundStmt(s) => {
                for stmt in s.stmts {
                    self.lower_stmt(stmt)?;
                }
            }
            Node::ReturnStmt(s) => match s.value {
                Some(v) => {
                    let val = self.lower_expr(v)?;
                    self.builder.ins().return_(&[val]);
                }
                None => {
                    self.builder.ins().return_(&[]);
                }
            },
            Node::ExpressionStmt(s) => {
                self.lower_expr(s.expr)?;
            }
            Node::DeclStmt(s) => {
                let val = self.lower_expr(s.init)?;
                let def = s.def_id.expect("the reader assigns a DefId to every DeclStmt it introduces");
                let var = self.fresh_var();
                self.builder.def_var(var, val);
                self.locals.insert(def, var);
            }
            Node::IfStmt(s) => {
                let cond = self.lower_expr(s.cond)?;
                let then_block = self.builder.create_block();

                if let Some(else_branch) = s.else_branch {
                    let else_block = self.builder.create_block();
                    self.builder.ins().brif(cond, then_block, &[], else_block, &[]);

                    self.builder.switch_to_block(then_block);
                    self.builder.seal_block(then_block);
                    self.lower_stmt(s.then_branch)?;
                    let then_terminates = self.builder.is_filled();
                    let then_trailing = self.builder.current_block();

                    self.builder.switch_to_block(else_block);
                    self.builder.seal_block(else_block);
                    self.lower_stmt(else_branch)?;
                    let else_terminates = self.builder.is_filled();
                    let else_trailing = self.builder.current_block();

                    if !(then_terminates && else_terminates) {
                        let merge_block = self.builder.create_block();
                        if !then_terminates {
                            self.builder.switch_to_block(then_trailing.expect("a block was active"));
                            self.builder.ins().jump(merge_block, &[]);
                        }
                        if !else_terminates {
                            self.builder.switch_to_block(else_trailing.expect("a block was active"));
                            self.builder.ins().jump(merge_block, &[]);
                        }
                        self.builder.switch_to_block(merge_block);
                        self.builder.seal_block(merge_block);
                    }
                } else {
                    let merge_block = self.builder.create_block();
                    self.builder.ins().brif(cond, then_block, &[], merge_block, &[]);

                    self.builder.switch_to_block(then_block);
                    self.builder.seal_block(then_block);
                    self.lower_stmt(s.then_branch)?;
                    if !self.builder.is_filled() {
                        self.builder.ins().jump(merge_block, &[]);
                    }

                    self.builder.switch_to_block(merge_block);
                    self.builder.seal_block(merge_block);
                }
            }
            Node::MetaCalculationStmt(s) => {
                // `meta calc` written directly inside an ordinary function
                // body (as opposed to one contributed from a `MetaDecl`)
                // never goes through the JIT emitter: the wrapped statement
                // is already a real, resolved `DeclStmt`/`CompoundStmt`, so
                // lowering it is exactly lowering any other local statement.
                self.lower_stmt(s.stmt)?;
            }
            Node::MetaIfStmt(_) | Node::MetaContribution(_) => {
                unreachable!("meta-if and meta-contribution can only appear inside a MetaDecl body, never an ordinary function")
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
                if let Node::GlobalConstantDecl(d) = self.ctx.ast.get(target).clone() {
                    self.lower_expr(d.value)?
                } else {
                    let var = self.var_for(target);
                    self.builder.use_var(var)
                }
            }
            Node::BinaryOperatorExpr(e) => self.lower_binop(e)?,
            Node::CallExpr(e) => {
                let target = e.resolved.expect("resolved by the reader");
                let mut args = Vec::with_capacity(e.args.len());
                for arg in &e.args {
                    args.push(self.lower_expr(*arg)?);
                }
                let func_ref = self.callee_ref(target);
                let call = self.builder.ins().call(func_ref, &args);
                let results = self.builder.inst_results(call);
                results.first().copied().unwrap_or_else(|| self.builder.ins().iconst(INT, 0))
            }
            Node::MetaInstantiationExpr(e) => {
                let target = e.resolved.expect("instantiated before function codegen runs");
                match self.ctx.ast.get(target).clone() {
                    Node::GlobalConstantDecl(d) => self.lower_expr(d.value)?,
                    Node::FunctionDecl(_) => {
                        let mut args = Vec::with_capacity(e.call_args.len());
                        for arg in &e.call_args {
                            args.push(self.lower_expr(*arg)?);
                        }
                        let func_ref = self.callee_ref(target);
                        let call = self.builder.ins().call(func_ref, &args);
                        let results = self.builder.inst_results(call);
                        results.first().copied().unwrap_or_else(|| self.builder.ins().iconst(INT, 0))
                    }
                    _ => unreachable!("semantic check rejects an instantiation exporting neither a constant nor a function"),
                }
            }
            Node::ErroneousExpr(_) => self.builder.ins().iconst(INT, 0),
            _ => unreachable!("not an expression node"),
        })
    }

    fn callee_ref(&mut self, target: NodeId) -> cranelift_codegen::ir::FuncRef {
        if let Some(&r) = self.callee_refs.get(&target) {
            return r;
        }
        let func_id = self.func_to_id[&target];
        let r = self.module.declare_func_in_func(func_id, self.builder.func);
        self.callee_refs.insert(target, r);
        r
    }

    fn lower_binop(&mut self, e: ast::BinaryOperatorExpr) -> Result<Value, ErrorReported> {
        if e.op.value == BinOp::Assign {
            let val = self.lower_expr(e.rhs)?;
            if let Node::DeclRefExpr(lhs) = self.ctx.ast.get(e.lhs).clone() {
                let target = lhs.resolved.expect("resolved by the reader");
                let var = self.var_for(target);
                self.builder.def_var(var, val);
            }
            return Ok(val);
        }

        let lhs = self.lower_expr(e.lhs)?;
        let rhs = self.lower_expr(e.rhs)?;
        Ok(if e.op.value.is_comparison() {
            let cc = match e.op.value {
                BinOp::Eq => IntCC::Equal,
                BinOp::Ne => IntCC::NotEqual,
                BinOp::Lt => IntCC::SignedLessThan,
                BinOp::Le => IntCC::SignedLessThanOrEqual,
                BinOp::Gt => IntCC::SignedGreaterThan,
                _ => unreachable!(),
            };
            let bit = self.builder.ins().icmp(cc, lhs, rhs);
            self.builder.ins().uextend(INT, bit)
        } else {
            match e.op.value {
                BinOp::Add => self.builder.ins().iadd(lhs, rhs),
                BinOp::Sub => self.builder.ins().isub(lhs, rhs),
                BinOp::Mul => self.builder.ins().imul(lhs, rhs),
                BinOp::Div => self.builder.ins().sdiv(lhs, rhs),
                BinOp::Rem => self.builder.ins().srem(lhs, rhs),
                BinOp::Assign => unreachable!(),
                _ => unreachable!(),
            }
        })
    }
}

/// `target` is the declaring node a `DeclRefExpr`/assignment LHS resolved
/// to: a `NamedArgumentDecl` or a `DeclStmt`, each carrying its own
/// `DefId` once the reader has run.
fn def_id_of(ctx: &CompilerContext, target: NodeId) -> DefId {
    match ctx.ast.get(target) {
        Node::NamedArgumentDecl(a) => a.def_id.expect("reader assigns a DefId to every named argument"),
        Node::DeclStmt(s) => s.def_id.expect("reader assigns a DefId to every DeclStmt"),
        _ => panic!("DeclRefExpr resolved to a node kind with no local DefId"),
    }
}
