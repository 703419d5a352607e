//! Post-structure semantic check: name reservation was already enforced by
//! the reader (phase 1 introduction and phase-2 `DeclStmt` binding); this
//! pass validates everything that needs a *resolved* `DeclRef` to check —
//! arity, call-vs-expression context, and the integral-only restriction on
//! meta arguments.

use crate::ast::{Ast, Node, NodeId};
use crate::context::CompilerContext;
use crate::error::{error, ErrorFlag, ErrorReported, GatherErrorIteratorExt};

/// Runs semantic check over every top-level declaration directly owned by
/// `unit` (a `CompilationUnit` or `MetaUnit`). Does not recurse into
/// un-instantiated `MetaDecl` bodies, since those are layout templates with
/// no resolved `DeclRef`s to check yet.
pub fn check_unit(ctx: &mut CompilerContext, unit: NodeId) -> Result<(), ErrorReported> {
    let decls = match ctx.ast.get(unit) {
        Node::CompilationUnit(u) => u.decls.clone(),
        Node::MetaUnit(u) => u.decls.clone(),
        _ => return Ok(()),
    };
    decls.iter().map(|&d| check_decl(ctx, d)).collect_with_recovery()
}

fn check_decl(ctx: &mut CompilerContext, id: NodeId) -> Result<(), ErrorReported> {
    match ctx.ast.get(id).clone() {
        Node::FunctionDecl(d) => check_stmt(ctx, d.body),
        Node::MetaDecl(_) => Ok(()), // body is a template; checked per-instantiation
        Node::GlobalConstantDecl(d) => check_expr(ctx, d.value, true),
        _ => Ok(()),
    }
}

fn check_stmt(ctx: &mut CompilerContext, id: NodeId) -> Result<(), ErrorReported> {
    let mut flag = ErrorFlag::new();
    match ctx.ast.get(id).clone() {
        Node::CompoundStmt(s) => for stmt in s.stmts { if let Err(e) = check_stmt(ctx, stmt) { flag.set(e); } },
        Node::UnscopedCompoundStmt(s) => for stmt in s.stmts { if let Err(e) = check_stmt(ctx, stmt) { flag.set(e); } },
        Node::ReturnStmt(s) => if let Some(v) = s.value { if let Err(e) = check_expr(ctx, v, true) { flag.set(e); } },
        // A call used as a bare statement doesn't need a value back, so a
        // void function is fine here — the only place that isn't true.
        Node::ExpressionStmt(s) => if let Err(e) = check_expr(ctx, s.expr, false) { flag.set(e); },
        Node::DeclStmt(s) => if let Err(e) = check_expr(ctx, s.init, true) { flag.set(e); },
        Node::IfStmt(s) => {
            if let Err(e) = check_expr(ctx, s.cond, true) { flag.set(e); }
            if let Err(e) = check_stmt(ctx, s.then_branch) { flag.set(e); }
            if let Some(e_branch) = s.else_branch { if let Err(e) = check_stmt(ctx, e_branch) { flag.set(e); } }
        }
        Node::MetaIfStmt(s) => {
            if let Err(e) = check_expr(ctx, s.cond, true) { flag.set(e); }
        }
        Node::MetaCalculationStmt(s) => if let Err(e) = check_stmt(ctx, s.stmt) { flag.set(e); },
        _ => {}
    }
    flag.into_result(())
}

/// `requires_value` is false only for a call used as a bare expression
/// statement; every other position (return value, initializer, operand,
/// argument) needs a real result, so a void function there is an error.
fn check_expr(ctx: &mut CompilerContext, id: NodeId, requires_value: bool) -> Result<(), ErrorReported> {
    let mut flag = ErrorFlag::new();
    match ctx.ast.get(id).clone() {
        Node::BinaryOperatorExpr(e) => {
            if let Err(err) = check_expr(ctx, e.lhs, true) { flag.set(err); }
            if let Err(err) = check_expr(ctx, e.rhs, true) { flag.set(err); }
        }
        Node::CallExpr(e) => {
            match e.resolved {
                Some(target) => {
                    if let Err(err) = check_call_target(ctx, &e, target, requires_value) { flag.set(err); }
                }
                None => {} // already diagnosed unknown-name during resolution
            }
            for arg in &e.args {
                if let Err(err) = check_expr(ctx, *arg, true) { flag.set(err); }
            }
        }
        Node::MetaInstantiationExpr(e) => {
            match e.resolved {
                Some(target) => {
                    if let Err(err) = check_instantiation(ctx, &e, target) { flag.set(err); }
                }
                None => {}
            }
            for arg in &e.args {
                if !matches!(ctx.ast.get(*arg), Node::IntegerLiteralExpr(_)) {
                    let span = expr_span(&ctx.ast, *arg);
                    flag.set(error!(ctx.diagnostics, MetaArgNotLiteral { span }));
                }
            }
            for arg in &e.call_args {
                if let Err(err) = check_expr(ctx, *arg, true) { flag.set(err); }
            }
        }
        _ => {}
    }
    flag.into_result(())
}

fn check_call_target(
    ctx: &mut CompilerContext,
    call: &crate::ast::CallExpr,
    target: NodeId,
    requires_value: bool,
) -> Result<(), ErrorReported> {
    match ctx.ast.get(target).clone() {
        Node::FunctionDecl(f) => {
            let declared = arg_count(&ctx.ast, f.args);
            if declared != call.args.len() {
                return Err(error!(ctx.diagnostics, ArgCountMismatch {
                    span: call.span,
                    expected: declared,
                    found: call.args.len(),
                    declared_at: Some(f.name.span),
                }));
            }
            if requires_value && f.return_arg.is_none() {
                return Err(error!(ctx.diagnostics, CallExpectingResultOnVoid {
                    span: call.span,
                    name: ctx.interner.resolve(call.callee.value).to_owned(),
                }));
            }
            Ok(())
        }
        _ => Err(error!(ctx.diagnostics, CallOfNonFunction {
            span: call.span,
            name: ctx.interner.resolve(call.callee.value).to_owned(),
        })),
    }
}

fn check_instantiation(ctx: &mut CompilerContext, inst: &crate::ast::MetaInstantiationExpr, target: NodeId) -> Result<(), ErrorReported> {
    match ctx.ast.get(target).clone() {
        Node::MetaDecl(m) => {
            let declared = arg_count(&ctx.ast, m.args);
            if declared != inst.args.len() {
                return Err(error!(ctx.diagnostics, ArgCountMismatch {
                    span: inst.span,
                    expected: declared,
                    found: inst.args.len(),
                    declared_at: Some(m.name.span),
                }));
            }
            Ok(())
        }
        _ => Err(error!(ctx.diagnostics, InstantiationOfNonMeta {
            span: inst.span,
            name: ctx.interner.resolve(inst.callee.value).to_owned(),
        })),
    }
}

fn arg_count(ast: &Ast, args_list: NodeId) -> usize {
    match ast.get(args_list) {
        Node::ArgumentDeclList(l) => l.args.len(),
        _ => 0,
    }
}

fn expr_span(ast: &Ast, id: NodeId) -> crate::pos::Span {
    match ast.get(id) {
        Node::IntegerLiteralExpr(n) => n.span,
        Node::BooleanLiteralExpr(n) => n.span,
        Node::BinaryOperatorExpr(n) => n.span,
        Node::CallExpr(n) => n.span,
        Node::MetaInstantiationExpr(n) => n.span,
        Node::ErroneousExpr(n) => n.span,
        Node::DeclRefExpr(n) => n.name.span,
        _ => crate::pos::Span::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::pos::Span;

    #[test]
    fn arg_count_mismatch_is_reported() {
        let mut ctx = CompilerContext::new();
        let f_sym = ctx.interner.intern("f");

        let body = ctx.ast.alloc(Node::UnscopedCompoundStmt(UnscopedCompoundStmt { span: Span::default(), stmts: vec![] }));
        let args = ctx.ast.alloc(Node::ArgumentDeclList(ArgumentDeclList { span: Span::default(), args: vec![] }));
        let f = ctx.ast.alloc(Node::FunctionDecl(FunctionDecl {
            name: crate::ident::identifier(Span::default(), f_sym), def_id: None, args, return_arg: None, body, containing_unit: None,
        }));

        let call = ctx.ast.alloc(Node::CallExpr(CallExpr {
            span: Span::default(),
            callee: crate::ident::identifier(Span::default(), f_sym),
            resolved: Some(f),
            args: vec![ctx.ast.alloc(Node::IntegerLiteralExpr(IntegerLiteralExpr { span: Span::default(), value: 1 }))],
        }));

        let result = check_expr(&mut ctx, call, true);
        assert!(result.is_err());
        assert!(ctx.has_errors());
    }

    fn void_call(ctx: &mut CompilerContext) -> NodeId {
        let f_sym = ctx.interner.intern("f");
        let body = ctx.ast.alloc(Node::UnscopedCompoundStmt(UnscopedCompoundStmt { span: Span::default(), stmts: vec![] }));
        let args = ctx.ast.alloc(Node::ArgumentDeclList(ArgumentDeclList { span: Span::default(), args: vec![] }));
        let f = ctx.ast.alloc(Node::FunctionDecl(FunctionDecl {
            name: crate::ident::identifier(Span::default(), f_sym), def_id: None, args, return_arg: None, body, containing_unit: None,
        }));
        ctx.ast.alloc(Node::CallExpr(CallExpr {
            span: Span::default(),
            callee: crate::ident::identifier(Span::default(), f_sym),
            resolved: Some(f),
            args: vec![],
        }))
    }

    #[test]
    fn void_call_used_for_its_value_is_rejected() {
        let mut ctx = CompilerContext::new();
        let call = void_call(&mut ctx);
        let result = check_expr(&mut ctx, call, true);
        assert!(result.is_err());
        assert!(ctx.has_errors());
    }

    #[test]
    fn void_call_as_a_bare_statement_is_fine() {
        let mut ctx = CompilerContext::new();
        let call = void_call(&mut ctx);
        let result = check_expr(&mut ctx, call, false);
        assert!(result.is_ok());
        assert!(!ctx.has_errors());
    }

    #[test]
    fn non_literal_meta_argument_is_rejected() {
        let mut ctx = CompilerContext::new();
        let m_sym = ctx.interner.intern("m");
        let body = ctx.ast.alloc(Node::MetaContribution(MetaContribution { span: Span::default(), children: vec![] }));
        let args = ctx.ast.alloc(Node::ArgumentDeclList(ArgumentDeclList { span: Span::default(), args: vec![] }));
        let m = ctx.ast.alloc(Node::MetaDecl(MetaDecl {
            name: crate::ident::identifier(Span::default(), m_sym), def_id: None, args, body, containing_unit: None,
        }));

        let not_literal = ctx.ast.alloc(Node::DeclRefExpr(DeclRefExpr { name: crate::ident::identifier(Span::default(), m_sym), resolved: None }));
        let inst = ctx.ast.alloc(Node::MetaInstantiationExpr(MetaInstantiationExpr {
            span: Span::default(),
            callee: crate::ident::identifier(Span::default(), m_sym),
            resolved: Some(m),
            args: vec![not_literal],
            call_args: vec![],
        }));

        let result = check_expr(&mut ctx, inst, true);
        assert!(result.is_err());
    }
}
