//! The layout reader: structures a flat [`Layout`] into a typed unit while
//! running two-phase name resolution.
//!
//! Contributed and parsed nodes alike arrive as complete, pre-built
//! subtrees (the "template" nodes the data model describes): the reader's
//! job is not to reconstruct child pointers — those are already part of
//! each [`Node`] — but to (a) discover which top-level entries of the flat
//! stream belong to the new unit, (b) introduce every one of them into the
//! unit's scope before descending into any body (phase 1), and (c) descend
//! and resolve every `DeclRef` under two-phase/shadow/mode rules (phase 2).

use crate::ast::{Ast, MetaUnit, Node, NodeId};
use crate::context::CompilerContext;
use crate::error::{error, ErrorReported};
use crate::ident::Symbol;
use crate::layout::Layout;
use crate::resolve::{ResolutionMode, ScopeId};

/// An LL(0) cursor over a [`Layout`]'s tokens.
struct Cursor<'a> {
    tokens: &'a [Option<NodeId>],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(layout: &'a Layout) -> Self { Cursor { tokens: layout.tokens(), pos: 0 } }

    fn peek(&self) -> Option<NodeId> {
        self.tokens.get(self.pos).copied().flatten()
    }

    fn should_reduce(&self) -> bool {
        matches!(self.tokens.get(self.pos), Some(None)) || self.pos >= self.tokens.len()
    }

    fn shift(&mut self) -> Option<NodeId> {
        let tok = self.tokens.get(self.pos).copied().flatten();
        self.pos += 1;
        tok
    }

    fn reduce(&mut self) {
        debug_assert!(self.should_reduce());
        self.pos += 1;
    }

    /// Consumes every top-level node up to (and including) the next reduce
    /// marker, the pattern every variadic production in the original
    /// grammar follows.
    fn consume_until_reduce(&mut self) -> Vec<NodeId> {
        let mut out = Vec::new();
        while !self.should_reduce() {
            if let Some(id) = self.shift() {
                out.push(id);
            }
        }
        if self.pos < self.tokens.len() {
            self.reduce();
        }
        out
    }
}

/// Structures a flat layout produced by parsing the primary source file
/// into a `CompilationUnit`, running full two-phase resolution against a
/// fresh persistent scope parented on `ctx.root_scope`.
pub fn structure_compilation_unit(ctx: &mut CompilerContext, layout: &Layout) -> Result<NodeId, ErrorReported> {
    let mut cursor = Cursor::new(layout);
    let decls = cursor.consume_until_reduce();
    let span = decls.iter().fold(crate::pos::Span::default(), |acc, &id| {
        acc.merge(span_of(&ctx.ast, id))
    });

    let unit_scope = ctx.scopes.new_persistent(Some(ctx.root_scope));
    let unit = ctx.ast.alloc(Node::CompilationUnit(crate::ast::CompilationUnit { span, decls: decls.clone() }));
    ctx.unit_scopes.insert(unit, unit_scope);

    introduce_top_level(ctx, &decls, unit, unit_scope, None)?;
    let mut flag = crate::error::ErrorFlag::new();
    for &decl in &decls {
        if let Err(e) = resolve_node(ctx, decl, unit_scope, ResolutionMode::Outside) {
            flag.set(e);
        }
    }
    flag.into_result(unit)
}

/// Structures the layout a meta emitter produced during one instantiation
/// into a `MetaUnit`, per the executor's step 8. `meta_decl` is the
/// `MetaDecl` node being instantiated (used to recognize the legal shadow
/// of its own binding, per the shadow rule) and `meta_name` is its name,
/// used to find the exported node. `parent_scope` is the scope the
/// `MetaDecl` itself is visible from — the caller resolves it from
/// `meta_decl`'s `containing_unit` — so this unit's own scope nests under
/// the actual declaring scope rather than always the compilation root.
pub fn structure_meta_unit(
    ctx: &mut CompilerContext,
    layout: &Layout,
    instantiation: NodeId,
    meta_decl: NodeId,
    meta_name: Symbol,
    parent_scope: ScopeId,
) -> Result<NodeId, ErrorReported> {
    let mut cursor = Cursor::new(layout);
    let decls = cursor.consume_until_reduce();
    let span = decls.iter().fold(crate::pos::Span::default(), |acc, &id| {
        acc.merge(span_of(&ctx.ast, id))
    });

    let unit_scope = ctx.scopes.new_persistent(Some(parent_scope));
    let unit = ctx.ast.alloc(Node::MetaUnit(MetaUnit {
        span,
        instantiation,
        decls: decls.clone(),
        exported_node: None,
    }));
    ctx.unit_scopes.insert(unit, unit_scope);

    introduce_top_level(ctx, &decls, unit, unit_scope, Some(meta_decl))?;

    let exported = decls.iter().copied().find(|&id| {
        ctx.ast.get(id).decl_name().map(|n| n.value) == Some(meta_name)
    });
    if let Node::MetaUnit(u) = ctx.ast.get_mut(unit) {
        u.exported_node = exported;
    }

    let mut flag = crate::error::ErrorFlag::new();
    for &decl in &decls {
        if let Err(e) = resolve_node(ctx, decl, unit_scope, ResolutionMode::Outside) {
            flag.set(e);
        }
    }
    if exported.is_none() {
        let inst_span = span_of(&ctx.ast, instantiation);
        let e = error!(ctx.diagnostics, NoExportedDecl {
            span: inst_span,
            name: ctx.interner.resolve(meta_name).to_owned(),
        });
        flag.set(e);
    }
    flag.into_result(unit)
}

/// Phase 1: scan one level of a unit's children and introduce every
/// top-level `NamedDeclContext` into `scope`, setting `containing_unit`.
///
/// Implements the shadow rule: a name is looked up along the *whole*
/// ancestor scope chain (not just `scope` itself), since a `MetaUnit`'s
/// scope nests directly under the scope its `MetaDecl` was declared in —
/// that's the only way this collision check can ever see the original
/// `MetaDecl` binding at all. A collision is accepted only when
/// `shadow_target` is `Some(meta_decl)` (i.e. we're introducing the decls
/// of a meta unit) and the binding found is exactly that `MetaDecl`'s own
/// — the legal case of a meta decl's export shadowing its own name. Every
/// other collision, at any distance up the chain, is a `RedeclaredName`.
fn introduce_top_level(
    ctx: &mut CompilerContext,
    decls: &[NodeId],
    containing_unit: NodeId,
    scope: ScopeId,
    shadow_target: Option<NodeId>,
) -> Result<(), ErrorReported> {
    let mut flag = crate::error::ErrorFlag::new();
    for &id in decls {
        set_containing_unit(&mut ctx.ast, id, containing_unit);

        let name = match ctx.ast.get(id).decl_name() {
            Some(n) => n,
            None => continue,
        };
        if ctx.interner.resolve(name.value) == "int" {
            flag.set(error!(ctx.diagnostics, ReservedName { span: name.span }));
            continue;
        }
        if let Some(existing) = ctx.scopes.lookup(scope, name.value) {
            let is_legal_shadow = shadow_target
                .map_or(false, |meta_decl| ctx.resolutions.declaring_node(existing) == meta_decl);
            if !is_legal_shadow {
                flag.set(error!(ctx.diagnostics, RedeclaredName {
                    span: name.span,
                    name: ctx.interner.resolve(name.value).to_owned(),
                    previous: decl_span(&ctx.ast, &ctx.resolutions, existing),
                }));
                continue;
            }
        }
        let def = ctx.resolutions.fresh_def(id);
        ctx.scopes.bind(scope, name.value, def);
    }
    flag.into_result(())
}

fn decl_span(ast: &Ast, resolutions: &crate::resolve::Resolutions, def: crate::resolve::DefId) -> crate::pos::Span {
    span_of(ast, resolutions.declaring_node(def))
}

fn set_containing_unit(ast: &mut Ast, id: NodeId, unit: NodeId) {
    match ast.get_mut(id) {
        Node::FunctionDecl(d) => d.containing_unit = Some(unit),
        Node::MetaDecl(d) => d.containing_unit = Some(unit),
        Node::GlobalConstantDecl(d) => d.containing_unit = Some(unit),
        _ => {}
    }
}

/// Phase 2: descend into a single top-level declaration (or, recursively,
/// any node reachable from it), resolving `DeclRef`s under the current
/// mode, opening temporary scopes for bodies/argument lists, and disabling
/// resolution inside an un-instantiated `MetaDecl` body.
fn resolve_node(ctx: &mut CompilerContext, id: NodeId, scope: ScopeId, mode: ResolutionMode) -> Result<(), ErrorReported> {
    let mut flag = crate::error::ErrorFlag::new();
    match ctx.ast.get(id).clone() {
        Node::FunctionDecl(d) => {
            let arg_scope = ctx.scopes.new_temporary(Some(scope));
            if let Err(e) = introduce_args(ctx, d.args, arg_scope) { flag.set(e); }
            if let Err(e) = resolve_node(ctx, d.body, arg_scope, mode) { flag.set(e); }
        }
        Node::MetaDecl(d) => {
            let arg_scope = ctx.scopes.new_temporary(Some(scope));
            if let Err(e) = introduce_args(ctx, d.args, arg_scope) { flag.set(e); }
            // Bodies are layout templates until instantiated: DeclRef
            // resolution is suppressed outside meta-calculation.
            if let Err(e) = resolve_node(ctx, d.body, arg_scope, ResolutionMode::InsideMetaDecl) { flag.set(e); }
        }
        Node::GlobalConstantDecl(d) => {
            if let Err(e) = resolve_node(ctx, d.value, scope, mode) { flag.set(e); }
        }
        Node::CompoundStmt(s) => {
            let inner = ctx.scopes.new_temporary(Some(scope));
            for stmt in s.stmts {
                if let Err(e) = resolve_node(ctx, stmt, inner, mode) { flag.set(e); }
            }
        }
        Node::UnscopedCompoundStmt(s) => {
            for stmt in s.stmts {
                if let Err(e) = resolve_node(ctx, stmt, scope, mode) { flag.set(e); }
            }
        }
        Node::ReturnStmt(s) => {
            if let Some(v) = s.value {
                if let Err(e) = resolve_node(ctx, v, scope, mode) { flag.set(e); }
            }
        }
        Node::ExpressionStmt(s) => {
            if let Err(e) = resolve_node(ctx, s.expr, scope, mode) { flag.set(e); }
        }
        Node::DeclStmt(s) => {
            if let Err(e) = resolve_node(ctx, s.init, scope, mode) { flag.set(e); }
            if ctx.interner.resolve(s.name.value) == "int" {
                flag.set(error!(ctx.diagnostics, ReservedName { span: s.name.span }));
            } else if let Some(existing) = ctx.scopes.lookup_local(scope, s.name.value) {
                flag.set(error!(ctx.diagnostics, RedeclaredName {
                    span: s.name.span,
                    name: ctx.interner.resolve(s.name.value).to_owned(),
                    previous: decl_span(&ctx.ast, &ctx.resolutions, existing),
                }));
            } else {
                let def = ctx.resolutions.fresh_def(id);
                ctx.scopes.bind(scope, s.name.value, def);
            }
        }
        Node::IfStmt(s) => {
            if let Err(e) = resolve_node(ctx, s.cond, scope, mode) { flag.set(e); }
            if let Err(e) = resolve_node(ctx, s.then_branch, scope, mode) { flag.set(e); }
            if let Some(e_branch) = s.else_branch {
                if let Err(e) = resolve_node(ctx, e_branch, scope, mode) { flag.set(e); }
            }
        }
        Node::MetaIfStmt(s) => {
            // condition lowers as ordinary expression code: entering
            // computation mode even when the surrounding body is a
            // template.
            if let Err(e) = resolve_node(ctx, s.cond, scope, ResolutionMode::InsideComputation) { flag.set(e); }
            if let Err(e) = resolve_node(ctx, s.then_branch, scope, mode) { flag.set(e); }
            if let Some(e_branch) = s.else_branch {
                if let Err(e) = resolve_node(ctx, e_branch, scope, mode) { flag.set(e); }
            }
        }
        Node::MetaCalculationStmt(s) => {
            let calc_scope = ctx.scopes.new_in_place(Some(scope));
            if let Err(e) = resolve_node(ctx, s.stmt, calc_scope, ResolutionMode::InsideComputation) { flag.set(e); }
            let collected: Vec<NodeId> = ctx.scopes.collected(calc_scope).iter()
                .map(|&(_, def)| ctx.resolutions.declaring_node(def))
                .collect();
            if let Node::MetaCalculationStmt(s) = ctx.ast.get_mut(id) {
                s.exported_decls = collected;
            }
        }
        Node::MetaContribution(c) => {
            for child in c.children {
                if let Err(e) = resolve_node(ctx, child, scope, mode) { flag.set(e); }
            }
        }
        Node::DeclRefExpr(e) => {
            if mode.resolves_refs() {
                match ctx.scopes.lookup(scope, e.name.value) {
                    Some(def) => {
                        let resolved = ctx.resolutions.declaring_node(def);
                        if let Node::DeclRefExpr(e) = ctx.ast.get_mut(id) {
                            e.resolved = Some(resolved);
                        }
                    }
                    None => {
                        let suggestion = ctx.scopes.similar(scope, ctx.interner.resolve(e.name.value), &ctx.interner);
                        flag.set(error!(ctx.diagnostics, UnknownName {
                            span: e.name.span,
                            name: ctx.interner.resolve(e.name.value).to_owned(),
                            suggestion,
                        }));
                    }
                }
            }
        }
        Node::BinaryOperatorExpr(e) => {
            if let Err(err) = resolve_node(ctx, e.lhs, scope, mode) { flag.set(err); }
            if let Err(err) = resolve_node(ctx, e.rhs, scope, mode) { flag.set(err); }
        }
        Node::CallExpr(e) => {
            if mode.resolves_refs() {
                match ctx.scopes.lookup(scope, e.callee.value) {
                    Some(def) => {
                        let resolved = ctx.resolutions.declaring_node(def);
                        if let Node::CallExpr(e) = ctx.ast.get_mut(id) {
                            e.resolved = Some(resolved);
                        }
                    }
                    None => {
                        let suggestion = ctx.scopes.similar(scope, ctx.interner.resolve(e.callee.value), &ctx.interner);
                        flag.set(error!(ctx.diagnostics, UnknownName {
                            span: e.callee.span,
                            name: ctx.interner.resolve(e.callee.value).to_owned(),
                            suggestion,
                        }));
                    }
                }
            }
            for arg in e.args {
                if let Err(err) = resolve_node(ctx, arg, scope, mode) { flag.set(err); }
            }
        }
        Node::MetaInstantiationExpr(e) => {
            if mode.resolves_refs() {
                match ctx.scopes.lookup(scope, e.callee.value) {
                    Some(def) => {
                        let resolved = ctx.resolutions.declaring_node(def);
                        if let Node::MetaInstantiationExpr(e) = ctx.ast.get_mut(id) {
                            e.resolved = Some(resolved);
                        }
                    }
                    None => {
                        let suggestion = ctx.scopes.similar(scope, ctx.interner.resolve(e.callee.value), &ctx.interner);
                        flag.set(error!(ctx.diagnostics, UnknownName {
                            span: e.callee.span,
                            name: ctx.interner.resolve(e.callee.value).to_owned(),
                            suggestion,
                        }));
                    }
                }
            }
            for arg in e.args {
                if let Err(err) = resolve_node(ctx, arg, scope, mode) { flag.set(err); }
            }
            for arg in e.call_args {
                if let Err(err) = resolve_node(ctx, arg, scope, mode) { flag.set(err); }
            }
        }
        Node::IntegerLiteralExpr(_) | Node::BooleanLiteralExpr(_) | Node::ErroneousExpr(_) => {}
        Node::CompilationUnit(_) | Node::MetaUnit(_) | Node::ArgumentDeclList(_)
        | Node::AnonymousArgumentDecl(_) | Node::NamedArgumentDecl(_) => {}
    }
    flag.into_result(())
}

fn introduce_args(ctx: &mut CompilerContext, args_list: NodeId, scope: ScopeId) -> Result<(), ErrorReported> {
    let args = match ctx.ast.get(args_list) {
        Node::ArgumentDeclList(l) => l.args.clone(),
        _ => return Ok(()),
    };
    let mut flag = crate::error::ErrorFlag::new();
    for arg in args {
        if let Node::NamedArgumentDecl(a) = ctx.ast.get(arg).clone() {
            if ctx.interner.resolve(a.name.value) == "int" {
                flag.set(error!(ctx.diagnostics, ReservedName { span: a.name.span }));
                continue;
            }
            let def = ctx.resolutions.fresh_def(arg);
            ctx.scopes.bind(scope, a.name.value, def);
        }
    }
    flag.into_result(())
}

fn span_of(ast: &Ast, id: NodeId) -> crate::pos::Span {
    use Node::*;
    match ast.get(id) {
        CompilationUnit(n) => n.span,
        MetaUnit(n) => n.span,
        FunctionDecl(n) => n.name.span,
        MetaDecl(n) => n.name.span,
        GlobalConstantDecl(n) => n.name.span,
        ArgumentDeclList(n) => n.span,
        AnonymousArgumentDecl(n) => n.span,
        NamedArgumentDecl(n) => n.name.span,
        CompoundStmt(n) => n.span,
        UnscopedCompoundStmt(n) => n.span,
        ReturnStmt(n) => n.span,
        ExpressionStmt(n) => n.span,
        DeclStmt(n) => n.name.span,
        IfStmt(n) => n.span,
        MetaIfStmt(n) => n.span,
        MetaCalculationStmt(n) => n.span,
        MetaContribution(n) => n.span,
        DeclRefExpr(n) => n.name.span,
        IntegerLiteralExpr(n) => n.span,
        BooleanLiteralExpr(n) => n.span,
        BinaryOperatorExpr(n) => n.span,
        CallExpr(n) => n.span,
        MetaInstantiationExpr(n) => n.span,
        ErroneousExpr(n) => n.span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::pos::Span;

    fn sp(sym: Symbol) -> crate::ident::Identifier { crate::ident::identifier(Span::default(), sym) }

    #[test]
    fn forward_reference_at_top_level_resolves() {
        // int main() { return helper(); } int helper() { return 0; }
        let mut ctx = CompilerContext::new();
        let helper_sym = ctx.interner.intern("helper");
        let main_sym = ctx.interner.intern("main");

        let zero = ctx.ast.alloc(Node::IntegerLiteralExpr(IntegerLiteralExpr { span: Span::default(), value: 0 }));
        let ret0 = ctx.ast.alloc(Node::ReturnStmt(ReturnStmt { span: Span::default(), value: Some(zero) }));
        let helper_body_inner = ctx.ast.alloc(Node::UnscopedCompoundStmt(UnscopedCompoundStmt { span: Span::default(), stmts: vec![ret0] }));
        let helper_args = ctx.ast.alloc(Node::ArgumentDeclList(ArgumentDeclList { span: Span::default(), args: vec![] }));
        let helper = ctx.ast.alloc(Node::FunctionDecl(FunctionDecl {
            name: sp(helper_sym), def_id: None, args: helper_args, return_arg: None, body: helper_body_inner, containing_unit: None,
        }));

        let call = ctx.ast.alloc(Node::CallExpr(CallExpr { span: Span::default(), callee: sp(helper_sym), resolved: None, args: vec![] }));
        let ret_call = ctx.ast.alloc(Node::ReturnStmt(ReturnStmt { span: Span::default(), value: Some(call) }));
        let main_body_inner = ctx.ast.alloc(Node::UnscopedCompoundStmt(UnscopedCompoundStmt { span: Span::default(), stmts: vec![ret_call] }));
        let main_args = ctx.ast.alloc(Node::ArgumentDeclList(ArgumentDeclList { span: Span::default(), args: vec![] }));
        let main = ctx.ast.alloc(Node::FunctionDecl(FunctionDecl {
            name: sp(main_sym), def_id: None, args: main_args, return_arg: None, body: main_body_inner, containing_unit: None,
        }));

        let mut writer = crate::layout::LayoutWriter::new();
        writer.direct_write(main);
        writer.direct_write(helper);
        writer.mark_reduce();
        let layout = writer.build();

        let unit = structure_compilation_unit(&mut ctx, &layout).expect("should structure without error");
        assert!(!ctx.has_errors());
        if let Node::CallExpr(e) = ctx.ast.get(call) {
            assert_eq!(e.resolved, Some(helper));
        } else {
            panic!("expected CallExpr");
        }
        assert!(matches!(ctx.ast.get(unit), Node::CompilationUnit(_)));
    }

    #[test]
    fn unknown_name_reports_similar_suggestion() {
        let mut ctx = CompilerContext::new();
        let food_sym = ctx.interner.intern("food");
        let foo_sym = ctx.interner.intern("foo");

        let val = ctx.ast.alloc(Node::IntegerLiteralExpr(IntegerLiteralExpr { span: Span::default(), value: 1 }));
        let food = ctx.ast.alloc(Node::GlobalConstantDecl(GlobalConstantDecl { name: sp(food_sym), def_id: None, value: val, containing_unit: None }));

        let unknown_ref = ctx.ast.alloc(Node::DeclRefExpr(DeclRefExpr { name: sp(foo_sym), resolved: None }));
        let ret = ctx.ast.alloc(Node::ReturnStmt(ReturnStmt { span: Span::default(), value: Some(unknown_ref) }));
        let body = ctx.ast.alloc(Node::UnscopedCompoundStmt(UnscopedCompoundStmt { span: Span::default(), stmts: vec![ret] }));
        let args = ctx.ast.alloc(Node::ArgumentDeclList(ArgumentDeclList { span: Span::default(), args: vec![] }));
        let main_sym = ctx.interner.intern("main");
        let main = ctx.ast.alloc(Node::FunctionDecl(FunctionDecl { name: sp(main_sym), def_id: None, args, return_arg: None, body, containing_unit: None }));

        let mut writer = crate::layout::LayoutWriter::new();
        writer.direct_write(food);
        writer.direct_write(main);
        writer.mark_reduce();
        let layout = writer.build();

        let _ = structure_compilation_unit(&mut ctx, &layout);
        assert!(ctx.has_errors());
    }
}
