//! Dependency walker: enumerates every `MetaInstantiationExpr` reachable by
//! structural recursion from a declaration, including inside nested
//! `MetaIf` branches and `MetaCalculation` expressions. Supports early
//! termination when the consumer returns `false`.

use crate::ast::{Ast, Node, NodeId};

/// Walks every `MetaInstantiationExpr` reachable from `root`, calling
/// `consumer` for each. Stops early the first time `consumer` returns
/// `false`.
pub fn walk_instantiations(ast: &Ast, root: NodeId, mut consumer: impl FnMut(NodeId) -> bool) {
    walk(ast, root, &mut consumer);
}

fn walk(ast: &Ast, id: NodeId, consumer: &mut impl FnMut(NodeId) -> bool) -> bool {
    match ast.get(id) {
        Node::FunctionDecl(d) => walk(ast, d.body, consumer),
        Node::MetaDecl(d) => walk(ast, d.body, consumer),
        Node::GlobalConstantDecl(d) => walk(ast, d.value, consumer),
        Node::CompoundStmt(s) => walk_all(ast, &s.stmts, consumer),
        Node::UnscopedCompoundStmt(s) => walk_all(ast, &s.stmts, consumer),
        Node::ReturnStmt(s) => s.value.map_or(true, |v| walk(ast, v, consumer)),
        Node::ExpressionStmt(s) => walk(ast, s.expr, consumer),
        Node::DeclStmt(s) => walk(ast, s.init, consumer),
        Node::IfStmt(s) => {
            walk(ast, s.cond, consumer)
                && walk(ast, s.then_branch, consumer)
                && s.else_branch.map_or(true, |e| walk(ast, e, consumer))
        }
        Node::MetaIfStmt(s) => {
            walk(ast, s.cond, consumer)
                && walk(ast, s.then_branch, consumer)
                && s.else_branch.map_or(true, |e| walk(ast, e, consumer))
        }
        Node::MetaCalculationStmt(s) => walk(ast, s.stmt, consumer),
        Node::MetaContribution(c) => walk_all(ast, &c.children, consumer),
        Node::BinaryOperatorExpr(e) => walk(ast, e.lhs, consumer) && walk(ast, e.rhs, consumer),
        Node::CallExpr(e) => walk_all(ast, &e.args, consumer),
        Node::MetaInstantiationExpr(_) => {
            let keep_going = consumer(id);
            if let Node::MetaInstantiationExpr(e) = ast.get(id) {
                keep_going && walk_all(ast, &e.args, consumer) && walk_all(ast, &e.call_args, consumer)
            } else {
                keep_going
            }
        }
        Node::CompilationUnit(u) => walk_all(ast, &u.decls, consumer),
        Node::MetaUnit(u) => walk_all(ast, &u.decls, consumer),
        _ => true,
    }
}

fn walk_all(ast: &Ast, ids: &[NodeId], consumer: &mut impl FnMut(NodeId) -> bool) -> bool {
    for &id in ids {
        if !walk(ast, id, consumer) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::pos::Span;

    fn ident(ast_ctx: &mut crate::ident::Interner, s: &str) -> crate::ident::Identifier {
        crate::ident::identifier(Span::default(), ast_ctx.intern(s))
    }

    #[test]
    fn finds_nested_instantiation_inside_meta_if_branch() {
        let mut ast = Ast::new();
        let mut interner = crate::ident::Interner::new();

        let inst = ast.alloc(Node::MetaInstantiationExpr(MetaInstantiationExpr {
            span: Span::default(), callee: ident(&mut interner, "k"), resolved: None, args: vec![], call_args: vec![],
        }));
        let contribution = ast.alloc(Node::MetaContribution(MetaContribution { span: Span::default(), children: vec![inst] }));
        let cond = ast.alloc(Node::IntegerLiteralExpr(IntegerLiteralExpr { span: Span::default(), value: 1 }));
        let meta_if = ast.alloc(Node::MetaIfStmt(MetaIfStmt { span: Span::default(), cond, then_branch: contribution, else_branch: None }));
        let top_contribution = ast.alloc(Node::MetaContribution(MetaContribution { span: Span::default(), children: vec![meta_if] }));

        let mut found = vec![];
        walk_instantiations(&ast, top_contribution, |id| { found.push(id); true });
        assert_eq!(found, vec![inst]);
    }

    #[test]
    fn early_termination_stops_after_first_hit() {
        let mut ast = Ast::new();
        let mut interner = crate::ident::Interner::new();
        let inst_a = ast.alloc(Node::MetaInstantiationExpr(MetaInstantiationExpr { span: Span::default(), callee: ident(&mut interner, "a"), resolved: None, args: vec![], call_args: vec![] }));
        let inst_b = ast.alloc(Node::MetaInstantiationExpr(MetaInstantiationExpr { span: Span::default(), callee: ident(&mut interner, "b"), resolved: None, args: vec![], call_args: vec![] }));
        let contribution = ast.alloc(Node::MetaContribution(MetaContribution { span: Span::default(), children: vec![inst_a, inst_b] }));

        let mut found = vec![];
        walk_instantiations(&ast, contribution, |id| { found.push(id); false });
        assert_eq!(found, vec![inst_a]);
    }
}
