//! The flat layout stream: the linear node/reduce-marker encoding used both
//! as parse output and as the form meta emitters produce at runtime.
//!
//! For every node: the writer emits the node pointer, then recursively
//! emits its children, then — only if the node's child container is
//! variadic — a reduce marker. This resolves the shift/reduce ambiguity
//! variadic nodes would otherwise create for an LL(0) reader.

use crate::ast::{Ast, Node, NodeId};

/// One entry in a layout: either a node or a reduce marker (`None`).
pub type Token = Option<NodeId>;

/// An ordered sequence of tokens. Produced by the parser and by meta
/// execution; consumed by the [`crate::reader::LayoutReader`].
#[derive(Debug, Clone, Default)]
pub struct Layout {
    tokens: Vec<Token>,
}

impl Layout {
    pub fn new() -> Self { Self::default() }
    pub fn tokens(&self) -> &[Token] { &self.tokens }
    pub fn len(&self) -> usize { self.tokens.len() }
    pub fn is_empty(&self) -> bool { self.tokens.is_empty() }
}

/// Helper for writing a [`Layout`], with `write`/`scoped_write` mirroring
/// the original's eager-vs-deferred-reduce API.
pub struct LayoutWriter {
    layout: Layout,
}

impl LayoutWriter {
    pub fn new() -> Self { LayoutWriter { layout: Layout::new() } }

    /// Writes `node`'s pointer, plus its reduce marker immediately if it
    /// requires one and the caller does not intend to write children
    /// first. Most callers should prefer `scoped_write` for
    /// children-bearing nodes.
    pub fn write(&mut self, ast: &Ast, node: NodeId) {
        let requires_marker = ast.get(node).requires_reduce_marker();
        self.layout.tokens.push(Some(node));
        if requires_marker {
            self.layout.tokens.push(None);
        }
    }

    /// Writes `node`'s pointer without an immediate reduce marker,
    /// returning a guard whose `Drop` writes the marker (if the node
    /// requires one) once the caller has finished writing `node`'s
    /// children. This is what recursive writers should use.
    pub fn scoped_write<'a>(&'a mut self, ast: &Ast, node: NodeId) -> ScopedWrite<'a> {
        let requires_marker = ast.get(node).requires_reduce_marker();
        self.layout.tokens.push(Some(node));
        ScopedWrite { writer: self, requires_marker, closed: false }
    }

    /// Writes a raw token without any bookkeeping. Used by meta emission,
    /// which already knows exactly which markers it needs (see
    /// `crate::codegen::meta`).
    pub fn direct_write(&mut self, node: NodeId) {
        self.layout.tokens.push(Some(node));
    }

    pub fn mark_reduce(&mut self) {
        self.layout.tokens.push(None);
    }

    pub fn build(self) -> Layout { self.layout }
}

impl Default for LayoutWriter {
    fn default() -> Self { Self::new() }
}

/// RAII guard returned by `scoped_write`; writes the pending reduce marker
/// on drop so callers can't forget it on an early return.
pub struct ScopedWrite<'a> {
    writer: &'a mut LayoutWriter,
    requires_marker: bool,
    closed: bool,
}

impl<'a> ScopedWrite<'a> {
    pub fn writer(&mut self) -> &mut LayoutWriter { self.writer }

    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.closed {
            if self.requires_marker {
                self.writer.layout.tokens.push(None);
            }
            self.closed = true;
        }
    }
}

impl<'a> Drop for ScopedWrite<'a> {
    fn drop(&mut self) { self.finish(); }
}

/// Recursively writes `node` and all its descendants, following the
/// writing rules verbatim. Used both by the front end (after parsing
/// builds an `Ast` directly) and by round-trip tests.
pub fn write_node(writer: &mut LayoutWriter, ast: &Ast, node: NodeId) {
    let mut guard = writer.scoped_write(ast, node);
    for child in children_of(ast, node) {
        write_node(guard.writer(), ast, child);
    }
    // guard drops here, emitting the reduce marker if required
}

/// Exposed `pub(crate)` so the YAML dumper can walk the same parent/child
/// edges without re-deriving them from each node's fields.
pub(crate) fn children_of(ast: &Ast, node: NodeId) -> Vec<NodeId> {
    use Node::*;
    match ast.get(node) {
        CompilationUnit(u) => u.decls.clone(),
        MetaUnit(u) => u.decls.clone(),
        FunctionDecl(d) => {
            let mut v = vec![d.args];
            v.extend(d.return_arg);
            v.push(d.body);
            v
        }
        MetaDecl(d) => vec![d.args, d.body],
        GlobalConstantDecl(d) => vec![d.value],
        ArgumentDeclList(l) => l.args.clone(),
        AnonymousArgumentDecl(_) => vec![],
        NamedArgumentDecl(_) => vec![],
        CompoundStmt(s) => s.stmts.clone(),
        UnscopedCompoundStmt(s) => s.stmts.clone(),
        ReturnStmt(s) => s.value.into_iter().collect(),
        ExpressionStmt(s) => vec![s.expr],
        DeclStmt(s) => vec![s.init],
        IfStmt(s) => {
            let mut v = vec![s.cond, s.then_branch];
            v.extend(s.else_branch);
            v
        }
        MetaIfStmt(s) => {
            let mut v = vec![s.cond, s.then_branch];
            v.extend(s.else_branch);
            v
        }
        MetaCalculationStmt(s) => vec![s.stmt],
        MetaContribution(c) => c.children.clone(),
        DeclRefExpr(_) => vec![],
        IntegerLiteralExpr(_) => vec![],
        BooleanLiteralExpr(_) => vec![],
        BinaryOperatorExpr(e) => vec![e.lhs, e.rhs],
        CallExpr(e) => e.args.clone(),
        MetaInstantiationExpr(e) => e.args.iter().chain(e.call_args.iter()).copied().collect(),
        ErroneousExpr(_) => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ErroneousExpr, CompoundStmt};
    use crate::pos::Span;

    #[test]
    fn fixed_arity_node_has_no_marker() {
        let mut ast = Ast::new();
        let leaf = ast.alloc(Node::ErroneousExpr(ErroneousExpr { span: Span::default() }));
        let mut w = LayoutWriter::new();
        w.write(&ast, leaf);
        let layout = w.build();
        assert_eq!(layout.tokens(), &[Some(leaf)]);
    }

    #[test]
    fn variadic_node_gets_trailing_marker_after_children() {
        let mut ast = Ast::new();
        let leaf = ast.alloc(Node::ErroneousExpr(ErroneousExpr { span: Span::default() }));
        let compound = ast.alloc(Node::CompoundStmt(CompoundStmt {
            span: Span::default(),
            stmts: vec![],
        }));
        // patch in a child after allocation, to exercise write_node's recursion
        if let Node::CompoundStmt(c) = ast.get_mut(compound) {
            c.stmts.push(leaf);
        }
        let mut w = LayoutWriter::new();
        write_node(&mut w, &ast, compound);
        let layout = w.build();
        assert_eq!(layout.tokens(), &[Some(compound), Some(leaf), None]);
    }
}
