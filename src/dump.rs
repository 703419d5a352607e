//! YAML dumps for the `-emit-tokens`/`-emit-flat-layout`/`-emit-layout`/
//! `-emit-ast` early exits.
//!
//! Each dump is a small visitor producing a `serde_yaml::Value` tree with
//! `kind`/`represents`/`children` fields — the same traversal shape as
//! `crate::fmt`'s pretty-printer, aimed at a YAML sink instead of source
//! text. The four flags differ only in how deep they look: tokens never
//! touch the `Ast` at all, the flat layout shows one shallow entry per
//! top-level slot, and `-emit-layout`/`-emit-ast` both recurse all the way
//! down — the former over the still-unresolved flat entries, the latter
//! over the fully name-resolved unit, where `represents` on a reference
//! additionally names what it resolved to.

use serde_yaml::{Mapping, Value};

use crate::ast::{Ast, Node, NodeId};
use crate::ident::Interner;
use crate::layout::{children_of, Layout};

fn val(s: impl Into<String>) -> Value { Value::String(s.into()) }

/// Dump for `-emit-tokens`: the `(kind, represents)` pairs `parse::dump_tokens`
/// already lexed out, with no structure beyond the flat list itself.
pub fn dump_token_list(tokens: &[(&'static str, Option<String>)]) -> Value {
    let entries = tokens
        .iter()
        .map(|(kind, represents)| {
            let mut map = Mapping::new();
            map.insert(val("kind"), val(*kind));
            if let Some(r) = represents {
                map.insert(val("represents"), val(r.clone()));
            }
            Value::Mapping(map)
        })
        .collect();
    Value::Sequence(entries)
}

/// Dump for `-emit-flat-layout`: one shallow entry per layout token, with
/// `<reduce marker>` standing in for a `None` slot. Doesn't recurse into a
/// node's children — the point of this dump is to show the flat stream
/// exactly as the reader's cursor sees it, before any structuring happens.
pub fn dump_flat_layout(ast: &Ast, interner: &Interner, layout: &Layout) -> Value {
    let entries = layout
        .tokens()
        .iter()
        .map(|tok| match tok {
            Some(id) => shallow_entry(ast, interner, *id),
            None => val("<reduce marker>"),
        })
        .collect();
    Value::Sequence(entries)
}

/// Dump for `-emit-layout`: the same flat entries, each now expanded into
/// its full subtree — the shape the reader is about to structure, before
/// name resolution has run (so `DeclRef`/`Call`/`MetaInstantiation` targets
/// are not yet shown).
pub fn dump_layout(ast: &Ast, interner: &Interner, layout: &Layout) -> Value {
    let entries = layout
        .tokens()
        .iter()
        .map(|tok| match tok {
            Some(id) => dump_node(ast, interner, *id, false),
            None => val("<reduce marker>"),
        })
        .collect();
    Value::Sequence(entries)
}

/// Dump for `-emit-ast`: the fully structured, name-resolved unit. Unlike
/// `-emit-layout`, `represents` on a resolved reference also names its
/// target, since resolution has already run by this point.
pub fn dump_ast(ast: &Ast, interner: &Interner, root: NodeId) -> Value {
    dump_node(ast, interner, root, true)
}

fn shallow_entry(ast: &Ast, interner: &Interner, id: NodeId) -> Value {
    let mut map = Mapping::new();
    map.insert(val("kind"), val(kind_name(ast.get(id))));
    if let Some(r) = represents(ast, interner, id, false) {
        map.insert(val("represents"), val(r));
    }
    Value::Mapping(map)
}

fn dump_node(ast: &Ast, interner: &Interner, id: NodeId, show_resolved: bool) -> Value {
    let mut map = Mapping::new();
    map.insert(val("kind"), val(kind_name(ast.get(id))));
    if let Some(r) = represents(ast, interner, id, show_resolved) {
        map.insert(val("represents"), val(r));
    }
    let children = children_of(ast, id);
    if !children.is_empty() {
        let dumped: Vec<Value> = children.into_iter().map(|c| dump_node(ast, interner, c, show_resolved)).collect();
        map.insert(val("children"), Value::Sequence(dumped));
    }
    Value::Mapping(map)
}

fn kind_name(node: &Node) -> &'static str {
    match node {
        Node::CompilationUnit(_) => "CompilationUnit",
        Node::MetaUnit(_) => "MetaUnit",
        Node::FunctionDecl(_) => "FunctionDecl",
        Node::MetaDecl(_) => "MetaDecl",
        Node::GlobalConstantDecl(_) => "GlobalConstantDecl",
        Node::ArgumentDeclList(_) => "ArgumentDeclList",
        Node::AnonymousArgumentDecl(_) => "AnonymousArgumentDecl",
        Node::NamedArgumentDecl(_) => "NamedArgumentDecl",
        Node::CompoundStmt(_) => "CompoundStmt",
        Node::UnscopedCompoundStmt(_) => "UnscopedCompoundStmt",
        Node::ReturnStmt(_) => "ReturnStmt",
        Node::ExpressionStmt(_) => "ExpressionStmt",
        Node::DeclStmt(_) => "DeclStmt",
        Node::IfStmt(_) => "IfStmt",
        Node::MetaIfStmt(_) => "MetaIfStmt",
        Node::MetaCalculationStmt(_) => "MetaCalculationStmt",
        Node::MetaContribution(_) => "MetaContribution",
        Node::DeclRefExpr(_) => "DeclRefExpr",
        Node::IntegerLiteralExpr(_) => "IntegerLiteralExpr",
        Node::BooleanLiteralExpr(_) => "BooleanLiteralExpr",
        Node::BinaryOperatorExpr(_) => "BinaryOperatorExpr",
        Node::CallExpr(_) => "CallExpr",
        Node::MetaInstantiationExpr(_) => "MetaInstantiationExpr",
        Node::ErroneousExpr(_) => "ErroneousExpr",
    }
}

fn represents(ast: &Ast, interner: &Interner, id: NodeId, show_resolved: bool) -> Option<String> {
    let resolved_suffix = |target: Option<NodeId>| -> String {
        if !show_resolved {
            return String::new();
        }
        match target.and_then(|t| ast.get(t).decl_name()) {
            Some(name) => format!(" -> {}", interner.resolve(name.value)),
            None => String::new(),
        }
    };
    match ast.get(id) {
        Node::FunctionDecl(d) => Some(interner.resolve(d.name.value).to_owned()),
        Node::MetaDecl(d) => Some(interner.resolve(d.name.value).to_owned()),
        Node::GlobalConstantDecl(d) => Some(interner.resolve(d.name.value).to_owned()),
        Node::NamedArgumentDecl(d) => Some(interner.resolve(d.name.value).to_owned()),
        Node::DeclStmt(d) => Some(interner.resolve(d.name.value).to_owned()),
        Node::DeclRefExpr(e) => Some(format!("{}{}", interner.resolve(e.name.value), resolved_suffix(e.resolved))),
        Node::CallExpr(e) => Some(format!("{}{}", interner.resolve(e.callee.value), resolved_suffix(e.resolved))),
        Node::MetaInstantiationExpr(e) => Some(format!("{}{}", interner.resolve(e.callee.value), resolved_suffix(e.resolved))),
        Node::IntegerLiteralExpr(e) => Some(e.value.to_string()),
        Node::BooleanLiteralExpr(e) => Some(e.value.to_string()),
        Node::BinaryOperatorExpr(e) => Some(e.op.value.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerContext;

    #[test]
    fn flat_layout_dump_shows_reduce_markers_and_shallow_entries() {
        let mut ctx = CompilerContext::new();
        let layout = crate::parse::parse_layout(&mut ctx, ctx.files.add("<test>", b"const int x = 1;"), "const int x = 1;").unwrap();
        let dumped = dump_flat_layout(&ctx.ast, &ctx.interner, &layout);
        let seq = dumped.as_sequence().unwrap();
        assert_eq!(seq.len(), 2); // the decl, then the reduce marker
        assert_eq!(seq[1], val("<reduce marker>"));
        let entry = seq[0].as_mapping().unwrap();
        assert_eq!(entry.get(&val("kind")).unwrap(), &val("GlobalConstantDecl"));
        assert_eq!(entry.get(&val("represents")).unwrap(), &val("x"));
        assert!(entry.get(&val("children")).is_none(), "flat-layout dump must not recurse");
    }

    #[test]
    fn ast_dump_recurses_and_shows_resolved_targets() {
        let mut ctx = CompilerContext::new();
        let src = "int main() { return helper(1); } int helper(int x) { return x; }";
        let layout = crate::parse::parse_layout(&mut ctx, ctx.files.add("<test>", src.as_bytes()), src).unwrap();
        let unit = crate::reader::structure_compilation_unit(&mut ctx, &layout).unwrap();
        let dumped = dump_ast(&ctx.ast, &ctx.interner, unit);
        let root = dumped.as_mapping().unwrap();
        assert_eq!(root.get(&val("kind")).unwrap(), &val("CompilationUnit"));
        let rendered = serde_yaml::to_string(&dumped).unwrap();
        assert!(rendered.contains("-> helper"), "resolved call target should be named in the dump:\n{}", rendered);
    }
}
