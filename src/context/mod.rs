//! Structs that carry important global compiler state.
//!
//! [`CompilerContext`] is the one object threaded through every pass after
//! parsing: the arena, the interner, scope data, and the diagnostics sink.
//! Passes take `&CompilerContext`/`&mut CompilerContext` explicitly rather
//! than reaching for globals or thread-locals.

use std::collections::HashMap;

use crate::ast::{Ast, NodeId};
use crate::error::Diagnostics;
use crate::ident::Interner;
use crate::pos::Files;
use crate::resolve::{Resolutions, ScopeId, ScopeTree};

/// Global state for one compiler invocation: one source file, plus every
/// meta instantiation it transitively triggers.
pub struct CompilerContext {
    pub files: Files,
    pub interner: Interner,
    pub ast: Ast,
    pub scopes: ScopeTree,
    pub resolutions: Resolutions,
    pub diagnostics: Diagnostics,
    /// The persistent scope every compilation unit's top-level names are
    /// introduced into before its root `ScopeId` is created; kept separate
    /// so meta-instantiation-produced units can share builtin visibility
    /// without re-deriving it.
    pub root_scope: ScopeId,
    /// Every `CompilationUnit`/`MetaUnit`'s own persistent scope, keyed by
    /// its node — lets the executor find the scope a `MetaDecl` was
    /// declared in (via its `containing_unit`) so a fresh instantiation's
    /// scope nests under the right ancestor instead of always under
    /// `root_scope`, which is what the shadow rule needs to see the
    /// original `MetaDecl` binding at all.
    pub unit_scopes: HashMap<NodeId, ScopeId>,
}

impl CompilerContext {
    pub fn new() -> Self {
        let mut scopes = ScopeTree::new();
        let root_scope = scopes.new_persistent(None);
        CompilerContext {
            files: Files::new(),
            interner: Interner::new(),
            ast: Ast::new(),
            scopes,
            resolutions: Resolutions::new(),
            diagnostics: Diagnostics::new(),
            root_scope,
            unit_scopes: HashMap::new(),
        }
    }

    pub fn has_errors(&self) -> bool { self.diagnostics.has_errors() }
}

impl Default for CompilerContext {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_has_a_root_scope_and_no_errors() {
        let ctx = CompilerContext::new();
        assert!(!ctx.has_errors());
        assert_eq!(ctx.scopes.lookup(ctx.root_scope, 0u32.into()), None);
    }
}
