//! Scopes and name resolution.
//!
//! A [`Scope`] is a single struct with a small discriminant rather than a
//! class hierarchy: the three variants from the data model (temporary,
//! persistent, in-place) differ only in lifetime and in what happens on
//! insert, so they share one representation. Scopes are held in a
//! [`ScopeTree`] arena and referenced by [`ScopeId`]; the parent chain is a
//! plain index, not an owning pointer.

use std::collections::HashMap;

use crate::ast::NodeId;
use crate::ident::{Interner, Symbol};

macro_rules! newtype_id {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        $vis struct $name(u32);
        impl $name {
            pub(crate) fn from_index(i: usize) -> Self { $name(i as u32) }
            pub(crate) fn index(self) -> usize { self.0 as usize }
        }
    };
}

newtype_id! {
    /// Identifies a declaring node once name resolution has attached it to
    /// a `DeclRef`. Distinct from `NodeId` so that a `DefId` can outlive
    /// the specific arena a declaration was re-parsed into across
    /// instantiations (see `MetaUnit` re-structuring).
    pub struct DefId;
}

newtype_id! {
    pub struct ScopeId;
}

/// Which of the three scope lifetimes/side-effects this scope has.
#[derive(Debug, Clone)]
pub enum ScopeKind {
    /// Discarded after its producing frame returns: function bodies,
    /// compound statements, argument lists.
    Temporary,
    /// Kept for the lifetime of its owning unit: compilation units, meta
    /// units.
    Persistent,
    /// Transparent delegate to `parent` that also records every insertion
    /// into `collected`, for `meta-calculation`'s exported-binding
    /// collection.
    InPlace { collected: Vec<(Symbol, DefId)> },
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    bindings: HashMap<Symbol, DefId>,
}

impl Scope {
    fn new(kind: ScopeKind, parent: Option<ScopeId>) -> Self {
        Scope { kind, parent, bindings: HashMap::new() }
    }
}

/// Owns every scope created during one compilation or meta instantiation.
#[derive(Debug, Default)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    pub fn new() -> Self { Self::default() }

    pub fn new_persistent(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.push(Scope::new(ScopeKind::Persistent, parent))
    }

    pub fn new_temporary(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.push(Scope::new(ScopeKind::Temporary, parent))
    }

    pub fn new_in_place(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.push(Scope::new(ScopeKind::InPlace { collected: vec![] }, parent))
    }

    fn push(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId::from_index(self.scopes.len());
        self.scopes.push(scope);
        id
    }

    /// Binds `name` to `def` in `scope`. In-place scopes forward the
    /// binding to their delegate parent (if any) in addition to recording
    /// it locally, matching the "transparent delegate" semantics.
    pub fn bind(&mut self, scope: ScopeId, name: Symbol, def: DefId) {
        if let ScopeKind::InPlace { collected } = &mut self.scopes[scope.index()].kind {
            collected.push((name, def));
        }
        self.scopes[scope.index()].bindings.insert(name, def);
    }

    /// Looks up `name` starting at `scope`, walking the parent chain.
    pub fn lookup(&self, scope: ScopeId, name: Symbol) -> Option<DefId> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let s = &self.scopes[id.index()];
            if let Some(&def) = s.bindings.get(&name) {
                return Some(def);
            }
            cur = s.parent;
        }
        None
    }

    /// Direct (non-walking) lookup, used by the shadow rule to detect
    /// redeclaration within exactly one scope.
    pub fn lookup_local(&self, scope: ScopeId, name: Symbol) -> Option<DefId> {
        self.scopes[scope.index()].bindings.get(&name).copied()
    }

    pub fn collected(&self, scope: ScopeId) -> &[(Symbol, DefId)] {
        match &self.scopes[scope.index()].kind {
            ScopeKind::InPlace { collected } => collected,
            _ => &[],
        }
    }

    /// The closest known name to `name` in `scope`'s visible chain, by
    /// Levenshtein distance, early-exiting past a threshold of 10.
    pub fn similar(&self, scope: ScopeId, name: &str, interner: &Interner) -> Option<String> {
        const THRESHOLD: usize = 10;
        let mut best: Option<(usize, String)> = None;
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let s = &self.scopes[id.index()];
            for &sym in s.bindings.keys() {
                let candidate = interner.resolve(sym);
                let dist = levenshtein(name, candidate);
                if dist <= THRESHOLD && best.as_ref().map_or(true, |(d, _)| dist < *d) {
                    best = Some((dist, candidate.to_owned()));
                }
            }
            cur = s.parent;
        }
        best.map(|(_, name)| name)
    }
}

/// Bounded edit distance between two strings, with no early-exit
/// optimization beyond the caller's own threshold check (the table is
/// small: identifiers are short).
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        cur[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Which DeclRef-resolution mode the layout reader is currently in; gates
/// whether references are actually resolved or left as pure layout
/// templates (inside an un-instantiated `MetaDecl` body).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResolutionMode {
    Outside,
    InsideMetaDecl,
    InsideComputation,
}

impl ResolutionMode {
    pub fn resolves_refs(self) -> bool {
        matches!(self, ResolutionMode::Outside | ResolutionMode::InsideComputation)
    }
}

/// Maps declaring `NodeId`s to stable `DefId`s. A `DefId` survives a
/// `MetaUnit` being re-structured; its `NodeId` does not (each structuring
/// pass allocates fresh arena slots).
#[derive(Debug, Default)]
pub struct Resolutions {
    defs: Vec<NodeId>,
    by_node: HashMap<NodeId, DefId>,
}

impl Resolutions {
    pub fn new() -> Self { Self::default() }

    pub fn fresh_def(&mut self, declaring_node: NodeId) -> DefId {
        if let Some(&existing) = self.by_node.get(&declaring_node) {
            return existing;
        }
        let id = DefId::from_index(self.defs.len());
        self.defs.push(declaring_node);
        self.by_node.insert(declaring_node, id);
        id
    }

    pub fn declaring_node(&self, def: DefId) -> NodeId {
        self.defs[def.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(n: u32) -> DefId { DefId(n) }

    #[test]
    fn two_phase_lookup_sees_forward_references() {
        let mut scopes = ScopeTree::new();
        let unit = scopes.new_persistent(None);
        // phase 1: introduce both names before descending into either body
        scopes.bind(unit, Symbol::from(0u32), def(0));
        scopes.bind(unit, Symbol::from(1u32), def(1));
        // phase 2: body of decl 0 can see decl 1, declared later in source
        assert_eq!(scopes.lookup(unit, Symbol::from(1u32)), Some(def(1)));
    }

    #[test]
    fn in_place_scope_collects_bindings_for_export() {
        let mut scopes = ScopeTree::new();
        let parent = scopes.new_persistent(None);
        let calc = scopes.new_in_place(Some(parent));
        scopes.bind(calc, Symbol::from(0u32), def(0));
        assert_eq!(scopes.collected(calc), &[(Symbol::from(0u32), def(0))]);
        // also visible through the normal walking lookup
        assert_eq!(scopes.lookup(calc, Symbol::from(0u32)), Some(def(0)));
    }

    #[test]
    fn similar_name_suggestion_respects_threshold() {
        let mut scopes = ScopeTree::new();
        let mut interner = Interner::new();
        let unit = scopes.new_persistent(None);
        let food = interner.intern("food");
        scopes.bind(unit, food, def(0));
        assert_eq!(scopes.similar(unit, "foo", &interner).as_deref(), Some("food"));
    }

    #[test]
    fn levenshtein_matches_known_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("foo", "foo"), 0);
    }
}
