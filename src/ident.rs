//! Interned identifiers.
//!
//! Every name that appears in source text is interned exactly once into an
//! append-only pool keyed by content, matching the append-only discipline
//! the rest of the compiler's arenas follow. Nothing is ever removed from
//! the pool; interning the same bytes twice returns the same [`Symbol`].

use std::collections::HashMap;

use crate::pos::{Sp, Span};

/// An index into an [`Interner`]'s pool. Two symbols compare equal iff they
/// were interned from equal strings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl From<u32> for Symbol {
    fn from(raw: u32) -> Self { Symbol(raw) }
}

impl From<Symbol> for u32 {
    fn from(sym: Symbol) -> Self { sym.0 }
}

/// Append-only string interner. There is exactly one live per compilation,
/// owned by the [`crate::context::CompilerContext`].
#[derive(Debug, Default)]
pub struct Interner {
    strings: Vec<Box<str>>,
    lookup: HashMap<Box<str>, Symbol>,
}

impl Interner {
    pub fn new() -> Self { Self::default() }

    pub fn intern(&mut self, text: &str) -> Symbol {
        if let Some(&sym) = self.lookup.get(text) {
            return sym;
        }
        let sym = Symbol(self.strings.len() as u32);
        let boxed: Box<str> = text.into();
        self.strings.push(boxed.clone());
        self.lookup.insert(boxed, sym);
        sym
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        &self.strings[sym.0 as usize]
    }
}

/// A bare interned name together with the source range it was spelled at.
/// Corresponds to the data model's "pooled interned string annotated with
/// a source range".
pub type Identifier = Sp<Symbol>;

/// Convenience constructor mirroring the teacher's `Sp::new_from` idiom.
pub fn identifier(span: Span, symbol: Symbol) -> Identifier {
    Sp::new_from(span, symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("foo");
        let c = interner.intern("bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.resolve(a), "foo");
        assert_eq!(interner.resolve(c), "bar");
    }
}
