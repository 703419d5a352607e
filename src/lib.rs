//! Whole-program compiler for a small statically-typed language with a
//! compile-time meta-instantiation JIT engine.
//!
//! The pipeline (see [`driver`] for the full sequence): source text is
//! lexed and parsed ([`parse`]) into a flat [`layout::Layout`]; the
//! [`reader`] structures that into an [`ast::CompilationUnit`] while
//! running two-phase name resolution; [`sema`] validates arity, call
//! targets, and meta-argument shape; then [`executor::Executor`] generates
//! native code for every function, instantiating every meta call it
//! transitively reaches along the way (via [`codegen`] and [`dep`]).

pub use error::CompileError;
#[macro_use]
pub mod error;

pub use pos::{Files, Sp, Span};
pub mod pos;

pub use ast::{Ast, Node, NodeId};
pub mod ast;

pub use ident::{Identifier, Symbol};
pub mod ident;

pub mod resolve;

pub use context::CompilerContext;
pub mod context;

pub use layout::Layout;
pub mod layout;

pub mod parse;

pub mod reader;

pub mod sema;

pub mod dep;

pub mod codegen;

pub use executor::Executor;
pub mod executor;

pub mod dump;

pub use driver::{CompilerInvocation, EmitPhase};
pub mod driver;
