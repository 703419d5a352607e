//! The JIT executor: runs a meta decl's compiled emitter to produce one
//! instantiation's flat layout, then hands it to the reader/semantic check
//! to become a `MetaUnit`. Caches by `(meta decl, argument values)` so the
//! same instantiation is never run twice.
//!
//! The three callbacks an emitter calls (`contribute`/`reduce`/`introduce`)
//! are plain `extern "C" fn`s, since they cross the JIT ABI as raw function
//! pointers registered with `JITBuilder::symbol` — there is no way to give
//! them a closure environment. State they need lives in a thread-local
//! table instead, indexed by the opaque `ctx` handle every emitter receives
//! as its sole argument (see the design note on `crate::codegen::emitter_signature`).
//! This is the unsafe seam of the whole compiler; every other module stays
//! entirely safe Rust.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::ast::{Ast, Node, NodeId};
use crate::codegen::{function, meta, ActiveSet, Backend};
use crate::context::CompilerContext;
use crate::error::ErrorReported;
use crate::ident::Symbol;
use crate::layout::LayoutWriter;

/// Per-instantiation state visible to the three host callbacks. `ast`
/// points at the live `CompilerContext`'s `Ast` for the duration of one
/// `emit_fn` call (`introduce` needs it to allocate the node it
/// synthesizes); it does not outlive that call.
struct Session {
    ast: *mut Ast,
    writer: LayoutWriter,
}

thread_local! {
    static SESSIONS: RefCell<Vec<Option<Session>>> = RefCell::new(Vec::new());
}

fn push_session(ast: *mut Ast) -> i64 {
    SESSIONS.with(|s| {
        let mut s = s.borrow_mut();
        s.push(Some(Session { ast, writer: LayoutWriter::new() }));
        (s.len() - 1) as i64
    })
}

fn take_session(handle: i64) -> Session {
    SESSIONS.with(|s| s.borrow_mut()[handle as usize].take().expect("session handle used after completion"))
}

/// `extern "C" fn(ctx, node_index)`: appends one already-built template
/// node to the layout under construction. Does not recurse into the
/// node's own children — those are reached later, directly through the
/// node's own fields, exactly as a parsed node would be.
pub extern "C" fn contribute_trampoline(ctx: i64, node_index: i64) {
    SESSIONS.with(|s| {
        let mut sessions = s.borrow_mut();
        let session = sessions[ctx as usize].as_mut().expect("session handle used after completion");
        let node = NodeId::from_arena_index(node_index as usize);
        session.writer.direct_write(node);
    });
}

/// `extern "C" fn(ctx)`: closes the variadic sibling list currently being
/// written (a `MetaDecl` body or a `MetaIf` branch).
pub extern "C" fn reduce_trampoline(ctx: i64) {
    SESSIONS.with(|s| {
        let mut sessions = s.borrow_mut();
        let session = sessions[ctx as usize].as_mut().expect("session handle used after completion");
        session.writer.mark_reduce();
    });
}

/// Which kind of declaration `introduce` should synthesize, matching where
/// the exported binding is meant to live: at the top of the `MetaUnit`
/// being built (a `GlobalConstantDecl`), or as a local inside a function
/// body (a `DeclStmt`). Only `TopLevel` ever crosses this callback in this
/// implementation — a `meta calc` nested directly inside an ordinary
/// function body is lowered entirely by `crate::codegen::function`, which
/// already has a resolved `DeclStmt` to work with and never needs to ask
/// the JIT host to synthesize one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i32)]
pub enum IntroduceDepth {
    TopLevel = 0,
    InsideFunctionDecl = 1,
}

impl From<i32> for IntroduceDepth {
    fn from(raw: i32) -> Self {
        match raw {
            1 => IntroduceDepth::InsideFunctionDecl,
            _ => IntroduceDepth::TopLevel,
        }
    }
}

/// `extern "C" fn(ctx, name_symbol, value, depth)`: synthesizes a binding
/// for a value a `MetaCalculation` exported and contributes it immediately,
/// exactly like an ordinary declaration — the one difference from
/// `contribute` is that the node doesn't exist ahead of time, so
/// `introduce` allocates it itself. `depth` picks the node kind: `TopLevel`
/// produces a `GlobalConstantDecl`, `InsideFunctionDecl` a `DeclStmt`.
pub extern "C" fn introduce_trampoline(ctx: i64, name_symbol: i64, value: i32, depth: i32) {
    SESSIONS.with(|s| {
        let mut sessions = s.borrow_mut();
        let session = sessions[ctx as usize].as_mut().expect("session handle used after completion");
        // Safety: `session.ast` was taken from `&mut ctx.ast` by `instantiate`
        // and outlives every callback invoked during the single `emit_fn`
        // call it wraps; no other reference to that `Ast` is live meanwhile.
        let ast = unsafe { &mut *session.ast };
        let span = crate::pos::Span::default();
        let value_node = ast.alloc(Node::IntegerLiteralExpr(crate::ast::IntegerLiteralExpr { span, value }));
        let name = crate::ident::identifier(span, Symbol::from(name_symbol as u32));
        let decl = match IntroduceDepth::from(depth) {
            IntroduceDepth::InsideFunctionDecl => ast.alloc(Node::DeclStmt(crate::ast::DeclStmt {
                name,
                def_id: None,
                init: value_node,
            })),
            IntroduceDepth::TopLevel => ast.alloc(Node::GlobalConstantDecl(crate::ast::GlobalConstantDecl {
                name,
                def_id: None,
                value: value_node,
                containing_unit: None,
            })),
        };
        session.writer.direct_write(decl);
    });
}

/// Owns the shared Cranelift module and the caches that keep meta
/// instantiation and function codegen from repeating work, across the
/// whole lifetime of one compiler invocation.
pub struct Executor {
    pub backend: Backend,
    func_ids: HashMap<NodeId, cranelift_module::FuncId>,
    active_functions: ActiveSet,
    active_metas: ActiveSet,
    instantiation_cache: HashMap<(NodeId, Vec<i32>), NodeId>,
}

impl Executor {
    pub fn new() -> Self {
        Self::with_opt_level("none")
    }

    pub fn with_opt_level(opt_level: &str) -> Self {
        Executor {
            backend: Backend::with_opt_level(opt_level),
            func_ids: HashMap::new(),
            active_functions: ActiveSet::new(),
            active_metas: ActiveSet::new(),
            instantiation_cache: HashMap::new(),
        }
    }

    /// The `FuncId` every declared `FunctionDecl` was given, keyed by its
    /// node — used by the driver's final textual-IR dump to name each
    /// function it prints.
    pub fn function_ids(&self) -> &HashMap<NodeId, cranelift_module::FuncId> {
        &self.func_ids
    }

    /// Declares (signature-only) every `FunctionDecl` reachable from `unit`,
    /// ahead of generating any body, so forward and mutually recursive
    /// calls always have a `FuncId` to import.
    pub fn declare_functions(&mut self, ctx: &mut CompilerContext, unit: NodeId) -> Result<(), ErrorReported> {
        let decls = match ctx.ast.get(unit) {
            Node::CompilationUnit(u) => u.decls.clone(),
            Node::MetaUnit(u) => u.decls.clone(),
            _ => return Ok(()),
        };
        for decl in decls {
            if matches!(ctx.ast.get(decl), Node::FunctionDecl(_)) {
                function::declare_function(ctx, &mut self.backend, &mut self.func_ids, decl)?;
            }
        }
        Ok(())
    }

    /// Generates the body of every `FunctionDecl` reachable from `unit`,
    /// first instantiating every meta call its body transitively reaches
    /// so that `DeclRefExpr`/`CallExpr` nodes the new code contains are
    /// already structured and checked.
    pub fn codegen_functions(&mut self, ctx: &mut CompilerContext, unit: NodeId) -> Result<(), ErrorReported> {
        let decls = match ctx.ast.get(unit) {
            Node::CompilationUnit(u) => u.decls.clone(),
            Node::MetaUnit(u) => u.decls.clone(),
            _ => return Ok(()),
        };
        let mut flag = crate::error::ErrorFlag::new();
        for decl in decls {
            if !matches!(ctx.ast.get(decl), Node::FunctionDecl(_)) {
                continue;
            }
            if let Err(e) = self.instantiate_dependencies(ctx, decl) {
                flag.set(e);
                continue;
            }
            if let Node::FunctionDecl(d) = ctx.ast.get(decl) {
                log::debug!("codegen function `{}`", ctx.interner.resolve(d.name.value));
            }
            if let Err(e) = function::codegen_function(ctx, &mut self.backend, &mut self.active_functions, &self.func_ids, decl) {
                flag.set(e);
            }
        }
        flag.into_result(())
    }

    /// Walks every `MetaInstantiationExpr` reachable from `decl` and
    /// instantiates it, so that by the time `decl` is codegen'd every
    /// instantiation it references has already been resolved to its
    /// exported declaration.
    fn instantiate_dependencies(&mut self, ctx: &mut CompilerContext, decl: NodeId) -> Result<(), ErrorReported> {
        let mut pending = Vec::new();
        crate::dep::walk_instantiations(&ctx.ast, decl, |inst| {
            pending.push(inst);
            true
        });
        let mut flag = crate::error::ErrorFlag::new();
        for inst in pending {
            if let Err(e) = self.instantiate(ctx, inst) {
                flag.set(e);
            }
        }
        flag.into_result(())
    }

    /// Runs one meta instantiation to completion: codegens (or reuses) the
    /// emitter, executes it through the JIT, structures the layout it
    /// produced into a `MetaUnit`, semantically checks it, and rewrites
    /// `inst`'s resolved target to the exported declaration the new unit
    /// produced. Idempotent per `(meta decl, argument values)`.
    pub fn instantiate(&mut self, ctx: &mut CompilerContext, inst: NodeId) -> Result<NodeId, ErrorReported> {
        let (meta_decl, meta_name, arg_values, parent_scope) = match ctx.ast.get(inst).clone() {
            Node::MetaInstantiationExpr(e) => {
                let target = e.resolved.expect("resolved by the reader");
                let (name, containing_unit) = match ctx.ast.get(target) {
                    Node::MetaDecl(m) => (m.name.value, m.containing_unit),
                    _ => unreachable!("semantic check rejects instantiation of a non-meta-decl"),
                };
                let values = e
                    .args
                    .iter()
                    .map(|&a| match ctx.ast.get(a) {
                        Node::IntegerLiteralExpr(lit) => lit.value,
                        _ => 0,
                    })
                    .collect::<Vec<_>>();
                // Nest the new instantiation's scope under the scope the
                // `MetaDecl` itself lives in, not always the compilation
                // root — the shadow rule's ancestor-chain lookup depends
                // on actually finding the `MetaDecl`'s own binding there.
                let parent_scope = containing_unit
                    .and_then(|unit| ctx.unit_scopes.get(&unit).copied())
                    .unwrap_or(ctx.root_scope);
                (target, name, values, parent_scope)
            }
            _ => panic!("instantiate called on a non-MetaInstantiationExpr node"),
        };

        let key = (meta_decl, arg_values.clone());
        if let Some(&cached) = self.instantiation_cache.get(&key) {
            log::debug!("instantiation cache hit for `{}`{:?}", ctx.interner.resolve(meta_name), arg_values);
            return Ok(cached);
        }
        log::debug!("instantiating `{}`{:?}", ctx.interner.resolve(meta_name), arg_values);

        let func_id = meta::codegen_emitter(ctx, &mut self.backend, &mut self.active_metas, meta_decl, &arg_values)?;
        self.backend
            .module
            .finalize_definitions()
            .map_err(|e| crate::error::bug!(ctx.diagnostics, crate::pos::Span::default(), "failed to finalize emitter definitions: {}", e))?;
        let code_ptr = self.backend.module.get_finalized_function(func_id);
        let emit_fn: extern "C" fn(i64) = unsafe { std::mem::transmute(code_ptr) };

        let handle = push_session(&mut ctx.ast as *mut Ast);
        emit_fn(handle);
        let session = take_session(handle);
        let layout = session.writer.build();
        log::trace!("emitter for `{}` produced {} layout tokens", ctx.interner.resolve(meta_name), layout.len());

        let unit = crate::reader::structure_meta_unit(ctx, &layout, inst, meta_decl, meta_name, parent_scope)?;
        crate::sema::check_unit(ctx, unit)?;
        // Any `FunctionDecl` this instantiation exported needs a `FuncId`
        // before function codegen reaches a call through it — declared
        // here rather than left to `codegen_functions`, which only walks
        // the original compilation unit's own top-level declarations.
        self.declare_functions(ctx, unit)?;

        let exported = match ctx.ast.get(unit) {
            Node::MetaUnit(u) => u.exported_node.expect("structure_meta_unit fails if no node is exported"),
            _ => unreachable!(),
        };

        if let Node::MetaInstantiationExpr(e) = ctx.ast.get_mut(inst) {
            e.resolved = Some(exported);
        }

        self.instantiation_cache.insert(key, unit);
        Ok(unit)
    }
}

impl Default for Executor {
    fn default() -> Self { Self::new() }
}
