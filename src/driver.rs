//! Top-level compiler invocation: wires parsing, structuring, semantic
//! check, and codegen into the single pipeline `bin/metac.rs` drives,
//! following the same read-options/run-phases/report shape as the
//! teacher's `std-compile` binary (`examples/zero318-truth/src/bin/std-compile.rs`).

use std::io::Write;

use cranelift_module::Module;

use crate::context::CompilerContext;
use crate::executor::Executor;

/// Which phase to stop after and dump, or `None` to run the whole pipeline
/// through to object output. Mirrors the four `-emit-*` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitPhase {
    Tokens,
    FlatLayout,
    Layout,
    Ast,
}

/// Options for one compiler invocation, parsed out of argv by `bin/metac.rs`.
#[derive(Debug, Clone)]
pub struct CompilerInvocation {
    pub input_path: String,
    pub emit: Option<EmitPhase>,
    /// `0..=3`, mapped onto Cranelift's `opt_level` setting.
    pub opt_level: u8,
}

impl CompilerInvocation {
    fn cranelift_opt_level(&self) -> &'static str {
        match self.opt_level {
            0 => "none",
            1 | 2 => "speed",
            _ => "speed_and_size",
        }
    }
}

/// Runs one invocation to completion, writing dumps/object output to
/// `out` and diagnostics to `ctx`'s own stderr renderer. Returns `true` on
/// success (exit code 0), `false` if any phase reported an error.
pub fn run(invocation: &CompilerInvocation, out: &mut impl Write) -> bool {
    let mut ctx = CompilerContext::new();
    let ok = run_with_context(&mut ctx, invocation, out);
    if !ok {
        ctx.diagnostics.emit_to_stderr(&ctx.files);
    }
    ok
}

fn run_with_context(ctx: &mut CompilerContext, invocation: &CompilerInvocation, out: &mut impl Write) -> bool {
    log::debug!("reading {}", invocation.input_path);
    let source = match std::fs::read(&invocation.input_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: couldn't read {}: {}", invocation.input_path, e);
            return false;
        }
    };

    // Step 1/2: read options (done by the caller) and produce a flat layout.
    if invocation.emit == Some(EmitPhase::Tokens) {
        let file_id = ctx.files.add(&invocation.input_path, &source);
        let text = match std::str::from_utf8(&source) {
            Ok(t) => t,
            Err(_) => {
                eprintln!("error: {} is not valid UTF-8", invocation.input_path);
                return false;
            }
        };
        return match crate::parse::dump_tokens(ctx, file_id, text) {
            Ok(tokens) => {
                write_yaml(out, &crate::dump::dump_token_list(&tokens));
                true
            }
            Err(_) => false,
        };
    }

    let (_file_id, layout) = match crate::parse::parse_source(ctx, &invocation.input_path, &source) {
        Ok(result) => result,
        Err(_) => return false,
    };

    if invocation.emit == Some(EmitPhase::FlatLayout) {
        write_yaml(out, &crate::dump::dump_flat_layout(&ctx.ast, &ctx.interner, &layout));
        return true;
    }
    if invocation.emit == Some(EmitPhase::Layout) {
        write_yaml(out, &crate::dump::dump_layout(&ctx.ast, &ctx.interner, &layout));
        return true;
    }

    // Step 3: structure into a `CompilationUnit`, running two-phase
    // resolution.
    let unit = match crate::reader::structure_compilation_unit(ctx, &layout) {
        Ok(unit) => unit,
        Err(_) => return false,
    };

    if invocation.emit == Some(EmitPhase::Ast) {
        write_yaml(out, &crate::dump::dump_ast(&ctx.ast, &ctx.interner, unit));
        return true;
    }

    // Step 4: semantic check.
    if crate::sema::check_unit(ctx, unit).is_err() {
        return false;
    }

    // Steps 5-6: codegen every function, instantiating every meta call its
    // body transitively reaches, on the single shared backend.
    let mut executor = Executor::with_opt_level(invocation.cranelift_opt_level());
    if executor.declare_functions(ctx, unit).is_err() {
        return false;
    }
    if executor.codegen_functions(ctx, unit).is_err() {
        return false;
    }

    if executor.backend.module.finalize_definitions().is_err() {
        return false;
    }

    let names: Vec<(String, cranelift_module::FuncId)> = executor
        .function_ids()
        .iter()
        .filter_map(|(&node, &id)| match ctx.ast.get(node) {
            crate::ast::Node::FunctionDecl(d) => Some((ctx.interner.resolve(d.name.value).to_owned(), id)),
            _ => None,
        })
        .collect();
    write!(out, "{}", executor.backend.dump_ir(&names)).expect("write to output sink");

    // Step 7: success iff nothing reported an error along the way.
    !ctx.has_errors()
}

fn write_yaml(out: &mut impl Write, value: &serde_yaml::Value) {
    let rendered = serde_yaml::to_string(value).expect("value is always serializable");
    write!(out, "{}", rendered).expect("write to output sink");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    struct TempFile(std::path::PathBuf);

    impl TempFile {
        fn new(tag: &str, contents: &str) -> Self {
            let mut path = std::env::temp_dir();
            path.push(format!("metac-driver-test-{}-{}.metac", std::process::id(), tag));
            std::fs::File::create(&path).unwrap().write_all(contents.as_bytes()).unwrap();
            TempFile(path)
        }
        fn path_str(&self) -> String { self.0.to_string_lossy().into_owned() }
    }

    impl Drop for TempFile {
        fn drop(&mut self) { let _ = std::fs::remove_file(&self.0); }
    }

    #[test]
    fn emit_ast_dumps_without_running_codegen() {
        let file = TempFile::new("emit-ast", "const int x = 1;");
        let invocation = CompilerInvocation { input_path: file.path_str(), emit: Some(EmitPhase::Ast), opt_level: 0 };
        let mut out = Vec::new();
        assert!(run(&invocation, &mut out));
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("GlobalConstantDecl"));
    }

    #[test]
    fn full_pipeline_emits_object_ir_for_a_simple_program() {
        let file = TempFile::new("full-pipeline", "int main() { return 1; }");
        let invocation = CompilerInvocation { input_path: file.path_str(), emit: None, opt_level: 0 };
        let mut out = Vec::new();
        assert!(run(&invocation, &mut out));
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("main"));
    }

    #[test]
    fn unknown_name_fails_the_whole_invocation() {
        let file = TempFile::new("unknown-name", "int main() { return bogus(); }");
        let invocation = CompilerInvocation { input_path: file.path_str(), emit: None, opt_level: 0 };
        let mut out = Vec::new();
        assert!(!run(&invocation, &mut out));
    }
}
