//! End-to-end scenarios driven through the public `driver::run` entry
//! point, exactly as `bin/metac.rs` invokes it — each one source text in,
//! pass/fail and (where useful) the printed IR out.

use pretty_assertions::assert_eq;

use metac::driver::{run, CompilerInvocation, EmitPhase};

struct TempFile(std::path::PathBuf);

impl TempFile {
    fn new(tag: &str, contents: &str) -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("metac-scenario-{}-{}.metac", std::process::id(), tag));
        std::fs::write(&path, contents).unwrap();
        TempFile(path)
    }
    fn path_str(&self) -> String { self.0.to_string_lossy().into_owned() }
}

impl Drop for TempFile {
    fn drop(&mut self) { let _ = std::fs::remove_file(&self.0); }
}

fn compile(src: &str) -> (bool, String) {
    let file = TempFile::new(&format!("{:x}", md5_like(src)), src);
    let invocation = CompilerInvocation { input_path: file.path_str(), emit: None, opt_level: 0 };
    let mut out = Vec::new();
    let ok = run(&invocation, &mut out);
    (ok, String::from_utf8(out).unwrap())
}

fn compile_with_emit(src: &str, emit: EmitPhase) -> (bool, String) {
    let file = TempFile::new(&format!("{:x}-emit", md5_like(src)), src);
    let invocation = CompilerInvocation { input_path: file.path_str(), emit: Some(emit), opt_level: 0 };
    let mut out = Vec::new();
    let ok = run(&invocation, &mut out);
    (ok, String::from_utf8(out).unwrap())
}

/// A source text is unique enough per test that we just need *a* stable,
/// collision-resistant tag for the temp file name; a real hash would be
/// overkill for this.
fn md5_like(src: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    src.hash(&mut hasher);
    hasher.finish()
}

// S1: a meta decl that only ever exports a constant.
#[test]
fn s1_constant_export() {
    let (ok, ir) = compile(r#"
        meta double<int n> {
            const int double = 0;
        }
        int main() { return double<21>; }
    "#);
    assert!(ok, "{}", ir);
    assert!(ir.contains("main"));
}

// S2: a meta decl exporting a function, instantiated and called.
#[test]
fn s2_function_template() {
    let (ok, ir) = compile(r#"
        meta adder<int k> {
            int adder(int x) { return x + k; }
        }
        int main() { return adder<3>(4); }
    "#);
    assert!(ok, "{}", ir);
    assert!(ir.contains("main"));
}

// S3: a meta-if picks which branch's declaration gets exported.
#[test]
fn s3_meta_if_selects_branch() {
    let (ok, ir) = compile(r#"
        meta pick<int n> {
            meta if (n) {
                const int pick = 1;
            } else {
                const int pick = 0;
            }
        }
        int main() { return pick<1>; }
    "#);
    assert!(ok, "{}", ir);
}

// S9: both meta-if branches are independently reachable from distinct
// instantiations of the same meta decl.
#[test]
fn s9_meta_if_both_branches_reachable() {
    let (ok, ir) = compile(r#"
        meta pick<int n> {
            meta if (n) {
                const int pick = 1;
            } else {
                const int pick = 0;
            }
        }
        int main() { return pick<1> + pick<0>; }
    "#);
    assert!(ok, "{}", ir);
}

// S4: a meta-calculation computes a value and exports it under the meta
// decl's own name via the `introduce` callback.
#[test]
fn s4_exported_binding_via_meta_calculation() {
    let (ok, ir) = compile(r#"
        meta doubled<int n> {
            meta calc {
                int doubled = n * 2;
            }
        }
        int main() { return doubled<21>; }
    "#);
    assert!(ok, "{}", ir);
}

// S5: calling a function with the wrong number of arguments is an error,
// caught before any code is generated.
#[test]
fn s5_arity_error() {
    let (ok, ir) = compile(r#"
        int add(int a, int b) { return a + b; }
        int main() { return add(1); }
    "#);
    assert!(!ok, "{}", ir);
}

// S6: referencing an undeclared name is an error.
#[test]
fn s6_unknown_name() {
    let (ok, ir) = compile(r#"
        int main() { return bogus; }
    "#);
    assert!(!ok, "{}", ir);
}

// S7: `int` is reserved and cannot be used as a declaration name, at any
// declaration site (top-level, parameter, or local).
#[test]
fn s7_reserved_name_rejected() {
    let (ok, _) = compile("int int() { return 0; }");
    assert!(!ok);

    let (ok, _) = compile("int f(int int) { return int; }");
    assert!(!ok);
}

// S8: instantiating the same meta decl with the same arguments twice
// reuses the cached instantiation rather than generating it again — the
// amalgamation module should only ever define one function for it.
#[test]
fn s8_instantiation_cache_identity() {
    let (ok, ir) = compile(r#"
        meta id<int n> {
            int id(int x) { return x + n; }
        }
        int main() { return id<5>(1) + id<5>(2); }
    "#);
    assert!(ok, "{}", ir);
    let occurrences = ir.matches("; function id").count();
    assert_eq!(occurrences, 1, "expected the cached instantiation to be defined exactly once:\n{}", ir);
}

// S10: the shadow rule only exempts a meta decl's export re-declaring its
// own name (already exercised by S1/S4). A contributed declaration that
// collides with an unrelated outer-unit name is a real redeclaration and
// must still be rejected.
#[test]
fn s10_shadow_rule_rejects_unrelated_collision() {
    let (ok, ir) = compile(r#"
        const int other = 2;
        meta make<int n> {
            const int other = 1;
        }
        int main() { return make<1> + other; }
    "#);
    assert!(!ok, "{}", ir);
}

// S11: `meta calc` written directly inside an ordinary (non-templated)
// function body runs for its side effect on local state and codegens
// without going through the meta-instantiation JIT path at all — it used
// to panic with `unreachable!()` in ordinary function codegen.
#[test]
fn s11_meta_calc_inside_ordinary_function() {
    let (ok, ir) = compile(r#"
        int twice(int x) {
            int y = 0;
            meta calc {
                y = x + x;
            }
            return y;
        }
        int main() { return twice(4); }
    "#);
    assert!(ok, "{}", ir);
    assert!(ir.contains("twice"));
}

#[test]
fn emit_ast_stops_before_codegen_and_dumps_yaml() {
    let (ok, dump) = compile_with_emit("const int x = 1;", EmitPhase::Ast);
    assert!(ok, "{}", dump);
    assert!(dump.contains("kind: GlobalConstantDecl"));
    assert!(!dump.contains("function"), "emit-ast must not run codegen:\n{}", dump);
}

#[test]
fn emit_tokens_stops_before_parsing() {
    let (ok, dump) = compile_with_emit("const int x = 1;", EmitPhase::Tokens);
    assert!(ok, "{}", dump);
    assert!(dump.contains("kind: KwConst"));
}
