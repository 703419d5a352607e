//! CLI entry point. Thin wrapper around `metac::driver`, in the shape of
//! the teacher's `std-compile` binary: parse argv with `getopts`, build an
//! invocation struct, run it, set the process exit code.

use getopts::Options;
use std::env;
use std::io::Write;

use metac::driver::{CompilerInvocation, EmitPhase};

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} FILE [options]", program);
    print!("{}", opts.usage(&brief));
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optflag("", "emit-tokens", "stop after lexing and dump the token stream as YAML");
    opts.optflag("", "emit-flat-layout", "stop after parsing and dump the flat layout as YAML");
    opts.optflag("", "emit-layout", "stop after parsing and dump the structured (unresolved) layout as YAML");
    opts.optflag("", "emit-ast", "stop after name resolution and dump the resolved AST as YAML");
    opts.optopt("O", "", "optimization level for runtime code (0-3, default 0)", "LEVEL");
    opts.optflagmulti("v", "verbose", "increase diagnostic verbosity (repeatable)");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            eprintln!("error: {}", f);
            print_usage(&program, &opts);
            std::process::exit(1);
        }
    };

    if matches.opt_present("help") || matches.free.is_empty() {
        print_usage(&program, &opts);
        std::process::exit(if matches.opt_present("help") { 0 } else { 1 });
    }

    let emit = match (
        matches.opt_present("emit-tokens"),
        matches.opt_present("emit-flat-layout"),
        matches.opt_present("emit-layout"),
        matches.opt_present("emit-ast"),
    ) {
        (true, false, false, false) => Some(EmitPhase::Tokens),
        (false, true, false, false) => Some(EmitPhase::FlatLayout),
        (false, false, true, false) => Some(EmitPhase::Layout),
        (false, false, false, true) => Some(EmitPhase::Ast),
        (false, false, false, false) => None,
        _ => {
            eprintln!("error: at most one -emit-* flag may be given");
            std::process::exit(1);
        }
    };

    let opt_level: u8 = match matches.opt_get_default("O", 0u8) {
        Ok(level) if level <= 3 => level,
        Ok(_) => {
            eprintln!("error: -O accepts 0-3");
            std::process::exit(1);
        }
        Err(f) => {
            eprintln!("error: {}", f);
            std::process::exit(1);
        }
    };

    // -v is repeatable; each occurrence steps down a level from warnings-only,
    // matching the teacher's "verbosity as log level" convention. An explicit
    // `RUST_LOG` always wins.
    let verbosity = matches.opt_count("verbose");
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let invocation = CompilerInvocation { input_path: matches.free[0].clone(), emit, opt_level };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let ok = metac::driver::run(&invocation, &mut out);
    out.flush().expect("flush stdout");

    std::process::exit(if ok { 0 } else { 1 });
}
