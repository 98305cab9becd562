//! armatch CLI: load an assembly listing, then run signature files, scan
//! for a one-shot pattern, or start the interactive tester.

use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process;

use tracing_subscriber::EnvFilter;

use armatch::engine::match_result::MatchResult;
use armatch::engine::program::Program;
use armatch::{repl, sig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("armatch v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    armatch [OPTIONS] <LISTING>");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help            Print this help message");
    eprintln!("    -v, --version         Print version information");
    eprintln!("    -p, --pattern <PAT>   Scan the listing for a pattern and print matches");
    eprintln!("    -s, --sigs <PATH>     Run signature file(s) against the listing");
    eprintln!("    -o, --output <DIR>    Directory for signature match results");
    eprintln!("    --repl                Start the interactive pattern tester");
    eprintln!();
    eprintln!("ARGUMENTS:");
    eprintln!("    <LISTING>             Assembly listing file (use '-' for stdin)");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    armatch firmware.lst -p 'bl @:target'");
    eprintln!("    armatch firmware.lst -s signatures/");
    eprintln!("    armatch firmware.lst --repl");
}

struct Options {
    input: Option<String>,
    pattern: Option<String>,
    sigs: Option<String>,
    output: Option<String>,
    repl_mode: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut input = None;
    let mut pattern = None;
    let mut sigs = None;
    let mut output = None;
    let mut repl_mode = false;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-v" | "--version" => {
                println!("armatch {}", VERSION);
                process::exit(0);
            }
            "-p" | "--pattern" => {
                i += 1;
                if i >= args.len() {
                    return Err("missing pattern after -p".to_string());
                }
                pattern = Some(args[i].clone());
            }
            "-s" | "--sigs" => {
                i += 1;
                if i >= args.len() {
                    return Err("missing path after -s".to_string());
                }
                sigs = Some(args[i].clone());
            }
            "-o" | "--output" => {
                i += 1;
                if i >= args.len() {
                    return Err("missing directory after -o".to_string());
                }
                output = Some(args[i].clone());
            }
            "--repl" => {
                repl_mode = true;
            }
            arg if arg.starts_with('-') && arg != "-" => {
                return Err(format!("unknown option: {}", arg));
            }
            arg => {
                if input.is_some() {
                    return Err("multiple input files specified".to_string());
                }
                input = Some(arg.to_string());
            }
        }
        i += 1;
    }

    Ok(Options {
        input,
        pattern,
        sigs,
        output,
        repl_mode,
    })
}

fn read_input(input: &str) -> Result<String, String> {
    if input == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| format!("failed to read from stdin: {}", e))?;
        Ok(buffer)
    } else {
        let path = Path::new(input);
        if !path.exists() {
            return Err(format!("input file not found: {}", input));
        }
        fs::read_to_string(path).map_err(|e| format!("failed to read '{}': {}", input, e))
    }
}

/// Loads a listing into a program: blank-line-separated sections become
/// separate code blocks.
fn load_listing(text: &str) -> Result<Program, String> {
    let mut program = Program::new();
    for section in text.split("\n\n") {
        if section.trim().is_empty() {
            continue;
        }
        program
            .add_code_block(section, None)
            .map_err(|e| e.to_string())?;
    }
    Ok(program)
}

fn run_pattern(program: &Program, source: &str) -> Result<String, String> {
    let pattern = program.create_pattern(source).map_err(|e| e.to_string())?;
    let mut mr = MatchResult::new();
    let matches = program
        .find_all(&pattern, &mut mr, None)
        .map_err(|e| e.to_string())?;

    let mut out = String::new();
    for cursor in &matches {
        match cursor.address(program) {
            Some(a) => out.push_str(&format!("match at 0x{:X}\n", a)),
            None => out.push_str("match at unaddressed cursor\n"),
        }
    }
    if matches.is_empty() {
        out.push_str("no matches\n");
    } else {
        out.push_str(&format!(
            "{}\n",
            serde_json::to_string_pretty(&mr.to_obj()).unwrap_or_default()
        ));
    }
    Ok(out)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let options = match parse_args() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    let input = match &options.input {
        Some(input) => input,
        None => {
            eprintln!("error: missing input listing");
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    let text = match read_input(input) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    let program = match load_listing(&text) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    if options.repl_mode {
        repl::run(&program);
        return;
    }

    if let Some(source) = &options.pattern {
        match run_pattern(&program, source) {
            Ok(out) => print!("{}", out),
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    if let Some(sigs_path) = &options.sigs {
        let out_dir = options.output.as_deref().map(Path::new);
        match sig::run_signature_files(&program, Path::new(sigs_path), out_dir) {
            Ok(written) => {
                for path in written {
                    println!("{}", path.display());
                }
            }
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    eprintln!("error: nothing to do (use -p, -s or --repl)");
    process::exit(1);
}
