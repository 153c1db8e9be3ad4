//! Lantern interpreter CLI.
//!
//! Compiles and runs a single Lantern source file.
//!
//! # Usage
//! ```text
//! lantern <file> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `file`: Lantern source file to run
//!
//! # Options
//! - `--stack-size <n>`: Evaluation stack capacity (default 64)
//! - `--call-depth <n>`: Macro call stack capacity (default 64)
//! - `--max-steps <n>`: Stop after `n` executed instructions
//! - `--profile`: Print the executed-instruction profile after a normal halt
//! - `-v, --verbose`: Info-level logging
//! - `--trace`: Log every executed instruction
//!
//! Exits with 0 on a normal halt and 1 on any argument, file, compile or
//! runtime error.

use lantern::utils::log::{Level, set_max_level};
use lantern::virtual_machine::compiler::{compile_source, read_source, render_diagnostic};
use lantern::virtual_machine::vm::{ExecProfile, ProgramState, VmConfig};
use lantern::{error, info, warn};
use std::env;
use std::io::{self, BufWriter, Write};
use std::process;
use std::str::FromStr;

fn main() {
    let args: Vec<String> = env::args().collect();
    let program_name = args.first().map(String::as_str).unwrap_or("lantern");

    let mut path: Option<&str> = None;
    let mut positional = 0usize;
    let mut config = VmConfig::default();
    let mut profile = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage(program_name);
                process::exit(0);
            }
            k @ ("--stack-size" | "--call-depth" | "--max-steps") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                config = match k {
                    "--stack-size" => config.with_stack_capacity(parse_capacity(k, &args[i])),
                    "--call-depth" => config.with_call_stack_capacity(parse_capacity(k, &args[i])),
                    _ => config.with_max_steps(parse_count(k, &args[i])),
                };
                i += 1;
            }
            "--profile" => {
                profile = true;
                i += 1;
            }
            "-v" | "--verbose" => {
                set_max_level(Level::Info);
                i += 1;
            }
            "--trace" => {
                set_max_level(Level::Debug);
                i += 1;
            }
            other if other.starts_with('-') && other.len() > 1 => {
                error!("Unexpected argument: {}\n", other);
                print_usage(program_name);
                process::exit(1);
            }
            other => {
                positional += 1;
                path.get_or_insert(other);
                i += 1;
            }
        }
    }

    let path = match (path, positional) {
        (Some(p), 1) => p,
        (_, 0) => {
            eprintln!("Too few arguments supplied. Usage: {program_name} <filepath>");
            process::exit(1);
        }
        _ => {
            eprintln!("Too many arguments supplied. Usage: {program_name} <filepath>");
            process::exit(1);
        }
    };

    let source = read_source(path).unwrap_or_else(|e| {
        eprint!("{}", render_diagnostic(path, "", &e));
        process::exit(1)
    });

    let program = compile_source(&source).unwrap_or_else(|e| {
        eprint!("{}", render_diagnostic(path, &source, &e));
        process::exit(1)
    });

    info!("Running {} ({} instructions)", path, program.len());

    let mut state = ProgramState::new(program, config);
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let result = state.run(&mut out);
    let flushed = out.flush();

    match result {
        Ok(code) => {
            if let Err(e) = flushed {
                error!("Failed to write program output: {e}");
                process::exit(1);
            }
            info!(
                "Halted with code {} after {} step(s)",
                code,
                state.steps()
            );
            if profile {
                print_profile(state.profile());
            }
            process::exit(code);
        }
        Err(e) => {
            eprint!("{}", render_diagnostic(path, &source, &e));
            process::exit(1);
        }
    }
}

fn parse_count<T: FromStr>(flag: &str, value: &str) -> T {
    value.parse::<T>().unwrap_or_else(|_| {
        error!("Invalid value for {flag}: '{value}' is not a valid number");
        process::exit(1);
    })
}

fn parse_capacity(flag: &str, value: &str) -> usize {
    let capacity = parse_count(flag, value);
    if capacity == 0 {
        warn!("{flag} is 0: the first push onto that stack will overflow");
    }
    capacity
}

/// Prints the per-category instruction counts to stderr.
fn print_profile(profile: &ExecProfile) {
    let total_u = profile.total();
    let total = total_u as f64;

    let cat_w = 2 + profile
        .iter()
        .map(|(c, _)| c.as_str().chars().count())
        .max()
        .unwrap_or(0)
        .max("total".chars().count());

    let amt_w = profile
        .iter()
        .map(|(_, a)| format_with_commas(a).chars().count())
        .max()
        .unwrap_or(0)
        .max(format_with_commas(total_u).chars().count());

    let dash_w = cat_w + 1 + amt_w + 2 + "( 100.0%)".len();

    eprintln!("Execution Profile:");
    eprintln!("{}", "-".repeat(dash_w));

    for (category, amount) in profile.iter() {
        if amount == 0 {
            continue;
        }

        let percent = if total > 0.0 {
            (amount as f64 / total) * 100.0
        } else {
            0.0
        };

        eprintln!(
            "{:<cat_w$} {:>amt_w$} ({:>5.1}%)",
            category.as_str(),
            format_with_commas(amount),
            percent,
        );
    }

    eprintln!("{}", "-".repeat(dash_w));
    eprintln!(
        "{:<cat_w$} {:>amt_w$} ({:>5.1}%)",
        "total",
        format_with_commas(total_u),
        100.0,
    );
}

fn format_with_commas(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}

const USAGE: &str = "\
Lantern Interpreter

USAGE:
    {program} <file> [OPTIONS]

ARGS:
    <file>    Lantern source file to run

OPTIONS:
    --stack-size <n>    Evaluation stack capacity (default 64)
    --call-depth <n>    Macro call stack capacity (default 64)
    --max-steps <n>     Stop after n executed instructions
    --profile           Print the executed-instruction profile after a normal halt
    -v, --verbose       Log compile and run summaries
    --trace             Log every executed instruction
    -h, --help          Print this help message

EXAMPLES:
    # Run a program
    {program} hello.lan

    # Run with a bigger stack and a step budget
    {program} loop.lan --stack-size 256 --max-steps 100000

    # Show where execution time went
    {program} loop.lan --profile
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
