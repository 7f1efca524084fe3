// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! W compiler CLI
//!
//! Compiles a parse-tree JSON file to node graphs.
//!
//! Usage:
//!
//! ```text
//! weave-compile --input <path> [--output <path>] [--reference <name>]... [--debug]
//! ```
//!
//! Example:
//!
//! ```text
//! weave-compile --input orders.json --output orders.graph.json
//! ```

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use weave_dsl::spec::generate_parse_tree_schema;
use weave_workflows::{CompilationInput, CompilerConfig, compile_with_config};

fn print_usage() {
    eprintln!(
        r#"Usage: weave-compile [OPTIONS]

Compile a W parse-tree JSON file to runtime node graphs.

OPTIONS:
    --input <path>       Path to parse-tree JSON file (required)
    --output <path>      Output file for the node graphs (default: stdout)
    --reference <name>   Reference passed to the oracle (repeatable)
    --debug              Include the model programs in the output
    --schema             Print the parse-tree JSON schema and exit
    --help               Show this help message

ENVIRONMENT:
    WEAVE_ORACLE_CMD     External frontend command (default: in-process resolver)
    WEAVE_REFERENCES     ':'-separated references passed to the oracle
    WEAVE_MAX_EXPR_DEPTH Expression rewriter recursion limit (default: 64)
    WEAVE_DEBUG          Include model programs in the output (default: false)
    RUST_LOG             Log filter (default: warn)

EXAMPLES:
    # Compile to a file
    weave-compile --input orders.json --output orders.graph.json

    # Compile with an external frontend
    WEAVE_ORACLE_CMD="weave-frontend --stdio" weave-compile --input orders.json
"#
    );
}

struct Args {
    input_path: PathBuf,
    output_path: Option<PathBuf>,
    references: Vec<String>,
    debug_mode: bool,
}

enum Command {
    Compile(Args),
    Schema,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();

    let mut input_path: Option<PathBuf> = None;
    let mut output_path: Option<PathBuf> = None;
    let mut references = Vec::new();
    let mut debug_mode = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--schema" => return Ok(Command::Schema),
            "--input" => {
                i += 1;
                if i >= args.len() {
                    return Err("--input requires a path".to_string());
                }
                input_path = Some(PathBuf::from(&args[i]));
            }
            "--output" => {
                i += 1;
                if i >= args.len() {
                    return Err("--output requires a path".to_string());
                }
                output_path = Some(PathBuf::from(&args[i]));
            }
            "--reference" => {
                i += 1;
                if i >= args.len() {
                    return Err("--reference requires a name".to_string());
                }
                references.push(args[i].clone());
            }
            "--debug" => {
                debug_mode = true;
            }
            arg => {
                return Err(format!("Unknown argument: {}", arg));
            }
        }
        i += 1;
    }

    let input_path = input_path.ok_or("--input is required")?;

    Ok(Command::Compile(Args {
        input_path,
        output_path,
        references,
        debug_mode,
    }))
}

fn main() -> ExitCode {
    // Initialize minimal logging (default to warn if RUST_LOG not set)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = match parse_args() {
        Ok(Command::Compile(args)) => args,
        Ok(Command::Schema) => {
            match serde_json::to_string_pretty(&generate_parse_tree_schema()) {
                Ok(schema) => {
                    println!("{}", schema);
                    return ExitCode::SUCCESS;
                }
                Err(e) => {
                    eprintln!("Error encoding schema: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let mut config = match CompilerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    config.debug |= args.debug_mode;

    // Read parse tree
    let text = match fs::read_to_string(&args.input_path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error reading input file {:?}: {}", args.input_path, e);
            return ExitCode::FAILURE;
        }
    };

    let program = match weave_dsl::parse_program_str(&text) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Error parsing input: {}", e);
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Compiling {:?}: {} unit(s)",
        args.input_path,
        program.units.len()
    );

    let input = CompilationInput {
        program,
        references: args.references,
    };

    let output = match compile_with_config(&input, &config) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Compilation failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let json = match serde_json::to_string_pretty(&output) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error encoding output: {}", e);
            return ExitCode::FAILURE;
        }
    };

    eprintln!("Compilation successful:");
    eprintln!("  Activities: {}", output.activities.len());
    eprintln!("  Checksum: {}", output.checksum);

    match args.output_path {
        Some(output_path) => {
            if let Err(e) = fs::write(&output_path, json) {
                eprintln!("Error writing output to {:?}: {}", output_path, e);
                return ExitCode::FAILURE;
            }
            // Print final path to stdout for scripts to capture
            println!("{}", output_path.display());
        }
        None => println!("{}", json),
    }

    ExitCode::SUCCESS
}
