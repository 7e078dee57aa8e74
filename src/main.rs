// uscript: featherweight scripting language.
//
// Copyright (C) 2026  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs;
use std::path::PathBuf;
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use uscript::scanner;
use uscript::vm::{disassemble_source, InterpretResult, Vm};
use uscript::{selftest, Config};

#[derive(Parser)]
#[command(name = "uscript")]
#[command(version)]
#[command(about = "A featherweight scripting language", long_about = None)]
struct Cli {
    /// Evaluate the given command
    #[arg(short = 'c', long = "command", value_name = "CMD")]
    commands: Vec<String>,

    /// Print the token stream of the given command
    #[arg(short = 'x', long = "lex", value_name = "CMD")]
    lex: Vec<String>,

    /// Compile the given command and print its bytecode
    #[arg(long = "dis", value_name = "CMD")]
    dis: Vec<String>,

    /// Enable debug traces (chunk dumps and per-instruction execution)
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Run the embedded smoke tests
    #[arg(long)]
    tests: bool,

    /// Interpreter configuration file (RON)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Script files to run in order
    files: Vec<PathBuf>,
}

fn exit_code(result: InterpretResult) -> i32 {
    match result {
        InterpretResult::Ok => 0,
        InterpretResult::CompileError => 65,
        InterpretResult::RuntimeError => 70,
    }
}

fn run_file(path: &PathBuf, config: &Config) -> InterpretResult {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: couldn't read {}: {}", path.display(), e);
            process::exit(1);
        }
    };
    let mut vm = Vm::new(config);
    vm.interpret_source(&source)
}

fn repl(config: &Config) -> i32 {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Error: couldn't start the line editor: {}", e);
            return 1;
        }
    };
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(&line);
                let mut vm = Vm::new(config);
                vm.interpret_source(&line);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return 0,
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("trace")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
        None => Config::default(),
    };
    if cli.debug {
        config.debug_trace = true;
        config.debug_parser = true;
    }
    debug!(trace = config.debug_trace, files = cli.files.len(), "starting");

    if cli.tests {
        selftest::run_all(&config);
        return;
    }

    for command in &cli.lex {
        scanner::scan_and_print(command);
    }

    let mut worst = 0;
    for command in &cli.dis {
        worst = worst.max(exit_code(disassemble_source(command, &config)));
    }
    for command in &cli.commands {
        let mut vm = Vm::new(&config);
        worst = worst.max(exit_code(vm.interpret_source(command)));
    }
    for file in &cli.files {
        worst = worst.max(exit_code(run_file(file, &config)));
    }

    let ran_something = !cli.lex.is_empty()
        || !cli.dis.is_empty()
        || !cli.commands.is_empty()
        || !cli.files.is_empty();
    if !ran_something {
        worst = repl(&config);
    }
    process::exit(worst);
}
