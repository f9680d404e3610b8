use clap::Parser as ClapParser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use zelo::language::parser::parse_source;
use zelo::runtime::Interpreter;
use zelo::tools::diagnostics::{emit_syntax_errors, report_runtime_error};

#[derive(Debug, ClapParser)]
#[command(
    name = "zelo",
    version,
    about = "Interpreter for the Zelo scripting language",
    disable_version_flag = true
)]
struct Cli {
    /// Script to run; starts the REPL when omitted.
    #[arg(value_name = "SCRIPT")]
    script: Option<PathBuf>,

    /// Print version information.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Check syntax (lex, macro expansion, parse) without executing.
    #[arg(short = 'c', long = "check")]
    check: bool,

    /// Execute one line of code.
    #[arg(short = 'e', long = "eval", value_name = "CODE", conflicts_with = "script")]
    eval: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(code) = cli.eval {
        return run_source("<eval>", &code, cli.check);
    }
    match cli.script {
        Some(path) => {
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(error) => {
                    eprintln!("Failed to read {}: {error}", path.display());
                    return ExitCode::FAILURE;
                }
            };
            let name = path.display().to_string();
            run_source(&name, &source, cli.check)
        }
        None => run_repl(),
    }
}

fn run_source(name: &str, source: &str, check_only: bool) -> ExitCode {
    let statements = match parse_source(source) {
        Ok(statements) => statements,
        Err(errors) => {
            emit_syntax_errors(name, source, &errors.errors);
            return ExitCode::FAILURE;
        }
    };
    if check_only {
        println!("Syntax check passed for {name}");
        return ExitCode::SUCCESS;
    }
    let mut interpreter = Interpreter::new();
    match interpreter.interpret(&statements) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report_runtime_error(&error);
            ExitCode::FAILURE
        }
    }
}

fn run_repl() -> ExitCode {
    println!("Zelo {} (type 'exit' to quit, 'help' for help)", env!("CARGO_PKG_VERSION"));

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(error) => {
            eprintln!("Could not initialize the REPL: {error}");
            return ExitCode::FAILURE;
        }
    };
    let mut interpreter = Interpreter::new();

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match line {
                    "exit" | "quit" => break,
                    "help" => {
                        println!("REPL commands:");
                        println!("  exit, quit  - leave the REPL");
                        println!("  help        - show this help");
                        println!("  clear       - clear the screen");
                        continue;
                    }
                    "clear" => {
                        print!("\x1b[2J\x1b[1;1H");
                        continue;
                    }
                    _ => {}
                }

                // Errors are reported per line; the session continues.
                match parse_source(line) {
                    Ok(statements) => {
                        if let Err(error) = interpreter.interpret(&statements) {
                            report_runtime_error(&error);
                        }
                    }
                    Err(errors) => emit_syntax_errors("<repl>", line, &errors.errors),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(error) => {
                eprintln!("REPL error: {error}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
