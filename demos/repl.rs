use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use sexpeval::{EvalConfig, Interpreter, ParseConfig, Value};
use std::process;
use tracing_subscriber::EnvFilter;

const PROMPT: &str = "sexpeval> ";
const CONTINUATION: &str = "........> ";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run_repl() {
        eprintln!("The REPL encountered an unexpected error and must exit.");
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run_repl() -> Result<(), Box<dyn std::error::Error>> {
    println!("sexpeval - a small s-expression interpreter");
    println!("Enter expressions like: (+ 1 2)");
    println!("Unclosed parentheses continue on the next line; an empty line closes them.");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let config = ParseConfig {
        handle_comments: true,
    };
    let interpreter = Interpreter::with_config(config, EvalConfig::default())?;

    // Load a source file given on the command line before reading input
    if let Some(path) = std::env::args().nth(1) {
        match interpreter.interpret(&format!("(from {path})")) {
            Ok(_) => println!("Loaded {path}"),
            Err(e) => println!("Error: {e}"),
        }
    }

    let mut rl = DefaultEditor::new()?;
    let mut buffer = String::new();

    loop {
        let prompt = match interpreter.missing_right(&buffer) {
            Some(missing) if missing > 0 => {
                format!("{CONTINUATION}{}", "  ".repeat(missing))
            }
            _ => PROMPT.to_owned(),
        };

        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                // Abandon the pending input, keep the session
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => return Err(err.into()),
        };

        if buffer.is_empty() {
            let command = line.trim();
            if command.is_empty() {
                continue;
            }
            match command {
                ":help" => {
                    print_help();
                    continue;
                }
                ":env" => {
                    print_environment(&interpreter);
                    continue;
                }
                ":quit" | ":exit" => {
                    println!("Goodbye!");
                    break;
                }
                _ => {}
            }
        }

        let continuing = !buffer.is_empty();
        buffer.push_str(&line);
        buffer.push('\n');

        match interpreter.missing_right(&buffer) {
            Some(missing) if missing > 0 => {
                if !(continuing && line.trim().is_empty()) {
                    continue;
                }
                // An empty continuation line closes everything still open
                buffer.push_str(&")".repeat(missing));
            }
            _ => {}
        }

        let source = std::mem::take(&mut buffer);
        let _ = rl.add_history_entry(source.trim());
        evaluate_and_print(&interpreter, &source);
    }

    Ok(())
}

fn evaluate_and_print(interpreter: &Interpreter, source: &str) {
    match interpreter.interpret(source) {
        Ok(value) => {
            // Empty results (e.g. from print) are not echoed
            if !matches!(value, Value::Empty) {
                println!("{value}");
            }
            interpreter.evaluator().set_symbol("_", value);
        }
        Err(e) => println!("Error: {e}"),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Discard the pending input");
    println!("  Ctrl+D     - Exit the interpreter");
    println!();
    println!("Language:");
    println!("  Numbers: 42, -5, 3.5, 1e3, 2j");
    println!("  Booleans: true, false");
    println!("  Arithmetic: +, -, *, /, //, %, ^, max, min");
    println!("  Comparison: =, !=, <, >, <=, >=");
    println!("  Logic: and, or, not");
    println!("  Forms: define/def, if, lambda/lam, macro/mac, from, symbols/syms");
    println!("  Host: abs, round, float, int, math:sqrt, math:floor, ...");
    println!("  _ holds the last result; ; starts a comment");
    println!();
    println!("Examples:");
    println!("  (define square (lambda (x) (* x x)))");
    println!("  (square 12)");
    println!("  (define twice (macro (e) (+ e e)))");
    println!("  (twice _)");
    println!();
}

fn print_environment(interpreter: &Interpreter) {
    let bindings = interpreter.evaluator().bindings();

    // Separate callables from plain values
    let mut functions = Vec::new();
    let mut values = Vec::new();
    for (name, value) in bindings {
        match value {
            Value::Function(_) => functions.push(name),
            _ => values.push((name, value)),
        }
    }

    if !functions.is_empty() {
        println!("Functions ({}):", functions.len());
        // Print in columns for readability
        for row in functions.chunks(4) {
            for name in row {
                print!("  {name:<15}");
            }
            println!();
        }
        println!();
    }

    if values.is_empty() {
        println!("No user-defined values.");
    } else {
        println!("Values ({}):", values.len());
        for (name, value) in values {
            println!("  {name} = {value}");
        }
    }
}
