use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tama::compiler::disasm;
use tama::diagnostic::{ansi::AnsiRenderer, json, Diagnostic};
use tama::{Closure, Config, Error, Interpreter, Object};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Emit {
    /// Indented textual listing.
    Bytecode,
    /// The same listing as JSON.
    Json,
}

/// Run Scheme programs on the tama VM.
#[derive(Debug, Parser)]
#[command(name = "tama", version)]
struct Cli {
    /// Script to run. Starts a REPL when neither FILE nor --eval is given.
    file: Option<PathBuf>,

    /// Evaluate EXPR instead of reading a file.
    #[arg(short, long, value_name = "EXPR", conflicts_with = "file")]
    eval: Option<String>,

    /// Print the compiled bytecode instead of running it.
    #[arg(long, value_enum)]
    emit: Option<Emit>,

    /// Report errors as JSON on stderr.
    #[arg(long)]
    json: bool,

    /// Log every executed instruction (trace level).
    #[arg(long)]
    trace: bool,

    /// Value stack capacity in slots.
    #[arg(long, value_name = "SLOTS")]
    stack_size: Option<usize>,

    /// Maximum call depth.
    #[arg(long, value_name = "FRAMES")]
    max_depth: Option<usize>,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::default().with_debug_tracing(self.trace);
        if let Some(n) = self.stack_size {
            config = config.with_stack_capacity(n);
        }
        if let Some(n) = self.max_depth {
            config = config.with_call_info_capacity(n);
        }
        config
    }
}

fn init_tracing(trace: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if trace { "tama=trace" } else { "warn" }));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(true).with_level(true))
        .with(filter)
        .init();
}

fn report(err: &Error, source: &str, as_json: bool) {
    let d = Diagnostic::from(err).with_source(source);
    if as_json {
        eprintln!("{}", json::render(&d));
    } else {
        let renderer = AnsiRenderer { use_color: io::stderr().is_terminal() };
        eprint!("{}", renderer.render(&d));
    }
}

fn print_value(value: &Object) {
    if !matches!(value, Object::Undefined) {
        println!("{}", value);
    }
}

fn emit(interp: &Interpreter, source: &str, format: Emit) -> Result<(), Error> {
    let closure = interp.compile(source)?;
    let Closure::Scheme(cl) = &*closure else {
        return Ok(());
    };
    let listing = disasm::listing(&cl.proto);
    match format {
        Emit::Bytecode => print!("{}", listing),
        Emit::Json => match serde_json::to_string_pretty(&listing) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("error: {}", e),
        },
    }
    Ok(())
}

/// Returns whether the source ran without error.
fn run_source(interp: &mut Interpreter, source: &str, cli: &Cli) -> bool {
    let result = match cli.emit {
        Some(format) => emit(interp, source, format),
        None => interp.exec_string(source).map(|v| print_value(&v)),
    };
    let _ = io::stdout().flush();
    match result {
        Ok(()) => true,
        Err(e) => {
            report(&e, source, cli.json);
            false
        }
    }
}

fn repl(interp: &mut Interpreter, cli: &Cli) -> ExitCode {
    let stdin = io::stdin();
    let interactive = stdin.is_terminal();
    let prompt = |continued: bool| {
        if interactive {
            eprint!("{}", if continued { "....> " } else { "tama> " });
            let _ = io::stderr().flush();
        }
    };

    let mut buffer = String::new();
    let mut failed = false;
    prompt(false);
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        };
        buffer.push_str(&line);
        buffer.push('\n');

        // keep reading while the input is an unfinished datum
        if let Err(Error::Parse(e)) = tama::read(&buffer) {
            if e.is_incomplete() {
                prompt(true);
                continue;
            }
        }
        if !run_source(interp, &buffer, cli) {
            failed = true;
        }
        buffer.clear();
        prompt(false);
    }
    if !buffer.trim().is_empty() && !run_source(interp, &buffer, cli) {
        failed = true;
    }
    exit_code(!failed || interactive)
}

fn exit_code(ok: bool) -> ExitCode {
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.trace);

    let mut interp = Interpreter::new(cli.config());

    if let Some(expr) = &cli.eval {
        return exit_code(run_source(&mut interp, expr, &cli));
    }
    match &cli.file {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(source) => exit_code(run_source(&mut interp, &source, &cli)),
            Err(e) => {
                eprintln!("error: cannot read {}: {}", path.display(), e);
                ExitCode::FAILURE
            }
        },
        None => repl(&mut interp, &cli),
    }
}
