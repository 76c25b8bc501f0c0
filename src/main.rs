use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use ember_lang::{analyze, environment, evaluate, lex, parse_source, Error};
use log::LevelFilter;
use simple_logger::SimpleLogger;

/// Runs an ember program.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Source file to run. Reads standard input when omitted.
    file: Option<PathBuf>,

    /// Print the token stream and stop.
    #[arg(long)]
    tokens: bool,

    /// Print the parsed syntax tree and stop.
    #[arg(long)]
    ast: bool,

    /// Analyze without running, printing the typed IR.
    #[arg(long)]
    check: bool,

    /// Skip static analysis before running.
    #[arg(long, conflicts_with = "check")]
    no_analyze: bool,

    /// Log more (-v for debug, -vv for trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn read_source(file: Option<&Path>) -> io::Result<String> {
    match file {
        Some(path) => fs::read_to_string(path),
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn execute(args: &Args, text: &str) -> Result<(), Error> {
    let tokens = lex(text)?;
    if args.tokens {
        for token in &tokens {
            println!("{token}");
        }
        return Ok(());
    }

    let source = parse_source(&tokens)?;
    if args.ast {
        println!("{source:#?}");
        return Ok(());
    }

    if !args.no_analyze {
        let ir = analyze(&source, environment::types())?;
        if args.check {
            println!("{ir:#?}");
            return Ok(());
        }
    }

    evaluate(&source, environment::values())?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if let Err(err) = SimpleLogger::new().with_level(level).env().init() {
        eprintln!("failed to initialize logging: {err}");
    }

    let text = match read_source(args.file.as_deref()) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("failed to read input: {err}");
            return ExitCode::FAILURE;
        }
    };

    match execute(&args, &text) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
