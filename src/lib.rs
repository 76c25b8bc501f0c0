//! # ember
//!
//! ember is a small imperative scripting language. Source text goes through
//! four stages: it is lexed into tokens, parsed into an AST, statically
//! checked into a typed IR, and finally executed by a tree-walking evaluator.
//!
//! Analysis and evaluation are independent passes over the same AST; the
//! evaluator never looks at the IR.

use std::io::Write;

use log::debug;

/// The syntax tree produced by the parser and read by both the analyzer and
/// the evaluator.
pub mod ast;
/// Static analysis: scoping and typing rules, producing the typed IR.
pub mod analyzer;
/// The built-in bindings every program starts with, as values and as types.
pub mod environment;
/// One error type per stage and the umbrella [`Error`].
pub mod error;
/// Tree-walking execution of a parsed program.
pub mod evaluator;
/// The analyzer's typed mirror of the AST.
pub mod ir;
/// Turns source text into tokens.
///
/// Whitespace and `//` comments are dropped here. Literal tokens keep their
/// source text verbatim; decoding is left to the parser.
pub mod lexer;
/// Recursive descent over the token stream.
pub mod parser;
/// Chained name bindings shared by analysis and evaluation.
pub mod scope;
pub mod token;
pub mod types;
/// Runtime values and the [`value::Callable`] seam behind function values.
pub mod value;

pub use analyzer::analyze;
pub use error::Error;
pub use evaluator::{evaluate, Evaluator};
pub use lexer::lex;
pub use parser::parse_source;

/// Lexes, parses and analyzes `text` against the built-in types.
pub fn check(text: &str) -> Result<ir::Source, Error> {
    let tokens = lex(text)?;
    let source = parse_source(&tokens)?;
    Ok(analyze(&source, environment::types())?)
}

/// Runs `text` through every stage, printing program output to stdout, and
/// returns the value of its last statement.
pub fn run(text: &str) -> Result<value::RuntimeValue, Error> {
    run_with_output(text, Box::new(std::io::stdout()))
}

/// Like [`run`], with program output sent to `output`.
pub fn run_with_output(
    text: &str,
    output: Box<dyn Write>,
) -> Result<value::RuntimeValue, Error> {
    let tokens = lex(text)?;
    let source = parse_source(&tokens)?;
    analyze(&source, environment::types())?;
    debug!("analysis passed, evaluating");

    let mut evaluator = Evaluator::with_output(environment::values(), output);
    Ok(evaluator.evaluate_source(&source)?)
}
