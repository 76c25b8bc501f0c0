//! One error type per pipeline stage, plus an umbrella [`Error`] for callers
//! that drive the whole pipeline.
//!
//! No stage recovers from its own errors: the first failure aborts the unit
//! being processed and is handed back to the caller unchanged.

use derive_more::{Display, From};

use crate::{scope::Redefinition, types::Type};

/// Malformed input found while turning text into tokens. Indices are
/// character offsets into the source text.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum LexError {
    #[display(fmt = "unexpected character {:?} at index {}", character, index)]
    UnexpectedCharacter { character: char, index: usize },

    #[display(fmt = "unterminated character literal at index {}", index)]
    UnterminatedCharacter { index: usize },

    #[display(
        fmt = "character literal at index {} must hold exactly one character",
        index
    )]
    InvalidCharacter { index: usize },

    #[display(fmt = "unterminated string literal at index {}", index)]
    UnterminatedString { index: usize },

    #[display(fmt = "invalid escape sequence '\\{}' at index {}", escape, index)]
    InvalidEscape { escape: char, index: usize },

    #[display(fmt = "exponent sign at index {} is not followed by digits", index)]
    DanglingExponent { index: usize },
}

impl std::error::Error for LexError {}

/// A token stream that does not match the grammar. `index` is the position
/// of the offending token in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ParseError {
    #[display(fmt = "expected {} but found {:?} (token {})", expected, found, index)]
    Expected {
        expected: String,
        found: String,
        index: usize,
    },

    #[display(fmt = "expected {} but reached the end of input", expected)]
    UnexpectedEnd { expected: String },

    #[display(
        fmt = "only variables and properties can be assigned to (token {})",
        index
    )]
    InvalidAssignmentTarget { index: usize },

    #[display(fmt = "invalid literal {:?}: {}", literal, reason)]
    InvalidLiteral { literal: String, reason: String },
}

impl std::error::Error for ParseError {}

/// A statically detectable typing or scoping violation.
#[derive(Debug, Clone, PartialEq, Display)]
pub enum AnalyzeError {
    #[display(fmt = "'{}' is not defined", name)]
    Undefined { name: String },

    #[display(fmt = "'{}' is already defined in this scope", name)]
    AlreadyDefined { name: String },

    #[display(fmt = "unknown type '{}'", name)]
    UnknownType { name: String },

    #[display(fmt = "{} is not a subtype of {}", found, expected)]
    NotSubtype { found: Type, expected: Type },

    #[display(fmt = "operator {} is not defined for {} and {}", op, left, right)]
    UnsupportedOperator { op: String, left: Type, right: Type },

    #[display(fmt = "'{}' is not a function (found {})", name, found)]
    NotAFunction { name: String, found: Type },

    #[display(fmt = "expected an object but found {}", found)]
    NotAnObject { found: Type },

    #[display(fmt = "object has no member '{}'", name)]
    UnknownMember { name: String },

    #[display(
        fmt = "'{}' expects {} argument(s) but was given {}",
        name,
        expected,
        found
    )]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[display(fmt = "parameter '{}' of '{}' needs a declared type", parameter, function)]
    MissingParameterType { function: String, parameter: String },

    #[display(fmt = "RETURN without a value where {} is expected", expected)]
    MissingReturnValue { expected: Type },

    #[display(fmt = "RETURN outside of a function or method")]
    ReturnOutsideFunction,

    #[display(fmt = "expected Iterable but found {}", found)]
    NotIterable { found: Type },

    #[display(fmt = "field '{}' needs an initial value", name)]
    MissingFieldValue { name: String },

    #[display(fmt = "duplicate object member '{}'", name)]
    DuplicateField { name: String },

    #[display(fmt = "object name '{}' is reserved for a type", name)]
    ReservedObjectName { name: String },

    #[display(fmt = "only variables and properties can be assigned to")]
    InvalidAssignmentTarget,
}

impl std::error::Error for AnalyzeError {}

impl From<Redefinition> for AnalyzeError {
    fn from(redefinition: Redefinition) -> Self {
        AnalyzeError::AlreadyDefined {
            name: redefinition.0,
        }
    }
}

/// A failure while executing a program. Kinds are reported by name
/// (`"Integer"`, `"Object"`, ...) since runtime values carry no static type.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum EvaluateError {
    #[display(fmt = "'{}' is not defined", name)]
    Undefined { name: String },

    #[display(fmt = "'{}' is already defined in this scope", name)]
    AlreadyDefined { name: String },

    #[display(fmt = "duplicate object member '{}'", name)]
    DuplicateField { name: String },

    #[display(fmt = "parameter '{}' of '{}' is declared twice", parameter, function)]
    DuplicateParameter { function: String, parameter: String },

    #[display(fmt = "'{}' is not a function (found {})", name, found)]
    NotAFunction { name: String, found: String },

    #[display(fmt = "expected an object but found {}", found)]
    NotAnObject { found: String },

    #[display(fmt = "object has no member '{}'", name)]
    UnknownMember { name: String },

    #[display(
        fmt = "'{}' expects {} argument(s) but was given {}",
        name,
        expected,
        found
    )]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[display(fmt = "condition must be a Boolean but found {}", found)]
    ExpectedBoolean { found: String },

    #[display(fmt = "cannot iterate over {}", found)]
    NotIterable { found: String },

    #[display(fmt = "operator {} is not defined for {} and {}", op, left, right)]
    TypeMismatch {
        op: String,
        left: String,
        right: String,
    },

    #[display(fmt = "division by zero")]
    DivisionByZero,

    #[display(fmt = "RETURN outside of a function or method")]
    ReturnOutsideFunction,

    #[display(fmt = "RETURN in '{}' needs a value", function)]
    MissingReturnValue { function: String },

    #[display(fmt = "invalid argument to '{}': {}", function, details)]
    InvalidArgument { function: String, details: String },

    #[display(fmt = "only variables and properties can be assigned to")]
    InvalidAssignmentTarget,

    #[display(fmt = "method '{}' called without an object", name)]
    UnboundMethod { name: String },

    #[display(fmt = "'{}' outlived the scope it was defined in", name)]
    DroppedScope { name: String },

    #[display(fmt = "decimal scale out of range")]
    ScaleOutOfRange,

    #[display(fmt = "failed to write program output: {}", details)]
    Output { details: String },
}

impl std::error::Error for EvaluateError {}

impl From<Redefinition> for EvaluateError {
    fn from(redefinition: Redefinition) -> Self {
        EvaluateError::AlreadyDefined {
            name: redefinition.0,
        }
    }
}

impl From<std::io::Error> for EvaluateError {
    fn from(err: std::io::Error) -> Self {
        EvaluateError::Output {
            details: err.to_string(),
        }
    }
}

/// Any stage failure, for callers that run more than one stage.
#[derive(Debug, Clone, PartialEq, Display, From)]
pub enum Error {
    #[display(fmt = "lex error: {}", _0)]
    Lex(LexError),
    #[display(fmt = "parse error: {}", _0)]
    Parse(ParseError),
    #[display(fmt = "analyze error: {}", _0)]
    Analyze(AnalyzeError),
    #[display(fmt = "evaluate error: {}", _0)]
    Evaluate(EvaluateError),
}

impl std::error::Error for Error {}
