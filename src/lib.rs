//! Tracker - an interactive interpreter over a hierarchical store of named values
//!
//! This crate provides a small line-oriented command language whose programs read and
//! mutate a tree of scopes. Scopes hold numbers, text, booleans, nested scopes and the
//! built-in commands themselves, so "data" and "verbs" share one namespace.
//!
//! ## Input Lines
//!
//! Every line is a head expression optionally followed by comma separated arguments:
//!
//! ```text
//! set x, 5              ; assignment
//! x * 2 + 1             ; arithmetic over references
//! create group          ; nested scope
//! set group.hp, 12      ; dotted reference into it
//! for i, 1, 3, print(i) ; deferred command re-evaluating its body
//! ```
//!
//! ## Eager and Deferred Commands
//!
//! Eager commands receive their arguments already reduced (primitives, scope paths,
//! assignment targets). Deferred commands (`if`, `while`, `for`, `run`) receive the
//! pre-evaluated argument trees and evaluate them themselves, as often as they need.
//!
//! ## Modules
//!
//! - `ast`: primitive values and the expression value tree
//! - `scope`: the ordered, hierarchical scope store and paths
//! - `evaluator`: the evaluation protocol and the interpreter session
//! - `builtinops`: the built-in command registry
//! - `parser`: input line parsing
//! - `persist`: replayable save/load lines

use std::fmt;

use thiserror::Error;

use crate::ast::Kind;
use crate::scope::Path;

/// Maximum parsing depth to prevent stack overflow on deeply parenthesised input
pub const MAX_PARSE_DEPTH: usize = 32;

/// Maximum evaluation depth. Guards runaway recursion such as scripts that `run`
/// themselves.
pub const MAX_EVAL_DEPTH: usize = 64;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (unterminated text, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete line
    TrailingContent,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Byte offset of the offending token within the line
    pub position: usize,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = error_offset.saturating_sub(20);
        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        let found = input
            .get(error_offset..)
            .and_then(|rest| rest.split_whitespace().next())
            .map(str::to_owned);

        ParseError {
            kind,
            message: message.into(),
            position: error_offset,
            context: Some(display_context),
            found,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)?;
        if let Some(found) = &self.found {
            write!(f, " (found '{found}')")?;
        }
        Ok(())
    }
}

/// Failures of the store itself: missing names, wrong slot kinds, occupied names.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("No variable {name} exists in {path}.")]
    Missing { path: Path, name: String },
    #[error("The variable {name} already exists in {path}.")]
    Occupied { path: Path, name: String },
    #[error("{path} is not a collection.")]
    NotAContainer { path: Path },
    #[error("{expression} does not name a variable.")]
    NotATarget { expression: String },
}

/// An operation received operands it cannot combine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputationError {
    #[error("can not apply '{op}' to {lhs} and {rhs}")]
    Mismatch {
        op: &'static str,
        lhs: Kind,
        rhs: Kind,
    },
    #[error("division by zero: {dividend} / 0")]
    DivisionByZero { dividend: String },
    #[error("'{op}' of {lhs} and {rhs} is not a finite number")]
    NotFinite {
        op: &'static str,
        lhs: String,
        rhs: String,
    },
    #[error("{kind} can not be used as a condition")]
    NotABoolean { kind: Kind },
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("ReadingError: {0}")]
    Reading(ParseError),
    #[error("{0}")]
    Data(#[from] DataError),
    #[error("{0}")]
    Computation(#[from] ComputationError),
    #[error("Can not evaluate {expression}, since {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: Box<Error>,
    },
    #[error("Could not evaluate {expression}: {reason}")]
    Unevaluable { expression: String, reason: String },
    #[error("ArityError: {command} expects {expected} arguments, got {got}")]
    Arity {
        command: String,
        expected: String,
        got: usize,
    },
    #[error("Can not access '{path}': {message}")]
    Io { path: String, message: String },
}

impl Error {
    /// Wrap a lower level failure with the text form of the expression being reduced.
    pub fn evaluation(expression: impl fmt::Display, source: Error) -> Self {
        Error::Evaluation {
            expression: expression.to_string(),
            source: Box::new(source),
        }
    }

    /// The innermost non-evaluation cause of this error.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Evaluation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Reading(err)
    }
}

pub mod ast;
pub mod builtinops;
pub mod config;
pub mod evaluator;
pub mod parser;
pub mod persist;
pub mod scope;

pub use config::SessionConfig;
pub use evaluator::Interpreter;
