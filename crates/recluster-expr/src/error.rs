//! Compile-time and evaluation-time errors.

use thiserror::Error;

/// A malformed expression. Reported once per source string and cached,
/// never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character {ch:?} at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("invalid number {text:?} at {pos}")]
    InvalidNumber { text: String, pos: usize },

    #[error("expected {expected} at {pos}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        pos: usize,
    },

    #[error("expression has {tokens} tokens, at most {max} allowed")]
    TooLong { tokens: usize, max: usize },

    #[error("nesting deeper than {max} levels at {pos}")]
    TooDeep { pos: usize, max: usize },

    #[error("unknown function {0:?}")]
    UnknownFunction(String),

    #[error("{function}() takes {expected} argument(s), got {got}")]
    Arity {
        function: &'static str,
        expected: String,
        got: usize,
    },
}

/// Failure of a single evaluation. Leaves the compiled program reusable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unknown variable {0:?}")]
    UnknownVariable(String),

    #[error("{op} expects {expected}, found {found}")]
    TypeMismatch {
        op: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

pub type CompileResult<T> = Result<T, CompileError>;
pub type EvalResult<T> = Result<T, EvalError>;
