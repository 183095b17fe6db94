//! Sandboxed expression engine for survey-template substitution.
//!
//! Survey authors embed small expressions in curly braces inside otherwise
//! literal text (`"You are {age} years old"`, `"{if(score>10,'pass','fail')}"`).
//! This crate tokenizes, parses, and evaluates those expressions against a
//! host-provided variable store, and can also re-emit any expression in the
//! client-side surface so the same logic runs in the participant's browser.
//!
//! ## Dual-surface design
//!
//! Every whitelisted function is registered once with both its local name and
//! its client-surface name (see [`functions::FunctionSpec`]). Evaluation and
//! emission therefore never disagree about which operations exist:
//!
//! ```text
//! {if(1 lt 2, 'yes', 'no')}        evaluated here
//! IF(ANY_NA([...]), null, (...))   emitted for the client runtime
//! ```
//!
//! ## Sandboxing
//!
//! This is deliberately NOT a general programming language:
//!
//! - Only functions present in the registry can be called; there is no way to
//!   define new ones from inside an expression.
//! - Variables resolve through an injected [`resolver::VariableResolver`];
//!   writes go through its narrow write-through channel and nothing else.
//! - No I/O, no host memory access, no recursion from expression text.
//!
//! ## Entry points
//!
//! [`ExpressionEngine`] owns the injected resolvers and exposes
//! `evaluate`, `process_string`, `boolean_evaluate`, `to_client_expression`,
//! and `tokenize`. A fresh evaluation state is built per call; an engine
//! instance is not meant to be shared across threads (create one per thread).

use std::cmp::Ordering;
use std::fmt;

/// Classification of an evaluation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unrecognized token, unbalanced parentheses, undefined function or
    /// variable, extra tokens after a full parse.
    Syntax,
    /// Wrong number of arguments for a known function.
    Arity,
    /// Assignment to a read-only target, or assignment to a non-variable.
    Type,
    /// A function implementation or resolver failed; message kept verbatim.
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Syntax => write!(f, "syntax error"),
            ErrorKind::Arity => write!(f, "arity error"),
            ErrorKind::Type => write!(f, "type error"),
            ErrorKind::Runtime => write!(f, "runtime error"),
        }
    }
}

/// An error recorded while evaluating one expression.
///
/// Errors accumulate in an ordered log on the engine; evaluation
/// short-circuits within a production but keeps going across comma-separated
/// expressions, so one call may surface several of these.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub kind: ErrorKind,
    pub message: String,
    /// Offending lexeme, empty when the error is not tied to one token.
    pub token: String,
    /// 0-based character offset into the expression source.
    pub offset: usize,
}

impl EvalError {
    pub fn syntax(message: impl Into<String>, token: &Token) -> Self {
        EvalError {
            kind: ErrorKind::Syntax,
            message: message.into(),
            token: token.text.clone(),
            offset: token.offset,
        }
    }

    pub fn syntax_at(message: impl Into<String>, offset: usize) -> Self {
        EvalError {
            kind: ErrorKind::Syntax,
            message: message.into(),
            token: String::new(),
            offset,
        }
    }

    pub fn arity(message: impl Into<String>, token: &Token) -> Self {
        EvalError {
            kind: ErrorKind::Arity,
            message: message.into(),
            token: token.text.clone(),
            offset: token.offset,
        }
    }

    pub fn type_error(message: impl Into<String>, token: &Token) -> Self {
        EvalError {
            kind: ErrorKind::Type,
            message: message.into(),
            token: token.text.clone(),
            offset: token.offset,
        }
    }

    pub fn runtime(message: impl Into<String>, token: &Token) -> Self {
        EvalError {
            kind: ErrorKind::Runtime,
            message: message.into(),
            token: token.text.clone(),
            offset: token.offset,
        }
    }

    /// Display ordering: by source offset, then by kind for stability.
    pub fn by_offset(a: &EvalError, b: &EvalError) -> Ordering {
        a.offset
            .cmp(&b.offset)
            .then_with(|| (a.kind as u8).cmp(&(b.kind as u8)))
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.token.is_empty() {
            write!(f, "{} at offset {}: {}", self.kind, self.offset, self.message)
        } else {
            write!(
                f,
                "{} at offset {} near '{}': {}",
                self.kind, self.offset, self.token, self.message
            )
        }
    }
}

impl std::error::Error for EvalError {}

pub mod emitter;
pub mod evaluator;
pub mod expand;
pub mod functions;
pub mod lexer;
pub mod resolver;
pub mod splitter;
pub mod value;

pub use evaluator::ExpressionEngine;
pub use functions::{Arity, FunctionSpec};
pub use lexer::{Token, TokenKind};
pub use resolver::{
    AssignOp, Question, QuestionField, QuestionResolver, SimpleQuestions, SimpleVars, VarAttr,
    VarRecord, VariableResolver,
};
pub use splitter::{Segment, SegmentKind};
pub use value::{Operand, Origin, Value};
