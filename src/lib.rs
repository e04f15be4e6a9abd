//! sexpeval - a small s-expression interpreter
//!
//! This crate evaluates a parenthesized, symbolic-expression language in the
//! spirit of Scheme. Programs are flat token sequences; structure is recovered
//! on demand by splitting a combination into its direct sub-forms.
//!
//! ```text
//! (define square (lambda (x) (* x x)))
//! (square 12)                        ; 144
//! (if (< 1 2) 1 (/ 1 0))            ; the false branch is never evaluated
//! (define twice (macro (e) (+ e e)))
//! (twice 21)                         ; 42, by token substitution
//! ```
//!
//! ## Calling convention
//!
//! Every callable - builtin arithmetic, the core special forms and
//! user-defined lambdas alike - is a [`function::Function`] carrying a
//! [`function::Signature`]. Signatures are inferred from the Rust parameter
//! types of the function being wrapped: an `i64` parameter requires an integer
//! and receives the raw payload, a [`value::Value`] parameter accepts anything,
//! a [`program::Program`] parameter makes the whole function *lazy* so its
//! operands arrive unevaluated. `define`, `if`, `lambda` and `macro` are plain
//! lazy functions, not evaluator built-ins.
//!
//! ## Modules
//!
//! - `program`: tokens, programs and the tokenizer
//! - `value`: the tagged value model and host coercion
//! - `function`: signatures, argument adaptation and typed adapters
//! - `evaluator`: the recursive tree walker and lexical scope chain
//! - `forms`: `define`, `if`, `lambda`, `macro`, `from` and `symbols`
//! - `builtinops`: arithmetic, comparison and logic primitives
//! - `host`: host interop resolution and source loading
//! - `interpreter`: parse-then-evaluate session used by read loops

use std::fmt;

/// Default evaluation depth limit.
///
/// Every nested `evaluate` call counts one level; a lambda call costs one level
/// for its body plus one for each enclosing combination. The native stack is
/// grown on demand, so this limit is what turns runaway recursion into
/// [`Error::StackExhausted`].
pub const MAX_EVAL_DEPTH: usize = 4096;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Input ended with `(` left unmatched
    Incomplete,
    /// A `)` appeared with no matching `(`
    UnexpectedClose,
    /// A bare parenthesis token was evaluated as an atom
    BareParenthesis,
}

/// A structured error describing a malformed program.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Snippet of the tokens around the failure
    pub context: Option<String>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, context: Option<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
        }
    }

    /// Create a ParseError with a context window ending at token `index`
    pub(crate) fn with_context<S: AsRef<str>>(
        kind: ParseErrorKind,
        message: impl Into<String>,
        tokens: &[S],
        index: usize,
    ) -> Self {
        const WINDOW: usize = 8;

        let end = (index + 1).min(tokens.len());
        let start = end.saturating_sub(WINDOW);

        let mut context = String::new();
        if start > 0 {
            context.push_str("[...] ");
        }
        let snippet: Vec<&str> = tokens[start..end].iter().map(AsRef::as_ref).collect();
        context.push_str(&snippet.join(" "));
        if end < tokens.len() {
            context.push_str(" [...]");
        }

        Self::new(kind, message, Some(context))
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

/// Error types for the interpreter
///
/// Every error aborts the evaluation that raised it; nothing inside the crate
/// recovers from one. Bindings committed before the failure stay in place.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("MalformedProgram: {0}")]
    MalformedProgram(ParseError),
    #[error("UndefinedSymbol: '{0}'")]
    UndefinedSymbol(String),
    #[error("NotCallable: operator must be a function, got {found}")]
    NotCallable { found: String },
    #[error("ArityMismatch: expected {expected} arguments, got {got}")]
    ArityMismatch {
        expected: function::Arity,
        got: usize,
    },
    #[error("TypeMismatch: argument {position} must be {expected}, got {found}")]
    TypeMismatch {
        /// 1-based argument position
        position: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("InvalidFormalParameterList: {0}")]
    InvalidFormalParameterList(String),
    #[error("InvalidSymbolName: '{0}' is not a valid symbol")]
    InvalidSymbolName(String),
    #[error("DomainError: {0}")]
    DomainError(String),
    #[error("StackExhausted: evaluation depth limit exceeded (max: {limit})")]
    StackExhausted { limit: usize },
    #[error("InvalidSignature: {0}")]
    InvalidSignature(String),
    #[error("SourceUnavailable: {path}: {message}")]
    SourceUnavailable { path: String, message: String },
}

impl Error {
    pub(crate) fn domain(message: impl Into<String>) -> Self {
        Error::DomainError(message.into())
    }

    pub(crate) fn formals(message: impl Into<String>) -> Self {
        Error::InvalidFormalParameterList(message.into())
    }
}

pub mod builtinops;
pub mod evaluator;
pub mod forms;
pub mod function;
pub mod host;
pub mod interpreter;
pub mod program;
mod stack;
pub mod value;

pub use evaluator::{EvalConfig, Evaluator};
pub use function::{Function, Signature};
pub use interpreter::Interpreter;
pub use program::{ParseConfig, Program, Token, parse, tokenize};
pub use value::Value;
