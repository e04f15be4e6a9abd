//! Parse-then-evaluate session for read loops and embedders.

use crate::Error;
use crate::evaluator::{EvalConfig, Evaluator};
use crate::host::{FileSystemLoader, HostRegistry, HostResolver, SourceLoader};
use crate::program::{self, ParseConfig};
use crate::value::Value;

/// One interpreter session: a root scope plus the options it was built with.
///
/// Definitions made by one call to [`Interpreter::interpret`] are visible to
/// the next. A failing call leaves every binding committed before the failure
/// in place.
#[derive(Debug, Clone)]
pub struct Interpreter {
    evaluator: Evaluator,
}

impl Interpreter {
    /// Standard host namespaces, file-system `from`, default options.
    pub fn new() -> Result<Self, Error> {
        Ok(Interpreter {
            evaluator: Evaluator::new()?,
        })
    }

    pub fn with_parts(
        parse: ParseConfig,
        eval: EvalConfig,
        host: impl HostResolver + 'static,
        loader: impl SourceLoader + 'static,
    ) -> Result<Self, Error> {
        Ok(Interpreter {
            evaluator: Evaluator::root(Box::new(host), Box::new(loader), parse, eval)?,
        })
    }

    /// Standard host namespaces and file-system `from` with custom options.
    pub fn with_config(parse: ParseConfig, eval: EvalConfig) -> Result<Self, Error> {
        Interpreter::with_parts(parse, eval, HostRegistry::standard(), FileSystemLoader::new())
    }

    /// Parse `text` and evaluate it in the root scope.
    pub fn interpret(&self, text: &str) -> Result<Value, Error> {
        let program = program::parse_with_config(text, self.evaluator.parse_config())?;
        self.evaluator.evaluate(&program)
    }

    /// How many `)` would complete `text`, or `None` if it already closes
    /// more than it opens.
    pub fn missing_right(&self, text: &str) -> Option<usize> {
        program::tokenize_with_config(text, self.evaluator.parse_config()).missing_right()
    }

    /// The root scope of this session.
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }
}
