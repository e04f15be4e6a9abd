//! The core special forms.
//!
//! `define`, `if`, `lambda`, `macro`, `from` and `symbols` are ordinary
//! [`Function`] values. Their parameters are [`Program`]s, which makes them
//! lazy, and most take the calling [`Evaluator`] as their first argument, so
//! the scope they act on is always the one they are called from.

use std::collections::HashMap;
use std::fmt;

use crate::Error;
use crate::evaluator::Evaluator;
use crate::function::{FromParam, Function, Signature};
use crate::program::Program;
use crate::value::{Object, Value, is_valid_symbol};

/// The special forms under every name they are bound to.
pub(crate) fn registry() -> Result<Vec<(&'static str, Function)>, Error> {
    let define = Function::with_env(define)?;
    let lambda = Function::with_env(lambda)?;
    let macro_form = Function::fixed(macro_form)?;
    let symbols = Function::with_env(symbols)?;

    let entries = vec![
        ("define", define.clone()),
        ("def", define),
        ("if", Function::with_env(branch)?),
        ("lambda", lambda.clone()),
        ("lam", lambda),
        ("macro", macro_form.clone()),
        ("mac", macro_form),
        ("from", Function::with_env(from)?),
        ("symbols", symbols.clone()),
        ("syms", symbols),
    ];
    Ok(entries
        .into_iter()
        .map(|(name, function)| (name, function.named(format!("#<builtin:{name}>"))))
        .collect())
}

/// The single symbol token a name form must reduce to.
fn symbol_name(form: &Program) -> Option<&str> {
    match form.tokens() {
        [token] if is_valid_symbol(token.as_str()) => Some(token.as_str()),
        _ => None,
    }
}

/// `(define name value)`: bind in the calling scope and return the value.
fn define(env: &Evaluator, name: Program, value: Program) -> Result<Value, Error> {
    let Some(symbol) = symbol_name(&name) else {
        return Err(Error::InvalidSymbolName(name.to_string()));
    };
    let value = env.evaluate(&value)?;
    tracing::debug!(symbol, %value, "define");
    env.set_symbol(symbol, value.clone());
    Ok(value)
}

/// `(if predicate consequent alternative)`
fn branch(
    env: &Evaluator,
    predicate: Program,
    consequent: Program,
    alternative: Program,
) -> Result<Value, Error> {
    if env.evaluate(&predicate)?.is_truthy() {
        env.evaluate(&consequent)
    } else {
        env.evaluate(&alternative)
    }
}

/// Validate a formal parameter list such as `(x y)`.
fn parameter_list(form: &Program) -> Result<Vec<String>, Error> {
    if !form.is_combination() {
        return Err(Error::formals(format!(
            "'{form}' is not a parenthesized parameter list"
        )));
    }

    let mut names: Vec<String> = Vec::new();
    for parameter in form.split() {
        let [token] = parameter.tokens() else {
            return Err(Error::formals(format!(
                "'{parameter}' is not a single symbol"
            )));
        };
        if token.is_paren() || !is_valid_symbol(token.as_str()) {
            return Err(Error::formals(format!("'{token}' is not a valid symbol")));
        }
        if names.iter().any(|name| name == token.as_str()) {
            return Err(Error::formals(format!("'{token}' appears more than once")));
        }
        names.push(token.as_str().to_owned());
    }
    Ok(names)
}

/// `(lambda (formals...) body)`: a closure over the defining scope.
///
/// Every call gets its own child scope, so recursive calls never share
/// bindings. The body receives the defining scope, not the caller's.
fn lambda(env: &Evaluator, parameters: Program, body: Program) -> Result<Function, Error> {
    let names = parameter_list(&parameters)?;
    let repr = format!("(lambda {parameters} {body})");

    let function = Function::from_parts(Signature::untyped(names.len()), move |defining, args| {
        let scope = defining.child();
        for (index, (name, arg)) in names.iter().zip(args).enumerate() {
            let value = Value::from_operand(arg, index + 1)?;
            scope.set_symbol(name.as_str(), value);
        }
        scope.evaluate(&body)
    });
    Ok(function.named(repr).closing_over(env.capture()))
}

/// `(macro (formals...) body)`: token substitution, evaluated where called.
///
/// The expansion is not hygienic. Substituted operands see, and can be
/// shadowed by, whatever the caller's scope binds.
fn macro_form(parameters: Program, body: Program) -> Result<Function, Error> {
    let names = parameter_list(&parameters)?;
    let repr = format!("(macro {parameters} {body})");

    let function = Function::from_parts(Signature::lazy(names.len(), true), move |caller, args| {
        let operands = args
            .into_iter()
            .enumerate()
            .map(|(index, arg)| Program::from_operand(arg, index + 1))
            .collect::<Result<Vec<_>, _>>()?;
        let bindings: HashMap<&str, &Program> =
            names.iter().map(String::as_str).zip(&operands).collect();

        let expansion = body.substitute(&bindings);
        tracing::trace!(%expansion, "macro expanded");
        caller.evaluate(&expansion)
    });
    Ok(function.named(repr))
}

/// `(from path)`: load, parse and evaluate a source in the calling scope.
fn from(env: &Evaluator, path: Program) -> Result<Value, Error> {
    let [token] = path.tokens() else {
        return Err(Error::SourceUnavailable {
            path: path.to_string(),
            message: "expected a single path token".to_owned(),
        });
    };
    let program = env.load_source(token.as_str())?;
    env.evaluate(&program)
}

/// Snapshot of the bindings visible from one scope, sorted by name.
pub struct SymbolTable {
    entries: Vec<(String, Value)>,
}

impl SymbolTable {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .binary_search_by(|(entry, _)| entry.as_str().cmp(name))
            .ok()
            .map(|index| &self.entries[index].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (name, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}

/// `(symbols)`
fn symbols(env: &Evaluator) -> Object {
    Object::new(SymbolTable {
        entries: env.bindings(),
    })
}
