//! Host interop and source loading.
//!
//! The root scope falls back to a [`HostResolver`] when a symbol has no
//! binding. A path is `namespace:attribute`; a bare name refers to the default
//! namespace. [`HostRegistry`] is a table-driven resolver and
//! [`HostRegistry::standard`] fills it with a few numeric helpers. [`Sandbox`]
//! resolves nothing and loads nothing.
//!
//! `from` reads program text through a [`SourceLoader`].

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::Error;
use crate::function::{Arity, Function};
use crate::value::{IntType, Number, Payload, Value};

/// Resolves otherwise undefined names against the host.
pub trait HostResolver {
    /// `path` is `namespace:attribute` or a bare name.
    fn resolve(&self, path: &str) -> Option<Function>;
}

/// Supplies program text for `from`.
pub trait SourceLoader {
    fn load(&self, path: &str) -> Result<String, Error>;
}

/// Resolver and loader that never find anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sandbox;

impl HostResolver for Sandbox {
    fn resolve(&self, _path: &str) -> Option<Function> {
        None
    }
}

impl SourceLoader for Sandbox {
    fn load(&self, path: &str) -> Result<String, Error> {
        Err(Error::SourceUnavailable {
            path: path.to_owned(),
            message: "source loading is disabled".to_owned(),
        })
    }
}

/// Reads sources from the file system, relative to an optional base directory.
#[derive(Debug, Clone, Default)]
pub struct FileSystemLoader {
    base: Option<PathBuf>,
}

impl FileSystemLoader {
    pub fn new() -> Self {
        FileSystemLoader { base: None }
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        FileSystemLoader {
            base: Some(base.into()),
        }
    }
}

impl SourceLoader for FileSystemLoader {
    fn load(&self, path: &str) -> Result<String, Error> {
        let full = match &self.base {
            Some(base) => base.join(path),
            None => PathBuf::from(path),
        };
        let text = std::fs::read_to_string(&full).map_err(|err| Error::SourceUnavailable {
            path: path.to_owned(),
            message: err.to_string(),
        })?;
        tracing::debug!(path = %full.display(), bytes = text.len(), "loaded source");
        Ok(text)
    }
}

/// Name of the namespace bare names resolve in.
pub const DEFAULT_NAMESPACE: &str = "";

/// Table of host functions grouped by namespace.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    namespaces: HashMap<String, HashMap<String, Function>>,
}

fn split_path(path: &str) -> (&str, &str) {
    path.split_once(':').unwrap_or((DEFAULT_NAMESPACE, path))
}

impl HostRegistry {
    pub fn new() -> Self {
        HostRegistry::default()
    }

    /// Register `function` under `path` (`namespace:attribute` or a bare name).
    pub fn insert(&mut self, path: &str, function: Function) {
        let (namespace, attribute) = split_path(path);
        self.namespaces
            .entry(namespace.to_owned())
            .or_default()
            .insert(attribute.to_owned(), function);
    }

    /// Register a raw host function with display form `#<host:path>`.
    pub fn insert_host<F>(&mut self, path: &str, f: F)
    where
        F: Fn(Vec<Box<dyn Any>>) -> Result<Box<dyn Any>, Error> + 'static,
    {
        self.insert(path, Function::host(f).named(format!("#<host:{path}>")));
    }

    /// The default namespace's `abs`, `round`, `float` and `int`, plus
    /// `math:` `sqrt`, `floor`, `ceil`, `exp`, `log`, `sin` and `cos`.
    pub fn standard() -> Self {
        let mut registry = HostRegistry::new();

        registry.insert_host("abs", host_abs);
        registry.insert_host("round", host_round);
        registry.insert_host("float", host_float);
        registry.insert_host("int", host_int);

        registry.insert_host("math:sqrt", |args| real_function(args, f64::sqrt));
        registry.insert_host("math:exp", |args| real_function(args, f64::exp));
        registry.insert_host("math:log", |args| real_function(args, f64::ln));
        registry.insert_host("math:sin", |args| real_function(args, f64::sin));
        registry.insert_host("math:cos", |args| real_function(args, f64::cos));
        registry.insert_host("math:floor", |args| {
            let x = real(single(args)?)?;
            Ok(Box::new(to_int(x.floor())?))
        });
        registry.insert_host("math:ceil", |args| {
            let x = real(single(args)?)?;
            Ok(Box::new(to_int(x.ceil())?))
        });

        registry
    }
}

impl HostResolver for HostRegistry {
    fn resolve(&self, path: &str) -> Option<Function> {
        let (namespace, attribute) = split_path(path);
        let function = self.namespaces.get(namespace)?.get(attribute)?.clone();
        tracing::debug!(path, "resolved host function");
        Some(function)
    }
}

// =====================================================================
// Standard host functions
// =====================================================================

fn single(args: Vec<Box<dyn Any>>) -> Result<Box<dyn Any>, Error> {
    let got = args.len();
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(raw), None) => Ok(raw),
        _ => Err(Error::ArityMismatch {
            expected: Arity::Exact(1),
            got,
        }),
    }
}

fn number(raw: Box<dyn Any>) -> Result<Number, Error> {
    let value = Value::ensure(raw);
    let found = value.type_name();
    Number::from_value(value).ok_or(Error::TypeMismatch {
        position: 1,
        expected: "Number",
        found,
    })
}

fn real(raw: Box<dyn Any>) -> Result<f64, Error> {
    match number(raw)? {
        Number::Complex(_) => Err(Error::TypeMismatch {
            position: 1,
            expected: "real number",
            found: "Complex",
        }),
        n => Ok(n.to_f64().unwrap_or_default()),
    }
}

fn to_int(x: f64) -> Result<IntType, Error> {
    // 2^63 is the first float past the integer range
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if !x.is_finite() || x >= LIMIT || x < -LIMIT {
        return Err(Error::domain(format!("cannot convert {x} to an integer")));
    }
    Ok(x as IntType)
}

fn real_function(args: Vec<Box<dyn Any>>, f: fn(f64) -> f64) -> Result<Box<dyn Any>, Error> {
    let x = real(single(args)?)?;
    let y = f(x);
    if (y.is_nan() && !x.is_nan()) || (y.is_infinite() && x.is_finite()) {
        return Err(Error::domain("math domain error"));
    }
    Ok(Box::new(y))
}

fn host_abs(args: Vec<Box<dyn Any>>) -> Result<Box<dyn Any>, Error> {
    let magnitude: Box<dyn Any> = match number(single(args)?)? {
        Number::Int(n) => Box::new(
            n.checked_abs()
                .ok_or_else(|| Error::domain("integer overflow in abs"))?,
        ),
        Number::Float(x) => Box::new(x.abs()),
        Number::Complex(c) => Box::new(c.norm()),
    };
    Ok(magnitude)
}

/// Round half to even, producing an integer.
fn host_round(args: Vec<Box<dyn Any>>) -> Result<Box<dyn Any>, Error> {
    let rounded = match number(single(args)?)? {
        Number::Int(n) => n,
        Number::Float(x) => to_int(x.round_ties_even())?,
        Number::Complex(_) => {
            return Err(Error::domain("complex numbers cannot be rounded"));
        }
    };
    Ok(Box::new(rounded))
}

fn host_float(args: Vec<Box<dyn Any>>) -> Result<Box<dyn Any>, Error> {
    let value = Value::ensure(single(args)?);
    let x = match value {
        Value::Int(n) => n as f64,
        Value::Float(x) => x,
        Value::Bool(b) => f64::from(u8::from(b)),
        Value::Symbol(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::domain(format!("could not convert '{text}' to a float")))?,
        other => {
            return Err(Error::TypeMismatch {
                position: 1,
                expected: "real number or Symbol",
                found: other.type_name(),
            });
        }
    };
    Ok(Box::new(x))
}

fn host_int(args: Vec<Box<dyn Any>>) -> Result<Box<dyn Any>, Error> {
    let value = Value::ensure(single(args)?);
    let n = match value {
        Value::Int(n) => n,
        Value::Float(x) => to_int(x.trunc())?,
        Value::Bool(b) => IntType::from(b),
        Value::Symbol(text) => text
            .trim()
            .parse::<IntType>()
            .map_err(|_| Error::domain(format!("could not convert '{text}' to an integer")))?,
        other => {
            return Err(Error::TypeMismatch {
                position: 1,
                expected: "real number or Symbol",
                found: other.type_name(),
            });
        }
    };
    Ok(Box::new(n))
}
