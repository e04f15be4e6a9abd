//! Call signatures and the function value.
//!
//! A [`Signature`] is inferred from the Rust parameter types of the function
//! being wrapped, through the [`FromParam`] / [`FromRest`] traits:
//!
//! | Rust parameter  | Spec                          |
//! |-----------------|-------------------------------|
//! | [`Value`]       | any value, passed as is       |
//! | [`Program`]     | unevaluated operand (lazy)    |
//! | a [`Payload`] type (`i64`, `f64`, `bool`, `String`, [`Number`](crate::value::Number), ...) | that kind, flattened to the raw payload |
//! | [`Rest<T>`]     | variadic tail of `T`          |
//!
//! [`Signature::adapt`] checks a call's operands against the signature and
//! flattens the positions that ask for it. [`Function::call`] adapts, then
//! invokes.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::evaluator::{Evaluator, ScopeRef};
use crate::program::Program;
use crate::value::{Kind, Payload, Value};

/// A call-site argument on its way into a function.
pub enum Operand {
    /// An evaluated argument
    Value(Value),
    /// An unevaluated argument, passed to lazy functions
    Program(Program),
    /// A value flattened to its raw host payload
    Raw(Box<dyn Any>),
}

impl Operand {
    fn kind_name(&self) -> &'static str {
        match self {
            Operand::Value(value) => value.type_name(),
            Operand::Program(_) => Kind::Program.name(),
            Operand::Raw(_) => "raw payload",
        }
    }

    /// Unwrap an evaluated value to its raw payload; other operands are kept.
    fn flatten(self) -> Operand {
        match self {
            Operand::Value(value) => Operand::Raw(value.into_raw()),
            other => other,
        }
    }

    /// Raw host form of this operand, used by pass-through host functions.
    pub fn into_raw(self) -> Box<dyn Any> {
        match self {
            Operand::Value(value) => value.into_raw(),
            Operand::Program(program) => Box::new(program),
            Operand::Raw(raw) => raw,
        }
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(value) => write!(f, "Value({value:?})"),
            Operand::Program(program) => write!(f, "Program({program})"),
            Operand::Raw(_) => f.write_str("Raw(..)"),
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl From<Program> for Operand {
    fn from(program: Program) -> Self {
        Operand::Program(program)
    }
}

/// Requirement on one argument position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Required kind; `None` accepts anything
    pub kind: Option<Kind>,
    /// Unwrap to the raw host payload before invoking
    pub flatten: bool,
}

impl ParamSpec {
    pub const ANY: ParamSpec = ParamSpec {
        kind: None,
        flatten: false,
    };

    pub const PROGRAM: ParamSpec = ParamSpec {
        kind: Some(Kind::Program),
        flatten: false,
    };

    pub const fn typed(kind: Kind) -> Self {
        ParamSpec {
            kind: Some(kind),
            flatten: false,
        }
    }

    pub const fn flat(kind: Kind) -> Self {
        ParamSpec {
            kind: Some(kind),
            flatten: true,
        }
    }

    pub fn is_program(&self) -> bool {
        self.kind == Some(Kind::Program)
    }

    fn expected(&self) -> &'static str {
        self.kind.map_or("any value", Kind::name)
    }

    fn accepts(&self, operand: &Operand) -> bool {
        match (self.kind, operand) {
            (None, _) => true,
            (Some(Kind::Program), operand) => matches!(operand, Operand::Program(_)),
            (Some(kind), Operand::Value(value)) => kind.matches(value),
            (Some(_), _) => false,
        }
    }

    fn adapt(&self, operand: Operand, position: usize) -> Result<Operand, Error> {
        if !self.accepts(&operand) {
            return Err(Error::TypeMismatch {
                position,
                expected: self.expected(),
                found: operand.kind_name(),
            });
        }
        Ok(if self.flatten {
            operand.flatten()
        } else {
            operand
        })
    }
}

/// Accepted argument count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// Calling convention of a [`Function`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    parameters: Option<Vec<ParamSpec>>,
    variadic: Option<ParamSpec>,
    lazy: bool,
    eval: bool,
}

impl Signature {
    /// Build a signature from parameter specs.
    ///
    /// The signature is lazy when every spec (fixed and variadic) asks for a
    /// [`Program`]. Mixing Program and evaluated specs is rejected.
    pub fn infer(
        parameters: Vec<ParamSpec>,
        variadic: Option<ParamSpec>,
        eval: bool,
    ) -> Result<Self, Error> {
        let total = parameters.len() + usize::from(variadic.is_some());
        let programs = parameters
            .iter()
            .chain(variadic.as_ref())
            .filter(|spec| spec.is_program())
            .count();

        if programs != 0 && programs != total {
            return Err(Error::InvalidSignature(format!(
                "{programs} of {total} parameters are unevaluated programs; \
                 a function is either fully lazy or fully eager"
            )));
        }

        Ok(Signature {
            parameters: Some(parameters),
            variadic,
            lazy: programs != 0,
            eval,
        })
    }

    /// The "accepts anything" signature: no arity or type checks, every
    /// evaluated argument flattened.
    pub fn pass_through() -> Self {
        Signature {
            parameters: None,
            variadic: None,
            lazy: false,
            eval: false,
        }
    }

    /// `count` untyped, eager parameters.
    pub fn untyped(count: usize) -> Self {
        Signature {
            parameters: Some(vec![ParamSpec::ANY; count]),
            variadic: None,
            lazy: false,
            eval: false,
        }
    }

    /// `count` lazy parameters.
    pub fn lazy(count: usize, eval: bool) -> Self {
        Signature {
            parameters: Some(vec![ParamSpec::PROGRAM; count]),
            variadic: None,
            lazy: true,
            eval,
        }
    }

    pub fn parameters(&self) -> Option<&[ParamSpec]> {
        self.parameters.as_deref()
    }

    pub fn variadic(&self) -> Option<ParamSpec> {
        self.variadic
    }

    /// Operands are passed unevaluated.
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    /// The function receives the calling evaluator.
    pub fn wants_eval(&self) -> bool {
        self.eval
    }

    /// `None` for the pass-through signature.
    pub fn arity(&self) -> Option<Arity> {
        let fixed = self.parameters.as_ref()?.len();
        Some(match self.variadic {
            Some(_) => Arity::AtLeast(fixed),
            None => Arity::Exact(fixed),
        })
    }

    /// Check `args` against this signature and flatten where requested.
    pub fn adapt(&self, args: Vec<Operand>) -> Result<Vec<Operand>, Error> {
        let (Some(parameters), Some(arity)) = (&self.parameters, self.arity()) else {
            return Ok(args.into_iter().map(Operand::flatten).collect());
        };

        if !arity.accepts(args.len()) {
            return Err(Error::ArityMismatch {
                expected: arity,
                got: args.len(),
            });
        }

        args.into_iter()
            .enumerate()
            .map(|(index, arg)| {
                let spec = parameters
                    .get(index)
                    .copied()
                    .or(self.variadic)
                    .unwrap_or(ParamSpec::ANY);
                spec.adapt(arg, index + 1)
            })
            .collect()
    }
}

/// Erased function body.
///
/// Receives the calling evaluator and the adapted operands.
pub type Callable = dyn Fn(&Evaluator, Vec<Operand>) -> Result<Value, Error>;

/// A callable value: the erased body, its signature and a display form.
///
/// A closure also carries the scope it was defined in; its body then runs
/// against that scope instead of the caller's.
#[derive(Clone)]
pub struct Function {
    callable: Rc<Callable>,
    signature: Rc<Signature>,
    repr: Option<Rc<str>>,
    capture: Option<ScopeRef>,
}

impl Function {
    pub fn from_parts<F>(signature: Signature, callable: F) -> Self
    where
        F: Fn(&Evaluator, Vec<Operand>) -> Result<Value, Error> + 'static,
    {
        Function {
            callable: Rc::new(callable),
            signature: Rc::new(signature),
            repr: None,
            capture: None,
        }
    }

    /// Wrap a fixed-arity Rust function; the signature follows its parameter types.
    pub fn fixed<Args, F: IntoFunction<Args>>(f: F) -> Result<Self, Error> {
        f.into_function()
    }

    /// Wrap a Rust function whose last parameter is a [`Rest`] tail.
    pub fn variadic<Args, F: IntoVariadicFunction<Args>>(f: F) -> Result<Self, Error> {
        f.into_variadic_function()
    }

    /// Wrap a Rust function whose first parameter receives the calling evaluator.
    pub fn with_env<Args, F: IntoEnvFunction<Args>>(f: F) -> Result<Self, Error> {
        f.into_env_function()
    }

    /// Wrap a host function taking and returning raw payloads.
    ///
    /// Uses the pass-through signature; the result is coerced with
    /// [`Value::ensure`].
    pub fn host<F>(f: F) -> Self
    where
        F: Fn(Vec<Box<dyn Any>>) -> Result<Box<dyn Any>, Error> + 'static,
    {
        Function::from_parts(Signature::pass_through(), move |_, args| {
            let raw = args.into_iter().map(Operand::into_raw).collect();
            f(raw).map(Value::ensure)
        })
    }

    /// Attach a display form.
    pub fn named(mut self, repr: impl AsRef<str>) -> Self {
        self.repr = Some(Rc::from(repr.as_ref()));
        self
    }

    /// Run the body against `scope` rather than the calling scope.
    pub(crate) fn closing_over(mut self, scope: ScopeRef) -> Self {
        self.capture = Some(scope);
        self
    }

    pub(crate) fn capture(&self) -> Option<&ScopeRef> {
        self.capture.as_ref()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Adapt `args` against the signature and invoke the body.
    pub fn call(&self, args: Vec<Operand>, env: &Evaluator) -> Result<Value, Error> {
        let args = self.signature.adapt(args)?;
        match &self.capture {
            Some(scope) => (self.callable)(&scope.resolve()?, args),
            None => (self.callable)(env, args),
        }
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.callable, &other.callable)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Some(repr) => f.write_str(repr),
            None => f.write_str("#<function>"),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({self})")
    }
}

// =====================================================================
// Parameter conversion
// =====================================================================

/// A Rust type usable as a fixed parameter of a wrapped function.
pub trait FromParam: Sized {
    const SPEC: ParamSpec;

    /// Convert an adapted operand; `position` is 1-based.
    fn from_operand(operand: Operand, position: usize) -> Result<Self, Error>;
}

fn mismatch(spec: ParamSpec, operand: &Operand, position: usize) -> Error {
    Error::TypeMismatch {
        position,
        expected: spec.expected(),
        found: operand.kind_name(),
    }
}

impl FromParam for Value {
    const SPEC: ParamSpec = ParamSpec::ANY;

    fn from_operand(operand: Operand, position: usize) -> Result<Self, Error> {
        match operand {
            Operand::Value(value) => Ok(value),
            Operand::Raw(raw) => Ok(Value::ensure(raw)),
            other => Err(mismatch(Self::SPEC, &other, position)),
        }
    }
}

impl FromParam for Program {
    const SPEC: ParamSpec = ParamSpec::PROGRAM;

    fn from_operand(operand: Operand, position: usize) -> Result<Self, Error> {
        match operand {
            Operand::Program(program) => Ok(program),
            other => Err(mismatch(Self::SPEC, &other, position)),
        }
    }
}

// Payload types are flattened: the body receives the unwrapped host value.
impl<T: Payload> FromParam for T {
    const SPEC: ParamSpec = ParamSpec::flat(T::KIND);

    fn from_operand(operand: Operand, position: usize) -> Result<Self, Error> {
        let found = operand.kind_name();
        let payload = match operand {
            Operand::Raw(raw) => T::from_raw(raw).ok(),
            Operand::Value(value) => T::from_value(value),
            Operand::Program(_) => None,
        };
        payload.ok_or(Error::TypeMismatch {
            position,
            expected: T::KIND.name(),
            found,
        })
    }
}

/// Variadic tail parameter: every argument past the fixed prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct Rest<T>(pub Vec<T>);

impl<T> Rest<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> std::ops::Deref for Rest<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> IntoIterator for Rest<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A Rust type usable as the variadic tail of a wrapped function.
pub trait FromRest: Sized {
    const SPEC: ParamSpec;

    fn from_operands<I>(operands: I) -> Result<Self, Error>
    where
        I: Iterator<Item = (usize, Operand)>;
}

impl<T: FromParam> FromRest for Rest<T> {
    const SPEC: ParamSpec = T::SPEC;

    fn from_operands<I>(operands: I) -> Result<Self, Error>
    where
        I: Iterator<Item = (usize, Operand)>,
    {
        operands
            .map(|(index, operand)| T::from_operand(operand, index + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Rest)
    }
}

/// Normalizes function results to `Result<Value, Error>`.
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl<T> IntoValueResult for Result<T, Error>
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

impl<T> IntoValueResult for T
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        Ok(self.into())
    }
}

/// Positional reader over operands already checked by [`Signature::adapt`].
struct Params {
    operands: std::iter::Enumerate<std::vec::IntoIter<Operand>>,
    expected: Arity,
    got: usize,
}

impl Params {
    fn new(operands: Vec<Operand>, expected: Arity) -> Self {
        Params {
            got: operands.len(),
            operands: operands.into_iter().enumerate(),
            expected,
        }
    }

    fn next<T: FromParam>(&mut self) -> Result<T, Error> {
        match self.operands.next() {
            Some((index, operand)) => T::from_operand(operand, index + 1),
            None => Err(Error::ArityMismatch {
                expected: self.expected,
                got: self.got,
            }),
        }
    }

    fn rest<T: FromRest>(self) -> Result<T, Error> {
        T::from_operands(self.operands)
    }
}

// =====================================================================
// Adapter traits
// =====================================================================

/// Converts a fixed-arity Rust function into a [`Function`].
pub trait IntoFunction<Args> {
    fn into_function(self) -> Result<Function, Error>;
}

/// Converts a Rust function ending in a [`Rest`] parameter into a [`Function`].
pub trait IntoVariadicFunction<Args> {
    fn into_variadic_function(self) -> Result<Function, Error>;
}

/// Converts a Rust function taking `&Evaluator` first into a [`Function`]
/// with evaluator injection.
pub trait IntoEnvFunction<Args> {
    fn into_env_function(self) -> Result<Function, Error>;
}

impl<F, R> IntoFunction<()> for F
where
    F: Fn() -> R + 'static,
    R: IntoValueResult,
{
    fn into_function(self) -> Result<Function, Error> {
        let signature = Signature::infer(Vec::new(), None, false)?;
        Ok(Function::from_parts(signature, move |_, _| {
            (self)().into_value_result()
        }))
    }
}

impl<F, R> IntoEnvFunction<()> for F
where
    F: Fn(&Evaluator) -> R + 'static,
    R: IntoValueResult,
{
    fn into_env_function(self) -> Result<Function, Error> {
        let signature = Signature::infer(Vec::new(), None, true)?;
        Ok(Function::from_parts(signature, move |env, _| {
            (self)(env).into_value_result()
        }))
    }
}

/// Implements the fixed-arity and evaluator-injected adapters for one arity.
macro_rules! impl_into_function_for_arity {
    ($arity:expr, $( $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoFunction<( $( $A, )+ )> for F
        where
            F: Fn( $( $A ),+ ) -> R + 'static,
            $( $A: FromParam, )+
            R: IntoValueResult,
        {
            fn into_function(self) -> Result<Function, Error> {
                let signature = Signature::infer(vec![ $( $A::SPEC ),+ ], None, false)?;
                Ok(Function::from_parts(signature, move |_, args| {
                    let mut params = Params::new(args, Arity::Exact($arity));
                    $( let $p = params.next::<$A>()?; )+
                    (self)( $( $p ),+ ).into_value_result()
                }))
            }
        }

        impl<F, R, $( $A ),+> IntoEnvFunction<( $( $A, )+ )> for F
        where
            F: Fn( &Evaluator, $( $A ),+ ) -> R + 'static,
            $( $A: FromParam, )+
            R: IntoValueResult,
        {
            fn into_env_function(self) -> Result<Function, Error> {
                let signature = Signature::infer(vec![ $( $A::SPEC ),+ ], None, true)?;
                Ok(Function::from_parts(signature, move |env, args| {
                    let mut params = Params::new(args, Arity::Exact($arity));
                    $( let $p = params.next::<$A>()?; )+
                    (self)( env, $( $p ),+ ).into_value_result()
                }))
            }
        }
    };
}

impl_into_function_for_arity!(1, p0: A1);
impl_into_function_for_arity!(2, p0: A1, p1: A2);
impl_into_function_for_arity!(3, p0: A1, p1: A2, p2: A3);
impl_into_function_for_arity!(4, p0: A1, p1: A2, p2: A3, p3: A4);

impl<F, I, R> IntoVariadicFunction<(I,)> for F
where
    F: Fn(I) -> R + 'static,
    I: FromRest,
    R: IntoValueResult,
{
    fn into_variadic_function(self) -> Result<Function, Error> {
        let signature = Signature::infer(Vec::new(), Some(I::SPEC), false)?;
        Ok(Function::from_parts(signature, move |_, args| {
            let params = Params::new(args, Arity::AtLeast(0));
            (self)(params.rest::<I>()?).into_value_result()
        }))
    }
}

/// Implements the variadic adapter for a fixed prefix followed by a rest parameter.
macro_rules! impl_into_variadic_function_for_prefix {
    ($prefix:expr, $( $p:ident : $A:ident ),+ ) => {
        impl<F, I, R, $( $A ),+> IntoVariadicFunction<( $( $A, )+ I, )> for F
        where
            F: Fn( $( $A ),+, I ) -> R + 'static,
            $( $A: FromParam, )+
            I: FromRest,
            R: IntoValueResult,
        {
            fn into_variadic_function(self) -> Result<Function, Error> {
                let signature =
                    Signature::infer(vec![ $( $A::SPEC ),+ ], Some(I::SPEC), false)?;
                Ok(Function::from_parts(signature, move |_, args| {
                    let mut params = Params::new(args, Arity::AtLeast($prefix));
                    $( let $p = params.next::<$A>()?; )+
                    (self)( $( $p ),+, params.rest::<I>()? ).into_value_result()
                }))
            }
        }
    };
}

impl_into_variadic_function_for_prefix!(1, p0: A1);
impl_into_variadic_function_for_prefix!(2, p0: A1, p1: A2);
impl_into_variadic_function_for_prefix!(3, p0: A1, p1: A2, p2: A3);
