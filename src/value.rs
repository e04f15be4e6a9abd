//! The tagged value model.
//!
//! [`Value`] is a closed set of variants, each carrying the exact Rust payload
//! type its [`Kind`] declares. Values are immutable; functions and host
//! objects are shared by reference count. [`Value::ensure`] is the single entry
//! point for turning an arbitrary host value (a `Box<dyn Any>`) into a
//! `Value`: it tries each concrete variant in a fixed priority order and falls
//! back to [`Value::Object`].
//!
//! Literal recognition for the evaluator lives here too
//! ([`Value::literal`]): boolean spellings first, then `Int`, `Float` and
//! `Complex` parsers in that order.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::function::Function;

/// Integer payload type
pub(crate) type IntType = i64;

/// Spelling of the true literal
pub const TRUE_LITERAL: &str = "true";
/// Spelling of the false literal
pub const FALSE_LITERAL: &str = "false";

/// Check if a string is a valid symbol name
/// Valid: non-empty, not a parenthesis, at least one character that is not a digit.
/// The last rule keeps bare numerals from ever being assignable names.
pub fn is_valid_symbol(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['(', ')'])
        && !name.contains(char::is_whitespace)
        && name.chars().any(|c| !c.is_ascii_digit())
}

/// Variant tags of [`Value`], plus `Number` (any numeric variant) and
/// `Program` (an unevaluated operand) for use in parameter specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Bool,
    Int,
    Float,
    Complex,
    Number,
    Symbol,
    Empty,
    Function,
    Object,
    Program,
}

impl Kind {
    /// Concrete variants in the order [`Value::ensure`] tries them.
    /// `Bool` precedes `Int`; `Object` is the fallback and is not listed.
    pub const PRIORITY: [Kind; 7] = [
        Kind::Bool,
        Kind::Int,
        Kind::Float,
        Kind::Complex,
        Kind::Symbol,
        Kind::Empty,
        Kind::Function,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Kind::Bool => "Bool",
            Kind::Int => "Int",
            Kind::Float => "Float",
            Kind::Complex => "Complex",
            Kind::Number => "Number",
            Kind::Symbol => "Symbol",
            Kind::Empty => "Empty",
            Kind::Function => "Function",
            Kind::Object => "Object",
            Kind::Program => "Program",
        }
    }

    /// Whether an evaluated value satisfies this kind.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Kind::Number => matches!(
                value,
                Value::Int(_) | Value::Float(_) | Value::Complex(_)
            ),
            Kind::Program => false,
            kind => value.kind() == kind,
        }
    }

    /// Wrap `raw` in this variant if its runtime type is the variant's
    /// payload type; hand it back untouched otherwise.
    pub fn wrap(self, raw: Box<dyn Any>) -> Result<Value, Box<dyn Any>> {
        match self {
            Kind::Bool => raw.downcast::<bool>().map(|b| Value::Bool(*b)),
            Kind::Int => {
                let raw = match raw.downcast::<IntType>() {
                    Ok(n) => return Ok(Value::Int(*n)),
                    Err(raw) => raw,
                };
                let raw = match raw.downcast::<i32>() {
                    Ok(n) => return Ok(Value::Int(IntType::from(*n))),
                    Err(raw) => raw,
                };
                raw.downcast::<u32>().map(|n| Value::Int(IntType::from(*n)))
            }
            Kind::Float => {
                let raw = match raw.downcast::<f64>() {
                    Ok(x) => return Ok(Value::Float(*x)),
                    Err(raw) => raw,
                };
                raw.downcast::<f32>().map(|x| Value::Float(f64::from(*x)))
            }
            Kind::Complex => raw.downcast::<Complex>().map(|c| Value::Complex(*c)),
            Kind::Symbol => {
                let raw = match raw.downcast::<String>() {
                    Ok(s) => return Ok(Value::Symbol(*s)),
                    Err(raw) => raw,
                };
                raw.downcast::<&'static str>()
                    .map(|s| Value::Symbol((*s).to_owned()))
            }
            Kind::Empty => raw.downcast::<()>().map(|_| Value::Empty),
            Kind::Function => raw.downcast::<Function>().map(|f| Value::Function(*f)),
            Kind::Object => match raw.downcast::<Object>() {
                Ok(object) => Ok(Value::Object(*object)),
                Err(raw) => Ok(Value::Object(Object::opaque(raw))),
            },
            Kind::Number | Kind::Program => Err(raw),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Complex number payload
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub fn new(re: f64, im: f64) -> Self {
        Complex { re, im }
    }

    /// Parse a literal such as `2j`, `-1.5j`, `1+2j` or `3e2-4J`.
    ///
    /// The imaginary coefficient must contain a digit, so `j` and `1+j`
    /// are not literals.
    pub fn parse(text: &str) -> Option<Complex> {
        let body = text.strip_suffix(['j', 'J'])?;
        let bytes = body.as_bytes();

        // Sign that starts the imaginary part: not the leading sign and not
        // the sign of an exponent.
        let split = (1..bytes.len()).rev().find(|&i| {
            matches!(bytes[i], b'+' | b'-') && !matches!(bytes[i - 1], b'e' | b'E')
        });
        let (re, im) = match split {
            Some(i) => (&body[..i], &body[i..]),
            None => ("", body),
        };

        if !im.bytes().any(|b| b.is_ascii_digit()) {
            return None;
        }
        let im = im.parse::<f64>().ok()?;
        let re = if re.is_empty() {
            0.0
        } else {
            re.parse::<f64>().ok()?
        };

        Some(Complex { re, im })
    }
}

impl fmt::Display for Complex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.re == 0.0 && self.re.is_sign_positive() {
            write!(f, "{}j", self.im)
        } else {
            let sign = if self.im.is_sign_negative() { '-' } else { '+' };
            write!(f, "({}{}{}j)", self.re, sign, self.im.abs())
        }
    }
}

impl Complex {
    pub fn is_zero(self) -> bool {
        self.re == 0.0 && self.im == 0.0
    }

    pub fn norm(self) -> f64 {
        self.re.hypot(self.im)
    }

    fn ln(self) -> Complex {
        Complex::new(self.norm().ln(), self.im.atan2(self.re))
    }

    fn exp(self) -> Complex {
        let scale = self.re.exp();
        Complex::new(scale * self.im.cos(), scale * self.im.sin())
    }

    /// Principal value of `self` raised to `exponent`. Zero base gives zero.
    pub fn powc(self, exponent: Complex) -> Complex {
        if self.is_zero() {
            return Complex::default();
        }
        (exponent * self.ln()).exp()
    }
}

impl std::ops::Add for Complex {
    type Output = Complex;

    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl std::ops::Sub for Complex {
    type Output = Complex;

    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl std::ops::Mul for Complex {
    type Output = Complex;

    fn mul(self, rhs: Complex) -> Complex {
        Complex::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

impl std::ops::Div for Complex {
    type Output = Complex;

    fn div(self, rhs: Complex) -> Complex {
        let denominator = rhs.re * rhs.re + rhs.im * rhs.im;
        Complex::new(
            (self.re * rhs.re + self.im * rhs.im) / denominator,
            (self.im * rhs.re - self.re * rhs.im) / denominator,
        )
    }
}

/// Any numeric payload, as received by arithmetic builtins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(IntType),
    Float(f64),
    Complex(Complex),
}

impl Number {
    /// Real value as a float; `None` for complex numbers.
    pub fn to_f64(self) -> Option<f64> {
        match self {
            Number::Int(n) => Some(n as f64),
            Number::Float(x) => Some(x),
            Number::Complex(_) => None,
        }
    }

    pub fn to_complex(self) -> Complex {
        match self {
            Number::Complex(c) => c,
            real => Complex::new(real.to_f64().unwrap_or_default(), 0.0),
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Int(n) => n == 0,
            Number::Float(x) => x == 0.0,
            Number::Complex(c) => c.is_zero(),
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(n) => Value::Int(n),
            Number::Float(x) => Value::Float(x),
            Number::Complex(c) => Value::Complex(c),
        }
    }
}

/// Opaque host value.
///
/// Equality is identity: two objects are equal only when they share the same
/// payload allocation.
#[derive(Clone)]
pub struct Object {
    type_name: &'static str,
    repr: Rc<str>,
    payload: Rc<dyn Any>,
}

impl Object {
    pub fn new<T: Any + fmt::Debug>(payload: T) -> Self {
        Object {
            type_name: std::any::type_name::<T>(),
            repr: Rc::from(format!("{payload:?}")),
            payload: Rc::new(payload),
        }
    }

    /// Wrap a value whose type is unknown at this point.
    pub(crate) fn opaque(payload: Box<dyn Any>) -> Self {
        Object {
            type_name: "host object",
            repr: Rc::from("<host object>"),
            payload: Rc::from(payload),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({}: {})", self.type_name, self.repr)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.payload, &other.payload)
    }
}

/// Core value type in the interpreter
#[derive(Clone, Debug)]
pub enum Value {
    Bool(bool),
    Int(IntType),
    Float(f64),
    Complex(Complex),
    /// Text; serves both as string data and as an identifier
    Symbol(String),
    /// The unit / no-result value
    Empty,
    Function(Function),
    /// Fallback for any host value no other variant covers
    Object(Object),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Complex(_) => Kind::Complex,
            Value::Symbol(_) => Kind::Symbol,
            Value::Empty => Kind::Empty,
            Value::Function(_) => Kind::Function,
            Value::Object(_) => Kind::Object,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Everything except `Bool(false)` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Recognize a literal token: `true`/`false`, then integer, float and
    /// complex spellings in that order. Numeric literals contain at least one
    /// ASCII digit, so `inf`, `nan` and `j` remain symbols.
    pub fn literal(token: &str) -> Option<Value> {
        match token {
            TRUE_LITERAL => return Some(Value::Bool(true)),
            FALSE_LITERAL => return Some(Value::Bool(false)),
            _ => {}
        }

        if !token.bytes().any(|b| b.is_ascii_digit()) {
            return None;
        }
        if let Ok(n) = token.parse::<IntType>() {
            return Some(Value::Int(n));
        }
        if let Ok(x) = token.parse::<f64>() {
            return Some(Value::Float(x));
        }
        Complex::parse(token).map(Value::Complex)
    }

    /// Coerce an arbitrary host value into a `Value`.
    ///
    /// A boxed `Value` is returned unchanged. Otherwise each concrete variant
    /// in [`Kind::PRIORITY`] gets a chance to claim the payload; whatever is
    /// left becomes an [`Object`].
    pub fn ensure(raw: Box<dyn Any>) -> Value {
        let mut raw = match raw.downcast::<Value>() {
            Ok(value) => return *value,
            Err(raw) => raw,
        };
        for kind in Kind::PRIORITY {
            match kind.wrap(raw) {
                Ok(value) => return value,
                Err(rejected) => raw = rejected,
            }
        }
        match Kind::Object.wrap(raw) {
            Ok(value) => value,
            Err(raw) => Value::Object(Object::opaque(raw)),
        }
    }

    /// Unwrap to the raw host payload. `ensure(v.into_raw()) == v`.
    pub fn into_raw(self) -> Box<dyn Any> {
        match self {
            Value::Bool(b) => Box::new(b),
            Value::Int(n) => Box::new(n),
            Value::Float(x) => Box::new(x),
            Value::Complex(c) => Box::new(c),
            Value::Symbol(s) => Box::new(s),
            Value::Empty => Box::new(()),
            Value::Function(f) => Box::new(f),
            Value::Object(o) => Box::new(o),
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Symbol(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Symbol(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<Complex> for Value {
    fn from(c: Complex) -> Self {
        Value::Complex(c)
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Empty
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

impl From<Box<dyn Any>> for Value {
    fn from(raw: Box<dyn Any>) -> Self {
        Value::ensure(raw)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Int(IntType::from(n))
            }
        }
    };
}

// Generate From implementations for all losslessly convertible integer types
impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(IntType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

/// A Rust type that is the payload of some value kind.
///
/// Parameters of these types are *flattened*: the builtin receives the raw
/// payload rather than the wrapping `Value`.
pub trait Payload: Sized + 'static {
    const KIND: Kind;

    fn from_value(value: Value) -> Option<Self>;

    /// Take back a payload flattened by [`Value::into_raw`].
    fn from_raw(raw: Box<dyn Any>) -> Result<Self, Box<dyn Any>> {
        raw.downcast::<Self>().map(|payload| *payload)
    }
}

impl Payload for bool {
    const KIND: Kind = Kind::Bool;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl Payload for IntType {
    const KIND: Kind = Kind::Int;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }
}

impl Payload for f64 {
    const KIND: Kind = Kind::Float;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float(x) => Some(x),
            _ => None,
        }
    }
}

impl Payload for Complex {
    const KIND: Kind = Kind::Complex;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Complex(c) => Some(c),
            _ => None,
        }
    }
}

impl Payload for Number {
    const KIND: Kind = Kind::Number;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(n) => Some(Number::Int(n)),
            Value::Float(x) => Some(Number::Float(x)),
            Value::Complex(c) => Some(Number::Complex(c)),
            _ => None,
        }
    }

    // Flattening stores the concrete numeric payload, never a Number
    fn from_raw(raw: Box<dyn Any>) -> Result<Self, Box<dyn Any>> {
        let raw = match IntType::from_raw(raw) {
            Ok(n) => return Ok(Number::Int(n)),
            Err(raw) => raw,
        };
        let raw = match f64::from_raw(raw) {
            Ok(x) => return Ok(Number::Float(x)),
            Err(raw) => raw,
        };
        Complex::from_raw(raw).map(Number::Complex)
    }
}

impl Payload for String {
    const KIND: Kind = Kind::Symbol;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

impl Payload for Function {
    const KIND: Kind = Kind::Function;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }
}

impl Payload for Object {
    const KIND: Kind = Kind::Object;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
}

/// Helper function for creating symbols
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating Values from Rust literals
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => f.write_str(if *b { TRUE_LITERAL } else { FALSE_LITERAL }),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Complex(c) => write!(f, "{c}"),
            Value::Symbol(s) => f.write_str(s),
            Value::Empty => f.write_str("<empty>"),
            Value::Function(func) => write!(f, "{func}"),
            Value::Object(o) => f.write_str(&o.repr),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Complex(a), Value::Complex(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Empty, Value::Empty) => true,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false, // Different variants are never equal
        }
    }
}
