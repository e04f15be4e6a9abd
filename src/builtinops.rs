//! Built-in arithmetic, comparison and logic operations.
//!
//! Every operation is an ordinary Rust function wrapped through the typed
//! adapters in [`crate::function`], so its [`Signature`](crate::Signature)
//! comes from its parameter types:
//!
//! ```text
//! (+ 1 2 3)        ; 6      two or more Numbers
//! (/ 7 2)          ; 3.5    true division
//! (// 7 2)         ; 3      floor division
//! (% -7 2)         ; 1      result takes the divisor's sign
//! (^ 2 0.5)        ; 1.4142135623730951
//! (< 1 2.5)        ; true
//! (= 1 1.0)        ; false  variant and payload must both match
//! (and true false) ; false  eager, Bools only
//! ```
//!
//! ## Numeric tower
//!
//! Mixed operands promote `Int` → `Float` → `Complex`. Integer arithmetic is
//! checked: overflow is a [`Error::DomainError`] rather than a wrap. Any zero
//! divisor is a domain error as well. Complex numbers have no ordering, so the
//! comparisons, `max`, `min`, `//` and `%` reject them.

use std::cmp::Ordering;

use crate::Error;
use crate::function::{Function, Rest};
use crate::value::{Complex, IntType, Number, Value};

const ZERO_DIVISOR: &str = "The divisor cannot be zero.";

/// Operands after numeric promotion.
enum Promoted {
    Int(IntType, IntType),
    Float(f64, f64),
    Complex(Complex, Complex),
}

fn promote(a: Number, b: Number) -> Promoted {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => Promoted::Int(x, y),
        (Number::Complex(_), _) | (_, Number::Complex(_)) => {
            Promoted::Complex(a.to_complex(), b.to_complex())
        }
        _ => Promoted::Float(
            a.to_f64().unwrap_or_default(),
            b.to_f64().unwrap_or_default(),
        ),
    }
}

fn overflow(operation: &str) -> Error {
    Error::domain(format!("integer overflow in {operation}"))
}

fn no_complex(operation: &str) -> Error {
    Error::domain(format!("'{operation}' is not supported for complex numbers"))
}

fn plus(a: Number, b: Number) -> Result<Number, Error> {
    Ok(match promote(a, b) {
        Promoted::Int(x, y) => Number::Int(x.checked_add(y).ok_or_else(|| overflow("addition"))?),
        Promoted::Float(x, y) => Number::Float(x + y),
        Promoted::Complex(x, y) => Number::Complex(x + y),
    })
}

fn times(a: Number, b: Number) -> Result<Number, Error> {
    Ok(match promote(a, b) {
        Promoted::Int(x, y) => {
            Number::Int(x.checked_mul(y).ok_or_else(|| overflow("multiplication"))?)
        }
        Promoted::Float(x, y) => Number::Float(x * y),
        Promoted::Complex(x, y) => Number::Complex(x * y),
    })
}

fn builtin_add(a: Number, b: Number, rest: Rest<Number>) -> Result<Number, Error> {
    rest.into_iter().try_fold(plus(a, b)?, plus)
}

fn builtin_mul(a: Number, b: Number, rest: Rest<Number>) -> Result<Number, Error> {
    rest.into_iter().try_fold(times(a, b)?, times)
}

fn builtin_sub(a: Number, b: Number) -> Result<Number, Error> {
    Ok(match promote(a, b) {
        Promoted::Int(x, y) => Number::Int(x.checked_sub(y).ok_or_else(|| overflow("subtraction"))?),
        Promoted::Float(x, y) => Number::Float(x - y),
        Promoted::Complex(x, y) => Number::Complex(x - y),
    })
}

fn builtin_div(a: Number, b: Number) -> Result<Number, Error> {
    if b.is_zero() {
        return Err(Error::domain(ZERO_DIVISOR));
    }
    Ok(match promote(a, b) {
        Promoted::Int(x, y) => Number::Float(x as f64 / y as f64),
        Promoted::Float(x, y) => Number::Float(x / y),
        Promoted::Complex(x, y) => Number::Complex(x / y),
    })
}

fn builtin_floor_div(a: Number, b: Number) -> Result<Number, Error> {
    if b.is_zero() {
        return Err(Error::domain(ZERO_DIVISOR));
    }
    Ok(match promote(a, b) {
        Promoted::Int(x, y) => {
            let quotient = x.checked_div(y).ok_or_else(|| overflow("division"))?;
            // Round toward negative infinity
            if x % y != 0 && (x < 0) != (y < 0) {
                Number::Int(quotient - 1)
            } else {
                Number::Int(quotient)
            }
        }
        Promoted::Float(x, y) => Number::Float((x / y).floor()),
        Promoted::Complex(..) => return Err(no_complex("//")),
    })
}

fn builtin_mod(a: Number, b: Number) -> Result<Number, Error> {
    if b.is_zero() {
        return Err(Error::domain(ZERO_DIVISOR));
    }
    Ok(match promote(a, b) {
        Promoted::Int(x, y) => {
            // IntType::MIN % -1 overflows in Rust but is exactly 0
            let remainder = if y == -1 { 0 } else { x % y };
            if remainder != 0 && (remainder < 0) != (y < 0) {
                Number::Int(remainder + y)
            } else {
                Number::Int(remainder)
            }
        }
        Promoted::Float(x, y) => {
            let remainder = x % y;
            if remainder != 0.0 && (remainder < 0.0) != (y < 0.0) {
                Number::Float(remainder + y)
            } else {
                Number::Float(remainder)
            }
        }
        Promoted::Complex(..) => return Err(no_complex("%")),
    })
}

fn builtin_pow(a: Number, b: Number) -> Result<Number, Error> {
    if a.is_zero() && b.to_f64().is_some_and(|e| e < 0.0) {
        return Err(Error::domain("0 cannot be raised to a negative power"));
    }
    Ok(match promote(a, b) {
        // Negative exponents leave the integers
        Promoted::Int(x, y) if y < 0 => Number::Float((x as f64).powf(y as f64)),
        Promoted::Int(x, y) => match u32::try_from(y) {
            Ok(exponent) => Number::Int(x.checked_pow(exponent).ok_or_else(|| overflow("power"))?),
            // Past u32 only these bases stay in range
            Err(_) => match x {
                0 | 1 => Number::Int(x),
                -1 => Number::Int(if y % 2 == 0 { 1 } else { -1 }),
                _ => return Err(overflow("power")),
            },
        },
        Promoted::Float(x, y) if x < 0.0 && y.fract() != 0.0 => {
            Number::Complex(Complex::new(x, 0.0).powc(Complex::new(y, 0.0)))
        }
        Promoted::Float(x, y) => Number::Float(x.powf(y)),
        Promoted::Complex(x, y) => Number::Complex(x.powc(y)),
    })
}

/// Order two real numbers; `None` when a NaN is involved.
fn compare(a: Number, b: Number, operation: &str) -> Result<Option<Ordering>, Error> {
    match promote(a, b) {
        Promoted::Int(x, y) => Ok(Some(x.cmp(&y))),
        Promoted::Float(x, y) => Ok(x.partial_cmp(&y)),
        Promoted::Complex(..) => Err(no_complex(operation)),
    }
}

// Macro to generate numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:expr, $ordering:pat) => {
        fn $name(a: Number, b: Number) -> Result<bool, Error> {
            Ok(matches!(compare(a, b, $op)?, Some($ordering)))
        }
    };
}

numeric_comparison!(builtin_lt, "<", Ordering::Less);
numeric_comparison!(builtin_le, "<=", Ordering::Less | Ordering::Equal);
numeric_comparison!(builtin_gt, ">", Ordering::Greater);
numeric_comparison!(builtin_ge, ">=", Ordering::Greater | Ordering::Equal);

/// Keep the first operand unless a later one orders strictly `wanted` of it.
fn extreme(
    first: Number,
    rest: impl IntoIterator<Item = Number>,
    wanted: Ordering,
    operation: &str,
) -> Result<Number, Error> {
    rest.into_iter().try_fold(first, |best, candidate| {
        Ok(if compare(candidate, best, operation)? == Some(wanted) {
            candidate
        } else {
            best
        })
    })
}

fn builtin_max(a: Number, b: Number, rest: Rest<Number>) -> Result<Number, Error> {
    extreme(a, std::iter::once(b).chain(rest), Ordering::Greater, "max")
}

fn builtin_min(a: Number, b: Number, rest: Rest<Number>) -> Result<Number, Error> {
    extreme(a, std::iter::once(b).chain(rest), Ordering::Less, "min")
}

fn builtin_equal(a: Value, b: Value) -> bool {
    a == b
}

fn builtin_not_equal(a: Value, b: Value) -> bool {
    a != b
}

fn builtin_not(b: bool) -> bool {
    !b
}

fn builtin_and(a: bool, b: bool, rest: Rest<bool>) -> bool {
    a && b && rest.iter().all(|&x| x)
}

fn builtin_or(a: bool, b: bool, rest: Rest<bool>) -> bool {
    a || b || rest.iter().any(|&x| x)
}

fn builtin_print(value: Value) {
    println!("{value}");
}

/// Every builtin operation under its name, with display form `#<builtin:name>`.
pub fn registry() -> Result<Vec<(&'static str, Function)>, Error> {
    let table = vec![
        // Arithmetic
        ("+", Function::variadic(builtin_add)?),
        ("*", Function::variadic(builtin_mul)?),
        ("-", Function::fixed(builtin_sub)?),
        ("/", Function::fixed(builtin_div)?),
        ("//", Function::fixed(builtin_floor_div)?),
        ("%", Function::fixed(builtin_mod)?),
        ("^", Function::fixed(builtin_pow)?),
        ("max", Function::variadic(builtin_max)?),
        ("min", Function::variadic(builtin_min)?),
        // Comparison
        ("<", Function::fixed(builtin_lt)?),
        ("<=", Function::fixed(builtin_le)?),
        (">", Function::fixed(builtin_gt)?),
        (">=", Function::fixed(builtin_ge)?),
        ("=", Function::fixed(builtin_equal)?),
        ("!=", Function::fixed(builtin_not_equal)?),
        // Logic
        ("not", Function::fixed(builtin_not)?),
        ("and", Function::variadic(builtin_and)?),
        ("or", Function::variadic(builtin_or)?),
        // Output
        ("print", Function::fixed(builtin_print)?),
    ];

    Ok(table
        .into_iter()
        .map(|(name, function)| (name, function.named(format!("#<builtin:{name}>"))))
        .collect())
}
