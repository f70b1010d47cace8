use crate::{Interpreter, RuntimeError, Value};

fn integers(args: &[Value]) -> Option<(i64, i64)> {
    match *args {
        [a, b] => Some((a.as_i64()?, b.as_i64()?)),
        _ => None,
    }
}

/// Overflow out of the small-integer range answers nil like any other
/// unsupported operand.
fn arithmetic(args: &[Value], op: fn(i64, i64) -> Option<i64>) -> Result<Value, RuntimeError> {
    Ok(integers(args)
        .and_then(|(a, b)| op(a, b))
        .and_then(Value::from_i64)
        .unwrap_or(Value::NIL))
}

fn comparison(
    interp: &mut Interpreter<'_>,
    args: &[Value],
    op: fn(i64, i64) -> bool,
) -> Result<Value, RuntimeError> {
    Ok(match integers(args) {
        Some((a, b)) => interp.runtime().boolean(op(a, b)),
        None => Value::NIL,
    })
}

/// Division rounding toward negative infinity.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

/// Remainder taking the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && (r < 0) != (b < 0) {
        Some(r + b)
    } else {
        Some(r)
    }
}

pub fn add(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    arithmetic(args, i64::checked_add)
}

pub fn subtract(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    arithmetic(args, i64::checked_sub)
}

pub fn multiply(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    arithmetic(args, i64::checked_mul)
}

pub fn quotient(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    arithmetic(args, floor_div)
}

pub fn remainder(_: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    arithmetic(args, floor_mod)
}

pub fn less(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    comparison(interp, args, |a, b| a < b)
}

pub fn greater(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    comparison(interp, args, |a, b| a > b)
}

pub fn less_equal(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    comparison(interp, args, |a, b| a <= b)
}

pub fn greater_equal(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    comparison(interp, args, |a, b| a >= b)
}

pub fn equal(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    comparison(interp, args, |a, b| a == b)
}

pub fn not_equal(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    comparison(interp, args, |a, b| a != b)
}
