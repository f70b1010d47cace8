//! The primitives that rewrite the Context chain instead of computing a
//! value. Each one leaves the accumulator set for whatever context is active
//! when it returns.
use crate::{Interpreter, RuntimeError, Value};

/// `[block, arg*]`. Activates the block; a non-block receiver or an argument
/// count mismatch answers nil without switching.
pub fn block_invoke(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    match args.split_first() {
        Some((&block, rest)) => interp.invoke_block(block, rest)?,
        None => interp.set_accumulator(Value::NIL),
    }
    Ok(Value::NIL)
}

/// `[context, value]`. Returns `value` from the home method of the block
/// running in `context`.
pub fn block_return(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    match *args {
        [context, value] => interp.non_local_return(context, value)?,
        _ => interp.set_accumulator(Value::NIL),
    }
    Ok(Value::NIL)
}

/// `[context, value]`. Abandons the current chain and resumes `context`.
pub fn return_into(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    match *args {
        [context, value] => interp.return_into(context, value)?,
        _ => interp.set_accumulator(Value::NIL),
    }
    Ok(Value::NIL)
}
