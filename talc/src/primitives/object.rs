use crate::class::instance_size;
use crate::{Interpreter, RuntimeError, Value};

pub fn identical(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(match *args {
        [a, b] => interp.runtime().boolean(a == b),
        _ => Value::NIL,
    })
}

pub fn class_of(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(interp.runtime().class_of(args[0]))
}

pub fn identity_hash(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::from_usize(interp.runtime().heap.identity_hash(args[0]) as usize))
}

pub fn print_string(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let rt = interp.runtime_mut();
    let text = rt.print_string(args[0]);
    Ok(rt.new_string(&text)?)
}

pub fn display_string(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let rt = interp.runtime_mut();
    let text = rt.display_string(args[0]);
    Ok(rt.new_string(&text)?)
}

/// Appends the display string of the argument to the Transcript.
pub fn transcript_show(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let rt = interp.runtime_mut();
    let line = rt.display_string(args[0]);
    rt.show(line);
    Ok(args[0])
}

pub fn basic_new(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let class = args[0];
    let rt = interp.runtime_mut();
    if !rt.is_class(class) {
        return Ok(Value::NIL);
    }
    let size = instance_size(&rt.heap, class);
    Ok(rt.heap.allocate_pointers(class, size)?)
}
