use crate::dictionary::{METHOD_DICTIONARY_BUCKETS, new_dictionary};
use crate::{Interpreter, ObjectKind, Runtime, RuntimeError, Value, dictionary};

/// Indexable shapes, by class. Byte objects are read-only.
enum Indexable {
    Array,
    Bytes,
}

fn indexable(rt: &Runtime, value: Value) -> Option<Indexable> {
    if !value.is_reference() {
        return None;
    }
    match rt.heap.kind(value) {
        ObjectKind::Pointers if rt.is_kind_of(value, rt.classes.array) => Some(Indexable::Array),
        ObjectKind::Bytes => Some(Indexable::Bytes),
        _ => None,
    }
}

fn length(rt: &Runtime, value: Value, shape: &Indexable) -> usize {
    match shape {
        Indexable::Array => rt.heap.slot_count(value),
        Indexable::Bytes => rt.heap.byte_len(value),
    }
}

/// Zero-based position of a one-based index, if in bounds.
fn position(rt: &Runtime, value: Value, shape: &Indexable, index: Value) -> Option<usize> {
    let index = index.as_usize()?;
    (1..=length(rt, value, shape)).contains(&index).then(|| index - 1)
}

pub fn array_new(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let &[class, size] = args else {
        return Ok(Value::NIL);
    };
    let rt = interp.runtime_mut();
    let Some(size) = size.as_usize() else {
        return Ok(Value::NIL);
    };
    if !rt.is_class(class) || !rt.inherits_from(class, rt.classes.array) || size > rt.heap.settings().arena_words {
        return Ok(Value::NIL);
    }
    Ok(rt.heap.allocate_pointers(class, size)?)
}

pub fn size(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let rt = interp.runtime();
    Ok(match indexable(rt, args[0]) {
        Some(shape) => Value::from_usize(length(rt, args[0], &shape)),
        None => Value::NIL,
    })
}

/// Arrays answer their element, byte objects the byte as an integer.
pub fn at(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let &[receiver, index] = args else {
        return Ok(Value::NIL);
    };
    let rt = interp.runtime();
    let Some(shape) = indexable(rt, receiver) else {
        return Ok(Value::NIL);
    };
    let Some(i) = position(rt, receiver, &shape, index) else {
        return Ok(Value::NIL);
    };
    Ok(match shape {
        Indexable::Array => rt.heap.slot(receiver, i),
        Indexable::Bytes => Value::from_usize(rt.heap.byte_at(receiver, i) as usize),
    })
}

/// Only arrays are writable; answers the stored value.
pub fn at_put(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let &[receiver, index, value] = args else {
        return Ok(Value::NIL);
    };
    let rt = interp.runtime_mut();
    match indexable(rt, receiver) {
        Some(shape @ Indexable::Array) => match position(rt, receiver, &shape, index) {
            Some(i) => {
                rt.heap.set_slot(receiver, i, value);
                Ok(value)
            }
            None => Ok(Value::NIL),
        },
        Some(Indexable::Bytes) | None => Ok(Value::NIL),
    }
}

pub fn string_concat(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let &[a, b] = args else {
        return Ok(Value::NIL);
    };
    let rt = interp.runtime_mut();
    match (rt.text(a), rt.text(b)) {
        (Some(a), Some(b)) => Ok(rt.new_string(&(a + &b))?),
        _ => Ok(Value::NIL),
    }
}

/// Equal spelling. Anything that is not text is unequal.
pub fn string_equal(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let &[a, b] = args else {
        return Ok(Value::NIL);
    };
    let rt = interp.runtime();
    let equal = match (rt.text(a), rt.text(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    };
    Ok(rt.boolean(equal))
}

pub fn as_string(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let rt = interp.runtime_mut();
    match rt.text(args[0]) {
        Some(text) => Ok(rt.new_string(&text)?),
        None => Ok(Value::NIL),
    }
}

pub fn as_symbol(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let rt = interp.runtime_mut();
    match rt.text(args[0]) {
        Some(text) => Ok(rt.intern(&text)?),
        None => Ok(Value::NIL),
    }
}

fn is_dictionary(rt: &Runtime, value: Value) -> bool {
    value.is_reference() && !rt.is_class(value) && rt.is_kind_of(value, rt.classes.dictionary)
}

pub fn dictionary_new(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let class = args[0];
    let rt = interp.runtime_mut();
    if !rt.is_class(class) || !rt.inherits_from(class, rt.classes.dictionary) {
        return Ok(Value::NIL);
    }
    Ok(new_dictionary(&mut rt.heap, class, METHOD_DICTIONARY_BUCKETS)?)
}

pub fn dictionary_at(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let &[dict, key] = args else {
        return Ok(Value::NIL);
    };
    let rt = interp.runtime();
    if !is_dictionary(rt, dict) {
        return Ok(Value::NIL);
    }
    Ok(dictionary::dictionary_at(&rt.heap, dict, key).unwrap_or(Value::NIL))
}

pub fn dictionary_at_put(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let &[dict, key, value] = args else {
        return Ok(Value::NIL);
    };
    let rt = interp.runtime_mut();
    if !is_dictionary(rt, dict) {
        return Ok(Value::NIL);
    }
    let link_class = rt.classes.link;
    dictionary::dictionary_at_put(&mut rt.heap, link_class, dict, key, value)?;
    Ok(value)
}
