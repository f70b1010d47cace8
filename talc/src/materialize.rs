use crate::object::{block, method};
use crate::{CodeDesc, CompileError, Constant, Runtime, RuntimeError, Value};

/// Allocates the heap form of `desc`: a `Method` whose literal table holds
/// block templates for nested blocks.
pub fn materialize(rt: &mut Runtime, desc: &CodeDesc, method_class: Value) -> Result<Value, RuntimeError> {
    let compiled = rt.heap.allocate_pointers(rt.classes.method, method::SIZE)?;
    fill_code(rt, compiled, desc, method_class)?;
    Ok(compiled)
}

fn fill_code(rt: &mut Runtime, code: Value, desc: &CodeDesc, method_class: Value) -> Result<(), RuntimeError> {
    let bytecode = rt.heap.allocate_bytes(rt.classes.byte_array, &desc.bytecode)?;
    let literals = rt.heap.allocate_pointers(rt.classes.array, desc.literals.len())?;
    for (i, constant) in desc.literals.iter().enumerate() {
        let value = constant_value(rt, constant, method_class)?;
        rt.heap.set_slot(literals, i, value);
    }
    let selector = rt.intern(&desc.selector)?;
    let fields = [
        (method::BYTECODE, bytecode),
        (method::LITERALS, literals),
        (method::ARG_COUNT, Value::from_usize(desc.arg_count)),
        (method::TEMP_COUNT, Value::from_usize(desc.temp_count)),
        (method::HEAP_VAR_COUNT, Value::from_usize(desc.heap_var_count)),
        (method::STACK_SIZE, Value::from_usize(desc.stack_size)),
        (method::SELECTOR, selector),
        (method::METHOD_CLASS, method_class),
    ];
    for (index, value) in fields {
        rt.heap.set_slot(code, index, value);
    }
    Ok(())
}

fn constant_value(rt: &mut Runtime, constant: &Constant, method_class: Value) -> Result<Value, RuntimeError> {
    Ok(match constant {
        Constant::Integer(n) => Value::from_i64(*n)
            .ok_or_else(|| CompileError::new(format!("integer literal {n} out of range")))?,
        Constant::String(text) => rt.new_string(text)?,
        Constant::Symbol(name) => rt.intern(name)?,
        Constant::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(constant_value(rt, item, method_class)?);
            }
            rt.new_array(&values)?
        }
        Constant::Block(desc) => {
            // receiver, parent heap-vars and home stay nil in the template
            let template = rt.heap.allocate_pointers(rt.classes.block, block::SIZE)?;
            fill_code(rt, template, desc, method_class)?;
            template
        }
    })
}
