use crate::{Interpreter, RunOutcome, RuntimeError, Value, block_context};

fn is_process(interp: &Interpreter<'_>, value: Value) -> bool {
    let rt = interp.runtime();
    value.is_reference() && rt.class_of(value) == rt.classes.process
}

/// `[block, name]`. Schedules a zero-argument block as a new process at the
/// tail of the runnable list.
pub fn fork(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let &[block, name] = args else {
        return Ok(Value::NIL);
    };
    let (rt, sched) = interp.parts_mut();
    if !block.is_reference() || rt.class_of(block) != rt.classes.block {
        return Ok(Value::NIL);
    }
    let Some(context) = block_context(rt, block, &[], Value::NIL)? else {
        return Ok(Value::NIL);
    };
    Ok(sched.spawn(rt, context, name)?)
}

pub fn current(interp: &mut Interpreter<'_>, _: &[Value]) -> Result<Value, RuntimeError> {
    Ok(interp.current_process())
}

/// Ends the current run; the process goes to the tail of the runnable list.
pub fn yield_now(interp: &mut Interpreter<'_>, _: &[Value]) -> Result<Value, RuntimeError> {
    interp.request(RunOutcome::Yielded);
    Ok(Value::NIL)
}

pub fn suspend(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let target = args[0];
    if !is_process(interp, target) {
        return Ok(Value::NIL);
    }
    if target == interp.current_process() {
        interp.request(RunOutcome::Suspended);
        return Ok(target);
    }
    let (rt, sched) = interp.parts_mut();
    sched.suspend(&mut rt.heap, target);
    Ok(target)
}

pub fn resume(interp: &mut Interpreter<'_>, args: &[Value]) -> Result<Value, RuntimeError> {
    let target = args[0];
    if !is_process(interp, target) {
        return Ok(Value::NIL);
    }
    let (rt, sched) = interp.parts_mut();
    sched.resume(&mut rt.heap, target);
    Ok(target)
}

pub fn disable_interrupts(interp: &mut Interpreter<'_>, _: &[Value]) -> Result<Value, RuntimeError> {
    interp.interrupts().disable();
    Ok(Value::NIL)
}

pub fn enable_interrupts(interp: &mut Interpreter<'_>, _: &[Value]) -> Result<Value, RuntimeError> {
    interp.interrupts().enable();
    Ok(Value::NIL)
}

