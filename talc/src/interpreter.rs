//! The bytecode interpreter.
//!
//! All execution state lives in heap Contexts. While a process runs, the
//! interpreter caches the active context's accumulator, program counter,
//! method, literals and bytecode. `spill` writes that cache back to the
//! Context and Process objects before anything that may collect or hand
//! control to the scheduler; `unspill` rebuilds it afterwards, since a
//! collection moves every object.
use std::collections::HashMap;
use std::rc::Rc;

use crate::class::{lookup_method, superclass};
use crate::dictionary::{dictionary_at, dictionary_at_put};
use crate::object::{block, context, method, process};
use crate::{
    ArgRegisters, BinaryOp, CodeShape, ContextTrace, DecodeError, HeapError, Instruction, Interrupts, PRIMITIVES,
    Runtime, RuntimeError, SchedulerState, Value, binary_primitive, decode_at,
};

/// Longest Context chain rendered in a trace.
const MAX_TRACE_FRAMES: usize = 256;

/// Why a run of the interpreter ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The root activation returned this value.
    Returned(Value),
    Preempted,
    Yielded,
    Suspended,
}

/// Allocates a Context for `code` with `args` copied into r1 onwards.
///
/// `home` is the method context a block returns through. Method activations
/// pass `None` and become their own home.
pub fn new_context(
    rt: &mut Runtime,
    code: Value,
    receiver: Value,
    args: &[Value],
    previous: Value,
    parent_heap_vars: Value,
    home: Option<Value>,
) -> Result<Value, HeapError> {
    let shape = CodeShape::read(&rt.heap, code);
    let registers = 1 + shape.arg_count + shape.temp_count + shape.stack_size;
    let ctx = rt.heap.allocate_pointers(rt.classes.context, context::REGISTERS + registers)?;
    let heap_vars = if shape.heap_var_count > 0 {
        rt.heap.allocate_pointers(rt.classes.array, shape.heap_var_count)?
    } else {
        Value::NIL
    };
    let heap = &mut rt.heap;
    heap.set_slot(ctx, context::PREVIOUS, previous);
    heap.set_slot(ctx, context::RECEIVER, receiver);
    heap.set_slot(ctx, context::METHOD, code);
    heap.set_slot(ctx, context::PC, Value::from_usize(0));
    heap.set_slot(ctx, context::HEAP_VARS, heap_vars);
    heap.set_slot(ctx, context::PARENT_HEAP_VARS, parent_heap_vars);
    heap.set_slot(ctx, context::HOME, home.unwrap_or(ctx));
    heap.set_slot(ctx, context::REGISTERS, receiver);
    for (i, &arg) in args.iter().take(shape.arg_count).enumerate() {
        heap.set_slot(ctx, context::REGISTERS + 1 + i, arg);
    }
    Ok(ctx)
}

/// A Context activating `block`, or `None` when the argument count does not
/// match.
pub fn block_context(rt: &mut Runtime, block: Value, args: &[Value], previous: Value) -> Result<Option<Value>, HeapError> {
    if CodeShape::read(&rt.heap, block).arg_count != args.len() {
        return Ok(None);
    }
    let receiver = rt.heap.slot(block, block::RECEIVER);
    let parent = rt.heap.slot(block, block::PARENT_HEAP_VARS);
    let home = rt.heap.slot(block, block::HOME);
    new_context(rt, block, receiver, args, previous, parent, Some(home)).map(Some)
}

/// Renders the chain starting at `ctx`, innermost first.
pub fn context_trace(rt: &Runtime, mut ctx: Value) -> ContextTrace {
    let mut frames = Vec::new();
    while !ctx.is_nil() {
        if frames.len() == MAX_TRACE_FRAMES {
            frames.push("...".to_string());
            break;
        }
        let code = rt.heap.slot(ctx, context::METHOD);
        let receiver = rt.heap.slot(ctx, context::RECEIVER);
        let class = rt.class_name(rt.class_of(receiver));
        let selector = rt.heap.slot(code, method::SELECTOR);
        let selector = if selector.is_nil() {
            "?".to_string()
        } else {
            rt.heap.string(selector)
        };
        if rt.class_of(code) == rt.classes.block {
            frames.push(format!("[] in {class}>>{selector}"));
        } else {
            frames.push(format!("{class}>>{selector}"));
        }
        ctx = rt.heap.slot(ctx, context::PREVIOUS);
    }
    ContextTrace { frames }
}

pub struct Interpreter<'a> {
    rt: &'a mut Runtime,
    sched: &'a mut SchedulerState,
    interrupts: &'a Interrupts,
    process: Value,
    context: Value,
    method: Value,
    literals: Value,
    code: Rc<[u8]>,
    /// Bytecode read out of the heap, keyed by ByteArray. Cleared once the
    /// heap has collected since `code_epoch`.
    code_cache: HashMap<Value, Rc<[u8]>, ahash::RandomState>,
    code_epoch: u64,
    pc: usize,
    /// Start of the instruction being executed.
    instruction_pc: usize,
    acc: Value,
    stop: Option<RunOutcome>,
}

impl<'a> Interpreter<'a> {
    /// Resumes the scheduler's current process where it last spilled.
    pub fn new(rt: &'a mut Runtime, sched: &'a mut SchedulerState, interrupts: &'a Interrupts) -> Self {
        debug_assert!(!sched.current.is_nil(), "no current process");
        let mut interp = Self {
            rt,
            sched,
            interrupts,
            process: Value::NIL,
            context: Value::NIL,
            method: Value::NIL,
            literals: Value::NIL,
            code: Rc::from([]),
            code_cache: HashMap::with_hasher(ahash::RandomState::new()),
            code_epoch: 0,
            pc: 0,
            instruction_pc: 0,
            acc: Value::NIL,
            stop: None,
        };
        interp.unspill();
        interp
    }

    pub fn runtime(&self) -> &Runtime {
        &*self.rt
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut *self.rt
    }

    pub fn parts_mut(&mut self) -> (&mut Runtime, &mut SchedulerState) {
        (&mut *self.rt, &mut *self.sched)
    }

    pub fn interrupts(&self) -> &Interrupts {
        self.interrupts
    }

    pub fn current_process(&self) -> Value {
        self.process
    }

    pub fn accumulator(&self) -> Value {
        self.acc
    }

    pub fn set_accumulator(&mut self, value: Value) {
        self.acc = value;
    }

    /// Ends the run after the current instruction.
    pub fn request(&mut self, outcome: RunOutcome) {
        self.stop = Some(outcome);
    }

    pub fn trace(&self) -> ContextTrace {
        context_trace(&*self.rt, self.context)
    }

    pub fn run(&mut self) -> Result<RunOutcome, RuntimeError> {
        loop {
            if self.interrupts.poll() {
                self.spill();
                log::debug!("preempted {}", self.describe_process());
                return Ok(RunOutcome::Preempted);
            }
            let pc = self.pc;
            let (instruction, next) = match decode_at(&self.code, pc) {
                Ok(decoded) => decoded,
                Err(source) => {
                    return Err(RuntimeError::InvalidBytecode {
                        pc,
                        source,
                        trace: self.trace(),
                    });
                }
            };
            self.instruction_pc = pc;
            self.pc = next;
            self.execute(instruction)?;
            if let Some(outcome) = self.stop.take() {
                if !matches!(outcome, RunOutcome::Returned(_)) {
                    self.spill();
                }
                return Ok(outcome);
            }
        }
    }

    fn execute(&mut self, instruction: Instruction) -> Result<(), RuntimeError> {
        match instruction {
            Instruction::LoadNil => self.acc = Value::NIL,
            Instruction::LoadTrue => self.acc = self.rt.specials.true_object,
            Instruction::LoadFalse => self.acc = self.rt.specials.false_object,
            Instruction::LoadThisContext => self.acc = self.context,
            Instruction::LoadSmalltalk => self.acc = self.rt.specials.smalltalk,
            Instruction::LoadInstVar { index } => {
                self.acc = self.rt.heap.slot(self.register(0), index as usize);
            }
            Instruction::LoadLiteral { index } => self.acc = self.literal(index),
            Instruction::LoadMyHeapVar { slot } => {
                self.acc = self.rt.heap.slot(self.heap_vars(context::HEAP_VARS), slot as usize);
            }
            Instruction::LoadParentHeapVar { slot } => {
                self.acc = self.rt.heap.slot(self.heap_vars(context::PARENT_HEAP_VARS), slot as usize);
            }
            Instruction::LoadGlobal { literal } => {
                let key = self.literal(literal);
                self.acc = dictionary_at(&self.rt.heap, self.rt.specials.smalltalk, key).unwrap_or(Value::NIL);
            }
            Instruction::LoadRegister { reg } => self.acc = self.register(reg),
            Instruction::StoreInstVar { index } => {
                let receiver = self.register(0);
                self.rt.heap.set_slot(receiver, index as usize, self.acc);
            }
            Instruction::StoreMyHeapVar { slot } => {
                let heap_vars = self.heap_vars(context::HEAP_VARS);
                self.rt.heap.set_slot(heap_vars, slot as usize, self.acc);
            }
            Instruction::StoreParentHeapVar { slot } => {
                let heap_vars = self.heap_vars(context::PARENT_HEAP_VARS);
                self.rt.heap.set_slot(heap_vars, slot as usize, self.acc);
            }
            Instruction::StoreGlobal { literal } => {
                let key = self.literal(literal);
                let (link, globals) = (self.rt.classes.link, self.rt.specials.smalltalk);
                dictionary_at_put(&mut self.rt.heap, link, globals, key, self.acc)?;
            }
            Instruction::StoreRegister { reg } => self.set_register(reg, self.acc),
            Instruction::Promote { my, parent } => {
                let value = self.rt.heap.slot(self.heap_vars(context::PARENT_HEAP_VARS), parent as usize);
                let mine = self.heap_vars(context::HEAP_VARS);
                self.rt.heap.set_slot(mine, my as usize, value);
            }
            Instruction::Restore { parent, my } => restore(self.rt, self.context, my, parent),
            Instruction::Sync { my, parent, reg } => {
                let mine = self.heap_vars(context::HEAP_VARS);
                let theirs = self.heap_vars(context::PARENT_HEAP_VARS);
                let own = self.rt.heap.slot(mine, my as usize);
                let agreed = if own != self.register(reg) {
                    self.rt.heap.set_slot(theirs, parent as usize, own);
                    own
                } else {
                    let value = self.rt.heap.slot(theirs, parent as usize);
                    self.rt.heap.set_slot(mine, my as usize, value);
                    value
                };
                self.set_register(reg, agreed);
            }
            Instruction::Jump { offset } => self.jump(offset),
            Instruction::BranchIfFalse { offset } => {
                if !self.rt.is_truthy(self.acc) {
                    self.jump(offset);
                }
            }
            Instruction::BranchIfTrue { offset } => {
                if self.rt.is_truthy(self.acc) {
                    self.jump(offset);
                }
            }
            Instruction::BinaryOp { reg, op } => self.binary_op(reg, op)?,
            Instruction::Send { selector, args } => self.send(selector, args, false)?,
            Instruction::SendSuper { selector, args } => self.send(selector, args, true)?,
            Instruction::CopyBlock { literal } => self.copy_block(literal)?,
            Instruction::Primitive0 { primitive } => self.primitive(primitive, &[], true)?,
            Instruction::Primitive1 { primitive } => self.primitive(primitive, &[], false)?,
            Instruction::Primitive2 { primitive, reg } => self.primitive(primitive, &[reg], false)?,
            Instruction::Primitive3 { primitive, reg1, reg2 } => {
                self.primitive(primitive, &[reg1, reg2], false)?
            }
            Instruction::PrimitiveV { primitive, first, count } => {
                let regs: Vec<u8> = (first..first.saturating_add(count)).collect();
                self.primitive_with(primitive, |interp| regs.iter().map(|&r| interp.register(r)).collect())?;
            }
            Instruction::Return => self.return_from_frame(self.acc)?,
            Instruction::ReturnSelf => self.return_from_frame(self.register(0))?,
        }
        Ok(())
    }

    fn register(&self, reg: u8) -> Value {
        self.rt.heap.slot(self.context, context::REGISTERS + reg as usize)
    }

    fn set_register(&mut self, reg: u8, value: Value) {
        self.rt.heap.set_slot(self.context, context::REGISTERS + reg as usize, value);
    }

    fn literal(&self, index: u8) -> Value {
        self.rt.heap.slot(self.literals, index as usize)
    }

    fn heap_vars(&self, which: usize) -> Value {
        self.rt.heap.slot(self.context, which)
    }

    fn jump(&mut self, offset: i16) {
        self.pc = self.pc.wrapping_add_signed(offset as isize);
    }

    fn describe_process(&self) -> String {
        let id = self.rt.heap.slot(self.process, process::ID).as_i64().unwrap_or(0);
        format!("process {id}")
    }

    /// Commits the cached state to the Context and Process objects.
    fn spill(&mut self) {
        let heap = &mut self.rt.heap;
        heap.set_slot(self.context, context::PC, Value::from_usize(self.pc));
        heap.set_slot(self.process, process::CONTEXT, self.context);
        heap.set_slot(self.process, process::ACCUMULATOR, self.acc);
    }

    fn unspill(&mut self) {
        self.process = self.sched.current;
        self.context = self.rt.heap.slot(self.process, process::CONTEXT);
        self.acc = self.rt.heap.slot(self.process, process::ACCUMULATOR);
        self.load_frame();
    }

    /// Derives method, literals, code and pc from `self.context`.
    fn load_frame(&mut self) {
        let heap = &self.rt.heap;
        self.method = heap.slot(self.context, context::METHOD);
        self.literals = heap.slot(self.method, method::LITERALS);
        self.pc = heap.slot(self.context, context::PC).as_usize().unwrap_or(0);
        let bytecode = heap.slot(self.method, method::BYTECODE);
        let epoch = heap.stats().collections;
        if epoch != self.code_epoch {
            self.code_cache.clear();
            self.code_epoch = epoch;
        }
        self.code = self
            .code_cache
            .entry(bytecode)
            .or_insert_with(|| Rc::from(heap.bytes(bytecode)))
            .clone();
    }

    fn safepoint(&mut self) -> Result<(), RuntimeError> {
        if !self.rt.heap.needs_collection() {
            return Ok(());
        }
        self.spill();
        let stats = self.rt.collect_garbage(&mut *self.sched)?;
        log::debug!(
            "collected at safepoint: {} words live, {} freed",
            stats.live_words(),
            stats.freed_words
        );
        self.unspill();
        Ok(())
    }

    fn binary_op(&mut self, reg: u8, op: BinaryOp) -> Result<(), RuntimeError> {
        let operands = [self.register(reg), self.acc];
        let result = binary_primitive(op)(self, &operands)?;
        if !result.is_nil() {
            self.acc = result;
            return Ok(());
        }
        self.safepoint()?;
        let receiver = self.register(reg);
        let arg = self.acc;
        let selector = self.rt.selectors.binary[op as usize];
        let class = self.rt.class_of(receiver);
        self.dispatch(selector, receiver, &[arg], class)
    }

    fn send(&mut self, selector: u8, args: ArgRegisters, is_super: bool) -> Result<(), RuntimeError> {
        self.safepoint()?;
        let selector = self.literal(selector);
        let receiver = self.acc;
        let values: Vec<Value> = args.as_slice().iter().map(|&r| self.register(r)).collect();
        let class = if is_super {
            let defining = self.rt.heap.slot(self.method, method::METHOD_CLASS);
            superclass(&self.rt.heap, defining)
        } else {
            self.rt.class_of(receiver)
        };
        self.dispatch(selector, receiver, &values, class)
    }

    fn dispatch(&mut self, selector: Value, receiver: Value, args: &[Value], class: Value) -> Result<(), RuntimeError> {
        let Some((method, _)) = lookup_method(&self.rt.heap, class, selector) else {
            return Err(RuntimeError::MessageNotUnderstood {
                class: self.rt.class_name(self.rt.class_of(receiver)),
                selector: self.rt.heap.string(selector),
                trace: self.trace(),
            });
        };
        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "{} >> #{}",
                self.rt.class_name(class),
                self.rt.heap.string(selector)
            );
        }
        self.activate(method, receiver, args, Value::NIL, None)
    }

    /// Saves the caller's pc and enters a fresh context.
    fn activate(
        &mut self,
        code: Value,
        receiver: Value,
        args: &[Value],
        parent_heap_vars: Value,
        home: Option<Value>,
    ) -> Result<(), RuntimeError> {
        let caller = self.context;
        self.rt.heap.set_slot(caller, context::PC, Value::from_usize(self.pc));
        let ctx = new_context(self.rt, code, receiver, args, caller, parent_heap_vars, home)?;
        self.context = ctx;
        self.load_frame();
        Ok(())
    }

    fn copy_block(&mut self, literal: u8) -> Result<(), RuntimeError> {
        self.safepoint()?;
        let template = self.literal(literal);
        let copy = self.rt.heap.allocate_pointers(self.rt.classes.block, block::SIZE)?;
        let heap = &mut self.rt.heap;
        for i in 0..method::SIZE {
            let field = heap.slot(template, i);
            heap.set_slot(copy, i, field);
        }
        let receiver = heap.slot(self.context, context::REGISTERS);
        heap.set_slot(copy, block::RECEIVER, receiver);
        heap.set_slot(copy, block::PARENT_HEAP_VARS, heap.slot(self.context, context::HEAP_VARS));
        heap.set_slot(copy, block::HOME, heap.slot(self.context, context::HOME));
        self.acc = copy;
        Ok(())
    }

    /// Calls a fixed-arity primitive with `regs` followed by the accumulator
    /// unless `no_accumulator`.
    fn primitive(&mut self, index: u8, regs: &[u8], no_accumulator: bool) -> Result<(), RuntimeError> {
        self.primitive_with(index, |interp| {
            let mut args: Vec<Value> = regs.iter().map(|&r| interp.register(r)).collect();
            if !no_accumulator {
                args.push(interp.acc);
            }
            args
        })
    }

    fn primitive_with(&mut self, index: u8, operands: impl FnOnce(&Self) -> Vec<Value>) -> Result<(), RuntimeError> {
        let Some(primitive) = PRIMITIVES.get(index as usize) else {
            let pc = self.instruction_pc;
            return Err(RuntimeError::InvalidBytecode {
                pc,
                source: DecodeError::UnknownPrimitive { pc, index },
                trace: self.trace(),
            });
        };
        self.safepoint()?;
        let args = operands(self);
        let result = (primitive.ptr)(self, &args)?;
        if !primitive.switches_context {
            self.acc = result;
        }
        Ok(())
    }

    /// Pops to the previous context, ending the run at the root.
    fn return_from_frame(&mut self, value: Value) -> Result<(), RuntimeError> {
        let ctx = self.context;
        self.rt.heap.set_slot(ctx, context::PC, Value::NIL);
        let previous = self.rt.heap.slot(ctx, context::PREVIOUS);
        self.resume(previous, value)
    }

    fn resume(&mut self, target: Value, value: Value) -> Result<(), RuntimeError> {
        self.acc = value;
        if target.is_nil() {
            self.stop = Some(RunOutcome::Returned(value));
            return Ok(());
        }
        if self.rt.heap.slot(target, context::PC).is_nil() {
            return Err(RuntimeError::DeadContext { trace: self.trace() });
        }
        self.context = target;
        self.load_frame();
        Ok(())
    }

    fn is_context(&self, value: Value) -> bool {
        value.is_reference() && self.rt.class_of(value) == self.rt.classes.context
    }

    /// Runs `block` in a new context whose caller is the current one.
    pub fn invoke_block(&mut self, block: Value, args: &[Value]) -> Result<(), RuntimeError> {
        let is_block = block.is_reference() && self.rt.class_of(block) == self.rt.classes.block;
        if !is_block || CodeShape::read(&self.rt.heap, block).arg_count != args.len() {
            self.acc = Value::NIL;
            return Ok(());
        }
        let receiver = self.rt.heap.slot(block, block::RECEIVER);
        let parent = self.rt.heap.slot(block, block::PARENT_HEAP_VARS);
        let home = self.rt.heap.slot(block, block::HOME);
        self.activate(block, receiver, args, parent, Some(home))
    }

    /// Returns `value` from the home method of the block running in `from`.
    /// Every context between the current one and the home dies; a home that
    /// already returned or is not on the current chain is fatal.
    pub fn non_local_return(&mut self, from: Value, value: Value) -> Result<(), RuntimeError> {
        if !self.is_context(from) {
            self.acc = Value::NIL;
            return Ok(());
        }
        let heap = &self.rt.heap;
        let home = heap.slot(from, context::HOME);
        if home.is_nil() || heap.slot(home, context::PC).is_nil() {
            return Err(RuntimeError::DeadContext { trace: self.trace() });
        }
        let mut unwound = Vec::new();
        let mut cursor = self.context;
        loop {
            if cursor.is_nil() {
                return Err(RuntimeError::DeadContext { trace: self.trace() });
            }
            unwound.push(cursor);
            if cursor == home {
                break;
            }
            cursor = heap.slot(cursor, context::PREVIOUS);
        }
        for ctx in unwound {
            self.unwind_frame(ctx);
            self.rt.heap.set_slot(ctx, context::PC, Value::NIL);
        }
        let target = self.rt.heap.slot(home, context::PREVIOUS);
        self.resume(target, value)
    }

    /// Runs the restores a block frame skips when it is unwound. Its chained
    /// slots are the leading promotes of its code.
    fn unwind_frame(&mut self, ctx: Value) {
        let code = self.rt.heap.slot(ctx, context::METHOD);
        if self.rt.class_of(code) != self.rt.classes.block {
            return;
        }
        let bytecode = self.rt.heap.bytes(self.rt.heap.slot(code, method::BYTECODE));
        let mut pc = 0;
        while let Ok((Instruction::Promote { my, parent }, next)) = decode_at(&bytecode, pc) {
            restore(self.rt, ctx, my, parent);
            pc = next;
        }
    }

    /// Abandons the current chain and continues `target` with `value`.
    pub fn return_into(&mut self, target: Value, value: Value) -> Result<(), RuntimeError> {
        if !self.is_context(target) {
            self.acc = Value::NIL;
            return Ok(());
        }
        self.resume(target, value)
    }
}

/// Copies heap-var `my` of `ctx` into slot `parent` of its parent's heap-vars.
fn restore(rt: &mut Runtime, ctx: Value, my: u8, parent: u8) {
    let value = rt.heap.slot(rt.heap.slot(ctx, context::HEAP_VARS), my as usize);
    let theirs = rt.heap.slot(ctx, context::PARENT_HEAP_VARS);
    rt.heap.set_slot(theirs, parent as usize, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::*;
    use crate::{Interrupts, RuntimeCreateInfo};

    /// Runs a do-it to completion in a throwaway process.
    fn evaluate(temps: &[&str], body: Vec<Expr>) -> Result<(Runtime, Value), RuntimeError> {
        let mut rt = Runtime::new(RuntimeCreateInfo::default())?;
        let mut sched = SchedulerState::new();
        let interrupts = Interrupts::new();
        let doit = rt.compile_doit(temps, body)?;
        let ctx = new_context(&mut rt, doit, Value::NIL, &[], Value::NIL, Value::NIL, None)?;
        sched.spawn(&mut rt, ctx, Value::NIL)?;
        sched.current = sched.runnable.dequeue(&mut rt.heap).expect("spawned");
        let outcome = Interpreter::new(&mut rt, &mut sched, &interrupts).run()?;
        match outcome {
            RunOutcome::Returned(value) => Ok((rt, value)),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    fn failure(result: Result<(Runtime, Value), RuntimeError>) -> RuntimeError {
        match result {
            Ok((_, value)) => panic!("expected an error, answered {value:?}"),
            Err(err) => err,
        }
    }

    #[test]
    fn arithmetic_returns_through_the_root() {
        let (_, value) = evaluate(&[], vec![ret(binary(int(1), "+", int(2)))]).unwrap();
        assert_eq!(value, Value::from_i32(3));
    }

    #[test]
    fn binary_ops_fall_back_to_sends() {
        // Object>>= is identity, so nil = nil answers true through a real send
        let (rt, value) = evaluate(&[], vec![ret(binary(nil(), "=", nil()))]).unwrap();
        assert_eq!(value, rt.specials.true_object);
        let (_, value) = evaluate(&[], vec![ret(binary(int(7), "+", nil()))]).unwrap();
        assert_eq!(value, Value::NIL);
    }

    #[test]
    fn block_invocation_passes_arguments() {
        let (_, value) = evaluate(
            &["b"],
            vec![
                assign("b", block(&["x", "y"], &[], vec![binary(var("x"), "*", var("y"))])),
                ret(send(var("b"), "value:value:", vec![int(6), int(7)])),
            ],
        )
        .unwrap();
        assert_eq!(value, Value::from_i32(42));
    }

    #[test]
    fn wrong_block_arity_answers_nil() {
        let (_, value) = evaluate(&[], vec![ret(send(block(&["x"], &[], vec![var("x")]), "value", vec![]))]).unwrap();
        assert_eq!(value, Value::NIL);
    }

    #[test]
    fn unknown_selectors_are_fatal_with_a_trace() {
        let err = failure(evaluate(&[], vec![unary(int(3), "frobnicate")]));
        match &err {
            RuntimeError::MessageNotUnderstood { class, selector, trace } => {
                assert_eq!(class, "SmallInteger");
                assert_eq!(selector, "frobnicate");
                assert_eq!(trace.frames, vec!["UndefinedObject>>doIt"]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn traces_name_blocks_and_methods() {
        let err = failure(evaluate(&[], vec![send(thunk(vec![unary(nil(), "oops")]), "value", vec![])]));
        let trace = err.trace().expect("trace");
        assert_eq!(
            trace.frames,
            vec!["[] in UndefinedObject>>doIt", "Block>>value", "UndefinedObject>>doIt"]
        );
    }

    /// Runs a do-it and answers how many code vectors the interpreter read.
    fn code_reads(temps: &[&str], body: Vec<Expr>) -> usize {
        let mut rt = Runtime::new(RuntimeCreateInfo::default()).unwrap();
        let mut sched = SchedulerState::new();
        let interrupts = Interrupts::new();
        let doit = rt.compile_doit(temps, body).unwrap();
        let ctx = new_context(&mut rt, doit, Value::NIL, &[], Value::NIL, Value::NIL, None).unwrap();
        sched.spawn(&mut rt, ctx, Value::NIL).unwrap();
        sched.current = sched.runnable.dequeue(&mut rt.heap).unwrap();
        let mut interp = Interpreter::new(&mut rt, &mut sched, &interrupts);
        assert!(matches!(interp.run().unwrap(), RunOutcome::Returned(_)));
        interp.code_cache.len()
    }

    #[test]
    fn bytecode_is_read_once_per_code_object() {
        let increment = || block(&["x"], &[], vec![binary(var("x"), "+", int(1))]);
        let once = code_reads(
            &["b"],
            vec![assign("b", increment()), ret(binary(var("b"), "value:", int(1)))],
        );
        let loop_body = thunk(vec![assign("n", binary(var("b"), "value:", var("n")))]);
        let many = code_reads(
            &["b", "n"],
            vec![
                assign("b", increment()),
                assign("n", int(0)),
                send(thunk(vec![binary(var("n"), "<", int(10))]), "whileTrue:", vec![loop_body]),
                ret(var("n")),
            ],
        );
        assert!(once >= 2, "the do-it and the block at least");
        assert_eq!(once, many);
    }

    #[test]
    fn pending_interrupt_preempts_before_the_first_instruction() {
        let mut rt = Runtime::new(RuntimeCreateInfo::default()).unwrap();
        let mut sched = SchedulerState::new();
        let interrupts = Interrupts::new();
        let doit = rt.compile_doit(&[], vec![ret(int(1))]).unwrap();
        let ctx = new_context(&mut rt, doit, Value::NIL, &[], Value::NIL, Value::NIL, None).unwrap();
        sched.spawn(&mut rt, ctx, Value::NIL).unwrap();
        sched.current = sched.runnable.dequeue(&mut rt.heap).unwrap();
        interrupts.request_preempt();
        let first = Interpreter::new(&mut rt, &mut sched, &interrupts).run().unwrap();
        assert_eq!(first, RunOutcome::Preempted);
        let second = Interpreter::new(&mut rt, &mut sched, &interrupts).run().unwrap();
        assert_eq!(second, RunOutcome::Returned(Value::from_i32(1)));
    }
}
