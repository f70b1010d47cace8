//! Slot layouts of the structured heap objects.
//!
//! Every structured object is a pointer-bearing object whose slots are indexed
//! by the constants below. Methods and blocks share their first
//! [`method::SIZE`] slots so the interpreter reads code the same way for both.
use crate::{Heap, Value};

pub mod class {
    pub const NAME: usize = 0;
    pub const SUPERCLASS: usize = 1;
    pub const METHODS: usize = 2;
    /// Array of symbols, inherited names first.
    pub const INSTANCE_VARIABLES: usize = 3;
    pub const INSTANCE_SIZE: usize = 4;
    pub const SIZE: usize = 5;
}

pub mod method {
    pub const BYTECODE: usize = 0;
    pub const LITERALS: usize = 1;
    pub const ARG_COUNT: usize = 2;
    pub const TEMP_COUNT: usize = 3;
    pub const HEAP_VAR_COUNT: usize = 4;
    pub const STACK_SIZE: usize = 5;
    pub const SELECTOR: usize = 6;
    /// Class the code was compiled in; super sends start above it.
    pub const METHOD_CLASS: usize = 7;
    pub const SIZE: usize = 8;
}

pub mod block {
    pub const RECEIVER: usize = super::method::SIZE;
    pub const PARENT_HEAP_VARS: usize = super::method::SIZE + 1;
    pub const HOME: usize = super::method::SIZE + 2;
    pub const SIZE: usize = super::method::SIZE + 3;
}

pub mod context {
    pub const PREVIOUS: usize = 0;
    pub const RECEIVER: usize = 1;
    pub const METHOD: usize = 2;
    /// Saved program counter; nil once the context has returned.
    pub const PC: usize = 3;
    pub const HEAP_VARS: usize = 4;
    pub const PARENT_HEAP_VARS: usize = 5;
    /// Method context a block activation returns through; self for methods.
    pub const HOME: usize = 6;
    pub const REGISTERS: usize = 7;
}

pub mod process {
    pub const ID: usize = 0;
    pub const NAME: usize = 1;
    pub const LINK: usize = 2;
    pub const CONTEXT: usize = 3;
    pub const ACCUMULATOR: usize = 4;
    pub const STATE: usize = 5;
    pub const SIZE: usize = 6;
}

pub mod dictionary {
    pub const TALLY: usize = 0;
    pub const BUCKETS: usize = 1;
}

pub mod link {
    pub const KEY: usize = 0;
    pub const VALUE: usize = 1;
    pub const NEXT: usize = 2;
    pub const SIZE: usize = 3;
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Runnable = 0,
    Waiting = 1,
    Done = 2,
}

impl ProcessState {
    pub fn to_value(self) -> Value {
        Value::from_i32(self as i32)
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value.as_i64()? {
            0 => Some(ProcessState::Runnable),
            1 => Some(ProcessState::Waiting),
            2 => Some(ProcessState::Done),
            _ => None,
        }
    }
}

/// Frame shape of a method or block, read from its header slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeShape {
    pub arg_count: usize,
    pub temp_count: usize,
    pub heap_var_count: usize,
    pub stack_size: usize,
}

impl CodeShape {
    pub fn read(heap: &Heap, code: Value) -> Self {
        let field = |index| heap.slot(code, index).as_usize().unwrap_or(0);
        Self {
            arg_count: field(method::ARG_COUNT),
            temp_count: field(method::TEMP_COUNT),
            heap_var_count: field(method::HEAP_VAR_COUNT),
            stack_size: field(method::STACK_SIZE),
        }
    }
}
