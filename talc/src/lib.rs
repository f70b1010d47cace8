pub mod ast;
mod builder;
mod bytecode;
pub mod class;
mod collector;
mod compiler;
pub mod decoder;
pub mod demos;
pub mod dictionary;
mod error;
mod header;
mod heap;
mod interning;
mod interpreter;
mod interrupt;
pub mod kernel;
mod materialize;
pub mod object;
mod primitives;
mod runtime;
mod scheduler;
mod scope;
mod tagged;

pub use builder::{BytecodeBuilder, Label, encode};
pub use bytecode::{ArgRegisters, BinaryOp, Instruction, MAX_ARGS, Op};
pub use collector::{CollectionStats, Collector, CopyingCollector, ObjectModel};
pub use compiler::{BLOCK_RETURN_SELECTOR, CodeDesc, Constant, compile_method};
pub use decoder::{BytecodeDecoder, DecodeError, decode_at};
pub use error::{CompileError, ContextTrace, RuntimeError};
pub use header::{HASH_LIMIT, HEADER_WORDS, Header, ObjectKind};
pub use heap::{
    ArenaId, Arenas, FIRST_OBJECT, Heap, HeapCreateInfo, HeapError, HeapSettings, HeapStats, RootProvider, Space,
};
pub use interning::SymbolTable;
pub use interpreter::{Interpreter, RunOutcome, block_context, context_trace, new_context};
pub use interrupt::{Interrupts, TimerUnit};
pub use materialize::materialize;
pub use object::{CodeShape, ProcessState};
pub use primitives::{
    Arity, PRIMITIVES, PrimitiveFunction, PrimitiveMessage, binary_primitive, primitive_index,
};
pub use runtime::{
    CLASS_INSTANCE_VARIABLES, Classes, Runtime, RuntimeCreateInfo, Selectors, Specials,
};
pub use scheduler::{FinishedProcess, ProcessList, Scheduler, SchedulerSettings, SchedulerState};
pub use scope::{
    Binding, HeapVarOrigin, Scope, ScopeId, ScopeKind, ScopeTree, Variable, VariableKind, resolve_method,
};
pub use tagged::{Address, SMALL_INTEGER_MAX, SMALL_INTEGER_MIN, TAG_BITS, TAG_MASK, Value, ValueTag};
