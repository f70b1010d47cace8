//! Native operations callable from bytecode.
//!
//! Every primitive receives its arguments in the order they were written at
//! the call site. The emitter picks the calling convention from the arity:
//! `primitive0` passes nothing, `primitive1` the accumulator, `primitive2` a
//! register and the accumulator, `primitive3` two registers and the
//! accumulator, and `primitiveV` a contiguous register run.
//!
//! A primitive that cannot handle its operands returns nil. Only the binary
//! operator table reacts to that by falling back to a message send.
use crate::{BinaryOp, Interpreter, RuntimeError, Value};

mod collection;
mod control;
mod integer;
mod object;
mod process;

pub type PrimitiveFunction = fn(&mut Interpreter<'_>, &[Value]) -> Result<Value, RuntimeError>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Arity {
    Fixed(usize),
    Variadic,
}

#[derive(Debug, Copy, Clone)]
pub struct PrimitiveMessage<'a> {
    pub name: &'a str,
    pub arity: Arity,
    /// Rewrites the active context itself; its result is ignored.
    pub switches_context: bool,
    pub ptr: PrimitiveFunction,
}

impl<'a> PrimitiveMessage<'a> {
    pub const fn new(name: &'a str, inputs: usize, ptr: PrimitiveFunction) -> Self {
        Self {
            name,
            arity: Arity::Fixed(inputs),
            switches_context: false,
            ptr,
        }
    }

    pub const fn variadic(name: &'a str, ptr: PrimitiveFunction) -> Self {
        Self {
            name,
            arity: Arity::Variadic,
            switches_context: false,
            ptr,
        }
    }

    pub const fn switching(mut self) -> Self {
        self.switches_context = true;
        self
    }
}

pub const PRIMITIVES: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("identical", 2, object::identical),
    PrimitiveMessage::new("integerAdd", 2, integer::add),
    PrimitiveMessage::new("integerSubtract", 2, integer::subtract),
    PrimitiveMessage::new("integerMultiply", 2, integer::multiply),
    PrimitiveMessage::new("integerQuotient", 2, integer::quotient),
    PrimitiveMessage::new("integerRemainder", 2, integer::remainder),
    PrimitiveMessage::new("integerLess", 2, integer::less),
    PrimitiveMessage::new("integerGreater", 2, integer::greater),
    PrimitiveMessage::new("integerLessEqual", 2, integer::less_equal),
    PrimitiveMessage::new("integerGreaterEqual", 2, integer::greater_equal),
    PrimitiveMessage::new("integerEqual", 2, integer::equal),
    PrimitiveMessage::new("integerNotEqual", 2, integer::not_equal),
    PrimitiveMessage::new("classOf", 1, object::class_of),
    PrimitiveMessage::new("identityHash", 1, object::identity_hash),
    PrimitiveMessage::new("printString", 1, object::print_string),
    PrimitiveMessage::new("displayString", 1, object::display_string),
    PrimitiveMessage::new("transcriptShow", 1, object::transcript_show),
    PrimitiveMessage::new("basicNew", 1, object::basic_new),
    PrimitiveMessage::new("arrayNew", 2, collection::array_new),
    PrimitiveMessage::new("size", 1, collection::size),
    PrimitiveMessage::new("at", 2, collection::at),
    PrimitiveMessage::new("atPut", 3, collection::at_put),
    PrimitiveMessage::new("stringConcat", 2, collection::string_concat),
    PrimitiveMessage::new("stringEqual", 2, collection::string_equal),
    PrimitiveMessage::new("asString", 1, collection::as_string),
    PrimitiveMessage::new("asSymbol", 1, collection::as_symbol),
    PrimitiveMessage::new("dictionaryNew", 1, collection::dictionary_new),
    PrimitiveMessage::new("dictionaryAt", 2, collection::dictionary_at),
    PrimitiveMessage::new("dictionaryAtPut", 3, collection::dictionary_at_put),
    PrimitiveMessage::variadic("blockInvoke", control::block_invoke).switching(),
    PrimitiveMessage::new("blockReturn", 2, control::block_return).switching(),
    PrimitiveMessage::new("returnInto", 2, control::return_into).switching(),
    PrimitiveMessage::new("processFork", 2, process::fork),
    PrimitiveMessage::new("processCurrent", 0, process::current),
    PrimitiveMessage::new("processYield", 0, process::yield_now),
    PrimitiveMessage::new("processSuspend", 1, process::suspend),
    PrimitiveMessage::new("processResume", 1, process::resume),
    PrimitiveMessage::new("disableInterrupts", 0, process::disable_interrupts),
    PrimitiveMessage::new("enableInterrupts", 0, process::enable_interrupts),
];

pub fn primitive_index(name: &str) -> Option<(usize, Arity)> {
    PRIMITIVES
        .iter()
        .position(|p| p.name == name)
        .map(|index| (index, PRIMITIVES[index].arity))
}

/// First tier of a `binary-op`; nil sends the selector instead.
pub fn binary_primitive(op: BinaryOp) -> PrimitiveFunction {
    match op {
        BinaryOp::Add => integer::add,
        BinaryOp::Subtract => integer::subtract,
        BinaryOp::Multiply => integer::multiply,
        BinaryOp::Quotient => integer::quotient,
        BinaryOp::Remainder => integer::remainder,
        BinaryOp::Less => integer::less,
        BinaryOp::Greater => integer::greater,
        BinaryOp::LessEqual => integer::less_equal,
        BinaryOp::GreaterEqual => integer::greater_equal,
        BinaryOp::Equal => integer::equal,
        BinaryOp::NotEqual => integer::not_equal,
        BinaryOp::Identical => object::identical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        for (i, p) in PRIMITIVES.iter().enumerate() {
            assert_eq!(primitive_index(p.name).map(|(index, _)| index), Some(i), "{}", p.name);
        }
    }

    #[test]
    fn binary_ops_have_registered_primitives() {
        for op in BinaryOp::ALL {
            let (_, arity) = primitive_index(op.primitive()).expect(op.selector());
            assert_eq!(arity, Arity::Fixed(2));
        }
    }

    #[test]
    fn indices_fit_an_operand_byte() {
        assert!(PRIMITIVES.len() <= u8::MAX as usize + 1);
        assert_eq!(primitive_index("blockInvoke").map(|(_, a)| a), Some(Arity::Variadic));
        assert!(primitive_index("fixnum+").is_none());
    }
}
