use std::fmt;

/// Most arguments a send or primitive can pass.
pub const MAX_ARGS: usize = 15;

/// Bytecode opcodes.
///
/// Every operand is one byte: a register, a literal index, a slot index or
/// a primitive number. Branches carry a 16-bit big-endian signed offset
/// relative to the byte after the offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    LoadNil = 0x00,
    LoadTrue,
    LoadFalse,
    LoadThisContext,
    /// Load the `Smalltalk` globals dictionary.
    LoadSmalltalk,
    /// Operands: `index`
    LoadInstVar,
    /// Operands: `literal`
    LoadLiteral,
    /// Operands: `slot`
    LoadMyHeapVar,
    /// Operands: `slot`
    LoadParentHeapVar,
    /// Operands: `literal` naming the global.
    LoadGlobal,
    /// Operands: `reg`
    LoadRegister,
    StoreInstVar,
    StoreMyHeapVar,
    StoreParentHeapVar,
    StoreGlobal,
    StoreRegister,
    /// Copy a parent heap-var into an own heap-var.
    /// Operands: `my`, `parent`
    Promote,
    /// Copy an own heap-var back into the parent heap-var it mirrors.
    /// Operands: `parent`, `my`
    Restore,
    /// Reconcile an own heap-var with the parent heap-var it mirrors. If the
    /// own copy changed since `reg` last recorded it, restore; otherwise
    /// promote. `reg` then holds the reconciled value.
    /// Operands: `my`, `parent`, `reg`
    Sync,
    /// Operands: `offset:i16`
    Jump,
    /// Operands: `offset:i16`
    BranchIfFalse,
    /// Operands: `offset:i16`
    BranchIfTrue,
    /// `acc := op(reg, acc)` with a send fallback.
    /// Operands: `reg`, `op`
    BinaryOp,
    /// Receiver in the accumulator.
    /// Operands: `selector literal`, `argc`, `argc` registers
    Send,
    /// Operands: as [`Send`](Op::Send)
    SendSuper,
    /// Operands: `literal` holding the block template.
    CopyBlock,
    /// Operands: `primitive`
    Primitive0,
    /// Argument in the accumulator. Operands: `primitive`
    Primitive1,
    /// Arguments `reg, acc`. Operands: `primitive`, `reg`
    Primitive2,
    /// Arguments `reg1, reg2, acc`. Operands: `primitive`, `reg1`, `reg2`
    Primitive3,
    /// Arguments in a register run. Operands: `primitive`, `first`, `count`
    PrimitiveV,
    Return,
    ReturnSelf,
}

impl Op {
    pub const COUNT: usize = Op::ReturnSelf as usize + 1;

    const ALL: [Op; Op::COUNT] = [
        Op::LoadNil,
        Op::LoadTrue,
        Op::LoadFalse,
        Op::LoadThisContext,
        Op::LoadSmalltalk,
        Op::LoadInstVar,
        Op::LoadLiteral,
        Op::LoadMyHeapVar,
        Op::LoadParentHeapVar,
        Op::LoadGlobal,
        Op::LoadRegister,
        Op::StoreInstVar,
        Op::StoreMyHeapVar,
        Op::StoreParentHeapVar,
        Op::StoreGlobal,
        Op::StoreRegister,
        Op::Promote,
        Op::Restore,
        Op::Sync,
        Op::Jump,
        Op::BranchIfFalse,
        Op::BranchIfTrue,
        Op::BinaryOp,
        Op::Send,
        Op::SendSuper,
        Op::CopyBlock,
        Op::Primitive0,
        Op::Primitive1,
        Op::Primitive2,
        Op::Primitive3,
        Op::PrimitiveV,
        Op::Return,
        Op::ReturnSelf,
    ];
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        Op::ALL.get(byte as usize).copied().ok_or(byte)
    }
}

/// Selectors the emitter compiles to [`Op::BinaryOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryOp {
    Add = 0,
    Subtract,
    Multiply,
    Quotient,
    Remainder,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    Identical,
}

impl BinaryOp {
    pub const COUNT: usize = BinaryOp::Identical as usize + 1;

    pub const ALL: [BinaryOp; BinaryOp::COUNT] = [
        BinaryOp::Add,
        BinaryOp::Subtract,
        BinaryOp::Multiply,
        BinaryOp::Quotient,
        BinaryOp::Remainder,
        BinaryOp::Less,
        BinaryOp::Greater,
        BinaryOp::LessEqual,
        BinaryOp::GreaterEqual,
        BinaryOp::Equal,
        BinaryOp::NotEqual,
        BinaryOp::Identical,
    ];

    pub fn selector(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Quotient => "//",
            BinaryOp::Remainder => "\\\\",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "~=",
            BinaryOp::Identical => "==",
        }
    }

    /// Name of the primitive tried before falling back to a send.
    pub fn primitive(self) -> &'static str {
        match self {
            BinaryOp::Add => "integerAdd",
            BinaryOp::Subtract => "integerSubtract",
            BinaryOp::Multiply => "integerMultiply",
            BinaryOp::Quotient => "integerQuotient",
            BinaryOp::Remainder => "integerRemainder",
            BinaryOp::Less => "integerLess",
            BinaryOp::Greater => "integerGreater",
            BinaryOp::LessEqual => "integerLessEqual",
            BinaryOp::GreaterEqual => "integerGreaterEqual",
            BinaryOp::Equal => "integerEqual",
            BinaryOp::NotEqual => "integerNotEqual",
            BinaryOp::Identical => "identical",
        }
    }

    pub fn from_selector(selector: &str) -> Option<Self> {
        BinaryOp::ALL
            .into_iter()
            .find(|op| op.selector() == selector)
    }
}

impl TryFrom<u8> for BinaryOp {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        BinaryOp::ALL.get(byte as usize).copied().ok_or(byte)
    }
}

/// Argument registers of a send, stored inline.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ArgRegisters {
    len: u8,
    regs: [u8; MAX_ARGS],
}

impl ArgRegisters {
    pub fn new(regs: &[u8]) -> Option<Self> {
        if regs.len() > MAX_ARGS {
            return None;
        }
        let mut inline = [0; MAX_ARGS];
        inline[..regs.len()].copy_from_slice(regs);
        Some(Self {
            len: regs.len() as u8,
            regs: inline,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.regs[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for ArgRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    LoadNil,
    LoadTrue,
    LoadFalse,
    LoadThisContext,
    LoadSmalltalk,
    LoadInstVar { index: u8 },
    LoadLiteral { index: u8 },
    LoadMyHeapVar { slot: u8 },
    LoadParentHeapVar { slot: u8 },
    LoadGlobal { literal: u8 },
    LoadRegister { reg: u8 },
    StoreInstVar { index: u8 },
    StoreMyHeapVar { slot: u8 },
    StoreParentHeapVar { slot: u8 },
    StoreGlobal { literal: u8 },
    StoreRegister { reg: u8 },
    Promote { my: u8, parent: u8 },
    Restore { parent: u8, my: u8 },
    Sync { my: u8, parent: u8, reg: u8 },
    Jump { offset: i16 },
    BranchIfFalse { offset: i16 },
    BranchIfTrue { offset: i16 },
    BinaryOp { reg: u8, op: BinaryOp },
    Send { selector: u8, args: ArgRegisters },
    SendSuper { selector: u8, args: ArgRegisters },
    CopyBlock { literal: u8 },
    Primitive0 { primitive: u8 },
    Primitive1 { primitive: u8 },
    Primitive2 { primitive: u8, reg: u8 },
    Primitive3 { primitive: u8, reg1: u8, reg2: u8 },
    PrimitiveV { primitive: u8, first: u8, count: u8 },
    Return,
    ReturnSelf,
}

impl Instruction {
    pub fn op(&self) -> Op {
        match self {
            Instruction::LoadNil => Op::LoadNil,
            Instruction::LoadTrue => Op::LoadTrue,
            Instruction::LoadFalse => Op::LoadFalse,
            Instruction::LoadThisContext => Op::LoadThisContext,
            Instruction::LoadSmalltalk => Op::LoadSmalltalk,
            Instruction::LoadInstVar { .. } => Op::LoadInstVar,
            Instruction::LoadLiteral { .. } => Op::LoadLiteral,
            Instruction::LoadMyHeapVar { .. } => Op::LoadMyHeapVar,
            Instruction::LoadParentHeapVar { .. } => Op::LoadParentHeapVar,
            Instruction::LoadGlobal { .. } => Op::LoadGlobal,
            Instruction::LoadRegister { .. } => Op::LoadRegister,
            Instruction::StoreInstVar { .. } => Op::StoreInstVar,
            Instruction::StoreMyHeapVar { .. } => Op::StoreMyHeapVar,
            Instruction::StoreParentHeapVar { .. } => Op::StoreParentHeapVar,
            Instruction::StoreGlobal { .. } => Op::StoreGlobal,
            Instruction::StoreRegister { .. } => Op::StoreRegister,
            Instruction::Promote { .. } => Op::Promote,
            Instruction::Restore { .. } => Op::Restore,
            Instruction::Sync { .. } => Op::Sync,
            Instruction::Jump { .. } => Op::Jump,
            Instruction::BranchIfFalse { .. } => Op::BranchIfFalse,
            Instruction::BranchIfTrue { .. } => Op::BranchIfTrue,
            Instruction::BinaryOp { .. } => Op::BinaryOp,
            Instruction::Send { .. } => Op::Send,
            Instruction::SendSuper { .. } => Op::SendSuper,
            Instruction::CopyBlock { .. } => Op::CopyBlock,
            Instruction::Primitive0 { .. } => Op::Primitive0,
            Instruction::Primitive1 { .. } => Op::Primitive1,
            Instruction::Primitive2 { .. } => Op::Primitive2,
            Instruction::Primitive3 { .. } => Op::Primitive3,
            Instruction::PrimitiveV { .. } => Op::PrimitiveV,
            Instruction::Return => Op::Return,
            Instruction::ReturnSelf => Op::ReturnSelf,
        }
    }
}

fn write_regs(f: &mut fmt::Formatter<'_>, args: &ArgRegisters) -> fmt::Result {
    write!(f, "(")?;
    for (i, reg) in args.as_slice().iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "r{reg}")?;
    }
    write!(f, ")")
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::LoadNil => write!(f, "load-nil"),
            Instruction::LoadTrue => write!(f, "load-true"),
            Instruction::LoadFalse => write!(f, "load-false"),
            Instruction::LoadThisContext => write!(f, "load-this-context"),
            Instruction::LoadSmalltalk => write!(f, "load-smalltalk"),
            Instruction::LoadInstVar { index } => write!(f, "load-instance-var {index}"),
            Instruction::LoadLiteral { index } => write!(f, "load-literal {index}"),
            Instruction::LoadMyHeapVar { slot } => write!(f, "load-my-heap-var {slot}"),
            Instruction::LoadParentHeapVar { slot } => write!(f, "load-parent-heap-var {slot}"),
            Instruction::LoadGlobal { literal } => write!(f, "load-global {literal}"),
            Instruction::LoadRegister { reg } => write!(f, "load-register r{reg}"),
            Instruction::StoreInstVar { index } => write!(f, "store-instance-var {index}"),
            Instruction::StoreMyHeapVar { slot } => write!(f, "store-my-heap-var {slot}"),
            Instruction::StoreParentHeapVar { slot } => write!(f, "store-parent-heap-var {slot}"),
            Instruction::StoreGlobal { literal } => write!(f, "store-global {literal}"),
            Instruction::StoreRegister { reg } => write!(f, "store-register r{reg}"),
            Instruction::Promote { my, parent } => write!(f, "promote my{my} <- parent{parent}"),
            Instruction::Restore { parent, my } => write!(f, "restore parent{parent} <- my{my}"),
            Instruction::Sync { my, parent, reg } => write!(f, "sync my{my} parent{parent} r{reg}"),
            Instruction::Jump { offset } => write!(f, "jump {offset:+}"),
            Instruction::BranchIfFalse { offset } => write!(f, "branch-if-false {offset:+}"),
            Instruction::BranchIfTrue { offset } => write!(f, "branch-if-true {offset:+}"),
            Instruction::BinaryOp { reg, op } => write!(f, "binary-op r{reg} {}", op.selector()),
            Instruction::Send { selector, args } => {
                write!(f, "send {selector} ")?;
                write_regs(f, args)
            }
            Instruction::SendSuper { selector, args } => {
                write!(f, "send-super {selector} ")?;
                write_regs(f, args)
            }
            Instruction::CopyBlock { literal } => write!(f, "copy-block {literal}"),
            Instruction::Primitive0 { primitive } => write!(f, "primitive0 {primitive}"),
            Instruction::Primitive1 { primitive } => write!(f, "primitive1 {primitive}"),
            Instruction::Primitive2 { primitive, reg } => write!(f, "primitive2 {primitive} r{reg}"),
            Instruction::Primitive3 {
                primitive,
                reg1,
                reg2,
            } => write!(f, "primitive3 {primitive} r{reg1} r{reg2}"),
            Instruction::PrimitiveV {
                primitive,
                first,
                count,
            } => write!(f, "primitiveV {primitive} r{first}..+{count}"),
            Instruction::Return => write!(f, "return"),
            Instruction::ReturnSelf => write!(f, "return-self"),
        }
    }
}
