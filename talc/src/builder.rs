use crate::{ArgRegisters, CompileError, Instruction, Op};

/// A forward branch waiting for its target.
///
/// `offset_pos` is where the two offset bytes live; the offset is measured
/// from `offset_pos + 2`.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an unbound label leaves a zero offset behind"]
pub struct Label {
    offset_pos: usize,
}

impl Label {
    /// First byte after the branch instruction.
    pub fn base(&self) -> usize {
        self.offset_pos + 2
    }
}

fn branch_offset(from: usize, to: usize) -> Result<i16, CompileError> {
    let delta = to as i64 - from as i64;
    i16::try_from(delta)
        .map_err(|_| CompileError::new(format!("branch offset {delta} does not fit in 16 bits")))
}

fn push_send(code: &mut Vec<u8>, op: Op, selector: u8, args: &ArgRegisters) {
    code.push(op as u8);
    code.push(selector);
    code.push(args.len() as u8);
    code.extend_from_slice(args.as_slice());
}

/// Appends the encoding of `instruction` to `code`.
pub fn encode(instruction: &Instruction, code: &mut Vec<u8>) {
    let op = instruction.op();
    match *instruction {
        Instruction::LoadNil
        | Instruction::LoadTrue
        | Instruction::LoadFalse
        | Instruction::LoadThisContext
        | Instruction::LoadSmalltalk
        | Instruction::Return
        | Instruction::ReturnSelf => code.push(op as u8),
        Instruction::LoadInstVar { index: a }
        | Instruction::LoadLiteral { index: a }
        | Instruction::LoadMyHeapVar { slot: a }
        | Instruction::LoadParentHeapVar { slot: a }
        | Instruction::LoadGlobal { literal: a }
        | Instruction::LoadRegister { reg: a }
        | Instruction::StoreInstVar { index: a }
        | Instruction::StoreMyHeapVar { slot: a }
        | Instruction::StoreParentHeapVar { slot: a }
        | Instruction::StoreGlobal { literal: a }
        | Instruction::StoreRegister { reg: a }
        | Instruction::CopyBlock { literal: a }
        | Instruction::Primitive0 { primitive: a }
        | Instruction::Primitive1 { primitive: a } => code.extend_from_slice(&[op as u8, a]),
        Instruction::Promote { my: a, parent: b }
        | Instruction::Restore { parent: a, my: b }
        | Instruction::Primitive2 {
            primitive: a,
            reg: b,
        } => code.extend_from_slice(&[op as u8, a, b]),
        Instruction::BinaryOp { reg, op: binary } => {
            code.extend_from_slice(&[op as u8, reg, binary as u8])
        }
        Instruction::Primitive3 {
            primitive,
            reg1,
            reg2,
        } => code.extend_from_slice(&[op as u8, primitive, reg1, reg2]),
        Instruction::Sync { my, parent, reg } => code.extend_from_slice(&[op as u8, my, parent, reg]),
        Instruction::PrimitiveV {
            primitive,
            first,
            count,
        } => code.extend_from_slice(&[op as u8, primitive, first, count]),
        Instruction::Jump { offset }
        | Instruction::BranchIfFalse { offset }
        | Instruction::BranchIfTrue { offset } => {
            code.push(op as u8);
            code.extend_from_slice(&offset.to_be_bytes());
        }
        Instruction::Send { selector, ref args } | Instruction::SendSuper { selector, ref args } => {
            push_send(code, op, selector, args)
        }
    }
}

/// Accumulates bytecode and patches branch offsets.
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    code: Vec<u8>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, instruction: Instruction) {
        encode(&instruction, &mut self.code);
    }

    /// Emits a forward jump or branch with a placeholder offset.
    pub fn branch_forward(&mut self, op: Op) -> Label {
        debug_assert!(matches!(op, Op::Jump | Op::BranchIfFalse | Op::BranchIfTrue));
        self.code.push(op as u8);
        let offset_pos = self.code.len();
        self.code.extend_from_slice(&[0, 0]);
        Label { offset_pos }
    }

    /// Emits a jump or branch to an already known position.
    pub fn branch_back(&mut self, op: Op, target: usize) -> Result<(), CompileError> {
        debug_assert!(matches!(op, Op::Jump | Op::BranchIfFalse | Op::BranchIfTrue));
        let offset = branch_offset(self.position() + 3, target)?;
        self.code.push(op as u8);
        self.code.extend_from_slice(&offset.to_be_bytes());
        Ok(())
    }

    /// Points `label` at the current position. Returns that position.
    pub fn bind(&mut self, label: Label) -> Result<usize, CompileError> {
        let target = self.position();
        let offset = branch_offset(label.base(), target)?;
        self.code[label.offset_pos..label.base()].copy_from_slice(&offset.to_be_bytes());
        Ok(target)
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }
}
