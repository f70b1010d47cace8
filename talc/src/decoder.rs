use std::fmt::Write;

use crate::{ArgRegisters, BinaryOp, Instruction, Op};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown opcode {byte:#04x} at {pc}")]
    UnknownOpcode { pc: usize, byte: u8 },
    #[error("unknown binary operator {byte} at {pc}")]
    UnknownBinaryOp { pc: usize, byte: u8 },
    #[error("send at {pc} passes {count} arguments")]
    TooManyArguments { pc: usize, count: u8 },
    #[error("instruction at {pc} runs past the end of the code")]
    Truncated { pc: usize },
    #[error("unknown primitive {index} at {pc}")]
    UnknownPrimitive { pc: usize, index: u8 },
}

/// Decodes the instruction at `pc`, returning it and the position of the
/// next one.
pub fn decode_at(code: &[u8], pc: usize) -> Result<(Instruction, usize), DecodeError> {
    let byte = |at: usize| code.get(at).copied().ok_or(DecodeError::Truncated { pc });
    let first = byte(pc)?;
    let op = Op::try_from(first).map_err(|byte| DecodeError::UnknownOpcode { pc, byte })?;
    let a = || byte(pc + 1);
    let b = || byte(pc + 2);
    let c = || byte(pc + 3);
    let offset = || Ok::<_, DecodeError>(i16::from_be_bytes([a()?, b()?]));
    let send_args = || {
        let count = b()?;
        let start = pc + 3;
        let regs = code
            .get(start..start + count as usize)
            .ok_or(DecodeError::Truncated { pc })?;
        ArgRegisters::new(regs).ok_or(DecodeError::TooManyArguments { pc, count })
    };

    let (instruction, len) = match op {
        Op::LoadNil => (Instruction::LoadNil, 1),
        Op::LoadTrue => (Instruction::LoadTrue, 1),
        Op::LoadFalse => (Instruction::LoadFalse, 1),
        Op::LoadThisContext => (Instruction::LoadThisContext, 1),
        Op::LoadSmalltalk => (Instruction::LoadSmalltalk, 1),
        Op::LoadInstVar => (Instruction::LoadInstVar { index: a()? }, 2),
        Op::LoadLiteral => (Instruction::LoadLiteral { index: a()? }, 2),
        Op::LoadMyHeapVar => (Instruction::LoadMyHeapVar { slot: a()? }, 2),
        Op::LoadParentHeapVar => (Instruction::LoadParentHeapVar { slot: a()? }, 2),
        Op::LoadGlobal => (Instruction::LoadGlobal { literal: a()? }, 2),
        Op::LoadRegister => (Instruction::LoadRegister { reg: a()? }, 2),
        Op::StoreInstVar => (Instruction::StoreInstVar { index: a()? }, 2),
        Op::StoreMyHeapVar => (Instruction::StoreMyHeapVar { slot: a()? }, 2),
        Op::StoreParentHeapVar => (Instruction::StoreParentHeapVar { slot: a()? }, 2),
        Op::StoreGlobal => (Instruction::StoreGlobal { literal: a()? }, 2),
        Op::StoreRegister => (Instruction::StoreRegister { reg: a()? }, 2),
        Op::Promote => (Instruction::Promote { my: a()?, parent: b()? }, 3),
        Op::Restore => (Instruction::Restore { parent: a()?, my: b()? }, 3),
        Op::Sync => (
            Instruction::Sync {
                my: a()?,
                parent: b()?,
                reg: c()?,
            },
            4,
        ),
        Op::Jump => (Instruction::Jump { offset: offset()? }, 3),
        Op::BranchIfFalse => (Instruction::BranchIfFalse { offset: offset()? }, 3),
        Op::BranchIfTrue => (Instruction::BranchIfTrue { offset: offset()? }, 3),
        Op::BinaryOp => {
            let raw = b()?;
            let op = BinaryOp::try_from(raw)
                .map_err(|byte| DecodeError::UnknownBinaryOp { pc, byte })?;
            (Instruction::BinaryOp { reg: a()?, op }, 3)
        }
        Op::Send | Op::SendSuper => {
            let args = send_args()?;
            let len = 3 + args.len();
            let selector = a()?;
            let instruction = if op == Op::Send {
                Instruction::Send { selector, args }
            } else {
                Instruction::SendSuper { selector, args }
            };
            (instruction, len)
        }
        Op::CopyBlock => (Instruction::CopyBlock { literal: a()? }, 2),
        Op::Primitive0 => (Instruction::Primitive0 { primitive: a()? }, 2),
        Op::Primitive1 => (Instruction::Primitive1 { primitive: a()? }, 2),
        Op::Primitive2 => (
            Instruction::Primitive2 {
                primitive: a()?,
                reg: b()?,
            },
            3,
        ),
        Op::Primitive3 => (
            Instruction::Primitive3 {
                primitive: a()?,
                reg1: b()?,
                reg2: c()?,
            },
            4,
        ),
        Op::PrimitiveV => (
            Instruction::PrimitiveV {
                primitive: a()?,
                first: b()?,
                count: c()?,
            },
            4,
        ),
        Op::Return => (Instruction::Return, 1),
        Op::ReturnSelf => (Instruction::ReturnSelf, 1),
    };
    Ok((instruction, pc + len))
}

/// Walks a code vector instruction by instruction.
pub struct BytecodeDecoder<'a> {
    code: &'a [u8],
    pc: usize,
    failed: bool,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            pc: 0,
            failed: false,
        }
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<(usize, Instruction), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pc >= self.code.len() {
            return None;
        }
        let at = self.pc;
        match decode_at(self.code, at) {
            Ok((instruction, next)) => {
                self.pc = next;
                Some(Ok((at, instruction)))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Renders `code` one instruction per line, prefixed with its offset.
/// Branch targets are resolved to absolute offsets.
pub fn disassemble(code: &[u8], indent: usize) -> Result<String, DecodeError> {
    let mut out = String::new();
    let pad = " ".repeat(indent);
    for decoded in BytecodeDecoder::new(code) {
        let (pc, instruction) = decoded?;
        let _ = write!(out, "{pad}{pc:04}  {instruction}");
        if let Instruction::Jump { offset }
        | Instruction::BranchIfFalse { offset }
        | Instruction::BranchIfTrue { offset } = instruction
        {
            let target = (pc + 3) as i64 + offset as i64;
            let _ = write!(out, "  -> {target:04}");
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BytecodeBuilder, builder::encode};

    fn decode_all(code: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(code)
            .map(|decoded| decoded.map(|(_, instruction)| instruction))
            .collect::<Result<_, _>>()
            .expect("valid code")
    }

    #[test]
    fn decodes_what_was_encoded() {
        let program = vec![
            Instruction::LoadLiteral { index: 0 },
            Instruction::StoreRegister { reg: 1 },
            Instruction::Promote { my: 0, parent: 2 },
            Instruction::Sync { my: 0, parent: 2, reg: 4 },
            Instruction::SendSuper {
                selector: 1,
                args: ArgRegisters::new(&[1, 2, 3]).unwrap(),
            },
            Instruction::PrimitiveV {
                primitive: 9,
                first: 1,
                count: 2,
            },
            Instruction::ReturnSelf,
        ];
        let mut code = Vec::new();
        for instruction in &program {
            encode(instruction, &mut code);
        }
        assert_eq!(decode_all(&code), program);
    }

    #[test]
    fn patched_branches_land_on_their_bound_position() {
        let mut builder = BytecodeBuilder::new();
        let mut expected = Vec::new();
        let skip = builder.branch_forward(Op::BranchIfFalse);
        builder.emit(Instruction::LoadTrue);
        let over = builder.branch_forward(Op::Jump);
        expected.push((skip.base(), builder.bind(skip).unwrap()));
        builder.emit(Instruction::LoadNil);
        expected.push((over.base(), builder.bind(over).unwrap()));
        let back_from = builder.position() + 3;
        builder.branch_back(Op::BranchIfTrue, 0).unwrap();
        expected.push((back_from, 0));
        let code = builder.finish();

        let mut landed = Vec::new();
        for decoded in BytecodeDecoder::new(&code) {
            let (pc, instruction) = decoded.unwrap();
            if let Instruction::Jump { offset }
            | Instruction::BranchIfFalse { offset }
            | Instruction::BranchIfTrue { offset } = instruction
            {
                let after = pc + 3;
                landed.push((after, (after as i64 + offset as i64) as usize));
            }
        }
        assert_eq!(landed, expected);
    }

    #[test]
    fn unknown_opcodes_stop_decoding() {
        let code = [Op::LoadNil as u8, 0xff, Op::Return as u8];
        let results: Vec<_> = BytecodeDecoder::new(&code).collect();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[1],
            Err(DecodeError::UnknownOpcode { pc: 1, byte: 0xff })
        );
    }

    #[test]
    fn truncated_operands_are_reported() {
        let code = [Op::Send as u8, 0, 2, 1];
        assert_eq!(decode_at(&code, 0), Err(DecodeError::Truncated { pc: 0 }));
    }

    #[test]
    fn disassembly_resolves_branch_targets() {
        let mut builder = BytecodeBuilder::new();
        let label = builder.branch_forward(Op::Jump);
        builder.emit(Instruction::LoadNil);
        builder.bind(label).unwrap();
        builder.emit(Instruction::Return);
        let text = disassemble(&builder.finish(), 0).unwrap();
        assert_eq!(text, "0000  jump +1  -> 0004\n0003  load-nil\n0004  return\n");
    }
}
