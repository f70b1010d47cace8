//! Second compiler pass: resolved syntax tree to register bytecode.
//!
//! Every expression leaves its value in the accumulator. Intermediate values
//! go to temporary registers allocated above the locals with a stack
//! discipline; the high-water mark becomes the code's `stack_size`.
use std::fmt::Write;

use crate::ast::{BlockNode, Expr, InlineForm, Literal, MethodNode, Pseudo};
use crate::{
    ArgRegisters, Arity, BinaryOp, Binding, BytecodeBuilder, CompileError, DecodeError,
    HeapVarOrigin, Instruction, MAX_ARGS, Op, SMALL_INTEGER_MAX, SMALL_INTEGER_MIN, ScopeId,
    ScopeKind, ScopeTree, decoder, primitive_index, resolve_method,
};

/// Selector sent to `thisContext` to return from a block's home method.
pub const BLOCK_RETURN_SELECTOR: &str = "blockReturn:";

const MAX_LITERALS: usize = 256;
const MAX_REGISTERS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Integer(i64),
    String(String),
    Symbol(String),
    Array(Vec<Constant>),
    Block(Box<CodeDesc>),
}

/// Compiled code before it is materialized on the heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDesc {
    pub selector: String,
    pub bytecode: Vec<u8>,
    pub literals: Vec<Constant>,
    pub arg_count: usize,
    pub temp_count: usize,
    pub heap_var_count: usize,
    pub stack_size: usize,
}

impl CodeDesc {
    pub fn instructions(&self) -> Result<Vec<Instruction>, DecodeError> {
        decoder::BytecodeDecoder::new(&self.bytecode)
            .map(|decoded| decoded.map(|(_, instruction)| instruction))
            .collect()
    }

    /// Listing of this code and, indented below it, every block literal.
    pub fn disassemble(&self) -> Result<String, DecodeError> {
        let mut out = String::new();
        self.disassemble_into(&mut out, 0)?;
        Ok(out)
    }

    fn disassemble_into(&self, out: &mut String, depth: usize) -> Result<(), DecodeError> {
        let pad = "  ".repeat(depth);
        let _ = writeln!(
            out,
            "{pad}{} ({} args, {} temps, {} heap vars, {} stack)",
            if depth == 0 { self.selector.as_str() } else { "[]" },
            self.arg_count,
            self.temp_count,
            self.heap_var_count,
            self.stack_size
        );
        out.push_str(&decoder::disassemble(&self.bytecode, pad.len() + 2)?);
        for (index, literal) in self.literals.iter().enumerate() {
            match literal {
                Constant::Block(block) => {
                    let _ = writeln!(out, "{pad}  literal {index}:");
                    block.disassemble_into(out, depth + 1)?;
                }
                other => {
                    let _ = writeln!(out, "{pad}  literal {index}: {other:?}");
                }
            }
        }
        Ok(())
    }
}

/// Resolves and compiles `method`. Instance variables of the target class
/// are needed to bind instance-variable references.
pub fn compile_method(method: &mut MethodNode, instance_variables: &[String]) -> Result<CodeDesc, CompileError> {
    let tree = resolve_method(method, instance_variables)?;
    let scope = method
        .scope
        .ok_or_else(|| CompileError::new("method was not resolved"))?;
    let mut emitter = Emitter::new(&tree, scope, &method.selector)?;
    emitter.prologue();
    emitter.statements(&method.body)?;
    if !method.ends_with_return() {
        emitter.builder.emit(Instruction::ReturnSelf);
    }
    Ok(emitter.finish())
}

struct Emitter<'t> {
    tree: &'t ScopeTree,
    scope: ScopeId,
    selector: &'t str,
    builder: BytecodeBuilder,
    literals: Vec<Constant>,
    /// `(my, parent, reg)` for every chained slot; `reg` remembers the value
    /// last agreed on with the parent.
    syncs: Vec<(u8, u8, u8)>,
    first_temp: usize,
    next_temp: usize,
    max_temp: usize,
}

impl<'t> Emitter<'t> {
    fn new(tree: &'t ScopeTree, scope: ScopeId, selector: &'t str) -> Result<Self, CompileError> {
        let fixed = tree.scope(scope).fixed_registers();
        let mut syncs = Vec::new();
        for (i, (my, parent)) in tree.scope(scope).chained().enumerate() {
            let reg = u8::try_from(fixed + i).map_err(|_| CompileError::new("too many variables for 8-bit registers"))?;
            syncs.push((my, parent, reg));
        }
        let first_temp = fixed + syncs.len();
        Ok(Self {
            tree,
            scope,
            selector,
            builder: BytecodeBuilder::new(),
            literals: Vec::new(),
            syncs,
            first_temp,
            next_temp: first_temp,
            max_temp: first_temp,
        })
    }

    fn finish(self) -> CodeDesc {
        let tree = self.tree;
        let scope = tree.scope(self.scope);
        CodeDesc {
            selector: self.selector.to_string(),
            bytecode: self.builder.finish(),
            literals: self.literals,
            arg_count: scope.arg_count,
            temp_count: scope.local_count() + self.syncs.len(),
            heap_var_count: scope.heap_vars().len(),
            stack_size: self.max_temp - self.first_temp,
        }
    }

    fn in_block(&self) -> bool {
        self.tree.scope(self.scope).kind == ScopeKind::Block
    }

    fn alloc_temp(&mut self) -> Result<u8, CompileError> {
        let reg = self.next_temp;
        if reg >= MAX_REGISTERS {
            return Err(CompileError::new("expression too deep for 8-bit registers"));
        }
        self.next_temp += 1;
        self.max_temp = self.max_temp.max(self.next_temp);
        Ok(reg as u8)
    }

    /// Evaluates `expr` into a fresh temporary.
    fn stash(&mut self, expr: &Expr) -> Result<u8, CompileError> {
        self.expr(expr)?;
        let reg = self.alloc_temp()?;
        self.builder.emit(Instruction::StoreRegister { reg });
        Ok(reg)
    }

    fn literal(&mut self, constant: Constant) -> Result<u8, CompileError> {
        // blocks are never shared, everything else is deduplicated
        if !matches!(constant, Constant::Block(_)) {
            if let Some(index) = self.literals.iter().position(|c| *c == constant) {
                return Ok(index as u8);
            }
        }
        if self.literals.len() >= MAX_LITERALS {
            return Err(CompileError::new("too many literals for 8-bit operands"));
        }
        self.literals.push(constant);
        Ok((self.literals.len() - 1) as u8)
    }

    fn symbol(&mut self, name: &str) -> Result<u8, CompileError> {
        self.literal(Constant::Symbol(name.to_string()))
    }

    /// Copies chained slots, then arguments, into this activation's
    /// heap-vars. The leading run of promotes is what the interpreter
    /// restores when a non-local return unwinds the frame.
    fn prologue(&mut self) {
        for &(my, parent, _) in &self.syncs {
            self.builder.emit(Instruction::Promote { my, parent });
        }
        let tree = self.tree;
        let heap_vars = tree.scope(self.scope).heap_vars();
        for (slot, origin) in heap_vars.iter().enumerate() {
            if let HeapVarOrigin::Argument { register } = *origin {
                self.builder.emit(Instruction::LoadRegister { reg: register });
                self.builder.emit(Instruction::StoreMyHeapVar { slot: slot as u8 });
            }
        }
    }

    /// Copies chained slots back out to the parent's heap-vars.
    fn restores(&mut self) {
        for &(my, parent, _) in &self.syncs {
            self.builder.emit(Instruction::Restore { parent, my });
        }
    }

    fn sync(&mut self) {
        for &(my, parent, reg) in &self.syncs {
            self.builder.emit(Instruction::Sync { my, parent, reg });
        }
    }

    /// Emits an instruction that may run other code. Chained slots are
    /// reconciled on both sides so writes made by callees and by other
    /// closures on the parent both survive.
    fn call(&mut self, instruction: Instruction) {
        self.sync();
        self.builder.emit(instruction);
        self.sync();
    }

    fn statements(&mut self, body: &[Expr]) -> Result<(), CompileError> {
        for expr in body {
            self.expr(expr)?;
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let mark = self.next_temp;
        let result = match expr {
            Expr::Literal(literal) => self.load_literal(literal),
            Expr::Pseudo(pseudo) => {
                self.builder.emit(match pseudo {
                    Pseudo::SelfRef => Instruction::LoadRegister { reg: 0 },
                    Pseudo::Nil => Instruction::LoadNil,
                    Pseudo::True => Instruction::LoadTrue,
                    Pseudo::False => Instruction::LoadFalse,
                    Pseudo::ThisContext => Instruction::LoadThisContext,
                    Pseudo::Smalltalk => Instruction::LoadSmalltalk,
                });
                Ok(())
            }
            Expr::Variable(ident) => {
                let binding = bound(ident)?;
                self.load(binding, &ident.name)
            }
            Expr::Assign(ident, value) => {
                self.expr(value)?;
                let binding = bound(ident)?;
                self.store(binding, &ident.name)
            }
            Expr::Send {
                receiver,
                selector,
                args,
            } => self.send(receiver, selector, args),
            Expr::SuperSend { selector, args } => {
                let regs = self.stash_args(args)?;
                self.builder.emit(Instruction::LoadRegister { reg: 0 });
                let selector = self.symbol(selector)?;
                self.call(Instruction::SendSuper { selector, args: regs });
                Ok(())
            }
            Expr::Block(node) => {
                let desc = self.block(node)?;
                let literal = self.literal(Constant::Block(Box::new(desc)))?;
                self.builder.emit(Instruction::CopyBlock { literal });
                Ok(())
            }
            Expr::Return(value) => self.ret(value),
            Expr::Primitive { name, args } => self.primitive(name, args),
        };
        self.next_temp = mark;
        result
    }

    fn load_literal(&mut self, literal: &Literal) -> Result<(), CompileError> {
        let index = self.literal(constant(literal)?)?;
        self.builder.emit(Instruction::LoadLiteral { index });
        Ok(())
    }

    fn load(&mut self, binding: Binding, name: &str) -> Result<(), CompileError> {
        let instruction = match binding {
            Binding::Register(reg) => Instruction::LoadRegister { reg },
            Binding::MyHeapVar(slot) => Instruction::LoadMyHeapVar { slot },
            Binding::ParentHeapVar(slot) => Instruction::LoadParentHeapVar { slot },
            Binding::Instance(index) => Instruction::LoadInstVar { index },
            Binding::Global => Instruction::LoadGlobal {
                literal: self.symbol(name)?,
            },
        };
        self.builder.emit(instruction);
        Ok(())
    }

    fn store(&mut self, binding: Binding, name: &str) -> Result<(), CompileError> {
        let instruction = match binding {
            Binding::Register(reg) => Instruction::StoreRegister { reg },
            Binding::MyHeapVar(slot) => Instruction::StoreMyHeapVar { slot },
            Binding::ParentHeapVar(slot) => Instruction::StoreParentHeapVar { slot },
            Binding::Instance(index) => Instruction::StoreInstVar { index },
            Binding::Global => Instruction::StoreGlobal {
                literal: self.symbol(name)?,
            },
        };
        self.builder.emit(instruction);
        Ok(())
    }

    fn stash_args(&mut self, args: &[Expr]) -> Result<ArgRegisters, CompileError> {
        if args.len() > MAX_ARGS {
            return Err(CompileError::new(format!("more than {MAX_ARGS} arguments")));
        }
        let mut regs = Vec::with_capacity(args.len());
        for arg in args {
            regs.push(self.stash(arg)?);
        }
        ArgRegisters::new(&regs).ok_or_else(|| CompileError::new("too many arguments"))
    }

    fn send(&mut self, receiver: &Expr, selector: &str, args: &[Expr]) -> Result<(), CompileError> {
        if let Some(form) = InlineForm::recognize(receiver, selector, args) {
            return self.inline(form, receiver, args);
        }
        if let (Some(op), [arg]) = (BinaryOp::from_selector(selector), args) {
            let reg = self.stash(receiver)?;
            self.expr(arg)?;
            self.call(Instruction::BinaryOp { reg, op });
            return Ok(());
        }
        let regs = if args.is_empty() {
            self.expr(receiver)?;
            self.stash_args(args)?
        } else {
            let receiver = self.stash(receiver)?;
            let regs = self.stash_args(args)?;
            self.builder.emit(Instruction::LoadRegister { reg: receiver });
            regs
        };
        let selector = self.symbol(selector)?;
        self.call(Instruction::Send { selector, args: regs });
        Ok(())
    }

    fn ret(&mut self, value: &Expr) -> Result<(), CompileError> {
        self.expr(value)?;
        if !self.in_block() {
            self.builder.emit(Instruction::Return);
            return Ok(());
        }
        let reg = self.alloc_temp()?;
        self.builder.emit(Instruction::StoreRegister { reg });
        self.restores();
        self.builder.emit(Instruction::LoadThisContext);
        let selector = self.symbol(BLOCK_RETURN_SELECTOR)?;
        let args = ArgRegisters::new(&[reg]).ok_or_else(|| CompileError::new("too many arguments"))?;
        self.builder.emit(Instruction::Send { selector, args });
        Ok(())
    }

    fn primitive(&mut self, name: &str, args: &[Expr]) -> Result<(), CompileError> {
        let (index, arity) =
            primitive_index(name).ok_or_else(|| CompileError::new(format!("unknown primitive `{name}`")))?;
        let primitive = u8::try_from(index).map_err(|_| CompileError::new("primitive index out of range"))?;
        match arity {
            Arity::Fixed(expected) if expected != args.len() => {
                return Err(CompileError::new(format!(
                    "primitive `{name}` takes {expected} arguments, got {}",
                    args.len()
                )));
            }
            _ => {}
        }
        let instruction = match (arity, args) {
            (Arity::Fixed(_), []) => Instruction::Primitive0 { primitive },
            (Arity::Fixed(_), [a]) => {
                self.expr(a)?;
                Instruction::Primitive1 { primitive }
            }
            (Arity::Fixed(_), [a, b]) => {
                let reg = self.stash(a)?;
                self.expr(b)?;
                Instruction::Primitive2 { primitive, reg }
            }
            (Arity::Fixed(_), [a, b, c]) => {
                let reg1 = self.stash(a)?;
                let reg2 = self.stash(b)?;
                self.expr(c)?;
                Instruction::Primitive3 {
                    primitive,
                    reg1,
                    reg2,
                }
            }
            _ => {
                let first = self.next_temp as u8;
                let regs = self.stash_args(args)?;
                Instruction::PrimitiveV {
                    primitive,
                    first,
                    count: regs.len() as u8,
                }
            }
        };
        self.call(instruction);
        Ok(())
    }

    /// Compiles a block literal as its own code.
    fn block(&mut self, node: &BlockNode) -> Result<CodeDesc, CompileError> {
        let scope = node
            .scope
            .ok_or_else(|| CompileError::new("block was not resolved"))?;
        let mut emitter = Emitter::new(self.tree, scope, self.selector)?;
        emitter.prologue();
        emitter.statements(&node.body)?;
        if node.body.is_empty() {
            emitter.builder.emit(Instruction::LoadNil);
        }
        emitter.restores();
        emitter.builder.emit(Instruction::Return);
        Ok(emitter.finish())
    }

    /// Emits the statements of an inlined block in place.
    fn inline_body(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let Expr::Block(node) = expr else {
            return Err(CompileError::new("inlined argument is not a block"));
        };
        for temp in &node.temps {
            self.builder.emit(Instruction::LoadNil);
            self.store(bound(temp)?, &temp.name)?;
        }
        if node.body.is_empty() {
            self.builder.emit(Instruction::LoadNil);
        }
        self.statements(&node.body)
    }

    fn inline(&mut self, form: InlineForm, receiver: &Expr, args: &[Expr]) -> Result<(), CompileError> {
        match form {
            InlineForm::IfTrue | InlineForm::IfFalse => {
                let skip = if form == InlineForm::IfTrue {
                    Op::BranchIfFalse
                } else {
                    Op::BranchIfTrue
                };
                self.expr(receiver)?;
                let otherwise = self.builder.branch_forward(skip);
                self.inline_body(&args[0])?;
                let end = self.builder.branch_forward(Op::Jump);
                self.builder.bind(otherwise)?;
                self.builder.emit(Instruction::LoadNil);
                self.builder.bind(end)?;
            }
            InlineForm::IfTrueIfFalse | InlineForm::IfFalseIfTrue => {
                let skip = if form == InlineForm::IfTrueIfFalse {
                    Op::BranchIfFalse
                } else {
                    Op::BranchIfTrue
                };
                self.expr(receiver)?;
                let otherwise = self.builder.branch_forward(skip);
                self.inline_body(&args[0])?;
                let end = self.builder.branch_forward(Op::Jump);
                self.builder.bind(otherwise)?;
                self.inline_body(&args[1])?;
                self.builder.bind(end)?;
            }
            InlineForm::And => {
                // a false or nil receiver is the result
                self.expr(receiver)?;
                let end = self.builder.branch_forward(Op::BranchIfFalse);
                self.inline_body(&args[0])?;
                self.builder.bind(end)?;
            }
            InlineForm::WhileTrueDo | InlineForm::WhileFalseDo => {
                let exit = if form == InlineForm::WhileTrueDo {
                    Op::BranchIfFalse
                } else {
                    Op::BranchIfTrue
                };
                let top = self.builder.position();
                self.inline_body(receiver)?;
                let done = self.builder.branch_forward(exit);
                self.inline_body(&args[0])?;
                self.builder.branch_back(Op::Jump, top)?;
                self.builder.bind(done)?;
                self.builder.emit(Instruction::LoadNil);
            }
            InlineForm::WhileTrue | InlineForm::WhileFalse => {
                let again = if form == InlineForm::WhileTrue {
                    Op::BranchIfTrue
                } else {
                    Op::BranchIfFalse
                };
                let top = self.builder.position();
                self.inline_body(receiver)?;
                self.builder.branch_back(again, top)?;
                self.builder.emit(Instruction::LoadNil);
            }
        }
        Ok(())
    }
}

fn bound(ident: &crate::ast::Ident) -> Result<Binding, CompileError> {
    ident
        .binding
        .ok_or_else(|| CompileError::new(format!("`{}` was not resolved", ident.name)))
}

fn constant(literal: &Literal) -> Result<Constant, CompileError> {
    Ok(match literal {
        Literal::Integer(value) => {
            if !(SMALL_INTEGER_MIN..=SMALL_INTEGER_MAX).contains(value) {
                return Err(CompileError::new(format!("integer literal {value} out of range")));
            }
            Constant::Integer(*value)
        }
        Literal::String(value) => Constant::String(value.clone()),
        Literal::Symbol(value) => Constant::Symbol(value.clone()),
        Literal::Array(items) => Constant::Array(items.iter().map(constant).collect::<Result<_, _>>()?),
    })
}
