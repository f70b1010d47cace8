//! Variable binding and closure capture analysis.
//!
//! Every method and every block that is compiled to its own code gets a
//! [`Scope`]. A variable that a nested block needs is promoted into a heap-var
//! slot of the scope that owns it, and each scope between the owner and the
//! user promotes a chained copy of that slot. A block therefore always reaches
//! a captured variable through its parent's heap-var array, never by walking
//! several frames at run time.
//!
//! Resolution runs twice over the tree. The first pass only performs lookups,
//! which triggers every promotion. The second pass repeats the same lookups,
//! which are now stable, and records the bindings.
use crate::ast::{BlockNode, Expr, InlineForm, MethodNode, RESERVED_NAMES};
use crate::CompileError;

const MAX_REGISTERS: usize = 256;
const MAX_HEAP_VARS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

/// Where a resolved identifier lives at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Register(u8),
    MyHeapVar(u8),
    ParentHeapVar(u8),
    Instance(u8),
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Argument,
    Local,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    pub register: u8,
    pub heap_slot: Option<u8>,
    visible: bool,
}

impl Variable {
    fn binding(&self) -> Binding {
        match self.heap_slot {
            Some(slot) => Binding::MyHeapVar(slot),
            None => Binding::Register(self.register),
        }
    }
}

/// How a heap-var slot gets its value when the scope is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapVarOrigin {
    /// Copied from an argument register.
    Argument { register: u8 },
    /// Starts out nil.
    Local,
    /// Copied from the parent's heap-vars on entry and back on exit.
    Chained { parent_slot: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Method,
    Block,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub arg_count: usize,
    variables: Vec<Variable>,
    heap_vars: Vec<HeapVarOrigin>,
}

impl Scope {
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn heap_vars(&self) -> &[HeapVarOrigin] {
        &self.heap_vars
    }

    /// Declared and hoisted temporaries.
    pub fn local_count(&self) -> usize {
        self.variables.len() - self.arg_count
    }

    /// Receiver, arguments and locals.
    pub fn fixed_registers(&self) -> usize {
        1 + self.variables.len()
    }

    /// Own slot mirroring the parent's `parent_slot`, if any.
    pub fn chained_slot(&self, parent_slot: u8) -> Option<u8> {
        let chained = HeapVarOrigin::Chained { parent_slot };
        self.heap_vars.iter().position(|&origin| origin == chained).map(|slot| slot as u8)
    }

    /// `(my, parent)` pairs of every chained slot, in slot order.
    pub fn chained(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.heap_vars.iter().enumerate().filter_map(|(slot, origin)| match *origin {
            HeapVarOrigin::Chained { parent_slot } => Some((slot as u8, parent_slot)),
            _ => None,
        })
    }
}

enum Capture {
    Slot { slot: u8, argument: bool },
    Instance(u8),
    Global,
}

/// All scopes of one method, plus the instance variables of its class.
#[derive(Debug, Clone)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
    instance_variables: Vec<String>,
}

impl ScopeTree {
    pub fn new(instance_variables: Vec<String>) -> Self {
        Self {
            scopes: Vec::new(),
            instance_variables,
        }
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0]
    }

    fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn push_scope(&mut self, kind: ScopeKind, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            kind,
            parent,
            arg_count: 0,
            variables: Vec::new(),
            heap_vars: Vec::new(),
        });
        id
    }

    /// Adds a variable to `scope` and returns its index.
    pub fn declare(&mut self, scope: ScopeId, name: &str, kind: VariableKind) -> Result<usize, CompileError> {
        if RESERVED_NAMES.contains(&name) {
            return Err(CompileError::new(format!("cannot declare reserved name `{name}`")));
        }
        let scope = self.scope_mut(scope);
        let register = scope.fixed_registers();
        if register >= MAX_REGISTERS {
            return Err(CompileError::new("too many variables for 8-bit registers"));
        }
        if kind == VariableKind::Argument {
            debug_assert_eq!(scope.arg_count, scope.variables.len(), "arguments come first");
            scope.arg_count += 1;
        }
        scope.variables.push(Variable {
            name: name.into(),
            kind,
            register: register as u8,
            heap_slot: None,
            visible: true,
        });
        Ok(scope.variables.len() - 1)
    }

    fn declare_all(&mut self, scope: ScopeId, names: &[&str], kind: VariableKind) -> Result<usize, CompileError> {
        let first = self.scope(scope).variables.len();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(CompileError::new(format!("`{name}` declared twice")));
            }
            self.declare(scope, name, kind)?;
        }
        Ok(first)
    }

    fn set_visible(&mut self, scope: ScopeId, first: usize, count: usize, visible: bool) {
        for variable in &mut self.scope_mut(scope).variables[first..first + count] {
            variable.visible = visible;
        }
    }

    fn find_own(&self, scope: ScopeId, name: &str) -> Option<usize> {
        self.scope(scope)
            .variables
            .iter()
            .rposition(|v| v.visible && v.name == name)
    }

    /// Moves a variable of `scope` into a heap-var slot. Idempotent.
    fn promote(&mut self, scope: ScopeId, index: usize) -> Result<u8, CompileError> {
        let scope = self.scope_mut(scope);
        if let Some(slot) = scope.variables[index].heap_slot {
            return Ok(slot);
        }
        let variable = &scope.variables[index];
        let origin = match variable.kind {
            VariableKind::Argument => HeapVarOrigin::Argument {
                register: variable.register,
            },
            VariableKind::Local => HeapVarOrigin::Local,
        };
        let slot = push_heap_var(&mut scope.heap_vars, origin)?;
        scope.variables[index].heap_slot = Some(slot);
        Ok(slot)
    }

    fn class_lookup(&self, name: &str) -> Capture {
        match self.instance_variables.iter().position(|v| v == name) {
            Some(index) => Capture::Instance(index as u8),
            None => Capture::Global,
        }
    }

    /// Lookup on behalf of a nested block. A hit in `scope` is promoted, a
    /// hit further out is chained through `scope`.
    fn capture(&mut self, scope: ScopeId, name: &str) -> Result<Capture, CompileError> {
        if let Some(index) = self.find_own(scope, name) {
            let argument = self.scope(scope).variables[index].kind == VariableKind::Argument;
            let slot = self.promote(scope, index)?;
            return Ok(Capture::Slot { slot, argument });
        }
        let Some(parent) = self.scope(scope).parent else {
            return Ok(self.class_lookup(name));
        };
        match self.capture(parent, name)? {
            Capture::Slot {
                slot: parent_slot,
                argument,
            } => {
                let slot = match self.scope(scope).chained_slot(parent_slot) {
                    Some(slot) => slot,
                    None => push_heap_var(
                        &mut self.scope_mut(scope).heap_vars,
                        HeapVarOrigin::Chained { parent_slot },
                    )?,
                };
                Ok(Capture::Slot { slot, argument })
            }
            other => Ok(other),
        }
    }

    fn lookup(&mut self, scope: ScopeId, name: &str) -> Result<(Binding, bool), CompileError> {
        if RESERVED_NAMES.contains(&name) {
            return Err(CompileError::new(format!("`{name}` is not a variable")));
        }
        if let Some(index) = self.find_own(scope, name) {
            let variable = &self.scope(scope).variables[index];
            return Ok((variable.binding(), variable.kind == VariableKind::Argument));
        }
        let capture = match self.scope(scope).parent {
            Some(parent) => self.capture(parent, name)?,
            None => self.class_lookup(name),
        };
        Ok(match capture {
            // a scope that chains the slot for a nested block must use its
            // own copy, or the two would diverge
            Capture::Slot { slot, argument } => match self.scope(scope).chained_slot(slot) {
                Some(mine) => (Binding::MyHeapVar(mine), argument),
                None => (Binding::ParentHeapVar(slot), argument),
            },
            Capture::Instance(index) => (Binding::Instance(index), false),
            Capture::Global => (Binding::Global, false),
        })
    }

    /// Binding of `name` read from code in `scope`.
    pub fn resolve(&mut self, scope: ScopeId, name: &str) -> Result<Binding, CompileError> {
        self.lookup(scope, name).map(|(binding, _)| binding)
    }

    /// Binding of `name` assigned from code in `scope`.
    pub fn resolve_assignment(&mut self, scope: ScopeId, name: &str) -> Result<Binding, CompileError> {
        match self.lookup(scope, name)? {
            (_, true) => Err(CompileError::new(format!("cannot assign to argument `{name}`"))),
            (binding, false) => Ok(binding),
        }
    }
}

fn push_heap_var(heap_vars: &mut Vec<HeapVarOrigin>, origin: HeapVarOrigin) -> Result<u8, CompileError> {
    if heap_vars.len() >= MAX_HEAP_VARS {
        return Err(CompileError::new("too many captured variables"));
    }
    heap_vars.push(origin);
    Ok((heap_vars.len() - 1) as u8)
}

/// Annotates `method` in place and returns its scopes.
pub fn resolve_method(method: &mut MethodNode, instance_variables: &[String]) -> Result<ScopeTree, CompileError> {
    let mut tree = ScopeTree::new(instance_variables.to_vec());
    let scope = tree.push_scope(ScopeKind::Method, None);
    let params: Vec<&str> = method.params.iter().map(String::as_str).collect();
    let temps: Vec<&str> = method.temps.iter().map(String::as_str).collect();
    tree.declare_all(scope, &params, VariableKind::Argument)?;
    tree.declare_all(scope, &temps, VariableKind::Local)?;
    method.scope = Some(scope);

    for bind in [false, true] {
        let mut pass = Resolver {
            tree: &mut tree,
            bind,
        };
        pass.statements(scope, &mut method.body)?;
    }
    Ok(tree)
}

struct Resolver<'t> {
    tree: &'t mut ScopeTree,
    bind: bool,
}

impl Resolver<'_> {
    fn statements(&mut self, scope: ScopeId, body: &mut [Expr]) -> Result<(), CompileError> {
        for expr in body {
            self.expr(scope, expr)?;
        }
        Ok(())
    }

    fn expr(&mut self, scope: ScopeId, expr: &mut Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Literal(_) | Expr::Pseudo(_) => Ok(()),
            Expr::Variable(ident) => {
                let binding = self.tree.resolve(scope, &ident.name)?;
                if self.bind {
                    ident.binding = Some(binding);
                }
                Ok(())
            }
            Expr::Assign(ident, value) => {
                self.expr(scope, value)?;
                let binding = self.tree.resolve_assignment(scope, &ident.name)?;
                if self.bind {
                    ident.binding = Some(binding);
                }
                Ok(())
            }
            Expr::Send {
                receiver,
                selector,
                args,
            } => match InlineForm::recognize(receiver, selector, args) {
                Some(_) => {
                    match receiver.as_mut() {
                        Expr::Block(node) => self.inlined(scope, node)?,
                        other => self.expr(scope, other)?,
                    }
                    for arg in args {
                        if let Expr::Block(node) = arg {
                            self.inlined(scope, node)?;
                        }
                    }
                    Ok(())
                }
                None => {
                    self.expr(scope, receiver)?;
                    self.statements(scope, args)
                }
            },
            Expr::SuperSend { args, .. } | Expr::Primitive { args, .. } => self.statements(scope, args),
            Expr::Block(node) => self.block(scope, node),
            Expr::Return(value) => self.expr(scope, value),
        }
    }

    fn block(&mut self, parent: ScopeId, node: &mut BlockNode) -> Result<(), CompileError> {
        let scope = match node.scope {
            Some(scope) => scope,
            None => {
                let scope = self.tree.push_scope(ScopeKind::Block, Some(parent));
                let params: Vec<&str> = node.params.iter().map(String::as_str).collect();
                let temps: Vec<&str> = node.temps.iter().map(|t| t.name.as_str()).collect();
                self.tree.declare_all(scope, &params, VariableKind::Argument)?;
                self.tree.declare_all(scope, &temps, VariableKind::Local)?;
                node.scope = Some(scope);
                scope
            }
        };
        self.statements(scope, &mut node.body)?;
        if self.bind {
            let first = node.params.len();
            for (i, temp) in node.temps.iter_mut().enumerate() {
                temp.binding = Some(self.tree.scope(scope).variables[first + i].binding());
            }
        }
        Ok(())
    }

    /// Inlined blocks share the enclosing scope; their temporaries are
    /// hoisted into it and visible only inside the block.
    fn inlined(&mut self, scope: ScopeId, node: &mut BlockNode) -> Result<(), CompileError> {
        let count = node.temps.len();
        let first = match node.inlined_temps {
            Some(first) => {
                self.tree.set_visible(scope, first, count, true);
                first
            }
            None => {
                let temps: Vec<&str> = node.temps.iter().map(|t| t.name.as_str()).collect();
                let first = self.tree.declare_all(scope, &temps, VariableKind::Local)?;
                node.inlined_temps = Some(first);
                first
            }
        };
        self.statements(scope, &mut node.body)?;
        self.tree.set_visible(scope, first, count, false);
        if self.bind {
            for (i, temp) in node.temps.iter_mut().enumerate() {
                temp.binding = Some(self.tree.scope(scope).variables[first + i].binding());
            }
        }
        Ok(())
    }
}
