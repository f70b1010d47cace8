//! The resolved syntax tree handed over by a front end.
//!
//! There is no parser in this crate. Trees are built directly, usually with
//! the constructor functions at the bottom of this module, and annotated in
//! place by the scope resolver before the emitter walks them.
use crate::{Binding, ScopeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Integer(i64),
    String(String),
    Symbol(String),
    Array(Vec<Literal>),
}

/// Reserved identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pseudo {
    SelfRef,
    Nil,
    True,
    False,
    ThisContext,
    Smalltalk,
}

pub const RESERVED_NAMES: &[&str] = &[
    "self",
    "super",
    "nil",
    "true",
    "false",
    "thisContext",
    "Smalltalk",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub binding: Option<Binding>,
}

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binding: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNode {
    pub params: Vec<String>,
    pub temps: Vec<Ident>,
    pub body: Vec<Expr>,
    /// Set by the resolver for blocks compiled as their own code.
    pub scope: Option<ScopeId>,
    /// Set by the resolver for inlined blocks: index of the first of
    /// `temps` among the enclosing scope's variables.
    pub inlined_temps: Option<usize>,
}

impl BlockNode {
    pub fn is_plain(&self) -> bool {
        self.params.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Literal),
    Pseudo(Pseudo),
    Variable(Ident),
    Assign(Ident, Box<Expr>),
    Send {
        receiver: Box<Expr>,
        selector: String,
        args: Vec<Expr>,
    },
    /// A send to `super`.
    SuperSend { selector: String, args: Vec<Expr> },
    Block(BlockNode),
    Return(Box<Expr>),
    /// A direct call into the primitive table.
    Primitive { name: String, args: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodNode {
    pub selector: String,
    pub params: Vec<String>,
    pub temps: Vec<String>,
    pub body: Vec<Expr>,
    pub scope: Option<ScopeId>,
}

impl MethodNode {
    pub fn ends_with_return(&self) -> bool {
        matches!(self.body.last(), Some(Expr::Return(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDefinition {
    pub name: String,
    pub superclass: String,
    pub instance_variables: Vec<String>,
    pub methods: Vec<MethodNode>,
    pub class_methods: Vec<MethodNode>,
}

/// Control selectors compiled to branches when their block arguments are
/// literal blocks without parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineForm {
    And,
    IfTrue,
    IfFalse,
    IfTrueIfFalse,
    IfFalseIfTrue,
    WhileTrue,
    WhileFalse,
    WhileTrueDo,
    WhileFalseDo,
}

fn is_plain_block(expr: &Expr) -> bool {
    matches!(expr, Expr::Block(block) if block.is_plain())
}

impl InlineForm {
    pub fn recognize(receiver: &Expr, selector: &str, args: &[Expr]) -> Option<Self> {
        let form = match selector {
            "and:" => InlineForm::And,
            "ifTrue:" => InlineForm::IfTrue,
            "ifFalse:" => InlineForm::IfFalse,
            "ifTrue:ifFalse:" => InlineForm::IfTrueIfFalse,
            "ifFalse:ifTrue:" => InlineForm::IfFalseIfTrue,
            "whileTrue" => InlineForm::WhileTrue,
            "whileFalse" => InlineForm::WhileFalse,
            "whileTrue:" => InlineForm::WhileTrueDo,
            "whileFalse:" => InlineForm::WhileFalseDo,
            _ => return None,
        };
        let loops = matches!(
            form,
            InlineForm::WhileTrue
                | InlineForm::WhileFalse
                | InlineForm::WhileTrueDo
                | InlineForm::WhileFalseDo
        );
        if loops && !is_plain_block(receiver) {
            return None;
        }
        if !args.iter().all(is_plain_block) {
            return None;
        }
        Some(form)
    }
}

// Constructors for building trees by hand.

pub fn int(value: i64) -> Expr {
    Expr::Literal(Literal::Integer(value))
}

pub fn string(value: &str) -> Expr {
    Expr::Literal(Literal::String(value.into()))
}

pub fn symbol(value: &str) -> Expr {
    Expr::Literal(Literal::Symbol(value.into()))
}

pub fn self_ref() -> Expr {
    Expr::Pseudo(Pseudo::SelfRef)
}

pub fn nil() -> Expr {
    Expr::Pseudo(Pseudo::Nil)
}

pub fn true_() -> Expr {
    Expr::Pseudo(Pseudo::True)
}

pub fn false_() -> Expr {
    Expr::Pseudo(Pseudo::False)
}

pub fn this_context() -> Expr {
    Expr::Pseudo(Pseudo::ThisContext)
}

pub fn smalltalk() -> Expr {
    Expr::Pseudo(Pseudo::Smalltalk)
}

pub fn var(name: &str) -> Expr {
    Expr::Variable(Ident::new(name))
}

pub fn assign(name: &str, value: Expr) -> Expr {
    Expr::Assign(Ident::new(name), Box::new(value))
}

pub fn send(receiver: Expr, selector: &str, args: Vec<Expr>) -> Expr {
    Expr::Send {
        receiver: Box::new(receiver),
        selector: selector.into(),
        args,
    }
}

pub fn unary(receiver: Expr, selector: &str) -> Expr {
    send(receiver, selector, Vec::new())
}

pub fn binary(receiver: Expr, selector: &str, arg: Expr) -> Expr {
    send(receiver, selector, vec![arg])
}

pub fn super_send(selector: &str, args: Vec<Expr>) -> Expr {
    Expr::SuperSend {
        selector: selector.into(),
        args,
    }
}

pub fn block(params: &[&str], temps: &[&str], body: Vec<Expr>) -> Expr {
    Expr::Block(BlockNode {
        params: params.iter().map(|p| p.to_string()).collect(),
        temps: temps.iter().map(|t| Ident::new(*t)).collect(),
        body,
        scope: None,
        inlined_temps: None,
    })
}

/// A parameterless block without temporaries.
pub fn thunk(body: Vec<Expr>) -> Expr {
    block(&[], &[], body)
}

pub fn ret(value: Expr) -> Expr {
    Expr::Return(Box::new(value))
}

pub fn primitive(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Primitive {
        name: name.into(),
        args,
    }
}

pub fn method(selector: &str, params: &[&str], temps: &[&str], body: Vec<Expr>) -> MethodNode {
    MethodNode {
        selector: selector.into(),
        params: params.iter().map(|p| p.to_string()).collect(),
        temps: temps.iter().map(|t| t.to_string()).collect(),
        body,
        scope: None,
    }
}
