//! Checked program tree.
//!
//! This is the hand-over format between the front end (parser, scope
//! resolution, type checking, global ordering) and the evaluator. Every
//! declaration already carries its resolved types and the global
//! declarations are listed in an order that is safe to execute top to bottom.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════
// Program
// ═══════════════════════════════════════════════════════════════════════════

/// A whole checked program.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Program {
    pub package: String,
    /// Imported package names, e.g. `fmt`, `sync`.
    pub imports: Vec<String>,
    pub decls: Vec<Decl>,
}

impl Program {
    pub fn main(&self) -> Option<&FuncDecl> {
        self.decls.iter().find_map(|decl| match decl {
            Decl::Func(f) if f.receiver.is_none() && f.name == "main" => Some(f),
            _ => None,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Declarations
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "tag", rename_all = "snake_case"))]
pub enum Decl {
    Var(VarDecl),
    Struct(StructDecl),
    Func(FuncDecl),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VarDecl {
    pub name: String,
    pub ty: Type,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<Param>,
}

/// A named function, or a method when `receiver` is set.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FuncDecl {
    pub receiver: Option<Param>,
    pub name: String,
    pub params: Vec<Param>,
    pub result: Option<Type>,
    pub body: Vec<Stmt>,
}

/// A name with its type: parameters, receivers and struct fields.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

// ═══════════════════════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", content = "of", rename_all = "snake_case"))]
pub enum Type {
    Nil,
    Bool,
    Int32,
    Float32,
    Rune,
    String,
    Array(Box<Type>, u32),
    Slice(Box<Type>),
    Chan(Box<Type>),
    Func,
    /// A declared struct, by name.
    Struct(String),
    Pointer(Box<Type>),
    /// `sync.Mutex`
    Mutex,
    /// `sync.WaitGroup`
    WaitGroup,
}

impl Type {
    pub fn array(elem: Type, len: u32) -> Self {
        Type::Array(Box::new(elem), len)
    }

    pub fn slice(elem: Type) -> Self {
        Type::Slice(Box::new(elem))
    }

    pub fn chan(elem: Type) -> Self {
        Type::Chan(Box::new(elem))
    }

    pub fn pointer(elem: Type) -> Self {
        Type::Pointer(Box::new(elem))
    }

    pub fn named(name: &str) -> Self {
        Type::Struct(name.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Statements
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "tag", rename_all = "snake_case"))]
pub enum Stmt {
    /// `var name T = value` and `name := value`.
    Var { name: String, ty: Type, value: Option<Expr> },
    Assign { target: Expr, value: Expr },
    /// `target++` / `target--`.
    IncDec { target: Expr, op: PostfixOp },
    Expr { expr: Expr },
    Block { body: Vec<Stmt> },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        /// Either a `Block` or a nested `If`.
        otherwise: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Box<Stmt>>,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return { value: Option<Expr> },
    Go { callee: Expr, args: Vec<Expr> },
    Send { channel: Expr, value: Expr },
    Select { cases: Vec<SelectCase> },
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "tag", rename_all = "snake_case"))]
pub enum SelectCase {
    Send { channel: Expr, value: Expr, body: Vec<Stmt> },
    Receive { channel: Expr, bind: RecvBind, body: Vec<Stmt> },
    Default { body: Vec<Stmt> },
}

/// What a receive case does with the received value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "tag", rename_all = "snake_case"))]
pub enum RecvBind {
    /// `case <-ch:`
    Discard,
    /// `case v := <-ch:`
    Define { name: String, ty: Type },
    /// `case v = <-ch:`
    Assign { target: Expr },
}

// ═══════════════════════════════════════════════════════════════════════════
// Expressions
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "tag", rename_all = "snake_case"))]
pub enum Expr {
    Literal { value: Literal },
    /// A variable, function or qualified builtin such as `fmt.Println`.
    Name { name: String },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Func { lit: Box<FuncLit> },
    /// Struct field selection.
    Member { object: Box<Expr>, name: String },
    /// Method value `object.name`, resolved by the checker.
    Method { object: Box<Expr>, name: String },
    Index { object: Box<Expr>, index: Box<Expr> },
    Slice {
        object: Box<Expr>,
        low: Option<Box<Expr>>,
        high: Option<Box<Expr>>,
    },
    Make { ty: Type, args: Vec<Expr> },
    /// Array or slice literal `T{a, b, c}`.
    Composite { ty: Type, elems: Vec<Expr> },
    /// Struct literal `S{x: 1}`; omitted fields take their zero value.
    StructLit { name: String, fields: Vec<(String, Expr)> },
    AddressOf { operand: Box<Expr> },
    Deref { operand: Box<Expr> },
    Receive { channel: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FuncLit {
    pub params: Vec<Param>,
    pub result: Option<Type>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", content = "value", rename_all = "snake_case"))]
pub enum Literal {
    Nil,
    Bool(bool),
    Int32(i32),
    Float32(f32),
    Rune(char),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum UnaryOp {
    Neg,
    Not,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// `&&` and `||` evaluate their right operand conditionally.
    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PostfixOp {
    Inc,
    Dec,
}
