//! Statement AST nodes.

use crate::expr::Expr;
use crate::span::Span;
use crate::types::TypeAnn;
use crate::Ident;

/// Statement (performs an action)
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Block: `{ ... }`
    Block(BlockStmt),
    /// Expression statement
    Expr(ExprStmt),
    /// Variable declaration: `let x: int = 1`, `const s = "a"`
    Var(VarDecl),
    /// If statement with optional else branch
    If(IfStmt),
    /// While loop
    While(WhileStmt),
    /// Do-while loop
    DoWhile(DoWhileStmt),
    /// Classic for loop
    For(ForStmt),
    /// For-in loop: `for (k in obj) { ... }`
    ForIn(ForInStmt),
    /// Switch statement
    Switch(SwitchStmt),
    /// Try/catch/finally
    Try(TryStmt),
    /// Throw statement
    Throw(ThrowStmt),
    /// Return statement with optional value
    Return(ReturnStmt),
    /// Break, optionally labeled
    Break(BreakStmt),
    /// Continue, optionally labeled
    Continue(ContinueStmt),
    /// Labeled statement: `outer: while (...) { ... }`
    Labeled(LabeledStmt),
    /// Empty statement: `;`
    Empty(Span),
}

/// Block statement
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStmt {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl BlockStmt {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self {
            stmts,
            span: Span::NONE,
        }
    }
}

/// Expression statement
#[derive(Debug, Clone, PartialEq)]
pub struct ExprStmt {
    pub expr: Expr,
    pub span: Span,
}

/// `let` vs `const`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Let,
    Const,
}

/// Variable declaration. One declarator per statement in the compiled
/// subset; multi-declarator statements are expanded by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub kind: VarKind,
    pub name: Ident,
    pub type_ann: Option<TypeAnn>,
    pub init: Option<Expr>,
    pub span: Span,
}

impl VarDecl {
    pub fn new(kind: VarKind, name: impl Into<String>, init: Option<Expr>) -> Self {
        Self {
            kind,
            name: Ident::new(name),
            type_ann: None,
            init,
            span: Span::NONE,
        }
    }

    pub fn with_type(mut self, type_ann: TypeAnn) -> Self {
        self.type_ann = Some(type_ann);
        self
    }
}

/// If statement
#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub test: Expr,
    pub cons: Box<Stmt>,
    pub alt: Option<Box<Stmt>>,
    pub span: Span,
}

/// While loop
#[derive(Debug, Clone, PartialEq)]
pub struct WhileStmt {
    pub test: Expr,
    pub body: Box<Stmt>,
    pub span: Span,
}

/// Do-while loop
#[derive(Debug, Clone, PartialEq)]
pub struct DoWhileStmt {
    pub body: Box<Stmt>,
    pub test: Expr,
    pub span: Span,
}

/// Classic for loop. The init slot takes a declaration or expression
/// statement; test and update are optional as in the source language.
#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub init: Option<Box<Stmt>>,
    pub test: Option<Expr>,
    pub update: Option<Expr>,
    pub body: Box<Stmt>,
    pub span: Span,
}

/// Head of a for-in loop: either a fresh binding or a pre-existing
/// variable. With a pre-existing variable no new binding is introduced and
/// the last-assigned value persists after loop exit.
#[derive(Debug, Clone, PartialEq)]
pub enum ForInHead {
    /// `for (let k in obj)` / `for (const k in obj)`
    Decl { kind: VarKind, name: Ident },
    /// `for (k in obj)` where `k` is already in scope
    Ident(Ident),
}

impl ForInHead {
    pub fn name(&self) -> &str {
        match self {
            ForInHead::Decl { name, .. } => &name.name,
            ForInHead::Ident(name) => &name.name,
        }
    }
}

/// For-in loop
#[derive(Debug, Clone, PartialEq)]
pub struct ForInStmt {
    pub head: ForInHead,
    pub object: Expr,
    pub body: Box<Stmt>,
    pub span: Span,
}

/// Switch statement
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchStmt {
    pub disc: Expr,
    pub cases: Vec<SwitchCase>,
    pub span: Span,
}

/// One switch case; `test` is `None` for the default case. Bodies fall
/// through to the next case unless terminated by break/return/throw.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Try/catch/finally. At least one of catch and finally is present.
#[derive(Debug, Clone, PartialEq)]
pub struct TryStmt {
    pub block: BlockStmt,
    pub catch: Option<CatchClause>,
    pub finally: Option<BlockStmt>,
    pub span: Span,
}

/// Catch clause; the parameter may be elided (`catch { ... }`).
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub param: Option<Ident>,
    pub body: BlockStmt,
    pub span: Span,
}

/// Throw statement
#[derive(Debug, Clone, PartialEq)]
pub struct ThrowStmt {
    pub arg: Expr,
    pub span: Span,
}

/// Return statement
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: Span,
}

impl ReturnStmt {
    pub fn new(value: Option<Expr>) -> Self {
        Self {
            value,
            span: Span::NONE,
        }
    }
}

/// Break statement
#[derive(Debug, Clone, PartialEq)]
pub struct BreakStmt {
    pub label: Option<Ident>,
    pub span: Span,
}

/// Continue statement
#[derive(Debug, Clone, PartialEq)]
pub struct ContinueStmt {
    pub label: Option<Ident>,
    pub span: Span,
}

/// Labeled statement
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledStmt {
    pub label: Ident,
    pub body: Box<Stmt>,
    pub span: Span,
}

impl Stmt {
    /// Convenience constructor for a return statement.
    pub fn ret(value: Expr) -> Stmt {
        Stmt::Return(ReturnStmt::new(Some(value)))
    }

    /// Convenience constructor for a bare `return;`.
    pub fn ret_void() -> Stmt {
        Stmt::Return(ReturnStmt::new(None))
    }

    /// Convenience constructor for an expression statement.
    pub fn expr(expr: Expr) -> Stmt {
        Stmt::Expr(ExprStmt {
            expr,
            span: Span::NONE,
        })
    }
}
