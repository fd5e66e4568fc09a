//! Top-level declaration AST nodes.

use crate::expr::Expr;
use crate::span::Span;
use crate::stmt::BlockStmt;
use crate::types::TypeAnn;
use crate::Ident;

/// Top-level declaration
#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Class(ClassDecl),
    Function(FunctionDecl),
    Enum(EnumDecl),
    Namespace(NamespaceDecl),
}

impl Decl {
    pub fn name(&self) -> &str {
        match self {
            Decl::Class(c) => &c.name.name,
            Decl::Function(f) => &f.name.name,
            Decl::Enum(e) => &e.name.name,
            Decl::Namespace(n) => &n.name.name,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::Class(c) => c.span,
            Decl::Function(f) => f.span,
            Decl::Enum(e) => e.span,
            Decl::Namespace(n) => n.span,
        }
    }
}

/// Class declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: Ident,
    pub fields: Vec<FieldDecl>,
    pub ctors: Vec<Constructor>,
    pub methods: Vec<MethodDecl>,
    pub span: Span,
}

impl ClassDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Ident::new(name),
            fields: Vec::new(),
            ctors: Vec::new(),
            methods: Vec::new(),
            span: Span::NONE,
        }
    }
}

/// Field declaration inside a class body
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: Ident,
    pub is_static: bool,
    pub type_ann: Option<TypeAnn>,
    pub init: Option<Expr>,
    pub span: Span,
}

/// Constructor declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Constructor {
    pub params: Vec<Param>,
    pub body: BlockStmt,
    pub span: Span,
}

/// Method declaration
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: Ident,
    pub is_static: bool,
    pub function: Function,
    pub span: Span,
}

/// Free function declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: Ident,
    pub function: Function,
    pub span: Span,
}

/// Function signature and body shared by free functions and methods.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub params: Vec<Param>,
    pub return_ann: Option<TypeAnn>,
    pub body: BlockStmt,
    pub span: Span,
}

impl Function {
    pub fn new(params: Vec<Param>, return_ann: Option<TypeAnn>, body: BlockStmt) -> Self {
        Self {
            params,
            return_ann,
            body,
            span: Span::NONE,
        }
    }
}

/// Function or constructor parameter. A defaulted parameter produces an
/// extra bridge overload; a rest parameter is only legal in last position.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub type_ann: Option<TypeAnn>,
    pub default: Option<Expr>,
    pub rest: bool,
    pub span: Span,
}

impl Param {
    pub fn new(name: impl Into<String>, type_ann: TypeAnn) -> Self {
        Self {
            name: Ident::new(name),
            type_ann: Some(type_ann),
            default: None,
            rest: false,
            span: Span::NONE,
        }
    }

    pub fn with_default(mut self, default: Expr) -> Self {
        self.default = Some(default);
        self
    }
}

/// Enum declaration
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: Ident,
    pub members: Vec<EnumMemberDecl>,
    pub span: Span,
}

/// One enum member; an omitted initializer auto-increments from the
/// previous member.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMemberDecl {
    pub name: Ident,
    pub init: Option<Expr>,
    pub span: Span,
}

/// Namespace declaration grouping nested declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceDecl {
    pub name: Ident,
    pub decls: Vec<Decl>,
    pub span: Span,
}
