//! Abstract Syntax Tree (AST) node model for the Kava compiler.
//!
//! The compiler consumes an already-parsed, typed tree; this crate defines
//! the node shapes, independent of any parser:
//! - Module and declaration structure (classes, functions, enums, namespaces)
//! - Statements (control flow, variable declarations)
//! - Expressions (literals, operators, calls, member access)
//! - Type annotations
//!
//! Node kinds are closed enums dispatched through exhaustive pattern
//! matching. Every node carries a `Span`; synthesized nodes use `Span::NONE`.

pub mod decl;
pub mod expr;
pub mod span;
pub mod stmt;
pub mod types;

pub use decl::*;
pub use expr::*;
pub use span::Span;
pub use stmt::*;
pub use types::*;

/// Root node: one compilation unit (a single source text, possibly
/// declaring several classes and namespaces).
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Top-level declarations
    pub decls: Vec<Decl>,
    /// Span covering the entire unit
    pub span: Span,
}

impl Module {
    /// Create a new module
    pub fn new(decls: Vec<Decl>) -> Self {
        Self {
            decls,
            span: Span::NONE,
        }
    }

    /// Check if the module declares nothing
    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

/// Identifier: a name for a variable, function, class, etc.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            span: Span::NONE,
        }
    }
}
