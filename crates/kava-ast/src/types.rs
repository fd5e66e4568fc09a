//! Type annotation AST nodes.
//!
//! Annotations are syntactic only; mapping to JVM descriptors happens in
//! the compiler crate.

use crate::span::Span;

/// Source-level type annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeAnn {
    /// Named type, possibly generic: `int`, `string`, `Record<string, int>`,
    /// `Array<double>`.
    Named {
        name: String,
        args: Vec<TypeAnn>,
        span: Span,
    },
    /// Array shorthand: `int[]`
    Array { elem: Box<TypeAnn>, span: Span },
    /// `void`
    Void(Span),
}

impl TypeAnn {
    /// Named type with no type arguments.
    pub fn named(name: impl Into<String>) -> TypeAnn {
        TypeAnn::Named {
            name: name.into(),
            args: Vec::new(),
            span: Span::NONE,
        }
    }

    /// Named type with type arguments.
    pub fn generic(name: impl Into<String>, args: Vec<TypeAnn>) -> TypeAnn {
        TypeAnn::Named {
            name: name.into(),
            args,
            span: Span::NONE,
        }
    }

    /// Array shorthand over an element annotation.
    pub fn array(elem: TypeAnn) -> TypeAnn {
        TypeAnn::Array {
            elem: Box::new(elem),
            span: Span::NONE,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            TypeAnn::Named { span, .. } => *span,
            TypeAnn::Array { span, .. } => *span,
            TypeAnn::Void(span) => *span,
        }
    }
}
