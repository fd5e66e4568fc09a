//! Compilation errors

use kava_ast::Span;
use thiserror::Error;

pub type CompileResult<T> = Result<T, CompileError>;

/// Fatal compilation error. The first violation aborts the whole unit;
/// no partial class bytes are ever produced.
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct CompileError {
    cause: CompileErrorKind,
    span: Span,
}

impl CompileError {
    pub fn new(cause: CompileErrorKind) -> Self {
        Self {
            cause,
            span: Span::NONE,
        }
    }

    pub fn with_span(cause: CompileErrorKind, span: Span) -> Self {
        Self { cause, span }
    }

    /// Attach a span when the error does not already carry one.
    pub fn at(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = span;
        }
        self
    }

    /// The underlying diagnostic.
    pub fn cause(&self) -> &CompileErrorKind {
        &self.cause
    }

    /// Source range the diagnostic points at, if the node carried one.
    pub fn span(&self) -> Span {
        self.span
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Unsupported {
            message: message.into(),
        })
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Type {
            message: message.into(),
        })
    }

    pub fn overload(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Overload {
            message: message.into(),
        })
    }

    pub fn const_eval(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::ConstEval {
            message: message.into(),
        })
    }

    pub fn regex_flag(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::RegexFlag {
            message: message.into(),
        })
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Internal {
            message: message.into(),
        })
    }
}

impl From<CompileErrorKind> for CompileError {
    fn from(cause: CompileErrorKind) -> Self {
        Self::new(cause)
    }
}

#[derive(Debug, Error)]
pub enum CompileErrorKind {
    /// Syntactically valid construct outside the compiled subset.
    #[error("{message}")]
    Unsupported { message: String },

    /// Type mismatch, failed inference, or record constraint violation.
    #[error("{message}")]
    Type { message: String },

    /// No overload matched, or the best score was tied.
    #[error("{message}")]
    Overload { message: String },

    /// Invalid constant expression in an enum initializer.
    #[error("{message}")]
    ConstEval { message: String },

    /// Unsupported or unknown regex flag.
    #[error("{message}")]
    RegexFlag { message: String },

    /// Invariant breakage inside the compiler itself.
    #[error("Internal compiler error: {message}")]
    Internal { message: String },
}
