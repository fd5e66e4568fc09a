//! Source location tracking.

use std::fmt;

/// A half-open byte range into the original source text.
///
/// Synthesized nodes (overloads materialized for default parameters,
/// desugared shorthand properties, ...) carry `Span::NONE`; consumers must
/// check `is_none()` before rendering source context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    /// The explicit "no source location" value for synthesized nodes.
    pub const NONE: Span = Span {
        start: u32::MAX,
        end: u32::MAX,
    };

    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Whether this span refers to real source text.
    pub fn is_none(&self) -> bool {
        *self == Span::NONE
    }
}

impl Default for Span {
    fn default() -> Self {
        Span::NONE
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "<synthesized>")
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_span() {
        assert!(Span::NONE.is_none());
        assert!(!Span::new(0, 4).is_none());
        assert_eq!(Span::default(), Span::NONE);
    }

    #[test]
    fn test_span_display() {
        assert_eq!(format!("{}", Span::new(3, 9)), "3..9");
        assert_eq!(format!("{}", Span::NONE), "<synthesized>");
    }
}
