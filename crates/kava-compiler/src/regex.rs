//! Regex literal translation.
//!
//! Source regex literals (`/body/flags`) become `Pattern.compile(body,
//! flags)` calls in the emitted bytecode. JS flag letters map onto
//! `java.util.regex.Pattern` bit constants; the `g` flag carries no
//! compile-time meaning on the target and maps to no bits.

use bitflags::bitflags;
use kava_ast::RegexLit;

use crate::error::{CompileError, CompileResult};

bitflags! {
    /// `java.util.regex.Pattern` compile flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PatternFlags: i32 {
        const CASE_INSENSITIVE = 0x02;
        const MULTILINE = 0x08;
        const DOTALL = 0x20;
        const UNICODE_CASE = 0x40;
        const UNICODE_CHARACTER_CLASS = 0x100;
    }
}

/// A regex literal ready for emission.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedRegex {
    pub body: String,
    pub flags: PatternFlags,
}

/// Translate a source regex literal. Fails on flags with no target
/// equivalent.
pub fn translate(lit: &RegexLit) -> CompileResult<TranslatedRegex> {
    let mut flags = PatternFlags::empty();
    let unicode = lit.flags.contains('u');
    for flag in lit.flags.chars() {
        match flag {
            'g' => {}
            'i' => {
                flags |= PatternFlags::CASE_INSENSITIVE;
                if unicode {
                    flags |= PatternFlags::UNICODE_CASE;
                }
            }
            'm' => flags |= PatternFlags::MULTILINE,
            's' => flags |= PatternFlags::DOTALL,
            'u' => {
                flags |= PatternFlags::UNICODE_CHARACTER_CLASS | PatternFlags::UNICODE_CASE;
            }
            'y' => {
                return Err(CompileError::regex_flag("Sticky flag 'y' is not supported"));
            }
            'd' => {
                return Err(CompileError::regex_flag(
                    "Indices flag 'd' is not supported",
                ));
            }
            other => {
                return Err(CompileError::regex_flag(format!(
                    "Unknown regex flag: {other}"
                )));
            }
        }
    }
    Ok(TranslatedRegex {
        body: rewrite_body(&lit.body),
        flags,
    })
}

/// Rewrite escape sequences the target engine spells differently.
/// Currently only `\v` (vertical tab), which the target has no shorthand
/// for.
fn rewrite_body(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('v') => {
                    chars.next();
                    out.push_str("\\x0B");
                }
                Some(&next) => {
                    chars.next();
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(body: &str, flags: &str) -> RegexLit {
        RegexLit::new(body, flags)
    }

    #[test]
    fn test_no_flags() {
        let t = translate(&lit("ab+c", "")).unwrap();
        assert_eq!(t.body, "ab+c");
        assert_eq!(t.flags, PatternFlags::empty());
    }

    #[test]
    fn test_gim_flags() {
        let t = translate(&lit("x", "gim")).unwrap();
        assert_eq!(
            t.flags,
            PatternFlags::CASE_INSENSITIVE | PatternFlags::MULTILINE
        );
    }

    #[test]
    fn test_dotall() {
        let t = translate(&lit("a.b", "s")).unwrap();
        assert_eq!(t.flags, PatternFlags::DOTALL);
        assert_eq!(t.flags.bits(), 0x20);
    }

    #[test]
    fn test_unicode_implies_unicode_case() {
        let t = translate(&lit("\\w+", "u")).unwrap();
        assert_eq!(
            t.flags,
            PatternFlags::UNICODE_CHARACTER_CLASS | PatternFlags::UNICODE_CASE
        );
        assert_eq!(t.flags.bits(), 0x140);
    }

    #[test]
    fn test_i_with_u_adds_unicode_case() {
        let t = translate(&lit("x", "iu")).unwrap();
        assert!(t.flags.contains(PatternFlags::CASE_INSENSITIVE));
        assert!(t.flags.contains(PatternFlags::UNICODE_CASE));
        // Flag order must not matter.
        let t2 = translate(&lit("x", "ui")).unwrap();
        assert_eq!(t.flags, t2.flags);
    }

    #[test]
    fn test_sticky_rejected() {
        let err = translate(&lit("x", "y")).unwrap_err();
        assert_eq!(err.to_string(), "Sticky flag 'y' is not supported");
    }

    #[test]
    fn test_indices_rejected() {
        let err = translate(&lit("x", "d")).unwrap_err();
        assert_eq!(err.to_string(), "Indices flag 'd' is not supported");
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let err = translate(&lit("x", "q")).unwrap_err();
        assert_eq!(err.to_string(), "Unknown regex flag: q");
    }

    #[test]
    fn test_vertical_tab_rewrite() {
        let t = translate(&lit("a\\vb", "")).unwrap();
        assert_eq!(t.body, "a\\x0Bb");
        // Other escapes pass through untouched.
        let t = translate(&lit("\\d+\\v\\w", "")).unwrap();
        assert_eq!(t.body, "\\d+\\x0B\\w");
    }
}
