//! Constant expression evaluation for enum initializers.
//!
//! Enum member values must be known at compile time so the emitter can
//! bake them into `<clinit>`. The evaluator accepts integer and string
//! literals, integer arithmetic and bitwise operators, parentheses, and
//! references to members declared earlier in the same enum. Arithmetic
//! wraps in 32 bits like the target platform.

use kava_ast::{BinaryOp, EnumDecl, Expr, UnaryOp};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{CompileError, CompileResult};

/// Resolved value of one enum member.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumValue {
    Int(i32),
    Str(String),
}

impl EnumValue {
    pub fn display(&self) -> String {
        match self {
            EnumValue::Int(i) => i.to_string(),
            EnumValue::Str(s) => s.clone(),
        }
    }
}

/// One fully resolved enum member, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumMember {
    pub name: String,
    pub ordinal: u16,
    pub value: EnumValue,
}

/// Resolve all members of an enum declaration. Members without an
/// initializer continue the numeric sequence from the previous member
/// (the first defaults to 0). A declaration must be homogeneous: all
/// numeric or all string.
pub fn resolve_enum_members(decl: &EnumDecl) -> CompileResult<Vec<EnumMember>> {
    if decl.members.is_empty() {
        return Err(CompileError::const_eval("Empty enums are not supported"));
    }

    let all_names: FxHashSet<&str> = decl
        .members
        .iter()
        .map(|m| m.name.name.as_str())
        .collect();

    let mut resolved: FxHashMap<String, EnumValue> = FxHashMap::default();
    let mut members = Vec::with_capacity(decl.members.len());
    let mut has_int = false;
    let mut has_str = false;

    for (ordinal, member) in decl.members.iter().enumerate() {
        let value = match &member.init {
            Some(expr) => eval(expr, &resolved, &all_names)?,
            None => {
                // Auto-increment from the previous numeric member.
                let prev = members
                    .last()
                    .map(|m: &EnumMember| &m.value)
                    .unwrap_or(&EnumValue::Int(-1));
                match prev {
                    EnumValue::Int(p) => EnumValue::Int(p.wrapping_add(1)),
                    EnumValue::Str(_) => {
                        return Err(CompileError::const_eval(
                            "String enum members must have explicit values",
                        ));
                    }
                }
            }
        };
        match &value {
            EnumValue::Int(_) => has_int = true,
            EnumValue::Str(_) => has_str = true,
        }
        if has_int && has_str {
            return Err(CompileError::const_eval(
                "Heterogeneous enums (mixed numeric and string values) are not supported",
            ));
        }
        resolved.insert(member.name.name.clone(), value.clone());
        members.push(EnumMember {
            name: member.name.name.clone(),
            ordinal: ordinal as u16,
            value,
        });
    }

    Ok(members)
}

/// Evaluate one constant expression against the members resolved so far.
pub fn eval(
    expr: &Expr,
    resolved: &FxHashMap<String, EnumValue>,
    all_names: &FxHashSet<&str>,
) -> CompileResult<EnumValue> {
    match expr {
        Expr::Int(lit) => {
            let v = i32::try_from(lit.value).map_err(|_| {
                CompileError::const_eval(format!(
                    "Enum value {} does not fit in 32 bits",
                    lit.value
                ))
            })?;
            Ok(EnumValue::Int(v))
        }
        Expr::Float(lit) => {
            // Integral spellings like 2.0 are tolerated; anything with a
            // fractional part is rejected.
            if lit.value.fract() == 0.0
                && lit.value >= i32::MIN as f64
                && lit.value <= i32::MAX as f64
            {
                Ok(EnumValue::Int(lit.value as i32))
            } else {
                Err(CompileError::const_eval(
                    "Floating-point enum values are not supported",
                ))
            }
        }
        Expr::Str(lit) => Ok(EnumValue::Str(lit.value.clone())),
        Expr::Paren(inner) => eval(&inner.expr, resolved, all_names),
        Expr::Ident(ident) => {
            if let Some(value) = resolved.get(&ident.name) {
                Ok(value.clone())
            } else if all_names.contains(ident.name.as_str()) {
                Err(CompileError::const_eval(format!(
                    "Cannot reference enum member '{}' before it is defined",
                    ident.name
                )))
            } else {
                Err(CompileError::const_eval(format!(
                    "Cannot resolve identifier '{}' in enum initializer",
                    ident.name
                )))
            }
        }
        Expr::Unary(unary) => {
            let operand = eval_int(&unary.arg, resolved, all_names)?;
            let v = match unary.op {
                UnaryOp::Plus => operand,
                UnaryOp::Minus => operand.wrapping_neg(),
                UnaryOp::Tilde => !operand,
                UnaryOp::Not => {
                    return Err(CompileError::const_eval(
                        "Unsupported operator in enum initializer: !",
                    ));
                }
            };
            Ok(EnumValue::Int(v))
        }
        Expr::Binary(binary) => {
            // String concatenation is the only non-integer operation.
            if binary.op == BinaryOp::Add {
                let lhs = eval(&binary.left, resolved, all_names)?;
                let rhs = eval(&binary.right, resolved, all_names)?;
                if let (EnumValue::Str(a), EnumValue::Str(b)) = (&lhs, &rhs) {
                    return Ok(EnumValue::Str(format!("{a}{b}")));
                }
                let a = int_of(lhs)?;
                let b = int_of(rhs)?;
                return Ok(EnumValue::Int(a.wrapping_add(b)));
            }
            let a = eval_int(&binary.left, resolved, all_names)?;
            let b = eval_int(&binary.right, resolved, all_names)?;
            let v = match binary.op {
                BinaryOp::Sub => a.wrapping_sub(b),
                BinaryOp::Mul => a.wrapping_mul(b),
                BinaryOp::Div => {
                    if b == 0 {
                        return Err(CompileError::const_eval(
                            "Division by zero in enum initializer",
                        ));
                    }
                    a.wrapping_div(b)
                }
                BinaryOp::Mod => {
                    if b == 0 {
                        return Err(CompileError::const_eval(
                            "Division by zero in enum initializer",
                        ));
                    }
                    a.wrapping_rem(b)
                }
                BinaryOp::Exp => (a as f64).powf(b as f64) as i32,
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                BinaryOp::BitXor => a ^ b,
                BinaryOp::Shl => a.wrapping_shl(b as u32 & 31),
                BinaryOp::Shr => a.wrapping_shr(b as u32 & 31),
                BinaryOp::UShr => ((a as u32) >> (b as u32 & 31)) as i32,
                other => {
                    return Err(CompileError::const_eval(format!(
                        "Unsupported operator in enum initializer: {}",
                        other.as_str()
                    )));
                }
            };
            Ok(EnumValue::Int(v))
        }
        _ => Err(CompileError::const_eval(
            "Unsupported constant expression in enum initializer",
        )),
    }
}

fn eval_int(
    expr: &Expr,
    resolved: &FxHashMap<String, EnumValue>,
    all_names: &FxHashSet<&str>,
) -> CompileResult<i32> {
    int_of(eval(expr, resolved, all_names)?)
}

fn int_of(value: EnumValue) -> CompileResult<i32> {
    match value {
        EnumValue::Int(i) => Ok(i),
        EnumValue::Str(_) => Err(CompileError::const_eval(
            "Heterogeneous enums (mixed numeric and string values) are not supported",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kava_ast::{BinaryOp, EnumMemberDecl, Expr, Ident, Span, UnaryOp, UnaryExpr};

    fn enum_decl(members: Vec<(&str, Option<Expr>)>) -> EnumDecl {
        EnumDecl {
            name: Ident::new("E"),
            members: members
                .into_iter()
                .map(|(name, init)| EnumMemberDecl {
                    name: Ident::new(name),
                    init,
                    span: Span::NONE,
                })
                .collect(),
            span: Span::NONE,
        }
    }

    fn values(decl: &EnumDecl) -> Vec<EnumValue> {
        resolve_enum_members(decl)
            .unwrap()
            .into_iter()
            .map(|m| m.value)
            .collect()
    }

    #[test]
    fn test_auto_increment_from_zero() {
        let decl = enum_decl(vec![("A", None), ("B", None), ("C", None)]);
        assert_eq!(
            values(&decl),
            vec![EnumValue::Int(0), EnumValue::Int(1), EnumValue::Int(2)]
        );
    }

    #[test]
    fn test_auto_increment_continues_after_explicit() {
        let decl = enum_decl(vec![
            ("A", Some(Expr::int(10))),
            ("B", None),
            ("C", Some(Expr::int(100))),
            ("D", None),
        ]);
        assert_eq!(
            values(&decl),
            vec![
                EnumValue::Int(10),
                EnumValue::Int(11),
                EnumValue::Int(100),
                EnumValue::Int(101)
            ]
        );
    }

    #[test]
    fn test_bit_flags_pattern() {
        // None=0, Read=1<<0, Write=1<<1, Execute=1<<2,
        // ReadWrite=Read|Write, All=Read|Write|Execute
        let shl = |a: i64, b: i64| Expr::binary(BinaryOp::Shl, Expr::int(a), Expr::int(b));
        let decl = enum_decl(vec![
            ("None", Some(Expr::int(0))),
            ("Read", Some(shl(1, 0))),
            ("Write", Some(shl(1, 1))),
            ("Execute", Some(shl(1, 2))),
            (
                "ReadWrite",
                Some(Expr::binary(
                    BinaryOp::BitOr,
                    Expr::ident("Read"),
                    Expr::ident("Write"),
                )),
            ),
            (
                "All",
                Some(Expr::binary(
                    BinaryOp::BitOr,
                    Expr::binary(BinaryOp::BitOr, Expr::ident("Read"), Expr::ident("Write")),
                    Expr::ident("Execute"),
                )),
            ),
        ]);
        let got: Vec<i32> = values(&decl)
            .into_iter()
            .map(|v| match v {
                EnumValue::Int(i) => i,
                EnumValue::Str(_) => panic!("expected numeric"),
            })
            .collect();
        assert_eq!(got, vec![0, 1, 2, 4, 3, 7]);
    }

    #[test]
    fn test_forward_reference_rejected() {
        let decl = enum_decl(vec![
            (
                "A",
                Some(Expr::binary(BinaryOp::Mul, Expr::ident("B"), Expr::int(2))),
            ),
            ("B", Some(Expr::int(10))),
        ]);
        let err = resolve_enum_members(&decl).unwrap_err();
        assert!(err
            .to_string()
            .contains("Cannot reference enum member 'B' before it is defined"));
    }

    #[test]
    fn test_division_by_zero() {
        let decl = enum_decl(vec![(
            "A",
            Some(Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0))),
        )]);
        let err = resolve_enum_members(&decl).unwrap_err();
        assert!(err.to_string().contains("Division by zero in enum initializer"));
    }

    #[test]
    fn test_fractional_value_rejected() {
        let decl = enum_decl(vec![("A", Some(Expr::float(1.5)))]);
        let err = resolve_enum_members(&decl).unwrap_err();
        assert!(err
            .to_string()
            .contains("Floating-point enum values are not supported"));
    }

    #[test]
    fn test_string_member_without_value_rejected() {
        let decl = enum_decl(vec![("A", Some(Expr::str("a"))), ("B", None)]);
        let err = resolve_enum_members(&decl).unwrap_err();
        assert!(err
            .to_string()
            .contains("String enum members must have explicit values"));
    }

    #[test]
    fn test_heterogeneous_rejected() {
        let decl = enum_decl(vec![("A", Some(Expr::int(1))), ("B", Some(Expr::str("b")))]);
        let err = resolve_enum_members(&decl).unwrap_err();
        assert!(err.to_string().contains("Heterogeneous enums"));
    }

    #[test]
    fn test_empty_enum_rejected() {
        let decl = enum_decl(vec![]);
        let err = resolve_enum_members(&decl).unwrap_err();
        assert!(err.to_string().contains("Empty enums are not supported"));
    }

    #[test]
    fn test_pow_truncates() {
        let decl = enum_decl(vec![(
            "A",
            Some(Expr::binary(BinaryOp::Exp, Expr::int(2), Expr::int(10))),
        )]);
        assert_eq!(values(&decl), vec![EnumValue::Int(1024)]);
    }

    #[test]
    fn test_unary_ops() {
        let neg = Expr::Unary(UnaryExpr {
            op: UnaryOp::Minus,
            arg: Box::new(Expr::int(5)),
            span: Span::NONE,
        });
        let decl = enum_decl(vec![("A", Some(neg)), ("B", None)]);
        assert_eq!(values(&decl), vec![EnumValue::Int(-5), EnumValue::Int(-4)]);
    }
}
