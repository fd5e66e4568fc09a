//! Expression AST nodes.

use crate::span::Span;
use crate::Ident;

/// Expression (produces a value)
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal: 42, 0xFF, 0b1010
    Int(IntLit),
    /// Decimal literal: 3.14, 1e10
    Float(FloatLit),
    /// String literal: "hello"
    Str(StrLit),
    /// Boolean literal: true, false
    Bool(BoolLit),
    /// Null literal
    Null(Span),
    /// Regex literal: /pattern/flags
    Regex(RegexLit),
    /// Identifier reference
    Ident(Ident),
    /// This expression
    This(Span),
    /// Array literal: [1, 2, 3]
    Array(ArrayLit),
    /// Object literal: { x: 1, y: 2 }
    Object(ObjectLit),
    /// Unary expression: -x, +x, !x, ~x
    Unary(UnaryExpr),
    /// Update expression: x++, --y
    Update(UpdateExpr),
    /// Binary expression: x + y, a << b, p && q
    Binary(BinExpr),
    /// Assignment: x = 42, y += 1
    Assign(AssignExpr),
    /// Ternary: cond ? a : b
    Cond(CondExpr),
    /// Call: foo(1, 2), obj.bar(x)
    Call(CallExpr),
    /// Constructor call: new Point(1, 2)
    New(NewExpr),
    /// Member access: obj.prop
    Member(MemberExpr),
    /// Index access: arr[0], map[key]
    Index(IndexExpr),
    /// Parenthesized: (expr)
    Paren(ParenExpr),
}

impl Expr {
    /// Get the span of this expression
    pub fn span(&self) -> Span {
        match self {
            Expr::Int(e) => e.span,
            Expr::Float(e) => e.span,
            Expr::Str(e) => e.span,
            Expr::Bool(e) => e.span,
            Expr::Null(span) => *span,
            Expr::Regex(e) => e.span,
            Expr::Ident(e) => e.span,
            Expr::This(span) => *span,
            Expr::Array(e) => e.span,
            Expr::Object(e) => e.span,
            Expr::Unary(e) => e.span,
            Expr::Update(e) => e.span,
            Expr::Binary(e) => e.span,
            Expr::Assign(e) => e.span,
            Expr::Cond(e) => e.span,
            Expr::Call(e) => e.span,
            Expr::New(e) => e.span,
            Expr::Member(e) => e.span,
            Expr::Index(e) => e.span,
            Expr::Paren(e) => e.span,
        }
    }

    /// Strip any number of surrounding parentheses.
    pub fn unparenthesized(&self) -> &Expr {
        let mut expr = self;
        while let Expr::Paren(p) = expr {
            expr = &p.expr;
        }
        expr
    }
}

/// Integer literal. `raw` preserves the source spelling so radix prefixes
/// (0x, 0o, 0b) survive into constant evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct IntLit {
    pub value: i64,
    pub raw: String,
    pub span: Span,
}

impl IntLit {
    pub fn new(value: i64) -> Self {
        Self {
            value,
            raw: value.to_string(),
            span: Span::NONE,
        }
    }
}

/// Decimal literal
#[derive(Debug, Clone, PartialEq)]
pub struct FloatLit {
    pub value: f64,
    pub raw: String,
    pub span: Span,
}

impl FloatLit {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            raw: value.to_string(),
            span: Span::NONE,
        }
    }
}

/// String literal
#[derive(Debug, Clone, PartialEq)]
pub struct StrLit {
    pub value: String,
    pub span: Span,
}

impl StrLit {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            span: Span::NONE,
        }
    }
}

/// Boolean literal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoolLit {
    pub value: bool,
    pub span: Span,
}

impl BoolLit {
    pub fn new(value: bool) -> Self {
        Self {
            value,
            span: Span::NONE,
        }
    }
}

/// Regex literal: `/body/flags`
#[derive(Debug, Clone, PartialEq)]
pub struct RegexLit {
    pub body: String,
    pub flags: String,
    pub span: Span,
}

impl RegexLit {
    pub fn new(body: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            flags: flags.into(),
            span: Span::NONE,
        }
    }
}

/// Array literal
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayLit {
    pub elements: Vec<Expr>,
    pub span: Span,
}

/// Object literal
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectLit {
    pub props: Vec<ObjectProp>,
    pub span: Span,
}

/// One entry of an object literal
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectProp {
    /// `key: value`
    KeyValue { key: PropKey, value: Expr },
    /// `{ x }` — sugar for `{ x: x }`
    Shorthand(Ident),
    /// `...expr`
    Spread { expr: Expr, span: Span },
}

/// Object literal property key
#[derive(Debug, Clone, PartialEq)]
pub enum PropKey {
    /// Bare identifier key: `{ a: 1 }`
    Ident(Ident),
    /// String key: `{ "a b": 1 }`
    Str(StrLit),
    /// Numeric key: `{ 1: "x" }` — coerced to its string form
    Num(FloatLit),
    /// Computed key: `{ [expr]: 1 }`
    Computed(Box<Expr>, Span),
}

impl PropKey {
    pub fn span(&self) -> Span {
        match self {
            PropKey::Ident(i) => i.span,
            PropKey::Str(s) => s.span,
            PropKey::Num(n) => n.span,
            PropKey::Computed(_, span) => *span,
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Minus,
    /// `+x`
    Plus,
    /// `!x`
    Not,
    /// `~x`
    Tilde,
}

/// Unary expression
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub arg: Box<Expr>,
    pub span: Span,
}

/// `++` / `--`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Inc,
    Dec,
}

/// Update expression: `x++`, `--y`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateExpr {
    pub op: UpdateOp,
    pub prefix: bool,
    pub arg: Box<Expr>,
    pub span: Span,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// `**`
    Exp,
    BitAnd,
    BitOr,
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    UShr,
    /// `==` / `===` (the compiled subset does not distinguish them)
    Eq,
    /// `!=` / `!==`
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl BinaryOp {
    /// Source spelling, used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Exp => "**",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Binary expression
#[derive(Debug, Clone, PartialEq)]
pub struct BinExpr {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub span: Span,
}

/// Assignment operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
}

/// Assignment expression
#[derive(Debug, Clone, PartialEq)]
pub struct AssignExpr {
    pub op: AssignOp,
    pub target: Box<Expr>,
    pub value: Box<Expr>,
    pub span: Span,
}

/// Conditional (ternary) expression
#[derive(Debug, Clone, PartialEq)]
pub struct CondExpr {
    pub test: Box<Expr>,
    pub cons: Box<Expr>,
    pub alt: Box<Expr>,
    pub span: Span,
}

/// Call expression. The callee is an identifier (standalone function), a
/// member expression (method call), or a class-qualified member (static
/// call).
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
    pub span: Span,
}

/// Constructor call: `new Point(1, 2)`
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpr {
    pub class: Ident,
    pub args: Vec<Expr>,
    pub span: Span,
}

/// Member access: `obj.prop`
#[derive(Debug, Clone, PartialEq)]
pub struct MemberExpr {
    pub obj: Box<Expr>,
    pub prop: Ident,
    pub span: Span,
}

/// Index access: `arr[0]`
#[derive(Debug, Clone, PartialEq)]
pub struct IndexExpr {
    pub obj: Box<Expr>,
    pub index: Box<Expr>,
    pub span: Span,
}

/// Parenthesized expression. Transparent to type inference.
#[derive(Debug, Clone, PartialEq)]
pub struct ParenExpr {
    pub expr: Box<Expr>,
    pub span: Span,
}

impl Expr {
    /// Convenience constructor for an integer literal expression.
    pub fn int(value: i64) -> Expr {
        Expr::Int(IntLit::new(value))
    }

    /// Convenience constructor for a decimal literal expression.
    pub fn float(value: f64) -> Expr {
        Expr::Float(FloatLit::new(value))
    }

    /// Convenience constructor for a string literal expression.
    pub fn str(value: impl Into<String>) -> Expr {
        Expr::Str(StrLit::new(value))
    }

    /// Convenience constructor for a boolean literal expression.
    pub fn bool(value: bool) -> Expr {
        Expr::Bool(BoolLit::new(value))
    }

    /// Convenience constructor for an identifier expression.
    pub fn ident(name: impl Into<String>) -> Expr {
        Expr::Ident(Ident::new(name))
    }

    /// Convenience constructor for a binary expression.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary(BinExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: Span::NONE,
        })
    }

    /// Convenience constructor for a parenthesized expression.
    pub fn paren(expr: Expr) -> Expr {
        Expr::Paren(ParenExpr {
            expr: Box::new(expr),
            span: Span::NONE,
        })
    }
}
