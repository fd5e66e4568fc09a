//! Type inference.
//!
//! Expressions are inferred bottom-up against the program symbol table
//! built by the collection pass. The emitter asks for an expression's
//! type before choosing instructions, so inference never looks at
//! bytecode and stays pure.

use kava_ast::{BinaryOp, BlockStmt, CallExpr, Expr, Stmt, UnaryOp};
use rustc_hash::FxHashMap;

use crate::consteval::EnumMember;
use crate::error::{CompileError, CompileResult};
use crate::overload;
use crate::types::{
    self, JvmType, MethodSignature, OverloadSet, TypeRegistry, ARRAY_LIST, LINKED_HASH_MAP, LIST,
    MAP, PATTERN, STRING,
};

/// Field metadata recorded during the collection pass.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub ty: JvmType,
    pub is_static: bool,
}

/// Everything the compiler knows about one class being emitted.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub source_name: String,
    pub internal_name: String,
    pub is_enum: bool,
    /// Container class for standalone functions (`$`, `$1`, ...).
    pub is_synthetic: bool,
    pub enum_value_type: Option<JvmType>,
    pub enum_members: Vec<EnumMember>,
    pub fields: FxHashMap<String, FieldInfo>,
    /// All methods, constructors under `<init>`. Enum intrinsics
    /// (`values`, `valueOf`, `fromValue`, `getValue`) are registered
    /// here like ordinary methods.
    pub methods: OverloadSet,
}

impl ClassInfo {
    pub fn new(source_name: impl Into<String>, internal_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            internal_name: internal_name.into(),
            is_enum: false,
            is_synthetic: false,
            enum_value_type: None,
            enum_members: Vec::new(),
            fields: FxHashMap::default(),
            methods: OverloadSet::new(),
        }
    }

    pub fn ty(&self) -> JvmType {
        JvmType::reference(self.internal_name.clone())
    }

    pub fn enum_member(&self, name: &str) -> Option<&EnumMember> {
        self.enum_members.iter().find(|m| m.name == name)
    }
}

/// Program-wide symbol table: every class, enum, and function container
/// declared by the unit, fully signed before any body compiles.
#[derive(Debug, Default, Clone)]
pub struct Symbols {
    pub registry: TypeRegistry,
    classes: FxHashMap<String, ClassInfo>,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: ClassInfo) {
        if !info.is_synthetic {
            self.registry
                .register(info.source_name.clone(), info.internal_name.clone());
        }
        self.classes.insert(info.internal_name.clone(), info);
    }

    pub fn class(&self, internal_name: &str) -> Option<&ClassInfo> {
        self.classes.get(internal_name)
    }

    pub fn class_mut(&mut self, internal_name: &str) -> Option<&mut ClassInfo> {
        self.classes.get_mut(internal_name)
    }

    /// Look up a class by its source-level name.
    pub fn class_by_source(&self, source_name: &str) -> Option<&ClassInfo> {
        self.registry
            .lookup(source_name)
            .and_then(|internal| self.classes.get(internal))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.values()
    }
}

/// Visible local variable types, implemented by the emitter's slot table
/// and by the lightweight scan used for return-type inference.
pub trait VarTypes {
    fn var_type(&self, name: &str) -> Option<JvmType>;
}

impl VarTypes for FxHashMap<String, JvmType> {
    fn var_type(&self, name: &str) -> Option<JvmType> {
        self.get(name).cloned()
    }
}

/// Inference context for one expression site.
pub struct InferEnv<'a> {
    pub symbols: &'a Symbols,
    pub locals: &'a dyn VarTypes,
    /// Class whose body is being compiled, for `this` and field access.
    pub this_class: Option<&'a ClassInfo>,
    /// Whether the enclosing method is static (`this` is unavailable).
    pub in_static: bool,
    /// Function container classes in scope, innermost namespace first.
    pub function_owners: &'a [String],
    /// Declared target type, consulted for bare `null`.
    pub expected: Option<JvmType>,
}

impl<'a> InferEnv<'a> {
    fn with_expected(&self, expected: Option<JvmType>) -> InferEnv<'_> {
        InferEnv {
            symbols: self.symbols,
            locals: self.locals,
            this_class: self.this_class,
            in_static: self.in_static,
            function_owners: self.function_owners,
            expected,
        }
    }
}

/// How a resolved call must be invoked.
#[derive(Debug, Clone, PartialEq)]
pub enum CallKind {
    Static,
    Instance,
    Constructor,
}

/// A fully resolved call site.
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    pub kind: CallKind,
    pub sig: MethodSignature,
    /// Inferred argument types, for conversion at the call boundary.
    pub arg_types: Vec<JvmType>,
}

/// Infer the type an expression evaluates to.
pub fn infer_expr(expr: &Expr, env: &InferEnv) -> CompileResult<JvmType> {
    match expr {
        Expr::Int(lit) => {
            if i32::try_from(lit.value).is_ok() {
                Ok(JvmType::Int)
            } else {
                Ok(JvmType::Long)
            }
        }
        Expr::Float(_) => Ok(JvmType::Double),
        Expr::Str(_) => Ok(JvmType::string()),
        Expr::Bool(_) => Ok(JvmType::Boolean),
        Expr::Null(_) => match &env.expected {
            Some(t) if t.is_reference() => Ok(t.clone()),
            _ => Ok(JvmType::object()),
        },
        Expr::Regex(_) => Ok(JvmType::reference(PATTERN)),
        Expr::Ident(ident) => {
            if let Some(ty) = env.locals.var_type(&ident.name) {
                return Ok(ty);
            }
            if env.symbols.class_by_source(&ident.name).is_some() {
                return Err(CompileError::type_error(format!(
                    "Class '{}' cannot be used as a value",
                    ident.name
                )));
            }
            Err(CompileError::type_error(format!(
                "Undefined variable: {}",
                ident.name
            )))
        }
        Expr::This(_) => match env.this_class {
            Some(class) if !env.in_static => Ok(class.ty()),
            _ => Err(CompileError::type_error(
                "'this' is not available in a static context",
            )),
        },
        Expr::Array(_) => Ok(JvmType::array_list()),
        Expr::Object(_) => Ok(JvmType::linked_hash_map()),
        Expr::Unary(unary) => {
            let operand = infer_expr(&unary.arg, &env.with_expected(None))?;
            match unary.op {
                UnaryOp::Not => {
                    if operand == JvmType::Boolean {
                        Ok(JvmType::Boolean)
                    } else {
                        Err(CompileError::type_error(format!(
                            "Operator ! requires boolean, got {operand}"
                        )))
                    }
                }
                UnaryOp::Minus | UnaryOp::Plus => {
                    if operand.is_numeric() {
                        Ok(promote(&operand))
                    } else {
                        Err(CompileError::type_error(format!(
                            "Unary {} requires a numeric operand, got {operand}",
                            if unary.op == UnaryOp::Minus { "-" } else { "+" }
                        )))
                    }
                }
                UnaryOp::Tilde => {
                    if operand.is_integral() {
                        Ok(promote(&operand))
                    } else {
                        Err(CompileError::type_error(format!(
                            "Operator ~ requires an integral operand, got {operand}"
                        )))
                    }
                }
            }
        }
        Expr::Update(update) => {
            let target = infer_expr(&update.arg, &env.with_expected(None))?;
            if target.is_numeric() {
                Ok(target)
            } else {
                Err(CompileError::type_error(format!(
                    "Update operator requires a numeric variable, got {target}"
                )))
            }
        }
        Expr::Binary(binary) => infer_binary(binary, env),
        Expr::Assign(assign) => infer_expr(&assign.target, &env.with_expected(None)),
        Expr::Cond(cond) => {
            let cons = infer_expr(&cond.cons, env)?;
            let alt = infer_expr(&cond.alt, env)?;
            merge_types(&cons, &alt)
        }
        Expr::Call(call) => Ok(resolve_call(call, env)?.sig.ret),
        Expr::New(new) => {
            let class = env.symbols.class_by_source(&new.class.name).ok_or_else(|| {
                CompileError::type_error(format!("Unknown type: {}", new.class.name))
            })?;
            Ok(class.ty())
        }
        Expr::Member(member) => infer_member(member, env),
        Expr::Index(index) => {
            let obj = infer_expr(&index.obj, &env.with_expected(None))?;
            match &obj {
                JvmType::Reference(name) if name == ARRAY_LIST || name == LIST => {
                    Ok(JvmType::object())
                }
                JvmType::Reference(name) if name == LINKED_HASH_MAP || name == MAP => {
                    Ok(JvmType::object())
                }
                t if t.is_string() => Ok(JvmType::string()),
                other => Err(CompileError::type_error(format!(
                    "Cannot index a value of type {other}"
                ))),
            }
        }
        Expr::Paren(paren) => infer_expr(&paren.expr, env),
    }
}

fn infer_binary(binary: &kava_ast::BinExpr, env: &InferEnv) -> CompileResult<JvmType> {
    let no_expect = env.with_expected(None);
    let lhs = infer_expr(&binary.left, &no_expect)?;
    let rhs = infer_expr(&binary.right, &no_expect)?;
    match binary.op {
        BinaryOp::Add => {
            if lhs.is_string() || rhs.is_string() {
                return Ok(JvmType::string());
            }
            arithmetic(&lhs, &rhs, binary.op)
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(&lhs, &rhs, binary.op)
        }
        BinaryOp::Exp => {
            if lhs.is_numeric() && rhs.is_numeric() {
                Ok(JvmType::Double)
            } else {
                Err(op_type_error(binary.op, &lhs, &rhs))
            }
        }
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
            if lhs.is_integral() && rhs.is_integral() {
                types::widen(&lhs, &rhs).ok_or_else(|| op_type_error(binary.op, &lhs, &rhs))
            } else if lhs == JvmType::Boolean && rhs == JvmType::Boolean {
                Ok(JvmType::Boolean)
            } else {
                Err(op_type_error(binary.op, &lhs, &rhs))
            }
        }
        BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => {
            if lhs.is_integral() && rhs.is_integral() {
                Ok(promote(&lhs))
            } else {
                Err(op_type_error(binary.op, &lhs, &rhs))
            }
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            if lhs.is_numeric() && rhs.is_numeric()
                || lhs == JvmType::Boolean && rhs == JvmType::Boolean
                || lhs.is_reference() && rhs.is_reference()
            {
                Ok(JvmType::Boolean)
            } else {
                Err(op_type_error(binary.op, &lhs, &rhs))
            }
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if lhs.is_numeric() && rhs.is_numeric() {
                Ok(JvmType::Boolean)
            } else {
                Err(op_type_error(binary.op, &lhs, &rhs))
            }
        }
        BinaryOp::And | BinaryOp::Or => {
            if lhs == JvmType::Boolean && rhs == JvmType::Boolean {
                Ok(JvmType::Boolean)
            } else {
                Err(op_type_error(binary.op, &lhs, &rhs))
            }
        }
    }
}

fn arithmetic(lhs: &JvmType, rhs: &JvmType, op: BinaryOp) -> CompileResult<JvmType> {
    types::widen(lhs, rhs).ok_or_else(|| op_type_error(op, lhs, rhs))
}

fn op_type_error(op: BinaryOp, lhs: &JvmType, rhs: &JvmType) -> CompileError {
    CompileError::type_error(format!(
        "Operator {} is not defined for {lhs} and {rhs}",
        op.as_str()
    ))
}

fn infer_member(member: &kava_ast::MemberExpr, env: &InferEnv) -> CompileResult<JvmType> {
    // ClassName.member takes priority only when no local shadows the name.
    if let Expr::Ident(obj) = member.obj.unparenthesized() {
        if env.locals.var_type(&obj.name).is_none() {
            if let Some(class) = env.symbols.class_by_source(&obj.name) {
                if class.is_enum {
                    if let Some(_member) = class.enum_member(&member.prop.name) {
                        return Ok(class.ty());
                    }
                }
                if let Some(field) = class.fields.get(&member.prop.name) {
                    if field.is_static {
                        return Ok(field.ty.clone());
                    }
                }
                return Err(CompileError::type_error(format!(
                    "Class '{}' has no static member '{}'",
                    obj.name, member.prop.name
                )));
            }
        }
    }
    let obj_ty = infer_expr(&member.obj, &env.with_expected(None))?;
    member_type(&obj_ty, &member.prop.name, env)
}

/// Type of an instance member access.
fn member_type(obj: &JvmType, prop: &str, env: &InferEnv) -> CompileResult<JvmType> {
    match obj {
        JvmType::Reference(name) if name == STRING && prop == "length" => Ok(JvmType::Int),
        JvmType::Reference(name)
            if (name == ARRAY_LIST || name == LIST || name == LINKED_HASH_MAP || name == MAP)
                && prop == "length" =>
        {
            Ok(JvmType::Int)
        }
        JvmType::Reference(name) => {
            let class = env.symbols.class(name).ok_or_else(|| {
                CompileError::type_error(format!("Type {} has no member '{prop}'", obj))
            })?;
            match class.fields.get(prop) {
                Some(field) if !field.is_static => Ok(field.ty.clone()),
                _ => Err(CompileError::type_error(format!(
                    "Type {} has no member '{prop}'",
                    class.source_name
                ))),
            }
        }
        other => Err(CompileError::type_error(format!(
            "Type {other} has no member '{prop}'"
        ))),
    }
}

/// Resolve a call expression to a concrete signature.
pub fn resolve_call(call: &CallExpr, env: &InferEnv) -> CompileResult<ResolvedCall> {
    let no_expect = env.with_expected(None);
    let mut arg_types = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        arg_types.push(infer_expr(arg, &no_expect)?);
    }

    match call.callee.unparenthesized() {
        // Standalone function: innermost visible container first.
        Expr::Ident(name) => {
            // A method of the enclosing class can be called unqualified.
            if let Some(class) = env.this_class {
                if class.methods.contains(&name.name) {
                    let sig = overload::resolve(&name.name, class.methods.get(&name.name), &arg_types)?;
                    let kind = if sig.is_static() {
                        CallKind::Static
                    } else {
                        CallKind::Instance
                    };
                    return Ok(ResolvedCall {
                        kind,
                        sig: sig.clone(),
                        arg_types,
                    });
                }
            }
            for owner in env.function_owners {
                if let Some(container) = env.symbols.class(owner) {
                    if container.methods.contains(&name.name) {
                        let sig = overload::resolve(
                            &name.name,
                            container.methods.get(&name.name),
                            &arg_types,
                        )?;
                        return Ok(ResolvedCall {
                            kind: CallKind::Static,
                            sig: sig.clone(),
                            arg_types,
                        });
                    }
                }
            }
            Err(CompileError::type_error(format!(
                "Undefined function: {}",
                name.name
            )))
        }
        Expr::Member(member) => {
            // Static call: ClassName.method(...), unless a local shadows.
            if let Expr::Ident(obj) = member.obj.unparenthesized() {
                if env.locals.var_type(&obj.name).is_none() {
                    if let Some(class) = env.symbols.class_by_source(&obj.name) {
                        let sig = overload::resolve(
                            &member.prop.name,
                            class.methods.get(&member.prop.name),
                            &arg_types,
                        )?;
                        let kind = if sig.is_static() {
                            CallKind::Static
                        } else {
                            return Err(CompileError::type_error(format!(
                                "Cannot call instance method '{}' without an instance of {}",
                                member.prop.name, obj.name
                            )));
                        };
                        return Ok(ResolvedCall {
                            kind,
                            sig: sig.clone(),
                            arg_types,
                        });
                    }
                }
            }
            // Instance call on the receiver's class.
            let obj_ty = infer_expr(&member.obj, &no_expect)?;
            let JvmType::Reference(owner) = &obj_ty else {
                return Err(CompileError::type_error(format!(
                    "Cannot call '{}' on a value of type {obj_ty}",
                    member.prop.name
                )));
            };
            let class = env.symbols.class(owner).ok_or_else(|| {
                CompileError::type_error(format!(
                    "Cannot call '{}' on a value of type {obj_ty}",
                    member.prop.name
                ))
            })?;
            let sig = overload::resolve(
                &member.prop.name,
                class.methods.get(&member.prop.name),
                &arg_types,
            )?;
            let kind = if sig.is_static() {
                CallKind::Static
            } else {
                CallKind::Instance
            };
            Ok(ResolvedCall {
                kind,
                sig: sig.clone(),
                arg_types,
            })
        }
        other => Err(CompileError::unsupported(format!(
            "Unsupported call target at {}",
            other.span()
        ))),
    }
}

/// Resolve a constructor call.
pub fn resolve_ctor(
    class: &ClassInfo,
    arg_types: Vec<JvmType>,
) -> CompileResult<ResolvedCall> {
    let sig = overload::resolve("<init>", class.methods.get("<init>"), &arg_types)?;
    Ok(ResolvedCall {
        kind: CallKind::Constructor,
        sig: sig.clone(),
        arg_types,
    })
}

/// Sub-int operands promote to int everywhere a value is computed.
pub fn promote(t: &JvmType) -> JvmType {
    match t {
        JvmType::Byte | JvmType::Short | JvmType::Char => JvmType::Int,
        other => other.clone(),
    }
}

/// Common type of two branch values: numeric pairs widen, anything else
/// must agree up to assignability.
pub fn merge_types(a: &JvmType, b: &JvmType) -> CompileResult<JvmType> {
    if a == b {
        return Ok(a.clone());
    }
    if let Some(widened) = types::widen(a, b) {
        return Ok(widened);
    }
    if types::is_assignable(a, b) {
        return Ok(b.clone());
    }
    if types::is_assignable(b, a) {
        return Ok(a.clone());
    }
    Err(CompileError::type_error(format!(
        "Incompatible types: {a} and {b}"
    )))
}

/// Scan a function body and infer its return type from every `return`
/// statement. Tracks declared variables in a lightweight scope stack so
/// `return x` resolves. `void` mixes with nothing.
pub fn infer_return_type(body: &BlockStmt, env: &InferEnv) -> CompileResult<JvmType> {
    let mut scan = ReturnScan {
        scopes: vec![FxHashMap::default()],
        result: None,
        saw_void: false,
    };
    scan.block(body, env)?;
    match (scan.result, scan.saw_void) {
        (Some(_), true) => Err(CompileError::type_error(
            "Cannot mix value and void returns in a function",
        )),
        (Some(ty), false) => Ok(ty),
        (None, _) => Ok(JvmType::Void),
    }
}

struct ReturnScan {
    scopes: Vec<FxHashMap<String, JvmType>>,
    result: Option<JvmType>,
    saw_void: bool,
}

impl VarTypes for ReturnScan {
    fn var_type(&self, name: &str) -> Option<JvmType> {
        self.scopes.iter().rev().find_map(|s| s.get(name).cloned())
    }
}

impl ReturnScan {
    fn block(&mut self, block: &BlockStmt, env: &InferEnv) -> CompileResult<()> {
        self.scopes.push(FxHashMap::default());
        for stmt in &block.stmts {
            self.stmt(stmt, env)?;
        }
        self.scopes.pop();
        Ok(())
    }

    fn env<'a>(&'a self, env: &'a InferEnv) -> InferEnv<'a> {
        InferEnv {
            symbols: env.symbols,
            locals: self,
            this_class: env.this_class,
            in_static: env.in_static,
            function_owners: env.function_owners,
            expected: None,
        }
    }

    fn stmt(&mut self, stmt: &Stmt, env: &InferEnv) -> CompileResult<()> {
        match stmt {
            Stmt::Block(block) => self.block(block, env)?,
            Stmt::Var(decl) => {
                let ty = match (&decl.type_ann, &decl.init) {
                    (Some(ann), _) => env.symbols.registry.resolve(ann)?,
                    (None, Some(init)) => {
                        let scoped = self.env(env);
                        promote(&infer_expr(init, &scoped)?)
                    }
                    (None, None) => JvmType::object(),
                };
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(decl.name.name.clone(), ty);
                }
            }
            Stmt::Return(ret) => match &ret.value {
                Some(expr) => {
                    let scoped = self.env(env);
                    let ty = promote(&infer_expr(expr, &scoped)?);
                    self.result = Some(match self.result.take() {
                        Some(prev) => merge_types(&prev, &ty)?,
                        None => ty,
                    });
                }
                None => self.saw_void = true,
            },
            Stmt::If(s) => {
                self.stmt(&s.cons, env)?;
                if let Some(alt) = &s.alt {
                    self.stmt(alt, env)?;
                }
            }
            Stmt::While(s) => self.stmt(&s.body, env)?,
            Stmt::DoWhile(s) => self.stmt(&s.body, env)?,
            Stmt::For(s) => {
                self.scopes.push(FxHashMap::default());
                if let Some(init) = &s.init {
                    self.stmt(init, env)?;
                }
                self.stmt(&s.body, env)?;
                self.scopes.pop();
            }
            Stmt::ForIn(s) => {
                self.scopes.push(FxHashMap::default());
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(s.head.name().to_string(), JvmType::string());
                }
                self.stmt(&s.body, env)?;
                self.scopes.pop();
            }
            Stmt::Switch(s) => {
                for case in &s.cases {
                    for stmt in &case.body {
                        self.stmt(stmt, env)?;
                    }
                }
            }
            Stmt::Try(s) => {
                self.block(&s.block, env)?;
                if let Some(catch) = &s.catch {
                    self.scopes.push(FxHashMap::default());
                    if let (Some(param), Some(scope)) = (&catch.param, self.scopes.last_mut()) {
                        scope.insert(param.name.clone(), JvmType::reference(types::EXCEPTION));
                    }
                    self.block(&catch.body, env)?;
                    self.scopes.pop();
                }
                if let Some(finally) = &s.finally {
                    self.block(finally, env)?;
                }
            }
            Stmt::Labeled(s) => self.stmt(&s.body, env)?,
            Stmt::Expr(_)
            | Stmt::Throw(_)
            | Stmt::Break(_)
            | Stmt::Continue(_)
            | Stmt::Empty(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kava_ast::{CondExpr, Span};

    fn empty_env<'a>(symbols: &'a Symbols, locals: &'a FxHashMap<String, JvmType>) -> InferEnv<'a> {
        InferEnv {
            symbols,
            locals,
            this_class: None,
            in_static: true,
            function_owners: &[],
            expected: None,
        }
    }

    #[test]
    fn test_literal_types() {
        let symbols = Symbols::new();
        let locals = FxHashMap::default();
        let env = empty_env(&symbols, &locals);
        assert_eq!(infer_expr(&Expr::int(1), &env).unwrap(), JvmType::Int);
        assert_eq!(
            infer_expr(&Expr::int(5_000_000_000), &env).unwrap(),
            JvmType::Long
        );
        assert_eq!(infer_expr(&Expr::float(1.5), &env).unwrap(), JvmType::Double);
        assert_eq!(infer_expr(&Expr::str("x"), &env).unwrap(), JvmType::string());
        assert_eq!(infer_expr(&Expr::bool(true), &env).unwrap(), JvmType::Boolean);
    }

    #[test]
    fn test_arithmetic_widens() {
        let symbols = Symbols::new();
        let locals = FxHashMap::default();
        let env = empty_env(&symbols, &locals);
        let e = Expr::binary(BinaryOp::Add, Expr::int(1), Expr::float(2.5));
        assert_eq!(infer_expr(&e, &env).unwrap(), JvmType::Double);
        let e = Expr::binary(BinaryOp::Mul, Expr::int(2), Expr::int(3));
        assert_eq!(infer_expr(&e, &env).unwrap(), JvmType::Int);
    }

    #[test]
    fn test_string_concat() {
        let symbols = Symbols::new();
        let locals = FxHashMap::default();
        let env = empty_env(&symbols, &locals);
        let e = Expr::binary(BinaryOp::Add, Expr::str("n = "), Expr::int(1));
        assert_eq!(infer_expr(&e, &env).unwrap(), JvmType::string());
    }

    #[test]
    fn test_conditional_branches_widen() {
        let symbols = Symbols::new();
        let locals = FxHashMap::default();
        let env = empty_env(&symbols, &locals);
        let e = Expr::Cond(CondExpr {
            test: Box::new(Expr::bool(true)),
            cons: Box::new(Expr::int(10)),
            alt: Box::new(Expr::float(20.5)),
            span: Span::NONE,
        });
        assert_eq!(infer_expr(&e, &env).unwrap(), JvmType::Double);
    }

    #[test]
    fn test_incompatible_branches_rejected() {
        assert!(merge_types(&JvmType::Boolean, &JvmType::string()).is_err());
        assert!(merge_types(&JvmType::Int, &JvmType::string()).is_err());
    }

    #[test]
    fn test_undefined_variable() {
        let symbols = Symbols::new();
        let locals = FxHashMap::default();
        let env = empty_env(&symbols, &locals);
        let err = infer_expr(&Expr::ident("missing"), &env).unwrap_err();
        assert!(err.to_string().contains("Undefined variable: missing"));
    }

    #[test]
    fn test_return_type_widens_across_branches() {
        use kava_ast::{IfStmt, Stmt};
        let symbols = Symbols::new();
        let locals = FxHashMap::default();
        let env = empty_env(&symbols, &locals);
        let body = BlockStmt::new(vec![Stmt::If(IfStmt {
            test: Expr::bool(true),
            cons: Box::new(Stmt::ret(Expr::int(10))),
            alt: Some(Box::new(Stmt::ret(Expr::float(20.5)))),
            span: Span::NONE,
        })]);
        assert_eq!(infer_return_type(&body, &env).unwrap(), JvmType::Double);
    }

    #[test]
    fn test_mixed_void_and_value_returns_rejected() {
        use kava_ast::{IfStmt, Stmt};
        let symbols = Symbols::new();
        let locals = FxHashMap::default();
        let env = empty_env(&symbols, &locals);
        let body = BlockStmt::new(vec![Stmt::If(IfStmt {
            test: Expr::bool(true),
            cons: Box::new(Stmt::ret(Expr::int(10))),
            alt: Some(Box::new(Stmt::ret_void())),
            span: Span::NONE,
        })]);
        let err = infer_return_type(&body, &env).unwrap_err();
        assert!(err.to_string().contains("Cannot mix value and void returns"));
    }

    #[test]
    fn test_no_returns_is_void() {
        let symbols = Symbols::new();
        let locals = FxHashMap::default();
        let env = empty_env(&symbols, &locals);
        let body = BlockStmt::new(vec![Stmt::expr(Expr::int(1))]);
        assert_eq!(infer_return_type(&body, &env).unwrap(), JvmType::Void);
    }

    #[test]
    fn test_return_of_declared_local() {
        use kava_ast::{Stmt, VarDecl, VarKind};
        let symbols = Symbols::new();
        let locals = FxHashMap::default();
        let env = empty_env(&symbols, &locals);
        let body = BlockStmt::new(vec![
            Stmt::Var(VarDecl::new(VarKind::Let, "x", Some(Expr::float(1.0)))),
            Stmt::ret(Expr::ident("x")),
        ]);
        assert_eq!(infer_return_type(&body, &env).unwrap(), JvmType::Double);
    }
}
