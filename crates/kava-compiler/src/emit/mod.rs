//! Bytecode emission.
//!
//! Compilation runs in two passes over the module. The collection pass
//! builds the [`Symbols`] table: every class, enum, and function
//! container gets an internal name and a fully typed signature set, so
//! bodies can call forward in any order. The emission pass then walks
//! the same declarations and lowers each body through a
//! [`MethodEmitter`], which pairs a [`CodeBuilder`] with a block-scoped
//! slot table and tracks enough frame state to serialize stack maps as
//! it goes.

pub mod classfile;
pub mod code;
pub mod enums;
pub mod forin;
pub mod locals;

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use kava_ast::{
    AssignExpr, AssignOp, BinExpr, BinaryOp, BlockStmt, BreakStmt, CallExpr, ClassDecl,
    ContinueStmt, Decl, DoWhileStmt, Expr, ForStmt, Function, FunctionDecl, IfStmt, MemberExpr,
    Module, NewExpr, Param, ReturnStmt, Span, Stmt, SwitchStmt, ThrowStmt, TryStmt, TypeAnn,
    UnaryOp, UpdateExpr, UpdateOp, VarDecl, VarKind, WhileStmt,
};

use crate::emit::classfile::{ClassFile, ClassFlags, ConstantPool, FieldFlags, MethodAccess};
use crate::emit::code::{method_descriptor, CodeBuilder, Cond, Invoke, Label, VerifType};
use crate::emit::locals::LocalSlotTable;
use crate::error::{CompileError, CompileResult};
use crate::infer::{self, CallKind, ClassInfo, FieldInfo, InferEnv, Symbols};
use crate::literal::{self, PlannedEntry, PlannedKey, RecordConstraint};
use crate::overload;
use crate::regex;
use crate::types::{
    JvmType, MethodFlags, MethodSignature, TypeRegistry, ARRAY_LIST, EXCEPTION, LINKED_HASH_MAP,
    LIST, MAP, OBJECT, PATTERN, RUNTIME_EXCEPTION, STRING, STRING_BUILDER, THROWABLE,
};

/// Compile a module to class files, keyed by dotted class name. The
/// first diagnostic aborts the unit.
pub fn compile_module(module: &Module) -> CompileResult<BTreeMap<String, Vec<u8>>> {
    let collected = collect(module)?;
    let mut out = BTreeMap::new();
    let root_owners = scope_owners(&collected.containers, "", &[]);
    emit_scope(
        &module.decls,
        &mut Vec::new(),
        &root_owners,
        &collected,
        &mut out,
    )?;
    Ok(out)
}

#[derive(Debug)]
struct Collected {
    symbols: Symbols,
    /// Namespace prefix (`""`, `"com"`, `"com/util"`) to the internal
    /// name of that scope's function container.
    containers: FxHashMap<String, String>,
}

fn scope_owners(
    containers: &FxHashMap<String, String>,
    prefix: &str,
    parent: &[String],
) -> Vec<String> {
    let mut owners = Vec::with_capacity(parent.len() + 1);
    if let Some(container) = containers.get(prefix) {
        owners.push(container.clone());
    }
    owners.extend_from_slice(parent);
    owners
}

fn internal_name(prefix: &[String], name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix.join("/"), name)
    }
}

fn dotted(internal: &str) -> String {
    internal.replace('/', ".")
}

// ----- collection pass -----

fn collect(module: &Module) -> CompileResult<Collected> {
    let mut collected = Collected {
        symbols: Symbols::new(),
        containers: FxHashMap::default(),
    };
    scan_scope(&module.decls, &mut Vec::new(), &mut collected)?;
    let mut deferred = Vec::new();
    sign_scope(
        &module.decls,
        &mut Vec::new(),
        &Vec::new(),
        &mut collected,
        &mut deferred,
    )?;
    resolve_deferred(deferred, &mut collected.symbols)?;
    Ok(collected)
}

/// First sub-pass: names only. Classes and enums are registered so type
/// annotations resolve everywhere; enums also get their members
/// const-evaluated and their intrinsic signatures, since neither depends
/// on any other declaration.
fn scan_scope(
    decls: &[Decl],
    prefix: &mut Vec<String>,
    collected: &mut Collected,
) -> CompileResult<()> {
    let mut has_functions = false;
    for decl in decls {
        match decl {
            Decl::Class(class) => {
                let internal = internal_name(prefix, &class.name.name);
                register_named(collected, &class.name.name, internal, prefix, class.span)?;
            }
            Decl::Enum(decl) => {
                let internal = internal_name(prefix, &decl.name.name);
                let mut info =
                    register_named(collected, &decl.name.name, internal, prefix, decl.span)?;
                let members = crate::consteval::resolve_enum_members(decl)?;
                let value_type = match members.first().map(|m| &m.value) {
                    Some(crate::consteval::EnumValue::Str(_)) => JvmType::string(),
                    _ => JvmType::Int,
                };
                enum_intrinsics(&mut info, &value_type)?;
                info.is_enum = true;
                info.enum_value_type = Some(value_type);
                info.enum_members = members;
                collected.symbols.insert(info);
            }
            Decl::Function(_) => has_functions = true,
            Decl::Namespace(ns) => {
                prefix.push(ns.name.name.clone());
                scan_scope(&ns.decls, prefix, collected)?;
                prefix.pop();
            }
        }
    }
    if has_functions {
        let container = free_container_name(prefix, &collected.symbols);
        let internal = internal_name(prefix, &container);
        let mut info = ClassInfo::new(container, internal.clone());
        info.is_synthetic = true;
        collected.symbols.insert(info);
        collected.containers.insert(prefix.join("/"), internal);
    }
    Ok(())
}

/// Register a class or enum shell, with a collision check against
/// anything already claiming the same internal name.
fn register_named(
    collected: &mut Collected,
    source_name: &str,
    internal: String,
    prefix: &[String],
    span: Span,
) -> CompileResult<ClassInfo> {
    if collected.symbols.class(&internal).is_some() {
        return Err(
            CompileError::type_error(format!("Duplicate declaration: {source_name}")).at(span),
        );
    }
    let info = ClassInfo::new(source_name, internal.clone());
    collected.symbols.insert(info.clone());
    if !prefix.is_empty() {
        // Qualified spelling works from any scope.
        let qualified = format!("{}.{}", prefix.join("."), source_name);
        collected.symbols.registry.register(qualified, internal);
    }
    Ok(info)
}

/// Pick `$`, then `$1`, `$2`, ... for a scope's function container.
fn free_container_name(prefix: &[String], symbols: &Symbols) -> String {
    let mut candidate = "$".to_string();
    let mut n = 1u32;
    while symbols.class(&internal_name(prefix, &candidate)).is_some() {
        candidate = format!("${n}");
        n += 1;
    }
    candidate
}

fn enum_intrinsics(info: &mut ClassInfo, value_type: &JvmType) -> CompileResult<()> {
    let owner = info.internal_name.clone();
    let self_ty = info.ty();
    let array = JvmType::Array(Box::new(self_ty.clone()));
    info.methods.add(MethodSignature::new(
        owner.clone(),
        "values",
        vec![],
        array,
        MethodFlags::STATIC,
    ))?;
    info.methods.add(MethodSignature::new(
        owner.clone(),
        "valueOf",
        vec![JvmType::string()],
        self_ty.clone(),
        MethodFlags::STATIC,
    ))?;
    info.methods.add(MethodSignature::new(
        owner.clone(),
        "fromValue",
        vec![value_type.clone()],
        self_ty,
        MethodFlags::STATIC,
    ))?;
    info.methods.add(MethodSignature::new(
        owner,
        "getValue",
        vec![],
        value_type.clone(),
        MethodFlags::empty(),
    ))?;
    Ok(())
}

/// A function whose return type must be inferred from its body once the
/// annotated world is fully signed.
struct DeferredReturn {
    owner: String,
    name: String,
    is_static: bool,
    function: Function,
    owners: Vec<String>,
}

/// Second sub-pass: field types and method signatures. Bodies are not
/// touched except when a return annotation is missing, which defers to
/// the third sub-pass.
fn sign_scope(
    decls: &[Decl],
    prefix: &mut Vec<String>,
    parent_owners: &[String],
    collected: &mut Collected,
    deferred: &mut Vec<DeferredReturn>,
) -> CompileResult<()> {
    let owners = scope_owners(&collected.containers, &prefix.join("/"), parent_owners);
    for decl in decls {
        match decl {
            Decl::Class(class) => {
                let internal = internal_name(prefix, &class.name.name);
                sign_class(class, &internal, &owners, collected, deferred)?;
            }
            Decl::Function(func) => {
                let container = collected
                    .containers
                    .get(&prefix.join("/"))
                    .cloned()
                    .ok_or_else(|| CompileError::internal("function container not collected"))?;
                sign_function(
                    &container,
                    &func.name.name,
                    &func.function,
                    true,
                    &owners,
                    collected,
                    deferred,
                )?;
            }
            Decl::Enum(_) => {}
            Decl::Namespace(ns) => {
                prefix.push(ns.name.name.clone());
                sign_scope(&ns.decls, prefix, &owners, collected, deferred)?;
                prefix.pop();
            }
        }
    }
    Ok(())
}

fn sign_class(
    class: &ClassDecl,
    internal: &str,
    owners: &[String],
    collected: &mut Collected,
    deferred: &mut Vec<DeferredReturn>,
) -> CompileResult<()> {
    // Fields first so method bodies can be inferred against them.
    let mut fields = Vec::with_capacity(class.fields.len());
    for field in &class.fields {
        let ty = match (&field.type_ann, &field.init) {
            (Some(ann), _) => collected.symbols.registry.resolve(ann)?,
            (None, Some(init)) => {
                let locals: FxHashMap<String, JvmType> = FxHashMap::default();
                let env = InferEnv {
                    symbols: &collected.symbols,
                    locals: &locals,
                    this_class: None,
                    in_static: true,
                    function_owners: owners,
                    expected: None,
                };
                infer::promote(&infer::infer_expr(init, &env).map_err(|e| e.at(field.span))?)
            }
            (None, None) => {
                return Err(CompileError::type_error(format!(
                    "Field '{}' requires a type annotation or an initializer",
                    field.name.name
                ))
                .at(field.span));
            }
        };
        fields.push((
            field.name.name.clone(),
            FieldInfo {
                ty,
                is_static: field.is_static,
            },
        ));
    }

    let mut sigs = Vec::new();
    for ctor in &class.ctors {
        sigs.push(signature_parts(
            internal,
            "<init>",
            &ctor.params,
            JvmType::Void,
            false,
            &collected.symbols.registry,
        )?);
    }
    if class.ctors.is_empty() {
        sigs.push(SignatureParts {
            owner: internal.to_string(),
            name: "<init>".to_string(),
            types: vec![],
            ret: JvmType::Void,
            flags: MethodFlags::empty(),
            min: 0,
        });
    }
    for method in &class.methods {
        match &method.function.return_ann {
            Some(ann) => {
                let ret = resolve_return(ann, &collected.symbols.registry)?;
                sigs.push(signature_parts(
                    internal,
                    &method.name.name,
                    &method.function.params,
                    ret,
                    method.is_static,
                    &collected.symbols.registry,
                )?);
            }
            None => deferred.push(DeferredReturn {
                owner: internal.to_string(),
                name: method.name.name.clone(),
                is_static: method.is_static,
                function: method.function.clone(),
                owners: owners.to_vec(),
            }),
        }
    }

    let info = collected
        .symbols
        .class_mut(internal)
        .ok_or_else(|| CompileError::internal("class not collected"))?;
    for (name, field) in fields {
        info.fields.insert(name, field);
    }
    for parts in sigs {
        register_signatures(info, parts)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn sign_function(
    owner: &str,
    name: &str,
    function: &Function,
    is_static: bool,
    owners: &[String],
    collected: &mut Collected,
    deferred: &mut Vec<DeferredReturn>,
) -> CompileResult<()> {
    match &function.return_ann {
        Some(ann) => {
            let ret = resolve_return(ann, &collected.symbols.registry)?;
            let parts = signature_parts(
                owner,
                name,
                &function.params,
                ret,
                is_static,
                &collected.symbols.registry,
            )?;
            let info = collected
                .symbols
                .class_mut(owner)
                .ok_or_else(|| CompileError::internal("owner not collected"))?;
            register_signatures(info, parts)
        }
        None => {
            deferred.push(DeferredReturn {
                owner: owner.to_string(),
                name: name.to_string(),
                is_static,
                function: function.clone(),
                owners: owners.to_vec(),
            });
            Ok(())
        }
    }
}

/// Third sub-pass: infer the return type of each annotation-less
/// function from its body. Runs after every annotated signature exists;
/// two annotation-less functions calling each other need an annotation
/// on at least one of them.
fn resolve_deferred(deferred: Vec<DeferredReturn>, symbols: &mut Symbols) -> CompileResult<()> {
    for item in deferred {
        let ret = {
            let mut locals: FxHashMap<String, JvmType> = FxHashMap::default();
            for param in &item.function.params {
                locals.insert(
                    param.name.name.clone(),
                    param_type(param, &symbols.registry)?,
                );
            }
            let this_class = symbols.class(&item.owner);
            let env = InferEnv {
                symbols,
                locals: &locals,
                this_class,
                in_static: item.is_static,
                function_owners: &item.owners,
                expected: None,
            };
            infer::infer_return_type(&item.function.body, &env)
                .map_err(|e| e.at(item.function.span))?
        };
        let parts = signature_parts(
            &item.owner,
            &item.name,
            &item.function.params,
            ret,
            item.is_static,
            &symbols.registry,
        )?;
        let info = symbols
            .class_mut(&item.owner)
            .ok_or_else(|| CompileError::internal("owner not collected"))?;
        register_signatures(info, parts)?;
    }
    Ok(())
}

struct SignatureParts {
    owner: String,
    name: String,
    types: Vec<JvmType>,
    ret: JvmType,
    flags: MethodFlags,
    /// Smallest caller arity over the fixed parameters; every arity up
    /// to the fixed count gets a synthetic bridge.
    min: usize,
}

fn signature_parts(
    owner: &str,
    name: &str,
    params: &[Param],
    ret: JvmType,
    is_static: bool,
    registry: &TypeRegistry,
) -> CompileResult<SignatureParts> {
    let (min, _max) = overload::validate_params(params)?;
    let mut types = Vec::with_capacity(params.len());
    let mut flags = if is_static {
        MethodFlags::STATIC
    } else {
        MethodFlags::empty()
    };
    for param in params {
        if param.rest {
            flags |= MethodFlags::VARARGS;
        }
        types.push(param_type(param, registry)?);
    }
    Ok(SignatureParts {
        owner: owner.to_string(),
        name: name.to_string(),
        types,
        ret,
        flags,
        min,
    })
}

fn register_signatures(info: &mut ClassInfo, parts: SignatureParts) -> CompileResult<()> {
    let varargs = parts.flags.contains(MethodFlags::VARARGS);
    let fixed_len = parts.types.len() - usize::from(varargs);
    info.methods.add(MethodSignature::new(
        parts.owner.clone(),
        parts.name.clone(),
        parts.types.clone(),
        parts.ret.clone(),
        parts.flags,
    ))?;
    for arity in parts.min..fixed_len {
        let mut bridge_params: Vec<JvmType> = parts.types[..arity].to_vec();
        if varargs {
            bridge_params.push(parts.types[parts.types.len() - 1].clone());
        }
        info.methods.add(MethodSignature::new(
            parts.owner.clone(),
            parts.name.clone(),
            bridge_params,
            parts.ret.clone(),
            parts.flags | MethodFlags::SYNTHETIC,
        ))?;
    }
    Ok(())
}

fn param_type(param: &Param, registry: &TypeRegistry) -> CompileResult<JvmType> {
    if param.rest {
        let Some(TypeAnn::Array { elem, .. }) = &param.type_ann else {
            return Err(CompileError::unsupported(format!(
                "Rest parameter '{}' must have an array type",
                param.name.name
            ))
            .at(param.span));
        };
        let elem_ty = registry.resolve(elem)?;
        let boxed = match elem_ty.boxed() {
            Some(b) => b,
            None => elem_ty,
        };
        return Ok(JvmType::Array(Box::new(boxed)));
    }
    match &param.type_ann {
        Some(ann) => registry.resolve(ann),
        None => Err(CompileError::type_error(format!(
            "Parameter '{}' requires a type annotation",
            param.name.name
        ))
        .at(param.span)),
    }
}

fn resolve_return(ann: &TypeAnn, registry: &TypeRegistry) -> CompileResult<JvmType> {
    match ann {
        TypeAnn::Void(_) => Ok(JvmType::Void),
        other => registry.resolve(other),
    }
}

// ----- emission pass -----

fn emit_scope(
    decls: &[Decl],
    prefix: &mut Vec<String>,
    owners: &[String],
    collected: &Collected,
    out: &mut BTreeMap<String, Vec<u8>>,
) -> CompileResult<()> {
    let mut functions: Vec<&FunctionDecl> = Vec::new();
    for decl in decls {
        match decl {
            Decl::Class(class) => {
                let internal = internal_name(prefix, &class.name.name);
                let info = collected
                    .symbols
                    .class(&internal)
                    .ok_or_else(|| CompileError::internal("class not collected"))?;
                let bytes = emit_class(class, info, owners, &collected.symbols)?;
                out.insert(dotted(&internal), bytes);
            }
            Decl::Enum(decl) => {
                let internal = internal_name(prefix, &decl.name.name);
                let info = collected
                    .symbols
                    .class(&internal)
                    .ok_or_else(|| CompileError::internal("enum not collected"))?;
                let value_type = info
                    .enum_value_type
                    .as_ref()
                    .ok_or_else(|| CompileError::internal("enum value type not collected"))?;
                let bytes = enums::emit_enum(&internal, &info.enum_members, value_type)?;
                out.insert(dotted(&internal), bytes);
            }
            Decl::Function(func) => functions.push(func),
            Decl::Namespace(ns) => {
                prefix.push(ns.name.name.clone());
                let child_owners = scope_owners(&collected.containers, &prefix.join("/"), owners);
                emit_scope(&ns.decls, prefix, &child_owners, collected, out)?;
                prefix.pop();
            }
        }
    }
    if !functions.is_empty() {
        let internal = collected
            .containers
            .get(&prefix.join("/"))
            .ok_or_else(|| CompileError::internal("function container not collected"))?;
        let info = collected
            .symbols
            .class(internal)
            .ok_or_else(|| CompileError::internal("container not collected"))?;
        let bytes = emit_container(&functions, info, owners, &collected.symbols)?;
        out.insert(dotted(internal), bytes);
    }
    Ok(())
}

/// Synthetic holder for a scope's standalone functions.
fn emit_container(
    functions: &[&FunctionDecl],
    info: &ClassInfo,
    owners: &[String],
    symbols: &Symbols,
) -> CompileResult<Vec<u8>> {
    let mut cf = ClassFile::new(
        &info.internal_name,
        OBJECT,
        ClassFlags::PUBLIC | ClassFlags::FINAL | ClassFlags::SUPER | ClassFlags::SYNTHETIC,
    );
    emit_empty_ctor(&mut cf, MethodAccess::PRIVATE)?;
    for func in functions {
        let ret = declared_return(info, &func.name.name, &func.function, &symbols.registry)?;
        emit_method_and_bridges(
            &mut cf,
            symbols,
            info,
            owners,
            &func.name.name,
            &func.function.params,
            &ret,
            true,
            &func.function.body,
        )?;
    }
    cf.to_bytes()
}

fn emit_class(
    class: &ClassDecl,
    info: &ClassInfo,
    owners: &[String],
    symbols: &Symbols,
) -> CompileResult<Vec<u8>> {
    let mut cf = ClassFile::new(
        &info.internal_name,
        OBJECT,
        ClassFlags::PUBLIC | ClassFlags::SUPER,
    );
    for field in &class.fields {
        let field_info = info.fields.get(&field.name.name).ok_or_else(|| {
            CompileError::internal(format!("field '{}' not collected", field.name.name))
        })?;
        let mut flags = FieldFlags::PUBLIC;
        if field.is_static {
            flags |= FieldFlags::STATIC;
        }
        cf.add_field(flags, &field.name.name, &field_info.ty.descriptor());
    }

    if class.ctors.is_empty() {
        emit_default_ctor(&mut cf, class, info, owners, symbols)?;
    }
    for ctor in &class.ctors {
        emit_ctor(&mut cf, class, ctor, info, owners, symbols)?;
        emit_bridges(
            &mut cf,
            symbols,
            info,
            owners,
            "<init>",
            &ctor.params,
            &JvmType::Void,
            false,
            true,
        )?;
    }
    for method in &class.methods {
        let ret = declared_return(info, &method.name.name, &method.function, &symbols.registry)?;
        emit_method_and_bridges(
            &mut cf,
            symbols,
            info,
            owners,
            &method.name.name,
            &method.function.params,
            &ret,
            method.is_static,
            &method.function.body,
        )?;
    }
    emit_clinit(&mut cf, class, info, owners, symbols)?;
    cf.to_bytes()
}

/// The return type the collection pass settled on: the annotation, or
/// the signature inferred for the full (non-synthetic) arity.
fn declared_return(
    info: &ClassInfo,
    name: &str,
    function: &Function,
    registry: &TypeRegistry,
) -> CompileResult<JvmType> {
    if let Some(ann) = &function.return_ann {
        return resolve_return(ann, registry);
    }
    info.methods
        .get(name)
        .iter()
        .find(|s| !s.flags.contains(MethodFlags::SYNTHETIC) && s.params.len() == function.params.len())
        .map(|s| s.ret.clone())
        .ok_or_else(|| CompileError::internal(format!("signature for '{name}' not collected")))
}

fn emit_empty_ctor(cf: &mut ClassFile, access: MethodAccess) -> CompileResult<()> {
    let name = cf.name().to_string();
    let mut code = CodeBuilder::new(vec![VerifType::UninitializedThis]);
    code.load_local(0, &JvmType::reference(&name));
    code.invoke_super_init(&mut cf.pool, OBJECT, &name, &[]);
    code.ret(&JvmType::Void);
    let attr = code.finish(&mut cf.pool)?;
    cf.add_method(access, "<init>", "()V", attr);
    Ok(())
}

fn emit_default_ctor(
    cf: &mut ClassFile,
    class: &ClassDecl,
    info: &ClassInfo,
    owners: &[String],
    symbols: &Symbols,
) -> CompileResult<()> {
    let mut em = MethodEmitter::new(symbols, info, owners, false, &mut cf.pool, vec![], true)?;
    em.emit_super_init_and_fields(class, info)?;
    em.code.ret(&JvmType::Void);
    // The emitter's pool borrow must end before `cf` is borrowed again.
    let MethodEmitter { code, .. } = em;
    finish_method(cf, code, MethodAccess::PUBLIC, "<init>", "()V")
}

fn emit_ctor(
    cf: &mut ClassFile,
    class: &ClassDecl,
    ctor: &kava_ast::Constructor,
    info: &ClassInfo,
    owners: &[String],
    symbols: &Symbols,
) -> CompileResult<()> {
    let types = param_types(&ctor.params, &symbols.registry)?;
    let mut em = MethodEmitter::new(
        symbols,
        info,
        owners,
        false,
        &mut cf.pool,
        param_bindings(&ctor.params, &types),
        true,
    )?;
    em.emit_super_init_and_fields(class, info)?;
    for stmt in &ctor.body.stmts {
        em.emit_stmt(stmt)?;
    }
    if em.code.is_reachable() {
        em.code.ret(&JvmType::Void);
    }
    let descriptor = method_descriptor(&types, &JvmType::Void);
    let MethodEmitter { code, .. } = em;
    finish_method(cf, code, MethodAccess::PUBLIC, "<init>", &descriptor)
}

#[allow(clippy::too_many_arguments)]
fn emit_method_and_bridges(
    cf: &mut ClassFile,
    symbols: &Symbols,
    info: &ClassInfo,
    owners: &[String],
    name: &str,
    params: &[Param],
    ret: &JvmType,
    is_static: bool,
    body: &BlockStmt,
) -> CompileResult<()> {
    let types = param_types(params, &symbols.registry)?;
    let mut em = MethodEmitter::new(
        symbols,
        info,
        owners,
        is_static,
        &mut cf.pool,
        param_bindings(params, &types),
        false,
    )?;
    em.ret = ret.clone();
    for stmt in &body.stmts {
        em.emit_stmt(stmt)?;
    }
    if em.code.is_reachable() {
        if *ret == JvmType::Void {
            em.code.ret(&JvmType::Void);
        } else {
            return Err(CompileError::type_error(format!(
                "Missing return statement in function '{name}'"
            ))
            .at(body.span));
        }
    }
    let mut access = MethodAccess::PUBLIC;
    if is_static {
        access |= MethodAccess::STATIC;
    }
    if params.last().map(|p| p.rest).unwrap_or(false) {
        access |= MethodAccess::VARARGS;
    }
    let descriptor = method_descriptor(&types, ret);
    let MethodEmitter { code, .. } = em;
    finish_method(cf, code, access, name, &descriptor)?;
    emit_bridges(cf, symbols, info, owners, name, params, ret, is_static, false)
}

/// One synthetic forwarding method per omitted-default arity. A bridge
/// loads the arguments it has, evaluates the missing defaults, and
/// tail-calls the full signature.
#[allow(clippy::too_many_arguments)]
fn emit_bridges(
    cf: &mut ClassFile,
    symbols: &Symbols,
    info: &ClassInfo,
    owners: &[String],
    name: &str,
    params: &[Param],
    ret: &JvmType,
    is_static: bool,
    is_ctor: bool,
) -> CompileResult<()> {
    let (min, _max) = overload::validate_params(params)?;
    let types = param_types(params, &symbols.registry)?;
    let varargs = params.last().map(|p| p.rest).unwrap_or(false);
    let fixed_len = params.len() - usize::from(varargs);
    for arity in min..fixed_len {
        let mut kept: Vec<Param> = params[..arity].to_vec();
        if varargs {
            kept.push(params[params.len() - 1].clone());
        }
        let mut bridge_types: Vec<JvmType> = types[..arity].to_vec();
        if varargs {
            bridge_types.push(types[types.len() - 1].clone());
        }
        let mut em = MethodEmitter::new(
            symbols,
            info,
            owners,
            is_static,
            &mut cf.pool,
            param_bindings(&kept, &bridge_types),
            is_ctor,
        )?;
        em.ret = ret.clone();
        if !is_static {
            em.code.load_local(0, &info.ty());
        }
        for param in &kept {
            let local = em
                .locals
                .lookup(&param.name.name)
                .cloned()
                .ok_or_else(|| CompileError::internal("bridge parameter not bound"))?;
            em.code.load_local(local.slot, &local.ty);
        }
        // Defaults may reference parameters to their left.
        for (param, ty) in params[arity..fixed_len].iter().zip(&types[arity..fixed_len]) {
            let default = param.default.as_ref().ok_or_else(|| {
                CompileError::internal("non-defaulted parameter in a bridge tail")
            })?;
            em.emit_converted(default, ty)?;
        }
        if is_ctor {
            em.code
                .invoke_init(em.pool, &info.internal_name, &types);
            em.code.ret(&JvmType::Void);
        } else {
            let kind = if is_static {
                Invoke::Static
            } else {
                Invoke::Virtual
            };
            em.code
                .invoke(em.pool, kind, &info.internal_name, name, &types, ret);
            em.code.ret(ret);
        }
        let mut access = if is_ctor {
            MethodAccess::PUBLIC
        } else {
            MethodAccess::PUBLIC | MethodAccess::SYNTHETIC
        };
        if is_static {
            access |= MethodAccess::STATIC;
        }
        if varargs {
            access |= MethodAccess::VARARGS;
        }
        let descriptor = method_descriptor(&bridge_types, ret);
        let MethodEmitter { code, .. } = em;
        finish_method(cf, code, access, name, &descriptor)?;
    }
    Ok(())
}

/// `<clinit>` initializing the static fields that carry initializers.
fn emit_clinit(
    cf: &mut ClassFile,
    class: &ClassDecl,
    info: &ClassInfo,
    owners: &[String],
    symbols: &Symbols,
) -> CompileResult<()> {
    if !class
        .fields
        .iter()
        .any(|f| f.is_static && f.init.is_some())
    {
        return Ok(());
    }
    let mut em = MethodEmitter::new(symbols, info, owners, true, &mut cf.pool, vec![], false)?;
    for field in &class.fields {
        let (true, Some(init)) = (field.is_static, &field.init) else {
            continue;
        };
        let field_info = info
            .fields
            .get(&field.name.name)
            .ok_or_else(|| CompileError::internal("static field not collected"))?;
        let ty = field_info.ty.clone();
        em.emit_converted(init, &ty)?;
        em.code
            .put_field(em.pool, &info.internal_name, &field.name.name, &ty, true);
    }
    em.code.ret(&JvmType::Void);
    let MethodEmitter { code, .. } = em;
    finish_method(cf, code, MethodAccess::STATIC, "<clinit>", "()V")
}

fn param_types(params: &[Param], registry: &TypeRegistry) -> CompileResult<Vec<JvmType>> {
    params.iter().map(|p| param_type(p, registry)).collect()
}

fn param_bindings(params: &[Param], types: &[JvmType]) -> Vec<(String, JvmType)> {
    params
        .iter()
        .zip(types)
        .map(|(p, t)| (p.name.name.clone(), t.clone()))
        .collect()
}

fn finish_method(
    cf: &mut ClassFile,
    code: CodeBuilder,
    access: MethodAccess,
    name: &str,
    descriptor: &str,
) -> CompileResult<()> {
    let attr = code.finish(&mut cf.pool)?;
    cf.add_method(access, name, descriptor, attr);
    Ok(())
}

// ----- method emitter -----

struct FieldTarget {
    owner: String,
    name: String,
    ty: JvmType,
    is_static: bool,
}

/// Exception-table bookkeeping for one enclosing `try`. Finally blocks
/// replayed inline for an early exit are recorded as gaps so the
/// protected ranges skip them; a throw inside replayed cleanup belongs
/// to the outer context, not to the try already being left.
struct TryRegion {
    /// Finally-stack depth when the try was entered.
    entry_depth: usize,
    /// Index of this try's own finally on the stack, if it has one.
    owns_finally: Option<usize>,
    gaps: Vec<(u32, u32)>,
}

/// Cover `[start, end)` with `handler`, split around `gaps`. Gaps are
/// recorded in increasing pc order; empty segments are dropped.
fn add_protected_segments(
    code: &mut CodeBuilder,
    start: u32,
    end: u32,
    gaps: &[(u32, u32)],
    handler: Label,
) {
    let mut pos = start;
    for &(gap_start, gap_end) in gaps {
        if gap_end <= pos || gap_start >= end {
            continue;
        }
        if gap_start > pos {
            code.add_exception_region(pos, gap_start, handler, None);
        }
        pos = pos.max(gap_end);
    }
    if end > pos {
        code.add_exception_region(pos, end, handler, None);
    }
}

pub(crate) struct LoopCtx {
    pub(crate) label: Option<String>,
    pub(crate) break_to: Label,
    pub(crate) continue_to: Label,
    /// `false` for a switch: `continue` skips it.
    pub(crate) is_loop: bool,
    /// Depth of the finally stack when the construct was entered, so a
    /// branch out replays only the finallys it crosses.
    pub(crate) finally_depth: usize,
}

/// Lowers one method body: expressions and statements in, bytecode and
/// frame state out.
pub(crate) struct MethodEmitter<'a> {
    pub(crate) symbols: &'a Symbols,
    pub(crate) this_class: &'a ClassInfo,
    pub(crate) function_owners: &'a [String],
    pub(crate) is_static: bool,
    pub(crate) pool: &'a mut ConstantPool,
    pub(crate) code: CodeBuilder,
    pub(crate) locals: LocalSlotTable,
    pub(crate) ret: JvmType,
    pub(crate) loops: Vec<LoopCtx>,
    pub(crate) finallies: Vec<BlockStmt>,
    try_regions: Vec<TryRegion>,
}

impl<'a> MethodEmitter<'a> {
    fn new(
        symbols: &'a Symbols,
        this_class: &'a ClassInfo,
        function_owners: &'a [String],
        is_static: bool,
        pool: &'a mut ConstantPool,
        params: Vec<(String, JvmType)>,
        is_ctor: bool,
    ) -> CompileResult<Self> {
        let mut locals = LocalSlotTable::new();
        let mut verif = Vec::new();
        if !is_static {
            locals.declare("this", this_class.ty(), true)?;
            verif.push(if is_ctor {
                VerifType::UninitializedThis
            } else {
                VerifType::of(&this_class.ty())
            });
        }
        for (name, ty) in params {
            locals.declare_param(&name, ty.clone())?;
            verif.push(VerifType::of(&ty));
        }
        Ok(Self {
            symbols,
            this_class,
            function_owners,
            is_static,
            pool,
            code: CodeBuilder::new(verif),
            locals,
            ret: JvmType::Void,
            loops: Vec::new(),
            finallies: Vec::new(),
            try_regions: Vec::new(),
        })
    }

    fn env(&self, expected: Option<JvmType>) -> InferEnv<'_> {
        InferEnv {
            symbols: self.symbols,
            locals: &self.locals,
            this_class: Some(self.this_class),
            in_static: self.is_static,
            function_owners: self.function_owners,
            expected,
        }
    }

    pub(crate) fn infer(&self, expr: &Expr, expected: Option<&JvmType>) -> CompileResult<JvmType> {
        infer::infer_expr(expr, &self.env(expected.cloned())).map_err(|e| e.at(expr.span()))
    }

    /// Call `<init>` on the superclass and run the instance field
    /// initializers, in declaration order.
    fn emit_super_init_and_fields(
        &mut self,
        class: &ClassDecl,
        info: &ClassInfo,
    ) -> CompileResult<()> {
        let this_ty = info.ty();
        self.code.load_local(0, &this_ty);
        self.code
            .invoke_super_init(self.pool, OBJECT, &info.internal_name, &[]);
        for field in &class.fields {
            let (false, Some(init)) = (field.is_static, &field.init) else {
                continue;
            };
            let ty = info
                .fields
                .get(&field.name.name)
                .map(|f| f.ty.clone())
                .ok_or_else(|| CompileError::internal("field not collected"))?;
            self.code.load_local(0, &this_ty);
            self.emit_converted(init, &ty)?;
            self.code
                .put_field(self.pool, &info.internal_name, &field.name.name, &ty, false);
        }
        Ok(())
    }

    // ----- expressions -----

    /// Emit an expression, leaving its value on the stack. Returns the
    /// type of that value; the caller converts if it expected another.
    pub(crate) fn emit_expr(
        &mut self,
        expr: &Expr,
        expected: Option<&JvmType>,
    ) -> CompileResult<JvmType> {
        match expr {
            Expr::Int(lit) => match i32::try_from(lit.value) {
                Ok(v) => {
                    self.code.push_int(self.pool, v);
                    Ok(JvmType::Int)
                }
                Err(_) => {
                    self.code.push_long(self.pool, lit.value);
                    Ok(JvmType::Long)
                }
            },
            Expr::Float(lit) => {
                self.code.push_double(self.pool, lit.value);
                Ok(JvmType::Double)
            }
            Expr::Str(lit) => {
                self.code.push_string(self.pool, &lit.value);
                Ok(JvmType::string())
            }
            Expr::Bool(lit) => {
                self.code.push_int(self.pool, i32::from(lit.value));
                Ok(JvmType::Boolean)
            }
            Expr::Null(_) => {
                self.code.push_null();
                match expected {
                    Some(t) if t.is_reference() => Ok(t.clone()),
                    _ => Ok(JvmType::object()),
                }
            }
            Expr::Regex(lit) => {
                let translated = regex::translate(lit)?;
                self.code.push_string(self.pool, &translated.body);
                if translated.flags.is_empty() {
                    self.code.invoke(
                        self.pool,
                        Invoke::Static,
                        PATTERN,
                        "compile",
                        &[JvmType::string()],
                        &JvmType::reference(PATTERN),
                    );
                } else {
                    self.code.push_int(self.pool, translated.flags.bits());
                    self.code.invoke(
                        self.pool,
                        Invoke::Static,
                        PATTERN,
                        "compile",
                        &[JvmType::string(), JvmType::Int],
                        &JvmType::reference(PATTERN),
                    );
                }
                Ok(JvmType::reference(PATTERN))
            }
            Expr::Ident(id) => match self.locals.lookup(&id.name).cloned() {
                Some(local) => {
                    self.code.load_local(local.slot, &local.ty);
                    Ok(local.ty)
                }
                None => match self.infer(expr, expected) {
                    Err(e) => Err(e),
                    Ok(_) => Err(CompileError::internal(format!(
                        "identifier '{}' inferred without a local",
                        id.name
                    ))),
                },
            },
            Expr::This(span) => {
                if self.is_static {
                    return Err(CompileError::type_error(
                        "'this' is not available in a static context",
                    )
                    .at(*span));
                }
                let ty = self.this_class.ty();
                self.code.load_local(0, &ty);
                Ok(ty)
            }
            Expr::Array(lit) => {
                let list_ty = JvmType::array_list();
                self.code.new_object(self.pool, ARRAY_LIST);
                self.code.dup(&list_ty);
                self.code.invoke_init(self.pool, ARRAY_LIST, &[]);
                for element in &lit.elements {
                    self.code.dup(&list_ty);
                    let ty = self.emit_expr(element, Some(&JvmType::object()))?;
                    self.convert_value(&ty, &JvmType::object(), element.span())?;
                    self.code.invoke(
                        self.pool,
                        Invoke::Virtual,
                        ARRAY_LIST,
                        "add",
                        &[JvmType::object()],
                        &JvmType::Boolean,
                    );
                    self.code.pop_value(&JvmType::Boolean);
                }
                Ok(list_ty)
            }
            Expr::Object(lit) => {
                let plan = literal::plan_object_literal(lit)?;
                self.emit_object_plan(&plan)
            }
            Expr::Unary(unary) => self.emit_unary(unary),
            Expr::Update(update) => self.emit_update(update, true),
            Expr::Binary(binary) => self.emit_binary(binary),
            Expr::Assign(assign) => self.emit_assign(assign, true),
            Expr::Cond(cond) => {
                let cons_ty = self.infer(&cond.cons, expected)?;
                let alt_ty = self.infer(&cond.alt, expected)?;
                let result = infer::merge_types(&cons_ty, &alt_ty).map_err(|e| e.at(cond.span))?;
                let l_else = self.code.new_label();
                let l_end = self.code.new_label();
                self.emit_converted(&cond.test, &JvmType::Boolean)?;
                self.code.jump_if(Cond::Eq, l_else);
                self.emit_converted(&cond.cons, &result)?;
                self.code.goto(l_end);
                self.code.bind(l_else);
                self.emit_converted(&cond.alt, &result)?;
                self.code.bind(l_end);
                Ok(result)
            }
            Expr::Call(call) => self.emit_call(call),
            Expr::New(new) => self.emit_new(new),
            Expr::Member(member) => self.emit_member(member),
            Expr::Index(index) => self.emit_index_read(index),
            Expr::Paren(paren) => self.emit_expr(&paren.expr, expected),
        }
    }

    /// Emit an expression and convert it to exactly `target`.
    pub(crate) fn emit_converted(&mut self, expr: &Expr, target: &JvmType) -> CompileResult<()> {
        let ty = self.emit_expr(expr, Some(target))?;
        self.convert_value(&ty, target, expr.span())
    }

    fn emit_unary(&mut self, unary: &kava_ast::UnaryExpr) -> CompileResult<JvmType> {
        let operand = self.infer(&unary.arg, None)?;
        match unary.op {
            UnaryOp::Plus => {
                let result = infer::promote(&operand);
                self.emit_converted(&unary.arg, &result)?;
                Ok(result)
            }
            UnaryOp::Minus => {
                let result = infer::promote(&operand);
                self.emit_converted(&unary.arg, &result)?;
                self.code.neg(&result);
                Ok(result)
            }
            UnaryOp::Not => {
                self.emit_converted(&unary.arg, &JvmType::Boolean)?;
                self.code.push_int(self.pool, 1);
                self.code.bit_xor(&JvmType::Int);
                Ok(JvmType::Boolean)
            }
            UnaryOp::Tilde => {
                let result = infer::promote(&operand);
                self.emit_converted(&unary.arg, &result)?;
                if result == JvmType::Long {
                    self.code.push_long(self.pool, -1);
                } else {
                    self.code.push_int(self.pool, -1);
                }
                self.code.bit_xor(&result);
                Ok(result)
            }
        }
    }

    fn emit_binary(&mut self, binary: &BinExpr) -> CompileResult<JvmType> {
        let lhs = self.infer(&binary.left, None)?;
        let rhs = self.infer(&binary.right, None)?;
        let op_err = || {
            CompileError::type_error(format!(
                "Operator {} is not defined for {lhs} and {rhs}",
                binary.op.as_str()
            ))
            .at(binary.span)
        };
        match binary.op {
            BinaryOp::Add if lhs.is_string() || rhs.is_string() => self.emit_concat(binary),
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let result = crate::types::widen(&lhs, &rhs).ok_or_else(op_err)?;
                self.emit_converted(&binary.left, &result)?;
                self.emit_converted(&binary.right, &result)?;
                match binary.op {
                    BinaryOp::Add => self.code.add(&result),
                    BinaryOp::Sub => self.code.sub(&result),
                    BinaryOp::Mul => self.code.mul(&result),
                    BinaryOp::Div => self.code.div(&result),
                    _ => self.code.rem(&result),
                }
                Ok(result)
            }
            BinaryOp::Exp => {
                self.emit_converted(&binary.left, &JvmType::Double)?;
                self.emit_converted(&binary.right, &JvmType::Double)?;
                self.code.invoke(
                    self.pool,
                    Invoke::Static,
                    "java/lang/Math",
                    "pow",
                    &[JvmType::Double, JvmType::Double],
                    &JvmType::Double,
                );
                Ok(JvmType::Double)
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                let result = if lhs == JvmType::Boolean && rhs == JvmType::Boolean {
                    JvmType::Boolean
                } else if lhs.is_integral() && rhs.is_integral() {
                    crate::types::widen(&lhs, &rhs).ok_or_else(op_err)?
                } else {
                    return Err(op_err());
                };
                let op_ty = if result == JvmType::Boolean {
                    JvmType::Int
                } else {
                    result.clone()
                };
                self.emit_converted(&binary.left, &op_ty)?;
                self.emit_converted(&binary.right, &op_ty)?;
                match binary.op {
                    BinaryOp::BitAnd => self.code.bit_and(&op_ty),
                    BinaryOp::BitOr => self.code.bit_or(&op_ty),
                    _ => self.code.bit_xor(&op_ty),
                }
                Ok(result)
            }
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr => {
                if !lhs.is_integral() || !rhs.is_integral() {
                    return Err(op_err());
                }
                let result = infer::promote(&lhs);
                self.emit_converted(&binary.left, &result)?;
                self.emit_converted(&binary.right, &JvmType::Int)?;
                match binary.op {
                    BinaryOp::Shl => self.code.shl(&result),
                    BinaryOp::Shr => self.code.shr(&result),
                    _ => self.code.ushr(&result),
                }
                Ok(result)
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt
            | BinaryOp::Ge => self.emit_comparison(binary, &lhs, &rhs),
            BinaryOp::And => {
                let l_false = self.code.new_label();
                let l_end = self.code.new_label();
                self.emit_converted(&binary.left, &JvmType::Boolean)?;
                self.code.jump_if(Cond::Eq, l_false);
                self.emit_converted(&binary.right, &JvmType::Boolean)?;
                self.code.goto(l_end);
                self.code.bind(l_false);
                self.code.push_int(self.pool, 0);
                self.code.bind(l_end);
                Ok(JvmType::Boolean)
            }
            BinaryOp::Or => {
                let l_true = self.code.new_label();
                let l_end = self.code.new_label();
                self.emit_converted(&binary.left, &JvmType::Boolean)?;
                self.code.jump_if(Cond::Ne, l_true);
                self.emit_converted(&binary.right, &JvmType::Boolean)?;
                self.code.goto(l_end);
                self.code.bind(l_true);
                self.code.push_int(self.pool, 1);
                self.code.bind(l_end);
                Ok(JvmType::Boolean)
            }
        }
    }

    fn emit_comparison(
        &mut self,
        binary: &BinExpr,
        lhs: &JvmType,
        rhs: &JvmType,
    ) -> CompileResult<JvmType> {
        let cond = match binary.op {
            BinaryOp::Eq => Cond::Eq,
            BinaryOp::Ne => Cond::Ne,
            BinaryOp::Lt => Cond::Lt,
            BinaryOp::Le => Cond::Le,
            BinaryOp::Gt => Cond::Gt,
            _ => Cond::Ge,
        };
        let equality = matches!(binary.op, BinaryOp::Eq | BinaryOp::Ne);
        if lhs.is_numeric() && rhs.is_numeric() {
            let wide = crate::types::widen(lhs, rhs).ok_or_else(|| {
                CompileError::type_error(format!(
                    "Operator {} is not defined for {lhs} and {rhs}",
                    binary.op.as_str()
                ))
                .at(binary.span)
            })?;
            self.emit_converted(&binary.left, &wide)?;
            self.emit_converted(&binary.right, &wide)?;
            if wide == JvmType::Int {
                return self.bool_from(|em, l| em.code.jump_if_icmp(cond, l));
            }
            self.code.compare(&wide);
            return self.bool_from(|em, l| em.code.jump_if(cond, l));
        }
        if *lhs == JvmType::Boolean && *rhs == JvmType::Boolean && equality {
            self.emit_converted(&binary.left, &JvmType::Boolean)?;
            self.emit_converted(&binary.right, &JvmType::Boolean)?;
            return self.bool_from(|em, l| em.code.jump_if_icmp(cond, l));
        }
        if lhs.is_reference() && rhs.is_reference() && equality {
            if lhs.is_string() && rhs.is_string() {
                // Strings compare by content.
                self.emit_expr(&binary.left, None)?;
                self.emit_expr(&binary.right, None)?;
                self.code.invoke(
                    self.pool,
                    Invoke::Virtual,
                    STRING,
                    "equals",
                    &[JvmType::object()],
                    &JvmType::Boolean,
                );
                if binary.op == BinaryOp::Ne {
                    self.code.push_int(self.pool, 1);
                    self.code.bit_xor(&JvmType::Int);
                }
                return Ok(JvmType::Boolean);
            }
            self.emit_expr(&binary.left, None)?;
            self.emit_expr(&binary.right, None)?;
            return self.bool_from(|em, l| em.code.jump_if_acmp(binary.op == BinaryOp::Eq, l));
        }
        Err(CompileError::type_error(format!(
            "Operator {} is not defined for {lhs} and {rhs}",
            binary.op.as_str()
        ))
        .at(binary.span))
    }

    /// Materialize a boolean from a jump-if-true emitter.
    fn bool_from(
        &mut self,
        jump_true: impl FnOnce(&mut Self, Label),
    ) -> CompileResult<JvmType> {
        let l_true = self.code.new_label();
        let l_end = self.code.new_label();
        jump_true(self, l_true);
        self.code.push_int(self.pool, 0);
        self.code.goto(l_end);
        self.code.bind(l_true);
        self.code.push_int(self.pool, 1);
        self.code.bind(l_end);
        Ok(JvmType::Boolean)
    }

    /// String concatenation through one StringBuilder. A chain of `+`
    /// whose result is a string flattens into a single builder.
    fn emit_concat(&mut self, binary: &BinExpr) -> CompileResult<JvmType> {
        let sb_ty = JvmType::reference(STRING_BUILDER);
        self.code.new_object(self.pool, STRING_BUILDER);
        self.code.dup(&sb_ty);
        self.code.invoke_init(self.pool, STRING_BUILDER, &[]);
        self.append_concat_operand(&binary.left)?;
        self.append_concat_operand(&binary.right)?;
        self.code.invoke(
            self.pool,
            Invoke::Virtual,
            STRING_BUILDER,
            "toString",
            &[],
            &JvmType::string(),
        );
        Ok(JvmType::string())
    }

    fn append_concat_operand(&mut self, expr: &Expr) -> CompileResult<()> {
        if let Expr::Binary(inner) = expr.unparenthesized() {
            if inner.op == BinaryOp::Add && self.infer(expr, None)?.is_string() {
                self.append_concat_operand(&inner.left)?;
                self.append_concat_operand(&inner.right)?;
                return Ok(());
            }
        }
        let ty = self.emit_expr(expr, None)?;
        self.sb_append(&ty);
        Ok(())
    }

    fn sb_append(&mut self, ty: &JvmType) {
        let param = match ty {
            t if t.is_string() => JvmType::string(),
            JvmType::Byte | JvmType::Short | JvmType::Int => JvmType::Int,
            JvmType::Long | JvmType::Float | JvmType::Double | JvmType::Boolean | JvmType::Char => {
                ty.clone()
            }
            _ => JvmType::object(),
        };
        if param == JvmType::Int && *ty != JvmType::Int {
            self.code.convert(ty, &JvmType::Int);
        }
        self.code.invoke(
            self.pool,
            Invoke::Virtual,
            STRING_BUILDER,
            "append",
            &[param],
            &JvmType::reference(STRING_BUILDER),
        );
    }

    fn emit_object_plan(&mut self, entries: &[PlannedEntry]) -> CompileResult<JvmType> {
        let map_ty = JvmType::linked_hash_map();
        self.code.new_object(self.pool, LINKED_HASH_MAP);
        self.code.dup(&map_ty);
        self.code.invoke_init(self.pool, LINKED_HASH_MAP, &[]);
        for entry in entries {
            match entry {
                PlannedEntry::Put { key, value } => {
                    self.code.dup(&map_ty);
                    match key {
                        PlannedKey::Static(name) => self.code.push_string(self.pool, name),
                        PlannedKey::Computed(expr) => {
                            let ty = self.emit_expr(expr, None)?;
                            self.stringify(&ty);
                        }
                    }
                    let ty = self.emit_expr(value, Some(&JvmType::object()))?;
                    self.convert_value(&ty, &JvmType::object(), value.span())?;
                    self.code.invoke(
                        self.pool,
                        Invoke::Virtual,
                        LINKED_HASH_MAP,
                        "put",
                        &[JvmType::object(), JvmType::object()],
                        &JvmType::object(),
                    );
                    self.code.pop_value(&JvmType::object());
                }
                PlannedEntry::PutAll(expr) => {
                    let ty = self.infer(expr, None)?;
                    if !matches!(&ty, JvmType::Reference(n) if n == LINKED_HASH_MAP || n == MAP) {
                        return Err(CompileError::type_error(format!(
                            "Cannot spread a value of type {ty}"
                        ))
                        .at(expr.span()));
                    }
                    self.code.dup(&map_ty);
                    self.emit_expr(expr, None)?;
                    self.code.invoke(
                        self.pool,
                        Invoke::Virtual,
                        LINKED_HASH_MAP,
                        "putAll",
                        &[JvmType::reference(MAP)],
                        &JvmType::Void,
                    );
                }
            }
        }
        Ok(map_ty)
    }

    /// Convert the stack top to a `String` via `String.valueOf`.
    fn stringify(&mut self, ty: &JvmType) {
        if ty.is_string() {
            return;
        }
        let param = match ty {
            JvmType::Byte | JvmType::Short | JvmType::Int => {
                if *ty != JvmType::Int {
                    self.code.convert(ty, &JvmType::Int);
                }
                JvmType::Int
            }
            JvmType::Long | JvmType::Float | JvmType::Double | JvmType::Boolean | JvmType::Char => {
                ty.clone()
            }
            _ => JvmType::object(),
        };
        self.code.invoke(
            self.pool,
            Invoke::Static,
            STRING,
            "valueOf",
            &[param],
            &JvmType::string(),
        );
    }

    fn emit_call(&mut self, call: &CallExpr) -> CompileResult<JvmType> {
        let resolved = infer::resolve_call(call, &self.env(None)).map_err(|e| e.at(call.span))?;
        match resolved.kind {
            CallKind::Static => {
                self.emit_args(&call.args, &resolved.sig)?;
                self.code.invoke(
                    self.pool,
                    Invoke::Static,
                    &resolved.sig.owner,
                    &resolved.sig.name,
                    &resolved.sig.params,
                    &resolved.sig.ret,
                );
            }
            CallKind::Instance => {
                match call.callee.unparenthesized() {
                    Expr::Member(member) => {
                        self.emit_expr(&member.obj, None)?;
                    }
                    Expr::Ident(_) => {
                        if self.is_static {
                            return Err(CompileError::type_error(format!(
                                "Cannot call instance method '{}' from a static context",
                                resolved.sig.name
                            ))
                            .at(call.span));
                        }
                        let ty = self.this_class.ty();
                        self.code.load_local(0, &ty);
                    }
                    other => {
                        return Err(CompileError::unsupported(format!(
                            "Unsupported call target at {}",
                            other.span()
                        )));
                    }
                }
                self.emit_args(&call.args, &resolved.sig)?;
                self.code.invoke(
                    self.pool,
                    Invoke::Virtual,
                    &resolved.sig.owner,
                    &resolved.sig.name,
                    &resolved.sig.params,
                    &resolved.sig.ret,
                );
            }
            CallKind::Constructor => {
                return Err(CompileError::internal("constructor resolved as a call"));
            }
        }
        Ok(resolved.sig.ret)
    }

    /// Emit arguments converted to the parameter types, packing trailing
    /// arguments into an array for a varargs signature.
    fn emit_args(&mut self, args: &[Expr], sig: &MethodSignature) -> CompileResult<()> {
        if !sig.flags.contains(MethodFlags::VARARGS) {
            for (arg, param) in args.iter().zip(&sig.params) {
                self.emit_converted(arg, param)?;
            }
            return Ok(());
        }
        let fixed = sig.params.len() - 1;
        for (arg, param) in args.iter().take(fixed).zip(&sig.params) {
            self.emit_converted(arg, param)?;
        }
        let array_ty = sig.params[fixed].clone();
        let JvmType::Array(elem) = &array_ty else {
            return Err(CompileError::internal("varargs tail is not an array"));
        };
        let JvmType::Reference(elem_name) = elem.as_ref() else {
            return Err(CompileError::internal("varargs element is not a reference"));
        };
        let elem_name = elem_name.clone();
        let elem_ty = (**elem).clone();
        self.code.push_int(self.pool, (args.len() - fixed) as i32);
        self.code.anewarray(self.pool, &elem_name);
        for (i, arg) in args[fixed..].iter().enumerate() {
            self.code.dup(&array_ty);
            self.code.push_int(self.pool, i as i32);
            self.emit_converted(arg, &elem_ty)?;
            self.code.array_store_ref();
        }
        Ok(())
    }

    fn emit_new(&mut self, new: &NewExpr) -> CompileResult<JvmType> {
        let symbols = self.symbols;
        let class = symbols.class_by_source(&new.class.name).ok_or_else(|| {
            CompileError::type_error(format!("Unknown type: {}", new.class.name)).at(new.span)
        })?;
        if class.is_enum {
            return Err(CompileError::type_error(format!(
                "Enum '{}' cannot be instantiated",
                new.class.name
            ))
            .at(new.span));
        }
        let mut arg_types = Vec::with_capacity(new.args.len());
        for arg in &new.args {
            arg_types.push(self.infer(arg, None)?);
        }
        let resolved = infer::resolve_ctor(class, arg_types).map_err(|e| e.at(new.span))?;
        let ty = class.ty();
        self.code.new_object(self.pool, &class.internal_name);
        self.code.dup(&ty);
        self.emit_args(&new.args, &resolved.sig)?;
        self.code
            .invoke_init(self.pool, &class.internal_name, &resolved.sig.params);
        Ok(ty)
    }

    fn emit_member(&mut self, member: &MemberExpr) -> CompileResult<JvmType> {
        let symbols = self.symbols;
        if let Expr::Ident(obj) = member.obj.unparenthesized() {
            if self.locals.lookup(&obj.name).is_none() {
                if let Some(class) = symbols.class_by_source(&obj.name) {
                    if class.is_enum && class.enum_member(&member.prop.name).is_some() {
                        let ty = class.ty();
                        self.code.get_field(
                            self.pool,
                            &class.internal_name,
                            &enums::constant_field_name(&member.prop.name),
                            &ty,
                            true,
                        );
                        return Ok(ty);
                    }
                    if let Some(field) = class.fields.get(&member.prop.name) {
                        if field.is_static {
                            self.code.get_field(
                                self.pool,
                                &class.internal_name,
                                &member.prop.name,
                                &field.ty,
                                true,
                            );
                            return Ok(field.ty.clone());
                        }
                    }
                    return Err(CompileError::type_error(format!(
                        "Class '{}' has no static member '{}'",
                        obj.name, member.prop.name
                    ))
                    .at(member.span));
                }
            }
        }
        let obj_ty = self.infer(&member.obj, None)?;
        let prop = member.prop.name.as_str();
        match &obj_ty {
            JvmType::Reference(name) if name == STRING && prop == "length" => {
                self.emit_expr(&member.obj, None)?;
                self.code
                    .invoke(self.pool, Invoke::Virtual, STRING, "length", &[], &JvmType::Int);
                Ok(JvmType::Int)
            }
            JvmType::Reference(name)
                if (name == ARRAY_LIST || name == LIST || name == LINKED_HASH_MAP || name == MAP)
                    && prop == "length" =>
            {
                self.emit_expr(&member.obj, None)?;
                let (kind, owner) = if name == LIST || name == MAP {
                    (Invoke::Interface, name.as_str())
                } else {
                    (Invoke::Virtual, name.as_str())
                };
                self.code
                    .invoke(self.pool, kind, owner, "size", &[], &JvmType::Int);
                Ok(JvmType::Int)
            }
            JvmType::Reference(name) => {
                let class = symbols.class(name).ok_or_else(|| {
                    CompileError::type_error(format!("Type {obj_ty} has no member '{prop}'"))
                        .at(member.span)
                })?;
                match class.fields.get(prop) {
                    Some(field) if !field.is_static => {
                        let owner = class.internal_name.clone();
                        let ty = field.ty.clone();
                        self.emit_expr(&member.obj, None)?;
                        self.code.get_field(self.pool, &owner, prop, &ty, false);
                        Ok(ty)
                    }
                    _ => Err(CompileError::type_error(format!(
                        "Type {} has no member '{prop}'",
                        class.source_name
                    ))
                    .at(member.span)),
                }
            }
            other => Err(CompileError::type_error(format!(
                "Type {other} has no member '{prop}'"
            ))
            .at(member.span)),
        }
    }

    fn emit_index_read(&mut self, index: &kava_ast::IndexExpr) -> CompileResult<JvmType> {
        let obj_ty = self.infer(&index.obj, None)?;
        match &obj_ty {
            JvmType::Reference(name) if name == ARRAY_LIST || name == LIST => {
                let (kind, owner) = if name == LIST {
                    (Invoke::Interface, LIST)
                } else {
                    (Invoke::Virtual, ARRAY_LIST)
                };
                self.emit_expr(&index.obj, None)?;
                self.emit_converted(&index.index, &JvmType::Int)?;
                self.code.invoke(
                    self.pool,
                    kind,
                    owner,
                    "get",
                    &[JvmType::Int],
                    &JvmType::object(),
                );
                Ok(JvmType::object())
            }
            JvmType::Reference(name) if name == LINKED_HASH_MAP || name == MAP => {
                let (kind, owner) = if name == MAP {
                    (Invoke::Interface, MAP)
                } else {
                    (Invoke::Virtual, LINKED_HASH_MAP)
                };
                self.emit_expr(&index.obj, None)?;
                let key_ty = self.emit_expr(&index.index, None)?;
                self.stringify(&key_ty);
                self.code.invoke(
                    self.pool,
                    kind,
                    owner,
                    "get",
                    &[JvmType::object()],
                    &JvmType::object(),
                );
                Ok(JvmType::object())
            }
            t if t.is_string() => {
                self.emit_expr(&index.obj, None)?;
                self.emit_converted(&index.index, &JvmType::Int)?;
                self.code.invoke(
                    self.pool,
                    Invoke::Virtual,
                    STRING,
                    "charAt",
                    &[JvmType::Int],
                    &JvmType::Char,
                );
                self.code.invoke(
                    self.pool,
                    Invoke::Static,
                    STRING,
                    "valueOf",
                    &[JvmType::Char],
                    &JvmType::string(),
                );
                Ok(JvmType::string())
            }
            other => Err(CompileError::type_error(format!(
                "Cannot index a value of type {other}"
            ))
            .at(index.span)),
        }
    }

    fn emit_update(&mut self, update: &UpdateExpr, want_value: bool) -> CompileResult<JvmType> {
        let delta: i16 = if update.op == UpdateOp::Inc { 1 } else { -1 };
        match update.arg.unparenthesized() {
            Expr::Ident(id) => {
                let local = self.locals.lookup(&id.name).cloned().ok_or_else(|| {
                    CompileError::type_error(format!("Undefined variable: {}", id.name))
                        .at(id.span)
                })?;
                if local.is_const {
                    return Err(CompileError::type_error(format!(
                        "Cannot assign to constant '{}'",
                        id.name
                    ))
                    .at(id.span));
                }
                if !local.ty.is_numeric() {
                    return Err(CompileError::type_error(format!(
                        "Update operator requires a numeric variable, got {}",
                        local.ty
                    ))
                    .at(update.span));
                }
                if local.ty == JvmType::Int {
                    if !want_value {
                        self.code.iinc(local.slot, delta);
                    } else if update.prefix {
                        self.code.iinc(local.slot, delta);
                        self.code.load_local(local.slot, &local.ty);
                    } else {
                        self.code.load_local(local.slot, &local.ty);
                        self.code.iinc(local.slot, delta);
                    }
                    return Ok(JvmType::Int);
                }
                self.code.load_local(local.slot, &local.ty);
                if want_value && !update.prefix {
                    self.code.dup(&local.ty);
                }
                self.push_one(&local.ty);
                if delta > 0 {
                    self.code.add(&local.ty);
                } else {
                    self.code.sub(&local.ty);
                }
                if want_value && update.prefix {
                    self.code.dup(&local.ty);
                }
                self.code.store_local(local.slot, &local.ty);
                Ok(local.ty)
            }
            Expr::Member(member) => {
                let target = self.field_target(member)?;
                if !target.ty.is_numeric() {
                    return Err(CompileError::type_error(format!(
                        "Update operator requires a numeric variable, got {}",
                        target.ty
                    ))
                    .at(update.span));
                }
                if target.is_static {
                    self.code
                        .get_field(self.pool, &target.owner, &target.name, &target.ty, true);
                    if want_value && !update.prefix {
                        self.code.dup(&target.ty);
                    }
                    self.push_one(&target.ty);
                    if delta > 0 {
                        self.code.add(&target.ty);
                    } else {
                        self.code.sub(&target.ty);
                    }
                    if want_value && update.prefix {
                        self.code.dup(&target.ty);
                    }
                    self.code
                        .put_field(self.pool, &target.owner, &target.name, &target.ty, true);
                } else {
                    self.emit_expr(&member.obj, None)?;
                    self.code.dup(&JvmType::reference(&target.owner));
                    self.code
                        .get_field(self.pool, &target.owner, &target.name, &target.ty, false);
                    if want_value && !update.prefix {
                        self.code.dup_under(&target.ty);
                    }
                    self.push_one(&target.ty);
                    if delta > 0 {
                        self.code.add(&target.ty);
                    } else {
                        self.code.sub(&target.ty);
                    }
                    if want_value && update.prefix {
                        self.code.dup_under(&target.ty);
                    }
                    self.code
                        .put_field(self.pool, &target.owner, &target.name, &target.ty, false);
                }
                Ok(target.ty)
            }
            other => Err(CompileError::unsupported(format!(
                "Unsupported update target at {}",
                other.span()
            ))),
        }
    }

    fn push_one(&mut self, ty: &JvmType) {
        match ty {
            JvmType::Long => self.code.push_long(self.pool, 1),
            JvmType::Float => self.code.push_float(self.pool, 1.0),
            JvmType::Double => self.code.push_double(self.pool, 1.0),
            _ => self.code.push_int(self.pool, 1),
        }
    }

    fn emit_assign(&mut self, assign: &AssignExpr, want_value: bool) -> CompileResult<JvmType> {
        match assign.target.unparenthesized() {
            Expr::Ident(id) => {
                let local = self.locals.lookup(&id.name).cloned().ok_or_else(|| {
                    CompileError::type_error(format!("Undefined variable: {}", id.name))
                        .at(id.span)
                })?;
                if local.is_const {
                    return Err(CompileError::type_error(format!(
                        "Cannot assign to constant '{}'",
                        id.name
                    ))
                    .at(id.span));
                }
                if assign.op == AssignOp::Assign {
                    self.emit_converted(&assign.value, &local.ty)?;
                } else {
                    self.code.load_local(local.slot, &local.ty);
                    self.apply_compound(&local.ty, assign.op, &assign.value, assign.span)?;
                }
                if want_value {
                    self.code.dup(&local.ty);
                }
                self.code.store_local(local.slot, &local.ty);
                Ok(local.ty)
            }
            Expr::Member(member) => {
                let target = self.field_target(member)?;
                if target.is_static {
                    if assign.op == AssignOp::Assign {
                        self.emit_converted(&assign.value, &target.ty)?;
                    } else {
                        self.code
                            .get_field(self.pool, &target.owner, &target.name, &target.ty, true);
                        self.apply_compound(&target.ty, assign.op, &assign.value, assign.span)?;
                    }
                    if want_value {
                        self.code.dup(&target.ty);
                    }
                    self.code
                        .put_field(self.pool, &target.owner, &target.name, &target.ty, true);
                } else {
                    self.emit_expr(&member.obj, None)?;
                    if assign.op == AssignOp::Assign {
                        self.emit_converted(&assign.value, &target.ty)?;
                    } else {
                        self.code.dup(&JvmType::reference(&target.owner));
                        self.code
                            .get_field(self.pool, &target.owner, &target.name, &target.ty, false);
                        self.apply_compound(&target.ty, assign.op, &assign.value, assign.span)?;
                    }
                    if want_value {
                        self.code.dup_under(&target.ty);
                    }
                    self.code
                        .put_field(self.pool, &target.owner, &target.name, &target.ty, false);
                }
                Ok(target.ty)
            }
            Expr::Index(index) => {
                if assign.op != AssignOp::Assign {
                    return Err(CompileError::unsupported(
                        "Compound assignment is not supported on index targets",
                    )
                    .at(assign.span));
                }
                self.emit_index_write(index, &assign.value, want_value)
            }
            other => Err(CompileError::type_error(format!(
                "Invalid assignment target at {}",
                other.span()
            ))),
        }
    }

    /// With the current value on the stack, fold in the right-hand side
    /// of a compound assignment. Result has the target's type.
    fn apply_compound(
        &mut self,
        ty: &JvmType,
        op: AssignOp,
        value: &Expr,
        span: Span,
    ) -> CompileResult<()> {
        if ty.is_string() {
            if op != AssignOp::AddAssign {
                return Err(CompileError::type_error(format!(
                    "Compound operator is not defined for {ty}"
                ))
                .at(span));
            }
            let sb_ty = JvmType::reference(STRING_BUILDER);
            self.code.new_object(self.pool, STRING_BUILDER);
            self.code.dup(&sb_ty);
            self.code.invoke_init(self.pool, STRING_BUILDER, &[]);
            self.code.swap();
            self.sb_append(&JvmType::string());
            self.append_concat_operand(value)?;
            self.code.invoke(
                self.pool,
                Invoke::Virtual,
                STRING_BUILDER,
                "toString",
                &[],
                &JvmType::string(),
            );
            return Ok(());
        }
        if !ty.is_numeric() {
            return Err(CompileError::type_error(format!(
                "Compound operator is not defined for {ty}"
            ))
            .at(span));
        }
        self.emit_converted(value, ty)?;
        match op {
            AssignOp::AddAssign => self.code.add(ty),
            AssignOp::SubAssign => self.code.sub(ty),
            AssignOp::MulAssign => self.code.mul(ty),
            AssignOp::DivAssign => self.code.div(ty),
            AssignOp::ModAssign => self.code.rem(ty),
            AssignOp::Assign => {
                return Err(CompileError::internal("plain assign in compound path"));
            }
        }
        Ok(())
    }

    fn emit_index_write(
        &mut self,
        index: &kava_ast::IndexExpr,
        value: &Expr,
        want_value: bool,
    ) -> CompileResult<JvmType> {
        let obj_ty = self.infer(&index.obj, None)?;
        self.locals.enter_scope();
        let result = match &obj_ty {
            JvmType::Reference(name) if name == ARRAY_LIST || name == LIST => {
                let (kind, owner) = if name == LIST {
                    (Invoke::Interface, LIST)
                } else {
                    (Invoke::Virtual, ARRAY_LIST)
                };
                self.emit_expr(&index.obj, None)?;
                self.emit_converted(&index.index, &JvmType::Int)?;
                let ty = self.emit_expr(value, Some(&JvmType::object()))?;
                self.convert_value(&ty, &JvmType::object(), value.span())?;
                let value_slot = self.store_want_value(want_value)?;
                self.code.invoke(
                    self.pool,
                    kind,
                    owner,
                    "set",
                    &[JvmType::Int, JvmType::object()],
                    &JvmType::object(),
                );
                self.code.pop_value(&JvmType::object());
                self.load_want_value(value_slot);
                Ok(JvmType::object())
            }
            JvmType::Reference(name) if name == LINKED_HASH_MAP || name == MAP => {
                let (kind, owner) = if name == MAP {
                    (Invoke::Interface, MAP)
                } else {
                    (Invoke::Virtual, LINKED_HASH_MAP)
                };
                self.emit_expr(&index.obj, None)?;
                let key_ty = self.emit_expr(&index.index, None)?;
                self.stringify(&key_ty);
                let ty = self.emit_expr(value, Some(&JvmType::object()))?;
                self.convert_value(&ty, &JvmType::object(), value.span())?;
                let value_slot = self.store_want_value(want_value)?;
                self.code.invoke(
                    self.pool,
                    kind,
                    owner,
                    "put",
                    &[JvmType::object(), JvmType::object()],
                    &JvmType::object(),
                );
                self.code.pop_value(&JvmType::object());
                self.load_want_value(value_slot);
                Ok(JvmType::object())
            }
            other => Err(CompileError::type_error(format!(
                "Cannot assign into a value of type {other}"
            ))
            .at(index.span)),
        };
        let freed = self.locals.exit_scope();
        self.code.retire_locals(freed);
        result
    }

    /// Park the assigned value in a temp so it survives the collection
    /// call and can be reloaded as the expression result.
    fn store_want_value(&mut self, want_value: bool) -> CompileResult<Option<u16>> {
        if !want_value {
            return Ok(None);
        }
        let slot = self.locals.declare_temp(&JvmType::object())?;
        self.code.dup(&JvmType::object());
        self.code.store_local(slot, &JvmType::object());
        Ok(Some(slot))
    }

    fn load_want_value(&mut self, slot: Option<u16>) {
        if let Some(slot) = slot {
            self.code.load_local(slot, &JvmType::object());
        }
    }

    /// Resolve a member expression to an assignable field.
    fn field_target(&mut self, member: &MemberExpr) -> CompileResult<FieldTarget> {
        let symbols = self.symbols;
        if let Expr::Ident(obj) = member.obj.unparenthesized() {
            if self.locals.lookup(&obj.name).is_none() {
                let class = symbols.class_by_source(&obj.name).ok_or_else(|| {
                    CompileError::type_error(format!("Undefined variable: {}", obj.name))
                        .at(obj.span)
                })?;
                let field = class.fields.get(&member.prop.name).ok_or_else(|| {
                    CompileError::type_error(format!(
                        "Class '{}' has no static member '{}'",
                        obj.name, member.prop.name
                    ))
                    .at(member.span)
                })?;
                if !field.is_static {
                    return Err(CompileError::type_error(format!(
                        "Cannot access instance field '{}' without an instance of {}",
                        member.prop.name, obj.name
                    ))
                    .at(member.span));
                }
                return Ok(FieldTarget {
                    owner: class.internal_name.clone(),
                    name: member.prop.name.clone(),
                    ty: field.ty.clone(),
                    is_static: true,
                });
            }
        }
        let obj_ty = self.infer(&member.obj, None)?;
        let JvmType::Reference(name) = &obj_ty else {
            return Err(CompileError::type_error(format!(
                "Type {obj_ty} has no member '{}'",
                member.prop.name
            ))
            .at(member.span));
        };
        let class = symbols.class(name).ok_or_else(|| {
            CompileError::type_error(format!(
                "Type {obj_ty} has no member '{}'",
                member.prop.name
            ))
            .at(member.span)
        })?;
        let field = class.fields.get(&member.prop.name).ok_or_else(|| {
            CompileError::type_error(format!(
                "Type {} has no member '{}'",
                class.source_name, member.prop.name
            ))
            .at(member.span)
        })?;
        if field.is_static {
            return Err(CompileError::type_error(format!(
                "Static field '{}' must be accessed through the class name",
                member.prop.name
            ))
            .at(member.span));
        }
        Ok(FieldTarget {
            owner: class.internal_name.clone(),
            name: member.prop.name.clone(),
            ty: field.ty.clone(),
            is_static: false,
        })
    }

    // ----- conversions -----

    /// Insert the conversion taking a `from`-typed stack top to `to`:
    /// primitive widening, boxing, unboxing, or a reference cast.
    pub(crate) fn convert_value(
        &mut self,
        from: &JvmType,
        to: &JvmType,
        span: Span,
    ) -> CompileResult<()> {
        if from == to || *to == JvmType::Void {
            return Ok(());
        }
        let fail = || {
            CompileError::type_error(format!("Cannot convert {from} to {to}")).at(span)
        };
        match (from.is_primitive(), to.is_primitive()) {
            (true, true) => {
                if !from.widens_to(to) {
                    return Err(fail());
                }
                self.code.convert(from, to);
                Ok(())
            }
            (true, false) => {
                // Box, widening first when the wrapper asks for it.
                if let Some(target_prim) = to.unboxed() {
                    if *from != target_prim {
                        if !from.widens_to(&target_prim) {
                            return Err(fail());
                        }
                        self.code.convert(from, &target_prim);
                    }
                    return self.box_primitive(&target_prim);
                }
                let wrapper = from.wrapper().ok_or_else(fail)?;
                if !crate::types::is_assignable(&JvmType::reference(wrapper), to) {
                    return Err(fail());
                }
                self.box_primitive(from)
            }
            (false, true) => self.unbox_to(from, to, span),
            (false, false) => {
                if *to == JvmType::object() || crate::types::is_assignable(from, to) {
                    return Ok(());
                }
                if *from == JvmType::object() {
                    if let JvmType::Reference(name) = to {
                        self.code.checkcast(self.pool, name);
                        return Ok(());
                    }
                }
                Err(fail())
            }
        }
    }

    fn box_primitive(&mut self, prim: &JvmType) -> CompileResult<()> {
        let wrapper = prim
            .wrapper()
            .ok_or_else(|| CompileError::internal("boxing a non-primitive"))?;
        self.code.invoke(
            self.pool,
            Invoke::Static,
            wrapper,
            "valueOf",
            &[prim.clone()],
            &JvmType::reference(wrapper),
        );
        Ok(())
    }

    fn unbox_to(&mut self, from: &JvmType, to: &JvmType, span: Span) -> CompileResult<()> {
        let fail = || {
            CompileError::type_error(format!("Cannot convert {from} to {to}")).at(span)
        };
        let accessor = |prim: &JvmType| match prim {
            JvmType::Boolean => "booleanValue",
            JvmType::Byte => "byteValue",
            JvmType::Char => "charValue",
            JvmType::Short => "shortValue",
            JvmType::Int => "intValue",
            JvmType::Long => "longValue",
            JvmType::Float => "floatValue",
            JvmType::Double => "doubleValue",
            _ => "",
        };
        match from.unboxed() {
            Some(prim) if prim == *to => {
                let JvmType::Reference(owner) = from else {
                    return Err(fail());
                };
                self.code
                    .invoke(self.pool, Invoke::Virtual, owner, accessor(to), &[], to);
                Ok(())
            }
            Some(prim) => {
                if !prim.widens_to(to) {
                    return Err(fail());
                }
                let JvmType::Reference(owner) = from else {
                    return Err(fail());
                };
                let owner = owner.clone();
                if prim == JvmType::Char || prim == JvmType::Boolean {
                    // Only numeric wrappers expose the widened accessors.
                    self.code
                        .invoke(self.pool, Invoke::Virtual, &owner, accessor(&prim), &[], &prim);
                    self.code.convert(&prim, to);
                } else {
                    self.code
                        .invoke(self.pool, Invoke::Virtual, &owner, accessor(to), &[], to);
                }
                Ok(())
            }
            None => {
                // Objects unbox through a checkcast to the wrapper.
                let matches_object = matches!(
                    from,
                    JvmType::Reference(n) if n == OBJECT || n == crate::types::NUMBER
                );
                if !matches_object {
                    return Err(fail());
                }
                let wrapper = to.wrapper().ok_or_else(fail)?;
                self.code.checkcast(self.pool, wrapper);
                self.code
                    .invoke(self.pool, Invoke::Virtual, wrapper, accessor(to), &[], to);
                Ok(())
            }
        }
    }

    // ----- statements -----

    pub(crate) fn emit_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Block(block) => self.emit_block(block),
            Stmt::Expr(es) => self.emit_expr_stmt(&es.expr),
            Stmt::Var(var) => self.emit_var(var),
            Stmt::If(s) => self.emit_if(s),
            Stmt::While(s) => self.emit_while(s, None),
            Stmt::DoWhile(s) => self.emit_do_while(s, None),
            Stmt::For(s) => self.emit_for(s, None),
            Stmt::ForIn(s) => self.emit_for_in(s, None),
            Stmt::Switch(s) => self.emit_switch(s),
            Stmt::Try(s) => self.emit_try(s),
            Stmt::Throw(s) => self.emit_throw(s),
            Stmt::Return(s) => self.emit_return(s),
            Stmt::Break(s) => self.emit_break(s),
            Stmt::Continue(s) => self.emit_continue(s),
            Stmt::Labeled(s) => match s.body.as_ref() {
                Stmt::While(w) => self.emit_while(w, Some(s.label.name.clone())),
                Stmt::DoWhile(w) => self.emit_do_while(w, Some(s.label.name.clone())),
                Stmt::For(f) => self.emit_for(f, Some(s.label.name.clone())),
                Stmt::ForIn(f) => self.emit_for_in(f, Some(s.label.name.clone())),
                _ => Err(CompileError::unsupported(format!(
                    "Label '{}' must be attached to a loop",
                    s.label.name
                ))
                .at(s.span)),
            },
            Stmt::Empty(_) => Ok(()),
        }
    }

    pub(crate) fn emit_block(&mut self, block: &BlockStmt) -> CompileResult<()> {
        self.locals.enter_scope();
        for stmt in &block.stmts {
            self.emit_stmt(stmt)?;
        }
        let freed = self.locals.exit_scope();
        self.code.retire_locals(freed);
        Ok(())
    }

    /// An expression in statement position: assignments and updates skip
    /// producing a value, everything else is emitted then popped.
    fn emit_expr_stmt(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr.unparenthesized() {
            Expr::Assign(assign) => {
                self.emit_assign(assign, false)?;
            }
            Expr::Update(update) => {
                self.emit_update(update, false)?;
            }
            other => {
                let ty = self.emit_expr(other, None)?;
                if ty != JvmType::Void {
                    self.code.pop_value(&ty);
                }
            }
        }
        Ok(())
    }

    fn emit_var(&mut self, var: &VarDecl) -> CompileResult<()> {
        let is_const = matches!(var.kind, VarKind::Const);
        if is_const && var.init.is_none() {
            return Err(CompileError::type_error(format!(
                "Const variable '{}' requires an initializer",
                var.name.name
            ))
            .at(var.span));
        }
        let ty = match (&var.type_ann, &var.init) {
            (Some(ann), init) => {
                let ty = self.symbols.registry.resolve(ann)?;
                if let Some(constraint) =
                    RecordConstraint::from_annotation(ann, &self.symbols.registry)?
                {
                    if let Some(Expr::Object(lit)) = init.as_ref().map(|e| e.unparenthesized()) {
                        let plan = literal::plan_object_literal(lit)?;
                        let this: &Self = self;
                        constraint
                            .validate(&plan, &mut |e| infer::infer_expr(e, &this.env(None)))
                            .map_err(|e| e.at(var.span))?;
                    }
                }
                ty
            }
            (None, Some(init)) => infer::promote(&self.infer(init, None)?),
            (None, None) => {
                return Err(CompileError::type_error(format!(
                    "Variable '{}' requires a type annotation or an initializer",
                    var.name.name
                ))
                .at(var.span));
            }
        };
        match &var.init {
            Some(init) => self.emit_converted(init, &ty)?,
            None => self.push_type_default(&ty),
        }
        let slot = self
            .locals
            .declare(&var.name.name, ty.clone(), is_const)
            .map_err(|e| e.at(var.name.span))?;
        self.code.store_local(slot, &ty);
        Ok(())
    }

    fn push_type_default(&mut self, ty: &JvmType) {
        match ty {
            JvmType::Long => self.code.push_long(self.pool, 0),
            JvmType::Float => self.code.push_float(self.pool, 0.0),
            JvmType::Double => self.code.push_double(self.pool, 0.0),
            t if t.is_primitive() => self.code.push_int(self.pool, 0),
            _ => self.code.push_null(),
        }
    }

    fn emit_if(&mut self, stmt: &IfStmt) -> CompileResult<()> {
        let l_else = self.code.new_label();
        self.emit_converted(&stmt.test, &JvmType::Boolean)?;
        self.code.jump_if(Cond::Eq, l_else);
        self.emit_stmt(&stmt.cons)?;
        match &stmt.alt {
            Some(alt) => {
                let l_end = self.code.new_label();
                self.code.goto(l_end);
                self.code.bind(l_else);
                self.emit_stmt(alt)?;
                self.code.bind(l_end);
            }
            None => self.code.bind(l_else),
        }
        Ok(())
    }

    fn emit_while(&mut self, stmt: &WhileStmt, label: Option<String>) -> CompileResult<()> {
        let l_top = self.code.new_label();
        let l_end = self.code.new_label();
        self.code.bind(l_top);
        self.emit_converted(&stmt.test, &JvmType::Boolean)?;
        self.code.jump_if(Cond::Eq, l_end);
        self.loops.push(LoopCtx {
            label,
            break_to: l_end,
            continue_to: l_top,
            is_loop: true,
            finally_depth: self.finallies.len(),
        });
        self.emit_stmt(&stmt.body)?;
        self.loops.pop();
        self.code.goto(l_top);
        self.code.bind(l_end);
        Ok(())
    }

    fn emit_do_while(&mut self, stmt: &DoWhileStmt, label: Option<String>) -> CompileResult<()> {
        let l_top = self.code.new_label();
        let l_cond = self.code.new_label();
        let l_end = self.code.new_label();
        self.code.bind(l_top);
        self.loops.push(LoopCtx {
            label,
            break_to: l_end,
            continue_to: l_cond,
            is_loop: true,
            finally_depth: self.finallies.len(),
        });
        self.emit_stmt(&stmt.body)?;
        self.loops.pop();
        self.code.bind(l_cond);
        self.emit_converted(&stmt.test, &JvmType::Boolean)?;
        self.code.jump_if(Cond::Ne, l_top);
        self.code.bind(l_end);
        Ok(())
    }

    fn emit_for(&mut self, stmt: &ForStmt, label: Option<String>) -> CompileResult<()> {
        self.locals.enter_scope();
        if let Some(init) = &stmt.init {
            self.emit_stmt(init)?;
        }
        let l_top = self.code.new_label();
        let l_cont = self.code.new_label();
        let l_end = self.code.new_label();
        self.code.bind(l_top);
        if let Some(test) = &stmt.test {
            self.emit_converted(test, &JvmType::Boolean)?;
            self.code.jump_if(Cond::Eq, l_end);
        }
        self.loops.push(LoopCtx {
            label,
            break_to: l_end,
            continue_to: l_cont,
            is_loop: true,
            finally_depth: self.finallies.len(),
        });
        self.emit_stmt(&stmt.body)?;
        self.loops.pop();
        self.code.bind(l_cont);
        if let Some(update) = &stmt.update {
            self.emit_expr_stmt(update)?;
        }
        self.code.goto(l_top);
        self.code.bind(l_end);
        let freed = self.locals.exit_scope();
        self.code.retire_locals(freed);
        Ok(())
    }

    /// Switch lowers to a compare chain over a parked discriminant, with
    /// natural fall-through between case bodies.
    fn emit_switch(&mut self, stmt: &SwitchStmt) -> CompileResult<()> {
        let disc_ty = infer::promote(&self.infer(&stmt.disc, None)?);
        let is_string = disc_ty.is_string();
        if disc_ty != JvmType::Int && !is_string {
            return Err(CompileError::type_error(format!(
                "Switch requires an int or String discriminant, but got: {disc_ty}"
            ))
            .at(stmt.disc.span()));
        }
        self.locals.enter_scope();
        self.emit_converted(&stmt.disc, &disc_ty)?;
        let disc_slot = self.locals.declare_temp(&disc_ty)?;
        self.code.store_local(disc_slot, &disc_ty);

        let l_end = self.code.new_label();
        let body_labels: Vec<Label> = stmt.cases.iter().map(|_| self.code.new_label()).collect();
        let mut default_index = None;
        for (i, case) in stmt.cases.iter().enumerate() {
            match &case.test {
                Some(test) => {
                    self.code.load_local(disc_slot, &disc_ty);
                    if is_string {
                        self.emit_converted(test, &JvmType::string())?;
                        self.code.invoke(
                            self.pool,
                            Invoke::Virtual,
                            STRING,
                            "equals",
                            &[JvmType::object()],
                            &JvmType::Boolean,
                        );
                        self.code.jump_if(Cond::Ne, body_labels[i]);
                    } else {
                        self.emit_converted(test, &JvmType::Int)?;
                        self.code.jump_if_icmp(Cond::Eq, body_labels[i]);
                    }
                }
                None => default_index = Some(i),
            }
        }
        match default_index {
            Some(i) => self.code.goto(body_labels[i]),
            None => self.code.goto(l_end),
        }

        self.loops.push(LoopCtx {
            label: None,
            break_to: l_end,
            continue_to: l_end,
            is_loop: false,
            finally_depth: self.finallies.len(),
        });
        for (i, case) in stmt.cases.iter().enumerate() {
            self.code.bind(body_labels[i]);
            for inner in &case.body {
                self.emit_stmt(inner)?;
            }
        }
        self.loops.pop();
        self.code.bind(l_end);
        let freed = self.locals.exit_scope();
        self.code.retire_locals(freed);
        Ok(())
    }

    fn emit_try(&mut self, stmt: &TryStmt) -> CompileResult<()> {
        let entry_locals: Vec<VerifType> = self.code.locals().to_vec();
        let l_end = self.code.new_label();

        let entry_depth = self.finallies.len();
        if let Some(finally) = &stmt.finally {
            self.finallies.push(finally.clone());
        }
        self.try_regions.push(TryRegion {
            entry_depth,
            owns_finally: stmt.finally.as_ref().map(|_| entry_depth),
            gaps: Vec::new(),
        });
        let try_start = self.code.pc();
        self.emit_block(&stmt.block)?;
        let try_end = self.code.pc();
        if let Some(finally) = &stmt.finally {
            let block = finally.clone();
            self.finallies.pop();
            self.emit_block(&block)?;
            self.finallies.push(block);
        }
        self.code.goto(l_end);

        let mut catch_range = None;
        if let Some(catch) = &stmt.catch {
            let handler = self.code.new_label();
            let gaps = self.current_gaps()?;
            add_protected_segments(&mut self.code, try_start, try_end, &gaps, handler);
            self.code
                .set_handler_frame(handler, entry_locals.clone(), THROWABLE);
            self.code.bind(handler);
            self.locals.enter_scope();
            let throwable = JvmType::reference(THROWABLE);
            match &catch.param {
                Some(param) => {
                    let slot = self
                        .locals
                        .declare(&param.name, throwable.clone(), false)
                        .map_err(|e| e.at(param.span))?;
                    self.code.store_local(slot, &throwable);
                }
                None => self.code.pop_value(&throwable),
            }
            let catch_start = self.code.pc();
            for inner in &catch.body.stmts {
                self.emit_stmt(inner)?;
            }
            let catch_end = self.code.pc();
            catch_range = Some((catch_start, catch_end));
            if let Some(finally) = &stmt.finally {
                let block = finally.clone();
                self.finallies.pop();
                self.emit_block(&block)?;
                self.finallies.push(block);
            }
            self.code.goto(l_end);
            let freed = self.locals.exit_scope();
            self.code.retire_locals(freed);
        }

        let region = self
            .try_regions
            .pop()
            .ok_or_else(|| CompileError::internal("try region stack underflow"))?;
        if let Some(finally) = &stmt.finally {
            self.finallies.pop();
            let rethrow = self.code.new_label();
            if stmt.catch.is_none() {
                add_protected_segments(&mut self.code, try_start, try_end, &region.gaps, rethrow);
            }
            if let Some((start, end)) = catch_range {
                add_protected_segments(&mut self.code, start, end, &region.gaps, rethrow);
            }
            self.code
                .set_handler_frame(rethrow, entry_locals, THROWABLE);
            self.code.bind(rethrow);
            self.locals.enter_scope();
            let throwable = JvmType::reference(THROWABLE);
            let slot = self.locals.declare_temp(&throwable)?;
            self.code.store_local(slot, &throwable);
            self.emit_block(finally)?;
            self.code.load_local(slot, &throwable);
            self.code.athrow();
            let freed = self.locals.exit_scope();
            self.code.retire_locals(freed);
        }

        self.code.bind(l_end);
        Ok(())
    }

    fn emit_throw(&mut self, stmt: &ThrowStmt) -> CompileResult<()> {
        let ty = self.infer(&stmt.arg, None)?;
        if ty.is_string() {
            let exc_ty = JvmType::reference(RUNTIME_EXCEPTION);
            self.code.new_object(self.pool, RUNTIME_EXCEPTION);
            self.code.dup(&exc_ty);
            self.emit_converted(&stmt.arg, &JvmType::string())?;
            self.code
                .invoke_init(self.pool, RUNTIME_EXCEPTION, &[JvmType::string()]);
            self.code.athrow();
            return Ok(());
        }
        let throwable = matches!(
            &ty,
            JvmType::Reference(n)
                if n == THROWABLE
                    || n == EXCEPTION
                    || n == RUNTIME_EXCEPTION
                    || n == crate::types::ILLEGAL_ARGUMENT_EXCEPTION
        );
        if !throwable {
            return Err(CompileError::type_error(format!(
                "Cannot throw a value of type {ty}"
            ))
            .at(stmt.span));
        }
        self.emit_expr(&stmt.arg, None)?;
        self.code.athrow();
        Ok(())
    }

    fn emit_return(&mut self, stmt: &ReturnStmt) -> CompileResult<()> {
        let ret = self.ret.clone();
        match (&stmt.value, ret == JvmType::Void) {
            (Some(value), false) => {
                self.emit_converted(value, &ret)?;
                self.run_finallies(0)?;
                self.code.ret(&ret);
                Ok(())
            }
            (None, true) => {
                self.run_finallies(0)?;
                self.code.ret(&JvmType::Void);
                Ok(())
            }
            (Some(_), true) => Err(CompileError::type_error(
                "Cannot return a value from a void function",
            )
            .at(stmt.span)),
            (None, false) => Err(CompileError::type_error(format!(
                "Missing return value in a function returning {ret}"
            ))
            .at(stmt.span)),
        }
    }

    fn emit_break(&mut self, stmt: &BreakStmt) -> CompileResult<()> {
        let index = match &stmt.label {
            Some(label) => self
                .loops
                .iter()
                .rposition(|ctx| ctx.label.as_deref() == Some(label.name.as_str()))
                .ok_or_else(|| {
                    CompileError::type_error(format!("Undefined label: {}", label.name))
                        .at(stmt.span)
                })?,
            None => self.loops.len().checked_sub(1).ok_or_else(|| {
                CompileError::type_error("'break' outside of a loop or switch").at(stmt.span)
            })?,
        };
        let depth = self.loops[index].finally_depth;
        let target = self.loops[index].break_to;
        self.run_finallies(depth)?;
        self.code.goto(target);
        Ok(())
    }

    fn emit_continue(&mut self, stmt: &ContinueStmt) -> CompileResult<()> {
        let index = match &stmt.label {
            Some(label) => self
                .loops
                .iter()
                .rposition(|ctx| {
                    ctx.is_loop && ctx.label.as_deref() == Some(label.name.as_str())
                })
                .ok_or_else(|| {
                    CompileError::type_error(format!("Undefined label: {}", label.name))
                        .at(stmt.span)
                })?,
            None => self
                .loops
                .iter()
                .rposition(|ctx| ctx.is_loop)
                .ok_or_else(|| {
                    CompileError::type_error("'continue' outside of a loop").at(stmt.span)
                })?,
        };
        let depth = self.loops[index].finally_depth;
        let target = self.loops[index].continue_to;
        self.run_finallies(depth)?;
        self.code.goto(target);
        Ok(())
    }

    fn current_gaps(&self) -> CompileResult<Vec<(u32, u32)>> {
        self.try_regions
            .last()
            .map(|r| r.gaps.clone())
            .ok_or_else(|| CompileError::internal("try region stack underflow"))
    }

    /// Replay pending finally blocks, innermost first, down to `keep`.
    /// While a block runs, only the finallys outside it stay pending, so
    /// a `return` inside a finally cannot replay its own block. Each
    /// replay is recorded as a gap in the regions of the try that owns
    /// it and of every try entered after it, keeping the replayed
    /// cleanup out of the exception tables of the trys being left.
    fn run_finallies(&mut self, keep: usize) -> CompileResult<()> {
        let tail = self.finallies.split_off(keep);
        for i in (0..tail.len()).rev() {
            let index = keep + i;
            let gap_start = self.code.pc();
            self.finallies.extend(tail[..i].iter().cloned());
            let result = self.emit_block(&tail[i]);
            self.finallies.truncate(keep);
            result?;
            let gap_end = self.code.pc();
            if gap_end > gap_start {
                for region in &mut self.try_regions {
                    if region.owns_finally == Some(index) || region.entry_depth > index {
                        region.gaps.push((gap_start, gap_end));
                    }
                }
            }
        }
        self.finallies.extend(tail);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kava_ast::{EnumDecl, EnumMemberDecl, Ident};

    fn int_fn(name: &str, params: Vec<Param>) -> Decl {
        Decl::Function(FunctionDecl {
            name: Ident::new(name),
            function: Function::new(
                params,
                Some(TypeAnn::named("int")),
                BlockStmt::new(vec![Stmt::ret(Expr::int(0))]),
            ),
            span: Span::NONE,
        })
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let module = Module::new(vec![
            Decl::Class(kava_ast::ClassDecl::new("A")),
            Decl::Class(kava_ast::ClassDecl::new("A")),
        ]);
        let err = collect(&module).unwrap_err();
        assert!(err.cause().to_string().contains("Duplicate declaration"));
    }

    #[test]
    fn test_enum_intrinsics_registered_as_signatures() {
        let module = Module::new(vec![Decl::Enum(EnumDecl {
            name: Ident::new("Color"),
            members: vec![EnumMemberDecl {
                name: Ident::new("Red"),
                init: None,
                span: Span::NONE,
            }],
            span: Span::NONE,
        })]);
        let collected = collect(&module).unwrap();
        let class = collected.symbols.class("Color").unwrap();
        assert!(class.is_enum);
        for intrinsic in ["values", "valueOf", "fromValue", "getValue"] {
            assert!(class.methods.contains(intrinsic), "missing {intrinsic}");
        }
        assert_eq!(class.methods.get("fromValue")[0].params, vec![JvmType::Int]);
    }

    #[test]
    fn test_default_parameter_registers_bridge_arity() {
        let params = vec![
            Param::new("a", TypeAnn::named("int")),
            Param::new("b", TypeAnn::named("int")).with_default(Expr::int(1)),
        ];
        let module = Module::new(vec![int_fn("f", params)]);
        let collected = collect(&module).unwrap();
        let container = collected.symbols.class("$").unwrap();
        let arities: Vec<usize> = container
            .methods
            .get("f")
            .iter()
            .map(|s| s.params.len())
            .collect();
        assert!(arities.contains(&2));
        assert!(arities.contains(&1));
    }

    #[test]
    fn test_namespace_prefix_shapes_internal_names() {
        let module = Module::new(vec![Decl::Namespace(kava_ast::NamespaceDecl {
            name: Ident::new("util"),
            decls: vec![Decl::Class(kava_ast::ClassDecl::new("Point"))],
            span: Span::NONE,
        })]);
        let collected = collect(&module).unwrap();
        let class = collected.symbols.class("util/Point").unwrap();
        assert_eq!(class.source_name, "Point");
        assert_eq!(collected.symbols.registry.lookup("util.Point"), Some("util/Point"));
    }
}
