//! End-to-end compilation tests
//!
//! Tests cover:
//! - Class file structure (magic, version, constant pool, methods)
//! - Straight-line bytecode for simple function bodies
//! - Return-type inference across branches
//! - Enums (auto-increment values, generated members)
//! - Default parameters and rest parameters
//! - Control flow (for-in, switch, try/finally, break/continue)
//! - Regex literal translation

use kava_ast::{
    AssignExpr, AssignOp, BinaryOp, BlockStmt, BreakStmt, CallExpr, ClassDecl, Constructor,
    ContinueStmt, Decl, Expr, FieldDecl, ForInHead, ForInStmt, ForStmt, Function, FunctionDecl,
    Ident, IfStmt, LabeledStmt, MemberExpr, Module, NewExpr, ObjectLit, ObjectProp, Param,
    PropKey, RegexLit, Span, Stmt, SwitchCase, SwitchStmt, TryStmt, TypeAnn, UpdateExpr,
    UpdateOp, VarDecl, VarKind, WhileStmt,
};
use kava_compiler::{compile, CompiledUnit};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn func_decl(name: &str, params: Vec<Param>, ret: Option<TypeAnn>, stmts: Vec<Stmt>) -> Decl {
    Decl::Function(FunctionDecl {
        name: Ident::new(name),
        function: Function::new(params, ret, BlockStmt::new(stmts)),
        span: Span::NONE,
    })
}

fn compile_ok(decls: Vec<Decl>) -> CompiledUnit {
    compile(&Module::new(decls)).expect("compilation should succeed")
}

fn compile_err(decls: Vec<Decl>) -> String {
    let err = compile(&Module::new(decls)).expect_err("compilation should fail");
    err.cause().to_string()
}

/// Minimal class file reader, enough to check structure and pull out
/// method bytecode.
struct ParsedClass {
    minor: u16,
    major: u16,
    utf8: Vec<(u16, String)>,
    access: u16,
    fields: Vec<String>,
    methods: Vec<ParsedMethod>,
}

struct ParsedMethod {
    access: u16,
    name: String,
    descriptor: String,
    code: Vec<u8>,
    /// `(start_pc, end_pc, handler_pc)` per exception table entry.
    exception_table: Vec<(u16, u16, u16)>,
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn parse_class(bytes: &[u8]) -> ParsedClass {
    assert_eq!(read_u32(bytes, 0), 0xCAFE_BABE, "bad magic");
    let minor = read_u16(bytes, 4);
    let major = read_u16(bytes, 6);
    let pool_count = read_u16(bytes, 8);
    let mut utf8 = Vec::new();
    let mut at = 10usize;
    let mut index = 1u16;
    while index < pool_count {
        let tag = bytes[at];
        at += 1;
        match tag {
            1 => {
                let len = read_u16(bytes, at) as usize;
                let text = String::from_utf8(bytes[at + 2..at + 2 + len].to_vec()).unwrap();
                utf8.push((index, text));
                at += 2 + len;
            }
            3 | 4 => at += 4,
            5 | 6 => {
                at += 8;
                index += 1; // wide constants take two slots
            }
            7 | 8 => at += 2,
            9 | 10 | 11 | 12 => at += 4,
            other => panic!("unexpected constant pool tag {other}"),
        }
        index += 1;
    }
    let lookup = |idx: u16| -> String {
        utf8.iter()
            .find(|(i, _)| *i == idx)
            .map(|(_, s)| s.clone())
            .unwrap_or_default()
    };

    let access = read_u16(bytes, at);
    at += 6; // access, this_class, super_class
    let interfaces = read_u16(bytes, at) as usize;
    at += 2 + interfaces * 2;

    let skip_attributes = |bytes: &[u8], mut at: usize| -> usize {
        let count = read_u16(bytes, at) as usize;
        at += 2;
        for _ in 0..count {
            let len = read_u32(bytes, at + 2) as usize;
            at += 6 + len;
        }
        at
    };

    let field_count = read_u16(bytes, at) as usize;
    at += 2;
    let mut fields = Vec::new();
    for _ in 0..field_count {
        fields.push(lookup(read_u16(bytes, at + 2)));
        at = skip_attributes(bytes, at + 6);
    }

    let method_count = read_u16(bytes, at) as usize;
    at += 2;
    let mut methods = Vec::new();
    for _ in 0..method_count {
        let m_access = read_u16(bytes, at);
        let name = lookup(read_u16(bytes, at + 2));
        let descriptor = lookup(read_u16(bytes, at + 4));
        at += 6;
        let mut code = Vec::new();
        let mut exception_table = Vec::new();
        let attr_count = read_u16(bytes, at) as usize;
        at += 2;
        for _ in 0..attr_count {
            let attr_name = lookup(read_u16(bytes, at));
            let len = read_u32(bytes, at + 2) as usize;
            if attr_name == "Code" {
                let code_len = read_u32(bytes, at + 10) as usize;
                code = bytes[at + 14..at + 14 + code_len].to_vec();
                let table_at = at + 14 + code_len;
                let entries = read_u16(bytes, table_at) as usize;
                for e in 0..entries {
                    let entry_at = table_at + 2 + e * 8;
                    exception_table.push((
                        read_u16(bytes, entry_at),
                        read_u16(bytes, entry_at + 2),
                        read_u16(bytes, entry_at + 4),
                    ));
                }
            }
            at += 6 + len;
        }
        methods.push(ParsedMethod {
            access: m_access,
            name,
            descriptor,
            code,
            exception_table,
        });
    }
    ParsedClass {
        minor,
        major,
        utf8,
        access,
        fields,
        methods,
    }
}

impl ParsedClass {
    fn method(&self, name: &str) -> &ParsedMethod {
        self.methods
            .iter()
            .find(|m| m.name == name)
            .unwrap_or_else(|| panic!("method {name} not found"))
    }

    fn has_utf8(&self, text: &str) -> bool {
        self.utf8.iter().any(|(_, s)| s == text)
    }
}

fn parse_unit_class(unit: &CompiledUnit, name: &str) -> ParsedClass {
    let bytes = unit
        .get(name)
        .unwrap_or_else(|| panic!("class {name} not in unit"));
    parse_class(bytes)
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// =============================================================================
// CLASS FILE STRUCTURE
// =============================================================================

#[test]
fn test_magic_version_and_parse_back() {
    let unit = compile_ok(vec![func_decl(
        "test",
        vec![],
        Some(TypeAnn::named("int")),
        vec![Stmt::ret(Expr::int(42))],
    )]);
    let class = parse_unit_class(&unit, "$");
    assert_eq!(class.minor, 0);
    assert_eq!(class.major, 61);
    // public + final + super + synthetic holder class
    assert_eq!(class.access & 0x0001, 0x0001);
    assert!(class.has_utf8("test"));
    assert!(class.has_utf8("()I"));
}

#[test]
fn test_return_42_emits_bipush_ireturn() {
    let unit = compile_ok(vec![func_decl(
        "test",
        vec![],
        Some(TypeAnn::named("int")),
        vec![Stmt::ret(Expr::int(42))],
    )]);
    let class = parse_unit_class(&unit, "$");
    let method = class.method("test");
    assert_eq!(method.descriptor, "()I");
    // bipush 42; ireturn
    assert_eq!(method.code, vec![0x10, 42, 0xAC]);
}

#[test]
fn test_functions_are_static_methods() {
    let unit = compile_ok(vec![func_decl(
        "noop",
        vec![],
        Some(TypeAnn::Void(Span::NONE)),
        vec![],
    )]);
    let class = parse_unit_class(&unit, "$");
    let method = class.method("noop");
    assert_eq!(method.access & 0x0008, 0x0008);
    // empty void body is a bare return
    assert_eq!(method.code, vec![0xB1]);
}

// =============================================================================
// RETURN-TYPE INFERENCE
// =============================================================================

#[test]
fn test_return_type_inference_widens_across_branches() {
    // pick(flag) { if (flag) return 10; return 20.5; }  =>  (Z)D
    let body = vec![
        Stmt::If(IfStmt {
            test: Expr::ident("flag"),
            cons: Box::new(Stmt::ret(Expr::int(10))),
            alt: None,
            span: Span::NONE,
        }),
        Stmt::ret(Expr::float(20.5)),
    ];
    let unit = compile_ok(vec![func_decl(
        "pick",
        vec![Param::new("flag", TypeAnn::named("boolean"))],
        None,
        body,
    )]);
    let class = parse_unit_class(&unit, "$");
    assert_eq!(class.method("pick").descriptor, "(Z)D");
}

#[test]
fn test_void_inference_for_bodies_without_returns() {
    let unit = compile_ok(vec![func_decl(
        "log",
        vec![Param::new("x", TypeAnn::named("int"))],
        None,
        vec![Stmt::expr(Expr::ident("x"))],
    )]);
    let class = parse_unit_class(&unit, "$");
    assert_eq!(class.method("log").descriptor, "(I)V");
}

// =============================================================================
// ENUMS
// =============================================================================

fn enum_decl(name: &str, members: Vec<(&str, Option<Expr>)>) -> Decl {
    Decl::Enum(kava_ast::EnumDecl {
        name: Ident::new(name),
        members: members
            .into_iter()
            .map(|(n, init)| kava_ast::EnumMemberDecl {
                name: Ident::new(n),
                init,
                span: Span::NONE,
            })
            .collect(),
        span: Span::NONE,
    })
}

#[test]
fn test_enum_auto_increment_and_bitwise_values() {
    let read = Expr::binary(BinaryOp::Shl, Expr::int(1), Expr::int(0));
    let write = Expr::binary(BinaryOp::Shl, Expr::int(1), Expr::int(1));
    let execute = Expr::binary(BinaryOp::Shl, Expr::int(1), Expr::int(2));
    let read_write = Expr::binary(BinaryOp::BitOr, Expr::ident("Read"), Expr::ident("Write"));
    let all = Expr::binary(
        BinaryOp::BitOr,
        Expr::binary(BinaryOp::BitOr, Expr::ident("Read"), Expr::ident("Write")),
        Expr::ident("Execute"),
    );
    let decl = enum_decl(
        "Flags",
        vec![
            ("None", None),
            ("Read", Some(read)),
            ("Write", Some(write)),
            ("Execute", Some(execute)),
            ("ReadWrite", Some(read_write)),
            ("All", Some(all)),
        ],
    );
    let Decl::Enum(ref enum_ast) = decl else {
        unreachable!()
    };
    let members = kava_compiler::consteval::resolve_enum_members(enum_ast).unwrap();
    let values: Vec<i32> = members
        .iter()
        .map(|m| match &m.value {
            kava_compiler::consteval::EnumValue::Int(v) => *v,
            other => panic!("unexpected value {other:?}"),
        })
        .collect();
    assert_eq!(values, vec![0, 1, 2, 4, 3, 7]);

    let unit = compile_ok(vec![decl]);
    let class = parse_unit_class(&unit, "Flags");
    assert!(class.fields.contains(&"NONE".to_string()));
    assert!(class.fields.contains(&"READWRITE".to_string()));
    assert!(class.fields.contains(&"$VALUES".to_string()));
    for generated in ["values", "valueOf", "fromValue", "getValue", "<clinit>"] {
        assert!(
            class.methods.iter().any(|m| m.name == generated),
            "missing {generated}"
        );
    }
}

#[test]
fn test_enum_forward_reference_rejected() {
    let message = compile_err(vec![enum_decl(
        "Bad",
        vec![
            (
                "A",
                Some(Expr::binary(BinaryOp::Mul, Expr::ident("B"), Expr::int(2))),
            ),
            ("B", Some(Expr::int(10))),
        ],
    )]);
    assert!(message.contains("before it is defined"), "{message}");
}

#[test]
fn test_enum_auto_increment_continues_after_explicit_value() {
    let members = kava_compiler::consteval::resolve_enum_members(&kava_ast::EnumDecl {
        name: Ident::new("E"),
        members: vec![
            kava_ast::EnumMemberDecl {
                name: Ident::new("A"),
                init: Some(Expr::int(5)),
                span: Span::NONE,
            },
            kava_ast::EnumMemberDecl {
                name: Ident::new("B"),
                init: None,
                span: Span::NONE,
            },
        ],
        span: Span::NONE,
    })
    .unwrap();
    assert_eq!(
        members[1].value,
        kava_compiler::consteval::EnumValue::Int(6)
    );
}

// =============================================================================
// OBJECT LITERALS
// =============================================================================

fn key_value(key: &str, value: Expr) -> ObjectProp {
    ObjectProp::KeyValue {
        key: PropKey::Ident(Ident::new(key)),
        value,
    }
}

#[test]
fn test_object_literal_first_occurrence_order_last_write_wins() {
    let lit = ObjectLit {
        props: vec![
            key_value("a", Expr::int(1)),
            key_value("b", Expr::int(2)),
            key_value("a", Expr::int(3)),
        ],
        span: Span::NONE,
    };
    let plan = kava_compiler::literal::plan_object_literal(&lit).unwrap();
    let keys: Vec<&str> = plan
        .iter()
        .filter_map(|e| match e {
            kava_compiler::literal::PlannedEntry::Put {
                key: kava_compiler::literal::PlannedKey::Static(k),
                ..
            } => Some(k.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(keys, vec!["a", "b"]);
    let kava_compiler::literal::PlannedEntry::Put { value, .. } = &plan[0] else {
        panic!("expected put");
    };
    assert_eq!(*value, Expr::int(3));
}

#[test]
fn test_record_annotation_rejects_mismatched_property() {
    // const r: Record<string, number> = { a: 1, b: "x" }
    let ann = TypeAnn::generic(
        "Record",
        vec![TypeAnn::named("string"), TypeAnn::named("number")],
    );
    let lit = Expr::Object(ObjectLit {
        props: vec![
            key_value("a", Expr::int(1)),
            key_value("b", Expr::str("x")),
        ],
        span: Span::NONE,
    });
    let mut var = VarDecl::new(VarKind::Const, "r", Some(lit));
    var = var.with_type(ann);
    let message = compile_err(vec![func_decl(
        "make",
        vec![],
        Some(TypeAnn::Void(Span::NONE)),
        vec![Stmt::Var(var)],
    )]);
    assert!(message.contains("'b'"), "{message}");
}

// =============================================================================
// OVERLOADS AND PARAMETERS
// =============================================================================

#[test]
fn test_overload_prefers_exact_match_over_widening() {
    use kava_compiler::types::{JvmType, MethodFlags, MethodSignature};
    let candidates = vec![
        MethodSignature::new(
            "$",
            "f",
            vec![JvmType::Double, JvmType::Double],
            JvmType::Void,
            MethodFlags::STATIC,
        ),
        MethodSignature::new(
            "$",
            "f",
            vec![JvmType::Int, JvmType::Int],
            JvmType::Void,
            MethodFlags::STATIC,
        ),
    ];
    let picked =
        kava_compiler::overload::resolve("f", &candidates, &[JvmType::Int, JvmType::Int]).unwrap();
    assert_eq!(picked.params, vec![JvmType::Int, JvmType::Int]);
}

#[test]
fn test_default_parameter_generates_bridge_overload() {
    // greet(name: string, punct: string = "!"): string
    let params = vec![
        Param::new("name", TypeAnn::named("string")),
        Param::new("punct", TypeAnn::named("string")).with_default(Expr::str("!")),
    ];
    let body = vec![Stmt::ret(Expr::binary(
        BinaryOp::Add,
        Expr::ident("name"),
        Expr::ident("punct"),
    ))];
    let unit = compile_ok(vec![func_decl(
        "greet",
        params,
        Some(TypeAnn::named("string")),
        body,
    )]);
    let class = parse_unit_class(&unit, "$");
    let descriptors: Vec<&str> = class
        .methods
        .iter()
        .filter(|m| m.name == "greet")
        .map(|m| m.descriptor.as_str())
        .collect();
    assert!(descriptors.contains(&"(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;"));
    assert!(descriptors.contains(&"(Ljava/lang/String;)Ljava/lang/String;"));
    // the one-argument bridge is synthetic
    let bridge = class
        .methods
        .iter()
        .find(|m| m.name == "greet" && m.descriptor.starts_with("(Ljava/lang/String;)"))
        .unwrap();
    assert_eq!(bridge.access & 0x1000, 0x1000);
}

#[test]
fn test_rest_parameter_compiles_to_varargs_array() {
    let mut rest = Param::new("values", TypeAnn::array(TypeAnn::named("int")));
    rest.rest = true;
    let unit = compile_ok(vec![func_decl(
        "collect",
        vec![rest],
        Some(TypeAnn::Void(Span::NONE)),
        vec![],
    )]);
    let class = parse_unit_class(&unit, "$");
    let method = class.method("collect");
    assert_eq!(method.descriptor, "([Ljava/lang/Integer;)V");
    assert_eq!(method.access & 0x0080, 0x0080);
}

#[test]
fn test_rest_call_packs_arguments() {
    let mut rest = Param::new("values", TypeAnn::array(TypeAnn::named("int")));
    rest.rest = true;
    let callee = func_decl(
        "collect",
        vec![rest],
        Some(TypeAnn::Void(Span::NONE)),
        vec![],
    );
    let caller = func_decl(
        "main",
        vec![],
        Some(TypeAnn::Void(Span::NONE)),
        vec![Stmt::expr(Expr::Call(CallExpr {
            callee: Box::new(Expr::ident("collect")),
            args: vec![Expr::int(1), Expr::int(2), Expr::int(3)],
            span: Span::NONE,
        }))],
    );
    let unit = compile_ok(vec![callee, caller]);
    let class = parse_unit_class(&unit, "$");
    let main = class.method("main");
    // anewarray appears exactly once in the packing sequence
    assert_eq!(main.code.iter().filter(|b| **b == 0xBD).count(), 1);
    assert!(class.has_utf8("java/lang/Integer"));
}

// =============================================================================
// CLASSES
// =============================================================================

#[test]
fn test_class_with_constructor_and_field_access() {
    let mut point = ClassDecl::new("Point");
    point.fields.push(FieldDecl {
        name: Ident::new("x"),
        is_static: false,
        type_ann: Some(TypeAnn::named("int")),
        init: None,
        span: Span::NONE,
    });
    point.ctors.push(Constructor {
        params: vec![Param::new("x", TypeAnn::named("int"))],
        body: BlockStmt::new(vec![Stmt::expr(Expr::Assign(kava_ast::AssignExpr {
            op: kava_ast::AssignOp::Assign,
            target: Box::new(Expr::Member(MemberExpr {
                obj: Box::new(Expr::This(Span::NONE)),
                prop: Ident::new("x"),
                span: Span::NONE,
            })),
            value: Box::new(Expr::ident("x")),
            span: Span::NONE,
        }))]),
        span: Span::NONE,
    });
    let user = func_decl(
        "origin_x",
        vec![],
        Some(TypeAnn::named("int")),
        vec![Stmt::ret(Expr::Member(MemberExpr {
            obj: Box::new(Expr::New(NewExpr {
                class: Ident::new("Point"),
                args: vec![Expr::int(0)],
                span: Span::NONE,
            })),
            prop: Ident::new("x"),
            span: Span::NONE,
        }))],
    );
    let unit = compile_ok(vec![Decl::Class(point), user]);
    let point_class = parse_unit_class(&unit, "Point");
    assert!(point_class.fields.contains(&"x".to_string()));
    assert_eq!(point_class.method("<init>").descriptor, "(I)V");
    let holder = parse_unit_class(&unit, "$");
    // new Point; dup; iconst_0; invokespecial; getfield; ireturn
    let code = &holder.method("origin_x").code;
    assert_eq!(code[0], 0xBB);
    assert_eq!(*code.last().unwrap(), 0xAC);
    assert!(contains_bytes(code, &[0xB4])); // getfield
}

// =============================================================================
// CONTROL FLOW
// =============================================================================

#[test]
fn test_for_in_over_array_compiles_to_counted_loop() {
    let body = Stmt::ForIn(ForInStmt {
        head: ForInHead::Decl {
            kind: VarKind::Const,
            name: Ident::new("key"),
        },
        object: Expr::ident("items"),
        body: Box::new(Stmt::Block(BlockStmt::new(vec![]))),
        span: Span::NONE,
    });
    let unit = compile_ok(vec![func_decl(
        "walk",
        vec![Param::new("items", TypeAnn::array(TypeAnn::named("string")))],
        Some(TypeAnn::Void(Span::NONE)),
        vec![body],
    )]);
    let class = parse_unit_class(&unit, "$");
    let method = class.method("walk");
    // counted loop: if_icmpge to exit, iinc to advance
    assert!(method.code.contains(&0xA2));
    assert!(method.code.contains(&0x84)); // iinc
    // loop variable is materialized with String.valueOf(int)
    assert!(class.has_utf8("valueOf"));
    assert!(class.has_utf8("(I)Ljava/lang/String;"));
}

#[test]
fn test_switch_over_string_uses_equals() {
    let body = Stmt::Switch(SwitchStmt {
        disc: Expr::ident("name"),
        cases: vec![
            SwitchCase {
                test: Some(Expr::str("a")),
                body: vec![Stmt::ret(Expr::int(1))],
                span: Span::NONE,
            },
            SwitchCase {
                test: None,
                body: vec![Stmt::ret(Expr::int(0))],
                span: Span::NONE,
            },
        ],
        span: Span::NONE,
    });
    let unit = compile_ok(vec![func_decl(
        "classify",
        vec![Param::new("name", TypeAnn::named("string"))],
        Some(TypeAnn::named("int")),
        vec![body],
    )]);
    let class = parse_unit_class(&unit, "$");
    assert!(class.has_utf8("equals"));
    assert!(class.has_utf8("(Ljava/lang/Object;)Z"));
}

#[test]
fn test_switch_rejects_non_int_non_string_discriminant() {
    let body = Stmt::Switch(SwitchStmt {
        disc: Expr::float(1.5),
        cases: vec![],
        span: Span::NONE,
    });
    let message = compile_err(vec![func_decl(
        "bad",
        vec![],
        Some(TypeAnn::Void(Span::NONE)),
        vec![body],
    )]);
    assert!(message.contains("Switch requires"), "{message}");
}

#[test]
fn test_try_finally_emits_exception_table() {
    let body = Stmt::Try(TryStmt {
        block: BlockStmt::new(vec![Stmt::expr(Expr::int(1))]),
        catch: None,
        finally: Some(BlockStmt::new(vec![Stmt::expr(Expr::int(2))])),
        span: Span::NONE,
    });
    let unit = compile_ok(vec![func_decl(
        "guarded",
        vec![],
        Some(TypeAnn::Void(Span::NONE)),
        vec![body],
    )]);
    let class = parse_unit_class(&unit, "$");
    let method = class.method("guarded");
    assert!(!method.exception_table.is_empty());
    assert!(method.code.contains(&0xBF)); // athrow on the rethrow path
}

#[test]
fn test_throw_string_wraps_in_runtime_exception() {
    let unit = compile_ok(vec![func_decl(
        "boom",
        vec![],
        Some(TypeAnn::Void(Span::NONE)),
        vec![Stmt::Throw(kava_ast::ThrowStmt {
            arg: Expr::str("bad input"),
            span: Span::NONE,
        })],
    )]);
    let class = parse_unit_class(&unit, "$");
    assert!(class.has_utf8("java/lang/RuntimeException"));
    assert!(class.method("boom").code.contains(&0xBF));
}

// =============================================================================
// BREAK / CONTINUE
// =============================================================================

fn counted_loop(var: &str, bound: i64, body: Stmt) -> Stmt {
    Stmt::For(ForStmt {
        init: Some(Box::new(Stmt::Var(VarDecl::new(
            VarKind::Let,
            var,
            Some(Expr::int(0)),
        )))),
        test: Some(Expr::binary(BinaryOp::Lt, Expr::ident(var), Expr::int(bound))),
        update: Some(Expr::Update(UpdateExpr {
            op: UpdateOp::Inc,
            prefix: false,
            arg: Box::new(Expr::ident(var)),
            span: Span::NONE,
        })),
        body: Box::new(body),
        span: Span::NONE,
    })
}

fn guard(cond: Expr, then: Stmt) -> Stmt {
    Stmt::If(IfStmt {
        test: cond,
        cons: Box::new(then),
        alt: None,
        span: Span::NONE,
    })
}

#[test]
fn test_break_and_continue_compile_in_counted_loop() {
    let body = Stmt::Block(BlockStmt::new(vec![
        guard(
            Expr::binary(BinaryOp::Eq, Expr::ident("i"), Expr::int(3)),
            Stmt::Continue(ContinueStmt {
                label: None,
                span: Span::NONE,
            }),
        ),
        guard(
            Expr::binary(BinaryOp::Eq, Expr::ident("i"), Expr::int(5)),
            Stmt::Break(BreakStmt {
                label: None,
                span: Span::NONE,
            }),
        ),
        Stmt::expr(Expr::Assign(AssignExpr {
            op: AssignOp::AddAssign,
            target: Box::new(Expr::ident("s")),
            value: Box::new(Expr::ident("i")),
            span: Span::NONE,
        })),
    ]));
    let unit = compile_ok(vec![func_decl(
        "sum",
        vec![],
        Some(TypeAnn::named("int")),
        vec![
            Stmt::Var(VarDecl::new(VarKind::Let, "s", Some(Expr::int(0)))),
            counted_loop("i", 10, body),
            Stmt::ret(Expr::ident("s")),
        ],
    )]);
    let class = parse_unit_class(&unit, "$");
    let method = class.method("sum");
    assert_eq!(method.descriptor, "()I");
    assert!(method.code.contains(&0xA7)); // goto for break and continue
    assert!(method.code.contains(&0x84)); // iinc from i++
}

#[test]
fn test_labeled_break_and_continue_cross_nested_loop() {
    let inner = counted_loop(
        "j",
        3,
        Stmt::Block(BlockStmt::new(vec![
            guard(
                Expr::binary(BinaryOp::Eq, Expr::ident("j"), Expr::int(1)),
                Stmt::Continue(ContinueStmt {
                    label: Some(Ident::new("outer")),
                    span: Span::NONE,
                }),
            ),
            guard(
                Expr::binary(BinaryOp::Eq, Expr::ident("i"), Expr::int(2)),
                Stmt::Break(BreakStmt {
                    label: Some(Ident::new("outer")),
                    span: Span::NONE,
                }),
            ),
        ])),
    );
    let outer = Stmt::Labeled(LabeledStmt {
        label: Ident::new("outer"),
        body: Box::new(counted_loop("i", 3, Stmt::Block(BlockStmt::new(vec![inner])))),
        span: Span::NONE,
    });
    let unit = compile_ok(vec![func_decl(
        "scan",
        vec![],
        Some(TypeAnn::Void(Span::NONE)),
        vec![outer],
    )]);
    let class = parse_unit_class(&unit, "$");
    let method = class.method("scan");
    assert_eq!(method.descriptor, "()V");
    assert!(method.code.contains(&0xA7));
}

#[test]
fn test_break_with_undefined_label_rejected() {
    let msg = compile_err(vec![func_decl(
        "f",
        vec![],
        Some(TypeAnn::Void(Span::NONE)),
        vec![Stmt::While(WhileStmt {
            test: Expr::bool(true),
            body: Box::new(Stmt::Break(BreakStmt {
                label: Some(Ident::new("missing")),
                span: Span::NONE,
            })),
            span: Span::NONE,
        })],
    )]);
    assert!(msg.contains("Undefined label: missing"));
}

#[test]
fn test_break_in_switch_exits_switch_not_loop() {
    let switch = Stmt::Switch(SwitchStmt {
        disc: Expr::ident("n"),
        cases: vec![
            SwitchCase {
                test: Some(Expr::int(0)),
                body: vec![Stmt::Break(BreakStmt {
                    label: None,
                    span: Span::NONE,
                })],
                span: Span::NONE,
            },
            SwitchCase {
                test: None,
                body: vec![],
                span: Span::NONE,
            },
        ],
        span: Span::NONE,
    });
    let step = Stmt::expr(Expr::Assign(AssignExpr {
        op: AssignOp::AddAssign,
        target: Box::new(Expr::ident("n")),
        value: Box::new(Expr::int(1)),
        span: Span::NONE,
    }));
    let unit = compile_ok(vec![func_decl(
        "walk",
        vec![Param::new("n", TypeAnn::named("int"))],
        Some(TypeAnn::Void(Span::NONE)),
        vec![Stmt::While(WhileStmt {
            test: Expr::binary(BinaryOp::Lt, Expr::ident("n"), Expr::int(3)),
            body: Box::new(Stmt::Block(BlockStmt::new(vec![switch, step]))),
            span: Span::NONE,
        })],
    )]);
    let class = parse_unit_class(&unit, "$");
    let method = class.method("walk");
    // The loop's backward edge survives the switch-level break.
    assert!(method
        .code
        .windows(3)
        .any(|w| w[0] == 0xA7 && w[1] >= 0x80));
}

#[test]
fn test_break_through_finally_leaves_replayed_cleanup_unprotected() {
    let cleanup = Stmt::expr(Expr::Call(CallExpr {
        callee: Box::new(Expr::ident("touch")),
        args: vec![],
        span: Span::NONE,
    }));
    let guarded = Stmt::Try(TryStmt {
        block: BlockStmt::new(vec![Stmt::Break(BreakStmt {
            label: None,
            span: Span::NONE,
        })]),
        catch: None,
        finally: Some(BlockStmt::new(vec![cleanup])),
        span: Span::NONE,
    });
    let unit = compile_ok(vec![
        func_decl("touch", vec![], Some(TypeAnn::Void(Span::NONE)), vec![]),
        func_decl(
            "leave",
            vec![],
            Some(TypeAnn::Void(Span::NONE)),
            vec![Stmt::While(WhileStmt {
                test: Expr::bool(true),
                body: Box::new(guarded),
                span: Span::NONE,
            })],
        ),
    ]);
    let class = parse_unit_class(&unit, "$");
    let method = class.method("leave");
    assert!(!method.exception_table.is_empty());
    assert!(method.code.contains(&0xB8)); // the inlined cleanup call
    // A throw inside the inlined cleanup must escape the try: no
    // protected range may cover an invokestatic of the finally body,
    // or the rethrow handler would run the finally a second time.
    for (i, op) in method.code.iter().enumerate() {
        if *op != 0xB8 {
            continue;
        }
        for &(start, end, _) in &method.exception_table {
            assert!(
                i < start as usize || i >= end as usize,
                "cleanup call at {i} covered by [{start}, {end})"
            );
        }
    }
}

// =============================================================================
// REGEX LITERALS
// =============================================================================

#[test]
fn test_regex_gim_compiles_with_case_insensitive_multiline() {
    let var = VarDecl::new(
        VarKind::Const,
        "p",
        Some(Expr::Regex(RegexLit::new("abc", "gim"))),
    );
    let unit = compile_ok(vec![func_decl(
        "make",
        vec![],
        Some(TypeAnn::Void(Span::NONE)),
        vec![Stmt::Var(var)],
    )]);
    let class = parse_unit_class(&unit, "$");
    assert!(class.has_utf8("java/util/regex/Pattern"));
    assert!(class.has_utf8("(Ljava/lang/String;I)Ljava/util/regex/Pattern;"));
    // CASE_INSENSITIVE | MULTILINE == 0x0A, small enough for bipush
    assert!(contains_bytes(&class.method("make").code, &[0x10, 0x0A]));
}

#[test]
fn test_regex_rejected_flags() {
    let err = kava_compiler::regex::translate(&RegexLit::new("x", "d")).unwrap_err();
    assert_eq!(
        err.cause().to_string(),
        "Indices flag 'd' is not supported"
    );
    let err = kava_compiler::regex::translate(&RegexLit::new("x", "y")).unwrap_err();
    assert_eq!(err.cause().to_string(), "Sticky flag 'y' is not supported");
}

// =============================================================================
// STRING OPERATIONS
// =============================================================================

#[test]
fn test_string_concat_uses_string_builder() {
    let body = vec![Stmt::ret(Expr::binary(
        BinaryOp::Add,
        Expr::str("n = "),
        Expr::ident("n"),
    ))];
    let unit = compile_ok(vec![func_decl(
        "show",
        vec![Param::new("n", TypeAnn::named("int"))],
        Some(TypeAnn::named("string")),
        body,
    )]);
    let class = parse_unit_class(&unit, "$");
    assert!(class.has_utf8("java/lang/StringBuilder"));
    assert!(class.has_utf8("append"));
    assert!(class.has_utf8("toString"));
}
