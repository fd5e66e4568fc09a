//! Enum class generation.
//!
//! Each source enum becomes a `java/lang/Enum` subclass with one
//! constant per member, a backing `value` field, the standard `values()`
//! and `valueOf(String)` methods, and the accessors `getValue()` and
//! `fromValue(...)`. `<clinit>` builds the constants in declaration
//! order.

use crate::consteval::{EnumMember, EnumValue};
use crate::emit::classfile::{ClassFile, ClassFlags, FieldFlags, MethodAccess};
use crate::emit::code::{CodeBuilder, Cond, Invoke, VerifType};
use crate::error::CompileResult;
use crate::types::{JvmType, ENUM, ILLEGAL_ARGUMENT_EXCEPTION, STRING, STRING_BUILDER};

/// Field name of an enum constant: the member name uppercased.
pub fn constant_field_name(member: &str) -> String {
    member.to_uppercase()
}

/// Emit a complete enum class file.
pub fn emit_enum(
    internal_name: &str,
    members: &[EnumMember],
    value_type: &JvmType,
) -> CompileResult<Vec<u8>> {
    let mut class = ClassFile::new(
        internal_name,
        ENUM,
        ClassFlags::PUBLIC | ClassFlags::FINAL | ClassFlags::SUPER | ClassFlags::ENUM,
    );
    let self_ty = JvmType::reference(internal_name);
    let self_desc = self_ty.descriptor();
    let array_desc = format!("[{self_desc}");
    let value_desc = value_type.descriptor();

    for member in members {
        class.add_field(
            FieldFlags::PUBLIC | FieldFlags::STATIC | FieldFlags::FINAL | FieldFlags::ENUM,
            &constant_field_name(&member.name),
            &self_desc,
        );
    }
    class.add_field(
        FieldFlags::PRIVATE | FieldFlags::STATIC | FieldFlags::FINAL | FieldFlags::SYNTHETIC,
        "$VALUES",
        &array_desc,
    );
    class.add_field(FieldFlags::PRIVATE | FieldFlags::FINAL, "value", &value_desc);

    emit_ctor(&mut class, internal_name, value_type)?;
    emit_values(&mut class, internal_name, &array_desc, &self_ty)?;
    emit_value_of(&mut class, internal_name, &self_ty)?;
    emit_get_value(&mut class, internal_name, value_type)?;
    emit_from_value(&mut class, internal_name, members, value_type, &self_ty)?;
    emit_clinit(&mut class, internal_name, members, value_type, &self_ty)?;

    class.to_bytes()
}

/// `private <init>(String name, int ordinal, V value)`.
fn emit_ctor(class: &mut ClassFile, internal_name: &str, value_type: &JvmType) -> CompileResult<()> {
    let mut code = CodeBuilder::new(vec![
        VerifType::UninitializedThis,
        VerifType::Object(STRING.to_string()),
        VerifType::Integer,
        VerifType::of(value_type),
    ]);
    let self_ty = JvmType::reference(internal_name);
    code.load_local(0, &self_ty);
    code.load_local(1, &JvmType::string());
    code.load_local(2, &JvmType::Int);
    code.invoke_super_init(
        &mut class.pool,
        ENUM,
        internal_name,
        &[JvmType::string(), JvmType::Int],
    );
    code.load_local(0, &self_ty);
    code.load_local(3, value_type);
    code.put_field(&mut class.pool, internal_name, "value", value_type, false);
    code.ret(&JvmType::Void);
    let attr = code.finish(&mut class.pool)?;
    let desc = format!("(Ljava/lang/String;I{})V", value_type.descriptor());
    class.add_method(MethodAccess::PRIVATE, "<init>", &desc, attr);
    Ok(())
}

/// `public static E[] values()` returning a clone of `$VALUES`.
fn emit_values(
    class: &mut ClassFile,
    internal_name: &str,
    array_desc: &str,
    self_ty: &JvmType,
) -> CompileResult<()> {
    let array_ty = JvmType::Array(Box::new(self_ty.clone()));
    let mut code = CodeBuilder::new(vec![]);
    code.get_field(&mut class.pool, internal_name, "$VALUES", &array_ty, true);
    code.invoke(
        &mut class.pool,
        Invoke::Virtual,
        array_desc,
        "clone",
        &[],
        &JvmType::object(),
    );
    code.checkcast(&mut class.pool, array_desc);
    code.ret(&array_ty);
    let attr = code.finish(&mut class.pool)?;
    class.add_method(
        MethodAccess::PUBLIC | MethodAccess::STATIC,
        "values",
        &format!("(){array_desc}"),
        attr,
    );
    Ok(())
}

/// `public static E valueOf(String)` delegating to `Enum.valueOf`.
fn emit_value_of(class: &mut ClassFile, internal_name: &str, self_ty: &JvmType) -> CompileResult<()> {
    let mut code = CodeBuilder::new(vec![VerifType::Object(STRING.to_string())]);
    code.push_class(&mut class.pool, internal_name);
    code.load_local(0, &JvmType::string());
    code.invoke(
        &mut class.pool,
        Invoke::Static,
        ENUM,
        "valueOf",
        &[
            JvmType::reference("java/lang/Class"),
            JvmType::string(),
        ],
        &JvmType::reference(ENUM),
    );
    code.checkcast(&mut class.pool, internal_name);
    code.ret(self_ty);
    let attr = code.finish(&mut class.pool)?;
    class.add_method(
        MethodAccess::PUBLIC | MethodAccess::STATIC,
        "valueOf",
        &format!("(Ljava/lang/String;){}", self_ty.descriptor()),
        attr,
    );
    Ok(())
}

/// `public V getValue()`.
fn emit_get_value(
    class: &mut ClassFile,
    internal_name: &str,
    value_type: &JvmType,
) -> CompileResult<()> {
    let mut code = CodeBuilder::new(vec![VerifType::Object(internal_name.to_string())]);
    let self_ty = JvmType::reference(internal_name);
    code.load_local(0, &self_ty);
    code.get_field(&mut class.pool, internal_name, "value", value_type, false);
    code.ret(value_type);
    let attr = code.finish(&mut class.pool)?;
    class.add_method(
        MethodAccess::PUBLIC,
        "getValue",
        &format!("(){}", value_type.descriptor()),
        attr,
    );
    Ok(())
}

/// `public static E fromValue(V)`: first declared member with a matching
/// value, or an IllegalArgumentException naming the rejected value.
fn emit_from_value(
    class: &mut ClassFile,
    internal_name: &str,
    members: &[EnumMember],
    value_type: &JvmType,
    self_ty: &JvmType,
) -> CompileResult<()> {
    let mut code = CodeBuilder::new(vec![VerifType::of(value_type)]);
    for member in members {
        let next = code.new_label();
        match &member.value {
            EnumValue::Int(v) => {
                code.load_local(0, &JvmType::Int);
                code.push_int(&mut class.pool, *v);
                code.jump_if_icmp(Cond::Ne, next);
            }
            EnumValue::Str(v) => {
                code.push_string(&mut class.pool, v);
                code.load_local(0, &JvmType::string());
                code.invoke(
                    &mut class.pool,
                    Invoke::Virtual,
                    STRING,
                    "equals",
                    &[JvmType::object()],
                    &JvmType::Boolean,
                );
                code.jump_if(Cond::Eq, next);
            }
        }
        code.get_field(
            &mut class.pool,
            internal_name,
            &constant_field_name(&member.name),
            self_ty,
            true,
        );
        code.ret(self_ty);
        code.bind(next);
    }
    // throw new IllegalArgumentException("Invalid value: " + value)
    code.new_object(&mut class.pool, ILLEGAL_ARGUMENT_EXCEPTION);
    code.dup(&JvmType::reference(ILLEGAL_ARGUMENT_EXCEPTION));
    code.new_object(&mut class.pool, STRING_BUILDER);
    code.dup(&JvmType::reference(STRING_BUILDER));
    code.invoke_init(&mut class.pool, STRING_BUILDER, &[]);
    code.push_string(&mut class.pool, "Invalid value: ");
    sb_append(&mut code, class, &JvmType::string());
    code.load_local(0, value_type);
    sb_append(&mut code, class, value_type);
    code.invoke(
        &mut class.pool,
        Invoke::Virtual,
        STRING_BUILDER,
        "toString",
        &[],
        &JvmType::string(),
    );
    code.invoke_init(
        &mut class.pool,
        ILLEGAL_ARGUMENT_EXCEPTION,
        &[JvmType::string()],
    );
    code.athrow();
    let attr = code.finish(&mut class.pool)?;
    class.add_method(
        MethodAccess::PUBLIC | MethodAccess::STATIC,
        "fromValue",
        &format!("({}){}", value_type.descriptor(), self_ty.descriptor()),
        attr,
    );
    Ok(())
}

fn sb_append(code: &mut CodeBuilder, class: &mut ClassFile, ty: &JvmType) {
    let param = if ty.is_string() {
        JvmType::string()
    } else if ty.is_primitive() {
        ty.clone()
    } else {
        JvmType::object()
    };
    code.invoke(
        &mut class.pool,
        Invoke::Virtual,
        STRING_BUILDER,
        "append",
        &[param],
        &JvmType::reference(STRING_BUILDER),
    );
}

/// `static <clinit>` building every constant and `$VALUES`.
fn emit_clinit(
    class: &mut ClassFile,
    internal_name: &str,
    members: &[EnumMember],
    value_type: &JvmType,
    self_ty: &JvmType,
) -> CompileResult<()> {
    let mut code = CodeBuilder::new(vec![]);
    let ctor_params = [JvmType::string(), JvmType::Int, value_type.clone()];
    for member in members {
        code.new_object(&mut class.pool, internal_name);
        code.dup(self_ty);
        code.push_string(&mut class.pool, &constant_field_name(&member.name));
        code.push_int(&mut class.pool, member.ordinal as i32);
        match &member.value {
            EnumValue::Int(v) => code.push_int(&mut class.pool, *v),
            EnumValue::Str(v) => code.push_string(&mut class.pool, v),
        }
        code.invoke_init(&mut class.pool, internal_name, &ctor_params);
        code.put_field(
            &mut class.pool,
            internal_name,
            &constant_field_name(&member.name),
            self_ty,
            true,
        );
    }
    let array_ty = JvmType::Array(Box::new(self_ty.clone()));
    code.push_int(&mut class.pool, members.len() as i32);
    code.anewarray(&mut class.pool, internal_name);
    for member in members {
        code.dup(&array_ty);
        code.push_int(&mut class.pool, member.ordinal as i32);
        code.get_field(
            &mut class.pool,
            internal_name,
            &constant_field_name(&member.name),
            self_ty,
            true,
        );
        code.array_store_ref();
    }
    code.put_field(&mut class.pool, internal_name, "$VALUES", &array_ty, true);
    code.ret(&JvmType::Void);
    let attr = code.finish(&mut class.pool)?;
    class.add_method(MethodAccess::STATIC, "<clinit>", "()V", attr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> Vec<EnumMember> {
        vec![
            EnumMember {
                name: "Red".to_string(),
                ordinal: 0,
                value: EnumValue::Int(0),
            },
            EnumMember {
                name: "Green".to_string(),
                ordinal: 1,
                value: EnumValue::Int(1),
            },
        ]
    }

    #[test]
    fn test_enum_class_emits() {
        let bytes = emit_enum("Color", &members(), &JvmType::Int).unwrap();
        assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
    }

    #[test]
    fn test_constant_field_names_uppercase() {
        assert_eq!(constant_field_name("Red"), "RED");
        assert_eq!(constant_field_name("ReadWrite"), "READWRITE");
    }

    #[test]
    fn test_string_enum_emits() {
        let members = vec![EnumMember {
            name: "Ok".to_string(),
            ordinal: 0,
            value: EnumValue::Str("ok".to_string()),
        }];
        let bytes = emit_enum("Status", &members, &JvmType::string()).unwrap();
        assert_eq!(&bytes[0..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
    }
}
