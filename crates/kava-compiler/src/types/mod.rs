//! JVM type model: descriptors, widening, boxing, and assignability.
//!
//! Every inferred or annotated source type is normalized to a [`JvmType`]
//! before any bytecode is planned. All queries here are pure; the emitter
//! consults them to decide which conversion instructions to insert.

mod signature;

pub use signature::{MethodFlags, MethodSignature, OverloadSet};

use kava_ast::TypeAnn;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::fmt;

use crate::error::{CompileError, CompileResult};

// Well-known internal names.
pub const OBJECT: &str = "java/lang/Object";
pub const STRING: &str = "java/lang/String";
pub const NUMBER: &str = "java/lang/Number";
pub const ARRAY_LIST: &str = "java/util/ArrayList";
pub const LIST: &str = "java/util/List";
pub const LINKED_HASH_MAP: &str = "java/util/LinkedHashMap";
pub const MAP: &str = "java/util/Map";
pub const PATTERN: &str = "java/util/regex/Pattern";
pub const STRING_BUILDER: &str = "java/lang/StringBuilder";
pub const ENUM: &str = "java/lang/Enum";
pub const THROWABLE: &str = "java/lang/Throwable";
pub const RUNTIME_EXCEPTION: &str = "java/lang/RuntimeException";
pub const EXCEPTION: &str = "java/lang/Exception";
pub const ILLEGAL_ARGUMENT_EXCEPTION: &str = "java/lang/IllegalArgumentException";

/// A resolved JVM type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JvmType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
    /// Class or interface, by internal name (`java/lang/String`).
    Reference(String),
    Array(Box<JvmType>),
}

impl JvmType {
    pub fn object() -> JvmType {
        JvmType::Reference(OBJECT.to_string())
    }

    pub fn string() -> JvmType {
        JvmType::Reference(STRING.to_string())
    }

    pub fn array_list() -> JvmType {
        JvmType::Reference(ARRAY_LIST.to_string())
    }

    pub fn linked_hash_map() -> JvmType {
        JvmType::Reference(LINKED_HASH_MAP.to_string())
    }

    pub fn reference(internal: impl Into<String>) -> JvmType {
        JvmType::Reference(internal.into())
    }

    /// JVM field descriptor (`I`, `J`, `Ljava/lang/String;`, `[D`).
    pub fn descriptor(&self) -> String {
        match self {
            JvmType::Boolean => "Z".to_string(),
            JvmType::Byte => "B".to_string(),
            JvmType::Char => "C".to_string(),
            JvmType::Short => "S".to_string(),
            JvmType::Int => "I".to_string(),
            JvmType::Long => "J".to_string(),
            JvmType::Float => "F".to_string(),
            JvmType::Double => "D".to_string(),
            JvmType::Void => "V".to_string(),
            JvmType::Reference(name) => format!("L{name};"),
            JvmType::Array(elem) => format!("[{}", elem.descriptor()),
        }
    }

    /// Internal name for constant-pool Class entries. Arrays use their
    /// descriptor form as the JVM requires.
    pub fn internal_name(&self) -> String {
        match self {
            JvmType::Reference(name) => name.clone(),
            JvmType::Array(_) => self.descriptor(),
            _ => self.descriptor(),
        }
    }

    /// Number of local-variable / operand-stack slots occupied.
    pub fn slot_width(&self) -> u16 {
        match self {
            JvmType::Long | JvmType::Double => 2,
            JvmType::Void => 0,
            _ => 1,
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, JvmType::Long | JvmType::Double)
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            JvmType::Reference(_) | JvmType::Array(_) | JvmType::Void
        )
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, JvmType::Reference(_) | JvmType::Array(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            JvmType::Byte
                | JvmType::Short
                | JvmType::Char
                | JvmType::Int
                | JvmType::Long
                | JvmType::Float
                | JvmType::Double
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            JvmType::Byte | JvmType::Short | JvmType::Char | JvmType::Int | JvmType::Long
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, JvmType::Reference(name) if name == STRING)
    }

    /// Position in the numeric promotion lattice. `byte`, `short` and
    /// `char` all sit below `int`; `char` widens only toward `int`.
    fn numeric_rank(&self) -> Option<u8> {
        match self {
            JvmType::Byte => Some(0),
            JvmType::Short | JvmType::Char => Some(1),
            JvmType::Int => Some(2),
            JvmType::Long => Some(3),
            JvmType::Float => Some(4),
            JvmType::Double => Some(5),
            _ => None,
        }
    }

    /// Whether `self` widens to `to` by a primitive widening conversion.
    pub fn widens_to(&self, to: &JvmType) -> bool {
        if self == to {
            return false;
        }
        match (self.numeric_rank(), to.numeric_rank()) {
            (Some(from), Some(to_rank)) => {
                // char does not widen to short, nor byte to char.
                if matches!(to, JvmType::Char) || matches!((self, to), (JvmType::Char, JvmType::Short)) {
                    return false;
                }
                from < to_rank
            }
            _ => false,
        }
    }

    /// Lattice distance of a widening conversion, for overload scoring.
    pub fn widening_distance(&self, to: &JvmType) -> Option<u8> {
        if !self.widens_to(to) {
            return None;
        }
        Some(to.numeric_rank().unwrap_or(0) - self.numeric_rank().unwrap_or(0))
    }

    /// Wrapper class internal name for a primitive, if any.
    pub fn wrapper(&self) -> Option<&'static str> {
        match self {
            JvmType::Boolean => Some("java/lang/Boolean"),
            JvmType::Byte => Some("java/lang/Byte"),
            JvmType::Char => Some("java/lang/Character"),
            JvmType::Short => Some("java/lang/Short"),
            JvmType::Int => Some("java/lang/Integer"),
            JvmType::Long => Some("java/lang/Long"),
            JvmType::Float => Some("java/lang/Float"),
            JvmType::Double => Some("java/lang/Double"),
            _ => None,
        }
    }

    /// Primitive counterpart of a wrapper reference, if any.
    pub fn unboxed(&self) -> Option<JvmType> {
        match self {
            JvmType::Reference(name) => WRAPPER_PRIMITIVES.get(name.as_str()).cloned(),
            _ => None,
        }
    }

    /// Boxed counterpart of a primitive, as a reference type.
    pub fn boxed(&self) -> Option<JvmType> {
        self.wrapper().map(JvmType::reference)
    }

    /// Friendly name used in diagnostics. Primitives read as Java
    /// keywords; references read as their simple class name.
    pub fn display_name(&self) -> String {
        match self {
            JvmType::Boolean => "boolean".to_string(),
            JvmType::Byte => "byte".to_string(),
            JvmType::Char => "char".to_string(),
            JvmType::Short => "short".to_string(),
            JvmType::Int => "int".to_string(),
            JvmType::Long => "long".to_string(),
            JvmType::Float => "float".to_string(),
            JvmType::Double => "double".to_string(),
            JvmType::Void => "void".to_string(),
            JvmType::Reference(name) => name
                .rsplit('/')
                .next()
                .unwrap_or(name.as_str())
                .to_string(),
            JvmType::Array(elem) => format!("{}[]", elem.display_name()),
        }
    }
}

impl fmt::Display for JvmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

static WRAPPER_PRIMITIVES: Lazy<FxHashMap<&'static str, JvmType>> = Lazy::new(|| {
    let mut m = FxHashMap::default();
    m.insert("java/lang/Boolean", JvmType::Boolean);
    m.insert("java/lang/Byte", JvmType::Byte);
    m.insert("java/lang/Character", JvmType::Char);
    m.insert("java/lang/Short", JvmType::Short);
    m.insert("java/lang/Integer", JvmType::Int);
    m.insert("java/lang/Long", JvmType::Long);
    m.insert("java/lang/Float", JvmType::Float);
    m.insert("java/lang/Double", JvmType::Double);
    m
});

/// Binary numeric promotion: the common type both operands widen to.
/// Sub-int operands promote to `int` first.
pub fn widen(a: &JvmType, b: &JvmType) -> Option<JvmType> {
    if !a.is_numeric() || !b.is_numeric() {
        return None;
    }
    let promote = |t: &JvmType| match t {
        JvmType::Byte | JvmType::Short | JvmType::Char => JvmType::Int,
        other => other.clone(),
    };
    let a = promote(a);
    let b = promote(b);
    if a.numeric_rank()? >= b.numeric_rank()? {
        Some(a)
    } else {
        Some(b)
    }
}

/// Whether the named class is a known subtype of another well-known
/// class or interface. Only the hierarchy the compiler itself emits.
fn is_known_subclass(from: &str, to: &str) -> bool {
    match to {
        OBJECT => true,
        NUMBER => matches!(
            from,
            "java/lang/Byte"
                | "java/lang/Short"
                | "java/lang/Integer"
                | "java/lang/Long"
                | "java/lang/Float"
                | "java/lang/Double"
        ),
        LIST => from == ARRAY_LIST,
        MAP => from == LINKED_HASH_MAP,
        _ => false,
    }
}

/// Whether a value of type `from` may be used where `to` is expected,
/// counting widening, boxing, unboxing, and the well-known reference
/// hierarchy.
pub fn is_assignable(from: &JvmType, to: &JvmType) -> bool {
    if from == to {
        return true;
    }
    if from.widens_to(to) {
        return true;
    }
    match (from, to) {
        // Boxing, including box-then-supertype (int -> Integer -> Number).
        (prim, JvmType::Reference(target)) if prim.is_primitive() => {
            if let Some(wrapper) = prim.wrapper() {
                wrapper == target || is_known_subclass(wrapper, target)
            } else {
                false
            }
        }
        // Unboxing, including unbox-then-widen (Integer -> long).
        (JvmType::Reference(_), prim) if prim.is_primitive() => match from.unboxed() {
            Some(unboxed) => &unboxed == prim || unboxed.widens_to(prim),
            None => false,
        },
        (JvmType::Reference(from_name), JvmType::Reference(to_name)) => {
            is_known_subclass(from_name, to_name)
        }
        (JvmType::Array(_), JvmType::Reference(to_name)) => to_name == OBJECT,
        _ => false,
    }
}

/// Source names for user classes and enums declared in the unit, mapped
/// to JVM internal names. Filled by the registry pass before any
/// annotation is resolved.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    classes: FxHashMap<String, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source_name: impl Into<String>, internal_name: impl Into<String>) {
        self.classes.insert(source_name.into(), internal_name.into());
    }

    pub fn lookup(&self, source_name: &str) -> Option<&str> {
        self.classes.get(source_name).map(String::as_str)
    }

    /// Resolve a source-level annotation to a JVM type. `number` maps to
    /// `double`; `Record<K, V>` and array annotations map to their
    /// collection representations.
    pub fn resolve(&self, ann: &TypeAnn) -> CompileResult<JvmType> {
        match ann {
            TypeAnn::Void(_) => Ok(JvmType::Void),
            TypeAnn::Array { elem, .. } => {
                self.resolve(elem)?;
                Ok(JvmType::array_list())
            }
            TypeAnn::Named { name, args, span } => match name.as_str() {
                "boolean" => Ok(JvmType::Boolean),
                "byte" => Ok(JvmType::Byte),
                "char" => Ok(JvmType::Char),
                "short" => Ok(JvmType::Short),
                "int" => Ok(JvmType::Int),
                "long" => Ok(JvmType::Long),
                "float" => Ok(JvmType::Float),
                "double" | "number" => Ok(JvmType::Double),
                "void" => Ok(JvmType::Void),
                "string" | "String" => Ok(JvmType::string()),
                "object" | "Object" => Ok(JvmType::object()),
                "Record" => Ok(JvmType::linked_hash_map()),
                "Array" => {
                    for arg in args {
                        self.resolve(arg)?;
                    }
                    Ok(JvmType::array_list())
                }
                "RegExp" => Ok(JvmType::reference(PATTERN)),
                other => match self.lookup(other) {
                    Some(internal) => Ok(JvmType::reference(internal)),
                    None => Err(CompileError::with_span(
                        crate::error::CompileErrorKind::Type {
                            message: format!("Unknown type: {other}"),
                        },
                        *span,
                    )),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptors() {
        assert_eq!(JvmType::Int.descriptor(), "I");
        assert_eq!(JvmType::Double.descriptor(), "D");
        assert_eq!(JvmType::string().descriptor(), "Ljava/lang/String;");
        assert_eq!(
            JvmType::Array(Box::new(JvmType::Int)).descriptor(),
            "[I"
        );
    }

    #[test]
    fn test_slot_width() {
        assert_eq!(JvmType::Int.slot_width(), 1);
        assert_eq!(JvmType::Long.slot_width(), 2);
        assert_eq!(JvmType::Double.slot_width(), 2);
        assert_eq!(JvmType::string().slot_width(), 1);
    }

    #[test]
    fn test_widen_promotes_sub_int_to_int() {
        assert_eq!(widen(&JvmType::Byte, &JvmType::Short), Some(JvmType::Int));
        assert_eq!(widen(&JvmType::Char, &JvmType::Char), Some(JvmType::Int));
    }

    #[test]
    fn test_widen_lattice() {
        assert_eq!(widen(&JvmType::Int, &JvmType::Long), Some(JvmType::Long));
        assert_eq!(widen(&JvmType::Long, &JvmType::Float), Some(JvmType::Float));
        assert_eq!(
            widen(&JvmType::Int, &JvmType::Double),
            Some(JvmType::Double)
        );
        assert_eq!(widen(&JvmType::Int, &JvmType::Boolean), None);
    }

    #[test]
    fn test_char_widening_is_restricted() {
        assert!(JvmType::Char.widens_to(&JvmType::Int));
        assert!(!JvmType::Char.widens_to(&JvmType::Short));
        assert!(!JvmType::Byte.widens_to(&JvmType::Char));
    }

    #[test]
    fn test_assignable_boxing_chain() {
        let integer = JvmType::reference("java/lang/Integer");
        assert!(is_assignable(&JvmType::Int, &integer));
        assert!(is_assignable(&JvmType::Int, &JvmType::reference(NUMBER)));
        assert!(is_assignable(&JvmType::Int, &JvmType::object()));
        assert!(!is_assignable(&JvmType::Int, &JvmType::string()));
    }

    #[test]
    fn test_assignable_unbox_then_widen() {
        let integer = JvmType::reference("java/lang/Integer");
        assert!(is_assignable(&integer, &JvmType::Int));
        assert!(is_assignable(&integer, &JvmType::Long));
        assert!(!is_assignable(&integer, &JvmType::Byte));
    }

    #[test]
    fn test_assignable_collections() {
        assert!(is_assignable(
            &JvmType::array_list(),
            &JvmType::reference(LIST)
        ));
        assert!(is_assignable(
            &JvmType::linked_hash_map(),
            &JvmType::reference(MAP)
        ));
        assert!(!is_assignable(
            &JvmType::array_list(),
            &JvmType::reference(MAP)
        ));
    }

    #[test]
    fn test_registry_resolves_annotations() {
        let mut reg = TypeRegistry::new();
        reg.register("Point", "Point");
        assert_eq!(
            reg.resolve(&TypeAnn::named("number")).unwrap(),
            JvmType::Double
        );
        assert_eq!(
            reg.resolve(&TypeAnn::named("string")).unwrap(),
            JvmType::string()
        );
        assert_eq!(
            reg.resolve(&TypeAnn::generic(
                "Record",
                vec![TypeAnn::named("string"), TypeAnn::named("int")]
            ))
            .unwrap(),
            JvmType::linked_hash_map()
        );
        assert_eq!(
            reg.resolve(&TypeAnn::named("Point")).unwrap(),
            JvmType::reference("Point")
        );
        assert!(reg.resolve(&TypeAnn::named("Missing")).is_err());
    }
}
