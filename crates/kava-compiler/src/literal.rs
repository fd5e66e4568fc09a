//! Object and array literal planning, plus `Record<K, V>` validation.
//!
//! Object literals compile to `LinkedHashMap` construction. Entry layout
//! is decided here, before any bytecode: keys keep their first-occurrence
//! position, a repeated key keeps only its last value, and spreads of
//! literal objects merge statically under the same rule. A spread whose
//! operand is not a literal survives as a `putAll` at its position.

use kava_ast::{Expr, ObjectLit, ObjectProp, PropKey, TypeAnn};

use crate::error::{CompileError, CompileResult};
use crate::types::{self, JvmType};

/// A planned object literal key.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedKey {
    /// Known at compile time, already in its final string form.
    Static(String),
    /// Computed at runtime and stringified.
    Computed(Expr),
}

/// One step of object literal construction, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedEntry {
    Put { key: PlannedKey, value: Expr },
    /// Spread of a value only known at runtime.
    PutAll(Expr),
}

/// Decide the construction plan for an object literal.
pub fn plan_object_literal(lit: &ObjectLit) -> CompileResult<Vec<PlannedEntry>> {
    let mut entries: Vec<PlannedEntry> = Vec::new();
    merge_props(&lit.props, &mut entries)?;
    Ok(entries)
}

fn merge_props(props: &[ObjectProp], entries: &mut Vec<PlannedEntry>) -> CompileResult<()> {
    for prop in props {
        match prop {
            ObjectProp::KeyValue { key, value } => {
                let key = plan_key(key)?;
                push_entry(entries, key, value.clone());
            }
            ObjectProp::Shorthand(ident) => {
                push_entry(
                    entries,
                    PlannedKey::Static(ident.name.clone()),
                    Expr::Ident(ident.clone()),
                );
            }
            ObjectProp::Spread { expr, .. } => match expr.unparenthesized() {
                // A literal spread merges statically, keeping these rules.
                Expr::Object(inner) => merge_props(&inner.props, entries)?,
                _ => entries.push(PlannedEntry::PutAll(expr.clone())),
            },
        }
    }
    Ok(())
}

fn push_entry(entries: &mut Vec<PlannedEntry>, key: PlannedKey, value: Expr) {
    if let PlannedKey::Static(name) = &key {
        for entry in entries.iter_mut() {
            if let PlannedEntry::Put {
                key: PlannedKey::Static(existing),
                value: slot,
            } = entry
            {
                if existing == name {
                    // First occurrence keeps its position, last write wins.
                    *slot = value;
                    return;
                }
            }
        }
    }
    entries.push(PlannedEntry::Put { key, value });
}

fn plan_key(key: &PropKey) -> CompileResult<PlannedKey> {
    match key {
        PropKey::Ident(ident) => Ok(PlannedKey::Static(ident.name.clone())),
        PropKey::Str(lit) => Ok(PlannedKey::Static(lit.value.clone())),
        // Numeric keys stringify the way the runtime would print them.
        PropKey::Num(lit) => {
            let v = lit.value;
            if v.fract() == 0.0 && v.abs() < 1e15 {
                Ok(PlannedKey::Static(format!("{}", v as i64)))
            } else {
                Ok(PlannedKey::Static(format!("{v}")))
            }
        }
        PropKey::Computed(expr, _) => Ok(PlannedKey::Computed((**expr).clone())),
    }
}

/// Parsed `Record<K, V>` annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordConstraint {
    pub key: JvmType,
    pub value: RecordValue,
}

/// Value side of a record constraint; records nest.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Type(JvmType),
    Nested(Box<RecordConstraint>),
}

impl RecordConstraint {
    /// Extract a constraint from an annotation, if it is a `Record`.
    /// Keys and values are held in boxed form, so `number` keys become
    /// `Double` and primitive value annotations become their wrappers.
    pub fn from_annotation(ann: &TypeAnn, registry: &types::TypeRegistry) -> CompileResult<Option<RecordConstraint>> {
        let TypeAnn::Named { name, args, .. } = ann else {
            return Ok(None);
        };
        if name != "Record" {
            return Ok(None);
        }
        let (key_ann, value_ann) = match args.as_slice() {
            [k, v] => (k, v),
            _ => {
                return Err(CompileError::type_error(
                    "Record requires exactly two type arguments",
                ));
            }
        };
        let key = boxed(registry.resolve(key_ann)?);
        let value = match Self::from_annotation(value_ann, registry)? {
            Some(nested) => RecordValue::Nested(Box::new(nested)),
            None => RecordValue::Type(boxed(registry.resolve(value_ann)?)),
        };
        Ok(Some(RecordConstraint { key, value }))
    }

    /// Validate a planned object literal against this constraint.
    /// `infer` supplies the type of a value expression; it is a closure
    /// so validation stays independent of the emitter's scope state.
    pub fn validate(
        &self,
        entries: &[PlannedEntry],
        infer: &mut dyn FnMut(&Expr) -> CompileResult<JvmType>,
    ) -> CompileResult<()> {
        for entry in entries {
            let PlannedEntry::Put { key, value } = entry else {
                // A runtime spread's contents cannot be checked here.
                continue;
            };
            let key_name = match key {
                PlannedKey::Static(name) => name.clone(),
                PlannedKey::Computed(expr) => {
                    let ty = boxed(infer(expr)?);
                    if !key_matches(&ty, &self.key) {
                        return Err(CompileError::type_error(format!(
                            "Key '<computed>' has type {} but Record requires {}",
                            ty.display_name(),
                            self.key.display_name()
                        )));
                    }
                    continue;
                }
            };
            // Static keys are strings once planned; a numeric-key record
            // accepts digit spellings of its keys.
            if self.key.is_string() || is_numeric_key(&key_name, &self.key) {
                self.validate_value(&key_name, value, infer)?;
            } else {
                return Err(CompileError::type_error(format!(
                    "Key '{key_name}' has type String but Record requires {}",
                    self.key.display_name()
                )));
            }
        }
        Ok(())
    }

    fn validate_value(
        &self,
        key_name: &str,
        value: &Expr,
        infer: &mut dyn FnMut(&Expr) -> CompileResult<JvmType>,
    ) -> CompileResult<()> {
        match &self.value {
            RecordValue::Nested(nested) => match value.unparenthesized() {
                Expr::Object(inner) => {
                    let entries = plan_object_literal(inner)?;
                    nested.validate(&entries, infer)
                }
                other => {
                    let ty = boxed(infer(other)?);
                    Err(CompileError::type_error(format!(
                        "Property '{key_name}' has type {} but Record requires Record",
                        ty.display_name()
                    )))
                }
            },
            RecordValue::Type(required) => {
                let ty = boxed(infer(value)?);
                if value_matches(&ty, required) {
                    Ok(())
                } else {
                    Err(CompileError::type_error(format!(
                        "Property '{key_name}' has type {} but Record requires {}",
                        ty.display_name(),
                        required.display_name()
                    )))
                }
            }
        }
    }
}

fn boxed(ty: JvmType) -> JvmType {
    ty.boxed().unwrap_or(ty)
}

fn is_numeric_key(key: &str, required: &JvmType) -> bool {
    match required.unboxed() {
        Some(prim) if prim.is_numeric() => key.parse::<f64>().is_ok(),
        _ => false,
    }
}

fn key_matches(ty: &JvmType, required: &JvmType) -> bool {
    ty == required || required.is_string() && ty.is_string()
}

/// Boxed-form assignability with numeric-literal leniency: an Integer
/// value satisfies a Double slot since the emitter widens before boxing.
fn value_matches(ty: &JvmType, required: &JvmType) -> bool {
    if ty == required {
        return true;
    }
    match (ty.unboxed(), required.unboxed()) {
        (Some(from), Some(to)) => from.widens_to(&to),
        _ => types::is_assignable(ty, required),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kava_ast::{Ident, ObjectLit, Span, StrLit, TypeAnn};

    fn obj(props: Vec<ObjectProp>) -> ObjectLit {
        ObjectLit {
            props,
            span: Span::NONE,
        }
    }

    fn kv(key: &str, value: Expr) -> ObjectProp {
        ObjectProp::KeyValue {
            key: PropKey::Ident(Ident::new(key)),
            value,
        }
    }

    fn static_keys(entries: &[PlannedEntry]) -> Vec<&str> {
        entries
            .iter()
            .filter_map(|e| match e {
                PlannedEntry::Put {
                    key: PlannedKey::Static(k),
                    ..
                } => Some(k.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_occurrence_order_last_write_wins() {
        let lit = obj(vec![
            kv("a", Expr::int(1)),
            kv("b", Expr::int(2)),
            kv("a", Expr::int(3)),
        ]);
        let plan = plan_object_literal(&lit).unwrap();
        assert_eq!(static_keys(&plan), vec!["a", "b"]);
        match &plan[0] {
            PlannedEntry::Put { value, .. } => assert_eq!(value, &Expr::int(3)),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn test_literal_spread_merges_statically() {
        let inner = obj(vec![kv("b", Expr::int(20)), kv("c", Expr::int(30))]);
        let lit = obj(vec![
            kv("a", Expr::int(1)),
            kv("b", Expr::int(2)),
            ObjectProp::Spread {
                expr: Expr::Object(inner),
                span: Span::NONE,
            },
        ]);
        let plan = plan_object_literal(&lit).unwrap();
        // b keeps its original position but takes the spread's value.
        assert_eq!(static_keys(&plan), vec!["a", "b", "c"]);
        match &plan[1] {
            PlannedEntry::Put { value, .. } => assert_eq!(value, &Expr::int(20)),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn test_runtime_spread_becomes_put_all() {
        let lit = obj(vec![
            kv("a", Expr::int(1)),
            ObjectProp::Spread {
                expr: Expr::ident("other"),
                span: Span::NONE,
            },
        ]);
        let plan = plan_object_literal(&lit).unwrap();
        assert!(matches!(plan[1], PlannedEntry::PutAll(_)));
    }

    #[test]
    fn test_numeric_and_string_keys_stringify() {
        let lit = obj(vec![
            ObjectProp::KeyValue {
                key: PropKey::Num(kava_ast::FloatLit::new(1.0)),
                value: Expr::str("x"),
            },
            ObjectProp::KeyValue {
                key: PropKey::Str(StrLit::new("a b")),
                value: Expr::str("y"),
            },
        ]);
        let plan = plan_object_literal(&lit).unwrap();
        assert_eq!(static_keys(&plan), vec!["1", "a b"]);
    }

    #[test]
    fn test_shorthand_expands() {
        let lit = obj(vec![ObjectProp::Shorthand(Ident::new("x"))]);
        let plan = plan_object_literal(&lit).unwrap();
        match &plan[0] {
            PlannedEntry::Put {
                key: PlannedKey::Static(k),
                value,
            } => {
                assert_eq!(k, "x");
                assert_eq!(value, &Expr::ident("x"));
            }
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    fn record_ann(value: &str) -> TypeAnn {
        TypeAnn::generic(
            "Record",
            vec![TypeAnn::named("string"), TypeAnn::named(value)],
        )
    }

    fn constraint(ann: &TypeAnn) -> RecordConstraint {
        let registry = types::TypeRegistry::new();
        RecordConstraint::from_annotation(ann, &registry)
            .unwrap()
            .expect("record annotation")
    }

    fn simple_infer(expr: &Expr) -> CompileResult<JvmType> {
        Ok(match expr {
            Expr::Int(_) => JvmType::Int,
            Expr::Float(_) => JvmType::Double,
            Expr::Str(_) => JvmType::string(),
            Expr::Bool(_) => JvmType::Boolean,
            _ => JvmType::object(),
        })
    }

    #[test]
    fn test_record_accepts_matching_values() {
        let c = constraint(&record_ann("number"));
        let lit = obj(vec![kv("a", Expr::int(1)), kv("b", Expr::float(2.5))]);
        let plan = plan_object_literal(&lit).unwrap();
        c.validate(&plan, &mut simple_infer).unwrap();
    }

    #[test]
    fn test_record_names_offending_property() {
        let c = constraint(&record_ann("number"));
        let lit = obj(vec![kv("a", Expr::int(1)), kv("b", Expr::str("x"))]);
        let plan = plan_object_literal(&lit).unwrap();
        let err = c.validate(&plan, &mut simple_infer).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Property 'b' has type String but Record requires Double"
        );
    }

    #[test]
    fn test_record_numeric_key_requirement() {
        let ann = TypeAnn::generic(
            "Record",
            vec![TypeAnn::named("int"), TypeAnn::named("string")],
        );
        let c = constraint(&ann);
        let ok = obj(vec![ObjectProp::KeyValue {
            key: PropKey::Num(kava_ast::FloatLit::new(1.0)),
            value: Expr::str("x"),
        }]);
        let plan = plan_object_literal(&ok).unwrap();
        c.validate(&plan, &mut simple_infer).unwrap();

        let bad = obj(vec![kv("name", Expr::str("x"))]);
        let plan = plan_object_literal(&bad).unwrap();
        let err = c.validate(&plan, &mut simple_infer).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Key 'name' has type String but Record requires Integer"
        );
    }

    #[test]
    fn test_nested_record_validation() {
        let ann = TypeAnn::generic(
            "Record",
            vec![TypeAnn::named("string"), record_ann("int")],
        );
        let c = constraint(&ann);
        let inner = obj(vec![kv("x", Expr::str("bad"))]);
        let lit = obj(vec![kv("outer", Expr::Object(inner))]);
        let plan = plan_object_literal(&lit).unwrap();
        let err = c.validate(&plan, &mut simple_infer).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Property 'x' has type String but Record requires Integer"
        );
    }
}
