use crate::language::types::{BasicType, TypeAnnotation};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::value::{ArrayValue, DictValue, Value};

/// Annotation satisfaction. Containers are checked element-wise; dictionary
/// keys are strings at runtime, so a dict annotation's key type must admit
/// `string`.
pub fn check_type(value: &Value, annotation: &TypeAnnotation) -> bool {
    match annotation {
        TypeAnnotation::Any => true,
        TypeAnnotation::Union(types) => types.iter().any(|ty| check_basic(value, *ty)),
        TypeAnnotation::Array(element) => match value {
            Value::Array(array) => array
                .items
                .borrow()
                .iter()
                .all(|item| check_type(item, element)),
            _ => false,
        },
        TypeAnnotation::Dict { key, value: value_ty } => match value {
            Value::Dict(dict) => {
                if !admits_string_keys(key) {
                    return false;
                }
                dict.entries
                    .borrow()
                    .values()
                    .all(|entry| check_type(entry, value_ty))
            }
            _ => false,
        },
    }
}

fn admits_string_keys(annotation: &TypeAnnotation) -> bool {
    match annotation {
        TypeAnnotation::Any => true,
        TypeAnnotation::Union(types) => types.contains(&BasicType::Str),
        _ => false,
    }
}

fn check_basic(value: &Value, ty: BasicType) -> bool {
    matches!(
        (value, ty),
        (Value::Int(_), BasicType::Int)
            | (Value::Float(_), BasicType::Float)
            | (Value::Bool(_), BasicType::Bool)
            | (Value::Str(_), BasicType::Str)
    )
}

/// Cast(V, A): unions try each member in order and keep the first coercion
/// that succeeds; containers coerce element-wise into fresh containers.
pub fn cast_value(value: &Value, annotation: &TypeAnnotation, line: usize) -> RuntimeResult<Value> {
    match annotation {
        TypeAnnotation::Any => Ok(value.clone()),
        TypeAnnotation::Union(types) => {
            for ty in types {
                if let Ok(cast) = cast_basic(value, *ty, line) {
                    return Ok(cast);
                }
            }
            Err(RuntimeError::type_mismatch(
                format!("cannot cast {} to {annotation}", value.type_name()),
                line,
            ))
        }
        TypeAnnotation::Array(element) => match value {
            Value::Array(array) => {
                let mut items = Vec::with_capacity(array.len());
                for item in array.items.borrow().iter() {
                    items.push(cast_value(item, element, line)?);
                }
                Ok(Value::Array(ArrayValue::from_vec(items)))
            }
            // Anything else becomes a one-element array of the coerced value.
            other => {
                let cast = cast_value(other, element, line)?;
                Ok(Value::Array(ArrayValue::from_vec(vec![cast])))
            }
        },
        TypeAnnotation::Dict { value: value_ty, .. } => match value {
            Value::Dict(dict) => {
                let result = DictValue::new();
                for (key, entry) in dict.entries.borrow().iter() {
                    result.insert(key.clone(), cast_value(entry, value_ty, line)?);
                }
                Ok(Value::Dict(result))
            }
            other => Err(RuntimeError::type_mismatch(
                format!("cannot cast {} to {annotation}", other.type_name()),
                line,
            )),
        },
    }
}

pub fn cast_basic(value: &Value, ty: BasicType, line: usize) -> RuntimeResult<Value> {
    match ty {
        BasicType::Int => match value {
            Value::Int(v) => Ok(Value::Int(*v)),
            Value::Float(v) => Ok(Value::Int(*v as i64)),
            Value::Bool(v) => Ok(Value::Int(*v as i64)),
            Value::Str(v) => v.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                RuntimeError::type_mismatch(format!("cannot parse `{v}` as int"), line)
            }),
            other => Err(RuntimeError::type_mismatch(
                format!("cannot cast {} to int", other.type_name()),
                line,
            )),
        },
        BasicType::Float => match value {
            Value::Float(v) => Ok(Value::Float(*v)),
            Value::Int(v) => Ok(Value::Float(*v as f64)),
            Value::Bool(v) => Ok(Value::Float(if *v { 1.0 } else { 0.0 })),
            Value::Str(v) => v.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                RuntimeError::type_mismatch(format!("cannot parse `{v}` as float"), line)
            }),
            other => Err(RuntimeError::type_mismatch(
                format!("cannot cast {} to float", other.type_name()),
                line,
            )),
        },
        BasicType::Bool => match value {
            Value::Bool(v) => Ok(Value::Bool(*v)),
            Value::Int(v) => Ok(Value::Bool(*v != 0)),
            Value::Float(v) => Ok(Value::Bool(*v != 0.0)),
            Value::Str(v) => Ok(Value::Bool(!v.is_empty() && v != "false" && v != "0")),
            other => Err(RuntimeError::type_mismatch(
                format!("cannot cast {} to bool", other.type_name()),
                line,
            )),
        },
        BasicType::Str => Ok(Value::Str(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::types::TypeAnnotation as TA;

    fn union(types: &[BasicType]) -> TA {
        TA::Union(types.to_vec())
    }

    #[test]
    fn any_is_always_satisfied() {
        assert!(check_type(&Value::Null, &TA::Any));
        assert!(check_type(&Value::Array(ArrayValue::new()), &TA::Any));
    }

    #[test]
    fn union_matches_any_member() {
        let annotation = union(&[BasicType::Int, BasicType::Float]);
        assert!(check_type(&Value::Int(1), &annotation));
        assert!(check_type(&Value::Float(1.5), &annotation));
        assert!(!check_type(&Value::Str("x".into()), &annotation));
    }

    #[test]
    fn array_annotation_checks_every_element() {
        let annotation = TA::Array(Box::new(union(&[BasicType::Int])));
        let ok = Value::Array(ArrayValue::from_vec(vec![Value::Int(1), Value::Int(2)]));
        let bad = Value::Array(ArrayValue::from_vec(vec![Value::Int(1), Value::Str("x".into())]));
        assert!(check_type(&ok, &annotation));
        assert!(!check_type(&bad, &annotation));
        assert!(!check_type(&Value::Int(1), &annotation));
    }

    #[test]
    fn dict_annotation_requires_string_keys() {
        let good = TA::Dict {
            key: Box::new(union(&[BasicType::Str])),
            value: Box::new(TA::Any),
        };
        let bad_key = TA::Dict {
            key: Box::new(union(&[BasicType::Int])),
            value: Box::new(TA::Any),
        };
        let dict = DictValue::new();
        dict.insert("a".into(), Value::Int(1));
        assert!(check_type(&Value::Dict(dict.clone()), &good));
        assert!(!check_type(&Value::Dict(dict), &bad_key));
    }

    #[test]
    fn union_cast_takes_first_success() {
        let annotation = union(&[BasicType::Int, BasicType::Str]);
        let cast = cast_value(&Value::Str("12".into()), &annotation, 1).unwrap();
        assert!(matches!(cast, Value::Int(12)));
        let cast = cast_value(&Value::Str("abc".into()), &annotation, 1).unwrap();
        assert!(matches!(cast, Value::Str(_)));
    }

    #[test]
    fn string_parses_or_fails_numeric_casts() {
        assert!(matches!(
            cast_basic(&Value::Str("42".into()), BasicType::Int, 1),
            Ok(Value::Int(42))
        ));
        assert!(cast_basic(&Value::Str("4x".into()), BasicType::Int, 1).is_err());
        assert!(matches!(
            cast_basic(&Value::Str("2.5".into()), BasicType::Float, 1),
            Ok(Value::Float(_))
        ));
    }

    #[test]
    fn string_to_bool_uses_literal_truthiness() {
        for (text, expected) in [("", false), ("false", false), ("0", false), ("yes", true)] {
            let Ok(Value::Bool(actual)) =
                cast_basic(&Value::Str(text.into()), BasicType::Bool, 1)
            else {
                panic!("expected bool cast");
            };
            assert_eq!(actual, expected, "{text:?}");
        }
    }

    #[test]
    fn container_casts_produce_fresh_containers() {
        let source = ArrayValue::from_vec(vec![Value::Str("1".into()), Value::Str("2".into())]);
        let annotation = TA::Array(Box::new(union(&[BasicType::Int])));
        let Ok(Value::Array(cast)) = cast_value(&Value::Array(source.clone()), &annotation, 1)
        else {
            panic!("expected array cast");
        };
        assert!(!std::rc::Rc::ptr_eq(&source.items, &cast.items));
        assert!(matches!(cast.get(0), Some(Value::Int(1))));
    }

    #[test]
    fn scalar_casts_to_array_wrap_in_one_element() {
        let annotation = TA::Array(Box::new(union(&[BasicType::Int])));
        let Ok(Value::Array(cast)) = cast_value(&Value::Int(7), &annotation, 1) else {
            panic!("expected array cast");
        };
        assert_eq!(cast.len(), 1);
    }
}
