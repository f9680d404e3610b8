use crate::language::types::BasicType;
use crate::runtime::{
    environment::ScopeRef,
    error::{ErrorKind, RuntimeError, RuntimeResult},
    gc::GarbageCollector,
    typecheck,
    value::{ArrayValue, DictValue, FunctionValue, NativeFn, ObjectValue, Value},
};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// Populates the global scope with the native functions before
/// interpretation begins. Errors raised here carry line 0; the call site
/// patches in the actual line.
pub fn install(globals: &ScopeRef, output: Rc<RefCell<dyn Write>>, gc: &mut GarbageCollector) {
    let mut define = |name: &str, arity: Option<usize>, callable: NativeFn| {
        let function = Value::Function(Rc::new(FunctionValue::Native {
            name: name.to_string(),
            arity,
            callable,
        }));
        gc.register(&function);
        globals.borrow_mut().define(name, function);
    };

    let sink = Rc::clone(&output);
    define(
        "print",
        None,
        Rc::new(move |args| {
            let rendered = args
                .iter()
                .map(|value| value.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            let mut out = sink.borrow_mut();
            writeln!(out, "{rendered}").map_err(|error| {
                RuntimeError::invalid_operation(format!("write failed: {error}"), 0)
            })?;
            Ok(Value::Null)
        }),
    );

    define(
        "input",
        None,
        Rc::new(|args| {
            if args.len() > 1 {
                return Err(arity_error("input", 1, args.len()));
            }
            if let Some(prompt) = args.first() {
                print!("{prompt}");
                let _ = std::io::stdout().flush();
            }
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map_err(|error| {
                RuntimeError::invalid_operation(format!("read failed: {error}"), 0)
            })?;
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            Ok(Value::Str(line))
        }),
    );

    define(
        "len",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Str(v) => Ok(Value::Int(v.len() as i64)),
            Value::Array(v) => Ok(Value::Int(v.len() as i64)),
            Value::Dict(v) => Ok(Value::Int(v.len() as i64)),
            other => Err(RuntimeError::type_error(
                format!("len expects a string, array or dict, found {}", other.type_name()),
                0,
            )),
        }),
    );

    define(
        "type",
        Some(1),
        Rc::new(|args| Ok(Value::Str(args[0].type_name().to_string()))),
    );

    // `typeof` is the same lookup under the original's alternate name.
    define(
        "typeof",
        Some(1),
        Rc::new(|args| Ok(Value::Str(args[0].type_name().to_string()))),
    );

    define(
        "str",
        Some(1),
        Rc::new(|args| typecheck::cast_basic(&args[0], BasicType::Str, 0)),
    );
    define(
        "int",
        Some(1),
        Rc::new(|args| typecheck::cast_basic(&args[0], BasicType::Int, 0)),
    );
    define(
        "float",
        Some(1),
        Rc::new(|args| typecheck::cast_basic(&args[0], BasicType::Float, 0)),
    );
    define(
        "bool",
        Some(1),
        Rc::new(|args| typecheck::cast_basic(&args[0], BasicType::Bool, 0)),
    );

    define(
        "abs",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Int(v) => Ok(Value::Int(v.abs())),
            Value::Float(v) => Ok(Value::Float(v.abs())),
            other => Err(RuntimeError::type_error(
                format!("abs expects a number, found {}", other.type_name()),
                0,
            )),
        }),
    );

    define("min", None, Rc::new(|args| fold_extremum("min", args, |a, b| a < b)));
    define("max", None, Rc::new(|args| fold_extremum("max", args, |a, b| a > b)));

    define(
        "exit",
        None,
        Rc::new(|args| {
            if args.len() > 1 {
                return Err(arity_error("exit", 1, args.len()));
            }
            let code = match args.first() {
                None => 0,
                Some(Value::Int(code)) => *code as i32,
                Some(other) => {
                    return Err(RuntimeError::type_error(
                        format!("exit expects an integer, found {}", other.type_name()),
                        0,
                    ));
                }
            };
            std::process::exit(code);
        }),
    );

    define(
        "panic",
        Some(1),
        Rc::new(|args| Err(RuntimeError::thrown(Value::Str(args[0].to_string()), 0))),
    );

    define(
        "chr",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Int(code) => {
                let c = u32::try_from(*code).ok().and_then(char::from_u32).ok_or_else(|| {
                    RuntimeError::invalid_operation(
                        format!("chr code point {code} out of range"),
                        0,
                    )
                })?;
                Ok(Value::Str(c.to_string()))
            }
            other => Err(RuntimeError::type_error(
                format!("chr expects an integer, found {}", other.type_name()),
                0,
            )),
        }),
    );

    define(
        "ord",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Str(text) => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Int(c as i64)),
                    (None, _) => Err(RuntimeError::invalid_operation(
                        "ord expects a non-empty string",
                        0,
                    )),
                    _ => Err(RuntimeError::invalid_operation(
                        "ord expects a single character",
                        0,
                    )),
                }
            }
            other => Err(RuntimeError::type_error(
                format!("ord expects a string, found {}", other.type_name()),
                0,
            )),
        }),
    );

    // Strings quote under repr; everything else keeps the print rendering.
    define(
        "repr",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Str(text) => Ok(Value::Str(format!("\"{text}\""))),
            other => Ok(Value::Str(other.to_string())),
        }),
    );

    define(
        "hash",
        Some(1),
        Rc::new(|args| {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            args[0].to_string().hash(&mut hasher);
            Ok(Value::Int(hasher.finish() as i64))
        }),
    );

    define(
        "range",
        None,
        Rc::new(|args| {
            let bounds: Vec<i64> = args
                .iter()
                .map(|value| match value {
                    Value::Int(v) => Ok(*v),
                    other => Err(RuntimeError::type_error(
                        format!("range expects integers, found {}", other.type_name()),
                        0,
                    )),
                })
                .collect::<RuntimeResult<_>>()?;
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(arity_error("range", 3, args.len())),
            };
            if step == 0 {
                return Err(RuntimeError::invalid_operation("range step cannot be zero", 0));
            }
            let mut items = Vec::new();
            let mut i = start;
            while (step > 0 && i < stop) || (step < 0 && i > stop) {
                items.push(Value::Int(i));
                i += step;
            }
            Ok(Value::Array(ArrayValue::from_vec(items)))
        }),
    );

    define(
        "assert",
        None,
        Rc::new(|args| {
            if args.is_empty() || args.len() > 2 {
                return Err(arity_error("assert", 2, args.len()));
            }
            if args[0].is_truthy() {
                return Ok(Value::Null);
            }
            let message = args
                .get(1)
                .map(|value| value.to_string())
                .unwrap_or_else(|| "assertion is false".to_string());
            Err(RuntimeError::new(
                ErrorKind::AssertionFailed { message },
                0,
            ))
        }),
    );

    define(
        "array_push",
        Some(2),
        Rc::new(|args| match &args[0] {
            Value::Array(array) => {
                array.push(args[1].clone());
                Ok(Value::Int(array.len() as i64))
            }
            other => Err(RuntimeError::type_error(
                format!("array_push expects an array, found {}", other.type_name()),
                0,
            )),
        }),
    );

    define(
        "array_pop",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Array(array) => array.items.borrow_mut().pop().ok_or_else(|| {
                RuntimeError::invalid_operation("cannot pop from an empty array", 0)
            }),
            other => Err(RuntimeError::type_error(
                format!("array_pop expects an array, found {}", other.type_name()),
                0,
            )),
        }),
    );

    // Call-style slicing: array_slice(a[, start[, stop[, step]]]). Negative
    // bounds rebase by the length; both bounds clamp to [0, len].
    define(
        "array_slice",
        None,
        Rc::new(|args| {
            if args.is_empty() || args.len() > 4 {
                return Err(arity_error("array_slice", 4, args.len()));
            }
            let array = match &args[0] {
                Value::Array(array) => array,
                other => {
                    return Err(RuntimeError::type_error(
                        format!("array_slice expects an array, found {}", other.type_name()),
                        0,
                    ));
                }
            };
            let length = array.len() as i64;
            let bound = |position: usize, default: i64| -> RuntimeResult<i64> {
                match args.get(position) {
                    None => Ok(default),
                    Some(Value::Int(v)) => Ok(*v),
                    Some(other) => Err(RuntimeError::type_error(
                        format!(
                            "array_slice bounds must be integers, found {}",
                            other.type_name()
                        ),
                        0,
                    )),
                }
            };
            let rebase = |v: i64| if v < 0 { v + length } else { v };
            let start = rebase(bound(1, 0)?).clamp(0, length);
            let stop = rebase(bound(2, length)?).clamp(0, length);
            let step = bound(3, 1)?;
            if step == 0 {
                return Err(RuntimeError::invalid_operation(
                    "array_slice step cannot be zero",
                    0,
                ));
            }
            let items = array.items.borrow();
            let mut result = Vec::new();
            let mut i = start;
            if step > 0 {
                while i < stop {
                    result.push(items[i as usize].clone());
                    i += step;
                }
            } else {
                while i > stop {
                    if i < length {
                        result.push(items[i as usize].clone());
                    }
                    i += step;
                }
            }
            Ok(Value::Array(ArrayValue::from_vec(result)))
        }),
    );

    define(
        "dict_keys",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Dict(dict) => {
                let keys = dict
                    .entries
                    .borrow()
                    .keys()
                    .map(|key| Value::Str(key.clone()))
                    .collect();
                Ok(Value::Array(ArrayValue::from_vec(keys)))
            }
            other => Err(RuntimeError::type_error(
                format!("dict_keys expects a dict, found {}", other.type_name()),
                0,
            )),
        }),
    );

    define(
        "dict_values",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Dict(dict) => {
                let values = dict.entries.borrow().values().cloned().collect();
                Ok(Value::Array(ArrayValue::from_vec(values)))
            }
            other => Err(RuntimeError::type_error(
                format!("dict_values expects a dict, found {}", other.type_name()),
                0,
            )),
        }),
    );

    define(
        "dict_has_key",
        Some(2),
        Rc::new(|args| match (&args[0], &args[1]) {
            (Value::Dict(dict), Value::Str(key)) => {
                Ok(Value::Bool(dict.entries.borrow().contains_key(key)))
            }
            (Value::Dict(_), other) => Err(RuntimeError::type_error(
                format!("dictionary key must be a string, found {}", other.type_name()),
                0,
            )),
            (other, _) => Err(RuntimeError::type_error(
                format!("dict_has_key expects a dict, found {}", other.type_name()),
                0,
            )),
        }),
    );

    // The clone builtins are the only way to copy a container; plain
    // assignment always aliases.
    define(
        "array_clone",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Array(array) => Ok(Value::Array(ArrayValue::from_vec(
                array.items.borrow().clone(),
            ))),
            other => Err(RuntimeError::type_error(
                format!("array_clone expects an array, found {}", other.type_name()),
                0,
            )),
        }),
    );

    define(
        "dict_clone",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Dict(dict) => {
                let clone = DictValue::new();
                for (key, value) in dict.entries.borrow().iter() {
                    clone.insert(key.clone(), value.clone());
                }
                Ok(Value::Dict(clone))
            }
            other => Err(RuntimeError::type_error(
                format!("dict_clone expects a dict, found {}", other.type_name()),
                0,
            )),
        }),
    );

    define(
        "object_clone",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Object(object) => {
                let source = object.borrow();
                let mut clone = ObjectValue::new(Rc::clone(&source.class));
                clone.fields = source.fields.clone();
                Ok(Value::Object(Rc::new(RefCell::new(clone))))
            }
            other => Err(RuntimeError::type_error(
                format!("object_clone expects an object, found {}", other.type_name()),
                0,
            )),
        }),
    );

    // isinstance(value, "int|string") matches against a type-name string;
    // `|` unions accept either side.
    define(
        "isinstance",
        Some(2),
        Rc::new(|args| match &args[1] {
            Value::Str(type_name) => {
                Ok(Value::Bool(matches_type_name(&args[0], type_name)?))
            }
            other => Err(RuntimeError::type_error(
                format!(
                    "isinstance expects a type name string, found {}",
                    other.type_name()
                ),
                0,
            )),
        }),
    );

    define(
        "object_fields",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Object(object) => {
                let fields = object
                    .borrow()
                    .fields
                    .keys()
                    .map(|name| Value::Str(name.clone()))
                    .collect();
                Ok(Value::Array(ArrayValue::from_vec(fields)))
            }
            other => Err(RuntimeError::type_error(
                format!("object_fields expects an object, found {}", other.type_name()),
                0,
            )),
        }),
    );

    define(
        "object_methods",
        Some(1),
        Rc::new(|args| match &args[0] {
            Value::Object(object) => {
                let methods = object
                    .borrow()
                    .class
                    .methods
                    .keys()
                    .map(|name| Value::Str(name.clone()))
                    .collect();
                Ok(Value::Array(ArrayValue::from_vec(methods)))
            }
            other => Err(RuntimeError::type_error(
                format!("object_methods expects an object, found {}", other.type_name()),
                0,
            )),
        }),
    );

    let predicates: [(&str, fn(&Value) -> bool); 9] = [
        ("is_int", |v| matches!(v, Value::Int(_))),
        ("is_float", |v| matches!(v, Value::Float(_))),
        ("is_bool", |v| matches!(v, Value::Bool(_))),
        ("is_string", |v| matches!(v, Value::Str(_))),
        ("is_array", |v| matches!(v, Value::Array(_))),
        ("is_dict", |v| matches!(v, Value::Dict(_))),
        ("is_object", |v| matches!(v, Value::Object(_))),
        ("is_function", |v| matches!(v, Value::Function(_))),
        ("is_null", |v| matches!(v, Value::Null)),
    ];
    for (name, predicate) in predicates {
        define(
            name,
            Some(1),
            Rc::new(move |args| Ok(Value::Bool(predicate(&args[0])))),
        );
    }
}

fn fold_extremum(
    name: &str,
    args: &[Value],
    keep_left: fn(f64, f64) -> bool,
) -> RuntimeResult<Value> {
    if args.is_empty() {
        return Err(arity_error(name, 1, 0));
    }
    let mut best = args[0].clone();
    for value in &args[1..] {
        let (a, b) = match (&best, value) {
            (Value::Int(a), Value::Int(b)) => (*a as f64, *b as f64),
            (Value::Int(a), Value::Float(b)) => (*a as f64, *b),
            (Value::Float(a), Value::Int(b)) => (*a, *b as f64),
            (Value::Float(a), Value::Float(b)) => (*a, *b),
            _ => {
                return Err(RuntimeError::type_error(
                    format!("{name} expects numbers"),
                    0,
                ));
            }
        };
        if keep_left(b, a) {
            best = value.clone();
        }
    }
    Ok(best)
}

fn matches_type_name(value: &Value, type_name: &str) -> RuntimeResult<bool> {
    if let Some((first, rest)) = type_name.split_once('|') {
        return Ok(matches_type_name(value, first)? || matches_type_name(value, rest)?);
    }
    Ok(match type_name {
        "null" => matches!(value, Value::Null),
        "int" => matches!(value, Value::Int(_)),
        "float" => matches!(value, Value::Float(_)),
        "bool" => matches!(value, Value::Bool(_)),
        "string" => matches!(value, Value::Str(_)),
        "array" => matches!(value, Value::Array(_)),
        "dict" => matches!(value, Value::Dict(_)),
        "object" => matches!(value, Value::Object(_)),
        "function" => matches!(value, Value::Function(_)),
        "class" => matches!(value, Value::Class(_)),
        other => {
            return Err(RuntimeError::type_error(
                format!("unknown type name `{other}`"),
                0,
            ));
        }
    })
}

fn arity_error(name: &str, expected: usize, received: usize) -> RuntimeError {
    RuntimeError::new(
        ErrorKind::ArityMismatch {
            name: name.to_string(),
            expected,
            received,
        },
        0,
    )
}
