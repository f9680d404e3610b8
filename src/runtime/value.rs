use crate::language::ast::FunctionDecl;
use crate::runtime::environment::ScopeRef;
use crate::runtime::error::RuntimeError;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Tagged runtime value. Containers, objects, functions, classes, and scopes
/// are shared handles: aliasing is observable, and copies are only produced
/// by the clone builtins.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Array(ArrayValue),
    Dict(DictValue),
    Object(ObjectRef),
    Function(FunctionRef),
    Class(ClassRef),
    Scope(ScopeRef),
}

pub type ObjectRef = Rc<RefCell<ObjectValue>>;
pub type FunctionRef = Rc<FunctionValue>;
pub type ClassRef = Rc<ClassValue>;

impl Value {
    /// `null` and `false` are false; everything else is true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Dict(_) => "dict",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Class(_) => "class",
            Value::Scope(_) => "scope",
        }
    }

    /// Stable address for handle values; scalar values have no identity.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Null | Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Str(_) => {
                None
            }
            Value::Array(array) => Some(Rc::as_ptr(&array.items) as usize),
            Value::Dict(dict) => Some(Rc::as_ptr(&dict.entries) as usize),
            Value::Object(object) => Some(Rc::as_ptr(object) as *const u8 as usize),
            Value::Function(function) => Some(Rc::as_ptr(function) as *const u8 as usize),
            Value::Class(class) => Some(Rc::as_ptr(class) as *const u8 as usize),
            Value::Scope(scope) => Some(Rc::as_ptr(scope) as *const u8 as usize),
        }
    }

    // Scalars have no identity to speak of.
    pub fn is_handle(&self) -> bool {
        self.identity().is_some()
    }
}

/// Structural equality: scalars by value (int and float cross-compare),
/// arrays and dicts deep, objects and the other handles by identity.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
        (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            if Rc::ptr_eq(&a.items, &b.items) {
                return true;
            }
            let a = a.items.borrow();
            let b = b.items.borrow();
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Dict(a), Value::Dict(b)) => {
            if Rc::ptr_eq(&a.entries, &b.entries) {
                return true;
            }
            let a = a.entries.borrow();
            let b = b.entries.borrow();
            a.len() == b.len()
                && a.iter().all(|(key, value)| {
                    b.get(key).map(|other| values_equal(value, other)).unwrap_or(false)
                })
        }
        (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
        (Value::Scope(a), Value::Scope(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

#[derive(Clone, Debug)]
pub struct ArrayValue {
    pub items: Rc<RefCell<Vec<Value>>>,
}

impl ArrayValue {
    pub fn new() -> Self {
        Self {
            items: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            items: Rc::new(RefCell::new(items)),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    pub fn push(&self, value: Value) {
        self.items.borrow_mut().push(value);
    }
}

impl Default for ArrayValue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct DictValue {
    pub entries: Rc<RefCell<BTreeMap<String, Value>>>,
}

impl DictValue {
    pub fn new() -> Self {
        Self {
            entries: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }

    pub fn insert(&self, key: String, value: Value) {
        self.entries.borrow_mut().insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Default for DictValue {
    fn default() -> Self {
        Self::new()
    }
}

/// Class instance: a class handle plus mutable fields.
#[derive(Debug)]
pub struct ObjectValue {
    pub class: ClassRef,
    pub fields: BTreeMap<String, Value>,
}

impl ObjectValue {
    pub fn new(class: ClassRef) -> Self {
        Self {
            class,
            fields: BTreeMap::new(),
        }
    }
}

/// Either a closure over a declaration or a native call-site handle.
pub enum FunctionValue {
    Declared {
        declaration: Rc<FunctionDecl>,
        closure: ScopeRef,
        is_constructor: bool,
    },
    Native {
        name: String,
        /// `None` marks a variadic native.
        arity: Option<usize>,
        callable: NativeFn,
    },
}

pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>;

impl FunctionValue {
    pub fn name(&self) -> &str {
        match self {
            FunctionValue::Declared { declaration, .. } => &declaration.name,
            FunctionValue::Native { name, .. } => name,
        }
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionValue::Declared { declaration, .. } => f
                .debug_struct("Function")
                .field("name", &declaration.name)
                .finish(),
            FunctionValue::Native { name, arity, .. } => f
                .debug_struct("NativeFunction")
                .field("name", name)
                .field("arity", arity)
                .finish(),
        }
    }
}

#[derive(Debug)]
pub struct ClassValue {
    pub name: String,
    pub superclass: Option<ClassRef>,
    pub methods: BTreeMap<String, FunctionRef>,
}

impl ClassValue {
    /// Method lookup walks the superclass chain.
    pub fn find_method(&self, name: &str) -> Option<FunctionRef> {
        if let Some(method) = self.methods.get(name) {
            return Some(Rc::clone(method));
        }
        self.superclass
            .as_ref()
            .and_then(|superclass| superclass.find_method(name))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Array(array) => {
                write!(f, "[")?;
                for (idx, value) in array.items.borrow().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Value::Dict(dict) => {
                write!(f, "{{")?;
                let mut first = true;
                for (key, value) in dict.entries.borrow().iter() {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Object(object) => write!(f, "<object {}>", object.borrow().class.name),
            Value::Function(function) => write!(f, "<function {}>", function.name()),
            Value::Class(class) => write!(f, "<class {}>", class.name),
            Value::Scope(_) => write!(f, "<scope>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_null_and_false_only() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::Str(String::new()).is_truthy());
        assert!(Value::Array(ArrayValue::new()).is_truthy());
    }

    #[test]
    fn arrays_compare_deep_but_alias_by_identity() {
        let a = ArrayValue::from_vec(vec![Value::Int(1), Value::Int(2)]);
        let b = ArrayValue::from_vec(vec![Value::Int(1), Value::Int(2)]);
        assert!(values_equal(&Value::Array(a.clone()), &Value::Array(b)));
        let alias = Value::Array(a.clone());
        a.push(Value::Int(3));
        assert_eq!(alias.to_string(), "[1, 2, 3]");
    }

    #[test]
    fn ints_and_floats_cross_compare() {
        assert!(values_equal(&Value::Int(2), &Value::Float(2.0)));
        assert!(!values_equal(&Value::Int(2), &Value::Float(2.5)));
    }

    #[test]
    fn rendering_matches_canonical_forms() {
        let dict = DictValue::new();
        dict.insert("a".into(), Value::Int(1));
        assert_eq!(Value::Dict(dict).to_string(), "{a: 1}");
        assert_eq!(Value::Float(3.0).to_string(), "3");
        assert_eq!(
            Value::Array(ArrayValue::from_vec(vec![Value::Str("x".into())])).to_string(),
            "[x]"
        );
    }
}
