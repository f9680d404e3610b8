use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

pub type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug)]
struct Binding {
    value: Value,
    constant: bool,
}

/// A name-to-value mapping with an optional enclosing pointer; the unit of
/// lexical lookup. Scopes are shared so closures can capture the scope active
/// at their point of declaration.
#[derive(Debug, Default)]
pub struct Scope {
    values: BTreeMap<String, Binding>,
    enclosing: Option<ScopeRef>,
}

impl Scope {
    pub fn new() -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            values: BTreeMap::new(),
            enclosing: None,
        }))
    }

    pub fn with_enclosing(enclosing: ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            values: BTreeMap::new(),
            enclosing: Some(enclosing),
        }))
    }

    pub fn enclosing(&self) -> Option<ScopeRef> {
        self.enclosing.clone()
    }

    /// Binds in this scope, shadowing any enclosing binding.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(
            name.to_string(),
            Binding {
                value,
                constant: false,
            },
        );
    }

    pub fn define_const(&mut self, name: &str, value: Value) {
        self.values.insert(
            name.to_string(),
            Binding {
                value,
                constant: true,
            },
        );
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.values.get(name).map(|binding| binding.value.clone())
    }

    /// Snapshot of the local bindings, for export extraction and GC marking.
    pub fn local_values(&self) -> Vec<(String, Value)> {
        self.values
            .iter()
            .map(|(name, binding)| (name.clone(), binding.value.clone()))
            .collect()
    }
}

/// Lookup walking the enclosing chain.
pub fn get(scope: &ScopeRef, name: &str, line: usize) -> RuntimeResult<Value> {
    let mut current = Rc::clone(scope);
    loop {
        if let Some(value) = current.borrow().get_local(name) {
            return Ok(value);
        }
        let next = current.borrow().enclosing();
        match next {
            Some(enclosing) => current = enclosing,
            None => {
                return Err(RuntimeError::undefined_variable(name, line));
            }
        }
    }
}

/// Assignment walks outward to the scope that holds the binding; assigning a
/// const binding or an unbound name is an error.
pub fn assign(scope: &ScopeRef, name: &str, value: Value, line: usize) -> RuntimeResult<()> {
    let mut current = Rc::clone(scope);
    loop {
        {
            let mut borrowed = current.borrow_mut();
            if let Some(binding) = borrowed.values.get_mut(name) {
                if binding.constant {
                    return Err(RuntimeError::const_reassignment(name, line));
                }
                binding.value = value;
                return Ok(());
            }
        }
        let next = current.borrow().enclosing();
        match next {
            Some(enclosing) => current = enclosing,
            None => {
                return Err(RuntimeError::undefined_variable(name, line));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_the_enclosing_chain() {
        let outer = Scope::new();
        outer.borrow_mut().define("x", Value::Int(1));
        let inner = Scope::with_enclosing(Rc::clone(&outer));
        assert!(matches!(get(&inner, "x", 1), Ok(Value::Int(1))));
        assert!(get(&inner, "y", 1).is_err());
    }

    #[test]
    fn assignment_mutates_the_defining_scope() {
        let outer = Scope::new();
        outer.borrow_mut().define("x", Value::Int(1));
        let inner = Scope::with_enclosing(Rc::clone(&outer));
        assign(&inner, "x", Value::Int(2), 1).unwrap();
        assert!(matches!(outer.borrow().get_local("x"), Some(Value::Int(2))));
    }

    #[test]
    fn const_bindings_reject_reassignment() {
        let scope = Scope::new();
        scope.borrow_mut().define_const("c", Value::Int(1));
        assert!(assign(&scope, "c", Value::Int(2), 1).is_err());
    }

    #[test]
    fn shadowing_does_not_touch_the_outer_binding() {
        let outer = Scope::new();
        outer.borrow_mut().define("x", Value::Int(1));
        let inner = Scope::with_enclosing(Rc::clone(&outer));
        inner.borrow_mut().define("x", Value::Int(9));
        assert!(matches!(get(&inner, "x", 1), Ok(Value::Int(9))));
        assert!(matches!(get(&outer, "x", 1), Ok(Value::Int(1))));
    }
}
