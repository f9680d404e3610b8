use crate::runtime::environment::ScopeRef;
use crate::runtime::value::{FunctionValue, Value};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Young allocations surviving a collection are promoted; if more than this
/// many remain young afterwards, a full collection over both generations
/// follows immediately.
const YOUNG_RETAINED_THRESHOLD: usize = 1000;

/// Steps per incremental collection cycle.
const INCREMENTAL_STEPS: usize = 10;

/// Reachability-based mark-and-sweep over a registry of tracked allocations,
/// split into a young and an old generation. The registry holds its own
/// handles, so an entry stays resolvable until a sweep drops it; reachability
/// queries answer against the registry, not against host memory.
#[derive(Default)]
pub struct GarbageCollector {
    young: HashMap<usize, Value>,
    old: HashMap<usize, Value>,
    marked: HashSet<usize>,
    incremental_step: usize,
}

impl GarbageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly constructed allocation in the young generation.
    /// The evaluator calls this at every allocation site.
    pub fn register(&mut self, value: &Value) {
        if let Some(address) = value.identity() {
            if !self.old.contains_key(&address) {
                self.young.insert(address, value.clone());
            }
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.young.len() + self.old.len()
    }

    pub fn young_count(&self) -> usize {
        self.young.len()
    }

    pub fn old_count(&self) -> usize {
        self.old.len()
    }

    /// Whether an allocation is still considered live by the registry.
    pub fn is_tracked(&self, value: &Value) -> bool {
        match value.identity() {
            Some(address) => {
                self.young.contains_key(&address) || self.old.contains_key(&address)
            }
            None => false,
        }
    }

    /// One collection request: mark from the root scope, sweep the young
    /// generation (survivors are promoted), and fall back to a full
    /// collection when too much of the young set survives. A batch request
    /// restarts any incremental cycle in flight.
    pub fn collect(&mut self, root: &ScopeRef) {
        self.incremental_step = 0;
        self.mark_from(root);
        self.sweep_young();
        if self.young.len() + self.old.len() > YOUNG_RETAINED_THRESHOLD {
            self.mark_from(root);
            self.sweep_full();
        }
        self.marked.clear();
    }

    /// Forces a single mark over both generations and sweeps everything
    /// unreachable. Restarts any incremental cycle in flight.
    pub fn collect_full(&mut self, root: &ScopeRef) {
        self.incremental_step = 0;
        self.mark_from(root);
        self.sweep_full();
        self.marked.clear();
    }

    /// Incremental variant: the same mark/sweep split across
    /// `INCREMENTAL_STEPS` calls so a single call bounds pause time. Relies
    /// on every allocation being registered at its allocation site between
    /// steps.
    pub fn collect_incremental(&mut self, root: &ScopeRef) {
        if self.incremental_step == 0 {
            self.marked.clear();
            self.mark_scope(root, &mut HashSet::new());
            self.incremental_step += 1;
        } else if self.incremental_step < INCREMENTAL_STEPS {
            // Re-marking from the root keeps allocations reachable through
            // bindings created since the first step.
            self.mark_scope(root, &mut HashSet::new());
            self.incremental_step += 1;
        } else {
            // Allocations registered since the last mark step must survive;
            // a final root re-mark closes that window before sweeping.
            self.mark_scope(root, &mut HashSet::new());
            self.sweep_full();
            self.marked.clear();
            self.incremental_step = 0;
        }
    }

    fn mark_from(&mut self, root: &ScopeRef) {
        self.marked.clear();
        self.mark_scope(root, &mut HashSet::new());
    }

    fn mark_scope(&mut self, scope: &ScopeRef, visited: &mut HashSet<usize>) {
        let address = Rc::as_ptr(scope) as *const u8 as usize;
        if !visited.insert(address) {
            return;
        }
        let bindings = scope.borrow().local_values();
        for (_, value) in bindings {
            self.mark_value(&value, visited);
        }
        let enclosing = scope.borrow().enclosing();
        if let Some(enclosing) = enclosing {
            self.mark_scope(&enclosing, visited);
        }
    }

    /// Marks a value and recurses into its referents. Already-marked nodes
    /// break the recursion, which is what makes cycles safe.
    fn mark_value(&mut self, value: &Value, visited: &mut HashSet<usize>) {
        let Some(address) = value.identity() else {
            return;
        };
        if !self.marked.insert(address) {
            return;
        }
        match value {
            Value::Array(array) => {
                for item in array.items.borrow().iter() {
                    self.mark_value(item, visited);
                }
            }
            Value::Dict(dict) => {
                for entry in dict.entries.borrow().values() {
                    self.mark_value(entry, visited);
                }
            }
            Value::Object(object) => {
                let object = object.borrow();
                self.mark_value(&Value::Class(Rc::clone(&object.class)), visited);
                for field in object.fields.values() {
                    self.mark_value(field, visited);
                }
            }
            Value::Class(class) => {
                for method in class.methods.values() {
                    self.mark_value(&Value::Function(Rc::clone(method)), visited);
                }
                if let Some(superclass) = &class.superclass {
                    self.mark_value(&Value::Class(Rc::clone(superclass)), visited);
                }
            }
            Value::Function(function) => {
                if let FunctionValue::Declared { closure, .. } = function.as_ref() {
                    self.mark_scope(closure, visited);
                }
            }
            Value::Scope(scope) => self.mark_scope(scope, visited),
            Value::Null | Value::Int(_) | Value::Float(_) | Value::Bool(_) | Value::Str(_) => {}
        }
    }

    fn sweep_young(&mut self) {
        let marked = &self.marked;
        let mut survivors = Vec::new();
        self.young.retain(|address, value| {
            if marked.contains(address) {
                survivors.push((*address, value.clone()));
            }
            false
        });
        for (address, value) in survivors {
            self.old.insert(address, value);
        }
    }

    fn sweep_full(&mut self) {
        let marked = &self.marked;
        self.young.retain(|address, _| marked.contains(address));
        self.old.retain(|address, _| marked.contains(address));
        // Survivors of a full sweep all belong to the old generation.
        let promoted: Vec<(usize, Value)> = self.young.drain().collect();
        for (address, value) in promoted {
            self.old.insert(address, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::environment::Scope;
    use crate::runtime::value::{ArrayValue, DictValue};

    #[test]
    fn rooted_values_survive_collection_and_promote() {
        let root = Scope::new();
        let mut gc = GarbageCollector::new();
        let array = Value::Array(ArrayValue::from_vec(vec![Value::Int(1)]));
        gc.register(&array);
        root.borrow_mut().define("a", array.clone());
        gc.collect(&root);
        assert!(gc.is_tracked(&array));
        assert_eq!(gc.young_count(), 0);
        assert_eq!(gc.old_count(), 1);
    }

    #[test]
    fn unreachable_values_are_reclaimed() {
        let root = Scope::new();
        let mut gc = GarbageCollector::new();
        let array = Value::Array(ArrayValue::new());
        gc.register(&array);
        gc.collect(&root);
        assert!(!gc.is_tracked(&array));
    }

    #[test]
    fn cyclic_dicts_are_reclaimed_once_unrooted() {
        let root = Scope::new();
        let mut gc = GarbageCollector::new();
        let a = DictValue::new();
        let b = DictValue::new();
        a.insert("b".into(), Value::Dict(b.clone()));
        b.insert("a".into(), Value::Dict(a.clone()));
        let a = Value::Dict(a);
        let b = Value::Dict(b);
        gc.register(&a);
        gc.register(&b);
        root.borrow_mut().define("a", a.clone());
        root.borrow_mut().define("b", b.clone());
        gc.collect(&root);
        assert!(gc.is_tracked(&a) && gc.is_tracked(&b));

        root.borrow_mut().define("a", Value::Null);
        root.borrow_mut().define("b", Value::Null);
        gc.collect_full(&root);
        assert!(!gc.is_tracked(&a));
        assert!(!gc.is_tracked(&b));
    }

    #[test]
    fn values_reachable_through_nested_scopes_survive() {
        let root = Scope::new();
        let child = Scope::with_enclosing(Rc::clone(&root));
        let mut gc = GarbageCollector::new();
        let dict = Value::Dict(DictValue::new());
        gc.register(&dict);
        child.borrow_mut().define("d", dict.clone());
        root.borrow_mut().define("inner", Value::Scope(child));
        gc.collect_full(&root);
        assert!(gc.is_tracked(&dict));
    }

    #[test]
    fn incremental_cycle_eventually_sweeps() {
        let root = Scope::new();
        let mut gc = GarbageCollector::new();
        let garbage = Value::Array(ArrayValue::new());
        gc.register(&garbage);
        for _ in 0..=INCREMENTAL_STEPS {
            gc.collect_incremental(&root);
        }
        assert!(!gc.is_tracked(&garbage));
    }

    #[test]
    fn incremental_cycle_keeps_rooted_values() {
        let root = Scope::new();
        let mut gc = GarbageCollector::new();
        let dict = Value::Dict(DictValue::new());
        gc.register(&dict);
        root.borrow_mut().define("d", dict.clone());
        for _ in 0..=INCREMENTAL_STEPS {
            gc.collect_incremental(&root);
        }
        assert!(gc.is_tracked(&dict));
    }

    #[test]
    fn batch_request_restarts_an_incremental_cycle() {
        let root = Scope::new();
        let mut gc = GarbageCollector::new();
        let kept = Value::Dict(DictValue::new());
        gc.register(&kept);
        root.borrow_mut().define("kept", kept.clone());
        // Partway through a cycle, a batch request lands; the rooted value
        // must survive both it and the restarted incremental cycle.
        for _ in 0..INCREMENTAL_STEPS {
            gc.collect_incremental(&root);
        }
        gc.collect(&root);
        for _ in 0..=INCREMENTAL_STEPS {
            gc.collect_incremental(&root);
        }
        assert!(gc.is_tracked(&kept));
    }
}
