use crate::language::{ast::*, parser::parse_source};
use crate::runtime::{
    builtins,
    environment::{self, Scope, ScopeRef},
    error::{ErrorKind, RuntimeError, RuntimeResult},
    gc::GarbageCollector,
    modules::ModuleSystem,
    typecheck,
    value::{
        values_equal, ArrayValue, ClassRef, ClassValue, DictValue, FunctionRef, FunctionValue,
        ObjectRef, ObjectValue, Value,
    },
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;

/// The evaluator asks the reclaimer for a full collection request every this
/// many executed statements, with the global scope as the root.
const GC_STATEMENT_CADENCE: usize = 1000;

/// Between full requests, one incremental step runs every this many executed
/// statements. An incremental cycle takes eleven steps (one root mark, nine
/// spread marks, one sweep), so it finishes at statement 880 of each
/// thousand-statement window, before the batch request resets it.
const GC_INCREMENTAL_CADENCE: usize = 80;

enum FlowSignal {
    Return(Value),
    Break,
    Continue,
}

pub struct Interpreter {
    globals: ScopeRef,
    environment: ScopeRef,
    modules: ModuleSystem,
    gc: GarbageCollector,
    executed_statements: usize,
    output: Rc<RefCell<dyn Write>>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_writer(Rc::new(RefCell::new(io::stdout())))
    }

    /// Test entry point: output goes to the supplied writer instead of
    /// stdout.
    pub fn with_writer(output: Rc<RefCell<dyn Write>>) -> Self {
        let globals = Scope::new();
        let mut gc = GarbageCollector::new();
        builtins::install(&globals, Rc::clone(&output), &mut gc);
        Self {
            environment: Rc::clone(&globals),
            globals,
            modules: ModuleSystem::new(),
            gc,
            executed_statements: 0,
            output,
        }
    }

    pub fn globals(&self) -> ScopeRef {
        Rc::clone(&self.globals)
    }

    pub fn set_module_base_path(&mut self, base: impl Into<std::path::PathBuf>) {
        self.modules = ModuleSystem::with_base_path(base);
    }

    /// Registers a native function in the global scope; part of the embedded
    /// host interface. `arity: None` marks a variadic callable.
    pub fn register_native(
        &mut self,
        name: &str,
        arity: Option<usize>,
        callable: crate::runtime::value::NativeFn,
    ) {
        let function = Value::Function(Rc::new(FunctionValue::Native {
            name: name.to_string(),
            arity,
            callable,
        }));
        self.gc.register(&function);
        self.globals.borrow_mut().define(name, function);
    }

    /// Runs a program against the global scope. Signals escaping the
    /// top level are errors: break/continue a syntax error, return an
    /// invalid-return error.
    pub fn interpret(&mut self, statements: &[Stmt]) -> RuntimeResult<()> {
        for statement in statements {
            match self.execute(statement)? {
                None => {}
                Some(FlowSignal::Return(_)) => {
                    return Err(RuntimeError::new(ErrorKind::InvalidReturn, 0));
                }
                Some(FlowSignal::Break) => {
                    return Err(RuntimeError::syntax("'break' outside of a loop", 0));
                }
                Some(FlowSignal::Continue) => {
                    return Err(RuntimeError::syntax("'continue' outside of a loop", 0));
                }
            }
        }
        Ok(())
    }

    pub fn collect_garbage(&mut self) {
        self.gc.collect_full(&self.globals.clone());
    }

    pub fn gc(&self) -> &GarbageCollector {
        &self.gc
    }

    fn execute(&mut self, statement: &Stmt) -> RuntimeResult<Option<FlowSignal>> {
        self.executed_statements += 1;
        if self.executed_statements % GC_STATEMENT_CADENCE == 0 {
            let root = self.globals();
            self.gc.collect(&root);
        } else if self.executed_statements % GC_INCREMENTAL_CADENCE == 0 {
            let root = self.globals();
            self.gc.collect_incremental(&root);
        }

        match statement {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(None)
            }
            Stmt::Block(statements) => {
                let scope = Scope::with_enclosing(Rc::clone(&self.environment));
                self.execute_block(statements, scope)
            }
            Stmt::VarDecl {
                name,
                annotation,
                initializer,
                constant,
                line,
            } => {
                let value = match initializer {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                if let (Some(annotation), Some(_)) = (annotation, initializer) {
                    if !typecheck::check_type(&value, annotation) {
                        return Err(RuntimeError::type_mismatch(
                            format!(
                                "value of type {} does not satisfy `{annotation}` for `{name}`",
                                value.type_name()
                            ),
                            *line,
                        ));
                    }
                }
                let mut scope = self.environment.borrow_mut();
                if *constant {
                    scope.define_const(name, value);
                } else {
                    scope.define(name, value);
                }
                Ok(None)
            }
            Stmt::FuncDecl(declaration) => {
                let function = self.make_closure(declaration, false);
                self.environment
                    .borrow_mut()
                    .define(&declaration.name, function);
                Ok(None)
            }
            Stmt::ClassDecl {
                name,
                superclass,
                methods,
                line,
            } => {
                let superclass_value = match superclass {
                    Some(super_name) => {
                        let value = environment::get(&self.environment, super_name, *line)?;
                        match value {
                            Value::Class(class) => Some(class),
                            other => {
                                return Err(RuntimeError::type_error(
                                    format!(
                                        "superclass `{super_name}` must be a class, found {}",
                                        other.type_name()
                                    ),
                                    *line,
                                ));
                            }
                        }
                    }
                    None => None,
                };

                // Placeholder first, so method bodies can refer to the class
                // by name before it is materialized.
                self.environment.borrow_mut().define(name, Value::Null);

                let mut method_map = BTreeMap::new();
                for declaration in methods {
                    let is_constructor = declaration.name == "__init__";
                    let Value::Function(function) =
                        self.make_closure(declaration, is_constructor)
                    else {
                        unreachable!("make_closure returns a function value");
                    };
                    method_map.insert(declaration.name.clone(), function);
                }

                let class = Value::Class(Rc::new(ClassValue {
                    name: name.clone(),
                    superclass: superclass_value,
                    methods: method_map,
                }));
                self.gc.register(&class);
                environment::assign(&self.environment, name, class, *line)?;
                Ok(None)
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)
                } else {
                    Ok(None)
                }
            }
            Stmt::While { condition, body } => {
                while self.eval(condition)?.is_truthy() {
                    match self.execute(body)? {
                        None => {}
                        Some(FlowSignal::Continue) => continue,
                        Some(FlowSignal::Break) => break,
                        Some(signal @ FlowSignal::Return(_)) => return Ok(Some(signal)),
                    }
                }
                Ok(None)
            }
            Stmt::For {
                variable,
                iterable,
                body,
                line,
            } => {
                let array = match self.eval(iterable)? {
                    Value::Array(array) => array,
                    other => {
                        return Err(RuntimeError::type_error(
                            format!("for loop requires an array, found {}", other.type_name()),
                            *line,
                        ));
                    }
                };
                let mut index = 0;
                loop {
                    let Some(element) = array.get(index) else {
                        break;
                    };
                    index += 1;
                    self.environment.borrow_mut().define(variable, element);
                    match self.execute(body)? {
                        None => {}
                        Some(FlowSignal::Continue) => continue,
                        Some(FlowSignal::Break) => break,
                        Some(signal @ FlowSignal::Return(_)) => return Ok(Some(signal)),
                    }
                }
                Ok(None)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                Ok(Some(FlowSignal::Return(value)))
            }
            Stmt::Break { .. } => Ok(Some(FlowSignal::Break)),
            Stmt::Continue { .. } => Ok(Some(FlowSignal::Continue)),
            Stmt::Throw { expr, line } => {
                let payload = self.eval(expr)?;
                Err(RuntimeError::thrown(payload, *line))
            }
            Stmt::TryCatch {
                try_block,
                catch_var,
                catch_type,
                catch_block,
                ..
            } => {
                let scope = Scope::with_enclosing(Rc::clone(&self.environment));
                match self.execute_block(try_block, scope) {
                    Ok(signal) => Ok(signal),
                    Err(error) => {
                        if !error.is_catchable() {
                            return Err(error);
                        }
                        let caught = error.catch_value();
                        if let Some(annotation) = catch_type {
                            if !typecheck::check_type(&caught, annotation) {
                                return Err(error);
                            }
                        }
                        let scope = Scope::with_enclosing(Rc::clone(&self.environment));
                        scope.borrow_mut().define(catch_var, caught);
                        self.execute_block(catch_block, scope)
                    }
                }
            }
            Stmt::Import {
                module,
                names,
                alias,
                line,
            } => {
                self.execute_import(module, names, alias.as_deref(), *line)?;
                Ok(None)
            }
            Stmt::Export {
                names,
                declaration,
                line,
            } => {
                if let Some(declaration) = declaration {
                    if let Some(signal) = self.execute(declaration)? {
                        return Ok(Some(signal));
                    }
                }
                self.execute_export(names, *line)?;
                Ok(None)
            }
            Stmt::Namespace { name, body, .. } => {
                let scope = Scope::with_enclosing(Rc::clone(&self.environment));
                let signal = self.execute_block(body, Rc::clone(&scope))?;
                self.environment
                    .borrow_mut()
                    .define(name, Value::Scope(scope));
                Ok(signal)
            }
        }
    }

    fn execute_block(
        &mut self,
        statements: &[Stmt],
        scope: ScopeRef,
    ) -> RuntimeResult<Option<FlowSignal>> {
        let previous = std::mem::replace(&mut self.environment, scope);
        let mut result = Ok(None);
        for statement in statements {
            match self.execute(statement) {
                Ok(None) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }
        self.environment = previous;
        result
    }

    fn make_closure(&mut self, declaration: &Rc<FunctionDecl>, is_constructor: bool) -> Value {
        let function = Value::Function(Rc::new(FunctionValue::Declared {
            declaration: Rc::clone(declaration),
            closure: Rc::clone(&self.environment),
            is_constructor,
        }));
        self.gc.register(&function);
        function
    }

    pub fn eval(&mut self, expr: &Expr) -> RuntimeResult<Value> {
        match expr {
            Expr::Literal { value, .. } => Ok(match value {
                Literal::Null => Value::Null,
                Literal::Int(v) => Value::Int(*v),
                Literal::Float(v) => Value::Float(*v),
                Literal::Bool(v) => Value::Bool(*v),
                Literal::Str(v) => Value::Str(v.clone()),
            }),
            Expr::Identifier { name, line } => {
                environment::get(&self.environment, name, *line)
            }
            Expr::Binary {
                op,
                left,
                right,
                line,
            } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.apply_binary(*op, left, right, *line)
            }
            Expr::Unary { op, operand, line } => {
                let value = self.eval(operand)?;
                self.apply_unary(*op, value, *line)
            }
            Expr::Array { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element)?);
                }
                let array = Value::Array(ArrayValue::from_vec(items));
                self.gc.register(&array);
                Ok(array)
            }
            Expr::Dict { entries, line } => {
                let dict = DictValue::new();
                for (key_expr, value_expr) in entries {
                    let key = match self.eval(key_expr)? {
                        Value::Str(key) => key,
                        other => {
                            return Err(RuntimeError::type_error(
                                format!(
                                    "dictionary key must be a string, found {}",
                                    other.type_name()
                                ),
                                *line,
                            ));
                        }
                    };
                    let value = self.eval(value_expr)?;
                    dict.insert(key, value);
                }
                let dict = Value::Dict(dict);
                self.gc.register(&dict);
                Ok(dict)
            }
            Expr::Call {
                callee,
                arguments,
                line,
            } => self.eval_call(callee, arguments, *line),
            Expr::Member {
                object,
                property,
                line,
            } => {
                let object = self.eval(object)?;
                self.read_member(&object, property, *line)
            }
            Expr::Index {
                object,
                index,
                line,
            } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.read_index(&object, &index, *line)
            }
            Expr::Slice {
                object,
                start,
                stop,
                step,
                line,
            } => self.eval_slice(object, start, stop, step, *line),
            Expr::Conditional {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(then_expr)
                } else {
                    self.eval(else_expr)
                }
            }
            Expr::Assign {
                target,
                op,
                value,
                line,
            } => self.eval_assign(target, *op, value, *line),
        }
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        arguments: &[Expr],
        line: usize,
    ) -> RuntimeResult<Value> {
        // Loader and reclaimer entry points need the interpreter context, so
        // they are dispatched by name before ordinary lookup.
        if let Expr::Identifier { name, .. } = callee {
            match name.as_str() {
                "require" | "include" => {
                    let values = self.eval_arguments(arguments)?;
                    let [Value::Str(module)] = values.as_slice() else {
                        return Err(RuntimeError::type_error(
                            format!("{name} expects a single string path"),
                            line,
                        ));
                    };
                    let module = module.clone();
                    let scope = if name == "require" {
                        self.require_module(&module, line)?
                    } else {
                        self.include_module(&module, line)?
                    };
                    return Ok(Value::Scope(scope));
                }
                "gc_collect" => {
                    let root = self.globals();
                    self.gc.collect_full(&root);
                    return Ok(Value::Null);
                }
                "gc_object_count" => {
                    return Ok(Value::Int(self.gc.tracked_count() as i64));
                }
                _ => {}
            }
        }

        let callee = self.eval(callee)?;
        let values = self.eval_arguments(arguments)?;
        match callee {
            Value::Function(function) => self.call_function(&function, values, line),
            Value::Class(class) => self.instantiate_class(&class, values, line),
            other => Err(RuntimeError::type_error(
                format!("can only call functions and classes, found {}", other.type_name()),
                line,
            )),
        }
    }

    fn eval_arguments(&mut self, arguments: &[Expr]) -> RuntimeResult<Vec<Value>> {
        arguments.iter().map(|arg| self.eval(arg)).collect()
    }

    /// Function call protocol: a fresh scope over the captured closure,
    /// parameters bound in order (missing trailing ones to null, surplus is
    /// an error). Constructors yield `this` from their captured scope.
    pub fn call_function(
        &mut self,
        function: &FunctionRef,
        arguments: Vec<Value>,
        line: usize,
    ) -> RuntimeResult<Value> {
        match function.as_ref() {
            FunctionValue::Native {
                name,
                arity,
                callable,
            } => {
                if let Some(expected) = arity {
                    if arguments.len() != *expected {
                        return Err(RuntimeError::new(
                            ErrorKind::ArityMismatch {
                                name: name.clone(),
                                expected: *expected,
                                received: arguments.len(),
                            },
                            line,
                        ));
                    }
                }
                callable(&arguments).map_err(|mut error| {
                    if error.line == 0 {
                        error.line = line;
                    }
                    error
                })
            }
            FunctionValue::Declared {
                declaration,
                closure,
                is_constructor,
            } => {
                if arguments.len() > declaration.params.len() {
                    return Err(RuntimeError::new(
                        ErrorKind::ArityMismatch {
                            name: declaration.name.clone(),
                            expected: declaration.params.len(),
                            received: arguments.len(),
                        },
                        line,
                    ));
                }
                let scope = Scope::with_enclosing(Rc::clone(closure));
                {
                    let mut borrowed = scope.borrow_mut();
                    let mut values = arguments.into_iter();
                    for param in &declaration.params {
                        borrowed.define(&param.name, values.next().unwrap_or(Value::Null));
                    }
                }
                let result = self.execute_block(&declaration.body, scope)?;
                let value = match result {
                    Some(FlowSignal::Return(value)) => value,
                    None => Value::Null,
                    Some(FlowSignal::Break) => {
                        return Err(RuntimeError::syntax("'break' outside of a loop", line));
                    }
                    Some(FlowSignal::Continue) => {
                        return Err(RuntimeError::syntax("'continue' outside of a loop", line));
                    }
                };
                if *is_constructor {
                    return environment::get(closure, "this", line);
                }
                Ok(value)
            }
        }
    }

    fn instantiate_class(
        &mut self,
        class: &ClassRef,
        arguments: Vec<Value>,
        line: usize,
    ) -> RuntimeResult<Value> {
        let object = Rc::new(RefCell::new(ObjectValue::new(Rc::clone(class))));
        let value = Value::Object(Rc::clone(&object));
        self.gc.register(&value);
        if let Some(initializer) = class.find_method("__init__") {
            let bound = self.bind_method(&initializer, &object);
            self.call_function(&bound, arguments, line)?;
        } else if !arguments.is_empty() {
            return Err(RuntimeError::new(
                ErrorKind::ArityMismatch {
                    name: class.name.clone(),
                    expected: 0,
                    received: arguments.len(),
                },
                line,
            ));
        }
        Ok(value)
    }

    /// Method binding: a thin scope hosting `this` over the method's captured
    /// scope, created anew at every lookup.
    fn bind_method(&mut self, method: &FunctionRef, object: &ObjectRef) -> FunctionRef {
        match method.as_ref() {
            FunctionValue::Declared {
                declaration,
                closure,
                is_constructor,
            } => {
                let binding = Scope::with_enclosing(Rc::clone(closure));
                binding
                    .borrow_mut()
                    .define("this", Value::Object(Rc::clone(object)));
                let bound = Rc::new(FunctionValue::Declared {
                    declaration: Rc::clone(declaration),
                    closure: binding,
                    is_constructor: *is_constructor,
                });
                self.gc.register(&Value::Function(Rc::clone(&bound)));
                bound
            }
            FunctionValue::Native { .. } => Rc::clone(method),
        }
    }

    /// Member read: field map, then the class method table (bound to the
    /// object), then `__getattr__` with the name as a string.
    fn read_member(&mut self, object: &Value, property: &str, line: usize) -> RuntimeResult<Value> {
        match object {
            Value::Object(object) => {
                if let Some(value) = object.borrow().fields.get(property) {
                    return Ok(value.clone());
                }
                let class = Rc::clone(&object.borrow().class);
                if let Some(method) = class.find_method(property) {
                    let bound = self.bind_method(&method, object);
                    return Ok(Value::Function(bound));
                }
                if let Some(getattr) = class.find_method("__getattr__") {
                    let bound = self.bind_method(&getattr, object);
                    return self.call_function(
                        &bound,
                        vec![Value::Str(property.to_string())],
                        line,
                    );
                }
                Err(RuntimeError::undefined_property(property, line))
            }
            Value::Scope(scope) => scope.borrow().get_local(property).ok_or_else(|| {
                RuntimeError::undefined_property(property, line)
            }),
            // Dicts allow member sugar for string keys: `d.k` reads `d["k"]`.
            Value::Dict(dict) => dict.get(property).ok_or_else(|| {
                RuntimeError::undefined_property(property, line)
            }),
            other => Err(RuntimeError::type_error(
                format!("only objects have properties, found {}", other.type_name()),
                line,
            )),
        }
    }

    /// Member write honors `__setattr__` when defined.
    fn write_member(
        &mut self,
        object: &ObjectRef,
        property: &str,
        value: Value,
        line: usize,
    ) -> RuntimeResult<()> {
        let class = Rc::clone(&object.borrow().class);
        if let Some(setattr) = class.find_method("__setattr__") {
            let bound = self.bind_method(&setattr, object);
            self.call_function(
                &bound,
                vec![Value::Str(property.to_string()), value],
                line,
            )?;
            return Ok(());
        }
        object
            .borrow_mut()
            .fields
            .insert(property.to_string(), value);
        Ok(())
    }

    fn read_index(&self, object: &Value, index: &Value, line: usize) -> RuntimeResult<Value> {
        match object {
            Value::Array(array) => {
                let index = self.array_index(array, index, line)?;
                Ok(array.items.borrow()[index].clone())
            }
            Value::Dict(dict) => {
                let Value::Str(key) = index else {
                    return Err(RuntimeError::type_error(
                        format!("dictionary key must be a string, found {}", index.type_name()),
                        line,
                    ));
                };
                dict.get(key).ok_or_else(|| {
                    RuntimeError::new(ErrorKind::KeyNotFound { key: key.clone() }, line)
                })
            }
            other => Err(RuntimeError::type_error(
                format!("only arrays and dictionaries can be indexed, found {}", other.type_name()),
                line,
            )),
        }
    }

    /// Rewrites a negative index as `len + i` and bounds-checks the result.
    fn array_index(&self, array: &ArrayValue, index: &Value, line: usize) -> RuntimeResult<usize> {
        let Value::Int(raw) = index else {
            return Err(RuntimeError::type_error(
                format!("array index must be an integer, found {}", index.type_name()),
                line,
            ));
        };
        let length = array.len();
        let rebased = if *raw < 0 { *raw + length as i64 } else { *raw };
        if rebased < 0 || rebased >= length as i64 {
            return Err(RuntimeError::new(
                ErrorKind::IndexOutOfBounds {
                    index: *raw,
                    length,
                },
                line,
            ));
        }
        Ok(rebased as usize)
    }

    fn eval_slice(
        &mut self,
        object: &Expr,
        start: &Option<Box<Expr>>,
        stop: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
        line: usize,
    ) -> RuntimeResult<Value> {
        let array = match self.eval(object)? {
            Value::Array(array) => array,
            other => {
                return Err(RuntimeError::type_error(
                    format!("slice requires an array, found {}", other.type_name()),
                    line,
                ));
            }
        };

        let step = match step {
            Some(expr) => self.slice_bound(expr, line)?,
            None => 1,
        };
        if step == 0 {
            return Err(RuntimeError::invalid_operation("slice step cannot be zero", line));
        }

        let length = array.len() as i64;
        let (low, high) = if step > 0 { (0, length) } else { (-1, length - 1) };
        let rebase = |bound: i64| if bound < 0 { bound + length } else { bound };
        let clamp = |bound: i64| bound.clamp(low, high);

        let start = match start {
            Some(expr) => clamp(rebase(self.slice_bound(expr, line)?)),
            None => {
                if step > 0 {
                    0
                } else {
                    length - 1
                }
            }
        };
        let stop = match stop {
            Some(expr) => clamp(rebase(self.slice_bound(expr, line)?)),
            None => {
                if step > 0 {
                    length
                } else {
                    -1
                }
            }
        };

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
                result.push(items[i as usize].clone());
                i += step;
            }
        }
        drop(items);

        let slice = Value::Array(ArrayValue::from_vec(result));
        self.gc.register(&slice);
        Ok(slice)
    }

    fn slice_bound(&mut self, expr: &Expr, line: usize) -> RuntimeResult<i64> {
        match self.eval(expr)? {
            Value::Int(v) => Ok(v),
            other => Err(RuntimeError::type_error(
                format!("slice bounds must be integers, found {}", other.type_name()),
                line,
            )),
        }
    }

    /// Assignment targets are identifiers, members, and indexes. Compound
    /// assignment reads the target once, applies the operator (including
    /// dunder dispatch), and writes back.
    fn eval_assign(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value_expr: &Expr,
        line: usize,
    ) -> RuntimeResult<Value> {
        match target {
            Expr::Identifier { name, .. } => {
                let value = match op.binary() {
                    None => self.eval(value_expr)?,
                    Some(binary) => {
                        let current = environment::get(&self.environment, name, line)?;
                        let rhs = self.eval(value_expr)?;
                        self.apply_binary(binary, current, rhs, line)?
                    }
                };
                environment::assign(&self.environment, name, value.clone(), line)?;
                Ok(value)
            }
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object)?;
                match object {
                    Value::Object(object) => {
                        let value = match op.binary() {
                            None => self.eval(value_expr)?,
                            Some(binary) => {
                                let current = self.read_member(
                                    &Value::Object(Rc::clone(&object)),
                                    property,
                                    line,
                                )?;
                                let rhs = self.eval(value_expr)?;
                                self.apply_binary(binary, current, rhs, line)?
                            }
                        };
                        self.write_member(&object, property, value.clone(), line)?;
                        Ok(value)
                    }
                    Value::Dict(dict) => {
                        let value = match op.binary() {
                            None => self.eval(value_expr)?,
                            Some(binary) => {
                                let current = dict.get(property).ok_or_else(|| {
                                    RuntimeError::undefined_property(property, line)
                                })?;
                                let rhs = self.eval(value_expr)?;
                                self.apply_binary(binary, current, rhs, line)?
                            }
                        };
                        dict.insert(property.to_string(), value.clone());
                        Ok(value)
                    }
                    other => Err(RuntimeError::type_error(
                        format!("only objects have properties, found {}", other.type_name()),
                        line,
                    )),
                }
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                match &object {
                    Value::Array(array) => {
                        let position = self.array_index(array, &index, line)?;
                        let value = match op.binary() {
                            None => self.eval(value_expr)?,
                            Some(binary) => {
                                let current = array.items.borrow()[position].clone();
                                let rhs = self.eval(value_expr)?;
                                self.apply_binary(binary, current, rhs, line)?
                            }
                        };
                        array.items.borrow_mut()[position] = value.clone();
                        Ok(value)
                    }
                    Value::Dict(dict) => {
                        let key = match &index {
                            Value::Str(key) => key.clone(),
                            other => {
                                return Err(RuntimeError::type_error(
                                    format!(
                                        "dictionary key must be a string, found {}",
                                        other.type_name()
                                    ),
                                    line,
                                ));
                            }
                        };
                        let value = match op.binary() {
                            None => self.eval(value_expr)?,
                            Some(binary) => {
                                let current = dict.get(&key).ok_or_else(|| {
                                    RuntimeError::new(
                                        ErrorKind::KeyNotFound { key: key.clone() },
                                        line,
                                    )
                                })?;
                                let rhs = self.eval(value_expr)?;
                                self.apply_binary(binary, current, rhs, line)?
                            }
                        };
                        dict.insert(key, value.clone());
                        Ok(value)
                    }
                    other => Err(RuntimeError::type_error(
                        format!(
                            "only arrays and dictionaries can be indexed, found {}",
                            other.type_name()
                        ),
                        line,
                    )),
                }
            }
            _ => Err(RuntimeError::syntax("invalid assignment target", line)),
        }
    }

    /// Binary dispatch: an object left operand with a matching dunder method
    /// wins; otherwise the built-in operator table applies.
    fn apply_binary(
        &mut self,
        op: BinaryOp,
        left: Value,
        right: Value,
        line: usize,
    ) -> RuntimeResult<Value> {
        if let Value::Object(object) = &left {
            if let Some(method_name) = operator_method_name(op) {
                let class = Rc::clone(&object.borrow().class);
                if let Some(method) = class.find_method(method_name) {
                    let bound = self.bind_method(&method, object);
                    return self.call_function(&bound, vec![right], line);
                }
            }
        }

        match op {
            BinaryOp::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
            BinaryOp::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
            BinaryOp::Add => self.eval_add(left, right, line),
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                self.eval_numeric(op, left, right, line)
            }
            BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
            BinaryOp::NotEq => Ok(Value::Bool(!values_equal(&left, &right))),
            BinaryOp::Lt => self.eval_compare(left, right, line, |a, b| a < b),
            BinaryOp::LtEq => self.eval_compare(left, right, line, |a, b| a <= b),
            BinaryOp::Gt => self.eval_compare(left, right, line, |a, b| a > b),
            BinaryOp::GtEq => self.eval_compare(left, right, line, |a, b| a >= b),
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl
            | BinaryOp::Shr => self.eval_bitwise(op, left, right, line),
        }
    }

    fn eval_add(&self, left: Value, right: Value, line: usize) -> RuntimeResult<Value> {
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Ok(Value::Str(format!("{left}{right}")))
            }
            _ => Err(RuntimeError::type_error(
                format!(
                    "operands to + must be numbers or strings, found {} and {}",
                    left.type_name(),
                    right.type_name()
                ),
                line,
            )),
        }
    }

    fn eval_numeric(
        &self,
        op: BinaryOp,
        left: Value,
        right: Value,
        line: usize,
    ) -> RuntimeResult<Value> {
        let divides = matches!(op, BinaryOp::Div | BinaryOp::Rem);
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => {
                if divides && *b == 0 {
                    return Err(RuntimeError::new(ErrorKind::DivisionByZero, line));
                }
                Ok(Value::Int(match op {
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    // Truncation toward zero.
                    BinaryOp::Div => a / b,
                    BinaryOp::Rem => a % b,
                    _ => unreachable!(),
                }))
            }
            (Value::Int(_), Value::Float(_))
            | (Value::Float(_), Value::Int(_))
            | (Value::Float(_), Value::Float(_)) => {
                let a = numeric_as_float(&left);
                let b = numeric_as_float(&right);
                if divides && b == 0.0 {
                    return Err(RuntimeError::new(ErrorKind::DivisionByZero, line));
                }
                Ok(Value::Float(match op {
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    // IEEE floating remainder.
                    BinaryOp::Rem => a % b,
                    _ => unreachable!(),
                }))
            }
            _ => Err(RuntimeError::type_error(
                format!(
                    "numeric operator expects numbers, found {} and {}",
                    left.type_name(),
                    right.type_name()
                ),
                line,
            )),
        }
    }

    fn eval_compare<F>(
        &self,
        left: Value,
        right: Value,
        line: usize,
        compare: F,
    ) -> RuntimeResult<Value>
    where
        F: Fn(f64, f64) -> bool,
    {
        match (&left, &right) {
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Ok(Value::Bool(
                compare(numeric_as_float(&left), numeric_as_float(&right)),
            )),
            _ => Err(RuntimeError::type_error(
                format!(
                    "comparison expects numbers, found {} and {}",
                    left.type_name(),
                    right.type_name()
                ),
                line,
            )),
        }
    }

    fn eval_bitwise(
        &self,
        op: BinaryOp,
        left: Value,
        right: Value,
        line: usize,
    ) -> RuntimeResult<Value> {
        let (Value::Int(a), Value::Int(b)) = (&left, &right) else {
            return Err(RuntimeError::type_error(
                format!(
                    "bitwise operator expects integers, found {} and {}",
                    left.type_name(),
                    right.type_name()
                ),
                line,
            ));
        };
        Ok(Value::Int(match op {
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            BinaryOp::BitXor => a ^ b,
            BinaryOp::Shl => a << b,
            BinaryOp::Shr => a >> b,
            _ => unreachable!(),
        }))
    }

    fn apply_unary(&self, op: UnaryOp, value: Value, line: usize) -> RuntimeResult<Value> {
        match op {
            UnaryOp::Neg => match value {
                Value::Int(v) => Ok(Value::Int(-v)),
                Value::Float(v) => Ok(Value::Float(-v)),
                other => Err(RuntimeError::type_error(
                    format!("unary - expects a number, found {}", other.type_name()),
                    line,
                )),
            },
            UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
            UnaryOp::BitNot => match value {
                Value::Int(v) => Ok(Value::Int(!v)),
                other => Err(RuntimeError::type_error(
                    format!("unary ~ expects an integer, found {}", other.type_name()),
                    line,
                )),
            },
            // ++ and -- yield x+1 / x-1 without mutating.
            UnaryOp::Increment => match value {
                Value::Int(v) => Ok(Value::Int(v + 1)),
                Value::Float(v) => Ok(Value::Float(v + 1.0)),
                other => Err(RuntimeError::type_error(
                    format!("unary ++ expects a number, found {}", other.type_name()),
                    line,
                )),
            },
            UnaryOp::Decrement => match value {
                Value::Int(v) => Ok(Value::Int(v - 1)),
                Value::Float(v) => Ok(Value::Float(v - 1.0)),
                other => Err(RuntimeError::type_error(
                    format!("unary -- expects a number, found {}", other.type_name()),
                    line,
                )),
            },
        }
    }

    fn execute_import(
        &mut self,
        module: &str,
        names: &[String],
        alias: Option<&str>,
        line: usize,
    ) -> RuntimeResult<()> {
        let scope = self.require_module(module, line)?;
        if names.is_empty() {
            // `import "path";` executes the module and discards its scope.
            return Ok(());
        }

        // Explicit names read from `__exports__`; a module without one
        // exposes its whole top-level scope.
        let exports = match scope.borrow().get_local("__exports__") {
            Some(Value::Scope(exports)) => exports,
            _ => Rc::clone(&scope),
        };

        if let Some(alias) = alias {
            let bound = Scope::new();
            for name in names {
                let value = exports.borrow().get_local(name).ok_or_else(|| {
                    RuntimeError::new(
                        ErrorKind::ModuleLoad {
                            path: module.to_string(),
                            message: format!("module does not export `{name}`"),
                        },
                        line,
                    )
                })?;
                bound.borrow_mut().define(name, value);
            }
            self.environment
                .borrow_mut()
                .define(alias, Value::Scope(bound));
        } else {
            for name in names {
                let value = exports.borrow().get_local(name).ok_or_else(|| {
                    RuntimeError::new(
                        ErrorKind::ModuleLoad {
                            path: module.to_string(),
                            message: format!("module does not export `{name}`"),
                        },
                        line,
                    )
                })?;
                self.environment.borrow_mut().define(name, value);
            }
        }
        Ok(())
    }

    fn execute_export(&mut self, names: &[String], line: usize) -> RuntimeResult<()> {
        let exports = match self.environment.borrow().get_local("__exports__") {
            Some(Value::Scope(exports)) => exports,
            _ => Scope::new(),
        };
        for name in names {
            let value = environment::get(&self.environment, name, line)?;
            exports.borrow_mut().define(name, value);
        }
        self.environment
            .borrow_mut()
            .define("__exports__", Value::Scope(exports));
        Ok(())
    }

    /// Cached load: a second `require` of the same resolved path reuses the
    /// module scope.
    pub fn require_module(&mut self, module: &str, line: usize) -> RuntimeResult<ScopeRef> {
        let resolved = self.modules.resolve(module, line)?;
        if let Some(scope) = self.modules.cached(&resolved) {
            return Ok(scope);
        }
        let scope = self.load_module(&resolved, line)?;
        self.modules.store(resolved, Rc::clone(&scope));
        Ok(scope)
    }

    /// Uncached load: every `include` re-executes the module.
    pub fn include_module(&mut self, module: &str, line: usize) -> RuntimeResult<ScopeRef> {
        let resolved = self.modules.resolve(module, line)?;
        self.load_module(&resolved, line)
    }

    fn load_module(&mut self, resolved: &Path, line: usize) -> RuntimeResult<ScopeRef> {
        self.modules.begin_load(resolved, line)?;
        let result = self.load_module_inner(resolved, line);
        self.modules.finish_load(resolved);
        result
    }

    fn load_module_inner(&mut self, resolved: &Path, line: usize) -> RuntimeResult<ScopeRef> {
        let source = std::fs::read_to_string(resolved).map_err(|error| {
            RuntimeError::new(
                ErrorKind::ModuleLoad {
                    path: resolved.display().to_string(),
                    message: error.to_string(),
                },
                line,
            )
        })?;
        let statements = parse_source(&source).map_err(|errors| {
            let first = &errors.errors[0];
            RuntimeError::new(
                ErrorKind::ModuleLoad {
                    path: resolved.display().to_string(),
                    message: first.message.clone(),
                },
                first.line,
            )
        })?;

        // Module scopes enclose the globals so builtins stay reachable.
        let scope = Scope::with_enclosing(self.globals());
        match self.execute_block(&statements, Rc::clone(&scope))? {
            None => Ok(scope),
            Some(_) => Err(RuntimeError::syntax(
                "control flow may not escape a module body",
                line,
            )),
        }
    }

    pub fn output(&self) -> Rc<RefCell<dyn Write>> {
        Rc::clone(&self.output)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn numeric_as_float(value: &Value) -> f64 {
    match value {
        Value::Int(v) => *v as f64,
        Value::Float(v) => *v,
        _ => f64::NAN,
    }
}

/// Dunder name consulted on the left operand before built-in dispatch.
fn operator_method_name(op: BinaryOp) -> Option<&'static str> {
    Some(match op {
        BinaryOp::Add => "__add__",
        BinaryOp::Sub => "__sub__",
        BinaryOp::Mul => "__mul__",
        BinaryOp::Div => "__div__",
        BinaryOp::Rem => "__mod__",
        BinaryOp::BitAnd => "__and__",
        BinaryOp::BitOr => "__or__",
        BinaryOp::BitXor => "__xor__",
        BinaryOp::Shl => "__lshift__",
        BinaryOp::Shr => "__rshift__",
        BinaryOp::Eq => "__eq__",
        BinaryOp::NotEq => "__ne__",
        BinaryOp::Lt => "__lt__",
        BinaryOp::LtEq => "__le__",
        BinaryOp::Gt => "__gt__",
        BinaryOp::GtEq => "__ge__",
        BinaryOp::And | BinaryOp::Or => return None,
    })
}
