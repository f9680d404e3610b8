use crate::runtime::value::Value;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Surface class of an error, independent of how it was raised. Only the
/// Type and Runtime classes are interceptable by `try`/`catch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Syntax,
    Type,
    Runtime,
    Module,
    Internal,
}

#[derive(Clone, Debug, Error)]
pub enum ErrorKind {
    #[error("Syntax error: {message}")]
    Syntax { message: String },
    #[error("Type error: {message}")]
    Type { message: String },
    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },
    #[error("Undefined variable `{name}`")]
    UndefinedVariable { name: String },
    #[error("Undefined property `{name}`")]
    UndefinedProperty { name: String },
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Index {index} out of bounds for array of length {length}")]
    IndexOutOfBounds { index: i64, length: usize },
    #[error("Key `{key}` not found in dictionary")]
    KeyNotFound { key: String },
    #[error("`{name}` expected {expected} argument(s) but received {received}")]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("Invalid return outside of a function")]
    InvalidReturn,
    #[error("{payload}")]
    Thrown { payload: Value },
    #[error("Assertion failed: {message}")]
    AssertionFailed { message: String },
    #[error("Module not found: {path}")]
    ModuleNotFound { path: String },
    #[error("Could not load module {path}: {message}")]
    ModuleLoad { path: String, message: String },
    #[error("Circular import detected: {path}")]
    CircularImport { path: String },
    #[error("Not implemented: {message}")]
    NotImplemented { message: String },
}

impl ErrorKind {
    /// Stable numeric code; bands match the surface classes.
    pub fn code(&self) -> u16 {
        match self {
            ErrorKind::Syntax { .. } => 100,
            ErrorKind::Type { .. } => 200,
            ErrorKind::TypeMismatch { .. } => 201,
            ErrorKind::UndefinedVariable { .. } => 202,
            ErrorKind::UndefinedProperty { .. } => 203,
            ErrorKind::InvalidOperation { .. } => 205,
            ErrorKind::Thrown { .. } => 300,
            ErrorKind::DivisionByZero => 301,
            ErrorKind::IndexOutOfBounds { .. } => 302,
            ErrorKind::KeyNotFound { .. } => 303,
            ErrorKind::ArityMismatch { .. } => 306,
            ErrorKind::InvalidReturn => 307,
            ErrorKind::AssertionFailed { .. } => 308,
            ErrorKind::ModuleNotFound { .. } => 401,
            ErrorKind::ModuleLoad { .. } => 405,
            ErrorKind::CircularImport { .. } => 404,
            ErrorKind::NotImplemented { .. } => 601,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self.code() {
            100..=199 => ErrorClass::Syntax,
            200..=299 => ErrorClass::Type,
            300..=399 => ErrorClass::Runtime,
            400..=499 => ErrorClass::Module,
            _ => ErrorClass::Internal,
        }
    }
}

#[derive(Clone, Debug, Error)]
#[error("{kind}")]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub line: usize,
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, line: usize) -> Self {
        Self { kind, line }
    }

    pub fn code(&self) -> u16 {
        self.kind.code()
    }

    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    /// Whether a `catch` clause may intercept this error at all.
    pub fn is_catchable(&self) -> bool {
        matches!(self.class(), ErrorClass::Type | ErrorClass::Runtime)
    }

    /// The value bound to the catch variable: the thrown payload, or the
    /// rendered message for engine-raised errors.
    pub fn catch_value(&self) -> Value {
        match &self.kind {
            ErrorKind::Thrown { payload } => payload.clone(),
            other => Value::Str(other.to_string()),
        }
    }

    pub fn type_error(message: impl Into<String>, line: usize) -> Self {
        Self::new(
            ErrorKind::Type {
                message: message.into(),
            },
            line,
        )
    }

    pub fn type_mismatch(message: impl Into<String>, line: usize) -> Self {
        Self::new(
            ErrorKind::TypeMismatch {
                message: message.into(),
            },
            line,
        )
    }

    pub fn undefined_variable(name: impl Into<String>, line: usize) -> Self {
        Self::new(
            ErrorKind::UndefinedVariable { name: name.into() },
            line,
        )
    }

    pub fn undefined_property(name: impl Into<String>, line: usize) -> Self {
        Self::new(
            ErrorKind::UndefinedProperty { name: name.into() },
            line,
        )
    }

    pub fn invalid_operation(message: impl Into<String>, line: usize) -> Self {
        Self::new(
            ErrorKind::InvalidOperation {
                message: message.into(),
            },
            line,
        )
    }

    pub fn const_reassignment(name: &str, line: usize) -> Self {
        Self::invalid_operation(format!("cannot reassign const binding `{name}`"), line)
    }

    pub fn thrown(payload: Value, line: usize) -> Self {
        Self::new(ErrorKind::Thrown { payload }, line)
    }

    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::new(
            ErrorKind::Syntax {
                message: message.into(),
            },
            line,
        )
    }

    pub fn not_implemented(message: impl Into<String>, line: usize) -> Self {
        Self::new(
            ErrorKind::NotImplemented {
                message: message.into(),
            },
            line,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_fall_into_class_bands() {
        assert_eq!(RuntimeError::type_error("x", 1).class(), ErrorClass::Type);
        assert_eq!(
            RuntimeError::new(ErrorKind::DivisionByZero, 1).class(),
            ErrorClass::Runtime
        );
        assert_eq!(
            RuntimeError::new(
                ErrorKind::CircularImport {
                    path: "m.z".into()
                },
                1
            )
            .class(),
            ErrorClass::Module
        );
        assert_eq!(
            RuntimeError::not_implemented("await", 1).class(),
            ErrorClass::Internal
        );
    }

    #[test]
    fn only_type_and_runtime_errors_are_catchable() {
        assert!(RuntimeError::thrown(Value::Int(1), 1).is_catchable());
        assert!(RuntimeError::type_error("x", 1).is_catchable());
        assert!(!RuntimeError::syntax("x", 1).is_catchable());
        assert!(
            !RuntimeError::new(
                ErrorKind::ModuleNotFound { path: "m".into() },
                1
            )
            .is_catchable()
        );
    }

    #[test]
    fn catch_value_prefers_the_thrown_payload() {
        let err = RuntimeError::thrown(Value::Str("oops".into()), 1);
        assert_eq!(err.catch_value().to_string(), "oops");
        let err = RuntimeError::new(ErrorKind::DivisionByZero, 1);
        assert_eq!(err.catch_value().to_string(), "Division by zero");
    }
}
