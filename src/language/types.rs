use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BasicType {
    Int,
    Float,
    Bool,
    Str,
}

impl fmt::Display for BasicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BasicType::Int => "int",
            BasicType::Float => "float",
            BasicType::Bool => "bool",
            BasicType::Str => "string",
        };
        write!(f, "{name}")
    }
}

/// `TYPE := BASE ('|' BASE)*`. Unions hold basics only; `array[..]` and
/// `dict{..}` never join a union.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeAnnotation {
    /// `...` matches any value.
    Any,
    Union(Vec<BasicType>),
    Array(Box<TypeAnnotation>),
    Dict {
        key: Box<TypeAnnotation>,
        value: Box<TypeAnnotation>,
    },
}

impl TypeAnnotation {
    pub fn basic(ty: BasicType) -> Self {
        TypeAnnotation::Union(vec![ty])
    }
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeAnnotation::Any => write!(f, "..."),
            TypeAnnotation::Union(types) => {
                for (idx, ty) in types.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{ty}")?;
                }
                Ok(())
            }
            TypeAnnotation::Array(element) => write!(f, "array[{element}]"),
            TypeAnnotation::Dict { key, value } => write!(f, "dict{{{key}:{value}}}"),
        }
    }
}
