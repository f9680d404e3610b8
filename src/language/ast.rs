use crate::language::types::TypeAnnotation;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    Increment,
    Decrement,
}

/// Assignment operators; compound forms desugar to `target = target op value`
/// with a single evaluation of the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl AssignOp {
    pub fn binary(self) -> Option<BinaryOp> {
        Some(match self {
            AssignOp::Assign => return None,
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Sub => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Div => BinaryOp::Div,
            AssignOp::Rem => BinaryOp::Rem,
            AssignOp::BitAnd => BinaryOp::BitAnd,
            AssignOp::BitOr => BinaryOp::BitOr,
            AssignOp::BitXor => BinaryOp::BitXor,
            AssignOp::Shl => BinaryOp::Shl,
            AssignOp::Shr => BinaryOp::Shr,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal {
        value: Literal,
        line: usize,
    },
    Identifier {
        name: String,
        line: usize,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        line: usize,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        line: usize,
    },
    Array {
        elements: Vec<Expr>,
        line: usize,
    },
    Dict {
        entries: Vec<(Expr, Expr)>,
        line: usize,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
        line: usize,
    },
    Member {
        object: Box<Expr>,
        property: String,
        line: usize,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        line: usize,
    },
    Slice {
        object: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        line: usize,
    },
    Conditional {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
        line: usize,
    },
    Assign {
        target: Box<Expr>,
        op: AssignOp,
        value: Box<Expr>,
        line: usize,
    },
}

impl Expr {
    pub fn line(&self) -> usize {
        match self {
            Expr::Literal { line, .. }
            | Expr::Identifier { line, .. }
            | Expr::Binary { line, .. }
            | Expr::Unary { line, .. }
            | Expr::Array { line, .. }
            | Expr::Dict { line, .. }
            | Expr::Call { line, .. }
            | Expr::Member { line, .. }
            | Expr::Index { line, .. }
            | Expr::Slice { line, .. }
            | Expr::Conditional { line, .. }
            | Expr::Assign { line, .. } => *line,
        }
    }
}

/// Shared between the declaring statement and every closure created from it.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Option<TypeAnnotation>,
    pub body: Vec<Stmt>,
    pub line: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Option<TypeAnnotation>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Block(Vec<Stmt>),
    VarDecl {
        name: String,
        annotation: Option<TypeAnnotation>,
        initializer: Option<Expr>,
        constant: bool,
        line: usize,
    },
    FuncDecl(Rc<FunctionDecl>),
    ClassDecl {
        name: String,
        superclass: Option<String>,
        methods: Vec<Rc<FunctionDecl>>,
        line: usize,
    },
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    For {
        variable: String,
        iterable: Expr,
        body: Box<Stmt>,
        line: usize,
    },
    Return {
        value: Option<Expr>,
        line: usize,
    },
    Break {
        line: usize,
    },
    Continue {
        line: usize,
    },
    Import {
        module: String,
        names: Vec<String>,
        alias: Option<String>,
        line: usize,
    },
    Export {
        names: Vec<String>,
        /// `export func f() { .. }` declares and exports in one statement.
        declaration: Option<Box<Stmt>>,
        line: usize,
    },
    Namespace {
        name: String,
        body: Vec<Stmt>,
        line: usize,
    },
    TryCatch {
        try_block: Vec<Stmt>,
        catch_var: String,
        catch_type: Option<TypeAnnotation>,
        catch_block: Vec<Stmt>,
        line: usize,
    },
    Throw {
        expr: Expr,
        line: usize,
    },
}
