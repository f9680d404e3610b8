use crate::language::ast::*;

/// Renders an AST back to canonical source. Re-parsing the output yields an
/// AST equal to the input (modulo source lines, which the comparison in the
/// tests normalizes away by round-tripping both sides).
pub fn print_program(statements: &[Stmt]) -> String {
    let mut printer = Printer::new();
    for stmt in statements {
        printer.stmt(stmt);
    }
    printer.out
}

struct Printer {
    out: String,
    indent: usize,
}

impl Printer {
    fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(expr) => {
                let text = format!("{};", self.expr(expr));
                self.line(&text);
            }
            Stmt::Block(statements) => {
                self.line("{");
                self.indent += 1;
                for inner in statements {
                    self.stmt(inner);
                }
                self.indent -= 1;
                self.line("}");
            }
            Stmt::VarDecl {
                name,
                annotation,
                initializer,
                constant,
                ..
            } => {
                let keyword = if *constant { "const" } else { "loc" };
                let mut text = format!("{keyword} {name}");
                if let Some(annotation) = annotation {
                    text.push_str(&format!(": {annotation}"));
                }
                if let Some(initializer) = initializer {
                    text.push_str(&format!(" = {}", self.expr(initializer)));
                }
                text.push(';');
                self.line(&text);
            }
            Stmt::FuncDecl(decl) => self.function(decl),
            Stmt::ClassDecl {
                name,
                superclass,
                methods,
                ..
            } => {
                let header = match superclass {
                    Some(superclass) => format!("class {name} : {superclass} {{"),
                    None => format!("class {name} {{"),
                };
                self.line(&header);
                self.indent += 1;
                for method in methods {
                    self.function(method);
                }
                self.indent -= 1;
                self.line("}");
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let text = format!("if {} then", self.expr(condition));
                self.line(&text);
                self.indent += 1;
                self.stmt(then_branch);
                self.indent -= 1;
                if let Some(else_branch) = else_branch {
                    self.line("else");
                    self.indent += 1;
                    self.stmt(else_branch);
                    self.indent -= 1;
                }
            }
            Stmt::While { condition, body } => {
                let text = format!("while {}", self.expr(condition));
                self.line(&text);
                self.indent += 1;
                self.stmt(body);
                self.indent -= 1;
            }
            Stmt::For {
                variable,
                iterable,
                body,
                ..
            } => {
                let text = format!("for ({variable} in {})", self.expr(iterable));
                self.line(&text);
                self.indent += 1;
                self.stmt(body);
                self.indent -= 1;
            }
            Stmt::Return { value, .. } => match value {
                Some(value) => {
                    let text = format!("return {};", self.expr(value));
                    self.line(&text);
                }
                None => self.line("return;"),
            },
            Stmt::Break { .. } => self.line("break;"),
            Stmt::Continue { .. } => self.line("continue;"),
            Stmt::Import {
                module,
                names,
                alias,
                ..
            } => {
                if names.is_empty() {
                    let text = format!("import {};", quote(module));
                    self.line(&text);
                } else {
                    let mut text = format!("import {{ {} }} from {}", names.join(", "), quote(module));
                    if let Some(alias) = alias {
                        text.push_str(&format!(" as {alias}"));
                    }
                    text.push(';');
                    self.line(&text);
                }
            }
            Stmt::Export {
                names, declaration, ..
            } => match declaration {
                Some(declaration) => {
                    self.out.push_str(&"    ".repeat(self.indent));
                    self.out.push_str("export ");
                    let mut inner = Printer::new();
                    inner.indent = self.indent;
                    inner.stmt(declaration);
                    self.out.push_str(inner.out.trim_start());
                }
                None => {
                    let text = format!("export {{ {} }};", names.join(", "));
                    self.line(&text);
                }
            },
            Stmt::Namespace { name, body, .. } => {
                let text = format!("namespace {name} {{");
                self.line(&text);
                self.indent += 1;
                for inner in body {
                    self.stmt(inner);
                }
                self.indent -= 1;
                self.line("}");
            }
            Stmt::TryCatch {
                try_block,
                catch_var,
                catch_type,
                catch_block,
                ..
            } => {
                self.line("try {");
                self.indent += 1;
                for inner in try_block {
                    self.stmt(inner);
                }
                self.indent -= 1;
                let catch = match catch_type {
                    Some(annotation) => format!("}} catch ({catch_var} : {annotation}) {{"),
                    None => format!("}} catch ({catch_var}) {{"),
                };
                self.line(&catch);
                self.indent += 1;
                for inner in catch_block {
                    self.stmt(inner);
                }
                self.indent -= 1;
                self.line("}");
            }
            Stmt::Throw { expr, .. } => {
                let text = format!("throw {};", self.expr(expr));
                self.line(&text);
            }
        }
    }

    fn function(&mut self, decl: &FunctionDecl) {
        let params = decl
            .params
            .iter()
            .map(|p| match &p.annotation {
                Some(annotation) => format!("{}: {annotation}", p.name),
                None => p.name.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let header = match &decl.return_type {
            Some(annotation) => format!("func {}({params}): {annotation} {{", decl.name),
            None => format!("func {}({params}) {{", decl.name),
        };
        self.line(&header);
        self.indent += 1;
        for stmt in &decl.body {
            self.stmt(stmt);
        }
        self.indent -= 1;
        self.line("}");
    }

    fn expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Literal { value, .. } => match value {
                Literal::Null => "null".to_string(),
                Literal::Int(v) => v.to_string(),
                Literal::Float(v) => {
                    let text = v.to_string();
                    if text.contains(['.', 'e', 'E', 'n', 'i']) {
                        text
                    } else {
                        format!("{text}.0")
                    }
                }
                Literal::Bool(v) => v.to_string(),
                Literal::Str(v) => quote(v),
            },
            Expr::Identifier { name, .. } => name.clone(),
            Expr::Binary {
                op, left, right, ..
            } => format!("({} {} {})", self.expr(left), binary_symbol(*op), self.expr(right)),
            Expr::Unary { op, operand, .. } => {
                format!("{}{}", unary_symbol(*op), self.expr(operand))
            }
            Expr::Array { elements, .. } => {
                let inner = elements
                    .iter()
                    .map(|e| self.expr(e))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{inner}]")
            }
            Expr::Dict { entries, .. } => {
                let inner = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", self.expr(k), self.expr(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{inner}}}")
            }
            Expr::Call {
                callee, arguments, ..
            } => {
                let args = arguments
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({args})", self.expr(callee))
            }
            Expr::Member {
                object, property, ..
            } => format!("{}.{property}", self.expr(object)),
            Expr::Index { object, index, .. } => {
                format!("{}[{}]", self.expr(object), self.expr(index))
            }
            Expr::Slice {
                object,
                start,
                stop,
                step,
                ..
            } => {
                let mut text = format!("{}[", self.expr(object));
                if let Some(start) = start {
                    text.push_str(&self.expr(start));
                }
                text.push(':');
                if let Some(stop) = stop {
                    text.push_str(&self.expr(stop));
                }
                if let Some(step) = step {
                    text.push(':');
                    text.push_str(&self.expr(step));
                }
                text.push(']');
                text
            }
            Expr::Conditional {
                condition,
                then_expr,
                else_expr,
                ..
            } => format!(
                "({} ? {} : {})",
                self.expr(condition),
                self.expr(then_expr),
                self.expr(else_expr)
            ),
            Expr::Assign {
                target, op, value, ..
            } => format!(
                "{} {} {}",
                self.expr(target),
                assign_symbol(*op),
                self.expr(value)
            ),
        }
    }
}

fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Eq => "==",
        BinaryOp::NotEq => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::LtEq => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::GtEq => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::BitAnd => "&",
        BinaryOp::BitOr => "|",
        BinaryOp::BitXor => "^",
        BinaryOp::Shl => "<<",
        BinaryOp::Shr => ">>",
    }
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::Not => "!",
        UnaryOp::BitNot => "~",
        UnaryOp::Increment => "++",
        UnaryOp::Decrement => "--",
    }
}

fn assign_symbol(op: AssignOp) -> &'static str {
    match op {
        AssignOp::Assign => "=",
        AssignOp::Add => "+=",
        AssignOp::Sub => "-=",
        AssignOp::Mul => "*=",
        AssignOp::Div => "/=",
        AssignOp::Rem => "%=",
        AssignOp::BitAnd => "&=",
        AssignOp::BitOr => "|=",
        AssignOp::BitXor => "^=",
        AssignOp::Shl => "<<=",
        AssignOp::Shr => ">>=",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::parser::parse_source;

    /// Normalizes line numbers out of the comparison: both sides are printed
    /// and re-parsed once, so the ASTs being compared carry the canonical
    /// layout's lines.
    fn idempotent(source: &str) {
        let first = parse_source(source).expect("initial parse");
        let printed = print_program(&first);
        let second = parse_source(&printed).expect("reparse of printed source");
        let reprinted = print_program(&second);
        assert_eq!(printed, reprinted);
        let third = parse_source(&reprinted).expect("reparse of reprinted source");
        assert_eq!(second, third);
    }

    #[test]
    fn print_parse_round_trip_is_stable() {
        idempotent("loc x = 1 + 2 * 3; print(x);");
        idempotent("func f(a: int, b): int|float { return a + b; }");
        idempotent("class V { func __init__(x) { this.x = x; } }");
        idempotent("if a > 1 then { b(); } else { c(); }");
        idempotent("for (x in [1, 2, 3]) { print(x[0:2:1]); }");
        idempotent("try { throw \"x\"; } catch (e : string) { print(e); }");
        idempotent("loc d: dict{string: array[int]} = {\"a\": [1]};");
        idempotent("import { a } from \"m\" as n; export { a };");
        idempotent("namespace util { func id(x) { return x; } }");
        idempotent("loc y = a ? -1 : ~2; y += 3; y[0] <<= 1;");
    }
}
