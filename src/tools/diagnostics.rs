use crate::language::errors::SyntaxError;
use crate::runtime::error::{ErrorClass, RuntimeError};
use miette::{Diagnostic, NamedSource, Report, SourceSpan};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, Clone)]
#[error("{message}")]
pub struct SyntaxDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("here")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
    message: String,
}

impl SyntaxDiagnostic {
    pub fn from_error(name: &str, source: &str, error: &SyntaxError) -> Self {
        let offset = offset_of(source, error.line, error.column);
        Self {
            src: NamedSource::new(name, source.to_string()),
            span: (offset, 1).into(),
            help: error.help.clone(),
            message: error.message.clone(),
        }
    }
}

pub fn emit_syntax_errors(name: &str, source: &str, errors: &[SyntaxError]) {
    for error in errors {
        let diagnostic = SyntaxDiagnostic::from_error(name, source, error);
        eprintln!("{:?}", Report::new(diagnostic));
    }
}

pub fn report_runtime_error(error: &RuntimeError) {
    let class = match error.class() {
        ErrorClass::Syntax => "syntax",
        ErrorClass::Type => "type",
        ErrorClass::Runtime => "runtime",
        ErrorClass::Module => "module",
        ErrorClass::Internal => "internal",
    };
    if error.line > 0 {
        eprintln!(
            "{class} error [{code}]: {error} at line {line}",
            code = error.code(),
            line = error.line
        );
    } else {
        eprintln!("{class} error [{code}]: {error}", code = error.code());
    }
}

/// Byte offset of a (line, column) pair, both 1-based.
fn offset_of(source: &str, line: usize, column: usize) -> usize {
    let mut current_line = 1;
    let mut offset = 0;
    for (index, c) in source.char_indices() {
        if current_line == line {
            offset = index;
            break;
        }
        if c == '\n' {
            current_line += 1;
            offset = index + c.len_utf8();
        }
    }
    (offset + column.saturating_sub(1)).min(source.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_land_on_the_right_line() {
        let source = "one\ntwo\nthree";
        assert_eq!(offset_of(source, 1, 1), 0);
        assert_eq!(offset_of(source, 2, 1), 4);
        assert_eq!(offset_of(source, 3, 2), 9);
        assert_eq!(offset_of(source, 9, 9), source.len());
    }
}
