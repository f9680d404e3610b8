use crate::language::{
    errors::SyntaxError,
    token::{Token, TokenKind},
};
use std::collections::HashMap;

/// Rewrites a token stream before parsing: collects `macro` definitions and
/// substitutes every later invocation. The rewrite is a single left-to-right
/// pass; substituted body tokens go straight to the output and are never
/// re-scanned, so a macro name inside another macro's body stays literal.
/// Substitution is non-hygienic; a macro body that collides with names in the
/// surrounding scope is the author's problem.
pub fn expand(tokens: Vec<Token>) -> Result<Vec<Token>, SyntaxError> {
    let mut expander = Expander::new();
    expander.process(&tokens)
}

#[derive(Clone)]
struct MacroDef {
    params: Vec<String>,
    body: Vec<Token>,
    function_like: bool,
}

struct Expander {
    macros: HashMap<String, MacroDef>,
}

impl Expander {
    fn new() -> Self {
        Self {
            macros: HashMap::new(),
        }
    }

    fn process(&mut self, tokens: &[Token]) -> Result<Vec<Token>, SyntaxError> {
        let mut result = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            match token.kind {
                TokenKind::Macro => {
                    i = self.collect_definition(tokens, i)?;
                }
                TokenKind::Identifier if self.macros.contains_key(&token.lexeme) => {
                    let expanded = self.expand_call(tokens, &mut i)?;
                    result.extend(expanded);
                }
                _ => {
                    result.push(token.clone());
                    i += 1;
                }
            }
        }
        Ok(result)
    }

    fn collect_definition(&mut self, tokens: &[Token], start: usize) -> Result<usize, SyntaxError> {
        let macro_token = &tokens[start];
        let mut i = start + 1;
        let name = match tokens.get(i) {
            Some(t) if t.kind == TokenKind::Identifier => t.lexeme.clone(),
            _ => {
                return Err(SyntaxError::new(
                    "Expected macro name after 'macro'",
                    macro_token.line,
                    macro_token.column,
                ));
            }
        };
        i += 1;

        let mut params = Vec::new();
        let mut function_like = false;
        if tokens.get(i).map(|t| t.kind) == Some(TokenKind::LParen) {
            function_like = true;
            i += 1;
            loop {
                match tokens.get(i) {
                    Some(t) if t.kind == TokenKind::RParen => {
                        i += 1;
                        break;
                    }
                    Some(t) if t.kind == TokenKind::Identifier => {
                        params.push(t.lexeme.clone());
                        i += 1;
                    }
                    Some(t) if t.kind == TokenKind::Comma => {
                        i += 1;
                    }
                    Some(t) => {
                        return Err(SyntaxError::new(
                            "Expected identifier in macro parameter list",
                            t.line,
                            t.column,
                        ));
                    }
                    None => {
                        return Err(SyntaxError::new(
                            "Expected ')' after macro parameters",
                            macro_token.line,
                            macro_token.column,
                        ));
                    }
                }
            }
        }

        let mut body = Vec::new();
        while let Some(t) = tokens.get(i) {
            if t.kind == TokenKind::Semi || t.kind == TokenKind::Eof {
                break;
            }
            body.push(t.clone());
            i += 1;
        }
        match tokens.get(i) {
            Some(t) if t.kind == TokenKind::Semi => i += 1,
            _ => {
                return Err(SyntaxError::new(
                    format!("Expected ';' after body of macro `{name}`"),
                    macro_token.line,
                    macro_token.column,
                ));
            }
        }

        self.macros.insert(
            name,
            MacroDef {
                params,
                body,
                function_like,
            },
        );
        Ok(i)
    }

    fn expand_call(
        &mut self,
        tokens: &[Token],
        index: &mut usize,
    ) -> Result<Vec<Token>, SyntaxError> {
        let call_token = tokens[*index].clone();
        let def = self
            .macros
            .get(&call_token.lexeme)
            .cloned()
            .ok_or_else(|| {
                SyntaxError::new(
                    format!("Macro `{}` is not defined", call_token.lexeme),
                    call_token.line,
                    call_token.column,
                )
            })?;
        *index += 1;

        let mut arguments: Vec<Vec<Token>> = Vec::new();
        if def.function_like {
            match tokens.get(*index) {
                Some(t) if t.kind == TokenKind::LParen => {
                    *index += 1;
                    arguments = capture_arguments(tokens, index);
                    match tokens.get(*index) {
                        Some(t) if t.kind == TokenKind::RParen => *index += 1,
                        _ => {
                            return Err(SyntaxError::new(
                                format!("Expected ')' after arguments to macro `{}`", call_token.lexeme),
                                call_token.line,
                                call_token.column,
                            ));
                        }
                    }
                }
                _ => {
                    return Err(SyntaxError::new(
                        format!("Expected '(' after macro `{}`", call_token.lexeme),
                        call_token.line,
                        call_token.column,
                    ));
                }
            }
            if def.params.len() != arguments.len() {
                return Err(SyntaxError::new(
                    format!(
                        "Macro `{}` expects {} argument(s), found {}",
                        call_token.lexeme,
                        def.params.len(),
                        arguments.len()
                    ),
                    call_token.line,
                    call_token.column,
                ));
            }
        }

        Ok(substitute(&def.body, &def.params, &arguments))
    }
}

/// Splits the argument token run at top-level commas. Commas nested inside
/// `()`, `[]`, or `{}` belong to the argument that contains them.
fn capture_arguments(tokens: &[Token], index: &mut usize) -> Vec<Vec<Token>> {
    let mut arguments = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut paren = 0i32;
    let mut brace = 0i32;
    let mut bracket = 0i32;

    while let Some(token) = tokens.get(*index) {
        match token.kind {
            TokenKind::Eof => break,
            TokenKind::LParen => paren += 1,
            TokenKind::RParen => {
                if paren == 0 {
                    break;
                }
                paren -= 1;
            }
            TokenKind::LBrace => brace += 1,
            TokenKind::RBrace => brace -= 1,
            TokenKind::LBracket => bracket += 1,
            TokenKind::RBracket => bracket -= 1,
            TokenKind::Comma if paren == 0 && brace == 0 && bracket == 0 => {
                if !current.is_empty() {
                    arguments.push(std::mem::take(&mut current));
                }
                *index += 1;
                continue;
            }
            _ => {}
        }
        current.push(token.clone());
        *index += 1;
    }
    if !current.is_empty() {
        arguments.push(current);
    }
    arguments
}

fn substitute(body: &[Token], params: &[String], arguments: &[Vec<Token>]) -> Vec<Token> {
    let mut result = Vec::with_capacity(body.len());
    for token in body {
        if token.kind == TokenKind::Identifier {
            if let Some(position) = params.iter().position(|p| *p == token.lexeme) {
                if let Some(argument) = arguments.get(position) {
                    result.extend(argument.iter().cloned());
                    continue;
                }
            }
        }
        result.push(token.clone());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::lexer::lex;

    fn expand_source(source: &str) -> Result<Vec<Token>, SyntaxError> {
        expand(lex(source))
    }

    fn lexemes(tokens: &[Token]) -> Vec<String> {
        tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| t.lexeme.clone())
            .collect()
    }

    #[test]
    fn object_like_macro_substitutes_body() {
        let tokens = expand_source("macro PI 3.14159; loc x = PI;").unwrap();
        assert_eq!(
            lexemes(&tokens),
            vec!["loc", "x", "=", "3.14159", ";"]
        );
    }

    #[test]
    fn function_like_macro_substitutes_parameters() {
        let tokens = expand_source("macro SQUARE(x) ((x) * (x)); loc y = SQUARE(2 + 3);").unwrap();
        assert_eq!(
            lexemes(&tokens),
            vec![
                "loc", "y", "=", "(", "(", "2", "+", "3", ")", "*", "(", "2", "+", "3", ")", ")",
                ";"
            ]
        );
    }

    #[test]
    fn argument_capture_respects_nested_brackets() {
        let tokens = expand_source("macro FIRST(a, b) a; loc x = FIRST([1, 2], {\"k\": 3});")
            .unwrap();
        assert_eq!(
            lexemes(&tokens),
            vec!["loc", "x", "=", "[", "1", ",", "2", "]", ";"]
        );
    }

    #[test]
    fn substituted_bodies_are_not_rescanned() {
        // Single pass: TWO inside DOUBLE's body is emitted literally, not
        // expanded a second time.
        let tokens =
            expand_source("macro TWO 2; macro DOUBLE(x) (x * TWO); loc y = DOUBLE(5);").unwrap();
        assert_eq!(
            lexemes(&tokens),
            vec!["loc", "y", "=", "(", "5", "*", "TWO", ")", ";"]
        );
    }

    #[test]
    fn self_referential_bodies_expand_once() {
        let tokens = expand_source("macro LOOP(x) LOOP(x); LOOP(1);").unwrap();
        assert_eq!(lexemes(&tokens), vec!["LOOP", "(", "1", ")", ";"]);
    }

    #[test]
    fn argument_count_mismatch_is_reported() {
        let err = expand_source("macro ADD(a, b) a + b; ADD(1);").unwrap_err();
        assert!(err.message.contains("expects 2 argument(s)"));
    }

    #[test]
    fn missing_paren_is_reported() {
        let err = expand_source("macro F(a) a; loc x = F;").unwrap_err();
        assert!(err.message.contains("Expected '('"));
    }

    #[test]
    fn missing_semicolon_after_body_is_reported() {
        let err = expand_source("macro BAD 1").unwrap_err();
        assert!(err.message.contains("Expected ';'"));
    }
}
