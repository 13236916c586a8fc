use serde_json::Number;

use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(Number),
    Str(String),
    True,
    False,
    None,
    And,
    Or,
    Not,
    Is,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Dot,
    LParen,
    RParen,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{}'", name),
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::Str(s) => format!("string '{}'", s),
            TokenKind::True => "'True'".into(),
            TokenKind::False => "'False'".into(),
            TokenKind::None => "'None'".into(),
            TokenKind::And => "'and'".into(),
            TokenKind::Or => "'or'".into(),
            TokenKind::Not => "'not'".into(),
            TokenKind::Is => "'is'".into(),
            TokenKind::Eq => "'=='".into(),
            TokenKind::Ne => "'!='".into(),
            TokenKind::Lt => "'<'".into(),
            TokenKind::Le => "'<='".into(),
            TokenKind::Gt => "'>'".into(),
            TokenKind::Ge => "'>='".into(),
            TokenKind::Dot => "'.'".into(),
            TokenKind::LParen => "'('".into(),
            TokenKind::RParen => "')'".into(),
            TokenKind::Eof => "end of expression".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset into the source text.
    pub position: usize,
}

/// Split an expression into tokens. Always ends with [`TokenKind::Eof`].
pub fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::LParen, position: pos });
            }
            ')' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::RParen, position: pos });
            }
            '.' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::Dot, position: pos });
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = matches!(chars.peek(), Some(&(_, '=')));
                if followed_by_eq {
                    chars.next();
                }
                let kind = match (ch, followed_by_eq) {
                    ('=', true) => TokenKind::Eq,
                    ('!', true) => TokenKind::Ne,
                    ('<', true) => TokenKind::Le,
                    ('>', true) => TokenKind::Ge,
                    ('<', false) => TokenKind::Lt,
                    ('>', false) => TokenKind::Gt,
                    ('=', false) => return Err(syntax(pos, "assignment is not allowed; use '=='")),
                    _ => return Err(syntax(pos, "'!' is not an operator; use 'not' or '!='")),
                };
                tokens.push(Token { kind, position: pos });
            }
            '\'' | '"' => {
                chars.next();
                let quote = ch;
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    if c == '\\' {
                        let Some((esc_pos, escaped)) = chars.next() else {
                            break;
                        };
                        match escaped {
                            '\\' | '\'' | '"' => text.push(escaped),
                            'n' => text.push('\n'),
                            't' => text.push('\t'),
                            other => {
                                return Err(syntax(
                                    esc_pos,
                                    format!("unknown escape sequence '\\{}'", other),
                                ))
                            }
                        }
                        continue;
                    }
                    text.push(c);
                }
                if !closed {
                    return Err(syntax(pos, "unterminated string literal"));
                }
                tokens.push(Token { kind: TokenKind::Str(text), position: pos });
            }
            c if c.is_ascii_digit() || c == '-' => {
                let number = lex_number(input, pos)?;
                // Advance past the characters the number consumed.
                while matches!(chars.peek(), Some(&(p, _)) if p < pos + number.1) {
                    chars.next();
                }
                tokens.push(Token { kind: TokenKind::Number(number.0), position: pos });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let after_dot = matches!(tokens.last(), Some(Token { kind: TokenKind::Dot, .. }));
                let kind = match word.as_str() {
                    // Field names may reuse keywords: `quality.true`, `context.is`.
                    _ if after_dot => TokenKind::Ident(word),
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    "is" => TokenKind::Is,
                    "None" => TokenKind::None,
                    "True" | "true" => TokenKind::True,
                    "False" | "false" => TokenKind::False,
                    _ => TokenKind::Ident(word),
                };
                tokens.push(Token { kind, position: pos });
            }
            other => {
                return Err(syntax(pos, format!("unexpected character '{}'", other)));
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        position: input.len(),
    });
    Ok(tokens)
}

/// Lex a numeric literal starting at `start`. Returns the number and its byte length.
fn lex_number(input: &str, start: usize) -> Result<(Number, usize), ExprError> {
    let bytes = input.as_bytes();
    let mut end = start;
    if bytes[end] == b'-' {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return Err(syntax(start, "'-' must be followed by a number; arithmetic is not supported"));
    }

    let mut is_float = false;
    if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
        is_float = true;
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            is_float = true;
            end = exp_end;
        }
    }

    let text = &input[start..end];
    let number = if is_float {
        text.parse::<f64>().ok().and_then(Number::from_f64)
    } else {
        text.parse::<i64>()
            .ok()
            .map(Number::from)
            .or_else(|| text.parse::<u64>().ok().map(Number::from))
            .or_else(|| text.parse::<f64>().ok().and_then(Number::from_f64))
    };
    number
        .map(|n| (n, end - start))
        .ok_or_else(|| syntax(start, format!("invalid number literal '{}'", text)))
}

fn syntax(position: usize, message: impl Into<String>) -> ExprError {
    ExprError::Syntax {
        position,
        message: message.into(),
    }
}
