//! Tokenizer for selection formulas.

use super::FormulaError;

/// A lexical token with its byte offset.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    /// Field name, keyword or function name.
    Ident(String),
    /// `@`-prefixed name such as `@All`.
    AtIdent(String),
    Str(String),
    Num(f64),
    LParen,
    RParen,
    /// Argument separator, `,` or `;`.
    Sep,
    Colon,
    And,
    Or,
    Not,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        let kind = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => single(&mut chars, TokenKind::LParen),
            ')' => single(&mut chars, TokenKind::RParen),
            ',' | ';' => single(&mut chars, TokenKind::Sep),
            ':' => single(&mut chars, TokenKind::Colon),
            '&' => single(&mut chars, TokenKind::And),
            '|' => single(&mut chars, TokenKind::Or),
            '=' => single(&mut chars, TokenKind::Eq),
            '!' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                    TokenKind::Ne
                } else {
                    TokenKind::Not
                }
            }
            '<' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        TokenKind::Le
                    }
                    Some(&(_, '>')) => {
                        chars.next();
                        TokenKind::Ne
                    }
                    _ => TokenKind::Lt,
                }
            }
            '>' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => text.push(escaped),
                            None => break,
                        },
                        '"' => {
                            closed = true;
                            break;
                        }
                        other => text.push(other),
                    }
                }
                if !closed {
                    return Err(FormulaError::new(offset, "unterminated string literal"));
                }
                TokenKind::Str(text)
            }
            '@' => {
                chars.next();
                let name = take_ident(&mut chars);
                if name.is_empty() {
                    return Err(FormulaError::new(offset, "expected a name after '@'"));
                }
                TokenKind::AtIdent(name)
            }
            c if c.is_ascii_digit() || c == '.' || c == '-' => {
                let mut raw = String::new();
                raw.push(c);
                chars.next();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        raw.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = raw
                    .parse::<f64>()
                    .map_err(|_| FormulaError::new(offset, format!("invalid number '{raw}'")))?;
                TokenKind::Num(n)
            }
            c if is_ident_start(c) => TokenKind::Ident(take_ident(&mut chars)),
            other => {
                return Err(FormulaError::new(
                    offset,
                    format!("unexpected character '{other}'"),
                ))
            }
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}

fn single(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    kind: TokenKind,
) -> TokenKind {
    chars.next();
    kind
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn take_ident(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> String {
    let mut name = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if is_ident_start(c) || c.is_ascii_digit() {
            name.push(c);
            chars.next();
        } else {
            break;
        }
    }
    name
}
