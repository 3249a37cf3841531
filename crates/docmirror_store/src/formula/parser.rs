//! Recursive-descent parser producing the formula AST.
//!
//! Precedence, loosest first: `|`, `&`, `!`, comparisons, `:` (list
//! construction), primaries.

use super::lexer::{Token, TokenKind};
use super::{CompareOp, Expr, FormulaError, Function};
use docmirror_core::Value;

/// Deepest nesting of `!`, parentheses and call arguments accepted.
pub(crate) const MAX_DEPTH: usize = 256;

pub(crate) fn parse(tokens: Vec<Token>, source_len: usize) -> Result<Expr, FormulaError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        source_len,
    };
    parser.skip_select_keyword();
    let expr = parser.or()?;
    if let Some(token) = parser.peek() {
        return Err(FormulaError::new(token.offset, "unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    source_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.offset).unwrap_or(self.source_len)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), FormulaError> {
        match self.advance() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(FormulaError::new(token.offset, format!("expected {what}"))),
            None => Err(FormulaError::new(
                self.source_len,
                format!("expected {what}, found end of input"),
            )),
        }
    }

    /// Runs `f` one nesting level deeper, failing instead of recursing past
    /// [`MAX_DEPTH`].
    fn nested<T>(
        &mut self,
        offset: usize,
        f: impl FnOnce(&mut Self) -> Result<T, FormulaError>,
    ) -> Result<T, FormulaError> {
        if self.depth >= MAX_DEPTH {
            return Err(FormulaError::new(
                offset,
                format!("formula nested deeper than {MAX_DEPTH} levels"),
            ));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// `SELECT` is accepted as an optional leading keyword.
    fn skip_select_keyword(&mut self) {
        if let Some(TokenKind::Ident(word)) = self.peek_kind() {
            let next_is_operand = !matches!(
                self.tokens.get(1).map(|t| &t.kind),
                None | Some(
                    TokenKind::Eq
                        | TokenKind::Ne
                        | TokenKind::Lt
                        | TokenKind::Gt
                        | TokenKind::Le
                        | TokenKind::Ge
                        | TokenKind::And
                        | TokenKind::Or
                        | TokenKind::Colon
                        | TokenKind::LParen
                )
            );
            if word.eq_ignore_ascii_case("select") && next_is_operand {
                self.pos += 1;
            }
        }
    }

    fn or(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.and()?;
        while matches!(self.peek_kind(), Some(TokenKind::Or)) {
            self.advance();
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.unary()?;
        while matches!(self.peek_kind(), Some(TokenKind::And)) {
            self.advance();
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if matches!(self.peek_kind(), Some(TokenKind::Not)) {
            let offset = self.offset();
            self.advance();
            let inner = self.nested(offset, Self::unary)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, FormulaError> {
        let left = self.list()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Eq) => CompareOp::Eq,
            Some(TokenKind::Ne) => CompareOp::Ne,
            Some(TokenKind::Lt) => CompareOp::Lt,
            Some(TokenKind::Gt) => CompareOp::Gt,
            Some(TokenKind::Le) => CompareOp::Le,
            Some(TokenKind::Ge) => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.list()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn list(&mut self) -> Result<Expr, FormulaError> {
        let first = self.primary()?;
        if !matches!(self.peek_kind(), Some(TokenKind::Colon)) {
            return Ok(first);
        }
        let mut items = vec![first];
        while matches!(self.peek_kind(), Some(TokenKind::Colon)) {
            self.advance();
            items.push(self.primary()?);
        }
        Ok(Expr::List(items))
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        let offset = self.offset();
        let Some(token) = self.advance() else {
            return Err(FormulaError::new(offset, "unexpected end of input"));
        };

        match token.kind {
            TokenKind::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            TokenKind::Num(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::LParen => {
                let inner = self.nested(token.offset, Self::or)?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::AtIdent(name) if name.eq_ignore_ascii_case("all") => Ok(Expr::All),
            TokenKind::AtIdent(name) if name.eq_ignore_ascii_case("true") => {
                Ok(Expr::Literal(Value::Bool(true)))
            }
            TokenKind::AtIdent(name) if name.eq_ignore_ascii_case("false") => {
                Ok(Expr::Literal(Value::Bool(false)))
            }
            TokenKind::AtIdent(name) => self.call(&name, token.offset),
            TokenKind::Ident(name) => {
                if matches!(self.peek_kind(), Some(TokenKind::LParen)) {
                    self.call(&name, token.offset)
                } else {
                    Ok(Expr::Field(name))
                }
            }
            _ => Err(FormulaError::new(token.offset, "expected a value")),
        }
    }

    fn call(&mut self, name: &str, offset: usize) -> Result<Expr, FormulaError> {
        let function = Function::lookup(name)
            .ok_or_else(|| FormulaError::new(offset, format!("unknown function '{name}'")))?;

        self.expect(TokenKind::LParen, "'(' after function name")?;
        let mut args = Vec::new();
        if !matches!(self.peek_kind(), Some(TokenKind::RParen)) {
            loop {
                args.push(self.nested(offset, Self::or)?);
                if matches!(self.peek_kind(), Some(TokenKind::Sep)) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')' after arguments")?;

        if args.len() != function.arity() {
            return Err(FormulaError::new(
                offset,
                format!(
                    "{} takes {} argument(s), got {}",
                    function.name(),
                    function.arity(),
                    args.len()
                ),
            ));
        }
        if function == Function::IsAvailable && !matches!(args.first(), Some(Expr::Field(_))) {
            return Err(FormulaError::new(offset, "IsAvailable expects a field name"));
        }

        Ok(Expr::Call(function, args))
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse_str(src: &str) -> Result<Expr, FormulaError> {
        parse(tokenize(src)?, src.len())
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse_str("A = 1 | B = 2 & C = 3").unwrap();
        match expr {
            Expr::Or(_, right) => assert!(matches!(*right, Expr::And(_, _))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn select_keyword_is_optional() {
        assert_eq!(
            parse_str("SELECT @All").unwrap(),
            parse_str("@All").unwrap()
        );
        // A field that happens to be called Select still parses.
        assert_eq!(
            parse_str("Select").unwrap(),
            Expr::Field("Select".into())
        );
        assert!(matches!(
            parse_str("Select = 1").unwrap(),
            Expr::Compare(CompareOp::Eq, _, _)
        ));
    }

    #[test]
    fn function_arity_is_checked() {
        let err = parse_str("StartsWith(Lastname)").unwrap_err();
        assert!(err.message.contains("2 argument"));
    }

    #[test]
    fn unknown_function() {
        let err = parse_str("@Frobnicate(1)").unwrap_err();
        assert!(err.message.contains("unknown function"));
    }

    #[test]
    fn is_available_needs_field() {
        assert!(parse_str("IsAvailable(\"x\")").is_err());
        assert!(parse_str("@IsAvailable(Email)").is_ok());
    }

    #[test]
    fn trailing_input_rejected() {
        assert!(parse_str("Form = \"Person\" \"extra\"").is_err());
        assert!(parse_str("(Form = 1").is_err());
        assert!(parse_str("").is_err());
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let nots = format!("{}@All", "!".repeat(10_000));
        let err = parse_str(&nots).unwrap_err();
        assert!(err.message.contains("nested deeper"));

        let parens = format!("{}@All{}", "(".repeat(10_000), ")".repeat(10_000));
        let err = parse_str(&parens).unwrap_err();
        assert!(err.message.contains("nested deeper"));
        assert_eq!(err.offset, MAX_DEPTH);

        let calls = format!("{}A{}", "@Lowercase(".repeat(10_000), ")".repeat(10_000));
        assert!(parse_str(&calls).is_err());
    }

    #[test]
    fn nesting_up_to_the_limit_parses() {
        let nots = format!("{}@All", "!".repeat(MAX_DEPTH));
        assert!(parse_str(&nots).is_ok());

        let depth = MAX_DEPTH - 1;
        let parens = format!("{}@All{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(parse_str(&parens).unwrap(), Expr::All);
    }

    #[test]
    fn list_construction() {
        let expr = parse_str("Tag = \"a\" : \"b\"").unwrap();
        match expr {
            Expr::Compare(CompareOp::Eq, _, right) => {
                assert!(matches!(*right, Expr::List(ref items) if items.len() == 2))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
