//! Recursive-descent parser.
//!
//! Precedence, loosest first:
//!
//! ```text
//!   c ? a : b        (right associative)
//!   ||
//!   &&
//!   == !=
//!   < <= > >=
//!   + -
//!   * / %
//!   unary - !
//!   literal | ident | call(...) | ( expr )
//! ```
//!
//! Input is capped at [`MAX_TOKENS`] tokens and [`MAX_DEPTH`] levels of
//! nesting, which bounds the height of the tree the evaluator walks.

use crate::ast::{BinaryOp, Expr, Function, UnaryOp};
use crate::error::{CompileError, CompileResult};
use crate::lexer::{Spanned, Token, tokenize};

/// Longest accepted expression, in tokens (end of input included).
pub const MAX_TOKENS: usize = 512;

/// Deepest accepted nesting of parentheses, calls, conditionals and
/// unary operators.
pub const MAX_DEPTH: usize = 32;

pub fn parse(src: &str) -> CompileResult<Expr> {
    let tokens = tokenize(src)?;
    if matches!(tokens.first().map(|t| &t.token), Some(Token::Eof) | None) {
        return Err(CompileError::Empty);
    }
    if tokens.len() > MAX_TOKENS {
        return Err(CompileError::TooLong {
            tokens: tokens.len(),
            max: MAX_TOKENS,
        });
    }
    let mut parser = Parser {
        tokens,
        at: 0,
        depth: 0,
    };
    let expr = parser.ternary()?;
    parser.expect(Token::Eof, "end of input")?;
    Ok(expr)
}

static EOF: Token = Token::Eof;

struct Parser {
    tokens: Vec<Spanned>,
    at: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.at)
            .map(|s| &s.token)
            .unwrap_or(&EOF)
    }

    fn pos(&self) -> usize {
        self.tokens.get(self.at).map(|s| s.pos).unwrap_or(0)
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.at < self.tokens.len() {
            self.at += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> CompileResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &'static str) -> CompileError {
        CompileError::UnexpectedToken {
            expected,
            found: self.peek().describe(),
            pos: self.pos(),
        }
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> CompileResult<T>) -> CompileResult<T> {
        if self.depth >= MAX_DEPTH {
            return Err(CompileError::TooDeep {
                pos: self.pos(),
                max: MAX_DEPTH,
            });
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn ternary(&mut self) -> CompileResult<Expr> {
        let cond = self.or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.nested(Self::ternary)?;
        self.expect(Token::Colon, "':'")?;
        let otherwise = self.nested(Self::ternary)?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn or(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::Ne,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.comparison()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn comparison(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn multiplicative(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> CompileResult<Expr> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            _ => return self.primary(),
        };
        self.bump();
        let expr = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn primary(&mut self) -> CompileResult<Expr> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.bump();
                Ok(Expr::Number(n))
            }
            Token::True => {
                self.bump();
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.bump();
                Ok(Expr::Bool(false))
            }
            Token::LParen => {
                self.bump();
                let inner = self.nested(Self::ternary)?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => {
                self.bump();
                if self.eat(&Token::LParen) {
                    self.nested(|p| p.call(name))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn call(&mut self, name: String) -> CompileResult<Expr> {
        let func = Function::lookup(&name).ok_or(CompileError::UnknownFunction(name))?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.ternary()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::RParen, "',' or ')'")?;
                break;
            }
        }
        func.check_arity(args.len())?;
        Ok(Expr::Call { func, args })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            binary(
                BinaryOp::Add,
                Expr::Number(1.0),
                binary(BinaryOp::Mul, Expr::Number(2.0), Expr::Number(3.0)),
            )
        );
    }

    #[test]
    fn subtraction_is_left_associative() {
        let expr = parse("10 - 4 - 3").unwrap();
        assert_eq!(
            expr,
            binary(
                BinaryOp::Sub,
                binary(BinaryOp::Sub, Expr::Number(10.0), Expr::Number(4.0)),
                Expr::Number(3.0),
            )
        );
    }

    #[test]
    fn ternary_nests_to_the_right() {
        let expr = parse("a ? 1 : b ? 2 : 3").unwrap();
        match expr {
            Expr::Ternary { otherwise, .. } => {
                assert!(matches!(*otherwise, Expr::Ternary { .. }))
            }
            other => panic!("expected ternary, got {other:?}"),
        }
    }

    #[test]
    fn calls_resolve_functions() {
        let expr = parse("min(x, 180)").unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                func: Function::Min,
                args: vec![Expr::Var("x".into()), Expr::Number(180.0)],
            }
        );
    }

    #[test]
    fn unknown_function_is_compile_error() {
        assert_eq!(
            parse("size(x)"),
            Err(CompileError::UnknownFunction("size".into()))
        );
    }

    #[test]
    fn wrong_arity_is_compile_error() {
        assert!(matches!(parse("pow(2)"), Err(CompileError::Arity { .. })));
        assert!(matches!(parse("abs()"), Err(CompileError::Arity { .. })));
    }

    #[test]
    fn malformed_inputs() {
        assert_eq!(parse(""), Err(CompileError::Empty));
        assert_eq!(parse("   "), Err(CompileError::Empty));
        assert!(matches!(parse("ram >="), Err(CompileError::UnexpectedToken { .. })));
        assert!(matches!(parse("(cpu"), Err(CompileError::UnexpectedToken { .. })));
        assert!(matches!(parse("cpu cpu"), Err(CompileError::UnexpectedToken { .. })));
        assert!(matches!(parse("a ? 1"), Err(CompileError::UnexpectedToken { .. })));
    }

    fn nested_parens(levels: usize) -> String {
        format!("{}1{} > 0", "(".repeat(levels), ")".repeat(levels))
    }

    #[test]
    fn nesting_up_to_the_limit_parses() {
        assert!(parse(&nested_parens(MAX_DEPTH)).is_ok());
        let calls = format!("{}x{}", "abs(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(parse(&calls).is_ok());
    }

    #[test]
    fn nesting_past_the_limit_is_compile_error() {
        assert!(matches!(
            parse(&nested_parens(MAX_DEPTH + 1)),
            Err(CompileError::TooDeep { .. })
        ));
        let negations = format!("{}1", "-".repeat(MAX_DEPTH + 1));
        assert!(matches!(parse(&negations), Err(CompileError::TooDeep { .. })));
        let conditionals = format!("{}1", "a ? 1 : ".repeat(MAX_DEPTH + 1));
        assert!(matches!(parse(&conditionals), Err(CompileError::TooDeep { .. })));
    }

    #[test]
    fn oversized_inputs_fail_without_recursing() {
        assert!(matches!(
            parse(&nested_parens(100_000)),
            Err(CompileError::TooLong { .. })
        ));
        let chain = format!("{}1 > 0", "1 + ".repeat(200_000));
        assert!(matches!(parse(&chain), Err(CompileError::TooLong { .. })));
    }
}
