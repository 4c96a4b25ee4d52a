//! Recursive-descent parser from tokens to [`Expr`].
//!
//! Precedence, loosest first:
//!
//! ```text
//! or / and / not        word operators
//! ?:                    ternary (right associative)
//! ||  &&
//! eq ne lt gt le ge == != < > <= >=   (non associative)
//! .                     concatenation
//! =~ !~                 regex binding
//! ! -                   unary
//! literal, $var, f(..), ( .. )
//! ```

use regex::RegexBuilder;

use crate::error::{RuleError, RuleResult};
use crate::eval::{Expr, Segment, Var};
use crate::functions::FunctionLibrary;
use crate::lexer::{tokenize, CompareOp, Spanned, Token};
use crate::value::Value;

/// Parse an expression, resolving calls against `library`.
pub fn parse(src: &str, library: &FunctionLibrary) -> RuleResult<Expr> {
    let mut parser = Parser {
        src,
        tokens: tokenize(src)?,
        pos: 0,
        library,
    };
    let expr = parser.low_or()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.error(format!("unexpected {}", describe(other)))),
    }
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    library: &'a FunctionLibrary,
}

impl Parser<'_> {
    fn low_or(&mut self) -> RuleResult<Expr> {
        let mut left = self.low_and()?;
        while self.eat_word("or") {
            let right = self.low_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn low_and(&mut self) -> RuleResult<Expr> {
        let mut left = self.low_not()?;
        while self.eat_word("and") {
            let right = self.low_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn low_not(&mut self) -> RuleResult<Expr> {
        if self.eat_word("not") {
            return Ok(Expr::Not(Box::new(self.low_not()?)));
        }
        self.ternary()
    }

    fn ternary(&mut self) -> RuleResult<Expr> {
        let cond = self.or_expr()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.ternary()?;
        self.expect(&Token::Colon)?;
        let otherwise = self.ternary()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn or_expr(&mut self) -> RuleResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::OrOr) {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> RuleResult<Expr> {
        let mut left = self.comparison()?;
        while self.eat(&Token::AndAnd) {
            let right = self.comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> RuleResult<Expr> {
        let left = self.concat()?;
        let op = match self.peek() {
            Token::Compare(op) => *op,
            Token::Word(w) => match CompareOp::from_word(w) {
                Some(op) => op,
                None => return Ok(left),
            },
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.concat()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn concat(&mut self) -> RuleResult<Expr> {
        let mut left = self.binding()?;
        while self.eat(&Token::Dot) {
            let right = self.binding()?;
            left = Expr::Concat(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn binding(&mut self) -> RuleResult<Expr> {
        let subject = self.unary()?;
        let negate = match self.peek() {
            Token::Match => false,
            Token::NotMatch => true,
            _ => return Ok(subject),
        };
        self.pos += 1;
        let Token::Regex { pattern, flags } = self.peek().clone() else {
            return Err(self.error("expected regular expression"));
        };
        self.pos += 1;
        let regex = RegexBuilder::new(&pattern)
            .case_insensitive(flags.contains('i'))
            .multi_line(flags.contains('m'))
            .dot_matches_new_line(flags.contains('s'))
            .ignore_whitespace(flags.contains('x'))
            .build()
            .map_err(|e| RuleError::Regex {
                pattern,
                message: e.to_string(),
            })?;
        Ok(Expr::Match {
            subject: Box::new(subject),
            regex,
            negate,
        })
    }

    fn unary(&mut self) -> RuleResult<Expr> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> RuleResult<Expr> {
        let token = self.peek().clone();
        self.pos += 1;
        match token {
            Token::Num(n) => Ok(Expr::Literal(Value::Num(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Template(t) => Ok(template(&t)),
            Token::Var(name) => Ok(Expr::Var(Var::from_name(&name))),
            Token::LParen => {
                let inner = self.low_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Word(name) => self.call(name),
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {}", describe(&other))))
            }
        }
    }

    fn call(&mut self, name: String) -> RuleResult<Expr> {
        if !self.eat(&Token::LParen) {
            self.pos -= 1;
            return Err(self.error(format!("bare word `{name}`")));
        }
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.low_or()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(&Token::Comma)?;
            }
        }
        let function = self.library.resolve(&name, args.len())?;
        Ok(Expr::Call {
            name,
            function,
            args,
        })
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |(t, _)| t)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Token::Word(w) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> RuleResult<()> {
        if self.eat(token) {
            return Ok(());
        }
        let found = describe(self.peek());
        Err(self.error(format!("expected {}, found {found}", describe(token))))
    }

    fn error(&self, message: impl Into<String>) -> RuleError {
        let position = self
            .tokens
            .get(self.pos)
            .map_or(self.src.len(), |(_, offset)| *offset);
        RuleError::syntax(self.src, position, message)
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Var(name) => format!("variable `${name}`"),
        Token::Word(w) => format!("`{w}`"),
        Token::Str(_) | Token::Template(_) => "string".to_string(),
        Token::Num(n) => format!("number `{n}`"),
        Token::Regex { .. } => "regular expression".to_string(),
        Token::LParen => "`(`".to_string(),
        Token::RParen => "`)`".to_string(),
        Token::Comma => "`,`".to_string(),
        Token::Dot => "`.`".to_string(),
        Token::Question => "`?`".to_string(),
        Token::Colon => "`:`".to_string(),
        Token::Bang => "`!`".to_string(),
        Token::Minus => "`-`".to_string(),
        Token::AndAnd => "`&&`".to_string(),
        Token::OrOr => "`||`".to_string(),
        Token::Compare(op) => format!("operator {op:?}"),
        Token::Match => "`=~`".to_string(),
        Token::NotMatch => "`!~`".to_string(),
        Token::Eof => "end of expression".to_string(),
    }
}

/// Split a double-quoted body into text and `$name` / `${name}` segments.
fn template(body: &str) -> Expr {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some(other) => text.push(other),
                None => text.push('\\'),
            },
            '$' => {
                let braced = chars.peek() == Some(&'{');
                if braced {
                    chars.next();
                }
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if braced && chars.peek() == Some(&'}') {
                    chars.next();
                }
                if name.is_empty() {
                    text.push('$');
                    continue;
                }
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Var(Var::from_name(&name)));
            }
            other => text.push(other),
        }
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    match segments.as_slice() {
        [] => Expr::Literal(Value::Str(String::new())),
        [Segment::Text(only)] => Expr::Literal(Value::Str(only.clone())),
        _ => Expr::Template(segments),
    }
}
