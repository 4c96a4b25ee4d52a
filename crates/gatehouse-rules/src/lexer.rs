//! Tokenizer for rule and header expressions.

use crate::error::{RuleError, RuleResult};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `eq`
    StrEq,
    /// `ne`
    StrNe,
    /// `lt`
    StrLt,
    /// `gt`
    StrGt,
    /// `le`
    StrLe,
    /// `ge`
    StrGe,
    /// `==`
    NumEq,
    /// `!=`
    NumNe,
    /// `<`
    NumLt,
    /// `>`
    NumGt,
    /// `<=`
    NumLe,
    /// `>=`
    NumGe,
}

impl CompareOp {
    /// Map a word operator (`eq`, `ne`, ...) to its comparison.
    pub fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "eq" => Self::StrEq,
            "ne" => Self::StrNe,
            "lt" => Self::StrLt,
            "gt" => Self::StrGt,
            "le" => Self::StrLe,
            "ge" => Self::StrGe,
            _ => return None,
        })
    }
}

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `$name` or `${name}`
    Var(String),
    /// Bare word: function name or word operator.
    Word(String),
    /// Single-quoted literal.
    Str(String),
    /// Double-quoted literal, still carrying `$name` references.
    Template(String),
    /// Numeric literal.
    Num(f64),
    /// `/pattern/flags` after a match operator.
    Regex {
        /// Pattern body.
        pattern: String,
        /// Trailing flags.
        flags: String,
    },
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `?`
    Question,
    /// `:`
    Colon,
    /// `!`
    Bang,
    /// `-`
    Minus,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// Symbolic comparison.
    Compare(CompareOp),
    /// `=~`
    Match,
    /// `!~`
    NotMatch,
    /// End of input.
    Eof,
}

/// Token plus its byte offset in the source.
pub type Spanned = (Token, usize);

/// Split an expression into tokens.
pub fn tokenize(src: &str) -> RuleResult<Vec<Spanned>> {
    Lexer {
        src,
        chars: src.char_indices().collect(),
        pos: 0,
    }
    .run()
}

struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl Lexer<'_> {
    fn run(mut self) -> RuleResult<Vec<Spanned>> {
        let mut tokens = Vec::new();
        let mut expect_regex = false;
        loop {
            self.skip_whitespace();
            let offset = self.offset();
            let Some(c) = self.peek() else {
                tokens.push((Token::Eof, offset));
                return Ok(tokens);
            };
            let token = if expect_regex && (c == '/' || c == 'm') {
                self.regex()?
            } else {
                self.token(c)?
            };
            expect_regex = matches!(token, Token::Match | Token::NotMatch);
            tokens.push((token, offset));
        }
    }

    fn token(&mut self, c: char) -> RuleResult<Token> {
        let offset = self.offset();
        let token = match c {
            '$' => return self.variable(),
            '\'' => return self.single_quoted(),
            '"' => return self.double_quoted(),
            '0'..='9' => return self.number(),
            c if c.is_ascii_alphabetic() || c == '_' => return Ok(Token::Word(self.word())),
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '?' => Token::Question,
            ':' => Token::Colon,
            '-' => Token::Minus,
            '&' if self.peek_at(1) == Some('&') => {
                self.pos += 1;
                Token::AndAnd
            }
            '|' if self.peek_at(1) == Some('|') => {
                self.pos += 1;
                Token::OrOr
            }
            '=' if self.peek_at(1) == Some('=') => {
                self.pos += 1;
                Token::Compare(CompareOp::NumEq)
            }
            '=' if self.peek_at(1) == Some('~') => {
                self.pos += 1;
                Token::Match
            }
            '!' if self.peek_at(1) == Some('=') => {
                self.pos += 1;
                Token::Compare(CompareOp::NumNe)
            }
            '!' if self.peek_at(1) == Some('~') => {
                self.pos += 1;
                Token::NotMatch
            }
            '!' => Token::Bang,
            '<' if self.peek_at(1) == Some('=') => {
                self.pos += 1;
                Token::Compare(CompareOp::NumLe)
            }
            '>' if self.peek_at(1) == Some('=') => {
                self.pos += 1;
                Token::Compare(CompareOp::NumGe)
            }
            '<' => Token::Compare(CompareOp::NumLt),
            '>' => Token::Compare(CompareOp::NumGt),
            other => {
                return Err(RuleError::syntax(
                    self.src,
                    offset,
                    format!("unexpected character `{other}`"),
                ))
            }
        };
        self.pos += 1;
        Ok(token)
    }

    fn variable(&mut self) -> RuleResult<Token> {
        let offset = self.offset();
        self.pos += 1;
        if self.peek() == Some('{') {
            self.pos += 1;
            let name = self.word();
            if name.is_empty() || self.peek() != Some('}') {
                return Err(RuleError::syntax(self.src, offset, "malformed `${...}` variable"));
            }
            self.pos += 1;
            return Ok(Token::Var(name));
        }
        let name = self.word();
        if name.is_empty() {
            return Err(RuleError::syntax(self.src, offset, "`$` must be followed by a name"));
        }
        Ok(Token::Var(name))
    }

    fn single_quoted(&mut self) -> RuleResult<Token> {
        let offset = self.offset();
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' if matches!(self.peek(), Some('\'' | '\\')) => {
                    out.push(self.peek().unwrap_or('\\'));
                    self.pos += 1;
                }
                '\'' => return Ok(Token::Str(out)),
                c => out.push(c),
            }
        }
        Err(RuleError::syntax(self.src, offset, "unterminated string"))
    }

    // Escapes are kept so that template parsing can tell `\$` from `$`.
    fn double_quoted(&mut self) -> RuleResult<Token> {
        let offset = self.offset();
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    out.push('\\');
                    if let Some(next) = self.peek() {
                        out.push(next);
                        self.pos += 1;
                    }
                }
                '"' => return Ok(Token::Template(out)),
                c => out.push(c),
            }
        }
        Err(RuleError::syntax(self.src, offset, "unterminated string"))
    }

    fn number(&mut self) -> RuleResult<Token> {
        let offset = self.offset();
        let start = self.pos;
        while matches!(self.peek(), Some('0'..='9')) {
            self.pos += 1;
        }
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some('0'..='9')) {
            self.pos += 1;
            while matches!(self.peek(), Some('0'..='9')) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().map(|(_, c)| *c).collect();
        text.parse()
            .map(Token::Num)
            .map_err(|_| RuleError::syntax(self.src, offset, format!("invalid number `{text}`")))
    }

    fn regex(&mut self) -> RuleResult<Token> {
        let offset = self.offset();
        if self.peek() == Some('m') {
            self.pos += 1;
        }
        let Some(open) = self.peek() else {
            return Err(RuleError::syntax(self.src, offset, "expected regular expression"));
        };
        let close = match open {
            '/' => '/',
            '{' => '}',
            '(' => ')',
            '!' => '!',
            '#' => '#',
            _ => return Err(RuleError::syntax(self.src, offset, "expected regular expression")),
        };
        self.pos += 1;
        let mut pattern = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(RuleError::syntax(self.src, offset, "unterminated regular expression"));
            };
            self.pos += 1;
            if c == '\\' && self.peek() == Some(close) {
                pattern.push(close);
                self.pos += 1;
            } else if c == '\\' {
                pattern.push('\\');
                if let Some(next) = self.peek() {
                    pattern.push(next);
                    self.pos += 1;
                }
            } else if c == close {
                break;
            } else {
                pattern.push(c);
            }
        }
        let mut flags = String::new();
        while let Some(c @ ('i' | 'm' | 's' | 'x')) = self.peek() {
            flags.push(c);
            self.pos += 1;
        }
        Ok(Token::Regex { pattern, flags })
    }

    // Words may contain `::` so that namespaced custom functions resolve.
    fn word(&mut self) -> String {
        let mut out = String::new();
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_alphanumeric() || c == '_' => {
                    out.push(c);
                    self.pos += 1;
                }
                Some(':') if self.peek_at(1) == Some(':') && !out.is_empty() => {
                    out.push_str("::");
                    self.pos += 2;
                }
                _ => return out,
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map_or(self.src.len(), |(i, _)| *i)
    }
}
