// term/src/grammar.rs - Operator-precedence reader for Prolog terms
//
// Operates on the lexeme stream from `lexer::tokenize`.
// Grammar (canonical text plus the standard operator table):
//
//   text      → term(1200) end?
//   term(P)   → primary(P) (infix_op term)*        (precedence climbing)
//   primary   → number | '-' number                (adjacent, prefix position)
//             | var | string | '(' term(1200) ')'
//             | '[' ']' | '[' args ('|' term(999))? ']'
//             | '{' '}' | '{' term(1200) '}'
//             | name '(' args ')'                   (name adjacent to '(')
//             | prefix_op term(P')
//             | name
//   args      → term(999) (',' term(999))*
//   name      → Name | Symbol | Quoted | '!' | ';' | '[]' | '{}'

use num_bigint::BigInt;
use num_traits::Num;

use crate::ast::Term;
use crate::lexer::{Lexeme, Token};

/// Maximum recursion depth to prevent stack overflow on pathological input.
pub const MAX_DEPTH: usize = 256;

/// Parse error with the offending fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    /// Source text at the point of failure (possibly truncated).
    pub fragment: String,
    /// Byte offset of `fragment` in the input.
    pub offset: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.fragment.is_empty() {
            write!(f, "parse error at offset {}: {}", self.offset, self.message)
        } else {
            write!(
                f,
                "parse error at offset {} near `{}`: {}",
                self.offset, self.fragment, self.message
            )
        }
    }
}

impl std::error::Error for ParseError {}

// ─── Operator table ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Infix {
    Xfx,
    Xfy,
    Yfx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefix {
    Fx,
    Fy,
}

fn infix_op(name: &str) -> Option<(u32, Infix)> {
    use Infix::*;
    let op = match name {
        ":-" | "-->" => (1200, Xfx),
        ";" | "|" => (1100, Xfy),
        "->" | "*->" => (1050, Xfy),
        "," => (1000, Xfy),
        "=" | "\\=" | "==" | "\\==" | "@<" | "@>" | "@=<" | "@>=" | "=.." | "is" | "=:="
        | "=\\=" | "<" | ">" | "=<" | ">=" | "as" => (700, Xfx),
        ":" => (200, Xfy),
        "+" | "-" | "/\\" | "\\/" | "xor" => (500, Yfx),
        "*" | "/" | "//" | "rem" | "mod" | "div" | "<<" | ">>" => (400, Yfx),
        "**" => (200, Xfx),
        "^" => (200, Xfy),
        _ => return None,
    };
    Some(op)
}

fn prefix_op(name: &str) -> Option<(u32, Prefix)> {
    use Prefix::*;
    let op = match name {
        ":-" | "?-" => (1200, Fx),
        "dynamic" | "discontiguous" | "initialization" | "multifile" | "table" => (1150, Fx),
        "\\+" => (900, Fy),
        "-" | "+" | "\\" => (200, Fy),
        _ => return None,
    };
    Some(op)
}

/// Operator-precedence parser over the token stream.
pub struct Parser<'a> {
    src: &'a str,
    tokens: &'a [Lexeme<'a>],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, tokens: &'a [Lexeme<'a>]) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse exactly one term, optionally followed by the end token.
    pub fn parse_text(&mut self) -> Result<Term, ParseError> {
        if self.at_end() {
            return Err(self.error("empty input"));
        }
        let (term, _) = self.parse(1200)?;
        if self.peek_token() == Some(Token::End) {
            self.pos += 1;
        }
        if !self.at_end() {
            return Err(self.error("operator expected"));
        }
        Ok(term)
    }

    // ─── Depth guard ──────────────────────────────────────────

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            Err(self.error("maximum nesting depth exceeded"))
        } else {
            Ok(())
        }
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ─── Token inspection ─────────────────────────────────────

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&'a Lexeme<'a>> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<Token> {
        self.peek().map(|l| l.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Lexeme<'a>> {
        self.tokens.get(self.pos + offset)
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ParseError> {
        if self.peek_token() == Some(token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", what)))
        }
    }

    fn error(&self, message: &str) -> ParseError {
        let offset = self
            .peek()
            .map(|l| l.span.start)
            .unwrap_or(self.src.len());
        let fragment: String = self.src[offset..].chars().take(24).collect();
        ParseError {
            message: message.to_string(),
            fragment,
            offset,
        }
    }

    /// Name of the infix operator at the cursor, if the token can be one.
    fn peek_infix(&self) -> Option<(&'a str, u32, Infix)> {
        let lexeme = self.peek()?;
        let name = match lexeme.token {
            Token::Symbol | Token::Name => lexeme.text,
            Token::Comma => ",",
            Token::Bar => "|",
            Token::Semicolon => ";",
            _ => return None,
        };
        let (prec, assoc) = infix_op(name)?;
        Some((name, prec, assoc))
    }

    /// Can the token at the cursor begin a term?
    fn starts_term(&self) -> bool {
        let Some(lexeme) = self.peek() else {
            return false;
        };
        match lexeme.token {
            Token::Close
            | Token::CloseList
            | Token::CloseCurly
            | Token::Comma
            | Token::Bar
            | Token::End => false,
            // `- = x`: an infix-only symbol means the prefix op is an atom
            Token::Symbol | Token::Name => {
                infix_op(lexeme.text).is_none()
                    || prefix_op(lexeme.text).is_some()
                    || self
                        .peek_at(1)
                        .is_some_and(|next| next.token == Token::Open && lexeme.touches(next))
            }
            _ => true,
        }
    }

    // ─── Terms ────────────────────────────────────────────────

    /// Parse a term of precedence at most `max`. Returns the term and its
    /// actual precedence.
    fn parse(&mut self, max: u32) -> Result<(Term, u32), ParseError> {
        self.enter()?;
        let result = self.parse_inner(max);
        self.leave();
        result
    }

    fn parse_inner(&mut self, max: u32) -> Result<(Term, u32), ParseError> {
        let (mut left, mut left_prec) = self.parse_primary(max)?;
        while let Some((name, prec, assoc)) = self.peek_infix() {
            let (left_max, right_max) = match assoc {
                Infix::Xfx => (prec - 1, prec - 1),
                Infix::Xfy => (prec - 1, prec),
                Infix::Yfx => (prec, prec - 1),
            };
            if prec > max || left_prec > left_max {
                break;
            }
            self.pos += 1;
            let (right, _) = self.parse(right_max)?;
            let functor = if name == "|" { ";" } else { name };
            left = Term::compound(functor, vec![left, right]);
            left_prec = prec;
        }
        Ok((left, left_prec))
    }

    fn parse_primary(&mut self, max: u32) -> Result<(Term, u32), ParseError> {
        let Some(lexeme) = self.peek() else {
            return Err(self.error("unexpected end of input"));
        };
        match lexeme.token {
            Token::Int | Token::Hex | Token::Oct | Token::Bin | Token::CharCode | Token::Float => {
                self.pos += 1;
                Ok((self.number(lexeme)?, 0))
            }
            Token::Var => {
                self.pos += 1;
                Ok((Term::var(lexeme.text), 0))
            }
            Token::Str => {
                self.pos += 1;
                let body = &lexeme.text[1..lexeme.text.len() - 1];
                let text = unescape(body, '"').map_err(|m| self.error_at(lexeme, &m))?;
                Ok((Term::String(text), 0))
            }
            Token::Open => {
                self.pos += 1;
                let (inner, _) = self.parse(1200)?;
                self.expect(Token::Close, "`)`")?;
                Ok((inner, 0))
            }
            Token::OpenList => {
                if self.peek_at(1).map(|l| l.token) == Some(Token::CloseList) {
                    self.pos += 2;
                    return Ok((Term::List(Vec::new()), 0));
                }
                self.pos += 1;
                Ok((self.list()?, 0))
            }
            Token::OpenCurly => {
                if let Some(close) = self.peek_at(1).filter(|l| l.token == Token::CloseCurly) {
                    self.pos += 2;
                    return self.name_term("{}", close, false, max);
                }
                self.pos += 1;
                let (inner, _) = self.parse(1200)?;
                self.expect(Token::CloseCurly, "`}`")?;
                Ok((Term::compound("{}", vec![inner]), 0))
            }
            Token::Name | Token::Symbol | Token::Cut | Token::Semicolon => {
                self.pos += 1;
                self.name_term(lexeme.text, lexeme, false, max)
            }
            Token::Quoted => {
                self.pos += 1;
                let body = &lexeme.text[1..lexeme.text.len() - 1];
                let name = unescape(body, '\'').map_err(|m| self.error_at(lexeme, &m))?;
                self.name_term(&name, lexeme, true, max)
            }
            Token::Comma | Token::Bar => Err(self.error("unexpected separator")),
            Token::Close | Token::CloseList | Token::CloseCurly => {
                Err(self.error("unexpected closing bracket"))
            }
            Token::End => Err(self.error("unexpected end of clause")),
        }
    }

    /// An atom that may be a functor, a prefix operator, or the sign of a
    /// negative literal. `last` is the lexeme the name ended on.
    fn name_term(
        &mut self,
        name: &str,
        last: &Lexeme<'a>,
        quoted: bool,
        max: u32,
    ) -> Result<(Term, u32), ParseError> {
        let next = self.peek();

        if next.is_some_and(|n| n.token == Token::Open && last.touches(n)) {
            self.pos += 1;
            let args = self.arguments(Token::Close, "`)`")?;
            return Ok((Term::compound(name, args), 0));
        }

        if quoted {
            return Ok((Term::atom(name), 0));
        }

        if name == "-" {
            if let Some(num) = next.filter(|n| is_number(n.token) && last.touches(n)) {
                self.pos += 1;
                return Ok((negate(self.number(num)?), 0));
            }
        }

        if let Some((prec, assoc)) = prefix_op(name) {
            if self.starts_term() {
                let prec = if prec > max { 999.min(max) } else { prec };
                let arg_max = match assoc {
                    Prefix::Fy => prec,
                    Prefix::Fx => prec - 1,
                };
                let (arg, _) = self.parse(arg_max)?;
                return Ok((Term::compound(name, vec![arg]), prec));
            }
        }

        Ok((Term::atom(name), 0))
    }

    fn arguments(&mut self, close: Token, what: &str) -> Result<Vec<Term>, ParseError> {
        let mut args = Vec::new();
        loop {
            let (arg, _) = self.parse(999)?;
            args.push(arg);
            if self.peek_token() == Some(Token::Comma) {
                self.pos += 1;
                continue;
            }
            self.expect(close, what)?;
            return Ok(args);
        }
    }

    fn list(&mut self) -> Result<Term, ParseError> {
        let mut items = Vec::new();
        loop {
            let (item, _) = self.parse(999)?;
            items.push(item);
            match self.peek_token() {
                Some(Token::Comma) => {
                    self.pos += 1;
                }
                Some(Token::Bar) => {
                    self.pos += 1;
                    let (tail, _) = self.parse(999)?;
                    self.expect(Token::CloseList, "`]`")?;
                    return Ok(Term::partial_list(items, tail));
                }
                _ => {
                    self.expect(Token::CloseList, "`]`")?;
                    return Ok(Term::List(items));
                }
            }
        }
    }

    // ─── Literals ─────────────────────────────────────────────

    fn number(&self, lexeme: &Lexeme<'_>) -> Result<Term, ParseError> {
        let text = lexeme.text;
        let term = match lexeme.token {
            Token::Int => integer(text, 10),
            Token::Hex => integer(&text[2..], 16),
            Token::Oct => integer(&text[2..], 8),
            Token::Bin => integer(&text[2..], 2),
            Token::CharCode => char_code(&text[2..]).map(|c| Term::Integer(c as i64)),
            Token::Float => text.parse::<f64>().ok().map(Term::Float),
            _ => None,
        };
        term.ok_or_else(|| self.error_at(lexeme, "invalid number"))
    }

    fn error_at(&self, lexeme: &Lexeme<'_>, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            fragment: lexeme.text.chars().take(24).collect(),
            offset: lexeme.span.start,
        }
    }
}

fn is_number(token: Token) -> bool {
    matches!(
        token,
        Token::Int | Token::Hex | Token::Oct | Token::Bin | Token::CharCode | Token::Float
    )
}

fn integer(digits: &str, radix: u32) -> Option<Term> {
    match i64::from_str_radix(digits, radix) {
        Ok(i) => Some(Term::Integer(i)),
        Err(_) => BigInt::from_str_radix(digits, radix)
            .ok()
            .map(Term::from_bigint),
    }
}

fn negate(term: Term) -> Term {
    match term {
        Term::Integer(i) => match i.checked_neg() {
            Some(n) => Term::Integer(n),
            None => Term::BigInt(-BigInt::from(i)),
        },
        Term::BigInt(n) => Term::from_bigint(-n),
        Term::Float(f) => Term::Float(-f),
        other => other,
    }
}

fn char_code(body: &str) -> Option<u32> {
    if body == "''" {
        return Some('\'' as u32);
    }
    let text = unescape(body, '\'').ok()?;
    let mut chars = text.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    Some(c as u32)
}

/// Resolve ISO escapes and doubled quotes inside a quoted item's body.
pub(crate) fn unescape(body: &str, quote: char) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c == quote {
            // doubled quote
            chars.next();
            out.push(quote);
            continue;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(e) = chars.next() else {
            return Err("dangling escape".to_string());
        };
        match e {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            'e' => out.push('\x1b'),
            's' => out.push(' '),
            '0' => {
                if chars.peek().is_some_and(|c| c.is_digit(8) || *c == '\\') {
                    out.push(numeric_escape(&mut chars, 8, Some('0'))?);
                } else {
                    out.push('\0');
                }
            }
            '1'..='7' => out.push(numeric_escape(&mut chars, 8, Some(e))?),
            'x' => out.push(numeric_escape(&mut chars, 16, None)?),
            '\n' => {}
            '\\' | '\'' | '"' | '`' => out.push(e),
            other => return Err(format!("undefined escape sequence `\\{}`", other)),
        }
    }
    Ok(out)
}

fn numeric_escape(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    radix: u32,
    first: Option<char>,
) -> Result<char, String> {
    let mut digits = String::new();
    digits.extend(first);
    while let Some(&c) = chars.peek() {
        if c.is_digit(radix) {
            digits.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if chars.peek() == Some(&'\\') {
        chars.next();
    }
    u32::from_str_radix(&digits, radix)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| format!("invalid character code `{}`", digits))
}
