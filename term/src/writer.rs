//! Canonical term writer.
//!
//! Output is plain functional notation that any ISO reader accepts without
//! consulting an operator table: `=(a,b)`, `[a,b|T]`, `"text"`, `1.0e100`.

use std::fmt::{self, Write};

use crate::ast::{Term, Variable};
use crate::atom::Atom;
use crate::lexer::{is_single, Token};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("cannot encode non-finite float {0}")]
    NonFiniteFloat(f64),
    #[error("{0:?} is not a variable name")]
    InvalidVariableName(String),
}

/// Encode a term as canonical text. Fails on NaN or infinite floats, which
/// have no portable spelling, and on variables whose name would not read
/// back as a variable.
pub fn encode(term: &Term) -> Result<String, EncodeError> {
    check_encodable(term)?;
    Ok(term.to_string())
}

fn check_encodable(term: &Term) -> Result<(), EncodeError> {
    match term {
        Term::Float(f) if !f.is_finite() => Err(EncodeError::NonFiniteFloat(*f)),
        Term::Compound(c) => c.args.iter().try_for_each(check_encodable),
        Term::List(items) => items.iter().try_for_each(check_encodable),
        Term::PartialList(items, tail) => {
            items.iter().try_for_each(check_encodable)?;
            check_encodable(tail)
        }
        Term::Variable(v) if !is_variable_name(&v.name) => {
            Err(EncodeError::InvalidVariableName(v.name.clone()))
        }
        Term::Variable(v) => v.attrs.iter().try_for_each(check_encodable),
        _ => Ok(()),
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom(a) => write_atom(f, a.as_str()),
            Term::Integer(i) => write!(f, "{}", i),
            Term::BigInt(n) => write!(f, "{}", n),
            Term::Float(x) => write_float(f, *x),
            Term::String(s) => write_quoted(f, s, '"'),
            Term::Compound(c) => {
                write_atom(f, c.functor.as_str())?;
                f.write_char('(')?;
                write_items(f, &c.args)?;
                f.write_char(')')
            }
            Term::List(items) => {
                f.write_char('[')?;
                write_items(f, items)?;
                f.write_char(']')
            }
            Term::PartialList(items, tail) => {
                f.write_char('[')?;
                write_items(f, items)?;
                write!(f, "|{}]", tail)
            }
            Term::Variable(v) => write_variable(f, v),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_atom(f, self.as_str())
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Term]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_char(',')?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if !x.is_finite() {
        // No canonical spelling; best effort for display only.
        return if x.is_nan() {
            f.write_str("nan")
        } else if x > 0.0 {
            f.write_str("inf")
        } else {
            f.write_str("-inf")
        };
    }
    // Debug gives the shortest round-tripping form ("4.2", "1e100", "1e-7").
    let text = format!("{:?}", x);
    match text.find(['e', 'E']) {
        Some(e) if !text[..e].contains('.') => {
            write!(f, "{}.0{}", &text[..e], &text[e..])
        }
        Some(_) => f.write_str(&text),
        None if text.contains('.') => f.write_str(&text),
        None => write!(f, "{}.0", text),
    }
}

/// Display only: `encode` refuses names that are not variables.
fn write_variable(f: &mut fmt::Formatter<'_>, v: &Variable) -> fmt::Result {
    if is_variable_name(&v.name) {
        return f.write_str(&v.name);
    }
    f.write_char('_')?;
    for c in v.name.chars() {
        if c.is_alphanumeric() || c == '_' {
            f.write_char(c)?;
        } else {
            f.write_char('_')?;
        }
    }
    Ok(())
}

fn is_variable_name(name: &str) -> bool {
    is_single(name, Token::Var)
}

// ─── Atom quoting ────────────────────────────────────────────────

const SYMBOL_CHARS: &str = "+-*/\\^<>=~:.?@#&$";

/// Does `name` need quotes to read back as the same atom?
pub fn atom_needs_quotes(name: &str) -> bool {
    if name.is_empty() {
        return true;
    }
    if is_single(name, Token::Name) {
        return false;
    }
    if matches!(name, "!" | ";" | "{}") {
        return false;
    }
    if name.chars().all(|c| SYMBOL_CHARS.contains(c)) {
        // a lone dot reads as an end token; `/*` would open a comment
        return name == "." || name.starts_with("/*");
    }
    true
}

fn write_atom(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if atom_needs_quotes(name) {
        write_quoted(f, name, '\'')
    } else {
        f.write_str(name)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str, quote: char) -> fmt::Result {
    f.write_char(quote)?;
    for c in text.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c if c.is_control() => write!(f, "\\x{:x}\\", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}
