//! Prolog term model.
//!
//! Terms decoded from the guest are host-owned copies: nothing here borrows
//! guest memory, and every value is `Send + Sync`. Compounds and lists own
//! their arguments outright.
//!
//! Covers the value kinds the engine reports:
//!   - atoms (interned), native and big integers, floats, strings
//!   - compounds with a non-empty argument list
//!   - proper lists and partial lists (`[a, b | T]`)
//!   - variables, optionally carrying residual goals as attributes

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::atom::Atom;

/// A Prolog value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Term {
    Atom(Atom),
    Integer(i64),
    /// Integer outside the `i64` range. Use [`Term::from_bigint`] to keep
    /// small values in [`Term::Integer`].
    #[serde(with = "bigint_text")]
    BigInt(BigInt),
    Float(f64),
    String(String),
    Compound(Compound),
    List(Vec<Term>),
    /// List whose tail is not `[]`: the items and the tail.
    PartialList(Vec<Term>, Box<Term>),
    Variable(Variable),
}

/// `functor(args...)`. Args is never empty; an empty compound is an atom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compound {
    pub functor: Atom,
    pub args: Vec<Term>,
}

/// An unbound variable. `attrs` holds residual goals that constrain it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<Term>,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Variable {
            name: name.into(),
            attrs: Vec::new(),
        }
    }

    pub fn with_attrs(name: impl Into<String>, attrs: Vec<Term>) -> Self {
        Variable {
            name: name.into(),
            attrs,
        }
    }
}

impl Compound {
    /// `Name/Arity` as a term, the shape used in error contexts.
    pub fn indicator(&self) -> Term {
        indicator(self.functor, self.args.len())
    }
}

/// Build `Name/Arity`.
pub fn indicator(name: Atom, arity: usize) -> Term {
    Term::compound(
        "/",
        vec![Term::Atom(name), Term::Integer(arity as i64)],
    )
}

impl Term {
    pub fn atom(name: &str) -> Term {
        Term::Atom(Atom::new(name))
    }

    /// `name(args...)`, or the atom `name` when `args` is empty.
    pub fn compound(name: &str, args: Vec<Term>) -> Term {
        Atom::new(name).of(args)
    }

    pub fn var(name: impl Into<String>) -> Term {
        Term::Variable(Variable::new(name))
    }

    pub fn string(text: impl Into<String>) -> Term {
        Term::String(text.into())
    }

    /// Normalizing constructor: values that fit `i64` become [`Term::Integer`].
    pub fn from_bigint(n: BigInt) -> Term {
        match n.to_i64() {
            Some(i) => Term::Integer(i),
            None => Term::BigInt(n),
        }
    }

    /// Items plus tail, normalized: a `[]` tail yields a proper list and a
    /// list tail is flattened into the items.
    pub fn partial_list(mut items: Vec<Term>, tail: Term) -> Term {
        match tail {
            Term::List(rest) => {
                items.extend(rest);
                Term::List(items)
            }
            Term::PartialList(rest, tail) => {
                items.extend(rest);
                if items.is_empty() {
                    *tail
                } else {
                    Term::PartialList(items, tail)
                }
            }
            tail if items.is_empty() => tail,
            tail => Term::PartialList(items, Box::new(tail)),
        }
    }

    // ─── Inspection ──────────────────────────────────────────

    /// Principal functor name for atoms and compounds.
    pub fn name(&self) -> Option<Atom> {
        match self {
            Term::Atom(a) => Some(*a),
            Term::Compound(c) => Some(c.functor),
            _ => None,
        }
    }

    /// Number of arguments for callable terms; `None` otherwise.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Term::Atom(_) => Some(0),
            Term::Compound(c) => Some(c.args.len()),
            _ => None,
        }
    }

    /// Arguments of a compound; empty for everything else.
    pub fn args(&self) -> &[Term] {
        match self {
            Term::Compound(c) => &c.args,
            _ => &[],
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Term::Atom(_) | Term::Compound(_))
    }

    /// `true` when this is the compound `name(_, ...)` with `arity` arguments
    /// (or the atom `name` for arity 0).
    pub fn is_functor(&self, name: &str, arity: usize) -> bool {
        match self {
            Term::Atom(a) => arity == 0 && a.as_str() == name,
            Term::Compound(c) => c.args.len() == arity && c.functor.as_str() == name,
            _ => false,
        }
    }

    pub fn as_atom(&self) -> Option<Atom> {
        match self {
            Term::Atom(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Term::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Term::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Text of a string term.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Term::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Term::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Does the variable `name` occur anywhere inside this term?
    pub fn mentions_variable(&self, name: &str) -> bool {
        match self {
            Term::Variable(v) => v.name == name,
            Term::Compound(c) => c.args.iter().any(|a| a.mentions_variable(name)),
            Term::List(items) => items.iter().any(|a| a.mentions_variable(name)),
            Term::PartialList(items, tail) => {
                items.iter().any(|a| a.mentions_variable(name)) || tail.mentions_variable(name)
            }
            _ => false,
        }
    }
}

// ─── Conversions ─────────────────────────────────────────────

impl From<Atom> for Term {
    fn from(a: Atom) -> Self {
        Term::Atom(a)
    }
}

impl From<i64> for Term {
    fn from(i: i64) -> Self {
        Term::Integer(i)
    }
}

impl From<i32> for Term {
    fn from(i: i32) -> Self {
        Term::Integer(i as i64)
    }
}

impl From<f64> for Term {
    fn from(f: f64) -> Self {
        Term::Float(f)
    }
}

impl From<BigInt> for Term {
    fn from(n: BigInt) -> Self {
        Term::from_bigint(n)
    }
}

/// Rust strings map to Prolog strings, not atoms.
impl From<String> for Term {
    fn from(s: String) -> Self {
        Term::String(s)
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::String(s.to_owned())
    }
}

impl From<Compound> for Term {
    fn from(c: Compound) -> Self {
        Term::Compound(c)
    }
}

impl From<Variable> for Term {
    fn from(v: Variable) -> Self {
        Term::Variable(v)
    }
}

impl<T: Into<Term>> From<Vec<T>> for Term {
    fn from(items: Vec<T>) -> Self {
        Term::List(items.into_iter().map(Into::into).collect())
    }
}

/// Big integers travel through serde as decimal text.
mod bigint_text {
    use num_bigint::BigInt;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(n: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(n)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse::<BigInt>().map_err(D::Error::custom)
    }
}
