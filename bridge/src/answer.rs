//! Decoding of the guest's per-step output.
//!
//! After every step the captured stdout has the shape
//!
//! ```text
//! <noise> STX <program output> ETX <answer term> .\n
//! ```
//!
//! where the answer term is `success(Bindings, Residuals)`, `failure`,
//! `exception(Ball)` or `exception(Ball, Bindings)`.

use std::collections::BTreeMap;

use wasmpl_term::{decode, ParseError, Term, Variable};

use crate::error::{Error, Result};

const STX: char = '\u{2}';
const ETX: char = '\u{3}';

/// Variable name → bound value for one solution.
pub type Substitution = BTreeMap<String, Term>;

/// One solution of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// Goal text as the caller wrote it.
    pub query: String,
    pub solution: Substitution,
    /// Program output produced while computing this solution.
    pub stdout: String,
    pub stderr: String,
}

impl Answer {
    /// Binding for `name`, if the solution has one.
    pub fn get(&self, name: &str) -> Option<&Term> {
        self.solution.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Success(Substitution),
    Failure,
    Exception { ball: Term, bindings: Substitution },
}

/// Split captured stdout into program output and answer text.
pub(crate) fn split_frame(stdout: &str) -> Result<(String, &str)> {
    let Some(etx) = stdout.rfind(ETX) else {
        return Err(frame_error("missing ETX in guest output", stdout, stdout.len()));
    };
    let (before, after) = (&stdout[..etx], &stdout[etx + ETX.len_utf8()..]);
    let output = match before.find(STX) {
        Some(stx) => {
            let mut text = before[..stx].to_string();
            text.push_str(&before[stx + STX.len_utf8()..]);
            text
        }
        None => before.to_string(),
    };
    Ok((output, after.trim_end()))
}

pub(crate) fn decode_outcome(text: &str) -> Result<Outcome> {
    let term = decode(text)?;
    if term.is_functor("failure", 0) {
        return Ok(Outcome::Failure);
    }
    if term.is_functor("success", 2) {
        let args = term.args();
        let residuals = list_items(&args[1], text)?;
        let solution = substitution(&args[0], text, residuals)?;
        return Ok(Outcome::Success(solution));
    }
    if term.is_functor("exception", 1) {
        return Ok(Outcome::Exception {
            ball: term.args()[0].clone(),
            bindings: Substitution::new(),
        });
    }
    if term.is_functor("exception", 2) {
        let args = term.args();
        return Ok(Outcome::Exception {
            ball: args[0].clone(),
            bindings: substitution(&args[1], text, &[])?,
        });
    }
    Err(frame_error("unknown answer shape", text, 0))
}

fn list_items<'t>(term: &'t Term, text: &str) -> Result<&'t [Term]> {
    match term {
        Term::List(items) => Ok(items),
        _ => Err(frame_error("expected a list in answer", text, 0)),
    }
}

/// Copy `term`, giving every variable in it the residual goals that
/// mention it.
fn attach_residuals(term: &Term, residuals: &[Term]) -> Term {
    match term {
        Term::Variable(v) => {
            let attrs: Vec<Term> = residuals
                .iter()
                .filter(|goal| goal.mentions_variable(&v.name))
                .cloned()
                .collect();
            Term::Variable(Variable::with_attrs(v.name.clone(), attrs))
        }
        Term::Compound(c) => c
            .functor
            .of(c.args.iter().map(|t| attach_residuals(t, residuals)).collect()),
        Term::List(items) => {
            Term::List(items.iter().map(|t| attach_residuals(t, residuals)).collect())
        }
        Term::PartialList(items, tail) => Term::PartialList(
            items.iter().map(|t| attach_residuals(t, residuals)).collect(),
            Box::new(attach_residuals(tail, residuals)),
        ),
        other => other.clone(),
    }
}

/// Build the substitution from `['Name' = Value, ...]`, attaching to each
/// unbound variable, at any depth, every residual goal that mentions it.
fn substitution(bindings: &Term, text: &str, residuals: &[Term]) -> Result<Substitution> {
    let mut solution = Substitution::new();
    for binding in list_items(bindings, text)? {
        if !binding.is_functor("=", 2) {
            return Err(frame_error("expected Name = Value binding", text, 0));
        }
        let args = binding.args();
        let Some(name) = args[0].as_atom() else {
            return Err(frame_error("binding name is not an atom", text, 0));
        };
        let value = if residuals.is_empty() {
            args[1].clone()
        } else {
            attach_residuals(&args[1], residuals)
        };
        solution.insert(name.as_str().to_string(), value);
    }
    Ok(solution)
}

fn frame_error(message: &str, text: &str, offset: usize) -> Error {
    Error::Decode(ParseError {
        message: message.to_string(),
        fragment: text.chars().take(24).collect(),
        offset,
    })
}
