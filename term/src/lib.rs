// term/src/lib.rs
//
// Prolog term model and canonical text codec. Pipeline:
//   1. Lex (Logos DFA, end-token reclassification)
//   2. Parse (operator precedence, depth-guarded)
//   3. Write (canonical functional notation)
//
// Host code and guest engine exchange terms as text; this crate is the only
// place that text is produced or read.

pub mod ast;
pub mod atom;
pub mod grammar;
pub mod lexer;
pub mod writer;

pub use ast::{indicator, Compound, Term, Variable};
pub use atom::Atom;
pub use grammar::ParseError;
pub use writer::{encode, EncodeError};

/// Decode one term from canonical (or operator) text. A trailing end token
/// (`.` followed by layout or end of input) is accepted.
pub fn decode(text: &str) -> Result<Term, ParseError> {
    let tokens = lexer::tokenize(text).map_err(|e| ParseError {
        message: "unrecognized character sequence".to_string(),
        fragment: e.fragment.chars().take(24).collect(),
        offset: e.offset,
    })?;
    grammar::Parser::new(text, &tokens).parse_text()
}

impl std::str::FromStr for Term {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}
