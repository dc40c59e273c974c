use logos::Logos;
use std::ops::Range;

#[derive(Logos, Debug, PartialEq, Eq, Clone, Copy)]
#[logos(skip r"[ \t\r\n\f]+")] // Layout is skipped; adjacency is recovered from spans
pub enum Token {
    // --------------------------------------------------
    // Names and variables
    // --------------------------------------------------
    #[regex(r"[_\p{Lu}][_\p{L}\p{N}]*")]
    Var,

    #[regex(r"[\p{Ll}\p{Lo}][_\p{L}\p{N}]*")]
    Name,

    // Symbol-char atoms: =, :-, \+, =.., etc.
    #[regex(r"[+\-*/\\^<>=~:.?@#&$]+")]
    Symbol,

    #[regex(r"'(?:[^'\\]|''|\\(?:x[0-9a-fA-F]+\\|[0-7]+\\|[^x0-7]))*'")]
    Quoted,

    #[regex(r#""(?:[^"\\]|""|\\(?:x[0-9a-fA-F]+\\|[0-7]+\\|[^x0-7]))*""#)]
    Str,

    // --------------------------------------------------
    // Numbers
    // --------------------------------------------------
    #[regex(r"[0-9]+")]
    Int,

    #[regex(r"0x[0-9a-fA-F]+")]
    Hex,

    #[regex(r"0o[0-7]+")]
    Oct,

    #[regex(r"0b[01]+")]
    Bin,

    #[regex(r"0'(?:\\(?:x[0-9a-fA-F]+\\|[0-7]+\\|[^x0-7])|''|[^\\'])")]
    CharCode,

    #[regex(r"[0-9]+\.[0-9]+(?:[eE][+-]?[0-9]+)?")]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+")]
    Float,

    // --------------------------------------------------
    // Punctuation and solo atoms
    // --------------------------------------------------
    #[token("(")]
    Open,

    #[token(")")]
    Close,

    #[token("[")]
    OpenList,

    #[token("]")]
    CloseList,

    #[token("{")]
    OpenCurly,

    #[token("}")]
    CloseCurly,

    #[token(",")]
    Comma,

    #[token("|")]
    Bar,

    #[token("!")]
    Cut,

    #[token(";")]
    Semicolon,

    // End token: `.` followed by layout. A bare `.` at end of input is
    // lexed as a Symbol and reclassified below.
    #[regex(r"\.[ \t\r\n\f]")]
    End,
}

/// A token with its source text and byte span.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme<'a> {
    pub token: Token,
    pub text: &'a str,
    pub span: Range<usize>,
}

impl Lexeme<'_> {
    /// True when `next` starts exactly where this lexeme ends (no layout between).
    pub fn touches(&self, next: &Lexeme<'_>) -> bool {
        self.span.end == next.span.start
    }
}

/// Byte offset and text of input the DFA could not match.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError<'a> {
    pub offset: usize,
    pub fragment: &'a str,
}

pub fn tokenize(input: &str) -> Result<Vec<Lexeme<'_>>, LexError<'_>> {
    let mut lex = Token::lexer(input);
    let mut tokens = Vec::new();
    while let Some(result) = lex.next() {
        match result {
            Ok(token) => tokens.push(Lexeme {
                token,
                text: lex.slice(),
                span: lex.span(),
            }),
            Err(()) => {
                return Err(LexError {
                    offset: lex.span().start,
                    fragment: lex.slice(),
                })
            }
        }
    }
    reclassify_final_end(&mut tokens);
    Ok(tokens)
}

/// Does `text` read back as exactly one `kind` token, with nothing around it?
pub fn is_single(text: &str, kind: Token) -> bool {
    let mut lex = Token::lexer(text);
    matches!(lex.next(), Some(Ok(t)) if t == kind)
        && lex.span() == (0..text.len())
        && lex.next().is_none()
}

/// Post-lex pass: a trailing `.` at end of input is the end token, not an atom.
///
/// The DFA only produces `End` when layout follows the dot, since that
/// lookahead is part of the match. At end of input there is nothing to
/// consume, so the dot arrives as a one-character Symbol.
fn reclassify_final_end(tokens: &mut [Lexeme<'_>]) {
    if let Some(last) = tokens.last_mut() {
        if last.token == Token::Symbol && last.text == "." {
            last.token = Token::End;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|l| l.token)
            .collect()
    }

    #[test]
    fn names_and_variables() {
        assert_eq!(
            kinds("foo Bar _ _x"),
            vec![Token::Name, Token::Var, Token::Var, Token::Var]
        );
    }

    #[test]
    fn symbol_runs_are_one_token() {
        let toks = tokenize("X =.. Y").unwrap();
        assert_eq!(toks[1].token, Token::Symbol);
        assert_eq!(toks[1].text, "=..");
    }

    #[test]
    fn trailing_dot_is_end() {
        assert_eq!(kinds("true."), vec![Token::Name, Token::End]);
        assert_eq!(kinds("true.\n"), vec![Token::Name, Token::End]);
        assert_eq!(kinds("true. "), vec![Token::Name, Token::End]);
    }

    #[test]
    fn float_wins_over_int_dot() {
        assert_eq!(kinds("4.2"), vec![Token::Float]);
        assert_eq!(kinds("1.0e100"), vec![Token::Float]);
        assert_eq!(kinds("1e10"), vec![Token::Float]);
    }

    #[test]
    fn radix_and_char_codes() {
        assert_eq!(
            kinds("0x1F 0o17 0b101 0'a"),
            vec![Token::Hex, Token::Oct, Token::Bin, Token::CharCode]
        );
    }

    #[test]
    fn quoted_atom_with_escapes() {
        let toks = tokenize(r"'it''s \n \x41\'").unwrap();
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].token, Token::Quoted);
    }

    #[test]
    fn functional_notation_is_adjacent() {
        let toks = tokenize("foo(a) - (b)").unwrap();
        assert!(toks[0].touches(&toks[1]));
        assert!(!toks[4].touches(&toks[5]));
    }

    #[test]
    fn single_token_checks() {
        assert!(is_single("foo_Bar1", Token::Name));
        assert!(is_single("_G123", Token::Var));
        assert!(!is_single("foo bar", Token::Name));
        assert!(!is_single(" foo", Token::Name));
        assert!(!is_single("Foo", Token::Name));
        // modifier letters are not name starts
        assert!(!is_single("\u{2b0}a", Token::Name));
        assert!(!is_single("", Token::Var));
    }

    #[test]
    fn unmatched_input_reports_offset() {
        let err = tokenize("foo 'unterminated").unwrap_err();
        assert_eq!(err.offset, 4);
    }
}
