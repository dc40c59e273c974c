use num_bigint::BigInt;
use wasmpl_term::{decode, encode, Atom, Term, Variable};

/// Decode a string that must be valid.
fn parse(input: &str) -> Term {
    decode(input).unwrap_or_else(|e| panic!("failed to parse {:?}: {}", input, e))
}

fn parse_err(input: &str) -> wasmpl_term::ParseError {
    match decode(input) {
        Ok(t) => panic!("expected {:?} to fail, got {:?}", input, t),
        Err(e) => e,
    }
}

/// Encode, decode, and compare.
fn assert_round_trip(term: Term) {
    let text = encode(&term).unwrap();
    assert_eq!(parse(&text), term, "round trip through {:?}", text);
}

// ─── Atoms ───────────────────────────────────────────────────────

#[test]
fn bare_and_quoted_atoms() {
    assert_eq!(parse("hello"), Term::atom("hello"));
    assert_eq!(parse("'hello world'"), Term::atom("hello world"));
    assert_eq!(parse("'it''s'"), Term::atom("it's"));
    assert_eq!(parse(r"'tab\there'"), Term::atom("tab\there"));
}

#[test]
fn solo_atoms() {
    assert_eq!(parse("!"), Term::atom("!"));
    assert_eq!(parse(";"), Term::atom(";"));
    assert_eq!(parse("{}"), Term::atom("{}"));
    assert_eq!(parse("'[]'"), Term::atom("[]"));
    assert_eq!(parse("[]"), Term::List(vec![]));
}

#[test]
fn quoted_operator_is_not_applied() {
    assert_eq!(
        parse("f('-', '\\\\+')"),
        Term::compound("f", vec![Term::atom("-"), Term::atom("\\+")])
    );
}

// ─── Numbers ─────────────────────────────────────────────────────

#[test]
fn integers_in_every_radix() {
    assert_eq!(parse("42"), Term::Integer(42));
    assert_eq!(parse("0x1F"), Term::Integer(31));
    assert_eq!(parse("0o17"), Term::Integer(15));
    assert_eq!(parse("0b101"), Term::Integer(5));
    assert_eq!(parse("0'a"), Term::Integer(97));
    assert_eq!(parse("0' "), Term::Integer(32));
}

#[test]
fn big_integers_promote() {
    let big: BigInt = "99999999999999999999999999999".parse().unwrap();
    assert_eq!(parse("99999999999999999999999999999"), Term::BigInt(big.clone()));
    assert_eq!(parse("-99999999999999999999999999999"), Term::BigInt(-big));
}

#[test]
fn negative_literals_need_adjacency() {
    assert_eq!(parse("-7"), Term::Integer(-7));
    assert_eq!(parse("-4.5"), Term::Float(-4.5));
    assert_eq!(parse("- 7"), Term::compound("-", vec![Term::Integer(7)]));
    assert_eq!(parse("-(7)"), Term::compound("-", vec![Term::Integer(7)]));
}

#[test]
fn floats() {
    assert_eq!(parse("4.2"), Term::Float(4.2));
    assert_eq!(parse("1.0e100"), Term::Float(1e100));
    assert_eq!(parse("2.5E-3"), Term::Float(2.5e-3));
}

// ─── Compounds and operators ─────────────────────────────────────

#[test]
fn functional_notation() {
    assert_eq!(
        parse("foo(bar, X, \"s\")"),
        Term::compound(
            "foo",
            vec![Term::atom("bar"), Term::var("X"), Term::string("s")]
        )
    );
}

#[test]
fn canonical_and_operator_forms_agree() {
    assert_eq!(parse("X = f(Y)"), parse("=(X,f(Y))"));
    assert_eq!(parse("a :- b, c ; d"), parse(":-(a,;(','(b,c),d))"));
    assert_eq!(parse("user:foo"), parse(":(user,foo)"));
    assert_eq!(parse("(a -> b ; c)"), parse(";(->(a,b),c)"));
    assert_eq!(parse("X is 2 + 3 * 4 - 1"), parse("is(X,-(+(2,*(3,4)),1))"));
    assert_eq!(parse("X = 2 ^ 3 ^ 4"), parse("=(X,^(2,^(3,4)))"));
    assert_eq!(parse("A =.. [f|T]"), parse("=..(A,[f|T])"));
}

#[test]
fn bar_outside_list_is_disjunction() {
    assert_eq!(parse("(a | b)"), parse("a ; b"));
}

#[test]
fn parentheses_reset_precedence() {
    assert_eq!(
        parse("f((a, b))"),
        Term::compound("f", vec![parse("','(a,b)")])
    );
}

#[test]
fn curly_terms() {
    assert_eq!(
        parse("{a, b}"),
        Term::compound("{}", vec![parse("(a, b)")])
    );
}

#[test]
fn prefix_operators() {
    assert_eq!(parse("\\+ foo"), parse("\\+(foo)"));
    assert_eq!(parse(":- dynamic foo/1"), parse(":-(dynamic(/(foo,1)))"));
    assert_eq!(parse("- - a"), parse("-(-(a))"));
}

// ─── Lists and strings ───────────────────────────────────────────

#[test]
fn lists_and_partial_lists() {
    assert_eq!(
        parse("[1, 2 | T]"),
        Term::PartialList(vec![1.into(), 2.into()], Box::new(Term::var("T")))
    );
    assert_eq!(parse("[a | [b, c]]"), parse("[a, b, c]"));
    assert_eq!(parse("[a | []]"), Term::List(vec![Term::atom("a")]));
}

#[test]
fn strings_with_escapes() {
    assert_eq!(parse(r#""a\"b""#), Term::string("a\"b"));
    assert_eq!(parse(r#""line\nnext""#), Term::string("line\nnext"));
    assert_eq!(parse(r#""\x41\\x42\""#), Term::string("AB"));
}

// ─── End token ───────────────────────────────────────────────────

#[test]
fn trailing_end_token_is_accepted() {
    assert_eq!(parse("foo(x)."), parse("foo(x)"));
    assert_eq!(parse("foo(x).\n"), parse("foo(x)"));
}

#[test]
fn answer_shaped_text() {
    let t = parse("success(['X'=1,'Y'=\"two\"],[dif(_A,_B)]).\n");
    assert!(t.is_functor("success", 2));
    let bindings = match &t.args()[0] {
        Term::List(items) => items,
        other => panic!("expected list, got {:?}", other),
    };
    assert_eq!(bindings[0], parse("=('X',1)"));
    assert_eq!(bindings[1].args()[1], Term::string("two"));
}

// ─── Errors ──────────────────────────────────────────────────────

#[test]
fn unbalanced_parentheses_fail_with_fragment() {
    let err = parse_err("hello(");
    assert_eq!(err.offset, 6);
    assert!(err.fragment.is_empty());
    let err = parse_err("foo(a b)");
    assert_eq!(err.fragment, "b)");
}

#[test]
fn junk_after_term_fails() {
    let err = parse_err("foo. bar");
    assert_eq!(err.fragment, "bar");
}

#[test]
fn empty_input_fails() {
    parse_err("");
    parse_err("   ");
}

#[test]
fn unknown_escape_fails() {
    let err = parse_err(r"'\q'");
    assert!(err.message.contains("escape"));
}

#[test]
fn deep_nesting_is_an_error_not_a_crash() {
    let depth = wasmpl_term::grammar::MAX_DEPTH * 4;
    let input = format!("{}x{}", "[".repeat(depth), "]".repeat(depth));
    let err = parse_err(&input);
    assert!(err.message.contains("depth"));
}

// ─── Round trips ─────────────────────────────────────────────────

#[test]
fn round_trip_mixed_term() {
    let big: BigInt = "-123456789012345678901234567890".parse().unwrap();
    assert_round_trip(Term::compound(
        "data",
        vec![
            Term::atom("Quoted Atom"),
            Term::compound("nested", vec![Term::compound("deep", vec![Term::atom("[]")])]),
            Term::List(vec![1.into(), Term::Float(-0.5), Term::string("s\"q")]),
            Term::PartialList(vec![Term::atom("a")], Box::new(Term::var("Tail"))),
            Term::BigInt(big),
            Term::Integer(i64::MIN),
            Term::Float(1e100),
            Term::atom("{}"),
            Term::atom(","),
            Term::atom("|"),
        ],
    ));
}

#[test]
fn round_trip_operator_functors() {
    assert_round_trip(Term::compound(
        "-",
        vec![Term::Integer(1)],
    ));
    assert_round_trip(Term::compound(
        ":-",
        vec![Term::atom("a"), Term::atom("b")],
    ));
    assert_round_trip(Term::compound(",", vec![Term::atom("a"), Term::atom("b")]));
}

#[test]
fn round_trip_unicode() {
    assert_round_trip(Term::compound(
        "greet",
        vec![Term::atom("世界"), Term::string("héllo ✓"), Term::atom("Émile")],
    ));
}

#[test]
fn variable_attrs_are_not_part_of_the_text() {
    let v = Term::Variable(Variable::with_attrs("X", vec![parse("dif(X,Y)")]));
    assert_eq!(encode(&v).unwrap(), "X");
}

#[test]
fn display_matches_encode() {
    let t = Term::compound("f", vec![Term::Atom(Atom::new("a b")), Term::Float(2.0)]);
    assert_eq!(t.to_string(), encode(&t).unwrap());
    assert_eq!(t.to_string(), "f('a b',2.0)");
}
