//! End-to-end properties against the real engine module.
//!
//! Set `WASMPL_MODULE` to the engine's `.wasm` to run these; without it every
//! test returns immediately.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use num_bigint::BigInt;
use wasmpl::{Config, Error, Prolog, QueryOptions, Reply, Term, MODULE_ENV};

fn engine() -> Option<Prolog> {
    if std::env::var_os(MODULE_ENV).is_none() {
        eprintln!("{} not set, skipping", MODULE_ENV);
        return None;
    }
    Some(Prolog::new(Config::new()).expect("engine starts"))
}

#[test]
fn bound_terms_round_trip() {
    let Some(pl) = engine() else { return };
    let big: BigInt = "-123456789012345678901234567890".parse().unwrap();
    let values = vec![
        Term::atom("hello world"),
        Term::compound("f", vec![Term::compound("g", vec![Term::atom("x")]), Term::Integer(-7)]),
        Term::List(vec![Term::Integer(1), Term::atom("a"), Term::string("s")]),
        Term::partial_list(vec![Term::Integer(1)], Term::var("T")),
        Term::string("line\nbreak \"quoted\""),
        Term::Integer(i64::MAX),
        Term::from_bigint(big),
        Term::Float(-0.125),
        Term::Float(1.0e100),
    ];
    for value in values {
        let answer = pl
            .query_once_with("Y = X", QueryOptions::new().bind("X", value.clone()))
            .unwrap_or_else(|e| panic!("binding {} failed: {}", value, e));
        let got = answer.get("Y").unwrap();
        match &value {
            // the tail comes back renamed
            Term::PartialList(items, _) => {
                let Term::PartialList(got_items, tail) = got else {
                    panic!("expected a partial list, got {:?}", got);
                };
                assert_eq!(got_items, items);
                assert!(tail.as_variable().is_some());
            }
            _ => assert_eq!(got, &value),
        }
    }
}

#[test]
fn true_then_exhausted() {
    let Some(pl) = engine() else { return };
    let mut q = pl.query("true");
    let answer = q.next_answer().unwrap().unwrap();
    assert!(answer.solution.is_empty());
    assert!(q.next_answer().unwrap().is_none());
}

#[test]
fn false_fails() {
    let Some(pl) = engine() else { return };
    assert!(matches!(pl.query("false").next_answer(), Err(Error::Failure)));
}

#[test]
fn throws_and_syntax_errors() {
    let Some(pl) = engine() else { return };
    let err = pl.query_once("throw(ball)").unwrap_err();
    assert_eq!(err.ball(), Some(&Term::atom("ball")));
    assert!(pl.query_once("hello(").unwrap_err().is_syntax_error());
}

#[test]
fn loaded_clauses_and_clones() {
    let Some(pl) = engine() else { return };
    let before = pl.clone_instance().unwrap();
    pl.consult_text("user", "fact(1).\n").unwrap();
    let after = pl.clone_instance().unwrap();

    assert!(pl.query_once("fact(1)").is_ok());
    assert!(after.query_once("fact(1)").is_ok());
    assert!(before.query_once("fact(1)").is_err());
}

#[test]
fn consult_from_a_mapped_directory() {
    if std::env::var_os(MODULE_ENV).is_none() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let mut file = std::fs::File::create(dir.path().join("kb.pl")).unwrap();
    writeln!(file, "color(red).\ncolor(green).").unwrap();
    let pl = Prolog::new(Config::new().map_dir("/kb", dir.path())).unwrap();
    pl.consult("/kb/kb.pl").unwrap();
    assert_eq!(pl.query("color(C)").count(), 2);
    assert!(matches!(pl.consult("/kb/missing.pl"), Err(Error::Consult(_))));
}

#[test]
fn host_predicates_run_per_retry() {
    let Some(pl) = engine() else { return };
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    pl.register("double", 2, move |_, goal| {
        seen.fetch_add(1, Ordering::SeqCst);
        match goal.args()[0].as_integer() {
            Some(n) => Reply::Unify(Term::compound("double", vec![Term::Integer(n), Term::Integer(2 * n)])),
            None => Reply::Fail,
        }
    })
    .unwrap();
    let answers: Vec<_> = pl
        .query("member(X, [1,2,3]), double(X, Y)")
        .collect::<Result<_, _>>()
        .unwrap();
    let ys: Vec<_> = answers.iter().map(|a| a.get("Y").cloned().unwrap()).collect();
    assert_eq!(ys, vec![Term::Integer(2), Term::Integer(4), Term::Integer(6)]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn member_kinds() {
    let Some(pl) = engine() else { return };
    let xs: Vec<Term> = pl
        .query(r#"member(X, [1, foo(bar), 4.2, "baz", boop])"#)
        .map(|a| a.unwrap().get("X").cloned().unwrap())
        .collect();
    assert_eq!(
        xs,
        vec![
            Term::Integer(1),
            Term::compound("foo", vec![Term::atom("bar")]),
            Term::Float(4.2),
            Term::string("baz"),
            Term::atom("boop"),
        ]
    );
}

#[test]
fn closed_engine_is_unavailable() {
    let Some(pl) = engine() else { return };
    pl.close();
    pl.close();
    assert!(matches!(pl.query_once("true"), Err(Error::EngineUnavailable)));
    assert!(matches!(pl.consult_text("user", "a."), Err(Error::EngineUnavailable)));
}
