//! Host predicates and the handle they receive.

use std::path::Path;
use std::sync::Arc;

use wasmtime::Caller;
use wasmpl_term::Term;

use crate::answer::Answer;
use crate::error::{Error, Result};
use crate::instance::{self, Prolog, Stats};
use crate::query::QueryOptions;
use crate::session::{Phase, Session};
use crate::state::{HostState, QueryTag};

/// A registered host predicate. Receives the instance handle and the goal
/// as the guest called it.
pub(crate) type Predicate = Arc<dyn Fn(&mut Callback<'_>, &Term) -> Reply + Send + Sync>;

/// What a host predicate tells the guest to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Succeed without binding anything.
    True,
    Fail,
    /// Unify the call with this term. It should have the same name and
    /// arity as the goal; anything else fails.
    Unify(Term),
    /// Throw `ball` from the call site.
    Throw(Term),
    /// Continue with `call(Goal)`.
    Goal(Term),
}

impl Reply {
    /// The term sent back to the guest.
    pub fn into_term(self) -> Term {
        match self {
            Reply::True => Term::atom("true"),
            Reply::Fail => Term::atom("fail"),
            Reply::Unify(t) => t,
            Reply::Throw(ball) => Term::compound("throw", vec![ball]),
            Reply::Goal(goal) => Term::compound("call", vec![goal]),
        }
    }
}

impl From<bool> for Reply {
    fn from(ok: bool) -> Self {
        if ok {
            Reply::True
        } else {
            Reply::Fail
        }
    }
}

/// The instance as seen from inside a host predicate.
///
/// The instance lock is already held by whoever is driving the guest, so
/// everything here runs without locking. The handle borrows the callback's
/// store context and cannot outlive the call.
pub struct Callback<'a> {
    caller: Caller<'a, HostState>,
    subquery: i32,
    tag: QueryTag,
}

impl<'a> Callback<'a> {
    pub(crate) fn new(caller: Caller<'a, HostState>, subquery: i32, tag: QueryTag) -> Self {
        Callback {
            caller,
            subquery,
            tag,
        }
    }

    pub(crate) fn into_caller(self) -> Caller<'a, HostState> {
        self.caller
    }

    /// Guest address of the query that made this call.
    pub fn subquery(&self) -> i32 {
        self.subquery
    }

    /// Goal text of the query that made this call.
    pub fn query_goal(&self) -> &str {
        &self.tag.goal
    }

    /// Whether the calling query's cancel token or deadline has tripped.
    pub fn is_cancelled(&self) -> bool {
        self.tag.is_cancelled()
    }

    /// Start a query nested inside the current one.
    pub fn query(&mut self, goal: &str) -> NestedQuery<'_, 'a> {
        self.query_with(goal, QueryOptions::default())
    }

    pub fn query_with(&mut self, goal: &str, options: QueryOptions) -> NestedQuery<'_, 'a> {
        NestedQuery {
            session: Session::new(goal, options, true),
            cb: self,
            fused: false,
        }
    }

    pub fn query_once(&mut self, goal: &str) -> Result<Answer> {
        self.query_once_with(goal, QueryOptions::default())
    }

    pub fn query_once_with(&mut self, goal: &str, options: QueryOptions) -> Result<Answer> {
        instance::query_once_in(&mut self.caller, goal, options, true)
    }

    pub fn consult(&mut self, path: impl AsRef<Path>) -> Result<()> {
        instance::consult_in(&mut self.caller, path.as_ref())
    }

    pub fn consult_text(&mut self, module: &str, text: &str) -> Result<()> {
        instance::consult_text_in(&mut self.caller, module, text, true)
    }

    pub fn register<F>(&mut self, name: &str, arity: usize, f: F) -> Result<()>
    where
        F: Fn(&mut Callback<'_>, &Term) -> Reply + Send + Sync + 'static,
    {
        let pred: Predicate = Arc::new(f);
        instance::register_in(&mut self.caller, name, arity, pred, true)
    }

    pub fn clone_instance(&mut self) -> Result<Prolog> {
        instance::fork(&mut self.caller)
    }

    pub fn stats(&self) -> Stats {
        if self.is_closed() {
            return Stats::default();
        }
        instance::stats_in(&self.caller)
    }

    /// Ask for the instance to be closed. The guest finishes the current
    /// step; the instance is released when the outermost operation returns.
    /// Further calls through this handle fail with
    /// [`Error::EngineUnavailable`].
    pub fn close(&mut self) {
        tracing::debug!(target: "wasmpl::host", "instance close requested from host predicate");
        self.caller.data_mut().closing = true;
    }

    pub fn is_closed(&self) -> bool {
        self.caller.data().closing
    }
}

/// A query started from inside a host predicate. Borrows the [`Callback`],
/// so it must be finished before the predicate returns.
pub struct NestedQuery<'c, 'a> {
    cb: &'c mut Callback<'a>,
    session: Session,
    fused: bool,
}

impl NestedQuery<'_, '_> {
    pub fn goal(&self) -> &str {
        self.session.goal()
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn current(&self) -> Option<&Answer> {
        self.session.current()
    }

    pub fn next_answer(&mut self) -> Result<Option<Answer>> {
        if self.cb.is_closed() {
            self.session.abandon();
            return Err(Error::EngineUnavailable);
        }
        self.session.advance(&mut self.cb.caller)
    }

    pub fn close(&mut self) -> Result<()> {
        self.session.close(&mut self.cb.caller)
    }
}

impl Iterator for NestedQuery<'_, '_> {
    type Item = Result<Answer>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        let item = match self.next_answer() {
            Ok(Some(answer)) => return Some(Ok(answer)),
            Ok(None) | Err(Error::Failure) => None,
            Err(e) => Some(Err(e)),
        };
        self.fused = true;
        item
    }
}

impl Drop for NestedQuery<'_, '_> {
    fn drop(&mut self) {
        if let Err(e) = self.session.close(&mut self.cb.caller) {
            tracing::warn!(target: "wasmpl::host", error = %e, "failed to close nested query");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_encode_as_guest_directives() {
        assert_eq!(Reply::True.into_term(), Term::atom("true"));
        assert_eq!(Reply::Fail.into_term(), Term::atom("fail"));
        let t = Term::compound("f", vec![Term::Integer(1)]);
        assert_eq!(Reply::Unify(t.clone()).into_term(), t);
        assert_eq!(
            Reply::Throw(Term::atom("oops")).into_term().to_string(),
            "throw(oops)"
        );
        assert_eq!(
            Reply::Goal(Term::atom("nl")).into_term().to_string(),
            "call(nl)"
        );
    }

    #[test]
    fn bool_replies() {
        assert_eq!(Reply::from(true), Reply::True);
        assert_eq!(Reply::from(false), Reply::Fail);
    }
}
