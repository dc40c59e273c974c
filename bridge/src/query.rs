//! Query options and the locked top-level query handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wasmpl_term::Term;

use crate::answer::Answer;
use crate::dispatch;
use crate::error::{Error, Result};
use crate::instance::Shared;
use crate::session::{Phase, Session};

bitflags::bitflags! {
    /// Flags passed to `pl_query`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QueryFlags: i32 {
        /// The query runs inside a host callback; the guest must not take
        /// its own lock.
        const SKIP_LOCK = 1;
        /// Report bindings alongside a thrown exception.
        const BIND_AFTER_THROW = 2;
    }
}

/// Shared cancellation flag. Checked before each guest call; a running step
/// is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-query options.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    bindings: Vec<(String, Term)>,
    pub(crate) flags: QueryFlags,
    pub(crate) cancel: Option<Cancel>,
    pub(crate) timeout: Option<Duration>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind variable `name` to `value` before the goal runs.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Term>) -> Self {
        self.bindings.push((name.into(), value.into()));
        self
    }

    /// Bind several variables at once, e.g. from a previous answer's
    /// substitution.
    pub fn binding<I, K>(mut self, substitution: I) -> Self
    where
        I: IntoIterator<Item = (K, Term)>,
        K: Into<String>,
    {
        self.bindings
            .extend(substitution.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    pub fn bind_after_throw(mut self, on: bool) -> Self {
        self.flags.set(QueryFlags::BIND_AFTER_THROW, on);
        self
    }

    pub fn cancel_on(mut self, cancel: Cancel) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Give up (with `Cancelled`) once `timeout` has passed since the query
    /// was created. Checked between steps only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bindings folded left to right: a later binding for the same variable
    /// replaces the earlier value but keeps its position.
    pub(crate) fn folded(&self) -> Vec<(String, Term)> {
        let mut out: Vec<(String, Term)> = Vec::with_capacity(self.bindings.len());
        for (name, value) in &self.bindings {
            match out.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value.clone(),
                None => out.push((name.clone(), value.clone())),
            }
        }
        out
    }
}

/// A query against a [`Prolog`](crate::Prolog) instance.
///
/// Each call to [`next_answer`](Query::next_answer) takes the instance lock
/// for one guest step. Dropping the query releases its guest state.
pub struct Query {
    shared: Arc<Shared>,
    session: Session,
    fused: bool,
}

impl Query {
    pub(crate) fn new(shared: Arc<Shared>, session: Session) -> Self {
        Query {
            shared,
            session,
            fused: false,
        }
    }

    pub fn goal(&self) -> &str {
        self.session.goal()
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    /// The most recent solution, until the query moves past it.
    pub fn current(&self) -> Option<&Answer> {
        self.session.current()
    }

    /// Advance to the next solution. The first call fails with
    /// [`Error::Failure`] if the goal has no solutions at all; later
    /// exhaustion is `Ok(None)`.
    pub fn next_answer(&mut self) -> Result<Option<Answer>> {
        let mut guard = self.shared.store.lock();
        let Some(store) = guard.as_mut() else {
            self.session.abandon();
            return Err(Error::EngineUnavailable);
        };
        let result = self.session.advance(store);
        self.shared.settle(&mut guard);
        result
    }

    /// Release the query. Closing twice, or after the instance is gone, is
    /// a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.session.phase() == Phase::Closed {
            return Ok(());
        }
        let mut guard = self.shared.store.lock();
        let result = match guard.as_mut() {
            Some(store) => self.session.close(store),
            None => {
                self.session.abandon();
                Ok(())
            }
        };
        self.shared.settle(&mut guard);
        result
    }
}

impl Iterator for Query {
    type Item = Result<Answer>;

    /// Yields solutions in guest order; an error is yielded once and ends
    /// the iteration.
    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        match self.next_answer() {
            Ok(Some(answer)) => Some(Ok(answer)),
            Ok(None) => {
                self.fused = true;
                None
            }
            Err(Error::Failure) => {
                self.fused = true;
                None
            }
            Err(e) => {
                self.fused = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        if self.session.phase() == Phase::Closed {
            return;
        }
        // Inside a host predicate this thread may already hold the lock.
        let guard = if dispatch::in_callback() {
            self.shared.store.try_lock()
        } else {
            Some(self.shared.store.lock())
        };
        let Some(mut guard) = guard else {
            if let Some(subquery) = self.session.detach() {
                self.shared.defer_close(subquery);
            }
            return;
        };
        if let Some(store) = guard.as_mut() {
            if let Err(e) = self.session.close(store) {
                tracing::warn!(target: "wasmpl", error = %e, "failed to close dropped query");
            }
        }
        self.shared.settle(&mut guard);
    }
}
