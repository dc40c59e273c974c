//! The guest's `host-call` import: route a goal to a registered host
//! predicate and hand the reply back in guest memory.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use wasmtime::{Caller, Linker};
use wasmpl_term::{decode, encode, indicator, EncodeError, Term};

use crate::abi::IMPORT_MODULE;
use crate::callback::{Callback, Reply};
use crate::error::{Error, Result};
use crate::memory;
use crate::state::{self, HostState};

thread_local! {
    /// Host predicates running on this thread, innermost last.
    static CALLBACK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Whether this thread is inside a host predicate. An instance lock may
/// then be held further up the stack.
pub(crate) fn in_callback() -> bool {
    CALLBACK_DEPTH.with(|d| d.get() > 0)
}

struct CallbackScope;

impl CallbackScope {
    fn enter() -> Self {
        CALLBACK_DEPTH.with(|d| d.set(d.get() + 1));
        CallbackScope
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        CALLBACK_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

pub(crate) fn add_to_linker(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        "host-call",
        |caller: Caller<'_, HostState>,
         subquery: i32,
         msg: i32,
         msg_len: i32,
         reply_pp: i32,
         reply_len_p: i32|
         -> wasmtime::Result<i32> {
            host_call(caller, subquery, msg, msg_len, reply_pp, reply_len_p)
                .map_err(wasmtime::Error::from)
        },
    )?;
    // Host predicates finish before host-call returns, so there is never a
    // parked continuation to resume.
    linker.func_wrap(
        IMPORT_MODULE,
        "host-resume",
        |_caller: Caller<'_, HostState>, subquery: i32, _reply_pp: i32, _reply_len_p: i32| -> i32 {
            tracing::trace!(target: "wasmpl::host", subquery, "host-resume with nothing pending");
            0
        },
    )?;
    Ok(())
}

fn host_call(
    mut caller: Caller<'_, HostState>,
    subquery: i32,
    msg: i32,
    msg_len: i32,
    reply_pp: i32,
    reply_len_p: i32,
) -> Result<i32> {
    let tag = state::resolve_subquery(&mut caller, subquery)?;
    let len = usize::try_from(msg_len).map_err(|_| Error::MemoryFault {
        ptr: msg as u32,
        len: 0,
        size: memory::memory_size(&caller),
    })?;
    let text = memory::read_string(&caller, msg, len)?;
    let goal = decode(&text)?;

    {
        let config = &caller.data().config;
        if config.trace {
            config.emit_debug(&format!("host-call {}", text));
        }
    }
    tracing::debug!(target: "wasmpl::host", subquery, goal = %text, "host call");

    let reply = match (goal.name(), goal.arity()) {
        (Some(name), Some(arity)) if goal.is_callable() => {
            let pi = indicator(name, arity);
            let pred = caller.data().procs.get(&(name, arity)).cloned();
            match pred {
                _ if tag.is_cancelled() => {
                    tracing::debug!(target: "wasmpl::host", predicate = %pi, "query cancelled, skipping host predicate");
                    Reply::Throw(Term::atom("cancelled"))
                }
                None => {
                    let err = Error::UnregisteredPredicate {
                        name: name.as_str().to_string(),
                        arity,
                    };
                    tracing::warn!(target: "wasmpl::host", "{}", err);
                    Reply::Throw(error_term(
                        Term::compound("existence_error", vec![Term::atom("procedure"), pi.clone()]),
                        pi,
                    ))
                }
                Some(pred) => {
                    let mut cb = Callback::new(caller, subquery, tag);
                    let outcome = {
                        let _scope = CallbackScope::enter();
                        panic::catch_unwind(AssertUnwindSafe(|| pred(&mut cb, &goal)))
                    };
                    caller = cb.into_caller();
                    match outcome {
                        Ok(reply) => reply,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            tracing::error!(target: "wasmpl::host", predicate = %pi, panic = %message, "host predicate panicked");
                            Reply::Throw(error_term(
                                Term::compound("system_error", vec![Term::string(message)]),
                                pi,
                            ))
                        }
                    }
                }
            }
        }
        _ => Reply::Throw(error_term(
            Term::compound("type_error", vec![Term::atom("callable"), goal.clone()]),
            Term::var("_"),
        )),
    };

    let reply = reply.into_term();
    let text = match encode(&reply) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(target: "wasmpl::host", error = %e, "host reply cannot be encoded");
            let formal = match e {
                EncodeError::NonFiniteFloat(_) => {
                    Term::compound("representation_error", vec![Term::atom("float")])
                }
                EncodeError::InvalidVariableName(name) => Term::compound(
                    "domain_error",
                    vec![Term::atom("variable_name"), Term::string(name)],
                ),
            };
            let ball = error_term(
                formal,
                goal.name().map_or(Term::var("_"), |n| indicator(n, goal.arity().unwrap_or(0))),
            );
            encode(&Reply::Throw(ball).into_term())?
        }
    };
    tracing::trace!(target: "wasmpl::host", reply = %text, "host reply");

    // The guest takes ownership of the reply buffer.
    let (ptr, size) = memory::alloc_cstring(&mut caller, &text)?;
    memory::write_indirect(&mut caller, reply_pp, ptr)?;
    memory::write_indirect(&mut caller, reply_len_p, (size - 1) as i32)?;
    Ok(1)
}

/// `error(Formal, Context)`.
fn error_term(formal: Term, context: Term) -> Term {
    Term::compound("error", vec![formal, context])
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "host predicate panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload = panic::catch_unwind(|| std::panic::panic_any(7u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "host predicate panicked");
    }

    #[test]
    fn callback_scope_nests_and_unwinds() {
        assert!(!in_callback());
        {
            let _outer = CallbackScope::enter();
            let _inner = CallbackScope::enter();
            assert!(in_callback());
        }
        assert!(!in_callback());
        let _ = panic::catch_unwind(|| {
            let _scope = CallbackScope::enter();
            panic!("inside");
        });
        assert!(!in_callback());
    }

    #[test]
    fn error_terms_are_iso_shaped() {
        let pi = indicator(wasmpl_term::Atom::new("foo"), 2);
        let ball = error_term(
            Term::compound("existence_error", vec![Term::atom("procedure"), pi.clone()]),
            pi,
        );
        assert_eq!(
            ball.to_string(),
            "error(existence_error(procedure,/(foo,2)),/(foo,2))"
        );
    }
}
