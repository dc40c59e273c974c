//! Per-query protocol state machine.
//!
//! ```text
//! Created ─open─▶ Active ─redo─▶ Active ... ─▶ Exhausted | Errored ─▶ Closed
//! ```
//!
//! A `Session` owns no guest resources of its own; it drives the guest
//! through whatever store context it is handed, so the locked top-level
//! `Query` and the lock-free `NestedQuery` share this code.

use std::sync::Arc;
use std::time::Instant;

use wasmtime::{AsContext, AsContextMut};
use wasmpl_term::{encode, Term};

use crate::abi::Abi;
use crate::answer::{self, Answer, Outcome};
use crate::error::{Error, Result};
use crate::memory;
use crate::query::{QueryFlags, QueryOptions};
use crate::state::{self, HostState, QueryTag};

/// Where a query is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not sent to the guest yet.
    Created,
    /// At least one solution delivered; the guest holds choice points.
    Active,
    /// No more solutions.
    Exhausted,
    /// Stopped by an exception, cancellation, or bridge fault.
    Errored,
    Closed,
}

pub(crate) struct Session {
    tag: QueryTag,
    options: QueryOptions,
    flags: QueryFlags,
    subquery: i32,
    phase: Phase,
    current: Option<Answer>,
}

impl Session {
    pub fn new(goal: &str, options: QueryOptions, nested: bool) -> Self {
        let mut flags = options.flags;
        if nested {
            flags |= QueryFlags::SKIP_LOCK;
        }
        let tag = QueryTag {
            goal: Arc::from(goal),
            cancel: options.cancel.clone(),
            deadline: options.timeout.map(|t| Instant::now() + t),
        };
        Session {
            tag,
            options,
            flags,
            subquery: 0,
            phase: Phase::Created,
            current: None,
        }
    }

    pub fn goal(&self) -> &str {
        &self.tag.goal
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current(&self) -> Option<&Answer> {
        self.current.as_ref()
    }

    fn tripped(&self) -> bool {
        self.tag.is_cancelled()
    }

    /// Produce the next solution. `Ok(None)` once the query is exhausted,
    /// errored, or closed.
    pub fn advance<C>(&mut self, ctx: &mut C) -> Result<Option<Answer>>
    where
        C: AsContextMut<Data = HostState>,
    {
        if !matches!(self.phase, Phase::Created | Phase::Active) {
            return Ok(None);
        }
        if self.tripped() {
            tracing::debug!(target: "wasmpl", goal = %self.tag.goal, "query cancelled before step");
            if let Err(e) = self.close(ctx) {
                tracing::warn!(target: "wasmpl", goal = %self.tag.goal, error = %e, "failed to close cancelled query");
            }
            return Err(Error::Cancelled);
        }
        let result = self.step(ctx);
        if result.is_err() && matches!(self.phase, Phase::Created | Phase::Active) {
            // fault inside a guest call: the guest's view of this query is unknown
            self.forget(ctx);
            self.phase = Phase::Errored;
        }
        result
    }

    fn step<C>(&mut self, ctx: &mut C) -> Result<Option<Answer>>
    where
        C: AsContextMut<Data = HostState>,
    {
        let abi = state::abi(&*ctx)?;
        let pl = ctx.as_context().data().ptr;
        let first = self.phase == Phase::Created;

        abi.capture.call(&mut *ctx, pl)?;
        let call = if first {
            self.open(ctx, &abi, pl)
        } else {
            tracing::trace!(target: "wasmpl", subquery = self.subquery, "redo");
            abi.redo.call(&mut *ctx, self.subquery).map_err(Error::from)
        };
        let more = match call {
            Ok(more) => more,
            Err(e) => {
                let _ = abi.capture_free.call(&mut *ctx, pl);
                return Err(e);
            }
        };
        let (raw_stdout, stderr) = match read_capture(ctx, &abi, pl) {
            Ok(captured) => captured,
            Err(e) => {
                tracing::warn!(target: "wasmpl", goal = %self.tag.goal, error = %e, "unreadable guest output");
                if more != 0 {
                    self.phase = Phase::Active;
                    self.finish(ctx, &abi)?;
                } else {
                    self.forget(ctx);
                }
                self.phase = Phase::Errored;
                return Err(e);
            }
        };

        if more == 0 {
            self.phase = Phase::Exhausted;
            ctx.as_context_mut().data_mut().running.remove(&self.subquery);
        } else {
            self.phase = Phase::Active;
        }

        let decoded = answer::split_frame(&raw_stdout).and_then(|(stdout, text)| {
            tracing::trace!(target: "wasmpl", answer = text, "step answer");
            Ok((stdout, answer::decode_outcome(text)?))
        });
        let (stdout, outcome) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(target: "wasmpl", goal = %self.tag.goal, error = %e, "undecodable answer");
                self.finish(ctx, &abi)?;
                self.phase = Phase::Errored;
                return Err(e);
            }
        };
        {
            let config = &ctx.as_context().data().config;
            config.emit_stdout(&stdout);
            config.emit_stderr(&stderr);
        }

        match outcome {
            Outcome::Success(solution) => {
                let answer = Answer {
                    query: self.tag.goal.to_string(),
                    solution,
                    stdout,
                    stderr,
                };
                self.current = Some(answer.clone());
                Ok(Some(answer))
            }
            Outcome::Failure => {
                self.finish(ctx, &abi)?;
                self.phase = Phase::Exhausted;
                if first {
                    Err(Error::Failure)
                } else {
                    Ok(None)
                }
            }
            Outcome::Exception { ball, bindings } => {
                self.finish(ctx, &abi)?;
                self.phase = Phase::Errored;
                if self.tripped() && ball == Term::atom("cancelled") {
                    return Err(Error::Cancelled);
                }
                Err(Error::Thrown { ball, bindings })
            }
        }
    }

    /// Send the goal to the guest. The slot is listed in the spawning table
    /// for the duration of `pl_query`, so host calls made before the guest
    /// reports the subquery address can still be attributed.
    fn open<C>(&mut self, ctx: &mut C, abi: &Abi, pl: i32) -> Result<i32>
    where
        C: AsContextMut<Data = HostState>,
    {
        let text = goal_text(&self.tag.goal, &self.options.folded())?;
        let flags = self.flags.bits();
        let tag = self.tag.clone();
        tracing::debug!(target: "wasmpl", goal = %text, flags, "open query");

        let (ret, subquery) = memory::with_cstring(ctx, &text, |ctx, goal| {
            memory::with_slots(ctx, 1, |ctx, slot| {
                ctx.as_context_mut()
                    .data_mut()
                    .spawning
                    .insert(slot, tag.clone());
                let ret = abi.query.call(&mut *ctx, (pl, goal, slot, flags));
                ctx.as_context_mut().data_mut().spawning.remove(&slot);
                let ret = ret?;
                let subquery = memory::read_indirect(&*ctx, slot)?;
                Ok((ret, subquery))
            })
        })?;

        self.subquery = subquery;
        if subquery != 0 {
            ctx.as_context_mut()
                .data_mut()
                .running
                .insert(subquery, tag);
        }
        Ok(ret)
    }

    /// Release guest choice points after a terminal answer.
    fn finish<C>(&mut self, ctx: &mut C, abi: &Abi) -> Result<()>
    where
        C: AsContextMut<Data = HostState>,
    {
        self.current = None;
        if self.phase == Phase::Active && self.subquery != 0 {
            ctx.as_context_mut()
                .data_mut()
                .running
                .remove(&self.subquery);
            abi.done.call(&mut *ctx, self.subquery)?;
        }
        Ok(())
    }

    fn forget<C>(&mut self, ctx: &mut C)
    where
        C: AsContextMut<Data = HostState>,
    {
        self.current = None;
        if self.subquery != 0 {
            ctx.as_context_mut()
                .data_mut()
                .running
                .remove(&self.subquery);
        }
    }

    /// Stop the query, releasing guest state if it still holds choice
    /// points. Idempotent.
    pub fn close<C>(&mut self, ctx: &mut C) -> Result<()>
    where
        C: AsContextMut<Data = HostState>,
    {
        match self.detach() {
            Some(subquery) => release(ctx, subquery),
            None => Ok(()),
        }
    }

    /// Mark closed without touching the guest (the instance is gone).
    pub fn abandon(&mut self) {
        self.phase = Phase::Closed;
        self.current = None;
    }

    /// Mark closed and hand back the subquery whose guest state still has
    /// to be released, if any.
    pub fn detach(&mut self) -> Option<i32> {
        let was_active = self.phase == Phase::Active;
        self.abandon();
        (was_active && self.subquery != 0).then_some(self.subquery)
    }
}

/// Release the guest state of an open subquery.
pub(crate) fn release<C>(ctx: &mut C, subquery: i32) -> Result<()>
where
    C: AsContextMut<Data = HostState>,
{
    ctx.as_context_mut().data_mut().running.remove(&subquery);
    let abi = memory::bound(&*ctx)?;
    tracing::debug!(target: "wasmpl", subquery, "close query");
    abi.done.call(&mut *ctx, subquery)?;
    Ok(())
}

/// Read and release the stdout/stderr captured since `pl_capture`.
fn read_capture<C>(ctx: &mut C, abi: &Abi, pl: i32) -> Result<(String, String)>
where
    C: AsContextMut<Data = HostState>,
{
    let captured = memory::with_slots(ctx, 4, |ctx, slots| {
        let p = memory::PTR_SIZE as i32;
        abi.capture_read
            .call(&mut *ctx, (pl, slots, slots + p, slots + 2 * p, slots + 3 * p))?;
        let out_ptr = memory::read_indirect(&*ctx, slots)?;
        let out_len = memory::read_indirect(&*ctx, slots + p)?;
        let err_ptr = memory::read_indirect(&*ctx, slots + 2 * p)?;
        let err_len = memory::read_indirect(&*ctx, slots + 3 * p)?;
        let stdout = read_text(&*ctx, out_ptr, out_len)?;
        let stderr = read_text(&*ctx, err_ptr, err_len)?;
        Ok((stdout, stderr))
    });
    let freed = abi.capture_free.call(&mut *ctx, pl);
    let captured = captured?;
    freed?;
    Ok(captured)
}

fn read_text(ctx: &impl AsContext<Data = HostState>, ptr: i32, len: i32) -> Result<String> {
    if ptr == 0 || len <= 0 {
        return Ok(String::new());
    }
    memory::read_string(ctx, ptr, len as usize)
}

/// Symbol characters glue together into one token, so a `.` after one of
/// them is part of an atom rather than an end token.
fn is_symbol_char(c: char) -> bool {
    "+-*/\\^<>=~:.?@#&$".contains(c)
}

/// Strip the caller's end token, if the goal has one.
fn strip_end(goal: &str) -> &str {
    let goal = goal.trim();
    match goal.strip_suffix('.') {
        Some(rest) if !rest.ends_with(is_symbol_char) => rest.trim_end(),
        _ => goal,
    }
}

/// Goal text sent to the guest: `V1 = T1, ..., (Goal).`, or `Goal.` when
/// there are no bindings. A trailing end token in the caller's goal is
/// dropped.
pub(crate) fn goal_text(goal: &str, bindings: &[(String, Term)]) -> Result<String> {
    let goal = strip_end(goal);
    if bindings.is_empty() {
        let sep = if goal.ends_with(is_symbol_char) { " " } else { "" };
        return Ok(format!("{}{}.", goal, sep));
    }
    let mut text = String::new();
    for (name, value) in bindings {
        text.push_str(&encode(&Term::var(name.as_str()))?);
        text.push_str(" = ");
        text.push_str(&encode(value)?);
        text.push_str(", ");
    }
    text.push('(');
    text.push_str(goal);
    text.push_str(").");
    Ok(text)
}
