//! Per-instance host state carried inside the wasmtime `Store`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use wasmtime::{AsContext, AsContextMut};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmpl_term::Atom;

use crate::abi::Abi;
use crate::callback::Predicate;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::memory;
use crate::module::GuestModule;
use crate::query::Cancel;

/// What the dispatcher needs to know about a live query.
#[derive(Clone, Debug)]
pub(crate) struct QueryTag {
    pub goal: Arc<str>,
    pub cancel: Option<Cancel>,
    pub deadline: Option<Instant>,
}

impl QueryTag {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(Cancel::is_cancelled)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

pub(crate) struct HostState {
    pub wasi: WasiP1Ctx,
    /// `None` until exports are bound.
    pub abi: Option<Abi>,
    /// Engine context handle from `pl_global`.
    pub ptr: i32,
    /// Subquery address → query.
    pub running: HashMap<i32, QueryTag>,
    /// Indirect slot → query, for queries whose address is not known yet.
    pub spawning: HashMap<i32, QueryTag>,
    pub procs: HashMap<(Atom, usize), Predicate>,
    pub config: Config,
    pub module: GuestModule,
    /// Set by `Callback::close`; the owner drops the store once the
    /// outermost operation returns.
    pub closing: bool,
}

impl HostState {
    pub fn new(wasi: WasiP1Ctx, config: Config, module: GuestModule) -> Self {
        HostState {
            wasi,
            abi: None,
            ptr: 0,
            running: HashMap::new(),
            spawning: HashMap::new(),
            procs: HashMap::new(),
            config,
            module,
            closing: false,
        }
    }
}

/// Bound exports, or `EngineUnavailable` for a closed or half-built instance.
pub(crate) fn abi(ctx: &impl AsContext<Data = HostState>) -> Result<Abi> {
    let state = ctx.as_context().data();
    if state.closing {
        return Err(Error::EngineUnavailable);
    }
    state.abi.clone().ok_or(Error::EngineUnavailable)
}

/// Find the query a host call came from: running queries first, then
/// queries still being spawned, re-reading each slot.
pub(crate) fn resolve_subquery(
    ctx: &mut impl AsContextMut<Data = HostState>,
    subquery: i32,
) -> Result<QueryTag> {
    if let Some(tag) = ctx.as_context().data().running.get(&subquery) {
        return Ok(tag.clone());
    }
    let slots: Vec<(i32, QueryTag)> = ctx
        .as_context()
        .data()
        .spawning
        .iter()
        .map(|(slot, tag)| (*slot, tag.clone()))
        .collect();
    for (slot, tag) in slots {
        match memory::read_indirect(&*ctx, slot) {
            Ok(addr) if addr != 0 && addr == subquery => return Ok(tag),
            _ => continue,
        }
    }
    Err(Error::UnknownSubquery(subquery))
}
