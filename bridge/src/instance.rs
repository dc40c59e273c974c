//! Engine instance lifecycle: create, clone, close.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use wasmtime::{AsContext, AsContextMut, Linker, Store, TypedFunc};
use wasmtime_wasi::preview1::{self as p1, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};
use wasmpl_term::{indicator, Atom, Term};

use crate::abi::{self, Abi};
use crate::answer::Answer;
use crate::callback::{Callback, Predicate, Reply};
use crate::config::Config;
use crate::dispatch;
use crate::error::{Error, Result};
use crate::memory;
use crate::module::GuestModule;
use crate::query::{Query, QueryOptions};
use crate::session::{self, Session};
use crate::state::{self, HostState};

const WASM_PAGE_SIZE: usize = 65536;

/// Resource usage of an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Linear memory size in bytes; zero once closed.
    pub memory_size: usize,
}

pub(crate) struct Shared {
    pub store: Mutex<Option<Store<HostState>>>,
    /// Subqueries dropped while the store was locked up the same thread's
    /// stack; released on the next `settle`.
    pub deferred: Mutex<Vec<i32>>,
}

impl Shared {
    fn new(store: Store<HostState>) -> Self {
        Shared {
            store: Mutex::new(Some(store)),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Queue a dropped subquery for release by whoever holds the store.
    pub fn defer_close(&self, subquery: i32) {
        tracing::debug!(target: "wasmpl", subquery, "deferring close of dropped query");
        self.deferred.lock().push(subquery);
    }

    /// Housekeeping before the store lock is released: close queued
    /// subqueries, then drop the store if a host callback asked for the
    /// instance to close.
    pub fn settle(&self, slot: &mut Option<Store<HostState>>) {
        let pending = std::mem::take(&mut *self.deferred.lock());
        if let Some(store) = slot.as_mut() {
            for subquery in pending {
                if let Err(e) = session::release(store, subquery) {
                    tracing::warn!(target: "wasmpl", subquery, error = %e, "failed to close deferred query");
                }
            }
        }
        if slot.as_ref().is_some_and(|s| s.data().closing) {
            tracing::info!(target: "wasmpl", "closing instance on request from host callback");
            *slot = None;
        }
    }
}

/// A Prolog engine running in its own WebAssembly instance.
///
/// All operations on one instance are serialized by an internal lock, so a
/// `Prolog` can be shared between threads. For parallelism, use
/// [`clone_instance`](Prolog::clone_instance).
pub struct Prolog {
    shared: Arc<Shared>,
}

impl Prolog {
    /// Instantiate the guest, run its start routine, and bind the engine.
    pub fn new(config: Config) -> Result<Self> {
        let module = match &config.module {
            Some(module) => module.clone(),
            None => GuestModule::shared()?,
        };
        let store = instantiate(&module, &config, true)?;
        tracing::info!(target: "wasmpl", ptr = store.data().ptr, "engine instance ready");
        Ok(Self::from_store(store))
    }

    fn from_store(store: Store<HostState>) -> Self {
        Prolog {
            shared: Arc::new(Shared::new(store)),
        }
    }

    /// Run `f` with the locked store. Fails if the instance is closed.
    fn with_store<T>(&self, f: impl FnOnce(&mut Store<HostState>) -> Result<T>) -> Result<T> {
        let mut guard = self.shared.store.lock();
        let store = guard.as_mut().ok_or(Error::EngineUnavailable)?;
        let result = f(store);
        self.shared.settle(&mut guard);
        result
    }

    /// Start a query. Nothing reaches the guest until the first
    /// [`Query::next_answer`].
    pub fn query(&self, goal: &str) -> Query {
        self.query_with(goal, QueryOptions::default())
    }

    pub fn query_with(&self, goal: &str, options: QueryOptions) -> Query {
        Query::new(self.shared.clone(), Session::new(goal, options, false))
    }

    /// First solution of `goal`; the rest are discarded.
    pub fn query_once(&self, goal: &str) -> Result<Answer> {
        self.query_once_with(goal, QueryOptions::default())
    }

    pub fn query_once_with(&self, goal: &str, options: QueryOptions) -> Result<Answer> {
        self.with_store(|store| query_once_in(store, goal, options, false))
    }

    /// Load a source file, by its path inside the guest's file system.
    pub fn consult(&self, path: impl AsRef<Path>) -> Result<()> {
        self.with_store(|store| consult_in(store, path.as_ref()))
    }

    /// Load clauses from text into `module`.
    pub fn consult_text(&self, module: &str, text: &str) -> Result<()> {
        self.with_store(|store| consult_text_in(store, module, text, false))
    }

    /// Define `name/arity` as a host predicate. Calls from Prolog run `f`
    /// with the goal term; its [`Reply`] decides the outcome.
    pub fn register<F>(&self, name: &str, arity: usize, f: F) -> Result<()>
    where
        F: Fn(&mut Callback<'_>, &Term) -> Reply + Send + Sync + 'static,
    {
        let pred: Predicate = Arc::new(f);
        self.with_store(|store| register_in(store, name, arity, pred, false))
    }

    /// A new, independent instance starting from a copy of this one's
    /// memory and host predicates.
    pub fn clone_instance(&self) -> Result<Prolog> {
        self.with_store(|store| fork(store))
    }

    pub fn stats(&self) -> Stats {
        match self.shared.store.lock().as_ref() {
            Some(store) => stats_in(store),
            None => Stats::default(),
        }
    }

    /// Release the instance. Later operations fail with
    /// [`Error::EngineUnavailable`]; closing again is a no-op.
    pub fn close(&self) {
        if self.shared.store.lock().take().is_some() {
            tracing::info!(target: "wasmpl", "engine instance closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.store.lock().is_none()
    }
}

impl Drop for Prolog {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Prolog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prolog")
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ─── Instantiation ───────────────────────────────────────────────

fn build_wasi(config: &Config) -> Result<WasiP1Ctx> {
    let mut builder = WasiCtxBuilder::new();
    builder.args(&config.argv());
    if let Some(dir) = &config.preopen_dir {
        builder.preopened_dir(dir, "/", DirPerms::all(), FilePerms::all())?;
    }
    for (alias, dir) in &config.dirs {
        builder.preopened_dir(dir, alias, DirPerms::all(), FilePerms::all())?;
    }
    Ok(builder.build_p1())
}

/// Instantiate `module`. With `start`, the guest's `_start` runs and the
/// engine handle is read from `pl_global`; a clone skips both and copies
/// them from its source instead.
fn instantiate(module: &GuestModule, config: &Config, start: bool) -> Result<Store<HostState>> {
    let wasi = build_wasi(config)?;
    let mut linker: Linker<HostState> = Linker::new(module.engine());
    p1::add_to_linker_sync(&mut linker, |s| &mut s.wasi)?;
    dispatch::add_to_linker(&mut linker)?;

    let state = HostState::new(wasi, config.clone(), module.clone());
    let mut store = Store::new(module.engine(), state);
    let instance = linker.instantiate(&mut store, module.module())?;

    if start {
        let run: TypedFunc<(), ()> = abi::export(&mut store, &instance, "_start")?;
        if let Err(err) = run.call(&mut store, ()) {
            match err.downcast_ref::<I32Exit>() {
                Some(I32Exit(0)) => {}
                _ => return Err(err.into()),
            }
        }
    }

    let abi = Abi::bind(&mut store, &instance)?;
    if start {
        store.data_mut().ptr = abi.global.call(&mut store, ())?;
    }
    store.data_mut().abi = Some(abi);
    Ok(store)
}

/// Clone the instance behind `ctx`: fresh instantiation, then a byte copy
/// of linear memory, the engine handle, and the host predicate table.
pub(crate) fn fork(ctx: &mut impl AsContextMut<Data = HostState>) -> Result<Prolog> {
    let source = state::abi(&*ctx)?;
    let (module, config, ptr, procs) = {
        let state = ctx.as_context().data();
        (
            state.module.clone(),
            state.config.clone(),
            state.ptr,
            state.procs.clone(),
        )
    };

    let mut store = instantiate(&module, &config, false)?;
    let target = memory::bound(&store)?;

    let src_size = source.memory.data_size(ctx.as_context());
    let dst_size = target.memory.data_size(&store);
    if src_size > dst_size {
        let pages = (src_size - dst_size).div_ceil(WASM_PAGE_SIZE) as u64;
        target.memory.grow(&mut store, pages)?;
    }
    let src = source.memory.data(ctx.as_context());
    target.memory.data_mut(&mut store)[..src.len()].copy_from_slice(src);

    let data = store.data_mut();
    data.ptr = ptr;
    data.procs = procs;
    tracing::info!(target: "wasmpl", memory = src_size, "cloned engine instance");
    Ok(Prolog::from_store(store))
}

// ─── Operations shared by Prolog and Callback ────────────────────

pub(crate) fn query_once_in<C>(ctx: &mut C, goal: &str, options: QueryOptions, nested: bool) -> Result<Answer>
where
    C: AsContextMut<Data = HostState>,
{
    let mut session = Session::new(goal, options, nested);
    let result = session.advance(ctx);
    let closed = session.close(ctx);
    let answer = result?;
    closed?;
    // the first step either yields an answer or fails
    answer.ok_or(Error::Failure)
}

pub(crate) fn consult_in<C>(ctx: &mut C, path: &Path) -> Result<()>
where
    C: AsContextMut<Data = HostState>,
{
    let abi = state::abi(&*ctx)?;
    let pl = ctx.as_context().data().ptr;
    let name = path.to_string_lossy();
    let ret = memory::with_cstring(ctx, &name, |ctx, file| {
        Ok(abi.consult.call(&mut *ctx, (pl, file))?)
    })?;
    if ret == 0 {
        return Err(Error::Consult(name.into_owned()));
    }
    tracing::debug!(target: "wasmpl", path = %name, "consulted");
    Ok(())
}

pub(crate) fn consult_text_in<C>(ctx: &mut C, module: &str, text: &str, nested: bool) -> Result<()>
where
    C: AsContextMut<Data = HostState>,
{
    let goal = Term::compound(
        ":",
        vec![
            Term::atom(module),
            Term::compound("$load_chars", vec![Term::string(text)]),
        ],
    );
    let goal = wasmpl_term::encode(&goal)?;
    query_once_in(ctx, &goal, QueryOptions::default(), nested)
        .map(|_| ())
        .map_err(|e| match e {
            Error::Failure => Error::Consult(format!("text into module {}", module)),
            other => other,
        })
}

pub(crate) fn register_in<C>(ctx: &mut C, name: &str, arity: usize, pred: Predicate, nested: bool) -> Result<()>
where
    C: AsContextMut<Data = HostState>,
{
    state::abi(&*ctx)?;
    let functor = Atom::new(name);
    let vars = (0..arity).map(|i| Term::var(format!("V{}", i))).collect();
    let head = functor.of(vars);
    let body = Term::compound("host_rpc", vec![head.clone()]);
    let clause = format!("{}.\n", wasmpl_term::encode(&Term::compound(":-", vec![head, body]))?);
    consult_text_in(ctx, "user", &clause, nested)?;

    // only once the guest has the clause that routes calls here
    ctx.as_context_mut()
        .data_mut()
        .procs
        .insert((functor, arity), pred);
    tracing::debug!(target: "wasmpl", predicate = %indicator(functor, arity), "registered host predicate");
    Ok(())
}

pub(crate) fn stats_in(ctx: &impl AsContext<Data = HostState>) -> Stats {
    Stats {
        memory_size: memory::memory_size(ctx),
    }
}
