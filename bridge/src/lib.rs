//! wasmpl: drive a Prolog engine compiled to WebAssembly.
//!
//! ```text
//! Prolog::query ─▶ Session ─▶ pl_query / pl_redo ─▶ captured stdout ─▶ Answer
//!                                   │
//!                             host-call ─▶ dispatch ─▶ registered predicate
//! ```
//!
//! Each [`Prolog`] owns one guest instance behind a lock. Terms cross the
//! boundary as canonical Prolog text (see [`wasmpl_term`]); buffers are
//! allocated with the guest's own allocator. Host predicates get a
//! [`Callback`] that reaches the same instance without re-locking it.

mod abi;
mod answer;
mod callback;
mod config;
mod dispatch;
mod error;
mod instance;
mod memory;
mod module;
mod query;
mod session;
mod state;

pub use abi::IMPORT_MODULE;
pub use answer::{Answer, Substitution};
pub use callback::{Callback, NestedQuery, Reply};
pub use config::{Config, Sink};
pub use error::{Error, Result};
pub use instance::{Prolog, Stats};
pub use memory::{ALIGN, PTR_SIZE};
pub use module::{GuestModule, MODULE_ENV};
pub use query::{Cancel, Query, QueryFlags, QueryOptions};
pub use session::Phase;

pub use wasmpl_term::{self as term, Atom, Compound, Term, Variable};
