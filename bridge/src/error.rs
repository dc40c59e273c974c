use std::collections::BTreeMap;

use wasmpl_term::{EncodeError, ParseError, Term};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong between host and guest.
///
/// `Failure` and `Thrown` are ordinary query outcomes; the rest are bridge
/// faults that abort only the operation that raised them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("guest allocator could not provide {size} bytes")]
    OutOfMemory { size: usize },

    #[error("access of {len} bytes at {ptr:#x} is outside guest memory ({size} bytes)")]
    MemoryFault { ptr: u32, len: usize, size: usize },

    #[error("string contains an interior NUL byte")]
    InteriorNul,

    #[error("could not decode guest output: {0}")]
    Decode(#[from] ParseError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("query failed")]
    Failure,

    #[error("query threw {ball}")]
    Thrown {
        ball: Term,
        /// Bindings reported with the exception, when the query asked for them.
        bindings: BTreeMap<String, Term>,
    },

    #[error("engine instance is closed")]
    EngineUnavailable,

    #[error("no host predicate registered for {name}/{arity}")]
    UnregisteredPredicate { name: String, arity: usize },

    #[error("host call from unknown subquery {0:#x}")]
    UnknownSubquery(i32),

    #[error("query cancelled")]
    Cancelled,

    #[error("guest module does not export `{0}`")]
    MissingExport(&'static str),

    #[error("failed to consult {0}")]
    Consult(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("guest trapped: {0:#}")]
    Guest(wasmtime::Error),
}

impl Error {
    /// Is this a thrown `error(syntax_error(_), _)`?
    pub fn is_syntax_error(&self) -> bool {
        match self {
            Error::Thrown { ball, .. } => {
                ball.is_functor("error", 2)
                    && ball.args()[0].name().is_some_and(|n| n == "syntax_error")
            }
            _ => false,
        }
    }

    /// The exception term, for `Thrown`.
    pub fn ball(&self) -> Option<&Term> {
        match self {
            Error::Thrown { ball, .. } => Some(ball),
            _ => None,
        }
    }
}

/// Host-import errors cross the guest boundary as traps; recover the typed
/// error when the trap carries one.
impl From<wasmtime::Error> for Error {
    fn from(err: wasmtime::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            Err(err) => Error::Guest(err),
        }
    }
}
