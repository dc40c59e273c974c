//! Compiled guest templates.
//!
//! Compilation is the expensive part of starting an engine, so a compiled
//! module is shared read-only by every instance built from it. Each
//! instantiation only pays for its own linear memory.

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use wasmtime::{Engine, Module};

use crate::error::{Error, Result};

/// Environment variable naming the guest used by [`GuestModule::shared`].
pub const MODULE_ENV: &str = "WASMPL_MODULE";

const DEFAULT_MODULE_PATH: &str = "tpl.wasm";

static SHARED: OnceCell<GuestModule> = OnceCell::new();

/// A compiled guest module and the engine it was compiled for.
#[derive(Clone)]
pub struct GuestModule {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Engine,
    module: Module,
}

impl GuestModule {
    /// Compile a `.wasm` binary (or `.wat` text) from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let engine = Engine::default();
        let module = Module::from_file(&engine, path)?;
        tracing::debug!(target: "wasmpl", path = %path.display(), "compiled guest module");
        Ok(Self::assemble(engine, module))
    }

    /// Compile from bytes; accepts the binary format or WebAssembly text.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let engine = Engine::default();
        let module = Module::new(&engine, bytes)?;
        Ok(Self::assemble(engine, module))
    }

    /// Process-wide template, compiled on first use from the file named by
    /// `WASMPL_MODULE` (default `tpl.wasm`). A failed compile is not cached.
    pub fn shared() -> Result<Self> {
        SHARED
            .get_or_try_init(|| {
                let path = std::env::var(MODULE_ENV)
                    .unwrap_or_else(|_| DEFAULT_MODULE_PATH.to_string());
                tracing::info!(target: "wasmpl", %path, "loading shared guest module");
                if !Path::new(&path).exists() {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("guest module {} not found (set {})", path, MODULE_ENV),
                    )));
                }
                Self::from_file(&path)
            })
            .cloned()
    }

    fn assemble(engine: Engine, module: Module) -> Self {
        GuestModule {
            inner: Arc::new(Inner { engine, module }),
        }
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    pub(crate) fn module(&self) -> &Module {
        &self.inner.module
    }
}

impl std::fmt::Debug for GuestModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestModule")
            .field("name", &self.inner.module.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_text_modules() {
        let module = GuestModule::from_bytes(r#"(module (memory (export "memory") 1))"#).unwrap();
        assert!(module.module().get_export("memory").is_some());
    }

    #[test]
    fn rejects_garbage() {
        assert!(GuestModule::from_bytes(b"not wasm at all").is_err());
    }

    #[test]
    fn clones_share_the_compiled_module() {
        let a = GuestModule::from_bytes("(module)").unwrap();
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }
}
