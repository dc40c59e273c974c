//! Typed handles to the guest's export surface.

use wasmtime::{AsContextMut, Instance, Memory, TypedFunc, WasmParams, WasmResults};

use crate::error::{Error, Result};

/// Import module the guest expects host callbacks under.
pub const IMPORT_MODULE: &str = "trealla";

/// Bound exports of one instantiated guest. Cheap to clone: every field is a
/// store-scoped index.
#[derive(Clone)]
pub(crate) struct Abi {
    pub memory: Memory,
    pub realloc: TypedFunc<(i32, i32, i32, i32), i32>,
    pub free: TypedFunc<(i32, i32, i32), ()>,
    pub global: TypedFunc<(), i32>,
    pub query: TypedFunc<(i32, i32, i32, i32), i32>,
    pub redo: TypedFunc<i32, i32>,
    pub done: TypedFunc<i32, ()>,
    pub consult: TypedFunc<(i32, i32), i32>,
    pub capture: TypedFunc<i32, ()>,
    pub capture_read: TypedFunc<(i32, i32, i32, i32, i32), ()>,
    pub capture_free: TypedFunc<i32, ()>,
}

impl Abi {
    pub fn bind(mut store: impl AsContextMut, instance: &Instance) -> Result<Self> {
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or(Error::MissingExport("memory"))?;
        Ok(Abi {
            memory,
            realloc: export(&mut store, instance, "canonical_abi_realloc")?,
            free: export(&mut store, instance, "canonical_abi_free")?,
            global: export(&mut store, instance, "pl_global")?,
            query: export(&mut store, instance, "pl_query")?,
            redo: export(&mut store, instance, "pl_redo")?,
            done: export(&mut store, instance, "pl_done")?,
            consult: export(&mut store, instance, "pl_consult")?,
            capture: export(&mut store, instance, "pl_capture")?,
            capture_read: export(&mut store, instance, "pl_capture_read")?,
            capture_free: export(&mut store, instance, "pl_capture_free")?,
        })
    }
}

/// Look up an exported function and check its signature.
pub(crate) fn export<P, R>(
    mut store: impl AsContextMut,
    instance: &Instance,
    name: &'static str,
) -> Result<TypedFunc<P, R>>
where
    P: WasmParams,
    R: WasmResults,
{
    let func = instance
        .get_func(&mut store, name)
        .ok_or(Error::MissingExport(name))?;
    Ok(func.typed::<P, R>(&store)?)
}
