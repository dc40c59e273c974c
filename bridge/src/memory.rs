//! Linear-memory allocator bridge.
//!
//! Every guest allocation goes through the guest's own
//! `canonical_abi_realloc`/`canonical_abi_free`, so the host never has to know
//! the guest's heap layout. All helpers work on any store context: the locked
//! `Store` behind a `Prolog`, or the `Caller` inside a host callback.

use wasmtime::{AsContext, AsContextMut};
use wasmpl_term::ParseError;

use crate::abi::Abi;
use crate::error::{Error, Result};
use crate::state::HostState;

/// Guest pointer width in bytes (wasm32).
pub const PTR_SIZE: usize = 4;

/// Alignment passed to the guest allocator. The guest packs byte strings.
pub const ALIGN: i32 = 1;

/// Exports of a live instance, regardless of any pending close.
pub(crate) fn bound(ctx: &impl AsContext<Data = HostState>) -> Result<Abi> {
    ctx.as_context()
        .data()
        .abi
        .clone()
        .ok_or(Error::EngineUnavailable)
}

/// Allocate `size` bytes of guest memory.
pub(crate) fn alloc_in(ctx: &mut impl AsContextMut<Data = HostState>, size: usize) -> Result<i32> {
    let abi = bound(&*ctx)?;
    let len = i32::try_from(size).map_err(|_| Error::OutOfMemory { size })?;
    let ptr = abi.realloc.call(&mut *ctx, (0, 0, ALIGN, len))?;
    if ptr == 0 {
        tracing::warn!(target: "wasmpl", size, "guest allocator exhausted");
        return Err(Error::OutOfMemory { size });
    }
    Ok(ptr)
}

/// Return `size` bytes at `ptr` to the guest. Freeing null does nothing.
pub(crate) fn free_in(ctx: &mut impl AsContextMut<Data = HostState>, ptr: i32, size: usize) -> Result<()> {
    if ptr == 0 {
        return Ok(());
    }
    let abi = bound(&*ctx)?;
    abi.free.call(&mut *ctx, (ptr, size as i32, ALIGN))?;
    Ok(())
}

/// Check `ptr..ptr+len` against the current memory size.
fn span(ptr: i32, len: usize, size: usize) -> Result<std::ops::Range<usize>> {
    let start = ptr as u32 as usize;
    match start.checked_add(len) {
        Some(end) if end <= size => Ok(start..end),
        _ => Err(Error::MemoryFault {
            ptr: ptr as u32,
            len,
            size,
        }),
    }
}

pub(crate) fn read_bytes(ctx: &impl AsContext<Data = HostState>, ptr: i32, len: usize) -> Result<Vec<u8>> {
    let abi = bound(&*ctx)?;
    let data = abi.memory.data(ctx.as_context());
    let range = span(ptr, len, data.len())?;
    Ok(data[range].to_vec())
}

pub(crate) fn write_bytes(ctx: &mut impl AsContextMut<Data = HostState>, ptr: i32, bytes: &[u8]) -> Result<()> {
    let abi = bound(&*ctx)?;
    let data = abi.memory.data_mut(ctx.as_context_mut());
    let range = span(ptr, bytes.len(), data.len())?;
    data[range].copy_from_slice(bytes);
    Ok(())
}

/// Read the little-endian pointer stored at `ptr`.
pub(crate) fn read_indirect(ctx: &impl AsContext<Data = HostState>, ptr: i32) -> Result<i32> {
    let bytes = read_bytes(ctx, ptr, PTR_SIZE)?;
    let mut word = [0u8; PTR_SIZE];
    word.copy_from_slice(&bytes);
    Ok(i32::from_le_bytes(word))
}

pub(crate) fn write_indirect(ctx: &mut impl AsContextMut<Data = HostState>, ptr: i32, value: i32) -> Result<()> {
    write_bytes(ctx, ptr, &value.to_le_bytes())
}

/// Read `len` bytes at `ptr` as UTF-8. Invalid UTF-8 is a decode error.
pub(crate) fn read_string(ctx: &impl AsContext<Data = HostState>, ptr: i32, len: usize) -> Result<String> {
    let bytes = read_bytes(ctx, ptr, len)?;
    utf8(bytes)
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| {
        let offset = e.utf8_error().valid_up_to();
        let bytes = e.into_bytes();
        let end = bytes.len().min(offset + 24);
        Error::Decode(ParseError {
            message: "invalid UTF-8 in guest memory".to_string(),
            fragment: String::from_utf8_lossy(&bytes[offset..end]).into_owned(),
            offset,
        })
    })
}

/// Copy `text` into fresh guest memory as a NUL-terminated string.
/// Returns the pointer and the allocation size (including the NUL).
/// The caller owns the buffer.
pub(crate) fn alloc_cstring(ctx: &mut impl AsContextMut<Data = HostState>, text: &str) -> Result<(i32, usize)> {
    if text.as_bytes().contains(&0) {
        return Err(Error::InteriorNul);
    }
    let size = text.len() + 1;
    let ptr = alloc_in(ctx, size)?;
    let mut bytes = Vec::with_capacity(size);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(0);
    if let Err(e) = write_bytes(ctx, ptr, &bytes) {
        let _ = free_in(ctx, ptr, size);
        return Err(e);
    }
    Ok((ptr, size))
}

/// Run `f` with `text` as a guest C string; the buffer is freed afterwards
/// whether `f` succeeds or not.
pub(crate) fn with_cstring<C, T>(
    ctx: &mut C,
    text: &str,
    f: impl FnOnce(&mut C, i32) -> Result<T>,
) -> Result<T>
where
    C: AsContextMut<Data = HostState>,
{
    let (ptr, size) = alloc_cstring(ctx, text)?;
    let result = f(ctx, ptr);
    let freed = free_in(ctx, ptr, size);
    let value = result?;
    freed?;
    Ok(value)
}

/// Run `f` with `n` zeroed pointer-width slots; freed afterwards on every path.
pub(crate) fn with_slots<C, T>(
    ctx: &mut C,
    n: usize,
    f: impl FnOnce(&mut C, i32) -> Result<T>,
) -> Result<T>
where
    C: AsContextMut<Data = HostState>,
{
    let size = n * PTR_SIZE;
    let ptr = alloc_in(ctx, size)?;
    if let Err(e) = write_bytes(ctx, ptr, &vec![0u8; size]) {
        let _ = free_in(ctx, ptr, size);
        return Err(e);
    }
    let result = f(ctx, ptr);
    let freed = free_in(ctx, ptr, size);
    let value = result?;
    freed?;
    Ok(value)
}

/// Current linear memory size in bytes.
pub(crate) fn memory_size(ctx: &impl AsContext<Data = HostState>) -> usize {
    match &ctx.as_context().data().abi {
        Some(abi) => abi.memory.data_size(ctx.as_context()),
        None => 0,
    }
}
