//! Bounds-checked transfers over guest linear memory.
//!
//! The hookr host module moves every request, response and error string
//! across the host/guest boundary with these two primitives. Both take the
//! raw linear-memory slice of the guest module and fail with
//! [`Error::OutOfBounds`] when a range is not fully addressable, so a
//! misbehaving guest can never cause a silent truncation: the error traps the
//! invocation it occurred in.

use crate::error::{Error, Result};

/// Copy `count` bytes out of guest memory at `offset`.
///
/// `field` names the transfer for error reporting ("operation", "payload",
/// ...). Returns an owned copy; the host never retains a view into guest
/// memory across a call boundary.
pub(crate) fn read_bytes(mem: &[u8], field: &'static str, offset: u32, count: u32) -> Result<Vec<u8>> {
    let range = checked_range(mem.len(), field, offset, count)?;
    Ok(mem[range].to_vec())
}

/// Copy `count` bytes out of guest memory and interpret them as UTF-8.
///
/// Invalid sequences are replaced rather than rejected: the wire protocol
/// treats operation names and error strings as byte payloads, and a guest
/// that hands over broken UTF-8 should see its call proceed, not trap.
pub(crate) fn read_string(mem: &[u8], field: &'static str, offset: u32, count: u32) -> Result<String> {
    let bytes = read_bytes(mem, field, offset, count)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Copy `data` into guest memory at `offset`.
pub(crate) fn write_bytes(mem: &mut [u8], field: &'static str, offset: u32, data: &[u8]) -> Result<()> {
    let count = u32_from_usize(data.len())?;
    let range = checked_range(mem.len(), field, offset, count)?;
    mem[range].copy_from_slice(data);
    Ok(())
}

/// Validate `offset..offset+count` against a memory of `len` bytes.
fn checked_range(
    len: usize,
    field: &'static str,
    offset: u32,
    count: u32,
) -> Result<std::ops::Range<usize>> {
    let start = offset as usize;
    let end = start
        .checked_add(count as usize)
        .ok_or(Error::OutOfBounds { field, offset, count })?;
    if end > len {
        return Err(Error::OutOfBounds { field, offset, count });
    }
    Ok(start..end)
}

/// Narrow a `usize` to `u32`, rejecting values that do not fit.
///
/// Lengths crossing the ABI travel as `i32`; anything above `u32::MAX` has no
/// representation on the wire.
pub(crate) fn u32_from_usize(v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::Internal(format!("{v} cannot be represented as u32")))
}
