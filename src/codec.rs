//! Low-level serialization helpers.
//!
//! All multi-byte integers in the wire formats are big-endian. Variable
//! fields carry a 2-byte length header. Optional hashes are fixed-width
//! with the all-zero value as the null sentinel.
//!
//! Every helper takes the [`Layer`] it is decoding for, so errors carry
//! the right layer tag.

use crate::error::{BlocktreeError, Result, SerializationReason};
use crate::types::{BlockHash, Hash256, Layer, HASH_LEN};

/// Maximum byte length of a 2-byte length-prefixed variable field.
pub const MAX_VAR_LEN: usize = u16::MAX as usize;

fn out_of_bounds(layer: Layer) -> BlocktreeError {
    BlocktreeError::serialization(layer, SerializationReason::ArgumentOutOfBounds)
}

/// Appends `value` as a big-endian unsigned integer of `width` bytes.
///
/// `width` must be 1, 2, 4, or 8; values that do not fit the width are
/// rejected with `argument_out_of_bounds`.
pub fn put_uint(layer: Layer, buf: &mut Vec<u8>, value: u64, width: usize) -> Result<()> {
    let max = match width {
        1 => u8::MAX as u64,
        2 => u16::MAX as u64,
        4 => u32::MAX as u64,
        8 => u64::MAX,
        _ => return Err(out_of_bounds(layer)),
    };
    if value > max {
        return Err(out_of_bounds(layer));
    }
    buf.extend_from_slice(&value.to_be_bytes()[8 - width..]);
    Ok(())
}

/// Reads a big-endian unsigned integer of `width` bytes at `*offset`,
/// advancing the offset. Truncated input is `argument_out_of_bounds`.
pub fn get_uint(layer: Layer, bytes: &[u8], offset: &mut usize, width: usize) -> Result<u64> {
    if !matches!(width, 1 | 2 | 4 | 8) {
        return Err(out_of_bounds(layer));
    }
    let end = offset
        .checked_add(width)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| out_of_bounds(layer))?;

    let mut value = 0u64;
    for &b in &bytes[*offset..end] {
        value = (value << 8) | u64::from(b);
    }
    *offset = end;
    Ok(value)
}

/// Appends a 2-byte length header followed by `field`.
pub fn put_var_bytes(layer: Layer, buf: &mut Vec<u8>, field: &[u8]) -> Result<()> {
    if field.len() > MAX_VAR_LEN {
        return Err(out_of_bounds(layer));
    }
    put_uint(layer, buf, field.len() as u64, 2)?;
    buf.extend_from_slice(field);
    Ok(())
}

/// Reads a 2-byte length-prefixed variable field at `*offset`.
pub fn get_var_bytes(layer: Layer, bytes: &[u8], offset: &mut usize) -> Result<Vec<u8>> {
    let len = get_uint(layer, bytes, offset, 2)? as usize;
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| out_of_bounds(layer))?;
    let field = bytes[*offset..end].to_vec();
    *offset = end;
    Ok(field)
}

/// Appends a fixed-width hash field, all zeros when `hash` is absent.
pub fn put_opt_hash(buf: &mut Vec<u8>, hash: Option<&BlockHash>) {
    match hash {
        Some(h) => buf.extend_from_slice(h.as_bytes()),
        None => buf.extend_from_slice(&[0u8; HASH_LEN]),
    }
}

/// Reads a fixed-width hash field at `*offset`; all zeros decodes to
/// `None`. Truncated input is `invalid_hash`.
pub fn get_opt_hash(layer: Layer, bytes: &[u8], offset: &mut usize) -> Result<Option<BlockHash>> {
    let end = offset
        .checked_add(HASH_LEN)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| {
            BlocktreeError::serialization(layer, SerializationReason::InvalidHash)
        })?;
    let mut arr = [0u8; HASH_LEN];
    arr.copy_from_slice(&bytes[*offset..end]);
    *offset = end;
    if arr == [0u8; HASH_LEN] {
        Ok(None)
    } else {
        Ok(Some(BlockHash(Hash256(arr))))
    }
}
