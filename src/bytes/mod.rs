//! Fixed-width little-endian field access shared across storage layers.
//!
//! Every numeric field the engine writes to disk — page headers, slot
//! entries, overflow chain links, index entries — goes through these helpers
//! so endianness is fixed regardless of platform.

use core::convert::TryInto;

/// Writes a `u16` at `off`.
pub fn put_u16(dst: &mut [u8], off: usize, v: u16) {
    dst[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

/// Reads a `u16` at `off`.
pub fn get_u16(src: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(src[off..off + 2].try_into().expect("u16 slice is 2 bytes"))
}

/// Writes a `u32` at `off`.
pub fn put_u32(dst: &mut [u8], off: usize, v: u32) {
    dst[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

/// Reads a `u32` at `off`.
pub fn get_u32(src: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(src[off..off + 4].try_into().expect("u32 slice is 4 bytes"))
}

/// Writes a `u64` at `off`.
pub fn put_u64(dst: &mut [u8], off: usize, v: u64) {
    dst[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Reads a `u64` at `off`.
pub fn get_u64(src: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(src[off..off + 8].try_into().expect("u64 slice is 8 bytes"))
}

/// Writes an `i64` at `off` (two's complement, little-endian).
pub fn put_i64(dst: &mut [u8], off: usize, v: i64) {
    put_u64(dst, off, v as u64);
}

/// Reads an `i64` at `off`.
pub fn get_i64(src: &[u8], off: usize) -> i64 {
    get_u64(src, off) as i64
}

/// Writes an `f64` at `off` as its IEEE-754 bit pattern.
pub fn put_f64(dst: &mut [u8], off: usize, v: f64) {
    put_u64(dst, off, v.to_bits());
}

/// Reads an `f64` at `off`.
pub fn get_f64(src: &[u8], off: usize) -> f64 {
    f64::from_bits(get_u64(src, off))
}
