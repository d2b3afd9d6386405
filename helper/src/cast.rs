//! Casting.
//!
//! Lossless integer casts used for heights, counts and batch sizes.
//!
//! `#[no_std]` compatible.
//!
//! # 64-bit invariant
//! Cinder only builds on 64-bit targets, so every cast in this module is lossless.

#![allow(clippy::cast_possible_truncation, reason = "64-bit invariant")]

#[cfg(not(target_pointer_width = "64"))]
compile_error!("Cinder is only compatible with 64-bit CPUs");

/// Cast [`u64`] to [`usize`].
#[inline(always)]
pub const fn u64_to_usize(u: u64) -> usize {
    u as usize
}

/// Cast [`usize`] to [`u64`].
#[inline(always)]
pub const fn usize_to_u64(u: usize) -> u64 {
    u as u64
}
