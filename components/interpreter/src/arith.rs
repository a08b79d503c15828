//! Arithmetic with Java semantics
//!
//! Integer arithmetic wraps. Division and remainder truncate toward zero
//! and `MIN / -1` wraps to `MIN` instead of trapping. Shift counts are
//! masked to the operand width. Float to integer conversions saturate,
//! which is exactly what Rust's `as` casts do (NaN becomes 0).

use num_traits::{CheckedDiv, CheckedRem, PrimInt, Signed, WrappingNeg};
use std::cmp::Ordering;

/// `a / b`, `None` when `b` is zero
pub fn div<T>(a: T, b: T) -> Option<T>
where
    T: PrimInt + Signed + CheckedDiv + WrappingNeg,
{
    if b.is_zero() {
        return None;
    }
    // only MIN / -1 overflows
    Some(a.checked_div(&b).unwrap_or_else(|| a.wrapping_neg()))
}

/// `a % b`, `None` when `b` is zero
pub fn rem<T>(a: T, b: T) -> Option<T>
where
    T: PrimInt + Signed + CheckedRem,
{
    if b.is_zero() {
        return None;
    }
    Some(a.checked_rem(&b).unwrap_or_else(T::zero))
}

/// `ishl`
pub fn ishl(a: i32, b: i32) -> i32 {
    a.wrapping_shl((b & 0x1f) as u32)
}

/// `ishr`
pub fn ishr(a: i32, b: i32) -> i32 {
    a.wrapping_shr((b & 0x1f) as u32)
}

/// `iushr`
pub fn iushr(a: i32, b: i32) -> i32 {
    ((a as u32) >> (b & 0x1f)) as i32
}

/// `lshl`
pub fn lshl(a: i64, b: i32) -> i64 {
    a.wrapping_shl((b & 0x3f) as u32)
}

/// `lshr`
pub fn lshr(a: i64, b: i32) -> i64 {
    a.wrapping_shr((b & 0x3f) as u32)
}

/// `lushr`
pub fn lushr(a: i64, b: i32) -> i64 {
    ((a as u64) >> (b & 0x3f)) as i64
}

/// `lcmp`
pub fn lcmp(a: i64, b: i64) -> i32 {
    match a.cmp(&b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// `fcmpl`/`fcmpg`/`dcmpl`/`dcmpg`: `nan_result` is returned when either
/// operand is NaN (-1 for the `l` forms, 1 for the `g` forms)
pub fn fcmp<T: PartialOrd>(a: T, b: T, nan_result: i32) -> i32 {
    match a.partial_cmp(&b) {
        Some(Ordering::Less) => -1,
        Some(Ordering::Equal) => 0,
        Some(Ordering::Greater) => 1,
        None => nan_result,
    }
}

/// `f2i`: saturating
pub fn f2i(value: f32) -> i32 {
    value as i32
}

/// `f2l`: saturating
pub fn f2l(value: f32) -> i64 {
    value as i64
}

/// `d2i`: saturating
pub fn d2i(value: f64) -> i32 {
    value as i32
}

/// `d2l`: saturating
pub fn d2l(value: f64) -> i64 {
    value as i64
}
