//! Scalar fp32 requantization of int32 accumulators to int8.
//!
//! [`requantize_fp32`] is the reference every kernel is checked against. The three scalar
//! variants compute the same value with the tricks the scalar kernels use.

use crate::params::{FmagicParams, ImagicParams, LrintfParams};

/// `clamp(round_ties_even(clamp(acc * scale, min - zp, max - zp)) + zp)`, in f32 arithmetic.
#[inline]
pub fn requantize_fp32(acc: i32, scale: f32, zero_point: i8, min: i8, max: i8) -> i8 {
    let zp = i32::from(zero_point);
    let lo = (i32::from(min) - zp) as f32;
    let hi = (i32::from(max) - zp) as f32;

    let scaled = acc as f32 * scale;
    let clamped = scaled.max(lo).min(hi);
    (clamped.round_ties_even() as i32 + zp) as i8
}

#[inline(always)]
pub fn requantize_fmagic(acc: i32, p: &FmagicParams) -> i8 {
    let mut x = acc as f32 * p.scale;
    x = x.max(p.output_min_less_zero_point);
    x = x.min(p.output_max_less_zero_point);
    x += p.magic_bias;
    (x.to_bits() as i32).wrapping_sub(p.magic_bias_less_output_zero_point) as i8
}

#[inline(always)]
pub fn requantize_imagic(acc: i32, p: &ImagicParams) -> i8 {
    let x = acc as f32 * p.scale + p.magic_bias;
    let mut out = x.to_bits() as i32;
    out = out.max(p.magic_min);
    out = out.min(p.magic_max);
    out.wrapping_sub(p.magic_bias_less_zero_point) as i8
}

#[inline(always)]
pub fn requantize_lrintf(acc: i32, p: &LrintfParams) -> i8 {
    let mut x = acc as f32 * p.scale;
    x = x.max(p.output_min_less_zero_point);
    x = x.min(p.output_max_less_zero_point);
    (x.round_ties_even() as i32 + p.output_zero_point) as i8
}
