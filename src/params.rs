//! Requantization parameters for the `qs8_gemm_minmax_fp32` kernels.
//!
//! Every kernel flavour consumes the same four user-facing values (scale, output zero point and
//! the output clamping range), but wants them in a different precomputed form. All forms are
//! derived once in [`Qs8ConvMinmaxParams::new`].

use crate::error::{GemmError, Result};

/// `0x1.8p23`: adding it to a float in `[-2^22, 2^22]` places the rounded integer in the low mantissa bits.
pub const MAGIC_BIAS: f32 = 12582912.0;

/// Bit pattern of [`MAGIC_BIAS`].
pub const MAGIC_BIAS_BITS: i32 = 0x4B40_0000;

pub const MIN_SCALE: f32 = 1.0 / 4294967296.0;
pub const MAX_SCALE: f32 = 256.0;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FmagicParams {
    pub scale: f32,
    pub output_min_less_zero_point: f32,
    pub output_max_less_zero_point: f32,
    pub magic_bias: f32,
    pub magic_bias_less_output_zero_point: i32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ImagicParams {
    pub scale: f32,
    pub magic_bias: f32,
    pub magic_min: i32,
    pub magic_max: i32,
    pub magic_bias_less_zero_point: i32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LrintfParams {
    pub scale: f32,
    pub output_min_less_zero_point: f32,
    pub output_max_less_zero_point: f32,
    pub output_zero_point: i32,
}

/// Form shared by every x86 simd kernel.
///
/// The upper bound is applied in float before conversion, the lower bound after packing to
/// int8 (or int16 on sse2, which lacks a signed byte max).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SimdParams {
    pub scale: f32,
    pub output_max_less_zero_point: f32,
    pub output_zero_point: i16,
    pub output_min: i8,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Qs8ConvMinmaxParams {
    pub scale: f32,
    pub output_zero_point: i8,
    pub output_min: i8,
    pub output_max: i8,

    pub fmagic: FmagicParams,
    pub imagic: ImagicParams,
    pub lrintf: LrintfParams,
    pub simd: SimdParams,
}

impl Qs8ConvMinmaxParams {
    pub fn new(scale: f32, output_zero_point: i8, output_min: i8, output_max: i8) -> Result<Self> {
        if !(scale.is_finite() && (MIN_SCALE..MAX_SCALE).contains(&scale)) {
            return Err(GemmError::InvalidRequantizationScale(scale));
        }
        if output_min > output_max {
            return Err(GemmError::InvalidOutputRange {
                min: output_min,
                max: output_max,
            });
        }

        let zp = i32::from(output_zero_point);
        let min_less_zp = (i32::from(output_min) - zp) as f32;
        let max_less_zp = (i32::from(output_max) - zp) as f32;

        Ok(Self {
            scale,
            output_zero_point,
            output_min,
            output_max,
            fmagic: FmagicParams {
                scale,
                output_min_less_zero_point: min_less_zp,
                output_max_less_zero_point: max_less_zp,
                magic_bias: MAGIC_BIAS,
                magic_bias_less_output_zero_point: MAGIC_BIAS_BITS - zp,
            },
            imagic: ImagicParams {
                scale,
                magic_bias: MAGIC_BIAS,
                magic_min: (MAGIC_BIAS + min_less_zp).to_bits() as i32,
                magic_max: (MAGIC_BIAS + max_less_zp).to_bits() as i32,
                magic_bias_less_zero_point: MAGIC_BIAS_BITS - zp,
            },
            lrintf: LrintfParams {
                scale,
                output_min_less_zero_point: min_less_zp,
                output_max_less_zero_point: max_less_zp,
                output_zero_point: zp,
            },
            simd: SimdParams {
                scale,
                output_max_less_zero_point: max_less_zp,
                output_zero_point: i16::from(output_zero_point),
                output_min,
            },
        })
    }
}
