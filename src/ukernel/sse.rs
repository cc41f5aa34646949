//! sse2, ssse3 and sse4.1 kernels with 4 output columns (`4c2`, `4c8`).
//!
//! The bodies are generic over the sse level and the weight load width, and are always inlined
//! into the `#[target_feature]` entry points generated by `build.rs`. The avx kernels are the
//! sse4.1 bodies compiled with vex encoding.

use core::arch::x86_64::*;

use super::{load_tail8, tile_rows};
use crate::params::Qs8ConvMinmaxParams;

pub trait SseLevel {
    /// Sign extends the low 8 bytes to 8 int16 lanes.
    unsafe fn sext_lo(v: __m128i) -> __m128i;
    /// Sign extends all 16 bytes to two vectors of 8 int16 lanes.
    unsafe fn sext(v: __m128i) -> (__m128i, __m128i);
    /// Reduces four vectors of partial column sums to `[c0, c1, c2, c3]`.
    unsafe fn reduce4(x0: __m128i, x1: __m128i, x2: __m128i, x3: __m128i) -> __m128i;
    unsafe fn output_min(params: &Qs8ConvMinmaxParams) -> __m128i;
    /// Packs 8 saturated int16 outputs to int8 and applies the lower bound.
    unsafe fn pack_clamp(v: __m128i, vmin: __m128i) -> __m128i;
}

pub struct Sse2;
pub struct Ssse3;
pub struct Sse41;

#[inline(always)]
unsafe fn sse2_sext_lo(v: __m128i) -> __m128i {
    unsafe { _mm_srai_epi16(_mm_unpacklo_epi8(v, v), 8) }
}

#[inline(always)]
unsafe fn sse2_sext(v: __m128i) -> (__m128i, __m128i) {
    unsafe {
        let sign = _mm_cmpgt_epi8(_mm_setzero_si128(), v);
        (_mm_unpacklo_epi8(v, sign), _mm_unpackhi_epi8(v, sign))
    }
}

#[inline(always)]
unsafe fn hadd_reduce4(x0: __m128i, x1: __m128i, x2: __m128i, x3: __m128i) -> __m128i {
    unsafe { _mm_hadd_epi32(_mm_hadd_epi32(x0, x1), _mm_hadd_epi32(x2, x3)) }
}

#[inline(always)]
unsafe fn sse2_output_min(params: &Qs8ConvMinmaxParams) -> __m128i {
    unsafe { _mm_set1_epi16(i16::from(params.simd.output_min)) }
}

#[inline(always)]
unsafe fn sse2_pack_clamp(v: __m128i, vmin: __m128i) -> __m128i {
    unsafe {
        let v = _mm_max_epi16(v, vmin);
        _mm_packs_epi16(v, v)
    }
}

impl SseLevel for Sse2 {
    #[inline(always)]
    unsafe fn sext_lo(v: __m128i) -> __m128i {
        unsafe { sse2_sext_lo(v) }
    }

    #[inline(always)]
    unsafe fn sext(v: __m128i) -> (__m128i, __m128i) {
        unsafe { sse2_sext(v) }
    }

    #[inline(always)]
    unsafe fn reduce4(x0: __m128i, x1: __m128i, x2: __m128i, x3: __m128i) -> __m128i {
        unsafe {
            // [x0 02, x1 02, x0 13, x1 13] and the same for x2, x3
            let x01 = _mm_add_epi32(_mm_unpacklo_epi32(x0, x1), _mm_unpackhi_epi32(x0, x1));
            let x23 = _mm_add_epi32(_mm_unpacklo_epi32(x2, x3), _mm_unpackhi_epi32(x2, x3));
            _mm_add_epi32(_mm_unpacklo_epi64(x01, x23), _mm_unpackhi_epi64(x01, x23))
        }
    }

    #[inline(always)]
    unsafe fn output_min(params: &Qs8ConvMinmaxParams) -> __m128i {
        unsafe { sse2_output_min(params) }
    }

    #[inline(always)]
    unsafe fn pack_clamp(v: __m128i, vmin: __m128i) -> __m128i {
        unsafe { sse2_pack_clamp(v, vmin) }
    }
}

impl SseLevel for Ssse3 {
    #[inline(always)]
    unsafe fn sext_lo(v: __m128i) -> __m128i {
        unsafe { sse2_sext_lo(v) }
    }

    #[inline(always)]
    unsafe fn sext(v: __m128i) -> (__m128i, __m128i) {
        unsafe { sse2_sext(v) }
    }

    #[inline(always)]
    unsafe fn reduce4(x0: __m128i, x1: __m128i, x2: __m128i, x3: __m128i) -> __m128i {
        unsafe { hadd_reduce4(x0, x1, x2, x3) }
    }

    #[inline(always)]
    unsafe fn output_min(params: &Qs8ConvMinmaxParams) -> __m128i {
        unsafe { sse2_output_min(params) }
    }

    #[inline(always)]
    unsafe fn pack_clamp(v: __m128i, vmin: __m128i) -> __m128i {
        unsafe { sse2_pack_clamp(v, vmin) }
    }
}

impl SseLevel for Sse41 {
    #[inline(always)]
    unsafe fn sext_lo(v: __m128i) -> __m128i {
        unsafe { _mm_cvtepi8_epi16(v) }
    }

    #[inline(always)]
    unsafe fn sext(v: __m128i) -> (__m128i, __m128i) {
        unsafe { (_mm_cvtepi8_epi16(v), _mm_cvtepi8_epi16(_mm_srli_si128(v, 8))) }
    }

    #[inline(always)]
    unsafe fn reduce4(x0: __m128i, x1: __m128i, x2: __m128i, x3: __m128i) -> __m128i {
        unsafe { hadd_reduce4(x0, x1, x2, x3) }
    }

    #[inline(always)]
    unsafe fn output_min(params: &Qs8ConvMinmaxParams) -> __m128i {
        unsafe { _mm_set1_epi8(params.simd.output_min) }
    }

    #[inline(always)]
    unsafe fn pack_clamp(v: __m128i, vmin: __m128i) -> __m128i {
        unsafe { _mm_max_epi8(_mm_packs_epi16(v, v), vmin) }
    }
}

pub trait WeightLoad {
    const WIDE: bool;
}

/// Weights are loaded 8 bytes at a time.
pub struct Ld64;
/// Weights are loaded 16 bytes at a time and both halves are sign extended.
pub struct Ld128;

impl WeightLoad for Ld64 {
    const WIDE: bool = false;
}

impl WeightLoad for Ld128 {
    const WIDE: bool = true;
}

/// Loads 32 bytes of packed weights as four vectors of 8 int16 lanes.
#[inline(always)]
unsafe fn load_b32<I: SseLevel, L: WeightLoad>(w: *const u8) -> [__m128i; 4] {
    unsafe {
        if L::WIDE {
            let (b0, b1) = I::sext(_mm_loadu_si128(w as *const __m128i));
            let (b2, b3) = I::sext(_mm_loadu_si128(w.add(16) as *const __m128i));
            [b0, b1, b2, b3]
        } else {
            [
                I::sext_lo(_mm_loadl_epi64(w as *const __m128i)),
                I::sext_lo(_mm_loadl_epi64(w.add(8) as *const __m128i)),
                I::sext_lo(_mm_loadl_epi64(w.add(16) as *const __m128i)),
                I::sext_lo(_mm_loadl_epi64(w.add(24) as *const __m128i)),
            ]
        }
    }
}

#[inline(always)]
unsafe fn load_a8<I: SseLevel>(a: *const i8) -> __m128i {
    unsafe { I::sext_lo(_mm_loadl_epi64(a as *const __m128i)) }
}

#[inline(always)]
unsafe fn load_a_tail<I: SseLevel>(a: *const i8, len: usize) -> __m128i {
    unsafe {
        let buf = load_tail8(a, len);
        I::sext_lo(_mm_loadl_epi64(buf.as_ptr() as *const __m128i))
    }
}

pub(crate) struct SseOutput {
    scale: __m128,
    max_less_zero_point: __m128,
    zero_point: __m128i,
    min: __m128i,
}

impl SseOutput {
    #[inline(always)]
    pub(crate) unsafe fn new<I: SseLevel>(params: &Qs8ConvMinmaxParams) -> Self {
        unsafe {
            Self {
                scale: _mm_set1_ps(params.simd.scale),
                max_less_zero_point: _mm_set1_ps(params.simd.output_max_less_zero_point),
                zero_point: _mm_set1_epi16(params.simd.output_zero_point),
                min: I::output_min(params),
            }
        }
    }

    /// Requantizes `[c0, c1, c2, c3]` int32 accumulators, leaving the int8 results in the low 4 bytes.
    #[inline(always)]
    pub(crate) unsafe fn requantize<I: SseLevel>(&self, acc: __m128i) -> __m128i {
        unsafe {
            let mut f = _mm_cvtepi32_ps(acc);
            f = _mm_mul_ps(f, self.scale);
            f = _mm_min_ps(f, self.max_less_zero_point);
            let v = _mm_cvtps_epi32(f);
            let v = _mm_adds_epi16(_mm_packs_epi32(v, v), self.zero_point);
            I::pack_clamp(v, self.min)
        }
    }
}

/// Stores the low `n <= 4` bytes of `v`.
#[inline(always)]
unsafe fn store4(c: *mut i8, v: __m128i, n: usize) {
    unsafe {
        let bits = _mm_cvtsi128_si32(v);
        if n >= 4 {
            (c as *mut i32).write_unaligned(bits);
        } else {
            let bytes = bits.to_le_bytes();
            core::ptr::copy_nonoverlapping(bytes.as_ptr() as *const i8, c, n);
        }
    }
}

/// Broadcasts the int16 pair `P` of `a` to every int32 lane.
#[inline(always)]
unsafe fn pair<const P: usize>(a: __m128i) -> __m128i {
    unsafe {
        match P {
            0 => _mm_shuffle_epi32(a, 0b00_00_00_00),
            1 => _mm_shuffle_epi32(a, 0b01_01_01_01),
            2 => _mm_shuffle_epi32(a, 0b10_10_10_10),
            _ => _mm_shuffle_epi32(a, 0b11_11_11_11),
        }
    }
}

/// `MRx4c2`: each k pair of `A` is broadcast and multiplied with 4 columns at once, so the
/// accumulators already hold `[c0, c1, c2, c3]`.
#[inline(always)]
pub unsafe fn gemm_4c2<I: SseLevel, L: WeightLoad, const MR: usize>(
    mr: usize,
    nc: usize,
    kc: usize,
    a: *const i8,
    a_stride: usize,
    w: *const u8,
    c: *mut i8,
    cm_stride: usize,
    cn_stride: usize,
    params: &Qs8ConvMinmaxParams,
) {
    debug_assert!(nc != 0);
    debug_assert!(kc != 0);

    unsafe {
        let (a_rows, mut c_rows) = tile_rows::<MR>(mr, a, a_stride, c, cm_stride);
        let out = SseOutput::new::<I>(params);

        let kc_main = kc & !7;
        let kc_tail = kc & 7;

        let mut w = w;
        let mut nc = nc;

        loop {
            let bias = _mm_loadu_si128(w as *const __m128i);
            w = w.add(16);
            let mut acc = [bias; MR];

            let mut k = 0;
            while k < kc_main {
                let b = load_b32::<I, L>(w);
                w = w.add(32);
                for i in 0..MR {
                    let va = load_a8::<I>(a_rows[i].add(k));
                    acc[i] = _mm_add_epi32(acc[i], _mm_madd_epi16(pair::<0>(va), b[0]));
                    acc[i] = _mm_add_epi32(acc[i], _mm_madd_epi16(pair::<1>(va), b[1]));
                    acc[i] = _mm_add_epi32(acc[i], _mm_madd_epi16(pair::<2>(va), b[2]));
                    acc[i] = _mm_add_epi32(acc[i], _mm_madd_epi16(pair::<3>(va), b[3]));
                }
                k += 8;
            }

            if kc_tail != 0 {
                // weights are padded to whole k pairs, 8 bytes per pair
                let pairs = kc_tail.div_ceil(2);
                let mut va = [_mm_setzero_si128(); MR];
                for i in 0..MR {
                    va[i] = load_a_tail::<I>(a_rows[i].add(k), kc_tail);
                }

                for p in 0..pairs {
                    let b = I::sext_lo(_mm_loadl_epi64(w.add(8 * p) as *const __m128i));
                    for i in 0..MR {
                        let va = match p {
                            0 => pair::<0>(va[i]),
                            1 => pair::<1>(va[i]),
                            2 => pair::<2>(va[i]),
                            _ => pair::<3>(va[i]),
                        };
                        acc[i] = _mm_add_epi32(acc[i], _mm_madd_epi16(va, b));
                    }
                }
                w = w.add(8 * pairs);
            }

            let n = Ord::min(nc, 4);
            for i in 0..MR {
                store4(c_rows[i], out.requantize::<I>(acc[i]), n);
            }

            if nc <= 4 {
                return;
            }
            nc -= 4;
            for row in &mut c_rows {
                *row = row.wrapping_add(cn_stride);
            }
        }
    }
}

/// `MRx4c8`: one accumulator per row and column holding 4 partial sums, reduced horizontally
/// before requantization. `kc` is padded to 8 in the packed weights.
#[inline(always)]
pub unsafe fn gemm_4c8<I: SseLevel, L: WeightLoad, const MR: usize>(
    mr: usize,
    nc: usize,
    kc: usize,
    a: *const i8,
    a_stride: usize,
    w: *const u8,
    c: *mut i8,
    cm_stride: usize,
    cn_stride: usize,
    params: &Qs8ConvMinmaxParams,
) {
    debug_assert!(nc != 0);
    debug_assert!(kc != 0);

    unsafe {
        let (a_rows, mut c_rows) = tile_rows::<MR>(mr, a, a_stride, c, cm_stride);
        let out = SseOutput::new::<I>(params);

        let kc_main = kc & !7;
        let kc_tail = kc & 7;

        let mut w = w;
        let mut nc = nc;

        loop {
            let bias = w as *const i32;
            let b0 = _mm_cvtsi32_si128(bias.read_unaligned());
            let b1 = _mm_cvtsi32_si128(bias.add(1).read_unaligned());
            let b2 = _mm_cvtsi32_si128(bias.add(2).read_unaligned());
            let b3 = _mm_cvtsi32_si128(bias.add(3).read_unaligned());
            w = w.add(16);
            let mut acc = [[b0, b1, b2, b3]; MR];

            let mut k = 0;
            while k < kc_main {
                let b = load_b32::<I, L>(w);
                w = w.add(32);
                for i in 0..MR {
                    let va = load_a8::<I>(a_rows[i].add(k));
                    for j in 0..4 {
                        acc[i][j] = _mm_add_epi32(acc[i][j], _mm_madd_epi16(va, b[j]));
                    }
                }
                k += 8;
            }

            if kc_tail != 0 {
                let b = load_b32::<I, L>(w);
                w = w.add(32);
                for i in 0..MR {
                    let va = load_a_tail::<I>(a_rows[i].add(k), kc_tail);
                    for j in 0..4 {
                        acc[i][j] = _mm_add_epi32(acc[i][j], _mm_madd_epi16(va, b[j]));
                    }
                }
            }

            let n = Ord::min(nc, 4);
            for i in 0..MR {
                let [x0, x1, x2, x3] = acc[i];
                let v = I::reduce4(x0, x1, x2, x3);
                store4(c_rows[i], out.requantize::<I>(v), n);
            }

            if nc <= 4 {
                return;
            }
            nc -= 4;
            for row in &mut c_rows {
                *row = row.wrapping_add(cn_stride);
            }
        }
    }
}
