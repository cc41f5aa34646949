//! `MRx16c8` kernels for avx512 f + bw + dq + vl.

use core::arch::x86_64::*;

use super::{load_tail8, tile_rows};
use crate::params::Qs8ConvMinmaxParams;

// after the unpack reduction, 128 bit block `b` holds columns `[b, 8 + b, 4 + b, 12 + b]`
static PERMUTE: [i32; 16] = [0, 4, 8, 12, 2, 6, 10, 14, 1, 5, 9, 13, 3, 7, 11, 15];

/// `[b0 0 0 0 | b1 0 0 0 | b2 0 0 0 | b3 0 0 0]`
#[inline(always)]
unsafe fn bias_quad(bias: *const i32) -> __m512i {
    unsafe {
        let b = |j: usize| bias.add(j).read_unaligned();
        _mm512_setr_epi32(b(0), 0, 0, 0, b(1), 0, 0, 0, b(2), 0, 0, 0, b(3), 0, 0, 0)
    }
}

#[inline(always)]
unsafe fn broadcast_a(a: *const i8) -> __m512i {
    unsafe { _mm512_broadcast_i32x4(_mm_cvtepi8_epi16(_mm_loadl_epi64(a as *const __m128i))) }
}

#[inline(always)]
unsafe fn store16(c: *mut i8, v: __m128i, n: usize) {
    unsafe {
        if n >= 16 {
            _mm_storeu_si128(c as *mut __m128i, v);
        } else {
            let mut bytes = [0i8; 16];
            _mm_storeu_si128(bytes.as_mut_ptr() as *mut __m128i, v);
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), c, n);
        }
    }
}

/// Accumulators hold four columns each, `[c0 x4 | c1 x4 | c2 x4 | c3 x4]` and so on.
#[inline(always)]
pub unsafe fn gemm_16c8<const MR: usize>(
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

        let vscale = _mm512_set1_ps(params.simd.scale);
        let vmax_less_zp = _mm512_set1_ps(params.simd.output_max_less_zero_point);
        let vzp = _mm256_set1_epi16(params.simd.output_zero_point);
        let vmin = _mm_set1_epi8(params.simd.output_min);
        let vperm = _mm512_loadu_si512(PERMUTE.as_ptr() as *const _);

        let kc_main = kc & !7;
        let kc_tail = kc & 7;
        let kc_padded = kc.next_multiple_of(8);

        let mut w = w;
        let mut nc = nc;

        loop {
            let bias = w as *const i32;
            let b = [
                bias_quad(bias),
                bias_quad(bias.add(4)),
                bias_quad(bias.add(8)),
                bias_quad(bias.add(12)),
            ];
            w = w.add(64);
            let mut acc = [b; MR];

            let mut k = 0;
            while k < kc_padded {
                let mut va = [_mm512_setzero_si512(); MR];
                for i in 0..MR {
                    va[i] = if k < kc_main {
                        broadcast_a(a_rows[i].add(k))
                    } else {
                        let buf = load_tail8(a_rows[i].add(k), kc_tail);
                        broadcast_a(buf.as_ptr())
                    };
                }
                for j in 0..4 {
                    let vb =
                        _mm512_cvtepi8_epi16(_mm256_loadu_si256(w.add(32 * j) as *const __m256i));
                    for i in 0..MR {
                        acc[i][j] = _mm512_add_epi32(acc[i][j], _mm512_madd_epi16(va[i], vb));
                    }
                }
                w = w.add(128);
                k += 8;
            }

            let n = Ord::min(nc, 16);
            for i in 0..MR {
                let [x0123, x4567, x89ab, xcdef] = acc[i];
                let x04 = _mm512_add_epi32(
                    _mm512_unpacklo_epi32(x0123, x4567),
                    _mm512_unpackhi_epi32(x0123, x4567),
                );
                let x8c = _mm512_add_epi32(
                    _mm512_unpacklo_epi32(x89ab, xcdef),
                    _mm512_unpackhi_epi32(x89ab, xcdef),
                );
                let x = _mm512_add_epi32(
                    _mm512_unpacklo_epi32(x04, x8c),
                    _mm512_unpackhi_epi32(x04, x8c),
                );
                let x = _mm512_permutexvar_epi32(vperm, x);

                let mut f = _mm512_cvtepi32_ps(x);
                f = _mm512_mul_ps(f, vscale);
                f = _mm512_min_ps(f, vmax_less_zp);
                let v = _mm512_cvtps_epi32(f);

                let v = _mm256_adds_epi16(_mm512_cvtsepi32_epi16(v), vzp);
                let v = _mm_max_epi8(_mm256_cvtsepi16_epi8(v), vmin);
                store16(c_rows[i], v, n);
            }

            if nc <= 16 {
                return;
            }
            nc -= 16;
            for row in &mut c_rows {
                *row = row.wrapping_add(cn_stride);
            }
        }
    }
}
