//! `MRx8c8` avx2 kernels.

use core::arch::x86_64::*;

use super::{load_tail8, tile_rows};
use crate::params::Qs8ConvMinmaxParams;

#[inline(always)]
unsafe fn bias_pair(bias: *const i32) -> __m256i {
    unsafe {
        _mm256_inserti128_si256(
            _mm256_castsi128_si256(_mm_cvtsi32_si128(bias.read_unaligned())),
            _mm_cvtsi32_si128(bias.add(1).read_unaligned()),
            1,
        )
    }
}

#[inline(always)]
unsafe fn broadcast_a(a: *const i8) -> __m256i {
    unsafe { _mm256_broadcastsi128_si256(_mm_cvtepi8_epi16(_mm_loadl_epi64(a as *const __m128i))) }
}

/// Stores the low `n <= 8` bytes of `v`.
#[inline(always)]
unsafe fn store8(c: *mut i8, v: __m128i, n: usize) {
    unsafe {
        if n >= 8 {
            _mm_storel_epi64(c as *mut __m128i, v);
        } else {
            let bytes = _mm_cvtsi128_si64(v).to_le_bytes();
            core::ptr::copy_nonoverlapping(bytes.as_ptr() as *const i8, c, n);
        }
    }
}

/// Accumulators hold two columns each, `[c0 x4 | c1 x4]`, `[c2 x4 | c3 x4]` and so on.
#[inline(always)]
pub unsafe fn gemm_8c8<const MR: usize>(
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

        let vscale = _mm256_set1_ps(params.simd.scale);
        let vmax_less_zp = _mm256_set1_ps(params.simd.output_max_less_zero_point);
        let vzp = _mm_set1_epi16(params.simd.output_zero_point);
        let vmin = _mm_set1_epi8(params.simd.output_min);
        let vperm = _mm256_setr_epi32(0, 4, 1, 5, 2, 6, 3, 7);

        let kc_main = kc & !7;
        let kc_tail = kc & 7;
        let kc_padded = kc.next_multiple_of(8);

        let mut w = w;
        let mut nc = nc;

        loop {
            let bias = w as *const i32;
            let b = [
                bias_pair(bias),
                bias_pair(bias.add(2)),
                bias_pair(bias.add(4)),
                bias_pair(bias.add(6)),
            ];
            w = w.add(32);
            let mut acc = [b; MR];

            let mut k = 0;
            while k < kc_padded {
                let mut va = [_mm256_setzero_si256(); MR];
                for i in 0..MR {
                    va[i] = if k < kc_main {
                        broadcast_a(a_rows[i].add(k))
                    } else {
                        let buf = load_tail8(a_rows[i].add(k), kc_tail);
                        broadcast_a(buf.as_ptr())
                    };
                }
                for j in 0..4 {
                    let vb = _mm256_cvtepi8_epi16(_mm_loadu_si128(w.add(16 * j) as *const __m128i));
                    for i in 0..MR {
                        acc[i][j] = _mm256_add_epi32(acc[i][j], _mm256_madd_epi16(va[i], vb));
                    }
                }
                w = w.add(64);
                k += 8;
            }

            let n = Ord::min(nc, 8);
            for i in 0..MR {
                let [x01, x23, x45, x67] = acc[i];
                // [c0 c0 c2 c2 | c1 c1 c3 c3], then [c0 c2 c4 c6 | c1 c3 c5 c7]
                let x0213 = _mm256_hadd_epi32(x01, x23);
                let x4657 = _mm256_hadd_epi32(x45, x67);
                let x = _mm256_hadd_epi32(x0213, x4657);
                let x = _mm256_permutevar8x32_epi32(x, vperm);

                let mut f = _mm256_cvtepi32_ps(x);
                f = _mm256_mul_ps(f, vscale);
                f = _mm256_min_ps(f, vmax_less_zp);
                let v = _mm256_cvtps_epi32(f);

                let v = _mm_adds_epi16(
                    _mm_packs_epi32(_mm256_castsi256_si128(v), _mm256_extracti128_si256(v, 1)),
                    vzp,
                );
                let v = _mm_max_epi8(_mm_packs_epi16(v, v), vmin);
                store8(c_rows[i], v, n);
            }

            if nc <= 8 {
                return;
            }
            nc -= 8;
            for row in &mut c_rows {
                *row = row.wrapping_add(cn_stride);
            }
        }
    }
}
