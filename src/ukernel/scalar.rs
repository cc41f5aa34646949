//! Portable kernels, `kr = 1`. Also the fallback on cpus without sse2.

use super::tile_rows;
use crate::params::Qs8ConvMinmaxParams;
use crate::requantization::{requantize_fmagic, requantize_imagic, requantize_lrintf};

pub trait Requantize {
    fn requantize(acc: i32, params: &Qs8ConvMinmaxParams) -> i8;
}

pub struct Fmagic;
pub struct Imagic;
pub struct Lrintf;

impl Requantize for Fmagic {
    #[inline(always)]
    fn requantize(acc: i32, params: &Qs8ConvMinmaxParams) -> i8 {
        requantize_fmagic(acc, &params.fmagic)
    }
}

impl Requantize for Imagic {
    #[inline(always)]
    fn requantize(acc: i32, params: &Qs8ConvMinmaxParams) -> i8 {
        requantize_imagic(acc, &params.imagic)
    }
}

impl Requantize for Lrintf {
    #[inline(always)]
    fn requantize(acc: i32, params: &Qs8ConvMinmaxParams) -> i8 {
        requantize_lrintf(acc, &params.lrintf)
    }
}

#[inline(always)]
pub unsafe fn gemm<R: Requantize, const MR: usize, const NR: usize>(
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
        let mut w = w;
        let mut nc = nc;

        loop {
            let mut bias = [0i32; NR];
            for (j, b) in bias.iter_mut().enumerate() {
                *b = (w as *const i32).add(j).read_unaligned();
            }
            w = w.add(NR * size_of::<i32>());

            let mut acc = [bias; MR];
            for k in 0..kc {
                let mut vb = [0i32; NR];
                for (j, b) in vb.iter_mut().enumerate() {
                    *b = i32::from(*(w as *const i8).add(j));
                }
                w = w.add(NR);

                for i in 0..MR {
                    let va = i32::from(*a_rows[i].add(k));
                    for j in 0..NR {
                        acc[i][j] = acc[i][j].wrapping_add(va * vb[j]);
                    }
                }
            }

            let n = Ord::min(nc, NR);
            for i in 0..MR {
                for j in 0..n {
                    *c_rows[i].add(j) = R::requantize(acc[i][j], params);
                }
            }

            if nc <= NR {
                return;
            }
            nc -= NR;
            for row in &mut c_rows {
                *row = row.wrapping_add(cn_stride);
            }
        }
    }
}
