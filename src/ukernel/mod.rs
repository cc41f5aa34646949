//! `qs8_gemm_minmax_fp32` microkernels.
//!
//! Every kernel shares one calling convention. It computes an `mr x nc` tile of
//! `C = requantize(A * B + bias)`, where `A` is `mr` rows of `kc` int8 values and `B` (with the
//! bias) is packed by [`crate::packing`] for the kernel's `nr`, `kr` and `sr`.
//!
//! * `1 <= mr <= MR`, `nc >= 1`, `kc >= 1`.
//! * row `i` of `A` starts at `a + i * a_stride`, row `i` of `C` at `c + i * cm_stride`.
//! * `C` advances by `cn_stride` bytes after each full block of `NR` columns; a trailing partial
//!   block only writes its `nc % NR` columns.
//! * `A` is never read past `kc` bytes per row. `w` must cover `round_up(nc, NR)` packed columns.
//!
//! The concrete instantiations are generated by `build.rs` into [`QS8_GEMM_MINMAX_FP32_UKERNELS`].

use crate::params::Qs8ConvMinmaxParams;
use crate::Isa;

pub mod scalar;

#[cfg(target_arch = "x86_64")]
pub mod avx2;
#[cfg(target_arch = "x86_64")]
pub mod avx512;
#[cfg(target_arch = "x86_64")]
pub mod sse;

pub type Qs8GemmMinmaxFp32Ukernel = unsafe fn(
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
);

#[derive(Copy, Clone)]
pub struct GemmMicrokernel {
    pub name: &'static str,
    pub isa: Isa,
    pub mr: usize,
    pub nr: usize,
    pub kr: usize,
    pub sr: usize,
    pub ukernel: Qs8GemmMinmaxFp32Ukernel,
}

impl core::fmt::Debug for GemmMicrokernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GemmMicrokernel")
            .field("name", &self.name)
            .field("isa", &self.isa)
            .field("mr", &self.mr)
            .field("nr", &self.nr)
            .field("kr", &self.kr)
            .field("sr", &self.sr)
            .finish()
    }
}

impl GemmMicrokernel {
    /// Depth handled by one iteration of the kernel's main loop.
    pub fn k_block(&self) -> usize {
        if self.kr == 1 {
            1
        } else {
            8
        }
    }

    pub fn is_supported(&self) -> bool {
        self.isa.is_supported()
    }
}

#[allow(non_snake_case)]
mod generated {
    use super::*;

    include!(concat!(env!("OUT_DIR"), "/ukernels.rs"));
}

pub use generated::*;

pub fn find(name: &str) -> Option<&'static GemmMicrokernel> {
    QS8_GEMM_MINMAX_FP32_UKERNELS.iter().find(|k| k.name == name)
}

/// Row pointers of a tile. Rows past `mr` alias the last valid row, so they recompute and
/// rewrite its values instead of touching memory outside the tile.
#[inline(always)]
pub(crate) unsafe fn tile_rows<const MR: usize>(
    mr: usize,
    a: *const i8,
    a_stride: usize,
    c: *mut i8,
    cm_stride: usize,
) -> ([*const i8; MR], [*mut i8; MR]) {
    debug_assert!(mr != 0 && mr <= MR);

    let mut a_rows = [a; MR];
    let mut c_rows = [c; MR];
    for i in 1..MR {
        if i < mr {
            a_rows[i] = a_rows[i - 1].wrapping_add(a_stride);
            c_rows[i] = c_rows[i - 1].wrapping_add(cm_stride);
        } else {
            a_rows[i] = a_rows[i - 1];
            c_rows[i] = c_rows[i - 1];
        }
    }
    (a_rows, c_rows)
}

/// Copies `len < 8` bytes of a row into a zero-filled 8 byte block.
#[inline(always)]
pub(crate) unsafe fn load_tail8(src: *const i8, len: usize) -> [i8; 8] {
    debug_assert!(len < 8);
    let mut buf = [0i8; 8];
    unsafe { core::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), len) };
    buf
}
