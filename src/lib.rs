//! Signed 8-bit quantized gemm microkernels for x86, with fp32 requantization and min/max
//! clamping of the int8 output (`qs8_gemm_minmax_fp32`).
//!
//! * [`ukernel`] holds the microkernels and the registry of every instantiation.
//! * [`packing`] lays out weights and biases for a kernel's tile shape.
//! * [`config`] picks a kernel pair for the running cpu.
//! * the driver in this module walks a full problem tile by tile, serially or in parallel.
//! * [`FullyConnected`] ties everything together behind a safe api.

#![allow(clippy::too_many_arguments)]

pub mod config;
pub mod error;
mod isa;
pub mod operator;
pub mod packing;
pub mod params;
pub mod requantization;
pub mod ukernel;

#[cfg(test)]
mod tester;
#[cfg(test)]
mod tests_qs8;

pub use config::{GemmConfig, RuntimeConfig};
pub use error::{GemmError, Result};
pub use isa::Isa;
pub use operator::{FullyConnected, FullyConnectedDesc, Quantization};
pub use params::Qs8ConvMinmaxParams;
pub use ukernel::{GemmMicrokernel, QS8_GEMM_MINMAX_FP32_UKERNELS};

#[cfg(feature = "rayon")]
use core::sync::atomic::{AtomicUsize, Ordering};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Parallelism {
    None,
    /// Runs on the given number of threads, `0` meaning `rayon::current_num_threads()`.
    #[cfg(feature = "rayon")]
    Rayon(usize),
}

impl Parallelism {
    pub fn degree(self) -> usize {
        match self {
            Parallelism::None => 1,
            #[cfg(feature = "rayon")]
            Parallelism::Rayon(0) => rayon::current_num_threads(),
            #[cfg(feature = "rayon")]
            Parallelism::Rayon(n) => n,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

/// Everything a microkernel call needs besides its tile position and size.
#[derive(Copy, Clone, Debug)]
pub struct MicrokernelInfo<'a> {
    pub kc: usize,
    pub a_stride: usize,
    pub cm_stride: usize,
    /// Bytes between packed groups of `nr` columns.
    pub w_stride: usize,
    pub params: &'a Qs8ConvMinmaxParams,
}

#[derive(Copy, Clone, Debug)]
pub struct MillikernelInfo<'a> {
    pub mr: usize,
    pub nr: usize,
    /// Columns handed to one microkernel call, a multiple of `nr`.
    pub nc_block: usize,
    /// Walk row tiles in the outer loop, reusing `A` across column blocks. Otherwise column
    /// blocks are outer and the packed weights of a block stay hot across row tiles.
    pub rowmajor: bool,
    pub micro: MicrokernelInfo<'a>,
}

/// Runs `kernel` on the `nrows x ncols` tile at `pos` of the full problem rooted at `a`, `w`, `c`.
#[inline(always)]
pub unsafe fn call_microkernel(
    kernel: &GemmMicrokernel,

    a: *const i8,
    w: *const u8,
    c: *mut i8,

    nrows: usize,
    ncols: usize,

    micro: &MicrokernelInfo,
    pos: Position,
) {
    debug_assert!(pos.col % kernel.nr == 0);

    let a = a.wrapping_add(pos.row * micro.a_stride);
    let w = w.wrapping_add(pos.col / kernel.nr * micro.w_stride);
    let c = c.wrapping_add(pos.row * micro.cm_stride + pos.col);

    unsafe {
        (kernel.ukernel)(
            nrows,
            ncols,
            micro.kc,
            a,
            micro.a_stride,
            w,
            c,
            micro.cm_stride,
            kernel.nr,
            micro.params,
        )
    }
}

pub unsafe fn millikernel_rowmajor(
    kernel: &GemmMicrokernel,

    a: *const i8,
    w: *const u8,
    c: *mut i8,

    nrows: usize,
    ncols: usize,

    milli: &MillikernelInfo,
    pos: Position,
) {
    let mut row = 0;
    while row < nrows {
        let mr = Ord::min(milli.mr, nrows - row);

        let mut col = 0;
        while col < ncols {
            let nc = Ord::min(milli.nc_block, ncols - col);
            unsafe {
                call_microkernel(
                    kernel,
                    a,
                    w,
                    c,
                    mr,
                    nc,
                    &milli.micro,
                    Position {
                        row: pos.row + row,
                        col: pos.col + col,
                    },
                )
            };
            col += nc;
        }

        row += mr;
    }
}

pub unsafe fn millikernel_colmajor(
    kernel: &GemmMicrokernel,

    a: *const i8,
    w: *const u8,
    c: *mut i8,

    nrows: usize,
    ncols: usize,

    milli: &MillikernelInfo,
    pos: Position,
) {
    let mut col = 0;
    while col < ncols {
        let nc = Ord::min(milli.nc_block, ncols - col);

        let mut row = 0;
        while row < nrows {
            let mr = Ord::min(milli.mr, nrows - row);
            unsafe {
                call_microkernel(
                    kernel,
                    a,
                    w,
                    c,
                    mr,
                    nc,
                    &milli.micro,
                    Position {
                        row: pos.row + row,
                        col: pos.col + col,
                    },
                )
            };
            row += mr;
        }

        col += nc;
    }
}

pub unsafe trait Millikernel {
    unsafe fn call(
        &mut self,

        kernel: &GemmMicrokernel,

        a: *const i8,
        w: *const u8,
        c: *mut i8,

        nrows: usize,
        ncols: usize,

        milli: &MillikernelInfo,
        pos: Position,
    );
}

struct Milli;

#[cfg(feature = "rayon")]
struct MilliPar {
    n_threads: usize,
}

unsafe impl Millikernel for Milli {
    unsafe fn call(
        &mut self,

        kernel: &GemmMicrokernel,

        a: *const i8,
        w: *const u8,
        c: *mut i8,

        nrows: usize,
        ncols: usize,

        milli: &MillikernelInfo,
        pos: Position,
    ) {
        unsafe {
            (if milli.rowmajor {
                millikernel_rowmajor
            } else {
                millikernel_colmajor
            })(kernel, a, w, c, nrows, ncols, milli, pos)
        }
    }
}

#[cfg(feature = "rayon")]
#[derive(Copy, Clone)]
pub(crate) struct Cell<T>(pub T);
#[cfg(feature = "rayon")]
unsafe impl<T> Sync for Cell<T> {}
#[cfg(feature = "rayon")]
unsafe impl<T> Send for Cell<T> {}

#[cfg(feature = "rayon")]
unsafe impl Millikernel for MilliPar {
    unsafe fn call(
        &mut self,

        kernel: &GemmMicrokernel,

        a: *const i8,
        w: *const u8,
        c: *mut i8,

        nrows: usize,
        ncols: usize,

        milli: &MillikernelInfo,
        pos: Position,
    ) {
        let row_tiles = nrows.div_ceil(milli.mr);
        let col_tiles = ncols.div_ceil(milli.nc_block);
        let n = row_tiles * col_tiles;

        if self.n_threads <= 1 || n <= 1 {
            return unsafe { Milli.call(kernel, a, w, c, nrows, ncols, milli, pos) };
        }

        let a = Cell(a);
        let w = Cell(w);
        let c = Cell(c);
        let next = crossbeam::utils::CachePadded::new(AtomicUsize::new(0));

        spindle::for_each_raw(Ord::min(self.n_threads, n), |_| loop {
            let tid = next.fetch_add(1, Ordering::Relaxed);
            if tid >= n {
                return;
            }

            let (i, j) = if milli.rowmajor {
                (tid / col_tiles, tid % col_tiles)
            } else {
                (tid % row_tiles, tid / row_tiles)
            };

            let row = i * milli.mr;
            let col = j * milli.nc_block;

            // jobs cover disjoint tiles of `c`
            unsafe {
                call_microkernel(
                    kernel,
                    { a }.0,
                    { w }.0,
                    { c }.0,
                    Ord::min(milli.mr, nrows - row),
                    Ord::min(milli.nc_block, ncols - col),
                    &milli.micro,
                    Position {
                        row: pos.row + row,
                        col: pos.col + col,
                    },
                )
            };
        });
    }
}

/// Computes `C = requantize(A * W)` for an `m x n` output with `k` deep rows of `A`.
///
/// # Safety
///
/// * `a` points to `m` rows of `k` int8 values, `a_stride` bytes apart.
/// * `w` is packed for `config`'s `nr`, `kr` and `sr` and covers `n` columns of depth `k`.
/// * `c` points to `m` rows of `n` writable int8 values, `cm_stride` bytes apart.
/// * `config`'s kernels are supported by the running cpu.
pub unsafe fn gemm(
    config: &GemmConfig,

    m: usize,
    n: usize,
    k: usize,

    a: *const i8,
    a_stride: usize,
    w: *const u8,
    c: *mut i8,
    cm_stride: usize,

    params: &Qs8ConvMinmaxParams,
    par: Parallelism,
) {
    if m == 0 || n == 0 {
        return;
    }
    debug_assert!(k != 0);

    let kernel = if m == 1 { config.single } else { config.full };
    let mr = kernel.mr;
    let nr = kernel.nr;

    let n_threads = par.degree();
    let row_tiles = m.div_ceil(mr);
    let col_tiles = n.div_ceil(nr);

    let mut nc_block = col_tiles * nr;
    if n_threads > 1 {
        // about 5 jobs per thread, for load balancing
        let target_tiles = 5 * n_threads;
        let max_col_blocks = target_tiles.div_ceil(row_tiles);
        nc_block = col_tiles.div_ceil(max_col_blocks) * nr;
    }

    let tall = m >= n;
    let milli = MillikernelInfo {
        mr,
        nr,
        nc_block,
        rowmajor: !tall,
        micro: MicrokernelInfo {
            kc: k,
            a_stride,
            cm_stride,
            w_stride: packing::packed_group_stride(k, nr, kernel.kr, kernel.sr),
            params,
        },
    };

    log::trace!(
        "qs8 gemm {m}x{n}x{k}: {} on {n_threads} threads, nc_block {nc_block}",
        kernel.name
    );

    let pos = Position { row: 0, col: 0 };
    unsafe { kernel_imp(millikernel(par), kernel, a, w, c, m, n, &milli, pos) };
}

fn millikernel(par: Parallelism) -> Box<dyn Millikernel> {
    match par {
        Parallelism::None => Box::new(Milli),
        #[cfg(feature = "rayon")]
        Parallelism::Rayon(_) => Box::new(MilliPar {
            n_threads: par.degree(),
        }),
    }
}

#[inline(never)]
unsafe fn kernel_imp(
    mut millikernel: Box<dyn Millikernel>,
    kernel: &GemmMicrokernel,

    a: *const i8,
    w: *const u8,
    c: *mut i8,

    nrows: usize,
    ncols: usize,

    milli: &MillikernelInfo,
    pos: Position,
) {
    unsafe { millikernel.call(kernel, a, w, c, nrows, ncols, milli, pos) };
}
