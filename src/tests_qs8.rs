//! Shape and range scenarios run against every registered `qs8_gemm_minmax_fp32` kernel the
//! host can execute.

use crate::tester::{next_prime, GemmMicrokernelTester};
use crate::ukernel::{GemmMicrokernel, QS8_GEMM_MINMAX_FP32_UKERNELS};

fn for_each_kernel(f: impl Fn(&GemmMicrokernel, GemmMicrokernelTester)) {
    for kernel in QS8_GEMM_MINMAX_FP32_UKERNELS {
        if kernel.is_supported() {
            f(kernel, GemmMicrokernelTester::for_kernel(kernel));
        }
    }
}

/// Depths below, above and at multiples of the main loop block.
fn k_lt(kernel: &GemmMicrokernel) -> std::ops::Range<usize> {
    1..kernel.k_block()
}

fn k_gt(kernel: &GemmMicrokernel) -> std::ops::Range<usize> {
    let kb = kernel.k_block();
    if kb == 1 {
        2..10
    } else {
        kb + 1..2 * kb
    }
}

fn k_div(kernel: &GemmMicrokernel) -> impl Iterator<Item = usize> {
    let kb = kernel.k_block();
    (2 * kb..=10 * kb).step_by(kb)
}

fn k_any(kernel: &GemmMicrokernel) -> impl Iterator<Item = usize> {
    let kb = kernel.k_block();
    (1..=5 * kb).step_by(kb + 1)
}

#[test]
fn k_eq_kb() {
    for_each_kernel(|kernel, t| t.test(kernel));
}

#[test]
fn strided_cn() {
    for_each_kernel(|kernel, t| t.cn_stride(next_prime(kernel.nr + 1)).test(kernel));
}

#[test]
fn k_eq_kb_strided_a() {
    for_each_kernel(|kernel, t| {
        t.a_stride(next_prime(kernel.k_block() + 1)).test(kernel);
    });
}

#[test]
fn k_eq_kb_subtile() {
    for_each_kernel(|kernel, t| {
        for m in 1..=kernel.mr {
            for n in 1..=kernel.nr {
                t.m(m).n(n).iterations(1).test(kernel);
            }
        }
    });
}

#[test]
fn k_eq_kb_subtile_m() {
    for_each_kernel(|kernel, t| {
        for m in 1..=kernel.mr {
            t.m(m).iterations(1).test(kernel);
        }
    });
}

#[test]
fn k_eq_kb_subtile_n() {
    for_each_kernel(|kernel, t| {
        for n in 1..=kernel.nr {
            t.n(n).iterations(1).test(kernel);
        }
    });
}

#[test]
fn k_lt_kb() {
    for_each_kernel(|kernel, t| {
        for k in k_lt(kernel) {
            t.k(k).test(kernel);
        }
    });
}

#[test]
fn k_lt_kb_strided_a() {
    for_each_kernel(|kernel, t| {
        for k in k_lt(kernel) {
            t.k(k).a_stride(next_prime(kernel.k_block() + 1)).test(kernel);
        }
    });
}

#[test]
fn k_lt_kb_subtile() {
    for_each_kernel(|kernel, t| {
        for k in k_lt(kernel) {
            for m in 1..=kernel.mr {
                for n in 1..=kernel.nr {
                    t.k(k).m(m).n(n).iterations(1).test(kernel);
                }
            }
        }
    });
}

#[test]
fn k_gt_kb() {
    for_each_kernel(|kernel, t| {
        for k in k_gt(kernel) {
            t.k(k).test(kernel);
        }
    });
}

#[test]
fn k_gt_kb_strided_a() {
    for_each_kernel(|kernel, t| {
        for k in k_gt(kernel) {
            t.k(k).a_stride(next_prime(k_gt(kernel).end + 1)).test(kernel);
        }
    });
}

#[test]
fn k_gt_kb_subtile() {
    for_each_kernel(|kernel, t| {
        for k in k_gt(kernel) {
            for m in 1..=kernel.mr {
                for n in 1..=kernel.nr {
                    t.k(k).m(m).n(n).iterations(1).test(kernel);
                }
            }
        }
    });
}

#[test]
fn k_div_kb() {
    for_each_kernel(|kernel, t| {
        for k in k_div(kernel) {
            t.k(k).test(kernel);
        }
    });
}

#[test]
fn k_div_kb_strided_a() {
    for_each_kernel(|kernel, t| {
        for k in k_div(kernel) {
            t.k(k).a_stride(next_prime(10 * kernel.k_block() + 1)).test(kernel);
        }
    });
}

#[test]
fn k_div_kb_subtile() {
    for_each_kernel(|kernel, t| {
        for k in k_div(kernel) {
            for m in 1..=kernel.mr {
                for n in 1..=kernel.nr {
                    t.k(k).m(m).n(n).iterations(1).test(kernel);
                }
            }
        }
    });
}

#[test]
fn n_gt_nr() {
    for_each_kernel(|kernel, t| {
        for n in kernel.nr + 1..2 * kernel.nr {
            for k in k_any(kernel) {
                t.n(n).k(k).test(kernel);
            }
        }
    });
}

#[test]
fn n_gt_nr_strided_cn() {
    for_each_kernel(|kernel, t| {
        for n in kernel.nr + 1..2 * kernel.nr {
            for k in k_any(kernel) {
                t.n(n).k(k).cn_stride(next_prime(kernel.nr + 1)).test(kernel);
            }
        }
    });
}

#[test]
fn n_gt_nr_strided_a() {
    for_each_kernel(|kernel, t| {
        for n in kernel.nr + 1..2 * kernel.nr {
            for k in k_any(kernel) {
                t.n(n).k(k).a_stride(next_prime(5 * kernel.k_block() + 1)).test(kernel);
            }
        }
    });
}

#[test]
fn n_gt_nr_subtile() {
    for_each_kernel(|kernel, t| {
        for n in kernel.nr + 1..2 * kernel.nr {
            for k in k_any(kernel) {
                for m in 1..=kernel.mr {
                    t.n(n).k(k).m(m).iterations(1).test(kernel);
                }
            }
        }
    });
}

#[test]
fn n_div_nr() {
    for_each_kernel(|kernel, t| {
        for n in (2 * kernel.nr..=3 * kernel.nr).step_by(kernel.nr) {
            for k in k_any(kernel) {
                t.n(n).k(k).test(kernel);
            }
        }
    });
}

#[test]
fn n_div_nr_strided_cn() {
    for_each_kernel(|kernel, t| {
        for n in (2 * kernel.nr..=3 * kernel.nr).step_by(kernel.nr) {
            for k in k_any(kernel) {
                t.n(n).k(k).cn_stride(next_prime(kernel.nr + 1)).test(kernel);
            }
        }
    });
}

#[test]
fn n_div_nr_strided_a() {
    for_each_kernel(|kernel, t| {
        for n in (2 * kernel.nr..=3 * kernel.nr).step_by(kernel.nr) {
            for k in k_any(kernel) {
                t.n(n).k(k).a_stride(next_prime(5 * kernel.k_block() + 1)).test(kernel);
            }
        }
    });
}

#[test]
fn n_div_nr_subtile() {
    for_each_kernel(|kernel, t| {
        for n in (2 * kernel.nr..=3 * kernel.nr).step_by(kernel.nr) {
            for k in k_any(kernel) {
                for m in 1..=kernel.mr {
                    t.n(n).k(k).m(m).iterations(1).test(kernel);
                }
            }
        }
    });
}

#[test]
fn strided_cm() {
    for_each_kernel(|kernel, t| t.cm_stride(next_prime(kernel.nr + 1)).test(kernel));
}

#[test]
fn strided_cm_subtile() {
    for_each_kernel(|kernel, t| {
        for k in k_any(kernel) {
            for m in 1..=kernel.mr {
                for n in 1..=kernel.nr {
                    t.k(k)
                        .m(m)
                        .n(n)
                        .cm_stride(next_prime(kernel.nr + 1))
                        .iterations(1)
                        .test(kernel);
                }
            }
        }
    });
}

#[test]
fn qmin() {
    for_each_kernel(|kernel, t| t.qmin(0).test(kernel));
}

#[test]
fn qmax() {
    for_each_kernel(|kernel, t| t.qmax(0).test(kernel));
}

#[test]
fn narrow_range() {
    for_each_kernel(|kernel, t| t.qmin(-7).qmax(-7).k(3).test(kernel));
}

#[test]
fn zero_a_zero_point() {
    for_each_kernel(|kernel, t| {
        for k in k_any(kernel) {
            t.a_zero_point(0).k(k).test(kernel);
        }
    });
}

/// Odd depths and depths straddling one and two blocks, exercising every k tail.
#[test]
fn k_tails() {
    for_each_kernel(|kernel, t| {
        for k in (1..=3 * kernel.k_block() + 1).filter(|k| k % 2 == 1) {
            t.k(k).n(kernel.nr + 1).test(kernel);
        }
    });
}

/// Bytes past each row of `A` and the k padding of the weights hold nonzero values, so any read
/// of `A` past `k` changes the output.
#[test]
fn a_rows_end_at_k() {
    for_each_kernel(|kernel, t| {
        let kb = kernel.k_block();
        for k in 1..=3 * kb {
            for a_stride in [k, next_prime(3 * kb + 1)] {
                for m in [1, kernel.mr] {
                    t.m(m).k(k).a_stride(a_stride).poison(true).iterations(1).test(kernel);
                }
            }
        }
    });
}
