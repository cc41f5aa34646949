use aligned_vec::*;
use rand::prelude::*;

use crate::packing::{pack_qs8_gemm_goi_w, packed_group_stride, packed_weights_size, round_up};
use crate::params::Qs8ConvMinmaxParams;
use crate::requantization::requantize_fp32;
use crate::ukernel::GemmMicrokernel;

const SENTINEL: i8 = 0x5A;
/// Written past the end of every `A` row and into the k padding of the packed weights. Any read of
/// `A` past `k` then meets a nonzero weight and shows up in the output.
const POISON: i8 = 0x7F;
/// Bytes allocated after the last `A` row when poisoning.
const A_OVERRUN: usize = 16;

pub(crate) fn next_prime(n: usize) -> usize {
    (n.max(2)..)
        .find(|&p| (2..).take_while(|d| d * d <= p).all(|d| p % d != 0))
        .unwrap_or(n)
}

/// Runs one microkernel on random operands and checks it bit for bit against
/// [`requantize_fp32`] applied to an exact integer reference.
#[derive(Copy, Clone, Debug)]
pub(crate) struct GemmMicrokernelTester {
    m: usize,
    n: usize,
    k: usize,
    mr: usize,
    nr: usize,
    kr: usize,
    sr: usize,
    a_stride: usize,
    cm_stride: usize,
    cn_stride: usize,
    a_zero_point: i8,
    qmin: i8,
    qmax: i8,
    iterations: usize,
    poison: bool,
}

impl Default for GemmMicrokernelTester {
    fn default() -> Self {
        Self {
            m: 1,
            n: 1,
            k: 1,
            mr: 1,
            nr: 1,
            kr: 1,
            sr: 1,
            a_stride: 0,
            cm_stride: 0,
            cn_stride: 0,
            a_zero_point: -1,
            qmin: i8::MIN,
            qmax: i8::MAX,
            iterations: 3,
            poison: false,
        }
    }
}

macro_rules! setters {
    ($($name: ident: $ty: ty),* $(,)?) => {
        $(
            pub fn $name(mut self, $name: $ty) -> Self {
                self.$name = $name;
                self
            }
        )*
    };
}

impl GemmMicrokernelTester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tester preset with the tile shape of `kernel`, covering one full tile.
    pub fn for_kernel(kernel: &GemmMicrokernel) -> Self {
        Self::new()
            .mr(kernel.mr)
            .nr(kernel.nr)
            .kr(kernel.kr)
            .sr(kernel.sr)
            .m(kernel.mr)
            .n(kernel.nr)
            .k(kernel.k_block())
    }

    setters! {
        m: usize,
        n: usize,
        k: usize,
        mr: usize,
        nr: usize,
        kr: usize,
        sr: usize,
        a_stride: usize,
        cm_stride: usize,
        cn_stride: usize,
        a_zero_point: i8,
        qmin: i8,
        qmax: i8,
        iterations: usize,
        poison: bool,
    }

    fn get_a_stride(&self) -> usize {
        if self.a_stride == 0 {
            self.k
        } else {
            self.a_stride
        }
    }

    fn get_cn_stride(&self) -> usize {
        if self.cn_stride == 0 {
            self.nr
        } else {
            self.cn_stride
        }
    }

    fn get_cm_stride(&self) -> usize {
        if self.cm_stride != 0 {
            self.cm_stride
        } else if self.n <= self.nr {
            self.n
        } else {
            self.get_cn_stride() * self.n.div_ceil(self.nr)
        }
    }

    fn c_offset(&self, i: usize, j: usize) -> usize {
        i * self.get_cm_stride() + (j / self.nr) * self.get_cn_stride() + j % self.nr
    }

    pub fn test(&self, kernel: &GemmMicrokernel) {
        if !kernel.is_supported() {
            return;
        }

        let Self { m, n, k, nr, kr, sr, a_zero_point, qmin, qmax, .. } = *self;
        assert_eq!((self.mr, nr, kr, sr), (kernel.mr, kernel.nr, kernel.kr, kernel.sr));
        assert!(m >= 1 && m <= self.mr);
        assert!(n >= 1 && k >= 1);
        assert!(qmin <= qmax);

        let a_stride = self.get_a_stride();
        let cm_stride = self.get_cm_stride();
        let cn_stride = self.get_cn_stride();
        assert!(a_stride >= k);
        assert!(cn_stride >= nr);

        let rng = &mut StdRng::seed_from_u64(
            ((m as u64) << 48) | ((n as u64) << 32) | ((k as u64) << 16) | a_stride as u64,
        );

        assert!(!self.poison || sr == 1);
        let a_len = (m - 1) * a_stride + k;
        let a: &mut [i8] = &mut *avec![0; a_len + if self.poison { A_OVERRUN } else { 0 }];
        let b: &mut [i8] = &mut *avec![0; n * k];
        let bias: &mut [i32] = &mut *avec![0; n];
        let w: &mut [u8] = &mut *avec![0; packed_weights_size(n, k, nr, kr, sr)];
        let c_len = self.c_offset(m - 1, n - 1) + 1;
        let c: &mut [i8] = &mut *avec![0; c_len];

        let mut written = vec![false; c_len];
        for i in 0..m {
            for j in 0..n {
                written[self.c_offset(i, j)] = true;
            }
        }

        for _ in 0..self.iterations {
            rng.fill(&mut *a);
            rng.fill(&mut *b);
            if self.poison {
                for i in 0..m {
                    let row_end = Ord::min((i + 1) * a_stride, a_len);
                    a[i * a_stride + k..row_end].fill(POISON);
                }
                a[a_len..].fill(POISON);
            }
            for x in bias.iter_mut() {
                *x = rng.random_range(-10000..=10000);
            }
            c.fill(SENTINEL);

            pack_qs8_gemm_goi_w(n, k, nr, kr, sr, b, Some(&*bias), a_zero_point, w).unwrap();
            if self.poison {
                let group_stride = packed_group_stride(k, nr, kr, sr);
                for group in w.chunks_exact_mut(group_stride) {
                    let weights = &mut group[nr * size_of::<i32>()..];
                    for depth in k..round_up(k, kr) {
                        for col in 0..nr {
                            weights[(depth / kr) * nr * kr + col * kr + depth % kr] = POISON as u8;
                        }
                    }
                }
            }

            let mut acc = vec![0i32; m * n];
            for i in 0..m {
                for j in 0..n {
                    let mut sum = bias[j];
                    for depth in 0..k {
                        sum += (i32::from(a[i * a_stride + depth]) - i32::from(a_zero_point))
                            * i32::from(b[j * k + depth]);
                    }
                    acc[i * n + j] = sum;
                }
            }

            let acc_min = *acc.iter().min().unwrap();
            let acc_max = *acc.iter().max().unwrap();
            let range = f64::from(acc_max) - f64::from(acc_min);
            let c_scale = if range >= 256.0 { range / 255.0 } else { 1.00001 };
            let c_zero_point = (-0.5 - 0.5 * (f64::from(acc_min) + f64::from(acc_max)) / c_scale)
                .round_ties_even()
                .clamp(-128.0, 127.0) as i8;
            let scale = (1.0 / c_scale) as f32;

            let params = Qs8ConvMinmaxParams::new(scale, c_zero_point, qmin, qmax).unwrap();

            unsafe {
                (kernel.ukernel)(
                    m,
                    n,
                    k,
                    a.as_ptr(),
                    a_stride,
                    w.as_ptr(),
                    c.as_mut_ptr(),
                    cm_stride,
                    cn_stride,
                    &params,
                )
            };

            for i in 0..m {
                for j in 0..n {
                    let got = c[self.c_offset(i, j)];
                    let target = requantize_fp32(acc[i * n + j], scale, c_zero_point, qmin, qmax);
                    assert!(
                        got >= qmin && got <= qmax,
                        "{}: c[{i}][{j}] = {got} outside [{qmin}, {qmax}], m={m} n={n} k={k}",
                        kernel.name,
                    );
                    assert_eq!(
                        got,
                        target,
                        "{}: c[{i}][{j}] (acc {}), m={m} n={n} k={k} a_stride={a_stride} cm_stride={cm_stride} cn_stride={cn_stride}",
                        kernel.name,
                        acc[i * n + j],
                    );
                }
            }
            for (offset, _) in written.iter().enumerate().filter(|(_, w)| !**w) {
                assert_eq!(
                    c[offset],
                    SENTINEL,
                    "{}: wrote outside of the tile at offset {offset}, m={m} n={n} k={k}",
                    kernel.name,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ukernel::find;

    #[test]
    fn test_next_prime() {
        assert_eq!(next_prime(0), 2);
        assert_eq!(next_prime(5), 5);
        assert_eq!(next_prime(9), 11);
        assert_eq!(next_prime(17), 17);
    }

    #[test]
    fn test_default_strides() {
        let t = GemmMicrokernelTester::new().nr(4).n(3).k(5);
        assert_eq!((t.get_a_stride(), t.get_cn_stride(), t.get_cm_stride()), (5, 4, 3));

        let t = GemmMicrokernelTester::new().nr(4).n(9).cn_stride(7);
        assert_eq!(t.get_cm_stride(), 21);
        assert_eq!(t.c_offset(1, 5), 21 + 7 + 1);
    }

    #[test]
    fn test_scalar_tile() {
        let kernel = find("qs8_gemm_minmax_fp32_ukernel_2x4__scalar_fmagic").unwrap();
        GemmMicrokernelTester::for_kernel(kernel).k(3).test(kernel);
    }
}
