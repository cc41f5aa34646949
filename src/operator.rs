//! Fully connected operator over the `qs8_gemm_minmax_fp32` kernels.

use aligned_vec::{AVec, ConstAlign};

use crate::config::{GemmConfig, RuntimeConfig};
use crate::error::{check_len, strided_len, GemmError, Result};
use crate::packing::{checked_packed_weights_size, pack_qs8_gemm_gio_w, pack_qs8_gemm_goi_w};
use crate::params::{Qs8ConvMinmaxParams, MAX_SCALE, MIN_SCALE};
use crate::Parallelism;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Quantization {
    pub zero_point: i8,
    pub scale: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FullyConnectedDesc {
    pub input_channels: usize,
    pub output_channels: usize,
    pub input: Quantization,
    pub kernel_scale: f32,
    pub output: Quantization,
    pub output_min: i8,
    pub output_max: i8,
    /// Weights are given as `[input_channels][output_channels]` instead of
    /// `[output_channels][input_channels]`.
    pub transpose_weights: bool,
}

#[derive(Debug)]
pub struct FullyConnected {
    desc: FullyConnectedDesc,
    gemm: GemmConfig,
    params: Qs8ConvMinmaxParams,
    num_threads: usize,
    packed: AVec<u8, ConstAlign<64>>,
}

fn check_scale(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(GemmError::InvalidQuantizationScale { name, value })
    }
}

impl FullyConnected {
    pub fn new(
        desc: FullyConnectedDesc,
        kernel: &[i8],
        bias: Option<&[i32]>,
        config: &RuntimeConfig,
    ) -> Result<Self> {
        if desc.input_channels == 0 {
            return Err(GemmError::InvalidDimension {
                name: "input_channels",
            });
        }
        if desc.output_channels == 0 {
            return Err(GemmError::InvalidDimension {
                name: "output_channels",
            });
        }
        check_scale("input", desc.input.scale)?;
        check_scale("kernel", desc.kernel_scale)?;
        check_scale("output", desc.output.scale)?;

        let scale = desc.input.scale * desc.kernel_scale / desc.output.scale;
        if !(MIN_SCALE..MAX_SCALE).contains(&scale) {
            return Err(GemmError::InvalidRequantizationScale(scale));
        }
        let params = Qs8ConvMinmaxParams::new(
            scale,
            desc.output.zero_point,
            desc.output_min,
            desc.output_max,
        )?;

        let gemm = GemmConfig::detect(config);
        let (nc, kc) = (desc.output_channels, desc.input_channels);
        let (nr, kr, sr) = (gemm.nr(), gemm.kr(), gemm.sr());

        // checked before allocating the packed buffer
        let kernel_len = nc
            .checked_mul(kc)
            .ok_or(GemmError::SizeOverflow { name: "kernel" })?;
        check_len("kernel", kernel.len(), kernel_len)?;
        let size = checked_packed_weights_size(nc, kc, nr, kr, sr)?;

        let mut packed = AVec::<u8, ConstAlign<64>>::from_iter(64, core::iter::repeat_n(0, size));
        let izp = desc.input.zero_point;
        if desc.transpose_weights {
            pack_qs8_gemm_gio_w(nc, kc, nr, kr, sr, nc, kernel, bias, izp, &mut packed)?;
        } else {
            pack_qs8_gemm_goi_w(nc, kc, nr, kr, sr, kernel, bias, izp, &mut packed)?;
        }

        log::debug!(
            "fully connected {kc} -> {nc}: {} / {}, scale {scale}, {} packed bytes",
            gemm.single.name,
            gemm.full.name,
            packed.len(),
        );

        Ok(Self {
            desc,
            gemm,
            params,
            num_threads: config.num_threads,
            packed,
        })
    }

    pub fn desc(&self) -> &FullyConnectedDesc {
        &self.desc
    }

    pub fn gemm_config(&self) -> &GemmConfig {
        &self.gemm
    }

    pub fn params(&self) -> &Qs8ConvMinmaxParams {
        &self.params
    }

    /// Computes `batch` rows of output, `input` and `output` rows being `input_stride` and
    /// `output_stride` elements apart.
    pub fn run(
        &self,
        batch: usize,
        input: &[i8],
        input_stride: usize,
        output: &mut [i8],
        output_stride: usize,
        par: Parallelism,
    ) -> Result<()> {
        let kc = self.desc.input_channels;
        let nc = self.desc.output_channels;

        if input_stride < kc {
            return Err(GemmError::InvalidStride {
                name: "input",
                stride: input_stride,
                channels: kc,
            });
        }
        if output_stride < nc {
            return Err(GemmError::InvalidStride {
                name: "output",
                stride: output_stride,
                channels: nc,
            });
        }
        if batch == 0 {
            return Ok(());
        }
        check_len("input", input.len(), strided_len("input", batch, input_stride, kc)?)?;
        check_len("output", output.len(), strided_len("output", batch, output_stride, nc)?)?;

        let par = match par {
            #[cfg(feature = "rayon")]
            Parallelism::Rayon(0) => Parallelism::Rayon(self.num_threads),
            par => par,
        };

        // strides and lengths are checked above, the kernels are supported by construction
        unsafe {
            crate::gemm(
                &self.gemm,
                batch,
                nc,
                kc,
                input.as_ptr(),
                input_stride,
                self.packed.as_ptr(),
                output.as_mut_ptr(),
                output_stride,
                &self.params,
                par,
            )
        };
        Ok(())
    }
}
