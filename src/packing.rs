//! Weight packing for the `qs8_gemm` kernels.
//!
//! The packed buffer is a sequence of column groups, one per `nr` output channels. Each group
//! starts with `nr` int32 biases (stored unaligned, in native byte order), followed by the
//! weights of those channels laid out as `[round_up(kc, kr * sr) / kr][nr][kr]` int8 values.
//! Channels past `nc` and k indices past `kc` are zero.
//!
//! The input zero point is folded into the packed bias, `bias - izp * sum_k w`, so kernels can
//! multiply raw int8 inputs.

use crate::error::{check_len, strided_len, GemmError, Result};

#[inline]
pub fn round_up(x: usize, q: usize) -> usize {
    x.div_ceil(q) * q
}

/// Bytes taken by one packed group of `nr` output channels.
#[inline]
pub fn packed_group_stride(kc: usize, nr: usize, kr: usize, sr: usize) -> usize {
    nr * (size_of::<i32>() + round_up(kc, kr * sr))
}

/// Bytes needed to pack `nc` output channels of `kc` inputs each.
#[inline]
pub fn packed_weights_size(nc: usize, kc: usize, nr: usize, kr: usize, sr: usize) -> usize {
    nc.div_ceil(nr) * packed_group_stride(kc, nr, kr, sr)
}

/// [`packed_weights_size`] for untrusted dimensions, failing instead of overflowing.
pub fn checked_packed_weights_size(
    nc: usize,
    kc: usize,
    nr: usize,
    kr: usize,
    sr: usize,
) -> Result<usize> {
    check_tile(nr, kr, sr)?;
    kr.checked_mul(sr)
        .and_then(|skr| kc.checked_next_multiple_of(skr))
        .and_then(|kc_padded| kc_padded.checked_add(size_of::<i32>()))
        .and_then(|per_channel| per_channel.checked_mul(nr))
        .and_then(|group_stride| group_stride.checked_mul(nc.div_ceil(nr)))
        .ok_or(GemmError::SizeOverflow {
            name: "packed weights",
        })
}

fn check_tile(nr: usize, kr: usize, sr: usize) -> Result<()> {
    if nr == 0 {
        return Err(GemmError::InvalidDimension { name: "nr" });
    }
    for (name, value) in [("kr", kr), ("sr", sr)] {
        if !value.is_power_of_two() {
            return Err(GemmError::InvalidTile { name, value });
        }
    }
    Ok(())
}

/// Pack weights stored as `[nc][kc]` (output channels major).
pub fn pack_qs8_gemm_goi_w(
    nc: usize,
    kc: usize,
    nr: usize,
    kr: usize,
    sr: usize,
    kernel: &[i8],
    bias: Option<&[i32]>,
    input_zero_point: i8,
    packed: &mut [u8],
) -> Result<()> {
    check_tile(nr, kr, sr)?;
    let kernel_len = nc
        .checked_mul(kc)
        .ok_or(GemmError::SizeOverflow { name: "kernel" })?;
    check_len("kernel", kernel.len(), kernel_len)?;
    pack_imp(
        nc,
        kc,
        nr,
        kr,
        sr,
        |n, k| kernel[n * kc + k],
        bias,
        input_zero_point,
        packed,
    )
}

/// Pack weights stored as `[kc][k_stride]` (input channels major), as produced by a
/// transposed weight layout. Only the first `nc` entries of each row are used.
pub fn pack_qs8_gemm_gio_w(
    nc: usize,
    kc: usize,
    nr: usize,
    kr: usize,
    sr: usize,
    k_stride: usize,
    kernel: &[i8],
    bias: Option<&[i32]>,
    input_zero_point: i8,
    packed: &mut [u8],
) -> Result<()> {
    check_tile(nr, kr, sr)?;
    if k_stride < nc {
        return Err(GemmError::InvalidStride {
            name: "kernel",
            stride: k_stride,
            channels: nc,
        });
    }
    if kc > 0 {
        check_len("kernel", kernel.len(), strided_len("kernel", kc, k_stride, nc)?)?;
    }
    pack_imp(
        nc,
        kc,
        nr,
        kr,
        sr,
        |n, k| kernel[k * k_stride + n],
        bias,
        input_zero_point,
        packed,
    )
}

fn pack_imp(
    nc: usize,
    kc: usize,
    nr: usize,
    kr: usize,
    sr: usize,
    weight: impl Fn(usize, usize) -> i8,
    bias: Option<&[i32]>,
    input_zero_point: i8,
    packed: &mut [u8],
) -> Result<()> {
    if let Some(bias) = bias {
        check_len("bias", bias.len(), nc)?;
    }
    let size = checked_packed_weights_size(nc, kc, nr, kr, sr)?;
    check_len("packed weights", packed.len(), size)?;

    let packed = &mut packed[..size];
    packed.fill(0);

    let izp = i32::from(input_zero_point);
    let skr = kr * sr;
    let kc_padded = round_up(kc, skr);
    let group_stride = packed_group_stride(kc, nr, kr, sr);

    for (group, out) in packed.chunks_exact_mut(group_stride).enumerate() {
        let n_start = group * nr;
        let n_len = Ord::min(nc - n_start, nr);

        let (bias_out, mut weights_out) = out.split_at_mut(nr * size_of::<i32>());
        let mut ksum = vec![0i32; n_len];

        for kr_block_start in (0..kc_padded).step_by(kr) {
            let (tile, rest) = weights_out.split_at_mut(nr * kr);
            for n_offset in 0..n_len {
                for kr_offset in 0..kr {
                    // with sr > 1 the k indices rotate within each kr * sr block
                    let k = (kr_block_start / skr) * skr
                        + ((kr_block_start + kr_offset + n_offset * kr) & (skr - 1));
                    if k < kc {
                        let v = weight(n_start + n_offset, k);
                        ksum[n_offset] = ksum[n_offset].wrapping_add(i32::from(v));
                        tile[n_offset * kr + kr_offset] = v as u8;
                    }
                }
            }
            weights_out = rest;
        }

        for n_offset in 0..n_len {
            let b = bias.map_or(0, |bias| bias[n_start + n_offset]);
            let b = b.wrapping_sub(ksum[n_offset].wrapping_mul(izp));
            bias_out[n_offset * 4..n_offset * 4 + 4].copy_from_slice(&b.to_ne_bytes());
        }
    }

    Ok(())
}
