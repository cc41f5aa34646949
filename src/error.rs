use thiserror::Error;

use crate::Isa;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GemmError {
    #[error("requantization scale {0} is outside of the supported [2^-32, 256) range")]
    InvalidRequantizationScale(f32),
    #[error("{name} scale {value} must be finite and positive")]
    InvalidQuantizationScale { name: &'static str, value: f32 },
    #[error("output range [{min}, {max}] is empty")]
    InvalidOutputRange { min: i8, max: i8 },
    #[error("{name} must be nonzero")]
    InvalidDimension { name: &'static str },
    #[error("{name} = {value} must be a nonzero power of two")]
    InvalidTile { name: &'static str, value: usize },
    #[error("{name} stride {stride} is smaller than {channels} channels")]
    InvalidStride {
        name: &'static str,
        stride: usize,
        channels: usize,
    },
    #[error("{name} holds {actual} elements, expected at least {expected}")]
    BufferTooSmall {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("microkernel {name} needs {isa}, which this cpu does not support")]
    UnsupportedIsa { name: &'static str, isa: Isa },
    #[error("unknown isa level `{0}`")]
    UnknownIsa(String),
    #[error("{name} size overflows usize")]
    SizeOverflow { name: &'static str },
}

pub type Result<T> = std::result::Result<T, GemmError>;

pub(crate) fn check_len(name: &'static str, actual: usize, expected: usize) -> Result<()> {
    if actual < expected {
        Err(GemmError::BufferTooSmall {
            name,
            expected,
            actual,
        })
    } else {
        Ok(())
    }
}

/// Elements spanned by `rows >= 1` rows of `cols` elements, `stride` elements apart.
pub(crate) fn strided_len(
    name: &'static str,
    rows: usize,
    stride: usize,
    cols: usize,
) -> Result<usize> {
    debug_assert!(rows != 0);
    (rows - 1)
        .checked_mul(stride)
        .and_then(|len| len.checked_add(cols))
        .ok_or(GemmError::SizeOverflow { name })
}
