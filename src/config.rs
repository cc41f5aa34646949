//! Runtime configuration and per-isa kernel selection.

use std::env;

use crate::error::{GemmError, Result};
use crate::ukernel::{find, GemmMicrokernel};
use crate::Isa;

/// Caps the isa level used for dispatch, e.g. `QS8_GEMM_MAX_ISA=sse41`.
pub const ENV_MAX_ISA: &str = "QS8_GEMM_MAX_ISA";
/// Thread count an operator uses when asked for `Parallelism::Rayon(0)`.
pub const ENV_NUM_THREADS: &str = "QS8_GEMM_NUM_THREADS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub max_isa: Option<Isa>,
    pub num_threads: usize,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let max_isa = env::var(ENV_MAX_ISA).ok();
        let num_threads = env::var(ENV_NUM_THREADS).ok();
        Self::from_vars(max_isa.as_deref(), num_threads.as_deref())
    }

    /// Builds a config from the raw values of [`ENV_MAX_ISA`] and [`ENV_NUM_THREADS`].
    /// Invalid values are logged and ignored.
    pub fn from_vars(max_isa: Option<&str>, num_threads: Option<&str>) -> Self {
        let mut config = Self {
            max_isa: None,
            num_threads: num_cpus::get(),
        };

        if let Some(val) = max_isa {
            match val.parse::<Isa>() {
                Ok(isa) => config.max_isa = Some(isa),
                Err(err) => log::warn!("ignoring {ENV_MAX_ISA}: {err}"),
            }
        }

        if let Some(val) = num_threads {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.num_threads = n,
                _ => log::warn!("ignoring {ENV_NUM_THREADS}: `{val}` is not a positive integer"),
            }
        }

        config
    }

    /// Highest isa level both supported by the cpu and allowed by this config.
    pub fn isa(&self) -> Isa {
        let detected = Isa::detect();
        match self.max_isa {
            Some(max) => Ord::min(max, detected),
            None => detected,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Kernel pair for one isa level: `single` is used for single row problems, `full` otherwise.
/// Both share `nr`, `kr` and `sr`, so weights packed once serve either kernel.
#[derive(Copy, Clone, Debug)]
pub struct GemmConfig {
    pub single: &'static GemmMicrokernel,
    pub full: &'static GemmMicrokernel,
}

impl GemmConfig {
    pub fn for_isa(isa: Isa) -> Result<Self> {
        let (single, full) = match isa {
            Isa::Avx512Skx => (
                "qs8_gemm_minmax_fp32_ukernel_1x16c8__avx512skx",
                "qs8_gemm_minmax_fp32_ukernel_4x16c8__avx512skx",
            ),
            Isa::Avx2 => (
                "qs8_gemm_minmax_fp32_ukernel_1x8c8__avx2",
                "qs8_gemm_minmax_fp32_ukernel_3x8c8__avx2",
            ),
            Isa::Avx => (
                "qs8_gemm_minmax_fp32_ukernel_1x4c8__avx_ld128",
                "qs8_gemm_minmax_fp32_ukernel_2x4c8__avx_ld128",
            ),
            Isa::Sse41 => (
                "qs8_gemm_minmax_fp32_ukernel_1x4c8__sse41_ld64",
                "qs8_gemm_minmax_fp32_ukernel_3x4c8__sse41_ld64",
            ),
            Isa::Ssse3 => (
                "qs8_gemm_minmax_fp32_ukernel_1x4c8__ssse3_ld64",
                "qs8_gemm_minmax_fp32_ukernel_3x4c8__ssse3_ld64",
            ),
            Isa::Sse2 => (
                "qs8_gemm_minmax_fp32_ukernel_1x4c8__sse2_ld64",
                "qs8_gemm_minmax_fp32_ukernel_3x4c8__sse2_ld64",
            ),
            Isa::Scalar => (
                "qs8_gemm_minmax_fp32_ukernel_1x4__scalar_lrintf",
                "qs8_gemm_minmax_fp32_ukernel_4x4__scalar_lrintf",
            ),
        };

        // x86 kernels are only registered on x86_64 targets
        let (Some(single), Some(full)) = (find(single), find(full)) else {
            return Err(GemmError::UnsupportedIsa { name: full, isa });
        };
        if !full.is_supported() {
            return Err(GemmError::UnsupportedIsa {
                name: full.name,
                isa,
            });
        }

        debug_assert_eq!((single.nr, single.kr, single.sr), (full.nr, full.kr, full.sr));
        Ok(Self { single, full })
    }

    pub fn detect(config: &RuntimeConfig) -> Self {
        let isa = config.isa();
        let gemm = Self::for_isa(isa).or_else(|_| Self::for_isa(Isa::Scalar));
        let gemm = match gemm {
            Ok(gemm) => gemm,
            Err(_) => unreachable!("scalar kernels are always registered"),
        };
        log::debug!(
            "qs8 gemm: isa {isa}, kernels {} / {}",
            gemm.single.name,
            gemm.full.name
        );
        gemm
    }

    pub fn nr(&self) -> usize {
        self.full.nr
    }

    pub fn kr(&self) -> usize {
        self.full.kr
    }

    pub fn sr(&self) -> usize {
        self.full.sr
    }
}
