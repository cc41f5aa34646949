use core::fmt;
use core::str::FromStr;
use std::sync::OnceLock;

use crate::error::GemmError;

/// Instruction set levels a microkernel can target, ordered from least to most capable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Isa {
    Scalar,
    Sse2,
    Ssse3,
    Sse41,
    Avx,
    Avx2,
    /// avx512 f + bw + dq + vl, as found on skylake-x and later.
    Avx512Skx,
}

static DETECTED: OnceLock<Isa> = OnceLock::new();

impl Isa {
    pub const ALL: &[Self] = &[
        Self::Scalar,
        Self::Sse2,
        Self::Ssse3,
        Self::Sse41,
        Self::Avx,
        Self::Avx2,
        Self::Avx512Skx,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Isa::Scalar => "scalar",
            Isa::Sse2 => "sse2",
            Isa::Ssse3 => "ssse3",
            Isa::Sse41 => "sse41",
            Isa::Avx => "avx",
            Isa::Avx2 => "avx2",
            Isa::Avx512Skx => "avx512skx",
        }
    }

    /// Highest level supported by both the cpu and the os. Detection runs once per process.
    pub fn detect() -> Self {
        *DETECTED.get_or_init(|| {
            let isa = detect_uncached();
            log::debug!("detected isa level: {isa}");
            isa
        })
    }

    pub fn is_supported(self) -> bool {
        self <= Self::detect()
    }
}

#[cfg(all(target_arch = "x86_64", not(miri)))]
fn detect_uncached() -> Isa {
    use raw_cpuid::CpuId;

    let cpuid = CpuId::new();
    let Some(info) = cpuid.get_feature_info() else {
        return Isa::Scalar;
    };

    if !info.has_sse2() {
        return Isa::Scalar;
    }

    let mut isa = Isa::Sse2;
    if info.has_ssse3() {
        isa = Isa::Ssse3;
    } else {
        return isa;
    }
    if info.has_sse41() {
        isa = Isa::Sse41;
    } else {
        return isa;
    }

    // ymm state must be enabled by the os, not only reported by cpuid
    let xcr0 = if info.has_oxsave() {
        unsafe { xgetbv0() }
    } else {
        0
    };
    let os_avx = xcr0 & 0b110 == 0b110;
    let os_avx512 = os_avx && xcr0 & 0b1110_0000 == 0b1110_0000;

    if info.has_avx() && os_avx {
        isa = Isa::Avx;
    } else {
        return isa;
    }

    let Some(ext) = cpuid.get_extended_feature_info() else {
        return isa;
    };

    if ext.has_avx2() {
        isa = Isa::Avx2;
    } else {
        return isa;
    }

    if os_avx512
        && ext.has_avx512f()
        && ext.has_avx512bw()
        && ext.has_avx512dq()
        && ext.has_avx512vl()
    {
        isa = Isa::Avx512Skx;
    }

    isa
}

#[cfg(all(target_arch = "x86_64", not(miri)))]
#[target_feature(enable = "xsave")]
unsafe fn xgetbv0() -> u64 {
    core::arch::x86_64::_xgetbv(0)
}

// miri can't execute cpuid, so only the scalar kernels run under it
#[cfg(any(not(target_arch = "x86_64"), miri))]
fn detect_uncached() -> Isa {
    Isa::Scalar
}

impl fmt::Display for Isa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Isa {
    type Err = GemmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|isa| isa.name() == lower)
            .ok_or_else(|| GemmError::UnknownIsa(s.to_string()))
    }
}
