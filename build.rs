#![allow(non_camel_case_types, dead_code, unused_macros)]

use std::cell::RefCell;
use std::env;
use std::fs;
use std::path::Path;

use defer::defer;
use interpol::{format, println};

type Result<T = ()> = std::result::Result<T, Box<dyn std::error::Error>>;

macro_rules! setup {
    ($ctx: ident) => {
        macro_rules! rs {
            ($code: tt) => {{
                use std::fmt::Write;

                let code = &mut *$ctx.code.borrow_mut();
                ::interpol::writeln!(code, $code).unwrap();
            }};
        }
    };
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Isa {
    Scalar,
    Sse2,
    Ssse3,
    Sse41,
    Avx,
    Avx2,
    Avx512Skx,
}

impl Isa {
    fn name(self) -> &'static str {
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

    fn path(self) -> &'static str {
        match self {
            Isa::Scalar => "Isa::Scalar",
            Isa::Sse2 => "Isa::Sse2",
            Isa::Ssse3 => "Isa::Ssse3",
            Isa::Sse41 => "Isa::Sse41",
            Isa::Avx => "Isa::Avx",
            Isa::Avx2 => "Isa::Avx2",
            Isa::Avx512Skx => "Isa::Avx512Skx",
        }
    }

    fn target_feature(self) -> Option<&'static str> {
        match self {
            Isa::Scalar => None,
            Isa::Sse2 => Some("sse2"),
            Isa::Ssse3 => Some("ssse3"),
            Isa::Sse41 => Some("sse4.1"),
            Isa::Avx => Some("avx"),
            Isa::Avx2 => Some("avx2"),
            Isa::Avx512Skx => Some("avx512f,avx512bw,avx512dq,avx512vl"),
        }
    }

    // avx kernels are the sse4.1 kernels compiled with vex encoding
    fn sse_level(self) -> &'static str {
        match self {
            Isa::Sse2 => "sse::Sse2",
            Isa::Ssse3 => "sse::Ssse3",
            Isa::Sse41 | Isa::Avx => "sse::Sse41",
            _ => panic!(),
        }
    }
}

pub struct Kernel {
    pub name: String,
    pub isa: Isa,
    pub mr: usize,
    pub nr: usize,
    pub kr: usize,
    pub sr: usize,
    pub body: String,
}

pub struct Ctx {
    pub code: RefCell<String>,
}

impl Ctx {
    pub fn new() -> Self {
        Self {
            code: RefCell::new(String::new()),
        }
    }
}

const PREFIX: &str = "qs8_gemm_minmax_fp32_ukernel";

fn scalar_kernels(kernels: &mut Vec<Kernel>) {
    let isa = Isa::Scalar;
    for variant in ["fmagic", "imagic", "lrintf"] {
        let marker = match variant {
            "fmagic" => "scalar::Fmagic",
            "imagic" => "scalar::Imagic",
            _ => "scalar::Lrintf",
        };
        for nr in [2, 4] {
            for mr in 1..=4 {
                kernels.push(Kernel {
                    name: format!("{PREFIX}_{mr}x{nr}__scalar_{variant}"),
                    isa,
                    mr,
                    nr,
                    kr: 1,
                    sr: 1,
                    body: format!("scalar::gemm::<{marker}, {mr}, {nr}>"),
                });
            }
        }
    }
}

fn sse_kernels(kernels: &mut Vec<Kernel>) {
    for isa in [Isa::Sse2, Isa::Ssse3, Isa::Sse41, Isa::Avx] {
        let level = isa.sse_level();
        let isa_name = isa.name();

        for ld in ["ld64", "ld128"] {
            let load = if ld == "ld64" { "sse::Ld64" } else { "sse::Ld128" };

            // c2 kernels only need sse2 shuffles, ssse3 adds nothing over sse2 there
            if isa != Isa::Ssse3 {
                for mr in 1..=4 {
                    kernels.push(Kernel {
                        name: format!("{PREFIX}_{mr}x4c2__{isa_name}_{ld}"),
                        isa,
                        mr,
                        nr: 4,
                        kr: 2,
                        sr: 1,
                        body: format!("sse::gemm_4c2::<{level}, {load}, {mr}>"),
                    });
                }
            }

            for mr in 1..=3 {
                kernels.push(Kernel {
                    name: format!("{PREFIX}_{mr}x4c8__{isa_name}_{ld}"),
                    isa,
                    mr,
                    nr: 4,
                    kr: 8,
                    sr: 1,
                    body: format!("sse::gemm_4c8::<{level}, {load}, {mr}>"),
                });
            }
        }
    }
}

fn avx2_kernels(kernels: &mut Vec<Kernel>) {
    for mr in 1..=3 {
        kernels.push(Kernel {
            name: format!("{PREFIX}_{mr}x8c8__avx2"),
            isa: Isa::Avx2,
            mr,
            nr: 8,
            kr: 8,
            sr: 1,
            body: format!("avx2::gemm_8c8::<{mr}>"),
        });
    }
}

fn avx512_kernels(kernels: &mut Vec<Kernel>) {
    for mr in 1..=4 {
        kernels.push(Kernel {
            name: format!("{PREFIX}_{mr}x16c8__avx512skx"),
            isa: Isa::Avx512Skx,
            mr,
            nr: 16,
            kr: 8,
            sr: 1,
            body: format!("avx512::gemm_16c8::<{mr}>"),
        });
    }
}

fn emit(kernels: &[Kernel]) -> String {
    let ctx = Ctx::new();
    setup!(ctx);

    rs!("// generated by build.rs, do not edit");

    for kernel in kernels {
        let name = &kernel.name;
        let body = &kernel.body;

        rs!("");
        if let Some(feature) = kernel.isa.target_feature() {
            rs!("#[target_feature(enable = \"{feature}\")]");
        }
        rs!("pub unsafe fn {name}(");
        {
            defer!(rs!(") {{"));
            for arg in [
                "mr: usize",
                "nc: usize",
                "kc: usize",
                "a: *const i8",
                "a_stride: usize",
                "w: *const u8",
                "c: *mut i8",
                "cm_stride: usize",
                "cn_stride: usize",
                "params: &Qs8ConvMinmaxParams",
            ] {
                rs!("    {arg},");
            }
        }
        {
            defer!(rs!("}}"));
            rs!("    unsafe {{ {body}(mr, nc, kc, a, a_stride, w, c, cm_stride, cn_stride, params) }}");
        }
    }

    rs!("");
    rs!("pub static QS8_GEMM_MINMAX_FP32_UKERNELS: &[GemmMicrokernel] = &[");
    {
        defer!(rs!("];"));
        for kernel in kernels {
            let Kernel {
                name,
                isa,
                mr,
                nr,
                kr,
                sr,
                ..
            } = kernel;
            let isa = isa.path();

            rs!("    GemmMicrokernel {{");
            rs!("        name: \"{name}\",");
            rs!("        isa: {isa},");
            rs!("        mr: {mr},");
            rs!("        nr: {nr},");
            rs!("        kr: {kr},");
            rs!("        sr: {sr},");
            rs!("        ukernel: {name},");
            rs!("    }},");
        }
    }

    ctx.code.into_inner()
}

fn main() -> Result {
    let mut kernels = vec![];

    scalar_kernels(&mut kernels);

    if env::var("CARGO_CFG_TARGET_ARCH").as_deref() == Ok("x86_64") {
        sse_kernels(&mut kernels);
        avx2_kernels(&mut kernels);
        avx512_kernels(&mut kernels);
    }

    let code = emit(&kernels);

    let out_dir = env::var_os("OUT_DIR").ok_or("OUT_DIR is not set")?;
    let dest_path = Path::new(&out_dir).join("ukernels.rs");
    fs::write(&dest_path, &code)?;

    println!("cargo::rerun-if-changed=build.rs");

    Ok(())
}
