//! shadec — a shader compiler.
//!
//! Takes a restricted, procedural shader description as a stack-machine
//! instruction stream ([`FuncCode`]), reconstructs structured control flow
//! into normalized shader bytecode, and generates a SPIR-V module from it.
//!
//! ```no_run
//! use shadec::{compile, CodeBuilder};
//! use shadec::nsb::{ResourceKind, Slot};
//!
//! let mut b = CodeBuilder::new("compute_fill");
//! b.arg("index", ResourceKind::Input, Slot::Name("GlobalInvocationId".into()), "i32");
//! b.arg("data", ResourceKind::Buffer, Slot::Pair(0, 0), "Array(f32)");
//! b.load_const(1.0); // value
//! b.load_fast("data"); // container
//! b.load_fast("index"); // index
//! b.op(shadec::SourceOp::StoreSubscr);
//! b.return_none();
//! let module = compile(&b.build()).unwrap();
//! std::fs::write("fill.spv", module.binary.bytes()).unwrap();
//! ```
use log::debug;

pub use shadec_core::bin::SpirvBinary;
pub use shadec_core::error::{Result, ShaderError};
pub use shadec_core::{nsb, ty};
pub use shadec_core::nsb::{Op, Stage};
pub use shadec_front::code::{CodeBuilder, FuncCode, ResourceDecl, SourceOp};
pub use shadec_front::OPT_CONVERT_TERNARY_TO_SELECT;

mod access;
mod branch;
mod builtins;
mod generate;
mod stdlib;

pub use generate::generate;

/// A compiled shader: the source description, its normalized bytecode, and
/// the SPIR-V module generated from it.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderModule {
    pub name: String,
    pub stage: Stage,
    pub source: FuncCode,
    pub nsb: Vec<Op>,
    pub binary: SpirvBinary,
}

impl ShaderModule {
    /// The normalized bytecode as JSON, one `[tag, args...]` tuple per op.
    pub fn nsb_json(&self) -> String {
        nsb::to_json(&self.nsb)
    }
    /// The module as little-endian bytes, ready to hand to a driver.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.binary.bytes().to_vec()
    }
    pub fn words(&self) -> &[u32] {
        self.binary.words()
    }
}

/// Compile a shader description to a SPIR-V module.
pub fn compile(func: &FuncCode) -> Result<ShaderModule> {
    let (stage, nsb) = shadec_front::translate(func)?;
    let binary = generate::generate(&nsb)?;
    debug!(
        "compiled '{}' ({}): {} bytecode ops, {} words",
        func.name,
        stage,
        nsb.len(),
        binary.words().len()
    );
    Ok(ShaderModule {
        name: func.name.clone(),
        stage,
        source: func.clone(),
        nsb,
        binary,
    })
}
