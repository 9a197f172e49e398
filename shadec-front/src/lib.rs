//! Front end of the shadec shader compiler.
//!
//! Consumes the source stack-machine dialect ([`code::FuncCode`]) and emits
//! normalized shader bytecode with explicit labels, branches and loop
//! headers, ready for the back-end generator.
use std::sync::atomic::AtomicBool;

pub mod code;
mod fix;
pub mod loops;
mod translate;

pub use crate::translate::{detect_stage, translate};

/// Whether short ternary patterns should lower to a select instead of
/// branches. Set once before compilation; read once during translation.
pub static OPT_CONVERT_TERNARY_TO_SELECT: AtomicBool = AtomicBool::new(true);
