pub use spirv;

pub mod bin;
pub mod constant;
pub mod emit;
pub mod error;
pub mod nsb;
pub mod ty;
pub mod walk;
