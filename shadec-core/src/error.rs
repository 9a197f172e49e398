//! Error kind reported by shadec procedures.
//!
//! Every failure the compiler reports to its caller is a [`ShaderError`].
//! Internal invariant violations are ordinary panics: they indicate a bug in
//! the compiler, not a bad input.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    /// A resource declaration is malformed: unknown kind, duplicate slot,
    /// unknown built-in name, and the like.
    #[error("declaration error: {0}")]
    Declaration(String),
    /// The source stream uses a construct outside the supported dialect.
    #[error("dialect error: {0}")]
    Dialect(String),
    /// Operand shapes don't fit the operation.
    #[error("type error: {0}")]
    Type(String),
    /// The control-flow or module structure is inconsistent.
    #[error("structural error: {0}")]
    Structural(String),
}

impl ShaderError {
    pub fn declaration(msg: impl Into<String>) -> Self {
        Self::Declaration(msg.into())
    }
    pub fn dialect(msg: impl Into<String>) -> Self {
        Self::Dialect(msg.into())
    }
    pub fn ty(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ShaderError>;
