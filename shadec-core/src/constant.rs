//! Typed constant values, hashable so they can be interned per type.
use half::f16;
use ordered_float::OrderedFloat;

use crate::error::{Result, ShaderError};
use crate::ty::ScalarType;

/// A constant scalar, carrying its concrete width and signedness.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum ConstantValue {
    Bool(bool),
    S16(i16),
    S32(i32),
    S64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F16(OrderedFloat<f16>),
    F32(OrderedFloat<f32>),
    F64(OrderedFloat<f64>),
}
impl From<bool> for ConstantValue {
    fn from(x: bool) -> Self {
        Self::Bool(x)
    }
}
impl From<i32> for ConstantValue {
    fn from(x: i32) -> Self {
        Self::S32(x)
    }
}
impl From<u32> for ConstantValue {
    fn from(x: u32) -> Self {
        Self::U32(x)
    }
}
impl From<f32> for ConstantValue {
    fn from(x: f32) -> Self {
        Self::F32(OrderedFloat(x))
    }
}
impl ConstantValue {
    /// The scalar type this value is a constant of.
    pub fn scalar_ty(&self) -> ScalarType {
        match self {
            Self::Bool(_) => ScalarType::Bool,
            Self::S16(_) => ScalarType::int(16),
            Self::S32(_) => ScalarType::int(32),
            Self::S64(_) => ScalarType::int(64),
            Self::U8(_) => ScalarType::uint(8),
            Self::U16(_) => ScalarType::uint(16),
            Self::U32(_) => ScalarType::uint(32),
            Self::U64(_) => ScalarType::uint(64),
            Self::F16(_) => ScalarType::float(16),
            Self::F32(_) => ScalarType::float(32),
            Self::F64(_) => ScalarType::float(64),
        }
    }

    /// Encode the value as SPIR-V literal words. Values narrower than a word
    /// occupy one word; 64-bit values occupy two, low word first.
    pub fn words(&self) -> Vec<u32> {
        match *self {
            // Booleans encode as OpConstantTrue/False and carry no literal.
            Self::Bool(x) => vec![x as u32],
            Self::S16(x) => vec![x as u16 as u32],
            Self::S32(x) => vec![x as u32],
            Self::S64(x) => {
                let x = x as u64;
                vec![x as u32, (x >> 32) as u32]
            }
            Self::U8(x) => vec![x as u32],
            Self::U16(x) => vec![x as u32],
            Self::U32(x) => vec![x],
            Self::U64(x) => vec![x as u32, (x >> 32) as u32],
            Self::F16(x) => vec![x.0.to_bits() as u32],
            Self::F32(x) => vec![x.0.to_bits()],
            Self::F64(x) => {
                let bits = x.0.to_bits();
                vec![bits as u32, (bits >> 32) as u32]
            }
        }
    }

    /// A constant of `ty` holding the integer `x`.
    pub fn int_of(ty: &ScalarType, x: i64) -> Result<Self> {
        let out = match *ty {
            ScalarType::Int {
                bits: 16,
                signed: true,
            } => Self::S16(x as i16),
            ScalarType::Int {
                bits: 32,
                signed: true,
            } => Self::S32(x as i32),
            ScalarType::Int {
                bits: 64,
                signed: true,
            } => Self::S64(x),
            ScalarType::Int {
                bits: 8,
                signed: false,
            } => Self::U8(x as u8),
            ScalarType::Int {
                bits: 16,
                signed: false,
            } => Self::U16(x as u16),
            ScalarType::Int {
                bits: 32,
                signed: false,
            } => Self::U32(x as u32),
            ScalarType::Int {
                bits: 64,
                signed: false,
            } => Self::U64(x as u64),
            _ => {
                return Err(ShaderError::ty(format!(
                    "cannot make an integer constant of type {}",
                    ty
                )))
            }
        };
        Ok(out)
    }

    /// A constant of `ty` holding the float `x`.
    pub fn float_of(ty: &ScalarType, x: f64) -> Result<Self> {
        let out = match *ty {
            ScalarType::Float { bits: 16 } => Self::F16(OrderedFloat(f16::from_f64(x))),
            ScalarType::Float { bits: 32 } => Self::F32(OrderedFloat(x as f32)),
            ScalarType::Float { bits: 64 } => Self::F64(OrderedFloat(x)),
            _ => {
                return Err(ShaderError::ty(format!(
                    "cannot make a float constant of type {}",
                    ty
                )))
            }
        };
        Ok(out)
    }

    /// The zero of `ty`.
    pub fn zero_of(ty: &ScalarType) -> Result<Self> {
        match ty {
            ScalarType::Bool => Ok(Self::Bool(false)),
            ScalarType::Int { .. } => Self::int_of(ty, 0),
            ScalarType::Float { .. } => Self::float_of(ty, 0.0),
        }
    }

    /// The one of `ty`.
    pub fn one_of(ty: &ScalarType) -> Result<Self> {
        match ty {
            ScalarType::Bool => Ok(Self::Bool(true)),
            ScalarType::Int { .. } => Self::int_of(ty, 1),
            ScalarType::Float { .. } => Self::float_of(ty, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_encoding() {
        assert_eq!(ConstantValue::from(1.0f32).words(), vec![0x3f80_0000]);
        assert_eq!(ConstantValue::from(-1i32).words(), vec![0xffff_ffff]);
        assert_eq!(
            ConstantValue::S64(-2).words(),
            vec![0xffff_fffe, 0xffff_ffff]
        );
        let half_one = ConstantValue::float_of(&ScalarType::float(16), 1.0).unwrap();
        assert_eq!(half_one.words(), vec![0x3c00]);
    }
}
