//! Extended-instruction dispatch.
//!
//! Calls that are neither type constructors nor texture operations resolve
//! against this table of GLSL.std.450 instructions. The set is imported
//! lazily on first use. Integer-capable functions pick their op family from
//! the operand's element kind.
use spirv::{GLOp, Op};

use shadec_core::emit::InstrBuilder;
use shadec_core::error::{Result, ShaderError};
use shadec_core::ty::{ScalarType, Type};

use crate::access::ValueId;
use crate::generate::{Generator, Operand};

enum ResultShape {
    /// Result type equals the first argument's type.
    Same,
    /// Result collapses to the element scalar (length, distance, ...).
    Scalar,
}

struct ExtSpec {
    nargs: usize,
    float_op: Option<GLOp>,
    int_op: Option<GLOp>,
    uint_op: Option<GLOp>,
    result: ResultShape,
}

fn float_only(op: GLOp, nargs: usize) -> ExtSpec {
    ExtSpec {
        nargs,
        float_op: Some(op),
        int_op: None,
        uint_op: None,
        result: ResultShape::Same,
    }
}

fn by_kind(f: GLOp, s: GLOp, u: GLOp, nargs: usize) -> ExtSpec {
    ExtSpec {
        nargs,
        float_op: Some(f),
        int_op: Some(s),
        uint_op: Some(u),
        result: ResultShape::Same,
    }
}

fn lookup(name: &str) -> Option<ExtSpec> {
    use GLOp::*;
    let spec = match name {
        "sqrt" => float_only(Sqrt, 1),
        "inverse_sqrt" => float_only(InverseSqrt, 1),
        "pow" => float_only(Pow, 2),
        "sin" => float_only(Sin, 1),
        "cos" => float_only(Cos, 1),
        "tan" => float_only(Tan, 1),
        "asin" => float_only(Asin, 1),
        "acos" => float_only(Acos, 1),
        "atan" => float_only(Atan, 1),
        "sinh" => float_only(Sinh, 1),
        "cosh" => float_only(Cosh, 1),
        "tanh" => float_only(Tanh, 1),
        "exp" => float_only(Exp, 1),
        "log" => float_only(Log, 1),
        "exp2" => float_only(Exp2, 1),
        "log2" => float_only(Log2, 1),
        "floor" => float_only(Floor, 1),
        "ceil" => float_only(Ceil, 1),
        "round" => float_only(Round, 1),
        "trunc" => float_only(Trunc, 1),
        "fract" => float_only(Fract, 1),
        "radians" => float_only(Radians, 1),
        "degrees" => float_only(Degrees, 1),
        "normalize" => float_only(Normalize, 1),
        "cross" => float_only(Cross, 2),
        "mix" => float_only(FMix, 3),
        "step" => float_only(Step, 2),
        "smoothstep" => float_only(SmoothStep, 3),
        "nmin" => float_only(NMin, 2),
        "nmax" => float_only(NMax, 2),
        "nclamp" => float_only(NClamp, 3),
        "matrix_inverse" => float_only(MatrixInverse, 1),
        "abs" => ExtSpec {
            nargs: 1,
            float_op: Some(FAbs),
            int_op: Some(SAbs),
            uint_op: None,
            result: ResultShape::Same,
        },
        "sign" => ExtSpec {
            nargs: 1,
            float_op: Some(FSign),
            int_op: Some(SSign),
            uint_op: None,
            result: ResultShape::Same,
        },
        "min" => by_kind(FMin, SMin, UMin, 2),
        "max" => by_kind(FMax, SMax, UMax, 2),
        "clamp" => by_kind(FClamp, SClamp, UClamp, 3),
        "length" => ExtSpec {
            nargs: 1,
            float_op: Some(Length),
            int_op: None,
            uint_op: None,
            result: ResultShape::Scalar,
        },
        "distance" => ExtSpec {
            nargs: 2,
            float_op: Some(Distance),
            int_op: None,
            uint_op: None,
            result: ResultShape::Scalar,
        },
        "determinant" => ExtSpec {
            nargs: 1,
            float_op: Some(Determinant),
            int_op: None,
            uint_op: None,
            result: ResultShape::Scalar,
        },
        _ => return None,
    };
    Some(spec)
}

impl Generator {
    /// Dispatch `name` against the extended-instruction table. Returns
    /// `None` if the name is not in the table at all.
    pub(crate) fn call_stdlib(
        &mut self,
        name: &str,
        args: Vec<Operand>,
    ) -> Result<Option<ValueId>> {
        let spec = match lookup(name) {
            Some(spec) => spec,
            None => return Ok(None),
        };
        let mut vals = Vec::with_capacity(args.len());
        for arg in args {
            vals.push(self.as_value(arg)?);
        }
        if vals.len() != spec.nargs {
            return Err(ShaderError::ty(format!(
                "{}() takes {} arguments, got {}",
                name,
                spec.nargs,
                vals.len()
            )));
        }

        // GLSL-style convenience: trailing scalar arguments broadcast when
        // the leading argument is a vector.
        if let Some(vec_ty) = vals[0].ty.as_vector().cloned() {
            for i in 1..vals.len() {
                if vals[i].ty == Type::Scalar(vec_ty.scalar_ty.clone()) {
                    let n = vec_ty.scalar_count as usize;
                    let parts = vec![vals[i].clone(); n];
                    vals[i] = self.vector_packing(&vec_ty, parts)?;
                }
            }
        }
        for val in &vals[1..] {
            if val.ty != vals[0].ty {
                return Err(ShaderError::ty(format!(
                    "{}() arguments must share one type, got {} and {}",
                    name, vals[0].ty, val.ty
                )));
            }
        }

        let elem = vals[0]
            .ty
            .element_scalar()
            .cloned()
            .ok_or_else(|| ShaderError::ty(format!("cannot apply {}() to {}", name, vals[0].ty)))?;
        let glop = match elem {
            ScalarType::Float { .. } => spec.float_op,
            ScalarType::Int { signed: true, .. } => spec.int_op,
            ScalarType::Int { signed: false, .. } => spec.uint_op,
            ScalarType::Bool => None,
        }
        .ok_or_else(|| ShaderError::ty(format!("cannot apply {}() to {}", name, vals[0].ty)))?;

        let result_ty = match spec.result {
            ResultShape::Same => vals[0].ty.clone(),
            ResultShape::Scalar => Type::Scalar(elem),
        };
        let set_id = self.b.ext_inst_import("GLSL.std.450");
        let ty_id = self.b.type_id(&result_ty)?;
        let id = self.b.alloc_id();
        let mut instr = InstrBuilder::new(Op::ExtInst)
            .push(ty_id)
            .push(id)
            .push(set_id)
            .push(glop as u32);
        for val in &vals {
            instr = instr.push(val.id);
        }
        self.b.push_func(instr.build());
        Ok(Some(ValueId { id, ty: result_ty }))
    }
}
