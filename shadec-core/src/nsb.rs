//! Normalized shader bytecode.
//!
//! The stack IR exchanged between the front-end translator and the back-end
//! generator. Ops form a closed alphabet; the generator dispatches on them
//! exhaustively. The whole program is JSON-representable: each op serializes
//! as a `[tag, args...]` tuple.
use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::error::{Result, ShaderError};

/// Shader stage of an entry point.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Vertex,
    Fragment,
    Compute,
}
impl Stage {
    pub fn execution_model(self) -> spirv::ExecutionModel {
        match self {
            Stage::Vertex => spirv::ExecutionModel::Vertex,
            Stage::Fragment => spirv::ExecutionModel::Fragment,
            Stage::Compute => spirv::ExecutionModel::GLCompute,
        }
    }
}
impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stage::Vertex => f.write_str("vertex"),
            Stage::Fragment => f.write_str("fragment"),
            Stage::Compute => f.write_str("compute"),
        }
    }
}

/// Resource kind of an entry-point argument.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Input,
    Output,
    Uniform,
    Buffer,
    Sampler,
    Texture,
}
impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Input => "input",
            ResourceKind::Output => "output",
            ResourceKind::Uniform => "uniform",
            ResourceKind::Buffer => "buffer",
            ResourceKind::Sampler => "sampler",
            ResourceKind::Texture => "texture",
        }
    }
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "input" => Ok(ResourceKind::Input),
            "output" => Ok(ResourceKind::Output),
            "uniform" => Ok(ResourceKind::Uniform),
            "buffer" => Ok(ResourceKind::Buffer),
            "sampler" => Ok(ResourceKind::Sampler),
            "texture" => Ok(ResourceKind::Texture),
            _ => Err(ShaderError::declaration(format!(
                "unknown resource kind '{}'",
                s
            ))),
        }
    }
}
impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Slot of a resource declaration: a location/binding index, a
/// (bind group, binding) pair, or a built-in name.
#[derive(Clone, PartialEq, Eq, Hash, Debug, serde::Serialize)]
#[serde(untagged)]
pub enum Slot {
    Index(u32),
    Pair(u32, u32),
    Name(String),
}

/// A literal constant as it appears in the source stream.
#[derive(Clone, PartialEq, Debug, serde::Serialize)]
#[serde(untagged)]
pub enum ConstVal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
}
impl From<bool> for ConstVal {
    fn from(x: bool) -> Self {
        ConstVal::Bool(x)
    }
}
impl From<i64> for ConstVal {
    fn from(x: i64) -> Self {
        ConstVal::Int(x)
    }
}
impl From<f64> for ConstVal {
    fn from(x: f64) -> Self {
        ConstVal::Float(x)
    }
}

/// Binary arithmetic/logic selector of [`Op::BinaryOp`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
}
impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

/// Unary selector of [`Op::UnaryOp`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnOp {
    Neg,
    Not,
}
impl UnOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnOp::Neg => "neg",
            UnOp::Not => "not",
        }
    }
}

/// Comparison selector of [`Op::Compare`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}
impl CmpOp {
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// One normalized shader bytecode operation.
#[derive(Clone, PartialEq, Debug)]
pub enum Op {
    Entrypoint {
        name: String,
        stage: Stage,
        modes: BTreeMap<String, Vec<u32>>,
    },
    FuncEnd,
    Resource {
        name: String,
        kind: ResourceKind,
        slot: Slot,
        typename: String,
    },
    PopTop,
    DupTop,
    RotTwo,
    LoadName(String),
    StoreName(String),
    LoadConstant(ConstVal),
    LoadAttr(String),
    LoadIndex,
    StoreIndex,
    LoadArray(u32),
    BinaryOp(BinOp),
    UnaryOp(UnOp),
    Compare(CmpOp),
    Call {
        func: String,
        nargs: u32,
    },
    Label(String),
    Branch(String),
    BranchConditional {
        true_label: String,
        false_label: String,
    },
    BranchLoop {
        iter: String,
        cont: String,
        merge: String,
    },
    Return,
}
impl Op {
    pub fn tag(&self) -> &'static str {
        match self {
            Op::Entrypoint { .. } => "entrypoint",
            Op::FuncEnd => "func_end",
            Op::Resource { .. } => "resource",
            Op::PopTop => "pop_top",
            Op::DupTop => "dup_top",
            Op::RotTwo => "rot_two",
            Op::LoadName(_) => "load_name",
            Op::StoreName(_) => "store_name",
            Op::LoadConstant(_) => "load_constant",
            Op::LoadAttr(_) => "load_attr",
            Op::LoadIndex => "load_index",
            Op::StoreIndex => "store_index",
            Op::LoadArray(_) => "load_array",
            Op::BinaryOp(_) => "binary_op",
            Op::UnaryOp(_) => "unary_op",
            Op::Compare(_) => "compare",
            Op::Call { .. } => "call",
            Op::Label(_) => "label",
            Op::Branch(_) => "branch",
            Op::BranchConditional { .. } => "branch_conditional",
            Op::BranchLoop { .. } => "branch_loop",
            Op::Return => "return",
        }
    }

    /// True for the three ops that terminate a basic block.
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Op::Branch(_) | Op::BranchConditional { .. } | Op::BranchLoop { .. }
        )
    }
}

// Ops serialize as `[tag, args...]` tuples so a whole program is a plain
// JSON array of arrays.
impl Serialize for Op {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        seq.serialize_element(self.tag())?;
        match self {
            Op::Entrypoint { name, stage, modes } => {
                seq.serialize_element(name)?;
                seq.serialize_element(stage)?;
                seq.serialize_element(modes)?;
            }
            Op::FuncEnd | Op::PopTop | Op::DupTop | Op::RotTwo => {}
            Op::Resource {
                name,
                kind,
                slot,
                typename,
            } => {
                seq.serialize_element(name)?;
                seq.serialize_element(kind)?;
                seq.serialize_element(slot)?;
                seq.serialize_element(typename)?;
            }
            Op::LoadName(name) | Op::StoreName(name) | Op::LoadAttr(name) => {
                seq.serialize_element(name)?;
            }
            Op::LoadConstant(v) => seq.serialize_element(v)?,
            Op::LoadIndex | Op::StoreIndex | Op::Return => {}
            Op::LoadArray(n) => seq.serialize_element(n)?,
            Op::BinaryOp(op) => seq.serialize_element(op.as_str())?,
            Op::UnaryOp(op) => seq.serialize_element(op.as_str())?,
            Op::Compare(cmp) => seq.serialize_element(cmp.as_str())?,
            Op::Call { func, nargs } => {
                seq.serialize_element(func)?;
                seq.serialize_element(nargs)?;
            }
            Op::Label(l) | Op::Branch(l) => seq.serialize_element(l)?,
            Op::BranchConditional {
                true_label,
                false_label,
            } => {
                seq.serialize_element(true_label)?;
                seq.serialize_element(false_label)?;
            }
            Op::BranchLoop { iter, cont, merge } => {
                seq.serialize_element(iter)?;
                seq.serialize_element(cont)?;
                seq.serialize_element(merge)?;
            }
        }
        seq.end()
    }
}

/// Serialize a whole program to a JSON string.
pub fn to_json(ops: &[Op]) -> String {
    serde_json::to_string(ops).expect("nsb serialization cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ops_serialize_as_tuples() {
        let ops = vec![
            Op::Label("L1".to_owned()),
            Op::LoadConstant(ConstVal::Float(1.5)),
            Op::Resource {
                name: "buffer.data".to_owned(),
                kind: ResourceKind::Buffer,
                slot: Slot::Pair(0, 1),
                typename: "Array(f32)".to_owned(),
            },
            Op::BranchConditional {
                true_label: "L1".to_owned(),
                false_label: "L2".to_owned(),
            },
        ];
        let json = to_json(&ops);
        assert_eq!(
            json,
            r#"[["label","L1"],["load_constant",1.5],["resource","buffer.data","buffer",[0,1],"Array(f32)"],["branch_conditional","L1","L2"]]"#
        );
    }
}
