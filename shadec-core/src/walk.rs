//! SPIR-V instruction walker.
//!
//! A minimal reader over assembled modules, used by tests and tools to check
//! structural properties of the output.
use std::fmt;

use num_traits::FromPrimitive;
use spirv::Op;

use crate::error::{Result, ShaderError};

/// One instruction borrowed from a word stream.
#[derive(Clone, Copy)]
pub struct Instr<'a> {
    words: &'a [u32],
}
impl<'a> Instr<'a> {
    pub fn new(words: &'a [u32]) -> Result<Instr<'a>> {
        if words.is_empty() {
            return Err(ShaderError::structural("instruction is too short"));
        }
        Ok(Instr { words })
    }

    /// The instruction opcode number.
    pub fn opcode(&self) -> u32 {
        self.words[0] & 0xFFFF
    }
    /// The instruction op, if the opcode is known.
    pub fn op(&self) -> Option<Op> {
        Op::from_u32(self.opcode())
    }
    /// Word count including the leading `(length, opcode)` word.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }
    /// Operand words following the leading word.
    pub fn operands(&self) -> &'a [u32] {
        &self.words[1..]
    }
}
impl<'a> fmt::Debug for Instr<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op() {
            Some(op) => write!(f, "{:?} {:?}", op, self.operands()),
            None => write!(f, "Op#{} {:?}", self.opcode(), self.operands()),
        }
    }
}

/// Walks instructions in a word stream.
pub struct Instrs<'a> {
    inner: &'a [u32],
}
impl<'a> Instrs<'a> {
    pub fn new(words: &'a [u32]) -> Result<Instrs<'a>> {
        Ok(Instrs { inner: words })
    }

    pub fn next(&mut self) -> Result<Option<Instr<'a>>> {
        let head = match self.inner.first() {
            Some(head) => *head,
            None => return Ok(None),
        };
        let len = (head >> 16) as usize;
        if len == 0 {
            return Err(ShaderError::structural("instruction length is zero"));
        }
        if len > self.inner.len() {
            return Err(ShaderError::structural("instruction is truncated"));
        }
        let instr = Instr::new(&self.inner[..len])?;
        self.inner = &self.inner[len..];
        Ok(Some(instr))
    }

    /// Collect every remaining instruction.
    pub fn collect_all(mut self) -> Result<Vec<Instr<'a>>> {
        let mut out = Vec::new();
        while let Some(instr) = self.next()? {
            out.push(instr);
        }
        Ok(out)
    }
}
