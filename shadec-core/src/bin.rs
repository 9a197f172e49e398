//! SPIR-V binary module and header.
use std::iter::FromIterator;

use crate::error::Result;
use crate::walk::Instrs;

/// Target version emitted by this compiler. Buffer blocks are decorated the
/// pre-1.4 way, so the header says 1.0.
pub const VERSION: u32 = 0x0001_0000;
pub const MAGIC: u32 = 0x0723_0203;

#[derive(Debug, Clone)]
pub struct SpirvHeader {
    pub magic: u32,
    pub version: u32,
    pub generator: u32,
    pub bound: u32,
    pub schema: u32,
}
impl Default for SpirvHeader {
    fn default() -> Self {
        SpirvHeader {
            magic: MAGIC,
            version: VERSION,
            generator: 0,
            bound: 0,
            schema: 0,
        }
    }
}
impl SpirvHeader {
    pub fn with_bound(bound: u32) -> Self {
        SpirvHeader {
            bound,
            ..Default::default()
        }
    }
    pub fn words(&self) -> [u32; 5] {
        [
            self.magic,
            self.version,
            self.generator,
            self.bound,
            self.schema,
        ]
    }
}

/// SPIR-V program binary.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SpirvBinary(Vec<u32>);
impl From<Vec<u32>> for SpirvBinary {
    fn from(x: Vec<u32>) -> Self {
        SpirvBinary(x)
    }
}
impl From<&[u32]> for SpirvBinary {
    fn from(x: &[u32]) -> Self {
        SpirvBinary(x.to_owned())
    }
}
impl FromIterator<u32> for SpirvBinary {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        SpirvBinary(iter.into_iter().collect::<Vec<u32>>())
    }
}

impl SpirvBinary {
    pub fn words(&self) -> &[u32] {
        &self.0
    }
    pub fn into_words(self) -> Vec<u32> {
        self.0
    }
    /// The little-endian byte view of the module.
    pub fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.0)
    }

    /// Walk the instructions following the 5-word header.
    pub fn instrs(&self) -> Result<Instrs> {
        const HEADER_LEN: usize = 5;
        Instrs::new(&self.words()[HEADER_LEN.min(self.0.len())..])
    }

    pub fn header(&self) -> Option<SpirvHeader> {
        if self.0.len() < 5 {
            return None;
        }
        let header = &self.words()[..5];
        Some(SpirvHeader {
            magic: header[0],
            version: header[1],
            generator: header[2],
            bound: header[3],
            schema: header[4],
        })
    }
}
