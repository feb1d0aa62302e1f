use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bytecode::op::Instruction;
use crate::lang::value::Value;

/// Instructions of one function.
pub type Chunk = Vec<Instruction>;

/// A compiled bytecode program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// One chunk per function, indexed by function id.
    pub chunks: Vec<Chunk>,

    /// Literal pool shared by every chunk.
    pub constants: Vec<Value>,

    pub entry_id: Option<usize>,
}

/// Leading bytes of a serialized program image.
pub const IMAGE_MAGIC: &[u8; 4] = b"MNB1";

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk(&self, id: usize) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    /// Serializes the program into a bytecode image.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        let body = postcard::to_allocvec(self).map_err(ImageError::Encode)?;
        let mut bytes = Vec::with_capacity(IMAGE_MAGIC.len() + body.len());
        bytes.extend_from_slice(IMAGE_MAGIC);
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        let body = bytes
            .strip_prefix(IMAGE_MAGIC.as_slice())
            .ok_or(ImageError::BadMagic)?;
        postcard::from_bytes(body).map_err(ImageError::Decode)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "constants:")?;
        for (id, constant) in self.constants.iter().enumerate() {
            writeln!(f, "  c{:<4} {}", id, constant)?;
        }
        for (id, chunk) in self.chunks.iter().enumerate() {
            let marker = if self.entry_id == Some(id) { " (entry)" } else { "" };
            writeln!(f, "chunk #{}{}: {} instructions", id, marker, chunk.len())?;
            for (ip, ins) in chunk.iter().enumerate() {
                writeln!(f, "  {:04} {}", ip, ins)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ImageError {
    BadMagic,
    Encode(postcard::Error),
    Decode(postcard::Error),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::BadMagic => write!(f, "image error: not a minuet bytecode image"),
            ImageError::Encode(e) => write!(f, "image error: cannot encode program: {}", e),
            ImageError::Decode(e) => write!(f, "image error: cannot decode program: {}", e),
        }
    }
}

impl std::error::Error for ImageError {}
