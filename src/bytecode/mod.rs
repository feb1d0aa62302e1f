pub mod emit;
pub mod emit_error;
pub mod op;
pub mod program;

pub use emit_error::EmitError;
pub use op::{ArgMode, Instruction, OPCODE_COUNT, Opcode, Operand};
pub use program::{Chunk, ImageError, Program};
