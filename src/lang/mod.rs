//! # Minuet language data
//!
//! The AST handed over by the frontend and the runtime value model shared by
//! the constant pool and the VM.

pub mod ast;
pub mod value;
