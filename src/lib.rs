//! Minuet compiler core and bytecode runtime.
//!
//! The pipeline is `lower` (AST forest to control-flow IR), an optional
//! `condense` pass, `emit` (IR to bytecode) and finally [`runtime::vm::Engine`].

pub mod bytecode;
pub mod ir;
pub mod lang;
pub mod runtime;

pub use bytecode::emit::emit;
pub use ir::condense::condense;
pub use ir::lower::lower;
