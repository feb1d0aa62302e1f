pub mod cfg;
pub mod condense;
pub mod lower;
pub mod lower_error;
pub mod steps;

pub use cfg::{BasicBlock, BlockId, Cfg, FullIR};
pub use steps::{AbsAddress, AddrTag, Op, Step};
