pub mod heap;
pub mod natives;
pub mod status;
pub mod vm;

pub use natives::{NativeFn, NativeRegistry, NativeTable};
pub use status::ExecStatus;
pub use vm::{Engine, EngineConfig};
