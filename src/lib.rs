//! JIT-compile textual LLVM IR, call an entry point from it, and let that
//! code hand SPIR-V kernels to a Level Zero device runtime.

pub mod config;
pub mod device;
pub mod diagnostic;
pub mod driver;
pub mod error;
pub mod jit;
pub mod payload;
pub mod runtime;
pub mod span;

pub use config::{BridgeConfig, DriverKind};
pub use driver::{run, run_with, RunReport};
pub use error::BridgeError;
pub use payload::KernelPayload;
