//! Host-side JIT: native target bootstrap, IR loading, the execution session
//! and typed entry point resolution.

pub mod entry;
pub mod error;
pub mod loader;
pub mod session;
pub mod signature;
pub mod target;

pub use entry::{resolve, EntryPoint};
pub use error::{EntryError, LoadError, SessionError, TargetError};
pub use loader::{load_module, parse_module};
pub use session::{
    DefinitionGenerator, DylibId, ExecutionSession, HostSymbols, ProcessSymbols, SymbolAddress,
    SymbolDef,
};
pub use signature::{AbiType, NativeFn, NativeSignature, VaddFn};
