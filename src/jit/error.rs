//! Error types for the host-side JIT pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostic::Diagnostic;
use crate::jit::signature::NativeSignature;

/// Bootstrap failures. Every variant is fatal to the composition root.
#[derive(Debug, Clone, Error)]
pub enum TargetError {
    #[error("could not initialize native target: {0}")]
    NativeUnavailable(String),

    #[error("native target used before initialization")]
    NotInitialized,

    #[error("could not create host target machine: {0}")]
    HostUnavailable(String),

    #[error("could not derive data layout for '{0}'")]
    DataLayout(String),
}

/// IR loading failures.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or invalid IR. `source_text` is kept so the diagnostic can
    /// be rendered against it.
    #[error("{name}: {diagnostic}")]
    Parse {
        name: String,
        source_text: String,
        diagnostic: Diagnostic,
    },
}

impl LoadError {
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            LoadError::Parse { diagnostic, .. } => Some(diagnostic),
            LoadError::Io { .. } => None,
        }
    }

    /// Render to stderr; parse errors get a source excerpt.
    pub fn render(&self) {
        match self {
            LoadError::Parse {
                name,
                source_text,
                diagnostic,
            } => diagnostic.render(name, source_text),
            LoadError::Io { .. } => eprintln!("error: {}", self),
        }
    }
}

/// Execution session failures.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("dylib '{0}' already exists in this session")]
    DuplicateDylib(String),

    #[error("unknown dylib handle #{0}")]
    UnknownDylib(usize),

    #[error("symbol '{symbol}' is already defined in dylib '{dylib}'")]
    SymbolCollision { symbol: String, dylib: String },

    #[error("external symbol '{symbol}' referenced by module '{module}' cannot be resolved")]
    UnresolvedExternal { symbol: String, module: String },

    #[error("could not create execution engine: {0}")]
    EngineCreation(String),

    #[error("execution engine rejected module '{0}'")]
    ModuleRejected(String),

    #[error("symbol '{0}' not found")]
    SymbolNotFound(String),

    #[error("symbol '{0}' is a data symbol, not a function")]
    NotAFunction(String),
}

/// Entry point resolution and invocation failures.
#[derive(Debug, Clone, Error)]
pub enum EntryError {
    #[error(transparent)]
    Lookup(#[from] SessionError),

    #[error("entry point '{name}' declared as {found}, caller expects {expected}")]
    SignatureMismatch {
        name: String,
        expected: NativeSignature,
        found: NativeSignature,
    },

    #[error("buffer lengths differ: a={a}, b={b}, out={out}")]
    LengthMismatch { a: usize, b: usize, out: usize },
}
