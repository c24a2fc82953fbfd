//! Execution session: dylib scopes, symbol tables and lazy compilation.
//!
//! Each dylib owns one MCJIT execution engine. Modules are handed to the
//! engine when added; machine code is produced on the first lookup that
//! needs it, which is the only point where "module added" becomes
//! "symbol usable". External references are resolved when the module is
//! added, first against the dylib's own definitions and then through the
//! dylib's definition generators, so an unresolvable reference is reported
//! as an error instead of aborting inside the JIT linker.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;

use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::{Linkage, Module};
use inkwell::values::{AnyValue, AnyValueEnum};
use inkwell::OptimizationLevel;

use super::signature::NativeSignature;
use super::target::HostTarget;
use super::{SessionError, TargetError};

/// Handle to a symbol-resolution scope inside a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DylibId(usize);

impl DylibId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A resolved, non-null symbol address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymbolAddress(usize);

impl SymbolAddress {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for SymbolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// What a dylib knows about one of its definitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolDef {
    Function {
        signature: NativeSignature,
        module: String,
    },
    Data {
        module: String,
    },
}

impl SymbolDef {
    pub fn module(&self) -> &str {
        match self {
            SymbolDef::Function { module, .. } | SymbolDef::Data { module } => module,
        }
    }

    pub fn signature(&self) -> Option<&NativeSignature> {
        match self {
            SymbolDef::Function { signature, .. } => Some(signature),
            SymbolDef::Data { .. } => None,
        }
    }
}

/// Fallback resolution for symbols a module references but no module in
/// the dylib defines.
pub trait DefinitionGenerator {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn resolve(&self, symbol: &str) -> Option<usize>;
}

/// Resolves against every symbol already loaded into the host process
/// (the executable and its shared libraries).
#[derive(Debug)]
pub struct ProcessSymbols {
    _private: (),
}

impl ProcessSymbols {
    pub fn new() -> Self {
        inkwell::support::load_visible_symbols();
        Self { _private: () }
    }
}

impl Default for ProcessSymbols {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionGenerator for ProcessSymbols {
    fn name(&self) -> &str {
        "process"
    }

    fn resolve(&self, symbol: &str) -> Option<usize> {
        inkwell::support::search_for_address_of_symbol(symbol).filter(|addr| *addr != 0)
    }
}

/// Resolves from an explicit name → address table. Used for runtime support
/// functions implemented natively in this crate, which are not guaranteed to
/// be exported from the executable's dynamic symbol table.
#[derive(Clone, Debug, Default)]
pub struct HostSymbols {
    symbols: HashMap<String, usize>,
}

impl HostSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, address: usize) -> Self {
        self.insert(name, address);
        self
    }

    pub fn insert(&mut self, name: &str, address: usize) {
        self.symbols.insert(name.to_string(), address);
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl<'a> FromIterator<(&'a str, usize)> for HostSymbols {
    fn from_iter<I: IntoIterator<Item = (&'a str, usize)>>(iter: I) -> Self {
        let mut table = HostSymbols::new();
        for (name, address) in iter {
            table.insert(name, address);
        }
        table
    }
}

impl DefinitionGenerator for HostSymbols {
    fn name(&self) -> &str {
        "host"
    }

    fn resolve(&self, symbol: &str) -> Option<usize> {
        self.symbols.get(symbol).copied()
    }
}

struct Dylib<'ctx> {
    name: String,
    engine: Option<ExecutionEngine<'ctx>>,
    modules: Vec<Module<'ctx>>,
    symbols: HashMap<String, SymbolDef>,
    generators: Vec<Box<dyn DefinitionGenerator>>,
    materialized: Cell<usize>,
}

impl<'ctx> Dylib<'ctx> {
    fn generate(&self, symbol: &str) -> Option<(usize, &str)> {
        self.generators
            .iter()
            .find_map(|g| g.resolve(symbol).map(|addr| (addr, g.name())))
    }
}

/// Owns the host target, every dylib, and every module added to them.
pub struct ExecutionSession<'ctx> {
    context: &'ctx Context,
    host: HostTarget,
    dylibs: Vec<Dylib<'ctx>>,
}

impl<'ctx> ExecutionSession<'ctx> {
    /// Create a session for `context`. The native target must already be
    /// initialized.
    pub fn create(context: &'ctx Context) -> Result<Self, TargetError> {
        let host = HostTarget::detect()?;
        Ok(Self {
            context,
            host,
            dylibs: Vec::new(),
        })
    }

    pub fn context(&self) -> &'ctx Context {
        self.context
    }

    pub fn host(&self) -> &HostTarget {
        &self.host
    }

    /// Stamp the host triple and data layout onto `module`. Layout
    /// mismatches are not detected later; callers use this before
    /// `add_module`.
    pub fn attach_data_layout(&self, module: &Module<'ctx>) {
        module.set_triple(self.host.triple());
        module.set_data_layout(&self.host.data_layout());
    }

    /// Create an isolated symbol scope.
    pub fn create_dylib(&mut self, name: &str) -> Result<DylibId, SessionError> {
        if self.dylibs.iter().any(|d| d.name == name) {
            return Err(SessionError::DuplicateDylib(name.to_string()));
        }
        self.dylibs.push(Dylib {
            name: name.to_string(),
            engine: None,
            modules: Vec::new(),
            symbols: HashMap::new(),
            generators: Vec::new(),
            materialized: Cell::new(0),
        });
        tracing::debug!(dylib = name, "created dylib");
        Ok(DylibId(self.dylibs.len() - 1))
    }

    pub fn dylib_name(&self, id: DylibId) -> Result<&str, SessionError> {
        self.dylib(id).map(|d| d.name.as_str())
    }

    /// Register a fallback generator; generators are consulted in the order
    /// they were added.
    pub fn add_generator(
        &mut self,
        id: DylibId,
        generator: Box<dyn DefinitionGenerator>,
    ) -> Result<(), SessionError> {
        let dylib = self.dylib_mut(id)?;
        tracing::debug!(dylib = %dylib.name, generator = generator.name(), "added generator");
        dylib.generators.push(generator);
        Ok(())
    }

    /// Hand `module` to the session. The module is compiled lazily, on the
    /// first lookup of any symbol in this dylib.
    pub fn add_module(&mut self, id: DylibId, module: Module<'ctx>) -> Result<(), SessionError> {
        let module_name = module.get_name().to_string_lossy().into_owned();
        let dylib = self.dylib(id)?;

        let definitions = collect_definitions(&module, &module_name);
        for symbol in definitions.keys() {
            if dylib.symbols.contains_key(symbol) {
                return Err(SessionError::SymbolCollision {
                    symbol: symbol.clone(),
                    dylib: dylib.name.clone(),
                });
            }
        }

        let declarations = module
            .get_functions()
            .filter(|f| f.count_basic_blocks() == 0)
            .map(|f| (f.get_name().to_string_lossy().into_owned(), f.as_any_value_enum()))
            .chain(
                module
                    .get_globals()
                    .filter(|g| g.is_declaration())
                    .map(|g| (g.get_name().to_string_lossy().into_owned(), g.as_any_value_enum())),
            );

        let mut mappings: Vec<(AnyValueEnum<'ctx>, usize)> = Vec::new();
        for (name, value) in declarations {
            if name.starts_with("llvm.")
                || definitions.contains_key(&name)
                || dylib.symbols.contains_key(&name)
            {
                continue;
            }
            match dylib.generate(&name) {
                Some((address, generator)) => {
                    tracing::debug!(symbol = %name, generator, address = %SymbolAddress(address), "resolved external");
                    mappings.push((value, address));
                }
                None => {
                    return Err(SessionError::UnresolvedExternal {
                        symbol: name,
                        module: module_name,
                    })
                }
            }
        }

        let dylib = self.dylib_mut(id)?;
        match &dylib.engine {
            Some(engine) => engine
                .add_module(&module)
                .map_err(|()| SessionError::ModuleRejected(module_name.clone()))?,
            None => {
                let engine = module
                    .create_jit_execution_engine(OptimizationLevel::None)
                    .map_err(|e| SessionError::EngineCreation(e.to_string()))?;
                dylib.engine = Some(engine);
            }
        }
        if let Some(engine) = &dylib.engine {
            for (value, address) in &mappings {
                engine.add_global_mapping(value, *address);
            }
        }

        tracing::debug!(
            dylib = %dylib.name,
            module = %module_name,
            definitions = definitions.len(),
            externals = mappings.len(),
            "added module"
        );
        dylib.symbols.extend(definitions);
        dylib.modules.push(module);
        Ok(())
    }

    /// Metadata for the first definition of `name` in `dylibs`, searched in
    /// order.
    pub fn definition(&self, dylibs: &[DylibId], name: &str) -> Option<&SymbolDef> {
        dylibs
            .iter()
            .filter_map(|id| self.dylibs.get(id.0))
            .find_map(|d| d.symbols.get(name))
    }

    /// Resolve `name` to an address, compiling pending modules of the owning
    /// dylib first. Blocks until code generation finishes.
    pub fn lookup(&self, dylibs: &[DylibId], name: &str) -> Result<SymbolAddress, SessionError> {
        for id in dylibs {
            let dylib = self.dylib(*id)?;
            let Some(def) = dylib.symbols.get(name) else {
                continue;
            };
            if matches!(def, SymbolDef::Data { .. }) {
                return Err(SessionError::NotAFunction(name.to_string()));
            }
            let Some(engine) = &dylib.engine else {
                continue;
            };

            let pending = dylib.modules.len().saturating_sub(dylib.materialized.get());
            if pending > 0 {
                tracing::debug!(dylib = %dylib.name, pending, symbol = name, "materializing");
            }
            let address = engine
                .get_function_address(name)
                .map_err(|_| SessionError::SymbolNotFound(name.to_string()))?;
            if address == 0 {
                return Err(SessionError::SymbolNotFound(name.to_string()));
            }
            dylib.materialized.set(dylib.modules.len());
            tracing::debug!(symbol = name, address = %SymbolAddress(address), "resolved symbol");
            return Ok(SymbolAddress(address));
        }
        Err(SessionError::SymbolNotFound(name.to_string()))
    }

    /// Number of modules in `id` not yet compiled by a lookup.
    pub fn pending_modules(&self, id: DylibId) -> Result<usize, SessionError> {
        self.dylib(id)
            .map(|d| d.modules.len().saturating_sub(d.materialized.get()))
    }

    pub fn module_count(&self, id: DylibId) -> Result<usize, SessionError> {
        self.dylib(id).map(|d| d.modules.len())
    }

    fn dylib(&self, id: DylibId) -> Result<&Dylib<'ctx>, SessionError> {
        self.dylibs.get(id.0).ok_or(SessionError::UnknownDylib(id.0))
    }

    fn dylib_mut(&mut self, id: DylibId) -> Result<&mut Dylib<'ctx>, SessionError> {
        self.dylibs
            .get_mut(id.0)
            .ok_or(SessionError::UnknownDylib(id.0))
    }
}

fn is_exported(linkage: Linkage) -> bool {
    !matches!(linkage, Linkage::Private | Linkage::Internal)
}

fn collect_definitions(module: &Module<'_>, module_name: &str) -> HashMap<String, SymbolDef> {
    let mut definitions = HashMap::new();
    for function in module.get_functions() {
        if function.count_basic_blocks() == 0 || !is_exported(function.get_linkage()) {
            continue;
        }
        definitions.insert(
            function.get_name().to_string_lossy().into_owned(),
            SymbolDef::Function {
                signature: NativeSignature::of_function(function),
                module: module_name.to_string(),
            },
        );
    }
    for global in module.get_globals() {
        if global.is_declaration() || !is_exported(global.get_linkage()) {
            continue;
        }
        definitions.insert(
            global.get_name().to_string_lossy().into_owned(),
            SymbolDef::Data {
                module: module_name.to_string(),
            },
        );
    }
    definitions
}
