//! Host code generation bootstrap.
//!
//! LLVM keeps its target registry in process-global state. `initialize`
//! registers the native target, asm printer and asm parser exactly once and
//! caches the outcome, so every later call observes the first result.

use std::sync::OnceLock;

use inkwell::data_layout::DataLayout;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::targets::{
    ByteOrdering, CodeModel, InitializationConfig, RelocMode, Target, TargetData, TargetMachine,
    TargetTriple,
};
use inkwell::OptimizationLevel;

use super::TargetError;

static NATIVE_TARGET: OnceLock<Result<(), String>> = OnceLock::new();

/// Register the native target with LLVM. Idempotent.
pub fn initialize() -> Result<(), TargetError> {
    NATIVE_TARGET
        .get_or_init(|| {
            let config = InitializationConfig {
                asm_parser: true,
                asm_printer: true,
                base: true,
                disassembler: false,
                info: true,
                machine_code: true,
            };
            let outcome = Target::initialize_native(&config);
            if outcome.is_ok() {
                ExecutionEngine::link_in_mc_jit();
            }
            match &outcome {
                Ok(()) => tracing::debug!("native target initialized"),
                Err(e) => tracing::error!(error = %e, "native target initialization failed"),
            }
            outcome
        })
        .clone()
        .map_err(TargetError::NativeUnavailable)
}

/// Whether `initialize` has already run successfully in this process.
pub fn is_initialized() -> bool {
    matches!(NATIVE_TARGET.get(), Some(Ok(())))
}

/// The detected host: triple, CPU and a target machine configured for JIT
/// code generation without optimization.
#[derive(Debug)]
pub struct HostTarget {
    triple: TargetTriple,
    cpu: String,
    features: String,
    machine: TargetMachine,
}

impl HostTarget {
    /// Detect the host CPU and build a target machine for it.
    pub fn detect() -> Result<Self, TargetError> {
        if !is_initialized() {
            return Err(TargetError::NotInitialized);
        }

        let triple = TargetMachine::get_default_triple();
        let triple_name = triple.as_str().to_string_lossy().into_owned();
        let target = Target::from_triple(&triple)
            .map_err(|e| TargetError::HostUnavailable(e.to_string()))?;
        let cpu = TargetMachine::get_host_cpu_name().to_string();
        let features = TargetMachine::get_host_cpu_features().to_string();

        let machine = target
            .create_target_machine(
                &triple,
                &cpu,
                &features,
                OptimizationLevel::None,
                RelocMode::Default,
                CodeModel::JITDefault,
            )
            .ok_or_else(|| {
                TargetError::HostUnavailable(format!("no target machine for '{}'", triple_name))
            })?;

        let host = Self {
            triple,
            cpu,
            features,
            machine,
        };
        if host.data_layout_string().is_empty() {
            return Err(TargetError::DataLayout(triple_name));
        }

        tracing::debug!(
            triple = %host.triple_string(),
            cpu = %host.cpu,
            features = %host.features,
            layout = %host.data_layout_string(),
            "detected host target"
        );
        Ok(host)
    }

    pub fn triple(&self) -> &TargetTriple {
        &self.triple
    }

    pub fn triple_string(&self) -> String {
        self.triple.as_str().to_string_lossy().into_owned()
    }

    pub fn cpu(&self) -> &str {
        &self.cpu
    }

    pub fn target_data(&self) -> TargetData {
        self.machine.get_target_data()
    }

    /// Default data layout for the host; modules must carry it before they
    /// are compiled.
    pub fn data_layout(&self) -> DataLayout {
        self.target_data().get_data_layout()
    }

    pub fn data_layout_string(&self) -> String {
        self.data_layout().as_str().to_string_lossy().into_owned()
    }

    pub fn pointer_width(&self) -> u32 {
        self.target_data().get_pointer_byte_size(None) * 8
    }

    pub fn is_little_endian(&self) -> bool {
        matches!(self.target_data().get_byte_ordering(), ByteOrdering::LittleEndian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let first = initialize();
        let second = initialize();
        assert_eq!(first.is_ok(), second.is_ok());
        assert!(is_initialized() == first.is_ok());
    }

    #[test]
    fn test_detect_host_matches_rust_target() {
        initialize().unwrap();
        let host = HostTarget::detect().unwrap();
        assert_eq!(host.pointer_width() as usize, std::mem::size_of::<usize>() * 8);
        assert_eq!(host.is_little_endian(), cfg!(target_endian = "little"));
        assert!(!host.data_layout_string().is_empty());
        assert!(!host.cpu().is_empty());
    }
}
