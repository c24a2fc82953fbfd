//! The composition root: wires the JIT pipeline to the device runtime and
//! calls the entry point once.

use std::sync::Arc;

use inkwell::context::Context;

use crate::config::{BridgeConfig, DriverKind, MAIN_DYLIB};
use crate::device::{DriverApi, LevelZero, ReferenceDriver};
use crate::error::BridgeError;
use crate::jit::{self, ExecutionSession, ProcessSymbols, VaddFn};
use crate::payload::KernelPayload;
use crate::runtime::{self, RuntimeContext};

/// The host buffers passed to the entry point: `a = b = [0, 1, 2, 3]`.
pub const INPUT: [f32; 4] = [0.0, 1.0, 2.0, 3.0];

/// What one run produced.
#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    pub output: Vec<f32>,
    pub payload_fingerprint: String,
}

/// Run with the driver selected by `config`.
pub fn run(config: &BridgeConfig) -> Result<RunReport, BridgeError> {
    let driver: Arc<dyn DriverApi> = match config.driver {
        DriverKind::LevelZero => Arc::new(LevelZero::load()?),
        DriverKind::Reference => Arc::new(ReferenceDriver::single_gpu()),
    };
    run_with(config, driver)
}

/// Run with an explicit driver.
pub fn run_with(
    config: &BridgeConfig,
    driver: Arc<dyn DriverApi>,
) -> Result<RunReport, BridgeError> {
    jit::target::initialize()?;

    let context = Context::create();
    let mut session = ExecutionSession::create(&context)?;
    let main = session.create_dylib(MAIN_DYLIB)?;
    session.add_generator(main, Box::new(runtime::host_symbols()))?;
    session.add_generator(main, Box::new(ProcessSymbols::new()))?;

    let module = jit::load_module(&config.ir_path, &context)?;
    tracing::debug!("IR module:\n{}", module.print_to_string());
    session.attach_data_layout(&module);
    session.add_module(main, module)?;

    let entry = jit::resolve::<VaddFn>(&session, &[main], &config.entry)?;
    tracing::debug!(
        entry = entry.name(),
        address = %format!("{:#x}", entry.address()),
        "entry point ready"
    );

    let payload = KernelPayload::read(&config.payload_path)?;

    runtime::install(
        RuntimeContext::new(driver)
            .with_build_options(config.build.clone())
            .with_device_type(config.device_type),
    );

    let a = INPUT;
    let b = INPUT;
    let mut c = vec![0.0f32; INPUT.len()];
    // SAFETY: the entry point's IR signature matched `VaddFn`, and the
    // buffers all hold `n` elements.
    unsafe { entry.invoke(&a, &b, &mut c, &payload)? };

    tracing::info!(output = ?c, "entry point returned");
    Ok(RunReport {
        output: c,
        payload_fingerprint: payload.short_fingerprint(),
    })
}
