use std::path::{Path, PathBuf};

use inkwell::context::Context;
use zejit::jit::{self, EntryError, ExecutionSession, LoadError, SessionError, VaddFn};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn session(context: &Context) -> ExecutionSession<'_> {
    jit::target::initialize().expect("native target");
    ExecutionSession::create(context).expect("session")
}

#[test]
fn test_bootstrap_is_idempotent() {
    jit::target::initialize().unwrap();
    jit::target::initialize().unwrap();
    assert!(jit::target::is_initialized());
}

#[test]
fn test_golden_module_adds_vectors() {
    let context = Context::create();
    let mut session = session(&context);
    let main = session.create_dylib("<main>").unwrap();

    let module = jit::load_module(&fixture("vadd_cpu.ll"), &context).unwrap();
    session.attach_data_layout(&module);
    session.add_module(main, module).unwrap();

    let entry = jit::resolve::<VaddFn>(&session, &[main], "vadd_entry").unwrap();
    assert_ne!(entry.address(), 0);

    let a = [0.0f32, 1.0, 2.0, 3.0];
    let b = [0.0f32, 1.0, 2.0, 3.0];
    let mut out = [0.0f32; 4];
    unsafe { entry.invoke(&a, &b, &mut out, &[0u8; 8]).unwrap() };
    assert_eq!(out, [0.0, 2.0, 4.0, 6.0]);
}

#[test]
fn test_length_mismatch_is_rejected_before_the_call() {
    let context = Context::create();
    let mut session = session(&context);
    let main = session.create_dylib("<main>").unwrap();
    let module = jit::load_module(&fixture("vadd_cpu.ll"), &context).unwrap();
    session.add_module(main, module).unwrap();
    let entry = jit::resolve::<VaddFn>(&session, &[main], "vadd_entry").unwrap();

    let mut out = [0.0f32; 3];
    let err = unsafe { entry.invoke(&[1.0; 4], &[1.0; 4], &mut out, &[]) }.unwrap_err();
    assert!(matches!(err, EntryError::LengthMismatch { a: 4, b: 4, out: 3 }));
    assert_eq!(out, [0.0; 3]);
}

#[test]
fn test_malformed_module_reports_location() {
    let context = Context::create();
    let path = fixture("malformed.ll");
    let err = jit::load_module(&path, &context).unwrap_err();
    let LoadError::Parse {
        diagnostic,
        source_text,
        ..
    } = &err
    else {
        panic!("expected a parse error, got {err:?}");
    };
    assert!(!diagnostic.message.is_empty());
    let line_three = source_text.find("  %sum").unwrap() as u32;
    let line_four = source_text.find("  ret void").unwrap() as u32;
    assert!(diagnostic.span.start >= line_three);
    assert!(diagnostic.span.start < line_four + "  ret void".len() as u32);
}

#[test]
fn test_missing_module_file() {
    let context = Context::create();
    let dir = tempfile::tempdir().unwrap();
    let err = jit::load_module(&dir.path().join("main.ll"), &context).unwrap_err();
    assert!(matches!(err, LoadError::Io { .. }));
    assert!(err.to_string().contains("main.ll"));
}

#[test]
fn test_module_from_tempfile() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("main.ll");
    std::fs::write(&path, std::fs::read_to_string(fixture("vadd_cpu.ll")).unwrap()).unwrap();
    let context = Context::create();
    let module = jit::load_module(&path, &context).unwrap();
    assert!(module.get_function("vadd_entry").is_some());
}

#[test]
fn test_signature_mismatch() {
    let context = Context::create();
    let mut session = session(&context);
    let main = session.create_dylib("<main>").unwrap();
    let module = jit::load_module(&fixture("wrong_signature.ll"), &context).unwrap();
    session.add_module(main, module).unwrap();

    let err = jit::resolve::<VaddFn>(&session, &[main], "vadd_entry").unwrap_err();
    match err {
        EntryError::SignatureMismatch {
            name,
            expected,
            found,
        } => {
            assert_eq!(name, "vadd_entry");
            assert_eq!(expected.to_string(), "(ptr, ptr, ptr, i64, ptr, i64) -> void");
            assert_eq!(found.to_string(), "(ptr, ptr, ptr, i32) -> i32");
        }
        other => panic!("expected SignatureMismatch, got {other:?}"),
    }
    assert_eq!(session.pending_modules(main).unwrap(), 1);
}

#[test]
fn test_missing_entry_point() {
    let context = Context::create();
    let mut session = session(&context);
    let main = session.create_dylib("<main>").unwrap();
    let module = jit::load_module(&fixture("vadd_cpu.ll"), &context).unwrap();
    session.add_module(main, module).unwrap();

    let err = jit::resolve::<VaddFn>(&session, &[main], "vmul_entry").unwrap_err();
    assert!(matches!(
        err,
        EntryError::Lookup(SessionError::SymbolNotFound(ref name)) if name == "vmul_entry"
    ));
}

#[test]
fn test_gpu_module_needs_runtime_symbols() {
    let context = Context::create();
    let mut session = session(&context);
    let main = session.create_dylib("<main>").unwrap();
    let module = jit::load_module(&fixture("vadd_gpu.ll"), &context).unwrap();
    let err = session.add_module(main, module).unwrap_err();
    assert!(matches!(err, SessionError::UnresolvedExternal { .. }));

    let module = jit::load_module(&fixture("vadd_gpu.ll"), &context).unwrap();
    session
        .add_generator(main, Box::new(zejit::runtime::host_symbols()))
        .unwrap();
    session.add_module(main, module).unwrap();
    assert!(jit::resolve::<VaddFn>(&session, &[main], "vadd_entry").is_ok());
}

#[test]
fn test_host_target_detection() {
    jit::target::initialize().unwrap();
    let host = jit::target::HostTarget::detect().unwrap();
    assert!(!host.data_layout_string().is_empty());
    assert!(!host.triple_string().is_empty());
    assert_eq!(host.pointer_width(), usize::BITS);
}
