//! Host pipeline latency: IR parse, session setup and first lookup (which
//! compiles the module), plus a device module build on the reference driver.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use inkwell::context::Context;

use zejit::device::reference::minimal_spirv;
use zejit::device::{load_module, BuildOptions, DeviceQueue, DeviceType, ReferenceDriver};
use zejit::jit::{self, ExecutionSession, VaddFn};

const VADD: &str = include_str!("../tests/fixtures/vadd_cpu.ll");

fn bench_parse(c: &mut Criterion) {
    let context = Context::create();
    c.bench_function("parse_vadd", |b| {
        b.iter(|| jit::parse_module(black_box(VADD), "vadd.ll", &context).unwrap())
    });
}

fn bench_compile_and_resolve(c: &mut Criterion) {
    jit::target::initialize().unwrap();
    let mut group = c.benchmark_group("compile");
    group.sample_size(20);
    group.bench_function("vadd_entry", |b| {
        b.iter(|| {
            let context = Context::create();
            let mut session = ExecutionSession::create(&context).unwrap();
            let main = session.create_dylib("<main>").unwrap();
            let module = jit::parse_module(VADD, "vadd.ll", &context).unwrap();
            session.attach_data_layout(&module);
            session.add_module(main, module).unwrap();
            let entry = jit::resolve::<VaddFn>(&session, &[main], "vadd_entry").unwrap();
            black_box(entry.address());
        })
    });
    group.finish();
}

fn bench_invoke(c: &mut Criterion) {
    jit::target::initialize().unwrap();
    let context = Context::create();
    let mut session = ExecutionSession::create(&context).unwrap();
    let main = session.create_dylib("<main>").unwrap();
    let module = jit::parse_module(VADD, "vadd.ll", &context).unwrap();
    session.attach_data_layout(&module);
    session.add_module(main, module).unwrap();
    let entry = jit::resolve::<VaddFn>(&session, &[main], "vadd_entry").unwrap();

    let a = vec![1.0f32; 4096];
    let b = vec![2.0f32; 4096];
    let mut out = vec![0.0f32; 4096];
    c.bench_function("invoke_vadd_4096", |bench| {
        bench.iter(|| unsafe { entry.invoke(&a, &b, &mut out, &[]).unwrap() })
    });
}

fn bench_reference_module_build(c: &mut Criterion) {
    let driver = Arc::new(ReferenceDriver::single_gpu());
    let queue = DeviceQueue::create(driver.clone(), DeviceType::Gpu).unwrap();
    let payload = minimal_spirv();
    c.bench_function("reference_module_build", |b| {
        b.iter(|| {
            let module = load_module(&queue, black_box(&payload), &BuildOptions::Default).unwrap();
            module.release().unwrap();
            driver.clear_journal();
        })
    });
}

criterion_group!(
    benches,
    bench_parse,
    bench_compile_and_resolve,
    bench_invoke,
    bench_reference_module_build
);
criterion_main!(benches);
