use std::collections::HashMap;
use std::sync::Arc;

use zejit::config::BridgeConfig;
use zejit::device::api::{queue_group_flags, QueueGroupProperties};
use zejit::device::reference::{minimal_spirv, DeviceSpec, Topology};
use zejit::device::{
    load_module, BuildOptions, DeviceError, DeviceQueue, DeviceType, QueueState, ReferenceDriver,
};

fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_full_lifecycle_call_sequence() {
    let driver = Arc::new(ReferenceDriver::single_gpu());
    let queue = DeviceQueue::create(driver.clone(), DeviceType::Gpu).unwrap();
    assert_eq!(queue.state(), QueueState::Initialized);

    let module = load_module(&queue, &minimal_spirv(), &BuildOptions::Default).unwrap();
    assert_eq!(module.build_log(), "");
    module.release().unwrap();
    queue.close().unwrap();

    insta::assert_debug_snapshot!(driver.journal(), @r###"
    [
        "zeInit",
        "zeDriverGet",
        "zeDeviceGet",
        "zeDeviceGetProperties",
        "zeContextCreate",
        "zeDeviceGetCommandQueueGroupProperties",
        "zeCommandListCreateImmediate",
        "zeModuleCreate",
        "zeModuleBuildLogGetString",
        "zeModuleBuildLogDestroy",
        "zeModuleDestroy",
        "zeCommandListDestroy",
        "zeContextDestroy",
    ]
    "###);
    assert!(driver.live().is_empty());
}

#[test]
fn test_repeated_creation_selects_the_same_queue() {
    let gpu = DeviceSpec::gpu("gpu").with_queue_groups(vec![
        QueueGroupProperties::new(queue_group_flags::COPY, 1),
        QueueGroupProperties::new(queue_group_flags::COMPUTE, 2),
        QueueGroupProperties::new(queue_group_flags::COMPUTE, 2),
    ]);
    let topology = Topology::new()
        .driver(vec![DeviceSpec::cpu("cpu")])
        .driver(vec![gpu, DeviceSpec::gpu("other")]);
    let driver = Arc::new(ReferenceDriver::new(topology));

    let mut seen = Vec::new();
    for _ in 0..3 {
        let queue = DeviceQueue::create(driver.clone(), DeviceType::Gpu).unwrap();
        seen.push((queue.driver(), queue.device(), queue.ordinal()));
        queue.close().unwrap();
    }
    assert!(seen.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(seen[0].2, 1);
}

#[test]
fn test_raw_flags_beat_the_preset() {
    let config = BridgeConfig::new("kernel.spv")
        .with_env(env(&[
            ("MIMIC_OCLOC", "1"),
            ("COMPILE_IGC_FLAGS", "-cl-opt-disable -ze-opt-level=0"),
        ]))
        .unwrap();
    let driver = Arc::new(ReferenceDriver::single_gpu());
    let queue = DeviceQueue::create(driver.clone(), DeviceType::Gpu).unwrap();
    let module = load_module(&queue, &minimal_spirv(), &config.build).unwrap();
    drop(module);
    queue.close().unwrap();
    assert_eq!(driver.build_flags(), vec!["-cl-opt-disable -ze-opt-level=0"]);
}

#[test]
fn test_malformed_payload_fails_with_log() {
    let driver = Arc::new(ReferenceDriver::single_gpu());
    let queue = DeviceQueue::create(driver.clone(), DeviceType::Gpu).unwrap();
    let mut payload = minimal_spirv();
    payload[0] = 0;
    let err = load_module(&queue, &payload, &BuildOptions::AltCodegen).unwrap_err();
    let DeviceError::BuildFailed { log, .. } = err else {
        panic!("expected BuildFailed");
    };
    assert!(log.contains("magic"), "{}", log);
    queue.close().unwrap();
    assert!(driver.live().is_empty());
}

#[test]
fn test_dropping_a_module_then_queue_leaves_nothing_alive() {
    let driver = Arc::new(ReferenceDriver::single_gpu());
    {
        let queue = DeviceQueue::create(driver.clone(), DeviceType::Gpu).unwrap();
        let _module = load_module(&queue, &minimal_spirv(), &BuildOptions::Default).unwrap();
    }
    assert!(driver.live().is_empty());
}
