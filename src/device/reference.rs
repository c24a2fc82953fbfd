//! An in-process implementation of [`DriverApi`].
//!
//! Models a fixed topology of drivers, devices and queue groups, hands out
//! deterministic handles, validates SPIR-V headers the way a runtime rejects
//! a bad binary, and records every call. Tests use it to observe the exact
//! call sequence; the CLI can select it to run without a GPU.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::api::{
    queue_group_flags, BuildLogHandle, CommandListHandle, CommandQueueDesc, ContextHandle,
    DeviceHandle, DeviceProperties, DeviceType, DriverApi, DriverHandle, ModuleBuild, ModuleDesc,
    ModuleHandle, QueueGroupProperties, QueueMode, ZeResult, ZeStatus,
};

/// `0x07230203`, the first word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;
const SPIRV_HEADER_WORDS: usize = 5;
const MAX_SPIRV_VERSION: u32 = 0x0001_0600;

const DRIVER_HANDLE_BASE: usize = 0x1000;
const DEVICE_HANDLE_BASE: usize = 0x2000;
const OBJECT_HANDLE_BASE: usize = 0x10_0000;

/// Build option prefixes the reference compiler accepts without comment.
const KNOWN_OPTION_PREFIXES: &[&str] = &["-cl-", "-ze-", "-vc-", "-igc_opts"];

/// One simulated device.
#[derive(Clone, Debug)]
pub struct DeviceSpec {
    pub name: String,
    pub device_type: DeviceType,
    pub vendor_id: u32,
    pub device_id: u32,
    pub queue_groups: Vec<QueueGroupProperties>,
}

impl DeviceSpec {
    /// A GPU with a combined compute/copy group at ordinal 0 and a copy-only
    /// group at ordinal 1.
    pub fn gpu(name: &str) -> Self {
        Self {
            name: name.to_string(),
            device_type: DeviceType::Gpu,
            vendor_id: 0x8086,
            device_id: 0x56c0,
            queue_groups: vec![
                QueueGroupProperties::new(queue_group_flags::COMPUTE | queue_group_flags::COPY, 1),
                QueueGroupProperties::new(queue_group_flags::COPY, 2),
            ],
        }
    }

    pub fn cpu(name: &str) -> Self {
        Self {
            name: name.to_string(),
            device_type: DeviceType::Cpu,
            vendor_id: 0x8086,
            device_id: 0x0001,
            queue_groups: vec![QueueGroupProperties::new(queue_group_flags::COMPUTE, 1)],
        }
    }

    pub fn with_queue_groups(mut self, groups: Vec<QueueGroupProperties>) -> Self {
        self.queue_groups = groups;
        self
    }
}

/// Drivers, each with its devices, in enumeration order.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    pub drivers: Vec<Vec<DeviceSpec>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver(mut self, devices: Vec<DeviceSpec>) -> Self {
        self.drivers.push(devices);
        self
    }

    /// One driver exposing one GPU.
    pub fn single_gpu() -> Self {
        Self::new().driver(vec![DeviceSpec::gpu("Reference GPU")])
    }
}

/// Objects currently alive in the driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LiveObjects {
    pub contexts: usize,
    pub command_lists: usize,
    pub modules: usize,
    pub build_logs: usize,
}

impl LiveObjects {
    pub fn is_empty(&self) -> bool {
        *self == LiveObjects::default()
    }
}

struct Fault {
    op: &'static str,
    status: ZeStatus,
    remaining: usize,
}

#[derive(Default)]
struct State {
    initialized: bool,
    next_object: usize,
    contexts: HashSet<usize>,
    /// command list → owning context
    command_lists: HashMap<usize, usize>,
    /// module → owning context
    modules: HashMap<usize, usize>,
    build_logs: HashMap<usize, String>,
    journal: Vec<String>,
    faults: Vec<Fault>,
    build_flags: Vec<String>,
    queue_descs: Vec<CommandQueueDesc>,
}

impl State {
    fn allocate(&mut self) -> usize {
        self.next_object += 1;
        OBJECT_HANDLE_BASE + self.next_object
    }

    fn enter(&mut self, op: &'static str) -> ZeResult<()> {
        self.journal.push(op.to_string());
        if let Some(fault) = self.faults.iter_mut().find(|f| f.op == op && f.remaining > 0) {
            fault.remaining -= 1;
            return Err(fault.status);
        }
        if op != "zeInit" && !self.initialized {
            return Err(ZeStatus::UNINITIALIZED);
        }
        Ok(())
    }
}

pub struct ReferenceDriver {
    topology: Topology,
    state: Mutex<State>,
}

impl ReferenceDriver {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            state: Mutex::new(State::default()),
        }
    }

    pub fn single_gpu() -> Self {
        Self::new(Topology::single_gpu())
    }

    /// Make the next `times` calls of `op` fail with `status`.
    pub fn inject_fault(&self, op: &'static str, status: ZeStatus, times: usize) {
        self.lock().faults.push(Fault {
            op,
            status,
            remaining: times,
        });
    }

    /// Names of every call made so far, in order.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    pub fn live(&self) -> LiveObjects {
        let state = self.lock();
        LiveObjects {
            contexts: state.contexts.len(),
            command_lists: state.command_lists.len(),
            modules: state.modules.len(),
            build_logs: state.build_logs.len(),
        }
    }

    /// Build flags received by every `zeModuleCreate`, in order.
    pub fn build_flags(&self) -> Vec<String> {
        self.lock().build_flags.clone()
    }

    /// Queue descriptors received by every `zeCommandListCreateImmediate`.
    pub fn queue_descs(&self) -> Vec<CommandQueueDesc> {
        self.lock().queue_descs.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn device_spec(&self, device: DeviceHandle) -> ZeResult<&DeviceSpec> {
        let raw = device.raw();
        if raw < DEVICE_HANDLE_BASE {
            return Err(ZeStatus::INVALID_NULL_HANDLE);
        }
        let offset = raw - DEVICE_HANDLE_BASE;
        self.topology
            .drivers
            .get(offset >> 8)
            .and_then(|devices| devices.get(offset & 0xff))
            .ok_or(ZeStatus::INVALID_ARGUMENT)
    }

    fn driver_index(&self, driver: DriverHandle) -> ZeResult<usize> {
        let index = driver
            .raw()
            .checked_sub(DRIVER_HANDLE_BASE)
            .ok_or(ZeStatus::INVALID_NULL_HANDLE)?;
        if index < self.topology.drivers.len() {
            Ok(index)
        } else {
            Err(ZeStatus::INVALID_ARGUMENT)
        }
    }
}

impl Default for ReferenceDriver {
    fn default() -> Self {
        Self::single_gpu()
    }
}

impl DriverApi for ReferenceDriver {
    fn name(&self) -> &str {
        "reference"
    }

    fn init(&self) -> ZeResult<()> {
        let mut state = self.lock();
        state.enter("zeInit")?;
        state.initialized = true;
        Ok(())
    }

    fn drivers(&self) -> ZeResult<Vec<DriverHandle>> {
        self.lock().enter("zeDriverGet")?;
        Ok((0..self.topology.drivers.len())
            .map(|i| DriverHandle::from_raw(DRIVER_HANDLE_BASE + i))
            .collect())
    }

    fn devices(&self, driver: DriverHandle) -> ZeResult<Vec<DeviceHandle>> {
        self.lock().enter("zeDeviceGet")?;
        let index = self.driver_index(driver)?;
        Ok((0..self.topology.drivers[index].len())
            .map(|j| DeviceHandle::from_raw(DEVICE_HANDLE_BASE + (index << 8) + j))
            .collect())
    }

    fn device_properties(&self, device: DeviceHandle) -> ZeResult<DeviceProperties> {
        self.lock().enter("zeDeviceGetProperties")?;
        let spec = self.device_spec(device)?;
        Ok(DeviceProperties {
            device_type: Some(spec.device_type),
            vendor_id: spec.vendor_id,
            device_id: spec.device_id,
            name: spec.name.clone(),
        })
    }

    fn context_create(&self, driver: DriverHandle) -> ZeResult<ContextHandle> {
        let mut state = self.lock();
        state.enter("zeContextCreate")?;
        self.driver_index(driver)?;
        let handle = state.allocate();
        state.contexts.insert(handle);
        Ok(ContextHandle::from_raw(handle))
    }

    fn context_destroy(&self, context: ContextHandle) -> ZeResult<()> {
        let mut state = self.lock();
        state.enter("zeContextDestroy")?;
        let raw = context.raw();
        if !state.contexts.contains(&raw) {
            return Err(ZeStatus::INVALID_NULL_HANDLE);
        }
        let in_use = state.command_lists.values().any(|c| *c == raw)
            || state.modules.values().any(|c| *c == raw);
        if in_use {
            return Err(ZeStatus::HANDLE_OBJECT_IN_USE);
        }
        state.contexts.remove(&raw);
        Ok(())
    }

    fn queue_groups(&self, device: DeviceHandle) -> ZeResult<Vec<QueueGroupProperties>> {
        self.lock().enter("zeDeviceGetCommandQueueGroupProperties")?;
        Ok(self.device_spec(device)?.queue_groups.clone())
    }

    fn command_list_create_immediate(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        desc: &CommandQueueDesc,
    ) -> ZeResult<CommandListHandle> {
        let mut state = self.lock();
        state.enter("zeCommandListCreateImmediate")?;
        if !state.contexts.contains(&context.raw()) {
            return Err(ZeStatus::INVALID_NULL_HANDLE);
        }
        let spec = self.device_spec(device)?;
        let group = spec
            .queue_groups
            .get(desc.ordinal as usize)
            .ok_or(ZeStatus::INVALID_ARGUMENT)?;
        if desc.index >= group.num_queues || desc.mode == QueueMode::Asynchronous {
            return Err(ZeStatus::INVALID_ARGUMENT);
        }
        state.queue_descs.push(*desc);
        let handle = state.allocate();
        state.command_lists.insert(handle, context.raw());
        Ok(CommandListHandle::from_raw(handle))
    }

    fn command_list_destroy(&self, list: CommandListHandle) -> ZeResult<()> {
        let mut state = self.lock();
        state.enter("zeCommandListDestroy")?;
        state
            .command_lists
            .remove(&list.raw())
            .map(|_| ())
            .ok_or(ZeStatus::INVALID_NULL_HANDLE)
    }

    fn module_create(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        desc: &ModuleDesc<'_>,
    ) -> ModuleBuild {
        let mut state = self.lock();
        let failed = |status| ModuleBuild {
            status,
            module: None,
            build_log: None,
        };
        if let Err(status) = state.enter("zeModuleCreate") {
            return failed(status);
        }
        if !state.contexts.contains(&context.raw()) {
            return failed(ZeStatus::INVALID_NULL_HANDLE);
        }
        if let Err(status) = self.device_spec(device) {
            return failed(status);
        }
        state.build_flags.push(desc.build_flags.to_string());

        let mut log = option_warnings(desc.build_flags);
        let status = match validate_spirv(desc.il) {
            Ok(()) => ZeStatus::SUCCESS,
            Err(message) => {
                log.push_str("error: ");
                log.push_str(&message);
                log.push('\n');
                ZeStatus::MODULE_BUILD_FAILURE
            }
        };

        let log_handle = state.allocate();
        state.build_logs.insert(log_handle, log);
        let module = if status.is_success() {
            let handle = state.allocate();
            state.modules.insert(handle, context.raw());
            Some(ModuleHandle::from_raw(handle))
        } else {
            None
        };
        ModuleBuild {
            status,
            module,
            build_log: Some(BuildLogHandle::from_raw(log_handle)),
        }
    }

    fn module_destroy(&self, module: ModuleHandle) -> ZeResult<()> {
        let mut state = self.lock();
        state.enter("zeModuleDestroy")?;
        state
            .modules
            .remove(&module.raw())
            .map(|_| ())
            .ok_or(ZeStatus::INVALID_NULL_HANDLE)
    }

    fn build_log_read(&self, log: BuildLogHandle) -> ZeResult<String> {
        let mut state = self.lock();
        state.enter("zeModuleBuildLogGetString")?;
        state
            .build_logs
            .get(&log.raw())
            .cloned()
            .ok_or(ZeStatus::INVALID_NULL_HANDLE)
    }

    fn build_log_destroy(&self, log: BuildLogHandle) -> ZeResult<()> {
        let mut state = self.lock();
        state.enter("zeModuleBuildLogDestroy")?;
        state
            .build_logs
            .remove(&log.raw())
            .map(|_| ())
            .ok_or(ZeStatus::INVALID_NULL_HANDLE)
    }
}

/// Check the SPIR-V module header: word alignment, magic, version, a
/// non-zero id bound and a zero schema word.
pub fn validate_spirv(il: &[u8]) -> Result<(), String> {
    if il.len() < SPIRV_HEADER_WORDS * 4 {
        return Err(format!(
            "SPIR-V module is {} bytes, shorter than the {}-byte header",
            il.len(),
            SPIRV_HEADER_WORDS * 4
        ));
    }
    if il.len() % 4 != 0 {
        return Err(format!(
            "SPIR-V module size {} is not a multiple of 4",
            il.len()
        ));
    }
    let word = |i: usize| bytemuck::pod_read_unaligned::<u32>(&il[i * 4..i * 4 + 4]);
    let magic = u32::from_le(word(0));
    if magic != SPIRV_MAGIC {
        return Err(format!("invalid SPIR-V magic number {:#010x}", magic));
    }
    let version = u32::from_le(word(1));
    if version & 0xff00_00ff != 0 || version > MAX_SPIRV_VERSION || version < 0x0001_0000 {
        return Err(format!("unsupported SPIR-V version {:#010x}", version));
    }
    if u32::from_le(word(3)) == 0 {
        return Err("SPIR-V id bound is zero".to_string());
    }
    if u32::from_le(word(4)) != 0 {
        return Err("SPIR-V schema word must be zero".to_string());
    }
    Ok(())
}

/// The smallest module the reference compiler builds: a header followed by
/// `OpCapability Kernel` and `OpMemoryModel Physical64 OpenCL`.
pub fn minimal_spirv() -> Vec<u8> {
    let words: [u32; 8] = [
        SPIRV_MAGIC,
        0x0001_0200,
        0,
        1,
        0,
        (2 << 16) | 17,
        6,
        (3 << 16) | 14,
    ];
    let mut bytes: Vec<u8> = bytemuck::cast_slice(&words).to_vec();
    bytes.extend_from_slice(bytemuck::cast_slice(&[2u32, 2u32]));
    if cfg!(target_endian = "big") {
        for chunk in bytes.chunks_exact_mut(4) {
            chunk.reverse();
        }
    }
    bytes
}

fn option_warnings(flags: &str) -> String {
    let mut log = String::new();
    for option in flags.split_whitespace() {
        let known = option.starts_with('-')
            && KNOWN_OPTION_PREFIXES
                .iter()
                .any(|prefix| option.starts_with(prefix));
        if !known {
            log.push_str(&format!("warning: unrecognized build option '{}'\n", option));
        }
    }
    log
}
