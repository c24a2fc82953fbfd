//! [`DriverApi`] over the system Level Zero loader, opened at runtime.

use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;

use libloading::Library;

use super::api::{
    BuildLogHandle, CommandListHandle, CommandQueueDesc, ContextHandle, DeviceHandle,
    DeviceProperties, DeviceType, DriverApi, DriverHandle, ModuleBuild, ModuleDesc, ModuleHandle,
    QueueGroupProperties, ZeResult, ZeStatus,
};
use super::{DeviceError, DeviceResult};

const LOADER_CANDIDATES: &[&str] = &["libze_loader.so.1", "libze_loader.so", "ze_loader.dll"];

const ZE_INIT_FLAG_GPU_ONLY: u32 = 1;
const ZE_MODULE_FORMAT_IL_SPIRV: u32 = 0;
const ZE_MAX_DEVICE_NAME: usize = 256;

const ZE_STRUCTURE_TYPE_DEVICE_PROPERTIES: u32 = 0x3;
const ZE_STRUCTURE_TYPE_COMMAND_QUEUE_GROUP_PROPERTIES: u32 = 0x6;
const ZE_STRUCTURE_TYPE_CONTEXT_DESC: u32 = 0xd;
const ZE_STRUCTURE_TYPE_COMMAND_QUEUE_DESC: u32 = 0xe;
const ZE_STRUCTURE_TYPE_MODULE_DESC: u32 = 0x1b;

type ZeHandle = *mut c_void;

#[repr(C)]
#[allow(dead_code)]
struct ZeDeviceProperties {
    stype: u32,
    p_next: *mut c_void,
    device_type: u32,
    vendor_id: u32,
    device_id: u32,
    flags: u32,
    subdevice_id: u32,
    core_clock_rate: u32,
    max_mem_alloc_size: u64,
    max_hardware_contexts: u32,
    max_command_queue_priority: u32,
    num_threads_per_eu: u32,
    physical_eu_simd_width: u32,
    num_eus_per_subslice: u32,
    num_subslices_per_slice: u32,
    num_slices: u32,
    timer_resolution: u64,
    timestamp_valid_bits: u32,
    kernel_timestamp_valid_bits: u32,
    uuid: [u8; 16],
    name: [c_char; ZE_MAX_DEVICE_NAME],
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct ZeCommandQueueGroupProperties {
    stype: u32,
    p_next: *mut c_void,
    flags: u32,
    max_memory_fill_pattern_size: usize,
    num_queues: u32,
}

#[repr(C)]
struct ZeContextDesc {
    stype: u32,
    p_next: *const c_void,
    flags: u32,
}

#[repr(C)]
struct ZeCommandQueueDesc {
    stype: u32,
    p_next: *const c_void,
    ordinal: u32,
    index: u32,
    flags: u32,
    mode: u32,
    priority: u32,
}

#[repr(C)]
struct ZeModuleDesc {
    stype: u32,
    p_next: *const c_void,
    format: u32,
    input_size: usize,
    p_input_module: *const u8,
    p_build_flags: *const c_char,
    p_constants: *const c_void,
}

type ZeInitFn = unsafe extern "C" fn(u32) -> u32;
type ZeDriverGetFn = unsafe extern "C" fn(*mut u32, *mut ZeHandle) -> u32;
type ZeDeviceGetFn = unsafe extern "C" fn(ZeHandle, *mut u32, *mut ZeHandle) -> u32;
type ZeDeviceGetPropertiesFn = unsafe extern "C" fn(ZeHandle, *mut ZeDeviceProperties) -> u32;
type ZeContextCreateFn = unsafe extern "C" fn(ZeHandle, *const ZeContextDesc, *mut ZeHandle) -> u32;
type ZeDestroyFn = unsafe extern "C" fn(ZeHandle) -> u32;
type ZeQueueGroupPropertiesFn =
    unsafe extern "C" fn(ZeHandle, *mut u32, *mut ZeCommandQueueGroupProperties) -> u32;
type ZeCommandListCreateImmediateFn = unsafe extern "C" fn(
    ZeHandle,
    ZeHandle,
    *const ZeCommandQueueDesc,
    *mut ZeHandle,
) -> u32;
type ZeModuleCreateFn =
    unsafe extern "C" fn(ZeHandle, ZeHandle, *const ZeModuleDesc, *mut ZeHandle, *mut ZeHandle) -> u32;
type ZeBuildLogGetStringFn = unsafe extern "C" fn(ZeHandle, *mut usize, *mut c_char) -> u32;

struct ZeFns {
    init: ZeInitFn,
    driver_get: ZeDriverGetFn,
    device_get: ZeDeviceGetFn,
    device_get_properties: ZeDeviceGetPropertiesFn,
    context_create: ZeContextCreateFn,
    context_destroy: ZeDestroyFn,
    queue_group_properties: ZeQueueGroupPropertiesFn,
    command_list_create_immediate: ZeCommandListCreateImmediateFn,
    command_list_destroy: ZeDestroyFn,
    module_create: ZeModuleCreateFn,
    module_destroy: ZeDestroyFn,
    build_log_get_string: ZeBuildLogGetStringFn,
    build_log_destroy: ZeDestroyFn,
}

/// The system Level Zero loader. Every entry point is resolved when the
/// library is opened.
pub struct LevelZero {
    fns: ZeFns,
    _lib: Library,
}

// SAFETY: the loader's entry points are thread-safe per the Level Zero
// specification, and `ZeFns` only holds plain function pointers.
unsafe impl Send for LevelZero {}
unsafe impl Sync for LevelZero {}

impl LevelZero {
    pub fn load() -> DeviceResult<Self> {
        let lib = load_loader_library()?;
        let fns = ZeFns {
            init: load_symbol(&lib, b"zeInit\0")?,
            driver_get: load_symbol(&lib, b"zeDriverGet\0")?,
            device_get: load_symbol(&lib, b"zeDeviceGet\0")?,
            device_get_properties: load_symbol(&lib, b"zeDeviceGetProperties\0")?,
            context_create: load_symbol(&lib, b"zeContextCreate\0")?,
            context_destroy: load_symbol(&lib, b"zeContextDestroy\0")?,
            queue_group_properties: load_symbol(
                &lib,
                b"zeDeviceGetCommandQueueGroupProperties\0",
            )?,
            command_list_create_immediate: load_symbol(&lib, b"zeCommandListCreateImmediate\0")?,
            command_list_destroy: load_symbol(&lib, b"zeCommandListDestroy\0")?,
            module_create: load_symbol(&lib, b"zeModuleCreate\0")?,
            module_destroy: load_symbol(&lib, b"zeModuleDestroy\0")?,
            build_log_get_string: load_symbol(&lib, b"zeModuleBuildLogGetString\0")?,
            build_log_destroy: load_symbol(&lib, b"zeModuleBuildLogDestroy\0")?,
        };
        tracing::debug!("opened Level Zero loader");
        Ok(Self { fns, _lib: lib })
    }
}

fn load_loader_library() -> DeviceResult<Library> {
    for candidate in LOADER_CANDIDATES {
        // SAFETY: dynamic library probing only.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            tracing::debug!(library = candidate, "found Level Zero loader");
            return Ok(lib);
        }
    }
    Err(DeviceError::LoaderUnavailable(format!(
        "tried {}",
        LOADER_CANDIDATES.join(", ")
    )))
}

fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> DeviceResult<T> {
    // SAFETY: symbol types match the Level Zero 1.x C API.
    let symbol = unsafe { lib.get::<T>(name) }.map_err(|err| {
        DeviceError::LoaderUnavailable(format!(
            "missing symbol {}: {err}",
            String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name))
        ))
    })?;
    Ok(*symbol)
}

fn check(code: u32) -> ZeResult<()> {
    ZeStatus(code).ok()
}

fn raw(handle: usize) -> ZeHandle {
    handle as ZeHandle
}

/// The two-call enumeration pattern: ask for the count, then fill.
fn enumerate(mut call: impl FnMut(*mut u32, *mut ZeHandle) -> u32) -> ZeResult<Vec<usize>> {
    let mut count = 0u32;
    check(call(&mut count, ptr::null_mut()))?;
    let mut handles: Vec<ZeHandle> = vec![ptr::null_mut(); count as usize];
    check(call(&mut count, handles.as_mut_ptr()))?;
    handles.truncate(count as usize);
    Ok(handles.into_iter().map(|h| h as usize).collect())
}

impl DriverApi for LevelZero {
    fn name(&self) -> &str {
        "level-zero"
    }

    fn init(&self) -> ZeResult<()> {
        // SAFETY: plain value argument.
        check(unsafe { (self.fns.init)(ZE_INIT_FLAG_GPU_ONLY) })
    }

    fn drivers(&self) -> ZeResult<Vec<DriverHandle>> {
        // SAFETY: `enumerate` passes a valid count pointer and a buffer of
        // `count` handles.
        let handles = enumerate(|count, out| unsafe { (self.fns.driver_get)(count, out) })?;
        Ok(handles.into_iter().map(DriverHandle::from_raw).collect())
    }

    fn devices(&self, driver: DriverHandle) -> ZeResult<Vec<DeviceHandle>> {
        // SAFETY: as for `drivers`.
        let handles = enumerate(|count, out| unsafe {
            (self.fns.device_get)(raw(driver.raw()), count, out)
        })?;
        Ok(handles.into_iter().map(DeviceHandle::from_raw).collect())
    }

    fn device_properties(&self, device: DeviceHandle) -> ZeResult<DeviceProperties> {
        // SAFETY: all-zero is a valid bit pattern for this plain C struct.
        let mut props: ZeDeviceProperties = unsafe { std::mem::zeroed() };
        props.stype = ZE_STRUCTURE_TYPE_DEVICE_PROPERTIES;
        // SAFETY: `props` is a properly tagged output struct.
        check(unsafe { (self.fns.device_get_properties)(raw(device.raw()), &mut props) })?;

        let name_bytes: Vec<u8> = props
            .name
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        Ok(DeviceProperties {
            device_type: DeviceType::from_raw(props.device_type),
            vendor_id: props.vendor_id,
            device_id: props.device_id,
            name: String::from_utf8_lossy(&name_bytes).into_owned(),
        })
    }

    fn context_create(&self, driver: DriverHandle) -> ZeResult<ContextHandle> {
        let desc = ZeContextDesc {
            stype: ZE_STRUCTURE_TYPE_CONTEXT_DESC,
            p_next: ptr::null(),
            flags: 0,
        };
        let mut context: ZeHandle = ptr::null_mut();
        // SAFETY: descriptor and output pointer are valid for the call.
        check(unsafe { (self.fns.context_create)(raw(driver.raw()), &desc, &mut context) })?;
        Ok(ContextHandle::from_raw(context as usize))
    }

    fn context_destroy(&self, context: ContextHandle) -> ZeResult<()> {
        // SAFETY: the caller owns `context` and destroys it once.
        check(unsafe { (self.fns.context_destroy)(raw(context.raw())) })
    }

    fn queue_groups(&self, device: DeviceHandle) -> ZeResult<Vec<QueueGroupProperties>> {
        let mut count = 0u32;
        // SAFETY: count query with a null output buffer.
        check(unsafe {
            (self.fns.queue_group_properties)(raw(device.raw()), &mut count, ptr::null_mut())
        })?;
        let empty = ZeCommandQueueGroupProperties {
            stype: ZE_STRUCTURE_TYPE_COMMAND_QUEUE_GROUP_PROPERTIES,
            p_next: ptr::null_mut(),
            flags: 0,
            max_memory_fill_pattern_size: 0,
            num_queues: 0,
        };
        let mut groups = vec![empty; count as usize];
        // SAFETY: `groups` holds `count` tagged output structs.
        check(unsafe {
            (self.fns.queue_group_properties)(raw(device.raw()), &mut count, groups.as_mut_ptr())
        })?;
        groups.truncate(count as usize);
        Ok(groups
            .into_iter()
            .map(|g| QueueGroupProperties {
                flags: g.flags,
                max_memory_fill_pattern_size: g.max_memory_fill_pattern_size,
                num_queues: g.num_queues,
            })
            .collect())
    }

    fn command_list_create_immediate(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        desc: &CommandQueueDesc,
    ) -> ZeResult<CommandListHandle> {
        let desc = ZeCommandQueueDesc {
            stype: ZE_STRUCTURE_TYPE_COMMAND_QUEUE_DESC,
            p_next: ptr::null(),
            ordinal: desc.ordinal,
            index: desc.index,
            flags: 0,
            mode: desc.mode.raw(),
            priority: 0,
        };
        let mut list: ZeHandle = ptr::null_mut();
        // SAFETY: descriptor and output pointer are valid for the call.
        check(unsafe {
            (self.fns.command_list_create_immediate)(
                raw(context.raw()),
                raw(device.raw()),
                &desc,
                &mut list,
            )
        })?;
        Ok(CommandListHandle::from_raw(list as usize))
    }

    fn command_list_destroy(&self, list: CommandListHandle) -> ZeResult<()> {
        // SAFETY: the caller owns `list` and destroys it once.
        check(unsafe { (self.fns.command_list_destroy)(raw(list.raw())) })
    }

    fn module_create(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        desc: &ModuleDesc<'_>,
    ) -> ModuleBuild {
        let Ok(flags) = CString::new(desc.build_flags) else {
            return ModuleBuild {
                status: ZeStatus::INVALID_ARGUMENT,
                module: None,
                build_log: None,
            };
        };
        let module_desc = ZeModuleDesc {
            stype: ZE_STRUCTURE_TYPE_MODULE_DESC,
            p_next: ptr::null(),
            format: ZE_MODULE_FORMAT_IL_SPIRV,
            input_size: desc.il.len(),
            p_input_module: desc.il.as_ptr(),
            p_build_flags: flags.as_ptr(),
            p_constants: ptr::null(),
        };
        let mut module: ZeHandle = ptr::null_mut();
        let mut log: ZeHandle = ptr::null_mut();
        // SAFETY: `module_desc` points at `desc.il` and `flags`, both alive
        // for the duration of the call.
        let status = ZeStatus(unsafe {
            (self.fns.module_create)(
                raw(context.raw()),
                raw(device.raw()),
                &module_desc,
                &mut module,
                &mut log,
            )
        });
        ModuleBuild {
            status,
            module: (status.is_success() && !module.is_null())
                .then(|| ModuleHandle::from_raw(module as usize)),
            build_log: (!log.is_null()).then(|| BuildLogHandle::from_raw(log as usize)),
        }
    }

    fn module_destroy(&self, module: ModuleHandle) -> ZeResult<()> {
        // SAFETY: the caller owns `module` and destroys it once.
        check(unsafe { (self.fns.module_destroy)(raw(module.raw())) })
    }

    fn build_log_read(&self, log: BuildLogHandle) -> ZeResult<String> {
        let mut size = 0usize;
        // SAFETY: size query with a null output buffer.
        check(unsafe {
            (self.fns.build_log_get_string)(raw(log.raw()), &mut size, ptr::null_mut())
        })?;
        if size == 0 {
            return Ok(String::new());
        }
        let mut buffer = vec![0u8; size];
        // SAFETY: `buffer` holds `size` bytes, as reported above.
        check(unsafe {
            (self.fns.build_log_get_string)(
                raw(log.raw()),
                &mut size,
                buffer.as_mut_ptr() as *mut c_char,
            )
        })?;
        let text = CStr::from_bytes_until_nul(&buffer)
            .map(|c| c.to_string_lossy().into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&buffer).into_owned());
        Ok(text)
    }

    fn build_log_destroy(&self, log: BuildLogHandle) -> ZeResult<()> {
        // SAFETY: the caller owns `log` and destroys it once.
        check(unsafe { (self.fns.build_log_destroy)(raw(log.raw())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_device_properties_layout() {
        assert_eq!(offset_of!(ZeDeviceProperties, max_mem_alloc_size), 40);
        assert_eq!(offset_of!(ZeDeviceProperties, timer_resolution), 80);
        assert_eq!(offset_of!(ZeDeviceProperties, uuid), 96);
        assert_eq!(offset_of!(ZeDeviceProperties, name), 112);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_descriptor_layouts() {
        assert_eq!(size_of::<ZeContextDesc>(), 24);
        assert_eq!(size_of::<ZeCommandQueueDesc>(), 40);
        assert_eq!(offset_of!(ZeModuleDesc, input_size), 24);
        assert_eq!(size_of::<ZeModuleDesc>(), 56);
        assert_eq!(size_of::<ZeCommandQueueGroupProperties>(), 40);
    }

    #[test]
    fn test_missing_loader_is_structural() {
        if LevelZero::load().is_ok() {
            return;
        }
        let err = LevelZero::load().err().unwrap();
        assert!(matches!(err, DeviceError::LoaderUnavailable(_)));
        assert!(!err.is_retryable());
    }
}
