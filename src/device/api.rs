//! The driver seam: the subset of the Level Zero API the bridge uses,
//! expressed with plain handles and statuses so it can be implemented both by
//! the dynamically loaded runtime and by the in-process reference driver.

use std::fmt;

/// A `ze_result_t` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ZeStatus(pub u32);

impl ZeStatus {
    pub const SUCCESS: ZeStatus = ZeStatus(0);
    pub const NOT_READY: ZeStatus = ZeStatus(1);
    pub const DEVICE_LOST: ZeStatus = ZeStatus(0x7000_0001);
    pub const OUT_OF_HOST_MEMORY: ZeStatus = ZeStatus(0x7000_0002);
    pub const OUT_OF_DEVICE_MEMORY: ZeStatus = ZeStatus(0x7000_0003);
    pub const MODULE_BUILD_FAILURE: ZeStatus = ZeStatus(0x7000_0004);
    pub const MODULE_LINK_FAILURE: ZeStatus = ZeStatus(0x7000_0005);
    pub const DEVICE_IN_LOW_POWER_STATE: ZeStatus = ZeStatus(0x7000_0007);
    pub const NOT_AVAILABLE: ZeStatus = ZeStatus(0x7001_0001);
    pub const UNINITIALIZED: ZeStatus = ZeStatus(0x7800_0001);
    pub const UNSUPPORTED_FEATURE: ZeStatus = ZeStatus(0x7800_0003);
    pub const INVALID_ARGUMENT: ZeStatus = ZeStatus(0x7800_0004);
    pub const INVALID_NULL_HANDLE: ZeStatus = ZeStatus(0x7800_0005);
    pub const HANDLE_OBJECT_IN_USE: ZeStatus = ZeStatus(0x7800_0006);
    pub const INVALID_NULL_POINTER: ZeStatus = ZeStatus(0x7800_0007);
    pub const INVALID_SIZE: ZeStatus = ZeStatus(0x7800_0008);
    pub const INVALID_NATIVE_BINARY: ZeStatus = ZeStatus(0x7800_000f);
    pub const UNKNOWN: ZeStatus = ZeStatus(0x7fff_fffe);

    pub fn is_success(self) -> bool {
        self == ZeStatus::SUCCESS
    }

    /// `Ok(())` for success, the status itself otherwise.
    pub fn ok(self) -> ZeResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            ZeStatus::SUCCESS => "ZE_RESULT_SUCCESS",
            ZeStatus::NOT_READY => "ZE_RESULT_NOT_READY",
            ZeStatus::DEVICE_LOST => "ZE_RESULT_ERROR_DEVICE_LOST",
            ZeStatus::OUT_OF_HOST_MEMORY => "ZE_RESULT_ERROR_OUT_OF_HOST_MEMORY",
            ZeStatus::OUT_OF_DEVICE_MEMORY => "ZE_RESULT_ERROR_OUT_OF_DEVICE_MEMORY",
            ZeStatus::MODULE_BUILD_FAILURE => "ZE_RESULT_ERROR_MODULE_BUILD_FAILURE",
            ZeStatus::MODULE_LINK_FAILURE => "ZE_RESULT_ERROR_MODULE_LINK_FAILURE",
            ZeStatus::DEVICE_IN_LOW_POWER_STATE => "ZE_RESULT_ERROR_DEVICE_IN_LOW_POWER_STATE",
            ZeStatus::NOT_AVAILABLE => "ZE_RESULT_ERROR_NOT_AVAILABLE",
            ZeStatus::UNINITIALIZED => "ZE_RESULT_ERROR_UNINITIALIZED",
            ZeStatus::UNSUPPORTED_FEATURE => "ZE_RESULT_ERROR_UNSUPPORTED_FEATURE",
            ZeStatus::INVALID_ARGUMENT => "ZE_RESULT_ERROR_INVALID_ARGUMENT",
            ZeStatus::INVALID_NULL_HANDLE => "ZE_RESULT_ERROR_INVALID_NULL_HANDLE",
            ZeStatus::HANDLE_OBJECT_IN_USE => "ZE_RESULT_ERROR_HANDLE_OBJECT_IN_USE",
            ZeStatus::INVALID_NULL_POINTER => "ZE_RESULT_ERROR_INVALID_NULL_POINTER",
            ZeStatus::INVALID_SIZE => "ZE_RESULT_ERROR_INVALID_SIZE",
            ZeStatus::INVALID_NATIVE_BINARY => "ZE_RESULT_ERROR_INVALID_NATIVE_BINARY",
            ZeStatus::UNKNOWN => "ZE_RESULT_ERROR_UNKNOWN",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ZeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#x})", name, self.0),
            None => write!(f, "code {:#x}", self.0),
        }
    }
}

pub type ZeResult<T> = Result<T, ZeStatus>;

macro_rules! handle {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            pub struct $name(usize);

            impl $name {
                pub fn from_raw(raw: usize) -> Self {
                    Self(raw)
                }

                pub fn raw(self) -> usize {
                    self.0
                }

                pub fn is_null(self) -> bool {
                    self.0 == 0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{:#x}", self.0)
                }
            }
        )*
    };
}

handle! {
    /// `ze_driver_handle_t`
    DriverHandle,
    /// `ze_device_handle_t`
    DeviceHandle,
    /// `ze_context_handle_t`
    ContextHandle,
    /// `ze_command_list_handle_t`
    CommandListHandle,
    /// `ze_module_handle_t`
    ModuleHandle,
    /// `ze_module_build_log_handle_t`
    BuildLogHandle,
}

/// `ze_device_type_t`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Gpu,
    Cpu,
    Fpga,
    Mca,
    Vpu,
}

impl DeviceType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(DeviceType::Gpu),
            2 => Some(DeviceType::Cpu),
            3 => Some(DeviceType::Fpga),
            4 => Some(DeviceType::Mca),
            5 => Some(DeviceType::Vpu),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            DeviceType::Gpu => 1,
            DeviceType::Cpu => 2,
            DeviceType::Fpga => 3,
            DeviceType::Mca => 4,
            DeviceType::Vpu => 5,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::Gpu => "GPU",
            DeviceType::Cpu => "CPU",
            DeviceType::Fpga => "FPGA",
            DeviceType::Mca => "MCA",
            DeviceType::Vpu => "VPU",
        };
        f.write_str(name)
    }
}

/// The device properties the bridge looks at. `device_type` is `None` for
/// classes this crate does not know.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceProperties {
    pub device_type: Option<DeviceType>,
    pub vendor_id: u32,
    pub device_id: u32,
    pub name: String,
}

/// `ze_command_queue_group_property_flags_t` bits.
pub mod queue_group_flags {
    pub const COMPUTE: u32 = 1 << 0;
    pub const COPY: u32 = 1 << 1;
    pub const COOPERATIVE_KERNELS: u32 = 1 << 2;
    pub const METRICS: u32 = 1 << 3;
}

/// One entry of `zeDeviceGetCommandQueueGroupProperties`; its index in the
/// returned list is the queue group ordinal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueGroupProperties {
    pub flags: u32,
    pub max_memory_fill_pattern_size: usize,
    pub num_queues: u32,
}

impl QueueGroupProperties {
    pub fn new(flags: u32, num_queues: u32) -> Self {
        Self {
            flags,
            max_memory_fill_pattern_size: 4,
            num_queues,
        }
    }

    pub fn is_compute(&self) -> bool {
        self.flags & queue_group_flags::COMPUTE != 0
    }
}

/// `ze_command_queue_mode_t`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueMode {
    Default,
    Synchronous,
    Asynchronous,
}

impl QueueMode {
    pub fn raw(self) -> u32 {
        match self {
            QueueMode::Default => 0,
            QueueMode::Synchronous => 1,
            QueueMode::Asynchronous => 2,
        }
    }
}

/// Parameters for an immediate command list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandQueueDesc {
    pub ordinal: u32,
    pub index: u32,
    pub mode: QueueMode,
}

/// A SPIR-V module to build. The format is always `ZE_MODULE_FORMAT_IL_SPIRV`.
#[derive(Clone, Copy, Debug)]
pub struct ModuleDesc<'a> {
    pub il: &'a [u8],
    pub build_flags: &'a str,
}

/// Outcome of `zeModuleCreate`. The runtime may hand back a build log even
/// when the build fails, so the status travels alongside the handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModuleBuild {
    pub status: ZeStatus,
    pub module: Option<ModuleHandle>,
    pub build_log: Option<BuildLogHandle>,
}

/// The Level Zero calls the bridge makes, one method per entry point.
pub trait DriverApi: Send + Sync {
    /// Implementation name for logs.
    fn name(&self) -> &str;

    /// `zeInit(ZE_INIT_FLAG_GPU_ONLY)`.
    fn init(&self) -> ZeResult<()>;

    fn drivers(&self) -> ZeResult<Vec<DriverHandle>>;

    fn devices(&self, driver: DriverHandle) -> ZeResult<Vec<DeviceHandle>>;

    fn device_properties(&self, device: DeviceHandle) -> ZeResult<DeviceProperties>;

    fn context_create(&self, driver: DriverHandle) -> ZeResult<ContextHandle>;

    fn context_destroy(&self, context: ContextHandle) -> ZeResult<()>;

    fn queue_groups(&self, device: DeviceHandle) -> ZeResult<Vec<QueueGroupProperties>>;

    fn command_list_create_immediate(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        desc: &CommandQueueDesc,
    ) -> ZeResult<CommandListHandle>;

    fn command_list_destroy(&self, list: CommandListHandle) -> ZeResult<()>;

    fn module_create(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        desc: &ModuleDesc<'_>,
    ) -> ModuleBuild;

    fn module_destroy(&self, module: ModuleHandle) -> ZeResult<()>;

    fn build_log_read(&self, log: BuildLogHandle) -> ZeResult<String>;

    fn build_log_destroy(&self, log: BuildLogHandle) -> ZeResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(
            ZeStatus::DEVICE_LOST.to_string(),
            "ZE_RESULT_ERROR_DEVICE_LOST (0x70000001)"
        );
        assert_eq!(ZeStatus(0x1234).to_string(), "code 0x1234");
    }

    #[test]
    fn test_status_ok() {
        assert_eq!(ZeStatus::SUCCESS.ok(), Ok(()));
        assert_eq!(ZeStatus::NOT_READY.ok(), Err(ZeStatus::NOT_READY));
    }

    #[test]
    fn test_device_type_raw() {
        for ty in [
            DeviceType::Gpu,
            DeviceType::Cpu,
            DeviceType::Fpga,
            DeviceType::Mca,
            DeviceType::Vpu,
        ] {
            assert_eq!(DeviceType::from_raw(ty.raw()), Some(ty));
        }
        assert_eq!(DeviceType::from_raw(0), None);
    }

    #[test]
    fn test_compute_flag() {
        use queue_group_flags::*;
        assert!(QueueGroupProperties::new(COMPUTE | COPY, 1).is_compute());
        assert!(!QueueGroupProperties::new(COPY, 2).is_compute());
    }
}
