//! Device discovery and the immediate command list the bridge submits to.

use std::fmt;
use std::sync::Arc;

use super::api::{
    CommandListHandle, CommandQueueDesc, ContextHandle, DeviceHandle, DeviceType, DriverApi,
    DriverHandle, QueueMode,
};
use super::error::ZeCall;
use super::{DeviceError, DeviceResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    Initialized,
    Destroyed,
}

/// A context and a synchronous immediate command list on the first device
/// of the requested class. Driver and device handles are borrowed from the
/// runtime; the context and command list are owned.
pub struct DeviceQueue {
    api: Arc<dyn DriverApi>,
    driver: DriverHandle,
    device: DeviceHandle,
    device_name: String,
    context: ContextHandle,
    command_list: CommandListHandle,
    ordinal: u32,
    state: QueueState,
}

/// The chosen driver/device pair.
struct Selection {
    driver: DriverHandle,
    device: DeviceHandle,
    name: String,
}

impl DeviceQueue {
    pub fn create(api: Arc<dyn DriverApi>, device_type: DeviceType) -> DeviceResult<Self> {
        api.init().during("zeInit")?;
        let selection = select_device(api.as_ref(), device_type)?;
        let context = api.context_create(selection.driver).during("zeContextCreate")?;

        match open_command_list(api.as_ref(), &selection, context) {
            Ok((command_list, ordinal)) => {
                tracing::info!(
                    driver = api.name(),
                    device = %selection.name,
                    ordinal,
                    "device queue ready"
                );
                Ok(Self {
                    api,
                    driver: selection.driver,
                    device: selection.device,
                    device_name: selection.name,
                    context,
                    command_list,
                    ordinal,
                    state: QueueState::Initialized,
                })
            }
            Err(err) => {
                if let Err(status) = api.context_destroy(context) {
                    tracing::warn!(%status, "zeContextDestroy failed while unwinding queue creation");
                }
                Err(err)
            }
        }
    }

    pub fn api(&self) -> &Arc<dyn DriverApi> {
        &self.api
    }

    pub fn driver(&self) -> DriverHandle {
        self.driver
    }

    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn context(&self) -> ContextHandle {
        self.context
    }

    pub fn command_list(&self) -> CommandListHandle {
        self.command_list
    }

    /// Ordinal of the compute queue group the command list was created on.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    /// Destroy the command list, then the context. Both are attempted; the
    /// first failure is returned.
    pub fn close(mut self) -> DeviceResult<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> DeviceResult<()> {
        if self.state == QueueState::Destroyed {
            return Ok(());
        }
        self.state = QueueState::Destroyed;
        let list = self
            .api
            .command_list_destroy(self.command_list)
            .during("zeCommandListDestroy");
        let context = self
            .api
            .context_destroy(self.context)
            .during("zeContextDestroy");
        tracing::debug!(device = %self.device_name, "device queue destroyed");
        list.and(context)
    }
}

impl Drop for DeviceQueue {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            tracing::warn!(error = %err, "device queue teardown failed");
        }
    }
}

impl fmt::Debug for DeviceQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceQueue")
            .field("driver", &self.api.name())
            .field("device", &self.device_name)
            .field("context", &self.context)
            .field("command_list", &self.command_list)
            .field("ordinal", &self.ordinal)
            .field("state", &self.state)
            .finish()
    }
}

fn select_device(api: &dyn DriverApi, wanted: DeviceType) -> DeviceResult<Selection> {
    let drivers = api.drivers().during("zeDriverGet")?;
    tracing::debug!(count = drivers.len(), "enumerated drivers");
    for driver in drivers {
        let devices = api.devices(driver).during("zeDeviceGet")?;
        tracing::debug!(%driver, count = devices.len(), "enumerated devices");
        for device in devices {
            let props = api
                .device_properties(device)
                .during("zeDeviceGetProperties")?;
            tracing::debug!(
                name = %props.name,
                device_type = ?props.device_type,
                vendor = props.vendor_id,
                "found device"
            );
            if props.device_type == Some(wanted) {
                return Ok(Selection {
                    driver,
                    device,
                    name: props.name,
                });
            }
        }
    }
    Err(DeviceError::NoMatchingDevice(wanted))
}

fn open_command_list(
    api: &dyn DriverApi,
    selection: &Selection,
    context: ContextHandle,
) -> DeviceResult<(CommandListHandle, u32)> {
    let groups = api
        .queue_groups(selection.device)
        .during("zeDeviceGetCommandQueueGroupProperties")?;
    let ordinal = groups
        .iter()
        .position(|g| g.is_compute())
        .ok_or_else(|| DeviceError::NoComputeQueueGroup {
            device: selection.name.clone(),
        })? as u32;
    let desc = CommandQueueDesc {
        ordinal,
        index: 0,
        mode: QueueMode::Synchronous,
    };
    let list = api
        .command_list_create_immediate(context, selection.device, &desc)
        .during("zeCommandListCreateImmediate")?;
    Ok((list, ordinal))
}
