//! Building SPIR-V payloads into device modules.

use std::fmt;

use super::api::{BuildLogHandle, ModuleDesc, ModuleHandle, ZeStatus};
use super::error::ZeCall;
use super::options::BuildOptions;
use super::queue::DeviceQueue;
use super::{DeviceError, DeviceResult};

/// A built module. Borrows the queue whose context it lives in.
pub struct DeviceModule<'q> {
    queue: &'q DeviceQueue,
    handle: Option<ModuleHandle>,
    build_log: String,
}

impl<'q> DeviceModule<'q> {
    /// Re-adopt a handle previously released with [`DeviceModule::into_raw`].
    ///
    /// # Safety
    ///
    /// `handle` must come from `into_raw` on a module built on `queue`, and
    /// must not have been adopted since.
    pub unsafe fn from_raw(queue: &'q DeviceQueue, handle: ModuleHandle) -> Self {
        Self {
            queue,
            handle: Some(handle),
            build_log: String::new(),
        }
    }

    pub fn handle(&self) -> Option<ModuleHandle> {
        self.handle
    }

    /// The compiler's log for this build; empty when it had nothing to say.
    pub fn build_log(&self) -> &str {
        &self.build_log
    }

    /// Give up ownership of the handle without destroying it.
    pub fn into_raw(mut self) -> ModuleHandle {
        match self.handle.take() {
            Some(handle) => handle,
            None => ModuleHandle::from_raw(0),
        }
    }

    pub fn release(mut self) -> DeviceResult<()> {
        self.destroy()
    }

    fn destroy(&mut self) -> DeviceResult<()> {
        match self.handle.take() {
            Some(handle) => self
                .queue
                .api()
                .module_destroy(handle)
                .during("zeModuleDestroy"),
            None => Ok(()),
        }
    }
}

impl Drop for DeviceModule<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            tracing::warn!(error = %err, "device module release failed");
        }
    }
}

impl fmt::Debug for DeviceModule<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceModule")
            .field("handle", &self.handle)
            .field("build_log", &self.build_log)
            .finish()
    }
}

/// Build `payload` as a SPIR-V module on `queue`'s context and device.
pub fn load_module<'q>(
    queue: &'q DeviceQueue,
    payload: &[u8],
    options: &BuildOptions,
) -> DeviceResult<DeviceModule<'q>> {
    if payload.is_empty() {
        return Err(DeviceError::EmptyPayload);
    }
    let flags = options.flags();
    if flags.contains('\0') {
        return Err(DeviceError::InvalidBuildFlags);
    }

    let fingerprint = blake3::hash(payload).to_hex();
    tracing::info!(
        flags = %options,
        bytes = payload.len(),
        payload = &fingerprint[..16],
        "building device module"
    );

    let api = queue.api();
    let build = api.module_create(
        queue.context(),
        queue.device(),
        &ModuleDesc {
            il: payload,
            build_flags: flags,
        },
    );
    let log = match build.build_log {
        Some(log) => take_build_log(queue, log),
        None => String::new(),
    };

    if !build.status.is_success() {
        if !log.is_empty() {
            tracing::error!("module build log:\n{}", log);
        }
        if !is_build_failure(build.status) {
            return Err(DeviceError::Driver {
                op: "zeModuleCreate",
                status: build.status,
            });
        }
        return Err(DeviceError::BuildFailed {
            status: build.status,
            log,
        });
    }
    let Some(handle) = build.module else {
        return Err(DeviceError::Driver {
            op: "zeModuleCreate",
            status: ZeStatus::INVALID_NULL_HANDLE,
        });
    };

    if !log.is_empty() {
        tracing::info!("module build log:\n{}", log);
    }
    tracing::debug!(module = %handle, "device module built");
    Ok(DeviceModule {
        queue,
        handle: Some(handle),
        build_log: log,
    })
}

/// Statuses that mean the compiler rejected the payload. Anything else from
/// `zeModuleCreate` is a driver failure and keeps its retry class.
fn is_build_failure(status: ZeStatus) -> bool {
    matches!(
        status,
        ZeStatus::MODULE_BUILD_FAILURE
            | ZeStatus::MODULE_LINK_FAILURE
            | ZeStatus::INVALID_NATIVE_BINARY
    )
}

/// Read then destroy a build log. Failures here never mask the build result.
fn take_build_log(queue: &DeviceQueue, log: BuildLogHandle) -> String {
    let api = queue.api();
    let text = match api.build_log_read(log) {
        Ok(text) => text,
        Err(status) => {
            tracing::warn!(%status, "zeModuleBuildLogGetString failed");
            String::new()
        }
    };
    if let Err(status) = api.build_log_destroy(log) {
        tracing::warn!(%status, "zeModuleBuildLogDestroy failed");
    }
    text.trim_end_matches(['\0', '\n']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::api::DeviceType;
    use crate::device::reference::{minimal_spirv, ReferenceDriver, Topology};
    use std::sync::Arc;

    fn queue() -> (Arc<ReferenceDriver>, DeviceQueue) {
        let driver = Arc::new(ReferenceDriver::new(Topology::single_gpu()));
        let queue = DeviceQueue::create(driver.clone(), DeviceType::Gpu).unwrap();
        (driver, queue)
    }

    #[test]
    fn test_well_formed_payload() {
        let (driver, queue) = queue();
        let module = load_module(&queue, &minimal_spirv(), &BuildOptions::Default).unwrap();
        assert!(module.handle().is_some());
        assert_eq!(module.build_log(), "");
        assert_eq!(driver.live().build_logs, 0);
        module.release().unwrap();
        assert_eq!(driver.live().modules, 0);
    }

    #[test]
    fn test_malformed_payload() {
        let (driver, queue) = queue();
        let err = load_module(&queue, &[0xde, 0xad, 0xbe, 0xef], &BuildOptions::Default).unwrap_err();
        match &err {
            DeviceError::BuildFailed { status, log } => {
                assert_eq!(*status, ZeStatus::MODULE_BUILD_FAILURE);
                assert!(!log.is_empty());
            }
            other => panic!("expected BuildFailed, got {other:?}"),
        }
        assert!(!err.is_retryable());
        assert_eq!(driver.live().build_logs, 0);
        assert_eq!(driver.live().modules, 0);
    }

    #[test]
    fn test_transient_create_failure_stays_retryable() {
        let (driver, queue) = queue();
        driver.inject_fault("zeModuleCreate", ZeStatus::OUT_OF_DEVICE_MEMORY, 1);
        let err = load_module(&queue, &minimal_spirv(), &BuildOptions::Default).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Driver {
                op: "zeModuleCreate",
                status: ZeStatus::OUT_OF_DEVICE_MEMORY
            }
        ));
        assert!(err.is_retryable());

        let module = load_module(&queue, &minimal_spirv(), &BuildOptions::Default).unwrap();
        module.release().unwrap();
    }

    #[test]
    fn test_empty_payload_is_rejected_before_the_driver() {
        let (driver, queue) = queue();
        driver.clear_journal();
        let err = load_module(&queue, &[], &BuildOptions::Default).unwrap_err();
        assert!(matches!(err, DeviceError::EmptyPayload));
        assert!(driver.journal().is_empty());
    }

    #[test]
    fn test_flags_reach_the_driver() {
        let (driver, queue) = queue();
        let options = BuildOptions::Raw("-cl-opt-disable".to_string());
        load_module(&queue, &minimal_spirv(), &options).unwrap();
        assert_eq!(driver.build_flags(), vec!["-cl-opt-disable"]);
    }

    #[test]
    fn test_nul_in_flags() {
        let (_driver, queue) = queue();
        let options = BuildOptions::Raw("-a\0-b".to_string());
        let err = load_module(&queue, &minimal_spirv(), &options).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidBuildFlags));
    }

    #[test]
    fn test_warnings_are_kept_on_success() {
        let (_driver, queue) = queue();
        let options = BuildOptions::Raw("-cl-fast-relaxed-math bogus".to_string());
        let module = load_module(&queue, &minimal_spirv(), &options).unwrap();
        assert_eq!(
            module.build_log(),
            "warning: unrecognized build option 'bogus'"
        );
    }

    #[test]
    fn test_build_log_is_requested_and_destroyed() {
        let (driver, queue) = queue();
        driver.clear_journal();
        let module = load_module(&queue, &minimal_spirv(), &BuildOptions::Default).unwrap();
        assert_eq!(
            driver.journal(),
            vec![
                "zeModuleCreate",
                "zeModuleBuildLogGetString",
                "zeModuleBuildLogDestroy"
            ]
        );
        drop(module);
        assert_eq!(driver.journal().last().unwrap(), "zeModuleDestroy");
    }

    #[test]
    fn test_into_raw_and_back() {
        let (driver, queue) = queue();
        let module = load_module(&queue, &minimal_spirv(), &BuildOptions::Default).unwrap();
        let handle = module.into_raw();
        assert_eq!(driver.live().modules, 1);
        let adopted = unsafe { DeviceModule::from_raw(&queue, handle) };
        adopted.release().unwrap();
        assert_eq!(driver.live().modules, 0);
    }
}
