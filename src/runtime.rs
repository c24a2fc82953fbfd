//! C ABI entry points called from JIT-compiled code.
//!
//! JIT code reaches these functions through the [`host_symbols`] table; they
//! are also exported unmangled. No error crosses the native boundary:
//! [`catch_all`] retries transient failures, then logs and aborts.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use crate::device::api::ModuleHandle;
use crate::device::{
    load_module, BuildOptions, DeviceError, DeviceModule, DeviceQueue, DeviceResult, DeviceType,
    DriverApi, LevelZero, ZeStatus,
};
use crate::jit::HostSymbols;

/// How often a retryable device error is retried before giving up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// Run `f` until it succeeds, fails structurally, or attempts run out.
    pub fn run<T>(&self, op: &str, mut f: impl FnMut() -> DeviceResult<T>) -> DeviceResult<T> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match f() {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::warn!(op, attempt, error = %err, "retrying device operation");
                    thread::sleep(self.backoff * attempt);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Everything the C ABI functions need to talk to a device.
pub struct RuntimeContext {
    pub driver: Arc<dyn DriverApi>,
    pub device_type: DeviceType,
    pub build_options: BuildOptions,
    pub retry: RetryPolicy,
}

impl RuntimeContext {
    pub fn new(driver: Arc<dyn DriverApi>) -> Self {
        Self {
            driver,
            device_type: DeviceType::Gpu,
            build_options: BuildOptions::Default,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_build_options(mut self, options: BuildOptions) -> Self {
        self.build_options = options;
        self
    }

    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

static INSTALLED: RwLock<Option<Arc<RuntimeContext>>> = RwLock::new(None);

/// Set the context used by subsequent C ABI calls, replacing any previous one.
pub fn install(context: RuntimeContext) {
    tracing::debug!(
        driver = context.driver.name(),
        device_type = %context.device_type,
        flags = %context.build_options,
        "installed device runtime"
    );
    let mut slot = INSTALLED.write().unwrap_or_else(|p| p.into_inner());
    *slot = Some(Arc::new(context));
}

pub fn installed() -> Option<Arc<RuntimeContext>> {
    INSTALLED.read().unwrap_or_else(|p| p.into_inner()).clone()
}

/// The installed context, or one built from the system loader and the
/// process environment on first use.
fn current() -> DeviceResult<Arc<RuntimeContext>> {
    if let Some(context) = installed() {
        return Ok(context);
    }
    let mut slot = INSTALLED.write().unwrap_or_else(|p| p.into_inner());
    if let Some(context) = slot.as_ref() {
        return Ok(context.clone());
    }
    let driver: Arc<dyn DriverApi> = Arc::new(LevelZero::load()?);
    let context = Arc::new(
        RuntimeContext::new(driver).with_build_options(BuildOptions::from_env()),
    );
    *slot = Some(context.clone());
    Ok(context)
}

/// Run `f` at the native boundary. Errors and panics are logged and the
/// process aborts.
pub fn catch_all<T>(op: &str, f: impl FnOnce() -> DeviceResult<T>) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            tracing::error!(op, error = %err, "device runtime failure");
            eprintln!("error: {}: {}", op, err);
            std::process::abort()
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(op, panic = %message, "panic in device runtime");
            eprintln!("error: {}: panic: {}", op, message);
            std::process::abort()
        }
    }
}

/// Create a device queue on the configured device class. The arguments are
/// accepted for ABI compatibility and ignored: discovery always selects the
/// first matching device.
#[export_name = "gpuCreateStream"]
pub extern "C" fn gpu_create_stream(_device: *mut c_void, _context: *mut c_void) -> *mut c_void {
    catch_all("gpuCreateStream", || {
        let context = current()?;
        let queue = context.retry.run("gpuCreateStream", || {
            DeviceQueue::create(context.driver.clone(), context.device_type)
        })?;
        Ok(Box::into_raw(Box::new(queue)) as *mut c_void)
    })
}

/// Close and free a queue created by `gpuCreateStream`. Teardown failures are
/// logged, not fatal.
#[export_name = "gpuStreamDestroy"]
pub extern "C" fn gpu_stream_destroy(queue: *mut c_void) {
    if queue.is_null() {
        tracing::warn!("gpuStreamDestroy called with a null queue");
        return;
    }
    // SAFETY: non-null queues come from `gpu_create_stream`'s Box::into_raw
    // and are destroyed once.
    let queue = unsafe { Box::from_raw(queue as *mut DeviceQueue) };
    if let Err(err) = queue.close() {
        tracing::warn!(error = %err, "gpuStreamDestroy: queue teardown failed");
    }
}

/// Build `size` bytes at `data` into a module on `queue`. Returns the raw
/// module handle, which stays alive until `gpuModuleUnload`.
#[export_name = "gpuModuleLoad"]
pub extern "C" fn gpu_module_load(
    queue: *mut c_void,
    data: *const c_void,
    size: usize,
) -> *mut c_void {
    catch_all("gpuModuleLoad", || {
        // SAFETY: `queue` comes from `gpu_create_stream` and is not
        // destroyed while JIT code holds it.
        let queue = unsafe { queue_ref(queue) }?;
        if data.is_null() || size == 0 {
            return Err(DeviceError::EmptyPayload);
        }
        // SAFETY: the caller passes `size` readable bytes at `data`.
        let payload = unsafe { std::slice::from_raw_parts(data as *const u8, size) };
        let context = current()?;
        let module = context.retry.run("gpuModuleLoad", || {
            load_module(queue, payload, &context.build_options)
        })?;
        Ok(module.into_raw().raw() as *mut c_void)
    })
}

/// Destroy a module returned by `gpuModuleLoad`. Failures are logged.
#[export_name = "gpuModuleUnload"]
pub extern "C" fn gpu_module_unload(queue: *mut c_void, module: *mut c_void) {
    if module.is_null() {
        return;
    }
    // SAFETY: as for `gpu_module_load`.
    let queue = match unsafe { queue_ref(queue) } {
        Ok(queue) => queue,
        Err(err) => {
            tracing::warn!(error = %err, "gpuModuleUnload: invalid queue");
            return;
        }
    };
    // SAFETY: `module` was produced by `gpu_module_load` on this queue.
    let module = unsafe { DeviceModule::from_raw(queue, ModuleHandle::from_raw(module as usize)) };
    if let Err(err) = module.release() {
        tracing::warn!(error = %err, "gpuModuleUnload: module release failed");
    }
}

/// # Safety
///
/// `queue` is null or a live pointer from `gpu_create_stream`.
unsafe fn queue_ref<'a>(queue: *mut c_void) -> DeviceResult<&'a DeviceQueue> {
    (queue as *const DeviceQueue)
        .as_ref()
        .ok_or(DeviceError::Driver {
            op: "queue",
            status: ZeStatus::INVALID_NULL_HANDLE,
        })
}

/// Name → address table of the C ABI functions, for the session's
/// definition generator.
pub fn host_symbols() -> HostSymbols {
    HostSymbols::new()
        .with("gpuCreateStream", gpu_create_stream as usize)
        .with("gpuStreamDestroy", gpu_stream_destroy as usize)
        .with("gpuModuleLoad", gpu_module_load as usize)
        .with("gpuModuleUnload", gpu_module_unload as usize)
}
