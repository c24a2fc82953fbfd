use thiserror::Error;

use super::api::{DeviceType, ZeResult, ZeStatus};

/// Whether retrying the failed operation can succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient: not ready, out of memory, low power, handle busy.
    Retryable,
    /// Retrying gives the same answer.
    Structural,
}

#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("{op} failed: {status}")]
    Driver { op: &'static str, status: ZeStatus },

    #[error("no {0} device found")]
    NoMatchingDevice(DeviceType),

    #[error("device '{device}' has no compute queue group")]
    NoComputeQueueGroup { device: String },

    #[error("module build failed: {status}")]
    BuildFailed { status: ZeStatus, log: String },

    #[error("kernel payload is empty")]
    EmptyPayload,

    #[error("build flags contain a NUL byte")]
    InvalidBuildFlags,

    #[error("Level Zero loader unavailable: {0}")]
    LoaderUnavailable(String),
}

impl DeviceError {
    pub fn status(&self) -> Option<ZeStatus> {
        match self {
            DeviceError::Driver { status, .. } | DeviceError::BuildFailed { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self.status() {
            Some(
                ZeStatus::NOT_READY
                | ZeStatus::OUT_OF_HOST_MEMORY
                | ZeStatus::OUT_OF_DEVICE_MEMORY
                | ZeStatus::DEVICE_IN_LOW_POWER_STATE
                | ZeStatus::HANDLE_OBJECT_IN_USE,
            ) if !matches!(self, DeviceError::BuildFailed { .. }) => ErrorClass::Retryable,
            _ => ErrorClass::Structural,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Attach the name of the failing driver call to a raw status.
pub(crate) trait ZeCall<T> {
    fn during(self, op: &'static str) -> DeviceResult<T>;
}

impl<T> ZeCall<T> for ZeResult<T> {
    fn during(self, op: &'static str) -> DeviceResult<T> {
        self.map_err(|status| DeviceError::Driver { op, status })
    }
}
