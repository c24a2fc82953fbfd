//! Device side: the Level Zero driver seam, queue and module lifecycles.

pub mod api;
pub mod error;
pub mod level_zero;
pub mod module;
pub mod options;
pub mod queue;
pub mod reference;

pub use api::{DeviceType, DriverApi, ZeStatus};
pub use error::{DeviceError, DeviceResult, ErrorClass};
pub use level_zero::LevelZero;
pub use module::{load_module, DeviceModule};
pub use options::BuildOptions;
pub use queue::{DeviceQueue, QueueState};
pub use reference::ReferenceDriver;
