//! Host driver configuration: CLI arguments merged with the environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::device::{BuildOptions, DeviceType};

/// Selects the device driver when `--driver` is absent.
pub const DRIVER_ENV: &str = "ZEJIT_DRIVER";

pub const DEFAULT_IR_PATH: &str = "main.ll";
pub const DEFAULT_ENTRY: &str = "vadd_entry";
pub const MAIN_DYLIB: &str = "<main>";

/// Which [`DriverApi`](crate::device::DriverApi) backs the runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriverKind {
    #[default]
    LevelZero,
    Reference,
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "level-zero" | "levelzero" | "l0" => Ok(DriverKind::LevelZero),
            "reference" | "ref" => Ok(DriverKind::Reference),
            other => Err(format!(
                "unknown driver '{}' (expected 'level-zero' or 'reference')",
                other
            )),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::LevelZero => f.write_str("level-zero"),
            DriverKind::Reference => f.write_str("reference"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    pub payload_path: PathBuf,
    pub ir_path: PathBuf,
    pub entry: String,
    pub build: BuildOptions,
    pub driver: DriverKind,
    pub device_type: DeviceType,
}

impl BridgeConfig {
    /// Defaults for everything but the payload path.
    pub fn new(payload_path: impl Into<PathBuf>) -> Self {
        Self {
            payload_path: payload_path.into(),
            ir_path: PathBuf::from(DEFAULT_IR_PATH),
            entry: DEFAULT_ENTRY.to_string(),
            build: BuildOptions::Default,
            driver: DriverKind::LevelZero,
            device_type: DeviceType::Gpu,
        }
    }

    /// Fill the environment-derived fields from `lookup`. Called once by the
    /// composition root; nothing downstream reads the environment.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.build = BuildOptions::from_lookup(&lookup);
        if let Some(driver) = lookup(DRIVER_ENV) {
            self.driver = driver.parse()?;
        }
        Ok(self)
    }

    pub fn with_ir_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ir_path = path.into();
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    pub fn with_driver(mut self, driver: DriverKind) -> Self {
        self.driver = driver;
        self
    }
}

/// Process environment as a lookup function.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var_os(key).map(|v| v.to_string_lossy().into_owned())
}
