//! Peripheral capabilities consumed by the sensors and the sync client.
//!
//! The bus and converter drivers themselves live outside this crate; these
//! traits are the fixed surface the agent talks to. Two backends exist:
//! - `sysfs`: Linux kernel drivers (w1-therm, IIO ADC, LED class)
//! - `simulation`: in-memory peripherals for benches and tests

pub mod simulation;
pub mod sysfs;

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a peripheral driver.
#[derive(Debug, Error)]
pub enum HalError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid data from {source_name}: {detail}")]
    InvalidData { source_name: String, detail: String },

    #[error("device not present: {0}")]
    NotPresent(String),

    #[error("{0}")]
    Simulated(String),
}

impl HalError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(source_name: impl fmt::Display, detail: impl Into<String>) -> Self {
        Self::InvalidData {
            source_name: source_name.to_string(),
            detail: detail.into(),
        }
    }
}

/// ROM identifier of a one-wire device, in kernel notation (`28-0316a2795eff`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RomId(pub String);

impl RomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One-wire bus with DS18-family temperature probes.
#[async_trait]
pub trait OneWireBus: Send {
    /// Enumerate probes on the bus.
    async fn scan(&mut self) -> Result<Vec<RomId>, HalError>;

    /// Start a temperature conversion on every probe at once.
    ///
    /// Results are only valid after the conversion time has elapsed.
    async fn convert(&mut self) -> Result<(), HalError>;

    /// Read the last converted temperature of one probe, in Celsius.
    async fn read_celsius(&mut self, rom: &RomId) -> Result<f64, HalError>;
}

/// A single analog input.
#[async_trait]
pub trait AdcChannel: Send {
    async fn read_raw(&mut self) -> Result<u16, HalError>;
}

/// Binary output driving the onboard indicator LED.
#[async_trait]
pub trait Indicator: Send {
    async fn set(&mut self, on: bool) -> Result<(), HalError>;
}
