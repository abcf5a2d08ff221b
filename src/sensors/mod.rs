//! Water-quality sensors.
//!
//! The set of sensor kinds is closed, so a `Sensor` is a tagged enum and
//! `read()` dispatches with a `match`. Each variant owns its peripheral handle
//! and applies its own unit conversion.

pub mod analog;
pub mod array;
pub mod temperature;

use crate::hal::HalError;
use std::time::Instant;
use strum::{Display, EnumIter, IntoStaticStr};
use thiserror::Error;

pub use analog::{PhSensor, TdsCalibration, TdsSensor, TurbiditySensor};
pub use array::{SensorArray, SensorSnapshot};
pub use temperature::{ProbeReading, TemperatureSensor, celsius_to_fahrenheit};

/// Measurement channel. The string form is the key used in the shadow report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Channel {
    Temperature,
    Turbidity,
    Ph,
    Tds,
}

/// One sample from one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub channel: Channel,
    pub value: f64,
    pub unit: &'static str,
    pub timestamp: Instant,
}

impl SensorReading {
    pub fn new(channel: Channel, value: f64, unit: &'static str) -> Self {
        Self {
            channel,
            value,
            unit,
            timestamp: Instant::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("{channel} peripheral error: {source}")]
    Peripheral {
        channel: Channel,
        #[source]
        source: HalError,
    },

    #[error("no temperature probe found on the one-wire bus")]
    NoProbe,

    #[error("{channel} produced an unusable value: {value}")]
    OutOfRange { channel: Channel, value: f64 },
}

impl SensorError {
    pub(crate) fn peripheral(channel: Channel) -> impl FnOnce(HalError) -> Self {
        move |source| Self::Peripheral { channel, source }
    }
}

pub enum Sensor {
    Temperature(TemperatureSensor),
    Turbidity(TurbiditySensor),
    Ph(PhSensor),
    Tds(TdsSensor),
}

impl Sensor {
    pub fn channel(&self) -> Channel {
        match self {
            Sensor::Temperature(_) => Channel::Temperature,
            Sensor::Turbidity(_) => Channel::Turbidity,
            Sensor::Ph(_) => Channel::Ph,
            Sensor::Tds(_) => Channel::Tds,
        }
    }

    pub async fn read(&mut self) -> Result<SensorReading, SensorError> {
        match self {
            Sensor::Temperature(sensor) => sensor.read().await,
            Sensor::Turbidity(sensor) => sensor.read().await,
            Sensor::Ph(sensor) => sensor.read().await,
            Sensor::Tds(sensor) => sensor.read().await,
        }
    }
}

impl From<TemperatureSensor> for Sensor {
    fn from(sensor: TemperatureSensor) -> Self {
        Sensor::Temperature(sensor)
    }
}

impl From<TurbiditySensor> for Sensor {
    fn from(sensor: TurbiditySensor) -> Self {
        Sensor::Turbidity(sensor)
    }
}

impl From<PhSensor> for Sensor {
    fn from(sensor: PhSensor) -> Self {
        Sensor::Ph(sensor)
    }
}

impl From<TdsSensor> for Sensor {
    fn from(sensor: TdsSensor) -> Self {
        Sensor::Tds(sensor)
    }
}
