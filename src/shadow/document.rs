//! Shadow documents and topics.
//!
//! Outbound reports nest everything under `state.reported`; inbound deltas
//! only carry `state.led.onboard`, everything else in them is ignored.

use super::SyncError;
use crate::config::DeviceConfig;
use crate::sensors::{Channel, SensorSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub client_id: String,
    pub hardware_model: String,
    pub firmware_version: String,
}

impl From<&DeviceConfig> for DeviceIdentity {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            hardware_model: config.hardware_model.clone(),
            firmware_version: config.firmware_version.clone(),
        }
    }
}

/// Locally applied actuator state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuatorState {
    pub onboard_indicator: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowReport {
    pub device: DeviceIdentity,
    pub uptime_ms: u64,
    pub sensors: BTreeMap<Channel, f64>,
    pub actuator: ActuatorState,
}

impl ShadowReport {
    pub fn new(
        device: DeviceIdentity,
        uptime_ms: u64,
        snapshot: &SensorSnapshot,
        actuator: ActuatorState,
    ) -> Self {
        let sensors = snapshot
            .readings()
            .map(|reading| (reading.channel, reading.value))
            .collect();
        Self {
            device,
            uptime_ms,
            sensors,
            actuator,
        }
    }

    pub fn to_document(&self) -> ReportDocument<'_> {
        let value = |channel| self.sensors.get(&channel).copied();
        ReportDocument {
            state: ReportedState {
                reported: Reported {
                    device: ReportedDevice {
                        client: &self.device.client_id,
                        uptime: self.uptime_ms,
                        hardware: &self.device.hardware_model,
                        firmware: &self.device.firmware_version,
                    },
                    sensors: ReportedSensors {
                        temperature: value(Channel::Temperature),
                        turbidity: value(Channel::Turbidity).map(|raw| raw.round() as i64),
                        ph: value(Channel::Ph),
                        tds: value(Channel::Tds),
                    },
                    led: ReportedLed {
                        onboard: u8::from(self.actuator.onboard_indicator),
                    },
                },
            },
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(&self.to_document()).map_err(SyncError::Malformed)
    }
}

#[derive(Debug, Serialize)]
pub struct ReportDocument<'a> {
    state: ReportedState<'a>,
}

#[derive(Debug, Serialize)]
struct ReportedState<'a> {
    reported: Reported<'a>,
}

#[derive(Debug, Serialize)]
struct Reported<'a> {
    device: ReportedDevice<'a>,
    sensors: ReportedSensors,
    led: ReportedLed,
}

#[derive(Debug, Serialize)]
struct ReportedDevice<'a> {
    client: &'a str,
    uptime: u64,
    hardware: &'a str,
    firmware: &'a str,
}

/// A channel that failed this cycle is left out.
#[derive(Debug, Serialize)]
struct ReportedSensors {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    turbidity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ph: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tds: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ReportedLed {
    onboard: u8,
}

/// Parsed inbound delta. `onboard_indicator` is `None` when the message
/// carried no usable LED instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShadowDelta {
    pub onboard_indicator: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DeltaDocument {
    #[serde(default)]
    state: Option<DeltaState>,
}

#[derive(Debug, Deserialize)]
struct DeltaState {
    #[serde(default)]
    led: Option<DeltaLed>,
}

#[derive(Debug, Deserialize)]
struct DeltaLed {
    #[serde(default)]
    onboard: Option<serde_json::Value>,
}

impl ShadowDelta {
    /// Parse a delta payload. Fails only if the payload is not a JSON
    /// document of the expected shape; unknown fields are ignored.
    pub fn parse(payload: &[u8]) -> Result<Self, SyncError> {
        let document: DeltaDocument =
            serde_json::from_slice(payload).map_err(SyncError::Malformed)?;
        let onboard_indicator = document
            .state
            .and_then(|state| state.led)
            .and_then(|led| led.onboard)
            .and_then(|value| switch_value(&value));
        Ok(Self { onboard_indicator })
    }

    pub fn is_relevant(&self) -> bool {
        self.onboard_indicator.is_some()
    }
}

/// `0`/`1` as sent by the console, booleans as sent by most tooling.
fn switch_value(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(on) => Some(*on),
        serde_json::Value::Number(n) => match n.as_u64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

/// Update and delta topics for one thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopics {
    pub update: String,
    pub delta: String,
}

impl ShadowTopics {
    pub fn new(prefix: &str, thing_name: &str) -> Self {
        let update = format!("{}/things/{}/shadow/update", prefix.trim_end_matches('/'), thing_name);
        let delta = format!("{update}/delta");
        Self { update, delta }
    }
}
