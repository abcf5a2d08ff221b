use super::{Channel, Sensor, SensorError, SensorReading};
use log::warn;
use std::collections::BTreeMap;

/// Result of one poll: a value per channel that answered, an error per
/// channel that did not.
#[derive(Debug, Default)]
pub struct SensorSnapshot {
    readings: BTreeMap<Channel, SensorReading>,
    failures: BTreeMap<Channel, SensorError>,
}

impl SensorSnapshot {
    pub fn get(&self, channel: Channel) -> Option<&SensorReading> {
        self.readings.get(&channel)
    }

    pub fn value(&self, channel: Channel) -> Option<f64> {
        self.get(channel).map(|r| r.value)
    }

    pub fn readings(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.values()
    }

    pub fn failures(&self) -> &BTreeMap<Channel, SensorError> {
        &self.failures
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn insert(&mut self, reading: SensorReading) {
        self.readings.insert(reading.channel, reading);
    }
}

/// All installed sensors, polled in installation order.
#[derive(Default)]
pub struct SensorArray {
    sensors: Vec<Sensor>,
}

impl SensorArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sensor: impl Into<Sensor>) -> Self {
        self.push(sensor);
        self
    }

    pub fn push(&mut self, sensor: impl Into<Sensor>) {
        self.sensors.push(sensor.into());
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.sensors.iter().map(Sensor::channel).collect()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Read every sensor once. A failing channel is recorded and the rest are
    /// still read.
    pub async fn poll(&mut self) -> SensorSnapshot {
        let mut snapshot = SensorSnapshot::default();
        for sensor in &mut self.sensors {
            let channel = sensor.channel();
            match sensor.read().await {
                Ok(reading) => snapshot.insert(reading),
                Err(e) => {
                    warn!("[Sensor] {} read failed: {}", channel, e);
                    snapshot.failures.insert(channel, e);
                }
            }
        }
        snapshot
    }
}
