//! DS18-family water temperature probes on a one-wire bus.
//!
//! A read triggers one bulk conversion, waits the fixed settling time, then
//! collects every probe. Values are reported in Fahrenheit; the first probe
//! (lowest ROM id) is the canonical channel value.

use super::{Channel, SensorError, SensorReading};
use crate::config::MIN_TEMPERATURE_SETTLE_MS;
use crate::hal::{OneWireBus, RomId};
use log::{info, warn};
use std::time::Duration;

pub const FAHRENHEIT: &str = "°F";

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

#[derive(Debug, Clone)]
pub struct ProbeReading {
    pub rom: RomId,
    pub celsius: f64,
    pub reading: SensorReading,
}

pub struct TemperatureSensor {
    bus: Box<dyn OneWireBus>,
    roms: Vec<RomId>,
    settle: Duration,
}

impl TemperatureSensor {
    /// `settle` is raised to the DS18 conversion time if shorter.
    pub fn new(bus: Box<dyn OneWireBus>, settle: Duration) -> Self {
        Self {
            bus,
            roms: Vec::new(),
            settle: settle.max(Duration::from_millis(MIN_TEMPERATURE_SETTLE_MS)),
        }
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    async fn ensure_scanned(&mut self) -> Result<(), SensorError> {
        if self.roms.is_empty() {
            self.roms = self
                .bus
                .scan()
                .await
                .map_err(SensorError::peripheral(Channel::Temperature))?;
            if !self.roms.is_empty() {
                info!("[Sensor] Found {} temperature probe(s)", self.roms.len());
            }
        }
        if self.roms.is_empty() {
            return Err(SensorError::NoProbe);
        }
        Ok(())
    }

    /// Convert and read every probe on the bus.
    ///
    /// A single probe failing is logged and skipped; the call only fails when
    /// no probe produced a value.
    pub async fn read_probes(&mut self) -> Result<Vec<ProbeReading>, SensorError> {
        self.ensure_scanned().await?;

        self.bus
            .convert()
            .await
            .map_err(SensorError::peripheral(Channel::Temperature))?;
        tokio::time::sleep(self.settle).await;

        let mut probes = Vec::with_capacity(self.roms.len());
        let mut first_error = None;
        for rom in &self.roms {
            match self.bus.read_celsius(rom).await {
                Ok(celsius) => {
                    let fahrenheit = celsius_to_fahrenheit(celsius);
                    info!("[Sensor] Temperature {}: {:.2}{}", rom, fahrenheit, FAHRENHEIT);
                    probes.push(ProbeReading {
                        rom: rom.clone(),
                        celsius,
                        reading: SensorReading::new(Channel::Temperature, fahrenheit, FAHRENHEIT),
                    });
                }
                Err(e) => {
                    warn!("[Sensor] Temperature probe {} failed: {}", rom, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match (probes.is_empty(), first_error) {
            (true, Some(e)) => {
                // Probes may have been swapped; rescan next time
                self.roms.clear();
                Err(SensorError::Peripheral {
                    channel: Channel::Temperature,
                    source: e,
                })
            }
            _ => Ok(probes),
        }
    }

    /// Canonical temperature: the first probe that answered.
    pub async fn read(&mut self) -> Result<SensorReading, SensorError> {
        let mut probes = self.read_probes().await?;
        if probes.is_empty() {
            return Err(SensorError::NoProbe);
        }
        Ok(probes.swap_remove(0).reading)
    }
}
