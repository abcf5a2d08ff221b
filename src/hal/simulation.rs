//! In-memory peripherals.
//!
//! Used by `SENSOR_BACKEND=simulated` / `WIFI_BACKEND=simulated` on a bench
//! without probes, and by the unit tests. Shared handles (`Arc<Atomic*>`) let
//! a test observe or flip state after the peripheral has been boxed.

use super::{AdcChannel, HalError, Indicator, OneWireBus, RomId};
use crate::network::{LinkError, Radio};
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub struct SimulatedOneWire {
    probes: Vec<(RomId, f64)>,
    broken: Vec<RomId>,
    failing_conversions: u32,
    conversions: Arc<AtomicU32>,
}

impl SimulatedOneWire {
    pub fn new(probes: Vec<(RomId, f64)>) -> Self {
        Self {
            probes,
            broken: Vec::new(),
            failing_conversions: 0,
            conversions: Arc::new(AtomicU32::new(0)),
        }
    }

    /// The next `count` conversions fail.
    pub fn with_failing_conversions(mut self, count: u32) -> Self {
        self.failing_conversions = count;
        self
    }

    /// This probe is enumerated but never answers a read.
    pub fn with_broken_probe(mut self, rom: RomId) -> Self {
        self.broken.push(rom);
        self
    }

    /// Successful conversions so far.
    pub fn conversion_counter(&self) -> Arc<AtomicU32> {
        self.conversions.clone()
    }
}

#[async_trait]
impl OneWireBus for SimulatedOneWire {
    async fn scan(&mut self) -> Result<Vec<RomId>, HalError> {
        let mut roms: Vec<RomId> = self.probes.iter().map(|(rom, _)| rom.clone()).collect();
        roms.sort();
        Ok(roms)
    }

    async fn convert(&mut self) -> Result<(), HalError> {
        if self.failing_conversions > 0 {
            self.failing_conversions -= 1;
            return Err(HalError::Simulated("conversion did not start".into()));
        }
        self.conversions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_celsius(&mut self, rom: &RomId) -> Result<f64, HalError> {
        if self.broken.contains(rom) {
            return Err(HalError::Simulated(format!("probe {rom} did not answer")));
        }
        self.probes
            .iter()
            .find(|(id, _)| id == rom)
            .map(|(_, celsius)| *celsius)
            .ok_or_else(|| HalError::NotPresent(rom.to_string()))
    }
}

/// Analog input replaying a fixed cycle of counts.
pub struct SimulatedAdc {
    values: Vec<u16>,
    next: usize,
}

impl SimulatedAdc {
    pub fn constant(value: u16) -> Self {
        Self::sequence(vec![value])
    }

    /// Values are returned in order and wrap around.
    pub fn sequence(values: Vec<u16>) -> Self {
        Self { values, next: 0 }
    }

    /// Every read fails.
    pub fn failing() -> Self {
        Self::sequence(Vec::new())
    }
}

#[async_trait]
impl AdcChannel for SimulatedAdc {
    async fn read_raw(&mut self) -> Result<u16, HalError> {
        if self.values.is_empty() {
            return Err(HalError::Simulated("adc not responding".into()));
        }
        let value = self.values[self.next % self.values.len()];
        self.next = self.next.wrapping_add(1);
        Ok(value)
    }
}

#[derive(Default)]
pub struct SimulatedIndicator {
    lit: Arc<AtomicBool>,
    writes: Arc<AtomicU32>,
    failing: bool,
}

impl SimulatedIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn lit_handle(&self) -> Arc<AtomicBool> {
        self.lit.clone()
    }

    /// Number of writes that reached the output.
    pub fn write_counter(&self) -> Arc<AtomicU32> {
        self.writes.clone()
    }
}

#[async_trait]
impl Indicator for SimulatedIndicator {
    async fn set(&mut self, on: bool) -> Result<(), HalError> {
        if self.failing {
            return Err(HalError::Simulated("indicator output stuck".into()));
        }
        self.lit.store(on, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!("[Sensor] Simulated indicator {}", if on { "on" } else { "off" });
        Ok(())
    }
}

/// Station radio that refuses the first `failures` associations.
pub struct SimulatedRadio {
    active: Arc<AtomicBool>,
    associated: Arc<AtomicBool>,
    remaining_failures: u32,
}

impl SimulatedRadio {
    pub fn new(failures: u32) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
            associated: Arc::new(AtomicBool::new(false)),
            remaining_failures: failures,
        }
    }

    /// Start with the interface down.
    pub fn inactive(self) -> Self {
        self.active.store(false, Ordering::SeqCst);
        self
    }

    pub fn active_handle(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    /// Clearing this simulates the access point dropping the station.
    pub fn association_handle(&self) -> Arc<AtomicBool> {
        self.associated.clone()
    }
}

#[async_trait]
impl Radio for SimulatedRadio {
    async fn is_active(&mut self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn activate(&mut self) -> Result<(), LinkError> {
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn associate(&mut self, ssid: &str, _password: Option<&str>) -> Result<(), LinkError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(LinkError::RadioUnavailable("interface is down".into()));
        }
        if self.remaining_failures > 0 {
            self.remaining_failures -= 1;
            return Err(LinkError::Association {
                ssid: ssid.to_string(),
                reason: "no response from access point".into(),
            });
        }
        self.associated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_associated(&mut self) -> bool {
        self.associated.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_adc_sequence_wraps() {
        let mut adc = SimulatedAdc::sequence(vec![1, 2]);
        assert_eq!(adc.read_raw().await.unwrap(), 1);
        assert_eq!(adc.read_raw().await.unwrap(), 2);
        assert_eq!(adc.read_raw().await.unwrap(), 1);
        assert!(SimulatedAdc::failing().read_raw().await.is_err());
    }

    #[tokio::test]
    async fn test_radio_needs_activation() {
        let mut radio = SimulatedRadio::new(0).inactive();
        assert!(radio.associate("lab", None).await.is_err());
        radio.activate().await.unwrap();
        radio.associate("lab", None).await.unwrap();
        assert!(radio.is_associated().await);
    }
}
