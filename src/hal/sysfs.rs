//! Linux sysfs peripheral backends.
//!
//! - One-wire: w1-therm driver. A bulk conversion is triggered through
//!   `w1_bus_master1/therm_bulk_read`; each probe then exposes its result in
//!   `<rom>/temperature` (millidegrees), or in `<rom>/w1_slave` on older kernels.
//! - ADC: IIO `in_voltageN_raw` attribute.
//! - Indicator: LED class `brightness` attribute.

use super::{AdcChannel, HalError, Indicator, OneWireBus, RomId};
use async_trait::async_trait;
use log::debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One-wire family codes of DS18-style temperature probes.
const THERMOMETER_FAMILIES: [&str; 5] = ["10-", "22-", "28-", "3b-", "42-"];

/// Power-on reset value of a DS18B20 scratchpad: conversion never ran.
const POWER_ON_RESET_MILLIDEGREES: i64 = 85_000;

pub struct SysfsOneWire {
    root: PathBuf,
    master: String,
}

impl SysfsOneWire {
    /// `root` is usually `/sys/bus/w1/devices`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            master: "w1_bus_master1".to_string(),
        }
    }

    fn probe_dir(&self, rom: &RomId) -> PathBuf {
        self.root.join(rom.as_str())
    }
}

#[async_trait]
impl OneWireBus for SysfsOneWire {
    async fn scan(&mut self) -> Result<Vec<RomId>, HalError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| HalError::io(&self.root, e))?;

        let mut roms = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HalError::io(&self.root, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if THERMOMETER_FAMILIES.iter().any(|f| name.starts_with(f)) {
                roms.push(RomId(name));
            }
        }
        roms.sort();
        Ok(roms)
    }

    async fn convert(&mut self) -> Result<(), HalError> {
        let trigger = self.root.join(&self.master).join("therm_bulk_read");
        match tokio::fs::write(&trigger, b"trigger\n").await {
            Ok(()) => Ok(()),
            // Older w1-therm has no bulk trigger; reading w1_slave converts
            Err(e) if matches!(
                e.kind(),
                ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::IsADirectory
            ) =>
            {
                debug!(
                    "[Sensor] No bulk conversion at {} ({}), probes convert on read",
                    trigger.display(),
                    e
                );
                Ok(())
            }
            Err(e) => Err(HalError::io(&trigger, e)),
        }
    }

    async fn read_celsius(&mut self, rom: &RomId) -> Result<f64, HalError> {
        let dir = self.probe_dir(rom);

        let temperature = dir.join("temperature");
        if let Ok(text) = tokio::fs::read_to_string(&temperature).await {
            let millidegrees: i64 = text
                .trim()
                .parse()
                .map_err(|_| HalError::invalid(rom, format!("temperature '{}'", text.trim())))?;
            return millidegrees_to_celsius(rom, millidegrees);
        }

        let slave = dir.join("w1_slave");
        let text = tokio::fs::read_to_string(&slave)
            .await
            .map_err(|e| HalError::io(&slave, e))?;
        parse_w1_slave(rom, &text)
    }
}

fn millidegrees_to_celsius(rom: &RomId, millidegrees: i64) -> Result<f64, HalError> {
    if millidegrees == POWER_ON_RESET_MILLIDEGREES {
        return Err(HalError::invalid(rom, "power-on reset value, conversion not finished"));
    }
    Ok(millidegrees as f64 / 1000.0)
}

/// Parse the two-line `w1_slave` dump: CRC verdict, then `t=<millidegrees>`.
fn parse_w1_slave(rom: &RomId, text: &str) -> Result<f64, HalError> {
    let mut lines = text.lines();
    let crc_line = lines
        .next()
        .ok_or_else(|| HalError::invalid(rom, "empty w1_slave"))?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(HalError::invalid(rom, "CRC check failed"));
    }

    let value = lines
        .next()
        .and_then(|line| line.rsplit_once("t="))
        .map(|(_, v)| v.trim())
        .ok_or_else(|| HalError::invalid(rom, "missing t= field"))?;
    let millidegrees: i64 = value
        .parse()
        .map_err(|_| HalError::invalid(rom, format!("t={value}")))?;
    millidegrees_to_celsius(rom, millidegrees)
}

/// IIO ADC channel (`/sys/bus/iio/devices/iio:deviceN/in_voltageM_raw`).
pub struct SysfsAdc {
    path: PathBuf,
}

impl SysfsAdc {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AdcChannel for SysfsAdc {
    async fn read_raw(&mut self) -> Result<u16, HalError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| HalError::io(&self.path, e))?;
        text.trim()
            .parse()
            .map_err(|_| HalError::invalid(self.path.display(), format!("raw '{}'", text.trim())))
    }
}

/// LED class device driving the onboard indicator.
pub struct SysfsLed {
    brightness: PathBuf,
}

impl SysfsLed {
    /// `name` is the directory under `/sys/class/leds`.
    pub fn new(name: &str) -> Self {
        Self::at(Path::new("/sys/class/leds").join(name).join("brightness"))
    }

    pub fn at(brightness: impl Into<PathBuf>) -> Self {
        Self {
            brightness: brightness.into(),
        }
    }
}

#[async_trait]
impl Indicator for SysfsLed {
    async fn set(&mut self, on: bool) -> Result<(), HalError> {
        let value: &[u8] = if on { b"1\n" } else { b"0\n" };
        tokio::fs::write(&self.brightness, value)
            .await
            .map_err(|e| HalError::io(&self.brightness, e))
    }
}
