//! ADC-backed channels: turbidity, pH and total dissolved solids.

use super::{Channel, SensorError, SensorReading};
use crate::config::{TdsConfig, TdsMode};
use crate::hal::AdcChannel;
use log::debug;
use std::time::Duration;

pub const RAW: &str = "raw";
pub const PH: &str = "pH";
pub const PPM: &str = "ppm";

/// Spacing between TDS samples in calibrated mode.
const TDS_SAMPLE_SPACING: Duration = Duration::from_millis(40);

/// Turbidity is reported as the raw converter count.
pub struct TurbiditySensor {
    adc: Box<dyn AdcChannel>,
}

impl TurbiditySensor {
    pub fn new(adc: Box<dyn AdcChannel>) -> Self {
        Self { adc }
    }

    pub async fn read(&mut self) -> Result<SensorReading, SensorError> {
        let raw = self
            .adc
            .read_raw()
            .await
            .map_err(SensorError::peripheral(Channel::Turbidity))?;
        Ok(SensorReading::new(Channel::Turbidity, f64::from(raw), RAW))
    }
}

/// pH as a linear scaling of the raw count.
pub struct PhSensor {
    adc: Box<dyn AdcChannel>,
    scale: f64,
}

impl PhSensor {
    pub fn new(adc: Box<dyn AdcChannel>, scale: f64) -> Self {
        Self { adc, scale }
    }

    pub async fn read(&mut self) -> Result<SensorReading, SensorError> {
        let raw = self
            .adc
            .read_raw()
            .await
            .map_err(SensorError::peripheral(Channel::Ph))?;
        let value = f64::from(raw) * self.scale;
        if !value.is_finite() {
            return Err(SensorError::OutOfRange {
                channel: Channel::Ph,
                value,
            });
        }
        Ok(SensorReading::new(Channel::Ph, value, PH))
    }
}

/// Parameters for converting a TDS probe voltage into ppm.
#[derive(Debug, Clone, PartialEq)]
pub struct TdsCalibration {
    pub samples: usize,
    pub vref: f64,
    pub adc_max: f64,
    /// Water temperature used for compensation, in Celsius.
    pub temperature_c: f64,
}

impl From<&TdsConfig> for TdsCalibration {
    fn from(config: &TdsConfig) -> Self {
        Self {
            samples: config.samples.max(1),
            vref: config.vref,
            adc_max: config.adc_max,
            temperature_c: config.reference_temp_c,
        }
    }
}

impl TdsCalibration {
    /// Median count to ppm, temperature compensated to 25 °C.
    pub fn ppm(&self, median_raw: f64) -> f64 {
        let voltage = median_raw * self.vref / self.adc_max;
        let coefficient = 1.0 + 0.02 * (self.temperature_c - 25.0);
        let v = voltage / coefficient;
        (133.42 * v.powi(3) - 255.86 * v.powi(2) + 857.39 * v) * 0.5
    }
}

pub struct TdsSensor {
    adc: Box<dyn AdcChannel>,
    calibration: Option<TdsCalibration>,
}

impl TdsSensor {
    /// Single raw sample per read.
    pub fn raw(adc: Box<dyn AdcChannel>) -> Self {
        Self {
            adc,
            calibration: None,
        }
    }

    /// Median-filtered, temperature-compensated ppm.
    pub fn calibrated(adc: Box<dyn AdcChannel>, calibration: TdsCalibration) -> Self {
        Self {
            adc,
            calibration: Some(calibration),
        }
    }

    pub fn from_config(adc: Box<dyn AdcChannel>, config: &TdsConfig) -> Self {
        match config.mode {
            TdsMode::Raw => Self::raw(adc),
            TdsMode::Calibrated => Self::calibrated(adc, TdsCalibration::from(config)),
        }
    }

    async fn sample(&mut self) -> Result<u16, SensorError> {
        self.adc
            .read_raw()
            .await
            .map_err(SensorError::peripheral(Channel::Tds))
    }

    pub async fn read(&mut self) -> Result<SensorReading, SensorError> {
        let Some(calibration) = self.calibration.clone() else {
            let raw = self.sample().await?;
            return Ok(SensorReading::new(Channel::Tds, f64::from(raw), RAW));
        };

        let mut samples = Vec::with_capacity(calibration.samples);
        for i in 0..calibration.samples {
            if i > 0 {
                tokio::time::sleep(TDS_SAMPLE_SPACING).await;
            }
            samples.push(self.sample().await?);
        }
        let median = median(&mut samples);
        let ppm = calibration.ppm(median);
        debug!("[Sensor] TDS median {} -> {:.1} ppm", median, ppm);
        Ok(SensorReading::new(Channel::Tds, ppm, PPM))
    }
}

fn median(samples: &mut [u16]) -> f64 {
    samples.sort_unstable();
    let mid = samples.len() / 2;
    if samples.is_empty() {
        0.0
    } else if samples.len() % 2 == 0 {
        (f64::from(samples[mid - 1]) + f64::from(samples[mid])) / 2.0
    } else {
        f64::from(samples[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::simulation::SimulatedAdc;

    fn calibration(samples: usize) -> TdsCalibration {
        TdsCalibration {
            samples,
            vref: 3.3,
            adc_max: 4095.0,
            temperature_c: 25.0,
        }
    }

    #[tokio::test]
    async fn test_turbidity_is_raw() {
        let mut sensor = TurbiditySensor::new(Box::new(SimulatedAdc::constant(1234)));
        let reading = sensor.read().await.unwrap();
        assert_eq!(reading.channel, Channel::Turbidity);
        assert_eq!(reading.value, 1234.0);
        assert_eq!(reading.unit, RAW);
    }

    #[tokio::test]
    async fn test_ph_scaling() {
        let mut sensor = PhSensor::new(Box::new(SimulatedAdc::constant(4095)), 14.0 / 4095.0);
        let reading = sensor.read().await.unwrap();
        assert!((reading.value - 14.0).abs() < 1e-9);
        assert_eq!(reading.unit, PH);

        let mut sensor = PhSensor::new(Box::new(SimulatedAdc::constant(0)), 14.0 / 4095.0);
        assert_eq!(sensor.read().await.unwrap().value, 0.0);
    }

    #[tokio::test]
    async fn test_adc_failure_names_channel() {
        let mut sensor = PhSensor::new(Box::new(SimulatedAdc::failing()), 1.0);
        assert!(matches!(
            sensor.read().await,
            Err(SensorError::Peripheral {
                channel: Channel::Ph,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_tds_raw_mode() {
        let mut sensor = TdsSensor::raw(Box::new(SimulatedAdc::constant(512)));
        let reading = sensor.read().await.unwrap();
        assert_eq!(reading.value, 512.0);
        assert_eq!(reading.unit, RAW);
    }

    #[test]
    fn test_tds_curve() {
        let cal = calibration(1);
        assert_eq!(cal.ppm(0.0), 0.0);

        // 1.0 V at 25 °C
        let one_volt = 4095.0 / 3.3;
        let expected = (133.42 - 255.86 + 857.39) * 0.5;
        assert!((cal.ppm(one_volt) - expected).abs() < 1e-6);

        // Warmer water conducts more, so the same voltage means fewer solids
        let warm = TdsCalibration {
            temperature_c: 30.0,
            ..cal.clone()
        };
        assert!(warm.ppm(one_volt) < cal.ppm(one_volt));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tds_calibrated_uses_median() {
        // One spike must not move the result
        let adc = SimulatedAdc::sequence(vec![1241, 4095, 1241, 1240, 1242]);
        let mut sensor = TdsSensor::calibrated(Box::new(adc), calibration(5));
        let reading = sensor.read().await.unwrap();

        assert_eq!(reading.unit, PPM);
        assert!((reading.value - calibration(5).ppm(1241.0)).abs() < 1e-9);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&mut [3, 1, 2]), 2.0);
        assert_eq!(median(&mut [4, 1, 3, 2]), 2.5);
        assert_eq!(median(&mut []), 0.0);
    }
}
