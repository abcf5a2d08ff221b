use crate::error::{AgentError, Result};
use crate::shadow::TlsMaterial;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    load_dotenv_from(Path::new(".env"));
}

fn load_dotenv_from(env_path: &Path) {
    let Ok(content) = fs::read_to_string(env_path) else {
        return;
    };

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
                || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
            {
                value = &value[1..value.len() - 1];
            }

            // Real environment variables take precedence over .env
            if std::env::var(key).is_err() {
                // SAFETY: called from main before the runtime starts any other thread
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

/// Minimum one-wire DS18-family conversion time at 12-bit resolution.
pub const MIN_TEMPERATURE_SETTLE_MS: u64 = 750;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub wifi: WifiConfig,
    pub shadow: ShadowConfig,
    pub sensors: SensorsConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub client_id: String,
    pub hardware_model: String,
    pub firmware_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WifiBackend {
    /// `wpa_supplicant` through `wpa_cli`
    Wpa,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: String,
    /// `None` for a passwordless network
    pub password: Option<String>,
    pub interface: String,
    pub retry_interval_secs: u64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub backend: WifiBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowConfig {
    pub endpoint: String,
    pub port: u16,
    pub thing_name: String,
    pub topic_prefix: String,
    pub ca_path: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorBackend {
    Sysfs,
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TdsMode {
    /// Single raw ADC sample
    Raw,
    /// Median-filtered, temperature-compensated ppm
    Calibrated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TdsConfig {
    pub mode: TdsMode,
    pub samples: usize,
    pub vref: f64,
    pub adc_max: f64,
    pub reference_temp_c: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorsConfig {
    pub backend: SensorBackend,
    /// w1 sysfs root holding `w1_bus_master1` and the probe directories
    pub onewire_path: String,
    pub temperature_settle_ms: u64,
    pub turbidity_adc: String,
    pub ph_adc: String,
    /// Device-specific calibration factor applied to the raw pH sample
    pub ph_scale: f64,
    pub tds_adc: Option<String>,
    pub tds: TdsConfig,
    /// LED class name under /sys/class/leds
    pub indicator_led: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub poll_interval_secs: u64,
    pub startup_delay_secs: u64,
    /// IP-echo endpoint for the startup diagnostic; `None` disables it
    pub public_ip_url: Option<String>,
    pub instance_lock_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                client_id: "water-quality-monitor".to_string(),
                hardware_model: "ESP32-WROOM-32".to_string(),
                firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            wifi: WifiConfig {
                ssid: String::new(),
                password: None,
                interface: "wlan0".to_string(),
                retry_interval_secs: 3,
                max_attempts: None,
                backend: WifiBackend::Wpa,
            },
            shadow: ShadowConfig {
                endpoint: String::new(),
                port: 8883,
                thing_name: "water-quality-monitor".to_string(),
                topic_prefix: "$aws".to_string(),
                ca_path: None,
                cert_path: None,
                key_path: None,
                keep_alive_secs: 30,
                connect_timeout_secs: 10,
            },
            sensors: SensorsConfig {
                backend: SensorBackend::Sysfs,
                onewire_path: "/sys/bus/w1/devices".to_string(),
                temperature_settle_ms: MIN_TEMPERATURE_SETTLE_MS,
                turbidity_adc: "/sys/bus/iio/devices/iio:device0/in_voltage0_raw".to_string(),
                ph_adc: "/sys/bus/iio/devices/iio:device0/in_voltage1_raw".to_string(),
                ph_scale: 14.0 / 4095.0,
                tds_adc: None,
                tds: TdsConfig {
                    mode: TdsMode::Raw,
                    samples: 30,
                    vref: 3.3,
                    adc_max: 4095.0,
                    reference_temp_c: 25.0,
                },
                indicator_led: None,
            },
            agent: AgentConfig {
                poll_interval_secs: 10,
                startup_delay_secs: 10,
                public_ip_url: Some("https://api.ipify.org/?format=json".to_string()),
                instance_lock_name: "water-telemetry-agent".to_string(),
            },
        }
    }
}

/// Read an environment variable, treating an empty value as unset.
fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_value(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("[Config] Ignoring unparsable {}={}", key, raw);
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Device identity
        if let Some(id) = env_value("DEVICE_CLIENT_ID") {
            config.device.client_id = id;
        }
        if let Some(model) = env_value("DEVICE_HARDWARE") {
            config.device.hardware_model = model;
        }
        if let Some(fw) = env_value("DEVICE_FIRMWARE") {
            config.device.firmware_version = fw;
        }

        // Wireless network
        if let Some(ssid) = env_value("WIFI_SSID") {
            config.wifi.ssid = ssid;
        }
        config.wifi.password = env_value("WIFI_PASSWORD");
        if let Some(iface) = env_value("WIFI_INTERFACE") {
            config.wifi.interface = iface;
        }
        if let Some(secs) = env_parse("WIFI_RETRY_INTERVAL_SECS") {
            config.wifi.retry_interval_secs = secs;
        }
        if let Some(max) = env_parse::<u32>("WIFI_MAX_ATTEMPTS") {
            config.wifi.max_attempts = (max > 0).then_some(max);
        }
        if let Some(backend) = env_value("WIFI_BACKEND") {
            match backend.to_ascii_lowercase().as_str() {
                "wpa" => config.wifi.backend = WifiBackend::Wpa,
                "simulated" => config.wifi.backend = WifiBackend::Simulated,
                other => log::warn!("[Config] Unknown WIFI_BACKEND '{}'", other),
            }
        }

        // Shadow endpoint
        if let Some(endpoint) = env_value("SHADOW_ENDPOINT") {
            config.shadow.endpoint = endpoint;
        }
        if let Some(port) = env_parse("SHADOW_PORT") {
            config.shadow.port = port;
        }
        if let Some(thing) = env_value("SHADOW_THING_NAME") {
            config.shadow.thing_name = thing;
        }
        if let Some(prefix) = env_value("SHADOW_TOPIC_PREFIX") {
            config.shadow.topic_prefix = prefix;
        }
        config.shadow.ca_path = env_value("SHADOW_CA_PATH");
        config.shadow.cert_path = env_value("SHADOW_CERT_PATH");
        config.shadow.key_path = env_value("SHADOW_KEY_PATH");
        if let Some(secs) = env_parse("SHADOW_KEEP_ALIVE_SECS") {
            config.shadow.keep_alive_secs = secs;
        }
        if let Some(secs) = env_parse("SHADOW_CONNECT_TIMEOUT_SECS") {
            config.shadow.connect_timeout_secs = secs;
        }

        // Sensors
        if let Some(backend) = env_value("SENSOR_BACKEND") {
            match backend.to_ascii_lowercase().as_str() {
                "sysfs" => config.sensors.backend = SensorBackend::Sysfs,
                "simulated" => config.sensors.backend = SensorBackend::Simulated,
                other => log::warn!("[Config] Unknown SENSOR_BACKEND '{}'", other),
            }
        }
        if let Some(path) = env_value("ONEWIRE_PATH") {
            config.sensors.onewire_path = path;
        }
        if let Some(ms) = env_parse::<u64>("TEMPERATURE_SETTLE_MS") {
            config.sensors.temperature_settle_ms = ms.max(MIN_TEMPERATURE_SETTLE_MS);
        }
        if let Some(path) = env_value("TURBIDITY_ADC") {
            config.sensors.turbidity_adc = path;
        }
        if let Some(path) = env_value("PH_ADC") {
            config.sensors.ph_adc = path;
        }
        if let Some(scale) = env_parse("PH_SCALE") {
            config.sensors.ph_scale = scale;
        }
        config.sensors.tds_adc = env_value("TDS_ADC");
        if let Some(mode) = env_value("TDS_MODE") {
            match mode.to_ascii_lowercase().as_str() {
                "raw" => config.sensors.tds.mode = TdsMode::Raw,
                "calibrated" => config.sensors.tds.mode = TdsMode::Calibrated,
                other => log::warn!("[Config] Unknown TDS_MODE '{}'", other),
            }
        }
        if let Some(samples) = env_parse::<usize>("TDS_SAMPLES") {
            config.sensors.tds.samples = samples.max(1);
        }
        if let Some(vref) = env_parse("TDS_VREF") {
            config.sensors.tds.vref = vref;
        }
        if let Some(temp) = env_parse("TDS_REFERENCE_TEMP_C") {
            config.sensors.tds.reference_temp_c = temp;
        }
        config.sensors.indicator_led = env_value("INDICATOR_LED");

        // Agent cadence
        if let Some(secs) = env_parse("POLL_INTERVAL_SECS") {
            config.agent.poll_interval_secs = secs;
        }
        if let Some(secs) = env_parse("STARTUP_DELAY_SECS") {
            config.agent.startup_delay_secs = secs;
        }
        if let Ok(url) = std::env::var("PUBLIC_IP_URL") {
            config.agent.public_ip_url = (!url.trim().is_empty()).then_some(url);
        }
        if let Some(name) = env_value("INSTANCE_LOCK_NAME") {
            config.agent.instance_lock_name = name;
        }

        config
    }

    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.wifi.backend == WifiBackend::Wpa && self.wifi.ssid.is_empty() {
            return Err(AgentError::InvalidConfig("WIFI_SSID is required".into()));
        }
        if self.shadow.endpoint.is_empty() {
            return Err(AgentError::InvalidConfig(
                "SHADOW_ENDPOINT is required".into(),
            ));
        }
        if self.shadow.thing_name.is_empty() || self.shadow.thing_name.contains(['/', '+', '#'])
        {
            return Err(AgentError::InvalidConfig(format!(
                "invalid thing name '{}'",
                self.shadow.thing_name
            )));
        }
        if self.agent.poll_interval_secs == 0 {
            return Err(AgentError::InvalidConfig(
                "POLL_INTERVAL_SECS must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl ShadowConfig {
    /// Read CA, certificate and key into opaque blobs.
    ///
    /// Returns `None` when no paths are configured (plain TCP). Configuring only
    /// some of the three is an error.
    pub fn load_tls_material(&self) -> Result<Option<TlsMaterial>> {
        match (&self.ca_path, &self.cert_path, &self.key_path) {
            (None, None, None) => Ok(None),
            (Some(ca), Some(cert), Some(key)) => Ok(Some(TlsMaterial {
                ca: read_blob(ca)?,
                client_cert: read_blob(cert)?,
                client_key: read_blob(key)?,
            })),
            _ => Err(AgentError::InvalidConfig(
                "SHADOW_CA_PATH, SHADOW_CERT_PATH and SHADOW_KEY_PATH must be set together"
                    .into(),
            )),
        }
    }
}

fn read_blob(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| AgentError::CredentialRead {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.wifi.ssid = "lab".into();
        config.shadow.endpoint = "example-ats.iot.us-east-1.amazonaws.com".into();
        config
    }

    #[test]
    fn test_default_cadence() {
        let config = Config::default();
        assert_eq!(config.wifi.retry_interval_secs, 3);
        assert_eq!(config.wifi.max_attempts, None);
        assert_eq!(config.agent.poll_interval_secs, 10);
        assert_eq!(config.sensors.temperature_settle_ms, MIN_TEMPERATURE_SETTLE_MS);
        assert_eq!(config.sensors.tds.mode, TdsMode::Raw);
    }

    #[test]
    fn test_validate_requires_ssid_and_endpoint() {
        assert!(valid_config().validate().is_ok());

        let mut config = valid_config();
        config.wifi.ssid.clear();
        assert!(matches!(
            config.validate(),
            Err(AgentError::InvalidConfig(_))
        ));

        // The simulated radio does not need credentials
        config.wifi.backend = WifiBackend::Simulated;
        assert!(config.validate().is_ok());

        let mut config = valid_config();
        config.shadow.endpoint.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_wildcard_thing_name() {
        let mut config = valid_config();
        config.shadow.thing_name = "sensors/#".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_tls_paths_are_rejected() {
        let mut shadow = Config::default().shadow;
        assert!(matches!(shadow.load_tls_material(), Ok(None)));

        shadow.cert_path = Some("/nonexistent/cert.pem".into());
        assert!(matches!(
            shadow.load_tls_material(),
            Err(AgentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_tls_material_reads_blobs() {
        let dir = std::env::temp_dir().join(format!("water-telemetry-tls-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for (name, body) in [("ca.pem", "ca"), ("cert.pem", "cert"), ("key.pem", "key")] {
            fs::write(dir.join(name), body).unwrap();
        }

        let mut shadow = Config::default().shadow;
        shadow.ca_path = Some(dir.join("ca.pem").display().to_string());
        shadow.cert_path = Some(dir.join("cert.pem").display().to_string());
        shadow.key_path = Some(dir.join("key.pem").display().to_string());

        let tls = shadow.load_tls_material().unwrap().unwrap();
        assert_eq!(tls.ca, b"ca");
        assert_eq!(tls.client_cert, b"cert");
        assert_eq!(tls.client_key, b"key");

        shadow.key_path = Some(dir.join("missing.pem").display().to_string());
        assert!(matches!(
            shadow.load_tls_material(),
            Err(AgentError::CredentialRead { .. })
        ));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_dotenv_parsing_keeps_existing_values() {
        let path = std::env::temp_dir().join(format!("water-telemetry-{}.env", std::process::id()));
        fs::write(
            &path,
            "# comment\nWT_TEST_QUOTED=\"two words\"\nWT_TEST_PRESET=from-file\n",
        )
        .unwrap();

        // SAFETY: test-only variables with a unique prefix
        unsafe { std::env::set_var("WT_TEST_PRESET", "from-env") };
        load_dotenv_from(&path);

        assert_eq!(std::env::var("WT_TEST_QUOTED").unwrap(), "two words");
        assert_eq!(std::env::var("WT_TEST_PRESET").unwrap(), "from-env");
        fs::remove_file(&path).ok();
    }
}
