use log::{error, info};
use std::time::Duration;
use tokio::signal;
use water_telemetry_agent::agent::{AgentSettings, TelemetryAgent};
use water_telemetry_agent::config::{self, Config, SensorBackend, SensorsConfig, WifiBackend};
use water_telemetry_agent::error::Result;
use water_telemetry_agent::hal::simulation::{
    SimulatedAdc, SimulatedIndicator, SimulatedOneWire, SimulatedRadio,
};
use water_telemetry_agent::hal::sysfs::{SysfsAdc, SysfsLed, SysfsOneWire};
use water_telemetry_agent::hal::{AdcChannel, Indicator, OneWireBus, RomId};
use water_telemetry_agent::instance_lock::InstanceLock;
use water_telemetry_agent::network::{LinkSettings, NetworkLink, Radio, WpaSupplicantRadio};
use water_telemetry_agent::sensors::{
    PhSensor, SensorArray, TdsSensor, TemperatureSensor, TurbiditySensor,
};
use water_telemetry_agent::shadow::{
    DeviceIdentity, MqttSettings, MqttTransport, ShadowSyncClient, ShadowTopics,
};

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn build_sensors(config: &SensorsConfig) -> (SensorArray, Option<Box<dyn Indicator>>) {
    let simulated = config.backend == SensorBackend::Simulated;
    let adc = |path: &str, bench: SimulatedAdc| -> Box<dyn AdcChannel> {
        if simulated {
            Box::new(bench)
        } else {
            Box::new(SysfsAdc::new(path))
        }
    };

    let bus: Box<dyn OneWireBus> = if simulated {
        Box::new(SimulatedOneWire::new(vec![(RomId::new("28-00000bench01"), 21.5)]))
    } else {
        Box::new(SysfsOneWire::new(&config.onewire_path))
    };

    let mut sensors = SensorArray::new()
        .with(TemperatureSensor::new(
            bus,
            Duration::from_millis(config.temperature_settle_ms),
        ))
        .with(TurbiditySensor::new(adc(
            &config.turbidity_adc,
            SimulatedAdc::sequence(vec![1480, 1502, 1495, 1510]),
        )))
        .with(PhSensor::new(
            adc(&config.ph_adc, SimulatedAdc::sequence(vec![2040, 2052, 2047])),
            config.ph_scale,
        ));

    if let Some(path) = &config.tds_adc {
        let channel = adc(path, SimulatedAdc::sequence(vec![612, 618, 605, 640, 611]));
        sensors.push(TdsSensor::from_config(channel, &config.tds));
    }

    let indicator: Option<Box<dyn Indicator>> = match (&config.indicator_led, simulated) {
        (_, true) => Some(Box::new(SimulatedIndicator::new())),
        (Some(name), false) => Some(Box::new(SysfsLed::new(name))),
        (None, false) => None,
    };

    (sensors, indicator)
}

fn build_agent(config: &Config) -> Result<TelemetryAgent> {
    let radio: Box<dyn Radio> = match config.wifi.backend {
        WifiBackend::Wpa => Box::new(WpaSupplicantRadio::new(&config.wifi.interface)),
        WifiBackend::Simulated => Box::new(SimulatedRadio::new(0)),
    };
    let link = NetworkLink::new(radio, LinkSettings::from(&config.wifi));

    let (sensors, indicator) = build_sensors(&config.sensors);
    info!("[Sensor] Channels: {:?}", sensors.channels());

    let tls = config.shadow.load_tls_material()?;
    if tls.is_none() {
        info!("[Config] No certificate configured, shadow session uses plain TCP");
    }
    let transport = MqttTransport::new(MqttSettings {
        client_id: config.device.client_id.clone(),
        host: config.shadow.endpoint.clone(),
        port: config.shadow.port,
        keep_alive: Duration::from_secs(config.shadow.keep_alive_secs),
        connect_timeout: Duration::from_secs(config.shadow.connect_timeout_secs),
        tls,
    });
    let topics = ShadowTopics::new(&config.shadow.topic_prefix, &config.shadow.thing_name);
    let mut shadow = ShadowSyncClient::new(Box::new(transport), topics);
    if let Some(indicator) = indicator {
        shadow = shadow.with_indicator(indicator);
    }

    Ok(TelemetryAgent::new(
        DeviceIdentity::from(&config.device),
        link,
        sensors,
        shadow,
        AgentSettings::from(&config.agent),
    ))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logger();
    config::load_dotenv();
    info!("Starting water telemetry agent");

    let config = Config::from_env();
    if let Err(e) = config.validate() {
        error!("[Config] {}", e);
        std::process::exit(1);
    }
    info!("Configuration loaded:");
    info!("  Client ID: {}", config.device.client_id);
    info!("  Thing: {}", config.shadow.thing_name);
    info!("  Endpoint: {}:{}", config.shadow.endpoint, config.shadow.port);
    info!("  Poll interval: {}s", config.agent.poll_interval_secs);

    let _lock = match InstanceLock::acquire(&config.agent.instance_lock_name) {
        Ok(lock) => lock,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let mut agent = match build_agent(&config) {
        Ok(agent) => agent,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        _ = agent.run() => {}
        _ = signal::ctrl_c() => info!("Shutting down"),
    }
}
