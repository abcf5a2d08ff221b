//! Telemetry run loop.
//!
//! Each cycle: make sure the link is up, make sure the shadow session is
//! subscribed, apply pending deltas, then poll the sensors and report.
//! Deltas are always applied before the report is built, so a report carries
//! the latest accepted actuator state.

use crate::config::AgentConfig;
use crate::network::{ConnectionState, NetworkLink, lookup_public_ip};
use crate::sensors::{Channel, SensorArray, SensorSnapshot};
use crate::shadow::{DeviceIdentity, ShadowReport, ShadowSyncClient};
use log::{error, info, warn};
use std::time::Duration;
use tokio::time::{Instant, sleep};

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub poll_interval: Duration,
    pub startup_delay: Duration,
    pub public_ip_url: Option<String>,
}

impl From<&AgentConfig> for AgentSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            startup_delay: Duration::from_secs(config.startup_delay_secs),
            public_ip_url: config.public_ip_url.clone(),
        }
    }
}

/// How far a cycle got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Report published
    Reported,
    /// Sensors read but the report could not be sent
    PublishFailed,
    /// No shadow session this cycle; sensors were not polled
    SyncUnavailable,
    /// The network link could not be brought up
    Offline,
}

pub struct TelemetryAgent {
    identity: DeviceIdentity,
    link: NetworkLink,
    sensors: SensorArray,
    shadow: ShadowSyncClient,
    settings: AgentSettings,
    started: Instant,
    cycles: u64,
}

impl TelemetryAgent {
    pub fn new(
        identity: DeviceIdentity,
        link: NetworkLink,
        sensors: SensorArray,
        shadow: ShadowSyncClient,
        settings: AgentSettings,
    ) -> Self {
        Self {
            identity,
            link,
            sensors,
            shadow,
            settings,
            started: Instant::now(),
            cycles: 0,
        }
    }

    pub fn link(&self) -> &NetworkLink {
        &self.link
    }

    pub fn shadow(&self) -> &ShadowSyncClient {
        &self.shadow
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn uptime_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Startup diagnostics, first association, public IP and countdown.
    pub async fn start(&mut self) {
        info!(
            "[Agent] {} ({} firmware {})",
            self.identity.client_id, self.identity.hardware_model, self.identity.firmware_version
        );
        self.link.log_diagnostics().await;

        while let Err(e) = self.link.connect().await {
            error!("[Agent] {}; retrying in {:?}", e, self.settings.poll_interval);
            sleep(self.settings.poll_interval).await;
        }

        if let Some(url) = &self.settings.public_ip_url {
            match lookup_public_ip(url).await {
                Ok(ip) => info!("[WiFi] Public IP address: {}", ip),
                Err(e) => warn!("[WiFi] Public IP lookup failed: {}", e),
            }
        }

        let seconds = self.settings.startup_delay.as_secs();
        for remaining in (1..=seconds).rev() {
            info!("[Agent] Starting sensor reading in {} seconds", remaining);
            sleep(Duration::from_secs(1)).await;
        }
    }

    /// One pass of the loop. Never fails; every error is logged and the
    /// outcome says where the cycle stopped.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;

        if self.link.refresh().await != ConnectionState::Connected
            && let Err(e) = self.link.connect().await
        {
            warn!("[Agent] Network unavailable: {}", e);
            return CycleOutcome::Offline;
        }

        if !self.shadow.is_subscribed()
            && let Err(e) = self.shadow.connect().await
        {
            warn!("[Agent] Shadow connect failed: {}", e);
            return CycleOutcome::SyncUnavailable;
        }

        loop {
            match self.shadow.poll_incoming().await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    warn!("[Agent] Checking for deltas failed: {}", e);
                    return CycleOutcome::SyncUnavailable;
                }
            }
        }

        let snapshot = self.sensors.poll().await;
        log_snapshot(&snapshot);

        let report = ShadowReport::new(
            self.identity.clone(),
            self.uptime_ms(),
            &snapshot,
            self.shadow.actuator(),
        );
        match self.shadow.publish_report(&report).await {
            Ok(()) => CycleOutcome::Reported,
            Err(e) => {
                warn!("[Agent] Publishing report failed: {}", e);
                CycleOutcome::PublishFailed
            }
        }
    }

    /// Run forever. Shutdown is external.
    pub async fn run(&mut self) {
        self.start().await;
        loop {
            self.run_cycle().await;
            sleep(self.settings.poll_interval).await;
        }
    }
}

fn log_snapshot(snapshot: &SensorSnapshot) {
    let fmt = |channel: Channel| match snapshot.get(channel) {
        Some(reading) => format!("{:.2}{}", reading.value, reading.unit),
        None => "n/a".to_string(),
    };
    info!(
        "[Agent] temperature={} turbidity={} ph={} tds={}",
        fmt(Channel::Temperature),
        fmt(Channel::Turbidity),
        fmt(Channel::Ph),
        fmt(Channel::Tds)
    );
}
