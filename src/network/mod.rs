//! Wireless association with a fixed-interval retry loop.
//!
//! `NetworkLink::connect` keeps trying until the radio reports an association.
//! The default is to retry forever (an unattended device has nothing better to
//! do offline); `WIFI_MAX_ATTEMPTS` bounds it when that is not wanted.

pub mod public_ip;
pub mod wpa;

use crate::config::WifiConfig;
use async_trait::async_trait;
use log::{info, warn};
use std::time::Duration;
use thiserror::Error;

pub use public_ip::lookup_public_ip;
pub use wpa::WpaSupplicantRadio;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("radio interface unavailable: {0}")]
    RadioUnavailable(String),

    #[error("association with '{ssid}' failed: {reason}")]
    Association { ssid: String, reason: String },

    #[error("gave up after {attempts} association attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Station-mode radio provided by the OS/hardware layer.
#[async_trait]
pub trait Radio: Send {
    /// Whether the station interface is powered/up.
    async fn is_active(&mut self) -> bool;

    /// Bring the station interface up.
    async fn activate(&mut self) -> Result<(), LinkError>;

    /// Start (or restart) association. Completion is observed through
    /// `is_associated`, not through the return value.
    async fn associate(&mut self, ssid: &str, password: Option<&str>) -> Result<(), LinkError>;

    async fn is_associated(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Credentials and retry policy for `NetworkLink`.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub ssid: String,
    pub password: Option<String>,
    pub retry_interval: Duration,
    pub max_attempts: Option<u32>,
}

impl From<&WifiConfig> for LinkSettings {
    fn from(config: &WifiConfig) -> Self {
        Self {
            ssid: config.ssid.clone(),
            password: config.password.clone(),
            retry_interval: Duration::from_secs(config.retry_interval_secs),
            max_attempts: config.max_attempts,
        }
    }
}

pub struct NetworkLink {
    radio: Box<dyn Radio>,
    settings: LinkSettings,
    state: ConnectionState,
    last_attempts: u32,
}

impl NetworkLink {
    pub fn new(radio: Box<dyn Radio>, settings: LinkSettings) -> Self {
        Self {
            radio,
            settings,
            state: ConnectionState::Disconnected,
            last_attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Non-blocking: reflects the last observed state.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Association attempts made by the most recent `connect()`.
    pub fn last_attempts(&self) -> u32 {
        self.last_attempts
    }

    /// Log radio status and credentials summary. The passphrase is never logged.
    pub async fn log_diagnostics(&mut self) {
        info!(
            "[WiFi] Station interface active: {}",
            self.radio.is_active().await
        );
        info!("[WiFi] SSID: {}", self.settings.ssid);
        match &self.settings.password {
            Some(_) => info!("[WiFi] Password: <configured>"),
            None => info!("[WiFi] Password: passwordless network"),
        }
    }

    /// Re-check the radio and demote to `Disconnected` if the association dropped.
    pub async fn refresh(&mut self) -> ConnectionState {
        if self.state == ConnectionState::Connected && !self.radio.is_associated().await {
            warn!("[WiFi] Association to '{}' lost", self.settings.ssid);
            self.state = ConnectionState::Disconnected;
        }
        self.state
    }

    /// Block until associated, retrying at a fixed interval.
    ///
    /// Transient radio errors are logged and retried, never returned. The only
    /// error is `RetriesExhausted` when `max_attempts` is configured.
    pub async fn connect(&mut self) -> Result<(), LinkError> {
        self.state = ConnectionState::Connecting;
        self.last_attempts = 0;

        let mut attempt: u32 = 0;
        while !self.radio.is_associated().await {
            if let Some(max) = self.settings.max_attempts
                && attempt >= max
            {
                self.state = ConnectionState::Disconnected;
                warn!(
                    "[WiFi] Giving up on '{}' after {} attempts",
                    self.settings.ssid, attempt
                );
                return Err(LinkError::RetriesExhausted { attempts: attempt });
            }

            if !self.radio.is_active().await {
                info!("[WiFi] Turning on station interface");
                if let Err(e) = self.radio.activate().await {
                    warn!("[WiFi] {}, trying again...", e);
                }
            }

            attempt += 1;
            self.last_attempts = attempt;
            if let Err(e) = self
                .radio
                .associate(&self.settings.ssid, self.settings.password.as_deref())
                .await
            {
                warn!("[WiFi] {}, trying again...", e);
            }

            info!("[WiFi] Connecting to network... (attempt {})", attempt);
            tokio::time::sleep(self.settings.retry_interval).await;
        }

        self.state = ConnectionState::Connected;
        info!(
            "[WiFi] Connected to '{}' after {} attempt(s)",
            self.settings.ssid, attempt
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::simulation::SimulatedRadio;
    use tokio_test::{assert_err, assert_ok};

    fn settings(max_attempts: Option<u32>) -> LinkSettings {
        LinkSettings {
            ssid: "lab".into(),
            password: Some("secret".into()),
            retry_interval: Duration::from_secs(3),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_equal_failures_plus_one() {
        for failures in [0u32, 1, 4, 17] {
            let radio = SimulatedRadio::new(failures);
            let mut link = NetworkLink::new(Box::new(radio), settings(None));

            assert_ok!(link.connect().await);
            assert!(link.is_connected());
            assert_eq!(link.state(), ConnectionState::Connected);
            assert_eq!(link.last_attempts(), failures + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_constant() {
        let radio = SimulatedRadio::new(3);
        let mut link = NetworkLink::new(Box::new(radio), settings(None));

        let started = tokio::time::Instant::now();
        assert_ok!(link.connect().await);
        // One fixed wait after each of the four attempts
        assert_eq!(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_radio_is_activated() {
        let radio = SimulatedRadio::new(0).inactive();
        let active = radio.active_handle();
        let mut link = NetworkLink::new(Box::new(radio), settings(None));

        assert_ok!(link.connect().await);
        assert!(active.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_cap_gives_up() {
        let radio = SimulatedRadio::new(10);
        let mut link = NetworkLink::new(Box::new(radio), settings(Some(3)));

        let err = assert_err!(link.connect().await);
        assert!(matches!(err, LinkError::RetriesExhausted { attempts: 3 }));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_detects_lost_association() {
        let radio = SimulatedRadio::new(0);
        let associated = radio.association_handle();
        let mut link = NetworkLink::new(Box::new(radio), settings(None));

        assert_ok!(link.connect().await);
        assert_eq!(link.refresh().await, ConnectionState::Connected);

        associated.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(link.refresh().await, ConnectionState::Disconnected);
        assert!(!link.is_connected());

        // Reconnect succeeds on the first new attempt
        assert_ok!(link.connect().await);
        assert_eq!(link.last_attempts(), 1);
    }
}
